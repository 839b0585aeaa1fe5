//! Indicator columns over a bar series.
//!
//! Every function returns one value per input bar, aligned by index, with
//! `NaN` where the trailing window does not fit yet.

/// Mean of `values[i + 1 - window ..= i]` at every index `i`.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    for i in (window - 1)..values.len() {
        let sum: f64 = values[i + 1 - window..=i].iter().sum();
        out[i] = sum / window as f64;
    }
    out
}

/// Simple moving average of closes over `period` bars, inclusive of the current bar.
pub fn moving_average(closes: &[f64], period: usize) -> Vec<f64> {
    trailing_mean(closes, period)
}

/// Percent distance of the close from its moving average.
pub fn distance_pct(closes: &[f64], averages: &[f64]) -> Vec<f64> {
    closes
        .iter()
        .zip(averages)
        .map(|(c, ma)| {
            if ma.is_nan() || *ma == 0.0 {
                f64::NAN
            } else {
                (c - ma) / ma * 100.0
            }
        })
        .collect()
}

/// Relative strength index with simple-average smoothing.
///
/// At bar `i` the `period` close-to-close deltas ending at `i` are split into
/// gains and losses and averaged over `period`:
/// `RSI = 100 - 100 / (1 + avg_gain / avg_loss)`.
/// A window with no losses scores 100, or 50 when it has no gains either.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if period == 0 {
        return out;
    }

    for i in period..closes.len() {
        let mut gains = 0.0;
        let mut losses = 0.0;
        for j in (i + 1 - period)..=i {
            let delta = closes[j] - closes[j - 1];
            if delta > 0.0 {
                gains += delta;
            } else {
                losses -= delta;
            }
        }

        let avg_gain = gains / period as f64;
        let avg_loss = losses / period as f64;

        out[i] = if avg_loss == 0.0 {
            if avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
    }
    out
}

/// Opening gap versus the prior close, in percent.
pub fn gap_pct(opens: &[f64], closes: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; opens.len()];
    for i in 1..opens.len() {
        let prev_close = closes[i - 1];
        if prev_close != 0.0 {
            out[i] = (opens[i] - prev_close) / prev_close * 100.0;
        }
    }
    out
}

/// Prior bar's `volume * close`.
pub fn previous_dollar_volume(volumes: &[f64], closes: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; volumes.len()];
    for i in 1..volumes.len() {
        out[i] = volumes[i - 1] * closes[i - 1];
    }
    out
}

/// Mean volume over the last `recent` bars divided by mean volume over the
/// last `lookback` bars. Both windows end at the current bar, so the recent
/// window is part of the lookback window.
pub fn relative_volume(volumes: &[f64], recent: usize, lookback: usize) -> Vec<f64> {
    let recent_mean = trailing_mean(volumes, recent);
    let lookback_mean = trailing_mean(volumes, lookback);

    recent_mean
        .iter()
        .zip(&lookback_mean)
        .map(|(r, l)| {
            if r.is_nan() || l.is_nan() || *l == 0.0 {
                f64::NAN
            } else {
                r / l
            }
        })
        .collect()
}
