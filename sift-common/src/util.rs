//! Utility functions for Sift services.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Multi-byte UTF-8 characters are handled on character boundaries.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Sanitize a string for safe logging (redact credentials in URLs and headers).
pub fn sanitize_for_log(s: &str) -> String {
    let patterns: &[(&str, &str)] = &[
        (r"(?i)(api[_-]?key|apikey)=[^&\s]+", "$1=***REDACTED***"),
        (r"(?i)(api[_-]?key|apikey):\s*\S{8,}", "$1: ***REDACTED***"),
        (r"(?i)(bearer)\s+\S{10,}", "$1 ***REDACTED***"),
        (r"(?i)(password|passwd|pwd)[=:]\s*\S+", "$1=***REDACTED***"),
    ];

    let mut result = s.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            result = re.replace_all(&result, *replacement).to_string();
        }
    }
    result
}

/// Parse a duration string like "5m", "1h", "30s", "7d" into seconds.
pub fn parse_duration_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let unit_start = s.len() - s.chars().last().map_or(0, char::len_utf8);
    let (num_str, unit) = s.split_at(unit_start);
    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: {num_str}"))?;

    match unit {
        "s" => Ok(num),
        "m" => Ok(num * 60),
        "h" => Ok(num * 3600),
        "d" => Ok(num * 86400),
        _ => Err(format!("Unknown unit: {unit}")),
    }
}

/// Format bytes as human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
