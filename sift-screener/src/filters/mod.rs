//! Filter definitions, indicator math and the composite evaluation engine.

pub mod engine;
pub mod indicators;
pub mod spec;

pub use engine::{
    EvaluationStatus, FilterColumn, FilterEngine, MetricsSummary, QualificationResult,
};
pub use spec::{Condition, FilterKind, FilterSpec, GapDirection};
