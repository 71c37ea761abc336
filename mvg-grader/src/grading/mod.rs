//! Deterministic grade computation

pub mod aggregator;

pub use aggregator::{
    grade_label, CurvatureBand, GradeBreakdown, GradeError, GradePolicy,
};
