//! mvg-grader library interface
//!
//! Exposes the grading pipeline components for integration testing.

pub mod grading;
pub mod services;
