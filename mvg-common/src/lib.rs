//! # Multiview Grader Common Library
//!
//! Shared code for the Multiview specimen grading pipeline including:
//! - Error taxonomy and common Result type
//! - Database initialization and models
//! - Configuration loading and root folder resolution

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
