//! Grade Aggregator
//!
//! Combines the five category subgrades into a final numeric grade:
//! weighted mean, curvature band classification, strict-mode caps, and
//! deterministic floor-rounding to one decimal.
//!
//! This module is a pure function of its inputs. No randomness, no clock,
//! no I/O: identical subgrades and curvature always produce the identical
//! final grade.

use mvg_common::db::Subgrades;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grade aggregation errors
#[derive(Debug, Error)]
pub enum GradeError {
    /// Invalid input (out-of-range subgrade or curvature)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Fixed category weights (sum to 1.00)
pub const GEOMETRY_WEIGHT: f64 = 0.30;
pub const CORNERS_WEIGHT: f64 = 0.20;
pub const COATING_WEIGHT: f64 = 0.12;
pub const SURFACE_WEIGHT: f64 = 0.20;
pub const ALIGNMENT_WEIGHT: f64 = 0.18;

/// Qualitative curvature band
///
/// A slight bow is the morphological target: the Ideal band is the closed
/// interval [2%, 5%], and perfectly flat pieces sit in a mild penalty band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurvatureBand {
    /// Below 2% - too flat, lacks dimensional character
    Flat,
    /// 2% to 5% inclusive - no penalty
    Ideal,
    /// Above 5% up to 8%
    MinorWarp,
    /// Above 8% up to 12%
    Warped,
    /// Above 12%
    SevereWarp,
}

impl CurvatureBand {
    /// Classify a curvature percentage.
    ///
    /// Total over [0, inf): every non-negative value lands in exactly one
    /// band. Boundaries: 2 and 5 belong to Ideal; 8 to MinorWarp; 12 to
    /// Warped.
    pub fn from_percent(curvature: f64) -> Self {
        if curvature > 12.0 {
            CurvatureBand::SevereWarp
        } else if curvature > 8.0 {
            CurvatureBand::Warped
        } else if curvature > 5.0 {
            CurvatureBand::MinorWarp
        } else if curvature >= 2.0 {
            CurvatureBand::Ideal
        } else {
            CurvatureBand::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CurvatureBand::Flat => "Flat",
            CurvatureBand::Ideal => "Ideal",
            CurvatureBand::MinorWarp => "Minor warp",
            CurvatureBand::Warped => "Warped",
            CurvatureBand::SevereWarp => "Severe warp",
        }
    }
}

/// Result of aggregating one specimen's subgrades
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeBreakdown {
    /// Weighted mean of the five subgrades, before caps and rounding
    pub weighted_mean: f64,
    /// Curvature band classification
    pub band: CurvatureBand,
    /// Final grade in [1.0, 10.0]: capped, then floor-rounded to one decimal
    pub final_grade: f64,
    /// True when any strict cap lowered the grade below the weighted mean
    pub cap_applied: bool,
}

/// Grade Aggregator policy
///
/// Weights, band thresholds, and strict caps are fixed by the framework;
/// the struct exists so the corner-radius proxy (only available when the
/// specimen was physically measured) can be supplied per submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradePolicy {
    /// Measured corner radius proxy in millimetres, if available
    pub corner_radius_mm: Option<f64>,
}

impl GradePolicy {
    /// Compute the weighted mean of the five subgrades.
    ///
    /// geometry 0.30 + corners 0.20 + surface 0.20 + coating 0.12 +
    /// alignment 0.18
    pub fn weighted_mean(subgrades: &Subgrades) -> f64 {
        subgrades.geometry * GEOMETRY_WEIGHT
            + subgrades.corners * CORNERS_WEIGHT
            + subgrades.coating * COATING_WEIGHT
            + subgrades.surface * SURFACE_WEIGHT
            + subgrades.alignment * ALIGNMENT_WEIGHT
    }

    /// Aggregate subgrades and curvature into the final grade.
    ///
    /// Order is fixed: weighted mean, then strict caps (most restrictive
    /// wins), then floor-rounding to one decimal as the LAST step.
    ///
    /// # Errors
    /// Returns an error if any subgrade is outside [0, 10] or the curvature
    /// is negative or non-finite.
    pub fn aggregate(
        &self,
        subgrades: &Subgrades,
        curvature: f64,
    ) -> Result<GradeBreakdown, GradeError> {
        subgrades.validate().map_err(GradeError::InvalidInput)?;

        if !curvature.is_finite() || curvature < 0.0 {
            return Err(GradeError::InvalidInput(format!(
                "Curvature out of range: {}",
                curvature
            )));
        }

        let weighted_mean = Self::weighted_mean(subgrades);
        let band = CurvatureBand::from_percent(curvature);

        // Strict caps: each rule lowers the ceiling, never raises it
        let mut cap = f64::INFINITY;
        if curvature > 12.0 {
            cap = cap.min(7.5);
        }
        if curvature > 7.5 {
            cap = cap.min(8.0);
        }
        if subgrades.scores().iter().any(|s| *s < 8.0) {
            cap = cap.min(8.0);
        }
        if let Some(radius) = self.corner_radius_mm {
            if radius > 0.35 {
                cap = cap.min(8.0);
            }
        }

        let capped = weighted_mean.min(cap);
        let cap_applied = capped < weighted_mean;

        let final_grade = round_down_tenth(capped).clamp(1.0, 10.0);

        Ok(GradeBreakdown {
            weighted_mean,
            band,
            final_grade,
            cap_applied,
        })
    }
}

/// Round toward zero to one decimal place.
///
/// The epsilon absorbs binary representation noise so values that are
/// already an exact tenth (e.g. 9.1) round to themselves.
fn round_down_tenth(value: f64) -> f64 {
    ((value * 10.0) + 1e-9).floor() / 10.0
}

/// Map a final numeric grade to its qualitative label
pub fn grade_label(grade: f64) -> &'static str {
    if grade >= 9.5 {
        "Gem Mint"
    } else if grade >= 9.0 {
        "Mint"
    } else if grade >= 8.5 {
        "NM-MT"
    } else if grade >= 8.0 {
        "NM"
    } else if grade >= 7.5 {
        "NM-"
    } else if grade >= 7.0 {
        "Good"
    } else if grade >= 6.0 {
        "Fair"
    } else {
        "Poor"
    }
}
