//! Database models

use serde::{Deserialize, Serialize};

/// The five fixed subgrade categories, each scored in [0, 10].
///
/// Strict deserialization: a reply missing any category must fail parsing
/// rather than default the missing score. The grading oracle is untrusted,
/// and a silently defaulted subgrade would be presented as real analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Subgrades {
    pub geometry: f64,
    pub corners: f64,
    pub coating: f64,
    pub surface: f64,
    pub alignment: f64,
}

impl Subgrades {
    /// Iterate scores in a fixed order (geometry, corners, coating, surface, alignment)
    pub fn scores(&self) -> [f64; 5] {
        [
            self.geometry,
            self.corners,
            self.coating,
            self.surface,
            self.alignment,
        ]
    }

    /// Validate every score lies in [0, 10]
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, score) in [
            ("geometry", self.geometry),
            ("corners", self.corners),
            ("coating", self.coating),
            ("surface", self.surface),
            ("alignment", self.alignment),
        ] {
            if !score.is_finite() || !(0.0..=10.0).contains(&score) {
                return Err(format!("subgrade {} out of range: {}", name, score));
            }
        }
        Ok(())
    }
}

/// One graded submission as stored in the specimens table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecimenRecord {
    pub specimen_id: String,
    pub framework_version: String,
    pub front_path: String,
    pub side_path: String,
    pub back_path: Option<String>,
    /// Final numeric grade in [1, 10], already capped and floor-rounded
    pub grade: f64,
    pub grade_label: String,
    pub curvature: f64,
    pub subgrades: Subgrades,
    pub notes: String,
    pub report_path: Option<String>,
    pub user_tag: String,
    pub device_id: String,
    /// Concatenated per-view fingerprint digests
    pub image_hash: String,
    pub published: bool,
    pub date_graded: String,
}

/// One per-view image fingerprint, immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub specimen_id: String,
    pub digest: String,
    pub view: String,
    pub timestamp: String,
}

/// One leaderboard row per device identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub device_id: String,
    pub user_tag: String,
    pub highest_grade: f64,
    pub best_specimen_id: String,
    pub best_curvature: f64,
    pub last_updated: String,
    pub total_submissions: i64,
}
