//! Submission pipeline
//!
//! End-to-end orchestration for one submission: moderation, oracle grading,
//! deterministic aggregation, report rendering, persistence, identity
//! tracking, leaderboard update, and deferred publish scheduling.
//!
//! The oracle's own numeric grade is treated as an estimate only. The
//! stored grade is always recomputed by the grade aggregator from the
//! validated subgrades and curvature, and a failed oracle call fails the
//! submission instead of substituting a made-up grade.

use crate::grading::{grade_label, GradeBreakdown, GradePolicy};
use crate::services::duplicate_ledger::DuplicateLedger;
use crate::services::identity_tracker::IdentityTracker;
use crate::services::leaderboard::Leaderboard;
use crate::services::moderation::{ModerationGate, ModerationReport, SubmissionImages};
use crate::services::publish_scheduler::{PublishScheduler, PUBLISH_DELAY};
use crate::services::report_renderer::ReportRenderer;
use crate::services::specimen_store::SpecimenStore;
use crate::services::vision_oracle::VisionOracle;
use chrono::{SecondsFormat, Utc};
use mvg_common::config::OracleConfig;
use mvg_common::db::SpecimenRecord;
use mvg_common::{Error, Result};
use rand::Rng;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Grading framework revision stamped on every record and report
pub const FRAMEWORK_VERSION: &str = "v1.7 Strict+++";

/// Curvature assumed when the oracle omits an estimate
pub const DEFAULT_CURVATURE: f64 = 3.5;

const TAG_LEN: usize = 3;
const TAG_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// One submission to grade
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub specimen_id: String,
    pub images: SubmissionImages,
    pub device_id: String,
    pub ip: String,
    pub user_tag: Option<String>,
    /// Corner radius proxy in millimetres, when physically measured
    pub corner_radius_mm: Option<f64>,
}

/// Terminal outcome of a submission
#[derive(Debug)]
pub enum SubmissionOutcome {
    Graded(Box<GradedSubmission>),
    Rejected(ModerationReport),
}

/// A fully graded, persisted, report-backed submission
#[derive(Debug)]
pub struct GradedSubmission {
    pub record: SpecimenRecord,
    pub breakdown: GradeBreakdown,
    pub report_path: PathBuf,
    /// Advisory warnings from moderation and identity tracking
    pub warnings: Vec<String>,
}

/// Submission pipeline wiring every grading service to one shared pool
pub struct SubmissionPipeline {
    gate: ModerationGate,
    oracle: Arc<VisionOracle>,
    ledger: DuplicateLedger,
    specimens: SpecimenStore,
    leaderboard: Leaderboard,
    identity: IdentityTracker,
    scheduler: PublishScheduler,
    renderer: ReportRenderer,
}

impl SubmissionPipeline {
    pub fn new(
        db: SqlitePool,
        oracle_config: OracleConfig,
        reports_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let oracle = Arc::new(VisionOracle::new(oracle_config)?);
        Ok(Self {
            gate: ModerationGate::new(DuplicateLedger::new(db.clone()), Arc::clone(&oracle)),
            ledger: DuplicateLedger::new(db.clone()),
            specimens: SpecimenStore::new(db.clone()),
            leaderboard: Leaderboard::new(db.clone()),
            identity: IdentityTracker::new(db.clone()),
            scheduler: PublishScheduler::new(db),
            renderer: ReportRenderer::new(reports_dir),
            oracle,
        })
    }

    /// Run one submission through the full pipeline.
    ///
    /// A moderation rejection is a normal outcome, returned as
    /// `Rejected`. Oracle, aggregation, and persistence failures are hard
    /// errors for the submission.
    pub async fn process(&self, request: SubmissionRequest) -> Result<SubmissionOutcome> {
        let user_tag = normalize_user_tag(request.user_tag.as_deref());

        tracing::info!(
            specimen_id = %request.specimen_id,
            device_id = %request.device_id,
            user_tag = %user_tag,
            "Processing submission"
        );

        let moderation = self.gate.moderate(&request.images).await?;
        if !moderation.passed {
            return Ok(SubmissionOutcome::Rejected(moderation));
        }
        let mut warnings = moderation.warnings.clone();

        let front = tokio::fs::read(&request.images.front).await?;
        let side = tokio::fs::read(&request.images.side).await?;
        let back = match &request.images.back {
            Some(path) => Some(tokio::fs::read(path).await?),
            None => None,
        };

        let verdict = self
            .oracle
            .grade(&request.specimen_id, &front, &side)
            .await?;
        let curvature = verdict.curvature.unwrap_or(DEFAULT_CURVATURE);

        let policy = GradePolicy {
            corner_radius_mm: request.corner_radius_mm,
        };
        let breakdown = policy
            .aggregate(&verdict.subgrades, curvature)
            .map_err(|e| Error::Validation(e.to_string()))?;

        let image_hash = moderation
            .fingerprints
            .iter()
            .map(|fp| fp.digest.as_str())
            .collect::<Vec<_>>()
            .join(":");

        let mut record = SpecimenRecord {
            specimen_id: request.specimen_id.clone(),
            framework_version: FRAMEWORK_VERSION.to_string(),
            front_path: request.images.front.display().to_string(),
            side_path: request.images.side.display().to_string(),
            back_path: request.images.back.as_ref().map(|p| p.display().to_string()),
            grade: breakdown.final_grade,
            grade_label: grade_label(breakdown.final_grade).to_string(),
            curvature,
            subgrades: verdict.subgrades,
            notes: verdict.notes,
            report_path: None,
            user_tag: user_tag.clone(),
            device_id: request.device_id.clone(),
            image_hash,
            published: false,
            date_graded: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let mut image_refs: Vec<&[u8]> = vec![&front, &side];
        if let Some(back) = &back {
            image_refs.push(back);
        }
        let report_path = self.renderer.write(&record, &breakdown, &image_refs).await?;
        record.report_path = Some(report_path.display().to_string());

        self.specimens.insert(&record).await?;

        for fp in &moderation.fingerprints {
            self.ledger
                .record(&record.specimen_id, &fp.digest, fp.view.as_str())
                .await?;
        }

        // Identity tracking is advisory and fails open
        if let Err(e) = self.identity.record(&request.device_id, &request.ip).await {
            tracing::warn!(error = %e, "Identity tracking failed");
            warnings.push("Submission activity could not be recorded.".to_string());
        }
        warnings.extend(
            self.identity
                .abuse_warnings(&request.device_id, &request.ip)
                .await,
        );

        self.leaderboard
            .update(
                &request.device_id,
                &user_tag,
                breakdown.final_grade,
                &record.specimen_id,
                curvature,
            )
            .await?;

        self.scheduler
            .enqueue(&record.specimen_id, PUBLISH_DELAY)
            .await?;

        tracing::info!(
            specimen_id = %record.specimen_id,
            grade = record.grade,
            label = %record.grade_label,
            "Submission graded"
        );

        Ok(SubmissionOutcome::Graded(Box::new(GradedSubmission {
            record,
            breakdown,
            report_path,
            warnings,
        })))
    }

    /// Publish every specimen whose hold-down has elapsed
    pub async fn publish_due(&self) -> Result<Vec<String>> {
        self.scheduler.publish_due().await
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    pub fn specimens(&self) -> &SpecimenStore {
        &self.specimens
    }
}

/// Normalize a submitted user tag to three uppercase A-Z/0-9 characters.
///
/// Anything that does not fit the shape is replaced with a random valid
/// tag rather than rejected.
pub fn normalize_user_tag(tag: Option<&str>) -> String {
    if let Some(tag) = tag {
        let upper = tag.trim().to_uppercase();
        if upper.len() == TAG_LEN
            && upper.bytes().all(|b| TAG_CHARSET.contains(&b))
        {
            return upper;
        }
    }
    random_tag()
}

fn random_tag() -> String {
    let mut rng = rand::thread_rng();
    (0..TAG_LEN)
        .map(|_| TAG_CHARSET[rng.gen_range(0..TAG_CHARSET.len())] as char)
        .collect()
}

/// Mint a fresh specimen id
pub fn generate_specimen_id() -> String {
    format!("CTC-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_tag_is_uppercased_and_kept() {
        assert_eq!(normalize_user_tag(Some("qz7")), "QZ7");
        assert_eq!(normalize_user_tag(Some("AB9")), "AB9");
        assert_eq!(normalize_user_tag(Some(" k2x ")), "K2X");
    }

    #[test]
    fn invalid_tags_are_replaced_with_random_valid_ones() {
        for bad in [None, Some(""), Some("TOOLONG"), Some("a!"), Some("ÅBC")] {
            let tag = normalize_user_tag(bad);
            assert_eq!(tag.len(), TAG_LEN);
            assert!(tag.bytes().all(|b| TAG_CHARSET.contains(&b)), "{}", tag);
        }
    }

    #[test]
    fn specimen_ids_are_unique_and_prefixed() {
        let a = generate_specimen_id();
        let b = generate_specimen_id();
        assert!(a.starts_with("CTC-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn pipeline_construction_wires_shared_pool() {
        let pool = sqlx::SqlitePool::connect(":memory:").await.unwrap();
        mvg_common::db::create_all_tables(&pool).await.unwrap();

        let config = OracleConfig {
            api_key: "test-key".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            grading_model: "test".to_string(),
            classifier_model: "test".to_string(),
            timeout: std::time::Duration::from_secs(1),
        };
        let dir = tempfile::tempdir().unwrap();
        let pipeline = SubmissionPipeline::new(pool, config, dir.path()).unwrap();

        assert!(pipeline.specimens().fetch("CTC-none").await.unwrap().is_none());
        assert_eq!(pipeline.leaderboard().stats().await.unwrap().total_devices, 0);
        assert!(pipeline.publish_due().await.unwrap().is_empty());
    }
}
