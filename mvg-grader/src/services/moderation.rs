//! Moderation Gate
//!
//! Orchestrates the checks every submission must clear before grading runs:
//! duplicate fingerprint lookup, the classifier oracle, and basic quality
//! heuristics. Terminal outcomes are Passed or Rejected; any error rejects,
//! warnings never block.
//!
//! Moderation is a safety property: a failure inside the gate itself
//! (unreadable image, unreachable oracle) rejects the submission rather
//! than failing open. Only the advisory identity tracking, which lives
//! outside this gate, is allowed to fail open.

use crate::services::duplicate_ledger::DuplicateLedger;
use crate::services::image_hasher;
use crate::services::vision_oracle::{Classification, VisionOracle};
use mvg_common::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Classifier confidence below this is a rejection
pub const MIN_CLASSIFIER_CONFIDENCE: f64 = 0.70;
/// Classifier confidence below this (but above the floor) is a warning
pub const REVIEW_CONFIDENCE: f64 = 0.85;
/// Width or height below this draws a low-resolution warning
pub const MIN_DIMENSION_PX: u32 = 512;
/// Encoded files smaller than this are rejected as likely screenshots
pub const MIN_FILE_BYTES: u64 = 50_000;

/// Named view of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionView {
    Front,
    Side,
    Back,
}

impl SubmissionView {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionView::Front => "front",
            SubmissionView::Side => "side",
            SubmissionView::Back => "back",
        }
    }
}

/// The image set for one submission (front and side required, back optional)
#[derive(Debug, Clone)]
pub struct SubmissionImages {
    pub front: PathBuf,
    pub side: PathBuf,
    pub back: Option<PathBuf>,
}

impl SubmissionImages {
    /// Views in submission order
    pub fn views(&self) -> Vec<(SubmissionView, &Path)> {
        let mut views = vec![
            (SubmissionView::Front, self.front.as_path()),
            (SubmissionView::Side, self.side.as_path()),
        ];
        if let Some(back) = &self.back {
            views.push((SubmissionView::Back, back.as_path()));
        }
        views
    }
}

/// One duplicate match against the ledger
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateHit {
    pub view: SubmissionView,
    pub prior_id: String,
    pub timestamp: String,
}

/// Fingerprint computed for one view during moderation, reused by the
/// pipeline when recording the ledger entries after a pass
#[derive(Debug, Clone)]
pub struct ViewFingerprint {
    pub view: SubmissionView,
    pub digest: String,
}

/// Structured moderation outcome
#[derive(Debug, Default)]
pub struct ModerationReport {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duplicates: Vec<DuplicateHit>,
    pub fingerprints: Vec<ViewFingerprint>,
}

impl ModerationReport {
    fn new() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }

    fn reject(&mut self, reason: String) {
        self.errors.push(reason);
        self.passed = false;
    }
}

/// Moderation Gate
pub struct ModerationGate {
    ledger: DuplicateLedger,
    oracle: Arc<VisionOracle>,
}

impl ModerationGate {
    pub fn new(ledger: DuplicateLedger, oracle: Arc<VisionOracle>) -> Self {
        Self { ledger, oracle }
    }

    /// Run the full moderation pipeline for one submission.
    ///
    /// Steps in order: duplicate check per view, classifier oracle on
    /// front/side, quality heuristics per view. Each step appends errors
    /// and warnings; any error leaves the report Rejected.
    pub async fn moderate(&self, images: &SubmissionImages) -> Result<ModerationReport> {
        let mut report = ModerationReport::new();

        // 1. Fingerprint every view and check the ledger
        self.check_duplicates(images, &mut report).await;

        // 2. Classifier oracle on front/side. Unreadable images already
        //    rejected above; the oracle still runs so the report carries
        //    every applicable reason.
        match (
            tokio::fs::read(&images.front).await,
            tokio::fs::read(&images.side).await,
        ) {
            (Ok(front), Ok(side)) => {
                let outcome = self.oracle.classify(&front, &side).await;
                apply_classification(&mut report, outcome);
            }
            _ => {
                report.reject("Classification skipped: front/side image unreadable".to_string());
            }
        }

        // 3. Quality heuristics per view
        check_quality(&mut report, images).await;

        if report.passed {
            tracing::info!(warnings = report.warnings.len(), "Moderation passed");
        } else {
            tracing::warn!(errors = ?report.errors, "Moderation rejected submission");
        }

        Ok(report)
    }

    /// Fingerprint each view and record any ledger hits as errors.
    ///
    /// A decode failure or ledger error rejects the submission; it is never
    /// treated as "no match".
    pub async fn check_duplicates(&self, images: &SubmissionImages, report: &mut ModerationReport) {
        for (view, path) in images.views() {
            let fingerprint = match image_hasher::fingerprint_file(path).await {
                Ok(fp) => fp,
                Err(e) => {
                    report.reject(format!("{} image: {}", view.as_str(), e));
                    continue;
                }
            };

            match self.ledger.lookup(&fingerprint.digest).await {
                Ok(Some(prior)) => {
                    report.reject(
                        mvg_common::Error::DuplicateImage {
                            view: view.as_str().to_string(),
                            prior_id: prior.specimen_id.clone(),
                            timestamp: prior.timestamp.clone(),
                        }
                        .to_string(),
                    );
                    report.duplicates.push(DuplicateHit {
                        view,
                        prior_id: prior.specimen_id,
                        timestamp: prior.timestamp,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    report.reject(format!(
                        "Duplicate check unavailable for {} image: {}",
                        view.as_str(),
                        e
                    ));
                }
            }

            report.fingerprints.push(ViewFingerprint {
                view,
                digest: fingerprint.digest,
            });
        }
    }
}

/// Fold a classifier outcome into the report.
///
/// An oracle failure is a rejection, not a silent pass: classification is
/// a safety check.
pub fn apply_classification(
    report: &mut ModerationReport,
    outcome: Result<Classification>,
) {
    match outcome {
        Ok(c) if !c.is_ctc || c.confidence < MIN_CLASSIFIER_CONFIDENCE => {
            report.reject(format!(
                "Image does not appear to be a valid specimen. Reason: {}",
                c.reason
            ));
        }
        Ok(c) if c.confidence < REVIEW_CONFIDENCE => {
            report.warnings.push(format!(
                "Classification confidence is moderate ({:.1}%). Manual review recommended.",
                c.confidence * 100.0
            ));
        }
        Ok(_) => {}
        Err(e) => {
            report.reject(format!("Classification check failed: {}", e));
        }
    }
}

/// Resolution and file-size heuristics per view
pub async fn check_quality(report: &mut ModerationReport, images: &SubmissionImages) {
    for (view, path) in images.views() {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            // Unreadable views were already rejected by the duplicate step
            Err(_) => continue,
        };

        if (bytes.len() as u64) < MIN_FILE_BYTES {
            report.reject(format!(
                "{} image file size suspiciously small ({:.1}KB). May be a screenshot or \
                 low-quality image.",
                view.as_str(),
                bytes.len() as f64 / 1024.0
            ));
        }

        if let Ok(fp) = image_hasher::fingerprint_bytes(&bytes) {
            if fp.width < MIN_DIMENSION_PX || fp.height < MIN_DIMENSION_PX {
                report.warnings.push(format!(
                    "{} image resolution is low ({}x{}). Recommend 1024x1024 or higher.",
                    view.as_str(),
                    fp.width,
                    fp.height
                ));
            }
        }
    }
}
