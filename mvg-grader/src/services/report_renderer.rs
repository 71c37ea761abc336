//! Markdown grade reports
//!
//! Renders a deterministic Markdown report for a graded specimen and stamps
//! it with a provenance digest: SHA-256 over the submitted image bytes plus
//! the report body. Re-rendering the same record with the same images
//! yields the same bytes, so a report can be re-verified after the fact.

use crate::grading::aggregator::{
    ALIGNMENT_WEIGHT, COATING_WEIGHT, CORNERS_WEIGHT, GEOMETRY_WEIGHT, SURFACE_WEIGHT,
};
use crate::grading::GradeBreakdown;
use mvg_common::db::SpecimenRecord;
use mvg_common::Result;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Report renderer writing into a fixed reports directory
pub struct ReportRenderer {
    reports_dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    /// Render the report and write it to `<reports_dir>/<specimen_id>.md`.
    pub async fn write(
        &self,
        record: &SpecimenRecord,
        breakdown: &GradeBreakdown,
        image_bytes: &[&[u8]],
    ) -> Result<PathBuf> {
        let report = render(record, breakdown, image_bytes);
        let path = self.reports_dir.join(format!("{}.md", record.specimen_id));

        tokio::fs::create_dir_all(&self.reports_dir).await?;
        tokio::fs::write(&path, report).await?;

        tracing::info!(path = %path.display(), "Wrote grade report");

        Ok(path)
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }
}

/// Render the full report including the provenance footer.
///
/// Deterministic: depends only on the record, the breakdown, and the image
/// bytes. The graded timestamp comes from the record, never the clock.
pub fn render(
    record: &SpecimenRecord,
    breakdown: &GradeBreakdown,
    image_bytes: &[&[u8]],
) -> String {
    let body = render_body(record, breakdown);
    let digest = provenance_digest(image_bytes, &body);
    format!("{}\n---\n\nProvenance: `{}`\n", body, digest)
}

fn render_body(record: &SpecimenRecord, breakdown: &GradeBreakdown) -> String {
    let mut out = String::new();
    let s = &record.subgrades;

    let _ = writeln!(out, "# Specimen Grade Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "**Specimen:** {}", record.specimen_id);
    let _ = writeln!(out, "**Framework:** {}", record.framework_version);
    let _ = writeln!(out, "**Graded:** {}", record.date_graded);
    let _ = writeln!(out, "**Submitted by:** {}", record.user_tag);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Final Grade");
    let _ = writeln!(out);
    let _ = writeln!(out, "**{:.1}** ({})", record.grade, record.grade_label);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Subgrades");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Category | Weight | Score |");
    let _ = writeln!(out, "|----------|--------|-------|");
    let _ = writeln!(out, "| Geometry | {:.2} | {:.1} |", GEOMETRY_WEIGHT, s.geometry);
    let _ = writeln!(out, "| Corners | {:.2} | {:.1} |", CORNERS_WEIGHT, s.corners);
    let _ = writeln!(out, "| Surface | {:.2} | {:.1} |", SURFACE_WEIGHT, s.surface);
    let _ = writeln!(out, "| Coating | {:.2} | {:.1} |", COATING_WEIGHT, s.coating);
    let _ = writeln!(out, "| Alignment | {:.2} | {:.1} |", ALIGNMENT_WEIGHT, s.alignment);
    let _ = writeln!(out);
    let _ = writeln!(out, "Weighted mean: {:.3}", breakdown.weighted_mean);
    let _ = writeln!(
        out,
        "Curvature: {:.1}% ({})",
        record.curvature,
        breakdown.band.as_str()
    );
    if breakdown.cap_applied {
        let _ = writeln!(out, "A grade cap was applied to the weighted mean.");
    }
    if !record.notes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Notes");
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", record.notes);
    }
    let _ = writeln!(out);

    out
}

/// SHA-256 over every image's bytes followed by the report body, shortened
/// to `first8…last8` of the hex digest.
pub fn provenance_digest(image_bytes: &[&[u8]], body: &str) -> String {
    let mut hasher = Sha256::new();
    for bytes in image_bytes {
        hasher.update(bytes);
    }
    hasher.update(body.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("{}\u{2026}{}", &hex[..8], &hex[hex.len() - 8..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::{CurvatureBand, GradeBreakdown};
    use mvg_common::db::Subgrades;

    fn record() -> SpecimenRecord {
        SpecimenRecord {
            specimen_id: "CTC-20260831-0001".to_string(),
            framework_version: "v1.7 Strict+++".to_string(),
            front_path: "front.png".to_string(),
            side_path: "side.png".to_string(),
            back_path: None,
            grade: 9.1,
            grade_label: "Mint".to_string(),
            curvature: 3.5,
            subgrades: Subgrades {
                geometry: 9.5,
                corners: 9.0,
                coating: 8.8,
                surface: 9.2,
                alignment: 9.1,
            },
            notes: "Clean edges, slight coating loss near rim.".to_string(),
            report_path: None,
            user_tag: "QZ7".to_string(),
            device_id: "dev-1".to_string(),
            image_hash: "abc".to_string(),
            published: false,
            date_graded: "2026-08-31T12:00:00Z".to_string(),
        }
    }

    fn breakdown() -> GradeBreakdown {
        GradeBreakdown {
            weighted_mean: 9.192,
            band: CurvatureBand::Ideal,
            final_grade: 9.1,
            cap_applied: false,
        }
    }

    #[test]
    fn render_is_deterministic() {
        let images: Vec<&[u8]> = vec![b"front-bytes", b"side-bytes"];
        let a = render(&record(), &breakdown(), &images);
        let b = render(&record(), &breakdown(), &images);
        assert_eq!(a, b);
    }

    #[test]
    fn report_carries_grade_and_subgrades() {
        let images: Vec<&[u8]> = vec![b"front-bytes"];
        let report = render(&record(), &breakdown(), &images);
        assert!(report.contains("**9.1** (Mint)"));
        assert!(report.contains("| Geometry | 0.30 | 9.5 |"));
        assert!(report.contains("Weighted mean: 9.192"));
        assert!(report.contains("Curvature: 3.5% (Ideal)"));
        assert!(report.contains("CTC-20260831-0001"));
        assert!(report.contains("Provenance: `"));
    }

    #[test]
    fn cap_note_only_when_applied() {
        let images: Vec<&[u8]> = vec![b"x"];
        let uncapped = render(&record(), &breakdown(), &images);
        assert!(!uncapped.contains("cap was applied"));

        let mut capped = breakdown();
        capped.cap_applied = true;
        capped.final_grade = 8.0;
        let report = render(&record(), &capped, &images);
        assert!(report.contains("cap was applied"));
    }

    #[test]
    fn provenance_changes_with_image_bytes() {
        let a = provenance_digest(&[b"front-v1"], "body");
        let b = provenance_digest(&[b"front-v2"], "body");
        assert_ne!(a, b);
        assert_eq!(a.chars().count(), 17); // 8 hex + ellipsis + 8 hex
    }

    #[tokio::test]
    async fn writes_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ReportRenderer::new(dir.path().join("reports"));

        let images: Vec<&[u8]> = vec![b"front-bytes", b"side-bytes"];
        let path = renderer.write(&record(), &breakdown(), &images).await.unwrap();

        assert!(path.ends_with("CTC-20260831-0001.md"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, render(&record(), &breakdown(), &images));
    }
}
