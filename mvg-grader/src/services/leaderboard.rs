//! Leaderboard
//!
//! One row per device identity, tracking that device's best result. The
//! best (grade, specimen, curvature) triple is replaced atomically and only
//! on a strict improvement; ties keep the earlier holder. Submission counts
//! grow on every update regardless of whether the best changed.

use chrono::Utc;
use mvg_common::db::LeaderboardEntry;
use mvg_common::Result;
use sqlx::SqlitePool;

/// Aggregate counters across all devices
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardStats {
    pub total_devices: i64,
    pub total_submissions: i64,
    pub top_grade: Option<f64>,
    pub average_grade: Option<f64>,
}

/// Leaderboard store over the leaderboard table
pub struct Leaderboard {
    db: SqlitePool,
}

impl Leaderboard {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record one graded submission for a device.
    ///
    /// The highest grade, best specimen id and its curvature move together
    /// as a unit, and only when the new grade is strictly greater than the
    /// stored one. `total_submissions` always increments. The user tag
    /// follows the latest submission.
    pub async fn update(
        &self,
        device_id: &str,
        user_tag: &str,
        grade: f64,
        specimen_id: &str,
        curvature: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO leaderboard \
             (device_id, user_tag, highest_grade, best_specimen_id, best_curvature, \
              last_updated, total_submissions) \
             VALUES (?, ?, ?, ?, ?, ?, 1) \
             ON CONFLICT(device_id) DO UPDATE SET \
               user_tag = excluded.user_tag, \
               best_specimen_id = CASE WHEN excluded.highest_grade > highest_grade \
                 THEN excluded.best_specimen_id ELSE best_specimen_id END, \
               best_curvature = CASE WHEN excluded.highest_grade > highest_grade \
                 THEN excluded.best_curvature ELSE best_curvature END, \
               highest_grade = MAX(highest_grade, excluded.highest_grade), \
               last_updated = excluded.last_updated, \
               total_submissions = total_submissions + 1",
        )
        .bind(device_id)
        .bind(user_tag)
        .bind(grade)
        .bind(specimen_id)
        .bind(curvature)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        tracing::debug!(device_id = %device_id, grade = grade, "Updated leaderboard");

        Ok(())
    }

    /// Fetch one device's row
    pub async fn entry(&self, device_id: &str) -> Result<Option<LeaderboardEntry>> {
        let row: Option<(String, String, f64, String, f64, String, i64)> = sqlx::query_as(
            "SELECT device_id, user_tag, highest_grade, best_specimen_id, best_curvature, \
             last_updated, total_submissions \
             FROM leaderboard WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(entry_from_row))
    }

    /// Top entries by highest grade, earlier achievers first on ties
    pub async fn top(&self, limit: u32) -> Result<Vec<LeaderboardEntry>> {
        let rows: Vec<(String, String, f64, String, f64, String, i64)> = sqlx::query_as(
            "SELECT device_id, user_tag, highest_grade, best_specimen_id, best_curvature, \
             last_updated, total_submissions \
             FROM leaderboard \
             ORDER BY highest_grade DESC, last_updated ASC \
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(entry_from_row).collect())
    }

    /// Aggregate counters across the whole board
    pub async fn stats(&self) -> Result<LeaderboardStats> {
        let (total_devices, total_submissions, top_grade, average_grade): (
            i64,
            Option<i64>,
            Option<f64>,
            Option<f64>,
        ) = sqlx::query_as(
            "SELECT COUNT(*), SUM(total_submissions), MAX(highest_grade), AVG(highest_grade) \
             FROM leaderboard",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(LeaderboardStats {
            total_devices,
            total_submissions: total_submissions.unwrap_or(0),
            top_grade,
            average_grade,
        })
    }
}

fn entry_from_row(
    (device_id, user_tag, highest_grade, best_specimen_id, best_curvature, last_updated, total_submissions): (
        String,
        String,
        f64,
        String,
        f64,
        String,
        i64,
    ),
) -> LeaderboardEntry {
    LeaderboardEntry {
        device_id,
        user_tag,
        highest_grade,
        best_specimen_id,
        best_curvature,
        last_updated,
        total_submissions,
    }
}
