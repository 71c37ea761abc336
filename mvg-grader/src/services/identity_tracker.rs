//! Identity tracking
//!
//! Advisory device/IP activity tracking. Unlike the moderation gate this
//! component fails open: a tracking error degrades to a log line and a
//! generic warning, and never blocks a submission. Nothing here enforces
//! limits; thresholds only produce warnings attached to the result.

use chrono::{SecondsFormat, Utc};
use mvg_common::Result;
use sqlx::SqlitePool;

/// Submissions per device per hour above which a warning is attached
pub const HOURLY_DEVICE_LIMIT: i64 = 10;
/// Distinct devices per IP per day above which a warning is attached
pub const DAILY_IP_DEVICE_LIMIT: i64 = 5;

/// Identity tracker over the identity_log table
pub struct IdentityTracker {
    db: SqlitePool,
}

impl IdentityTracker {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record one submission for a (device, ip) pair
    pub async fn record(&self, device_id: &str, ip: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO identity_log (device_id, ip, last_submission, total_submissions) \
             VALUES (?, ?, ?, 1) \
             ON CONFLICT(device_id, ip) DO UPDATE SET \
               last_submission = excluded.last_submission, \
               total_submissions = total_submissions + 1",
        )
        .bind(device_id)
        .bind(ip)
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Advisory activity warnings for a (device, ip) pair.
    ///
    /// Checks graded submissions per device over the last hour and distinct
    /// devices per IP over the last day. Infallible by contract: a query
    /// failure is logged and reported as a generic warning instead of
    /// propagating.
    pub async fn abuse_warnings(&self, device_id: &str, ip: &str) -> Vec<String> {
        let mut warnings = Vec::new();

        match self.device_submissions_last_hour(device_id).await {
            Ok(count) if count > HOURLY_DEVICE_LIMIT => {
                warnings.push(format!(
                    "High submission rate: {} submissions from this device in the last hour.",
                    count
                ));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(device_id = %device_id, error = %e, "Device rate check failed");
                warnings.push("Submission rate could not be verified.".to_string());
            }
        }

        match self.devices_for_ip_last_day(ip).await {
            Ok(count) if count > DAILY_IP_DEVICE_LIMIT => {
                warnings.push(format!(
                    "Unusual activity: {} distinct devices submitted from this address today.",
                    count
                ));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "IP fan-out check failed");
                warnings.push("Address activity could not be verified.".to_string());
            }
        }

        warnings
    }

    async fn device_submissions_last_hour(&self, device_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM specimens \
             WHERE device_id = ? AND datetime(date_graded) >= datetime('now', '-1 hour')",
        )
        .bind(device_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn devices_for_ip_last_day(&self, ip: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT device_id) FROM identity_log \
             WHERE ip = ? AND datetime(last_submission) >= datetime('now', '-24 hours')",
        )
        .bind(ip)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// Drop identity rows older than 90 days. Returns deleted row count.
    pub async fn prune_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM identity_log \
             WHERE datetime(last_submission) < datetime('now', '-90 days')",
        )
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(rows = result.rows_affected(), "Pruned stale identity rows");
        }

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvg_common::db::create_all_tables;

    async fn setup() -> IdentityTracker {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        IdentityTracker::new(pool)
    }

    async fn insert_specimen(db: &SqlitePool, id: &str, device_id: &str, graded_at: &str) {
        sqlx::query(
            "INSERT INTO specimens \
             (specimen_id, framework_version, front_path, side_path, grade, grade_label, \
              curvature, subgrades, user_tag, device_id, image_hash, date_graded) \
             VALUES (?, 'v1', 'f.png', 's.png', 9.0, 'Mint', 3.0, '{}', 'ABC', ?, 'hash', ?)",
        )
        .bind(id)
        .bind(device_id)
        .bind(graded_at)
        .execute(db)
        .await
        .unwrap();
    }

    fn minutes_ago(minutes: i64) -> String {
        (Utc::now() - chrono::Duration::minutes(minutes))
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    #[tokio::test]
    async fn record_upserts_per_pair() {
        let tracker = setup().await;
        tracker.record("dev-1", "10.0.0.1").await.unwrap();
        tracker.record("dev-1", "10.0.0.1").await.unwrap();
        tracker.record("dev-1", "10.0.0.2").await.unwrap();

        let (rows, total): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), SUM(total_submissions) FROM identity_log WHERE device_id = 'dev-1'",
        )
        .fetch_one(&tracker.db)
        .await
        .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn quiet_device_draws_no_warnings() {
        let tracker = setup().await;
        tracker.record("dev-1", "10.0.0.1").await.unwrap();
        insert_specimen(&tracker.db, "CTC-001", "dev-1", &minutes_ago(5)).await;

        assert!(tracker.abuse_warnings("dev-1", "10.0.0.1").await.is_empty());
    }

    #[tokio::test]
    async fn rapid_device_submissions_draw_warning() {
        let tracker = setup().await;
        for i in 0..11 {
            insert_specimen(&tracker.db, &format!("CTC-{:03}", i), "dev-1", &minutes_ago(i)).await;
        }

        let warnings = tracker.abuse_warnings("dev-1", "10.0.0.1").await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("11 submissions"));
    }

    #[tokio::test]
    async fn old_submissions_fall_out_of_the_hour_window() {
        let tracker = setup().await;
        for i in 0..11 {
            insert_specimen(
                &tracker.db,
                &format!("CTC-{:03}", i),
                "dev-1",
                &minutes_ago(90 + i),
            )
            .await;
        }

        assert!(tracker.abuse_warnings("dev-1", "10.0.0.1").await.is_empty());
    }

    #[tokio::test]
    async fn many_devices_per_ip_draw_warning() {
        let tracker = setup().await;
        for i in 0..6 {
            tracker
                .record(&format!("dev-{}", i), "10.0.0.9")
                .await
                .unwrap();
        }

        let warnings = tracker.abuse_warnings("dev-0", "10.0.0.9").await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("6 distinct devices"));
    }

    #[tokio::test]
    async fn prune_drops_only_stale_rows() {
        let tracker = setup().await;
        tracker.record("dev-new", "10.0.0.1").await.unwrap();
        sqlx::query(
            "INSERT INTO identity_log (device_id, ip, last_submission) \
             VALUES ('dev-old', '10.0.0.2', ?)",
        )
        .bind(minutes_ago(60 * 24 * 120))
        .execute(&tracker.db)
        .await
        .unwrap();

        assert_eq!(tracker.prune_stale().await.unwrap(), 1);
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identity_log")
            .fetch_one(&tracker.db)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
