//! Deferred publishing
//!
//! Graded specimens become publicly visible only after a hold-down delay.
//! The due time lives in the publish_queue table, so a pending publish
//! survives a process restart; `publish_due` can run from any process that
//! shares the database.

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use mvg_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;

/// Default hold-down between grading and public visibility
pub const PUBLISH_DELAY: Duration = Duration::from_secs(90);

/// Publish scheduler over the publish_queue table
pub struct PublishScheduler {
    db: SqlitePool,
}

impl PublishScheduler {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Schedule a specimen for publication after `delay`.
    ///
    /// Re-enqueueing the same specimen replaces its due time.
    pub async fn enqueue(&self, specimen_id: &str, delay: Duration) -> Result<()> {
        let now = Utc::now();
        let publish_at = (now + ChronoDuration::from_std(delay).unwrap_or_default())
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        sqlx::query(
            "INSERT INTO publish_queue (specimen_id, publish_at, enqueued_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT(specimen_id) DO UPDATE SET \
               publish_at = excluded.publish_at, \
               enqueued_at = excluded.enqueued_at",
        )
        .bind(specimen_id)
        .bind(&publish_at)
        .bind(now.to_rfc3339_opts(SecondsFormat::Secs, true))
        .execute(&self.db)
        .await?;

        tracing::info!(specimen_id = %specimen_id, publish_at = %publish_at, "Scheduled publish");

        Ok(())
    }

    /// Publish every queue entry whose due time has passed.
    ///
    /// Flips the specimen's published flag and removes the queue entry in
    /// one transaction per specimen. Returns the published ids.
    pub async fn publish_due(&self) -> Result<Vec<String>> {
        let due: Vec<(String,)> = sqlx::query_as(
            "SELECT specimen_id FROM publish_queue \
             WHERE datetime(publish_at) <= datetime('now') \
             ORDER BY publish_at ASC",
        )
        .fetch_all(&self.db)
        .await?;

        let mut published = Vec::with_capacity(due.len());
        for (specimen_id,) in due {
            let mut tx = self.db.begin().await?;

            sqlx::query("UPDATE specimens SET published = 1 WHERE specimen_id = ?")
                .bind(&specimen_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM publish_queue WHERE specimen_id = ?")
                .bind(&specimen_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!(specimen_id = %specimen_id, "Published specimen");
            published.push(specimen_id);
        }

        Ok(published)
    }

    /// Count of entries still waiting on their due time
    pub async fn pending(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM publish_queue")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvg_common::db::create_all_tables;

    async fn setup() -> PublishScheduler {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        PublishScheduler::new(pool)
    }

    async fn insert_specimen(db: &SqlitePool, id: &str) {
        sqlx::query(
            "INSERT INTO specimens \
             (specimen_id, framework_version, front_path, side_path, grade, grade_label, \
              curvature, subgrades, user_tag, device_id, image_hash, published) \
             VALUES (?, 'v1', 'f.png', 's.png', 9.0, 'Mint', 3.0, '{}', 'ABC', 'dev-1', 'h', 0)",
        )
        .bind(id)
        .execute(db)
        .await
        .unwrap();
    }

    async fn published_flag(db: &SqlitePool, id: &str) -> i64 {
        sqlx::query_scalar("SELECT published FROM specimens WHERE specimen_id = ?")
            .bind(id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn future_entries_are_not_published() {
        let scheduler = setup().await;
        insert_specimen(&scheduler.db, "CTC-001").await;
        scheduler
            .enqueue("CTC-001", Duration::from_secs(90))
            .await
            .unwrap();

        assert!(scheduler.publish_due().await.unwrap().is_empty());
        assert_eq!(published_flag(&scheduler.db, "CTC-001").await, 0);
        assert_eq!(scheduler.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn due_entries_publish_and_leave_the_queue() {
        let scheduler = setup().await;
        insert_specimen(&scheduler.db, "CTC-001").await;
        scheduler
            .enqueue("CTC-001", Duration::from_secs(0))
            .await
            .unwrap();

        let published = scheduler.publish_due().await.unwrap();
        assert_eq!(published, vec!["CTC-001".to_string()]);
        assert_eq!(published_flag(&scheduler.db, "CTC-001").await, 1);
        assert_eq!(scheduler.pending().await.unwrap(), 0);

        // A second sweep finds nothing
        assert!(scheduler.publish_due().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_publishes_only_due_entries() {
        let scheduler = setup().await;
        insert_specimen(&scheduler.db, "CTC-001").await;
        insert_specimen(&scheduler.db, "CTC-002").await;
        scheduler.enqueue("CTC-001", Duration::from_secs(0)).await.unwrap();
        scheduler
            .enqueue("CTC-002", Duration::from_secs(3600))
            .await
            .unwrap();

        let published = scheduler.publish_due().await.unwrap();
        assert_eq!(published, vec!["CTC-001".to_string()]);
        assert_eq!(published_flag(&scheduler.db, "CTC-002").await, 0);
        assert_eq!(scheduler.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reenqueue_replaces_due_time() {
        let scheduler = setup().await;
        insert_specimen(&scheduler.db, "CTC-001").await;
        scheduler.enqueue("CTC-001", Duration::from_secs(0)).await.unwrap();
        scheduler
            .enqueue("CTC-001", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(scheduler.publish_due().await.unwrap().is_empty());
        assert_eq!(scheduler.pending().await.unwrap(), 1);
    }
}
