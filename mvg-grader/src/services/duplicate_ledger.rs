//! Duplicate Ledger
//!
//! Append-only store mapping image fingerprint digests to the specimen that
//! first submitted them. Entries are written once per view at submission
//! time and never updated; lookup is an exact digest match.

use chrono::Utc;
use mvg_common::Result;
use sqlx::SqlitePool;

/// A prior submission matching a looked-up digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorSubmission {
    pub specimen_id: String,
    pub timestamp: String,
}

/// Duplicate ledger over the image_hashes table
pub struct DuplicateLedger {
    db: SqlitePool,
}

impl DuplicateLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append one fingerprint entry. Never overwrites.
    pub async fn record(&self, specimen_id: &str, digest: &str, view: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO image_hashes (specimen_id, image_hash, view, timestamp) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(specimen_id)
        .bind(digest)
        .bind(view)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        tracing::debug!(specimen_id = %specimen_id, view = %view, "Recorded image fingerprint");

        Ok(())
    }

    /// Look up the most recent prior submission for a digest.
    ///
    /// Ties on timestamp resolve to the most recently inserted row.
    pub async fn lookup(&self, digest: &str) -> Result<Option<PriorSubmission>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT specimen_id, timestamp FROM image_hashes \
             WHERE image_hash = ? \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(digest)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(specimen_id, timestamp)| PriorSubmission {
            specimen_id,
            timestamp,
        }))
    }
}
