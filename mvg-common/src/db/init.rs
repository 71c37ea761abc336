//! Database initialization
//!
//! Opens (or creates) the single SQLite store shared by the grading pipeline
//! and creates all tables idempotently. Components receive the pool by
//! injection; nothing else in the workspace opens its own connection.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode allows the publish scheduler to read while a submission writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_all_tables(&pool).await?;

    Ok(pool)
}

/// Create every table used by the grading pipeline (idempotent)
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    create_specimens_table(pool).await?;
    create_image_hashes_table(pool).await?;
    create_leaderboard_table(pool).await?;
    create_identity_log_table(pool).await?;
    create_publish_queue_table(pool).await?;
    Ok(())
}

/// Create the specimens table
///
/// One row per graded submission. Rows are never hard-deleted; the
/// `published` flag gates public visibility only.
pub async fn create_specimens_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS specimens (
            specimen_id TEXT PRIMARY KEY,
            framework_version TEXT NOT NULL,
            front_path TEXT NOT NULL,
            side_path TEXT NOT NULL,
            back_path TEXT,
            grade REAL NOT NULL,
            grade_label TEXT NOT NULL,
            curvature REAL NOT NULL,
            subgrades TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            report_path TEXT,
            user_tag TEXT NOT NULL,
            device_id TEXT NOT NULL,
            image_hash TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            date_graded TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the image_hashes table (duplicate ledger backing store)
///
/// Append-only: rows are inserted once per view at submission time and never
/// updated. Lookup is an equality match on the digest.
pub async fn create_image_hashes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_hashes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            specimen_id TEXT NOT NULL,
            image_hash TEXT NOT NULL,
            view TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_image_hashes_hash ON image_hashes (image_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the leaderboard table (one row per device identity)
pub async fn create_leaderboard_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leaderboard (
            device_id TEXT PRIMARY KEY,
            user_tag TEXT NOT NULL,
            highest_grade REAL NOT NULL,
            best_specimen_id TEXT NOT NULL,
            best_curvature REAL NOT NULL,
            last_updated TEXT NOT NULL,
            total_submissions INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the identity_log table (advisory tracking, no limits enforced)
pub async fn create_identity_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            ip TEXT NOT NULL,
            last_submission TEXT NOT NULL,
            total_submissions INTEGER NOT NULL DEFAULT 1,
            UNIQUE(device_id, ip)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the publish_queue table
///
/// Durable deferred-publish entries: the due time is persisted so a process
/// restart never loses a pending publish.
pub async fn create_publish_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publish_queue (
            specimen_id TEXT PRIMARY KEY,
            publish_at TEXT NOT NULL,
            enqueued_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_all_tables_in_memory() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();

        // Idempotent: a second pass must not fail
        create_all_tables(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('specimens', 'image_hashes', 'leaderboard', 'identity_log', 'publish_queue')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn init_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("grades.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        sqlx::query("INSERT INTO publish_queue (specimen_id, publish_at) VALUES ('s1', '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();
    }
}
