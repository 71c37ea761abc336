//! Specimen persistence
//!
//! Insert and read access for the specimens table. Rows are written once at
//! grading time and never hard-deleted; the published flag only gates what
//! the listing queries return.

use mvg_common::db::{SpecimenRecord, Subgrades};
use mvg_common::{Error, Result};
use sqlx::SqlitePool;

type SpecimenRow = (
    String,         // specimen_id
    String,         // framework_version
    String,         // front_path
    String,         // side_path
    Option<String>, // back_path
    f64,            // grade
    String,         // grade_label
    f64,            // curvature
    String,         // subgrades JSON
    String,         // notes
    Option<String>, // report_path
    String,         // user_tag
    String,         // device_id
    String,         // image_hash
    bool,           // published
    String,         // date_graded
);

const SPECIMEN_COLUMNS: &str =
    "specimen_id, framework_version, front_path, side_path, back_path, grade, grade_label, \
     curvature, subgrades, notes, report_path, user_tag, device_id, image_hash, published, \
     date_graded";

/// Specimen store over the specimens table
pub struct SpecimenStore {
    db: SqlitePool,
}

impl SpecimenStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert one graded specimen. The id must be fresh; grading never
    /// rewrites an existing row.
    pub async fn insert(&self, record: &SpecimenRecord) -> Result<()> {
        let subgrades = serde_json::to_string(&record.subgrades)
            .map_err(|e| Error::Internal(format!("Subgrade serialization failed: {}", e)))?;

        sqlx::query(
            "INSERT INTO specimens \
             (specimen_id, framework_version, front_path, side_path, back_path, grade, \
              grade_label, curvature, subgrades, notes, report_path, user_tag, device_id, \
              image_hash, published, date_graded) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.specimen_id)
        .bind(&record.framework_version)
        .bind(&record.front_path)
        .bind(&record.side_path)
        .bind(&record.back_path)
        .bind(record.grade)
        .bind(&record.grade_label)
        .bind(record.curvature)
        .bind(subgrades)
        .bind(&record.notes)
        .bind(&record.report_path)
        .bind(&record.user_tag)
        .bind(&record.device_id)
        .bind(&record.image_hash)
        .bind(record.published)
        .bind(&record.date_graded)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Fetch one specimen by id
    pub async fn fetch(&self, specimen_id: &str) -> Result<Option<SpecimenRecord>> {
        let row: Option<SpecimenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM specimens WHERE specimen_id = ?",
            SPECIMEN_COLUMNS
        ))
        .bind(specimen_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(record_from_row).transpose()
    }

    /// List published specimens, most recently graded first
    pub async fn list_published(&self, limit: u32) -> Result<Vec<SpecimenRecord>> {
        let rows: Vec<SpecimenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM specimens WHERE published = 1 \
             ORDER BY datetime(date_graded) DESC LIMIT ?",
            SPECIMEN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: SpecimenRow) -> Result<SpecimenRecord> {
    let (
        specimen_id,
        framework_version,
        front_path,
        side_path,
        back_path,
        grade,
        grade_label,
        curvature,
        subgrades_json,
        notes,
        report_path,
        user_tag,
        device_id,
        image_hash,
        published,
        date_graded,
    ) = row;

    let subgrades: Subgrades = serde_json::from_str(&subgrades_json)
        .map_err(|e| Error::Internal(format!("Stored subgrades unreadable: {}", e)))?;

    Ok(SpecimenRecord {
        specimen_id,
        framework_version,
        front_path,
        side_path,
        back_path,
        grade,
        grade_label,
        curvature,
        subgrades,
        notes,
        report_path,
        user_tag,
        device_id,
        image_hash,
        published,
        date_graded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvg_common::db::create_all_tables;

    fn record(id: &str, graded_at: &str) -> SpecimenRecord {
        SpecimenRecord {
            specimen_id: id.to_string(),
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
            notes: "clean".to_string(),
            report_path: Some(format!("reports/{}.md", id)),
            user_tag: "QZ7".to_string(),
            device_id: "dev-1".to_string(),
            image_hash: "aa:bb".to_string(),
            published: false,
            date_graded: graded_at.to_string(),
        }
    }

    async fn setup() -> SpecimenStore {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        SpecimenStore::new(pool)
    }

    #[tokio::test]
    async fn inserts_and_fetches_round_trip() {
        let store = setup().await;
        let original = record("CTC-001", "2026-08-31T12:00:00Z");
        store.insert(&original).await.unwrap();

        let fetched = store.fetch("CTC-001").await.unwrap().unwrap();
        assert_eq!(fetched.grade, 9.1);
        assert_eq!(fetched.grade_label, "Mint");
        assert_eq!(fetched.subgrades, original.subgrades);
        assert_eq!(fetched.report_path, original.report_path);
        assert!(!fetched.published);

        assert!(store.fetch("CTC-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_published_excludes_unpublished() {
        let store = setup().await;
        store.insert(&record("CTC-001", "2026-08-31T10:00:00Z")).await.unwrap();
        store.insert(&record("CTC-002", "2026-08-31T11:00:00Z")).await.unwrap();
        store.insert(&record("CTC-003", "2026-08-31T12:00:00Z")).await.unwrap();
        sqlx::query("UPDATE specimens SET published = 1 WHERE specimen_id IN ('CTC-001', 'CTC-003')")
            .execute(&store.db)
            .await
            .unwrap();

        let published = store.list_published(10).await.unwrap();
        assert_eq!(published.len(), 2);
        // Most recently graded first
        assert_eq!(published[0].specimen_id, "CTC-003");
        assert_eq!(published[1].specimen_id, "CTC-001");
    }
}
