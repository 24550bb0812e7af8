//! Image unit persistence
//!
//! Status updates are guarded in SQL: the update only applies when the stored
//! status is one of the expected predecessors, so a terminal status can never
//! be overwritten by a late or duplicate writer.

use gpc_common::time::parse_rfc3339;
use gpc_common::uuid_utils::parse_column;
use gpc_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{ImageStatus, ImageUnit, RegionFailure};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Reason recorded on units found in `processing` at startup
pub const INTERRUPTED_REASON: &str = "interrupted";

/// Insert a new unit row
pub async fn insert_unit(pool: &SqlitePool, unit: &ImageUnit) -> Result<()> {
    let id = unit.id.to_string();
    let reprocess_of = unit.reprocess_of.map(|u| u.to_string());
    let warnings = serde_json::to_string(&unit.warnings)
        .map_err(|e| Error::Internal(format!("Failed to serialize warnings: {}", e)))?;
    let created_at = unit.created_at.to_rfc3339();

    retry_on_lock("insert_unit", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO image_units (
                id, source_key, image_reference, attempt, reprocess_of, status,
                detected_count, estimated_count, average_confidence,
                warnings, failure_reason, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&unit.source_key)
        .bind(&unit.image_reference)
        .bind(i64::from(unit.attempt))
        .bind(&reprocess_of)
        .bind(unit.status.as_str())
        .bind(unit.detected_count as i64)
        .bind(unit.estimated_count as i64)
        .bind(f64::from(unit.average_confidence))
        .bind(&warnings)
        .bind(&unit.failure_reason)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Load a unit by id
pub async fn load_unit(pool: &SqlitePool, id: Uuid) -> Result<Option<ImageUnit>> {
    let row = sqlx::query("SELECT * FROM image_units WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(unit_from_row).transpose()
}

/// All attempts for a photo, oldest first
pub async fn list_attempts(pool: &SqlitePool, source_key: &str) -> Result<Vec<ImageUnit>> {
    let rows = sqlx::query("SELECT * FROM image_units WHERE source_key = ? ORDER BY attempt ASC")
        .bind(source_key)
        .fetch_all(pool)
        .await?;

    rows.iter().map(unit_from_row).collect()
}

/// Write the unit's status and result fields if the stored status is one of
/// `expected`. Returns false when the guard rejected the update.
pub async fn update_status(
    pool: &SqlitePool,
    unit: &ImageUnit,
    expected: &[ImageStatus],
) -> Result<bool> {
    let id = unit.id.to_string();
    let warnings = serde_json::to_string(&unit.warnings)
        .map_err(|e| Error::Internal(format!("Failed to serialize warnings: {}", e)))?;
    let started_at = unit.started_at.map(|t| t.to_rfc3339());
    let completed_at = unit.completed_at.map(|t| t.to_rfc3339());
    let guard = status_guard(expected);

    let sql = format!(
        r#"
        UPDATE image_units SET
            status = ?, image_reference = ?,
            detected_count = ?, estimated_count = ?, average_confidence = ?,
            warnings = ?, failure_reason = ?, started_at = ?, completed_at = ?
        WHERE id = ? AND status IN ({})
        "#,
        guard
    );

    let rows_affected = retry_on_lock("update_status", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(&sql)
            .bind(unit.status.as_str())
            .bind(&unit.image_reference)
            .bind(unit.detected_count as i64)
            .bind(unit.estimated_count as i64)
            .bind(f64::from(unit.average_confidence))
            .bind(&warnings)
            .bind(&unit.failure_reason)
            .bind(&started_at)
            .bind(&completed_at)
            .bind(&id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if rows_affected == 0 {
        tracing::warn!(
            image_unit_id = %unit.id,
            status = %unit.status,
            "Status update rejected by guard"
        );
    }
    Ok(rows_affected > 0)
}

/// Record the uploaded overlay key
pub async fn set_visualization_key(pool: &SqlitePool, id: Uuid, key: &str) -> Result<()> {
    let id = id.to_string();
    retry_on_lock("set_visualization_key", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query("UPDATE image_units SET visualization_key = ? WHERE id = ?")
            .bind(key)
            .bind(&id)
            .execute(pool)
            .await?;
        Ok(())
    })
    .await
}

/// Mark units stuck in `processing` (crashed run) as failed
pub async fn fail_interrupted_units(pool: &SqlitePool) -> Result<u64> {
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE image_units
        SET status = 'failed', failure_reason = ?, completed_at = ?
        WHERE status = 'processing'
        "#,
    )
    .bind(INTERRUPTED_REASON)
    .bind(&now)
    .execute(pool)
    .await?;

    let count = result.rows_affected();
    if count > 0 {
        tracing::warn!(count, "Marked interrupted image units as failed");
    }
    Ok(count)
}

/// `'a', 'b'` list of quoted status literals (values come from the enum)
fn status_guard(expected: &[ImageStatus]) -> String {
    expected
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn unit_from_row(row: &SqliteRow) -> Result<ImageUnit> {
    let status: String = row.try_get("status")?;
    let warnings: String = row.try_get("warnings")?;
    let warnings: Vec<RegionFailure> = serde_json::from_str(&warnings)
        .map_err(|e| Error::Internal(format!("Failed to parse warnings: {}", e)))?;
    let reprocess_of: Option<String> = row.try_get("reprocess_of")?;
    let created_at: String = row.try_get("created_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let attempt: i64 = row.try_get("attempt")?;
    let detected_count: i64 = row.try_get("detected_count")?;
    let estimated_count: i64 = row.try_get("estimated_count")?;
    let average_confidence: f64 = row.try_get("average_confidence")?;
    let id: String = row.try_get("id")?;

    Ok(ImageUnit {
        id: parse_column(&id)?,
        source_key: row.try_get("source_key")?,
        image_reference: row.try_get("image_reference")?,
        attempt: attempt.max(1) as u32,
        reprocess_of: reprocess_of.as_deref().map(parse_column).transpose()?,
        status: status.parse()?,
        detected_count: detected_count.max(0) as u64,
        estimated_count: estimated_count.max(0) as u64,
        average_confidence: average_confidence as f32,
        warnings,
        failure_reason: row.try_get("failure_reason")?,
        visualization_key: row.try_get("visualization_key")?,
        created_at: parse_rfc3339(&created_at)?,
        started_at: started_at.as_deref().map(parse_rfc3339).transpose()?,
        completed_at: completed_at.as_deref().map(parse_rfc3339).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_tables;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_insert_and_load_roundtrip() {
        let pool = test_pool().await;
        let unit = ImageUnit::new("photos/a.jpg");
        insert_unit(&pool, &unit).await.unwrap();

        let loaded = load_unit(&pool, unit.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, unit.id);
        assert_eq!(loaded.status, ImageStatus::Pending);
        assert_eq!(loaded.attempt, 1);
        assert!(loaded.warnings.is_empty());

        assert!(load_unit(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guard_blocks_terminal_regression() {
        let pool = test_pool().await;
        let mut unit = ImageUnit::new("photos/a.jpg");
        insert_unit(&pool, &unit).await.unwrap();

        unit.transition_to(ImageStatus::Processing).unwrap();
        assert!(update_status(&pool, &unit, &[ImageStatus::Pending]).await.unwrap());

        unit.transition_to(ImageStatus::Completed).unwrap();
        assert!(update_status(&pool, &unit, &[ImageStatus::Processing]).await.unwrap());

        // A stale writer that still believes the unit is processing
        let mut stale = unit.clone();
        stale.status = ImageStatus::Failed;
        assert!(!update_status(&pool, &stale, &[ImageStatus::Processing]).await.unwrap());

        let loaded = load_unit(&pool, unit.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ImageStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_reference_stored_with_status() {
        let pool = test_pool().await;
        let mut unit = ImageUnit::new("uploads/a");
        insert_unit(&pool, &unit).await.unwrap();
        assert!(load_unit(&pool, unit.id).await.unwrap().unwrap().image_reference.is_none());

        unit.image_reference = Some("blobs/a.png".to_string());
        unit.transition_to(ImageStatus::Processing).unwrap();
        assert!(update_status(&pool, &unit, &[ImageStatus::Pending]).await.unwrap());

        let loaded = load_unit(&pool, unit.id).await.unwrap().unwrap();
        assert_eq!(loaded.image_reference.as_deref(), Some("blobs/a.png"));
        assert_eq!(loaded.dispatch_reference(), "blobs/a.png");
    }

    #[tokio::test]
    async fn test_interrupted_units_failed_at_startup() {
        let pool = test_pool().await;
        let mut stuck = ImageUnit::new("photos/a.jpg");
        insert_unit(&pool, &stuck).await.unwrap();
        stuck.transition_to(ImageStatus::Processing).unwrap();
        update_status(&pool, &stuck, &[ImageStatus::Pending]).await.unwrap();

        let waiting = ImageUnit::new("photos/b.jpg");
        insert_unit(&pool, &waiting).await.unwrap();

        assert_eq!(fail_interrupted_units(&pool).await.unwrap(), 1);

        let stuck = load_unit(&pool, stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, ImageStatus::Failed);
        assert_eq!(stuck.failure_reason.as_deref(), Some(INTERRUPTED_REASON));

        let waiting = load_unit(&pool, waiting.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, ImageStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_attempts_in_order() {
        let pool = test_pool().await;
        let first = ImageUnit::new("photos/a.jpg");
        insert_unit(&pool, &first).await.unwrap();
        let second = ImageUnit::reprocess_of(&first);
        insert_unit(&pool, &second).await.unwrap();

        let attempts = list_attempts(&pool, "photos/a.jpg").await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].reprocess_of, Some(first.id));
    }
}
