//! Database access for gpc-ml
//!
//! One SQLite file per root folder holds settings, image units and their
//! per-region results.

pub mod calibration;
pub mod image_units;
pub mod parameters;
pub mod results;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite waits this long on a locked database before reporting it
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the database and ensure tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_units (
            id TEXT PRIMARY KEY,
            source_key TEXT NOT NULL,
            image_reference TEXT,
            attempt INTEGER NOT NULL DEFAULT 1,
            reprocess_of TEXT REFERENCES image_units(id),
            status TEXT NOT NULL,
            detected_count INTEGER NOT NULL DEFAULT 0,
            estimated_count INTEGER NOT NULL DEFAULT 0,
            average_confidence REAL NOT NULL DEFAULT 0.0,
            warnings TEXT NOT NULL DEFAULT '[]',
            failure_reason TEXT,
            visualization_key TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS container_regions (
            id TEXT PRIMARY KEY,
            image_unit_id TEXT NOT NULL REFERENCES image_units(id) ON DELETE CASCADE,
            region_index INTEGER NOT NULL,
            container_class TEXT NOT NULL,
            confidence REAL NOT NULL,
            bbox_x REAL NOT NULL,
            bbox_y REAL NOT NULL,
            bbox_w REAL NOT NULL,
            bbox_h REAL NOT NULL,
            polygon TEXT NOT NULL DEFAULT '[]',
            strategy TEXT NOT NULL,
            outcome_status TEXT NOT NULL,
            detected_count INTEGER NOT NULL DEFAULT 0,
            estimated_count INTEGER NOT NULL DEFAULT 0,
            estimation_attempted INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 1,
            error TEXT,
            UNIQUE (image_unit_id, region_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detections (
            id TEXT PRIMARY KEY,
            image_unit_id TEXT NOT NULL REFERENCES image_units(id) ON DELETE CASCADE,
            region_id TEXT NOT NULL REFERENCES container_regions(id) ON DELETE CASCADE,
            center_x REAL NOT NULL,
            center_y REAL NOT NULL,
            width REAL NOT NULL,
            height REAL NOT NULL,
            confidence REAL NOT NULL,
            strategy TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS band_estimations (
            id TEXT PRIMARY KEY,
            image_unit_id TEXT NOT NULL REFERENCES image_units(id) ON DELETE CASCADE,
            region_id TEXT NOT NULL REFERENCES container_regions(id) ON DELETE CASCADE,
            band_index INTEGER NOT NULL,
            band_top INTEGER NOT NULL,
            band_bottom INTEGER NOT NULL,
            residual_area_px INTEGER NOT NULL,
            area_per_plant_px REAL NOT NULL,
            calibration TEXT NOT NULL,
            estimated_count INTEGER NOT NULL,
            confidence REAL NOT NULL,
            UNIQUE (region_id, band_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_samples (
            id TEXT PRIMARY KEY,
            container_class TEXT NOT NULL,
            image_unit_id TEXT,
            verified_count INTEGER NOT NULL,
            plant_area_px REAL NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    add_column_if_missing(pool, "image_units", "image_reference", "TEXT").await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_image_units_status ON image_units(status)",
        "CREATE INDEX IF NOT EXISTS idx_image_units_reprocess_of ON image_units(reprocess_of)",
        "CREATE INDEX IF NOT EXISTS idx_regions_unit ON container_regions(image_unit_id)",
        "CREATE INDEX IF NOT EXISTS idx_detections_unit ON detections(image_unit_id)",
        "CREATE INDEX IF NOT EXISTS idx_bands_unit ON band_estimations(image_unit_id)",
        "CREATE INDEX IF NOT EXISTS idx_calibration_class ON calibration_samples(container_class)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    tracing::info!(
        "Database tables initialized (settings, image_units, container_regions, detections, \
         band_estimations, calibration_samples)"
    );

    Ok(())
}

/// Bring tables created by an older build up to the current column set
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    let sql = format!("SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?", table);
    let present: i64 = sqlx::query_scalar(&sql).bind(column).fetch_one(pool).await?;
    if present == 0 {
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
            .execute(pool)
            .await?;
        tracing::info!(table, column, "Added missing column");
    }
    Ok(())
}
