//! Per-region results persistence
//!
//! Regions, detections, band estimations and the unit's final status are
//! written in one transaction: either the whole aggregation is visible or
//! none of it is.

use gpc_common::uuid_utils::parse_column;
use gpc_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    BandEstimation, ContainerClass, ContainerRegion, Detection, DetectionStrategy, ImageStatus,
    ImageUnit, NormalizedBox, OutcomeStatus, ProcessingOutcome,
};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::vision::router;

/// Stored view of one region and its outcome
#[derive(Debug, Clone, Serialize)]
pub struct RegionRecord {
    pub id: Uuid,
    pub region_index: u32,
    pub container_class: ContainerClass,
    pub confidence: f32,
    pub bbox: NormalizedBox,
    pub strategy: DetectionStrategy,
    pub outcome_status: OutcomeStatus,
    pub detected_count: u64,
    pub estimated_count: u64,
    pub estimation_attempted: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Persist every region outcome and move the unit out of `processing`.
///
/// `unit` must already carry its terminal status and aggregated counts. The
/// transaction is rolled back if the unit is no longer `processing`.
pub async fn persist_results(
    pool: &SqlitePool,
    unit: &ImageUnit,
    regions: &[ContainerRegion],
    outcomes: &[ProcessingOutcome],
) -> Result<()> {
    if !unit.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "Image unit {} must be terminal before persisting results (is {})",
            unit.id, unit.status
        )));
    }

    let unit_id = unit.id.to_string();
    let warnings = serde_json::to_string(&unit.warnings)
        .map_err(|e| Error::Internal(format!("Failed to serialize warnings: {}", e)))?;
    let completed_at = unit.completed_at.map(|t| t.to_rfc3339());

    retry_on_lock("persist_results", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;

        for region in regions {
            let outcome = outcomes.iter().find(|o| o.region_id == region.id);
            let polygon = serde_json::to_string(&region.polygon)
                .map_err(|e| Error::Internal(format!("Failed to serialize polygon: {}", e)))?;
            let region_id = region.id.to_string();

            let (status, detected, estimated, attempted, attempts, error) = match outcome {
                Some(o) => (
                    o.status,
                    o.detected_count(),
                    o.estimated_count(),
                    o.estimation_attempted,
                    o.attempts,
                    o.error.clone(),
                ),
                None => (
                    OutcomeStatus::Failed,
                    0,
                    0,
                    false,
                    0,
                    Some("no outcome recorded".to_string()),
                ),
            };

            sqlx::query(
                r#"
                INSERT INTO container_regions (
                    id, image_unit_id, region_index, container_class, confidence,
                    bbox_x, bbox_y, bbox_w, bbox_h, polygon, strategy,
                    outcome_status, detected_count, estimated_count,
                    estimation_attempted, attempts, error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&region_id)
            .bind(&unit_id)
            .bind(i64::from(region.region_index))
            .bind(region.container_class.as_str())
            .bind(f64::from(region.confidence))
            .bind(f64::from(region.bbox.x))
            .bind(f64::from(region.bbox.y))
            .bind(f64::from(region.bbox.width))
            .bind(f64::from(region.bbox.height))
            .bind(&polygon)
            .bind(router::route(region.container_class).as_str())
            .bind(status.as_str())
            .bind(detected as i64)
            .bind(estimated as i64)
            .bind(attempted)
            .bind(i64::from(attempts))
            .bind(&error)
            .execute(&mut *tx)
            .await?;

            let Some(outcome) = outcome.filter(|o| o.is_success()) else {
                continue;
            };

            for d in &outcome.detections {
                sqlx::query(
                    r#"
                    INSERT INTO detections (
                        id, image_unit_id, region_id, center_x, center_y,
                        width, height, confidence, strategy
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(d.id.to_string())
                .bind(&unit_id)
                .bind(&region_id)
                .bind(f64::from(d.center_x))
                .bind(f64::from(d.center_y))
                .bind(f64::from(d.width))
                .bind(f64::from(d.height))
                .bind(f64::from(d.confidence))
                .bind(d.strategy.as_str())
                .execute(&mut *tx)
                .await?;
            }

            for band in &outcome.estimations {
                sqlx::query(
                    r#"
                    INSERT INTO band_estimations (
                        id, image_unit_id, region_id, band_index, band_top, band_bottom,
                        residual_area_px, area_per_plant_px, calibration,
                        estimated_count, confidence
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&unit_id)
                .bind(&region_id)
                .bind(i64::from(band.band_index))
                .bind(i64::from(band.band_top))
                .bind(i64::from(band.band_bottom))
                .bind(band.residual_area_px as i64)
                .bind(band.area_per_plant_px)
                .bind(band.calibration.as_str())
                .bind(i64::from(band.estimated_count))
                .bind(f64::from(band.confidence))
                .execute(&mut *tx)
                .await?;
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE image_units SET
                status = ?, detected_count = ?, estimated_count = ?,
                average_confidence = ?, warnings = ?, failure_reason = ?, completed_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(unit.status.as_str())
        .bind(unit.detected_count as i64)
        .bind(unit.estimated_count as i64)
        .bind(f64::from(unit.average_confidence))
        .bind(&warnings)
        .bind(&unit.failure_reason)
        .bind(&completed_at)
        .bind(&unit_id)
        .bind(ImageStatus::Processing.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Dropping `tx` rolls back the region rows
            return Err(Error::Internal(format!(
                "Image unit {} is no longer processing; results discarded",
                unit_id
            )));
        }

        tx.commit().await?;
        Ok(())
    })
    .await?;

    tracing::debug!(
        image_unit_id = %unit.id,
        regions = regions.len(),
        "Results persisted"
    );
    Ok(())
}

/// Region records for a unit, by region index
pub async fn load_region_records(
    pool: &SqlitePool,
    image_unit_id: Uuid,
) -> Result<Vec<RegionRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM container_regions WHERE image_unit_id = ? ORDER BY region_index ASC",
    )
    .bind(image_unit_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(region_from_row).collect()
}

/// Stored detections for a unit (global pixel coordinates)
pub async fn load_detections(pool: &SqlitePool, image_unit_id: Uuid) -> Result<Vec<Detection>> {
    let rows = sqlx::query("SELECT * FROM detections WHERE image_unit_id = ?")
        .bind(image_unit_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| -> Result<Detection> {
            let id: String = row.try_get("id")?;
            let region_id: String = row.try_get("region_id")?;
            let strategy: String = row.try_get("strategy")?;
            let center_x: f64 = row.try_get("center_x")?;
            let center_y: f64 = row.try_get("center_y")?;
            let width: f64 = row.try_get("width")?;
            let height: f64 = row.try_get("height")?;
            let confidence: f64 = row.try_get("confidence")?;
            Ok(Detection {
                id: parse_column(&id)?,
                region_id: parse_column(&region_id)?,
                center_x: center_x as f32,
                center_y: center_y as f32,
                width: width as f32,
                height: height as f32,
                confidence: confidence as f32,
                strategy: strategy.parse()?,
            })
        })
        .collect()
}

/// Stored band estimations for a unit, by region then band
pub async fn load_band_estimations(
    pool: &SqlitePool,
    image_unit_id: Uuid,
) -> Result<Vec<BandEstimation>> {
    let rows = sqlx::query(
        "SELECT * FROM band_estimations WHERE image_unit_id = ? ORDER BY region_id, band_index ASC",
    )
    .bind(image_unit_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<BandEstimation> {
            let region_id: String = row.try_get("region_id")?;
            let band_index: i64 = row.try_get("band_index")?;
            let band_top: i64 = row.try_get("band_top")?;
            let band_bottom: i64 = row.try_get("band_bottom")?;
            let residual_area_px: i64 = row.try_get("residual_area_px")?;
            let calibration: String = row.try_get("calibration")?;
            let estimated_count: i64 = row.try_get("estimated_count")?;
            let confidence: f64 = row.try_get("confidence")?;
            Ok(BandEstimation {
                region_id: parse_column(&region_id)?,
                band_index: band_index as u32,
                band_top: band_top as u32,
                band_bottom: band_bottom as u32,
                residual_area_px: residual_area_px.max(0) as u64,
                area_per_plant_px: row.try_get("area_per_plant_px")?,
                calibration: calibration.parse()?,
                estimated_count: estimated_count.max(0) as u32,
                confidence: confidence as f32,
            })
        })
        .collect()
}

fn region_from_row(row: &SqliteRow) -> Result<RegionRecord> {
    let id: String = row.try_get("id")?;
    let region_index: i64 = row.try_get("region_index")?;
    let container_class: String = row.try_get("container_class")?;
    let confidence: f64 = row.try_get("confidence")?;
    let bbox_x: f64 = row.try_get("bbox_x")?;
    let bbox_y: f64 = row.try_get("bbox_y")?;
    let bbox_w: f64 = row.try_get("bbox_w")?;
    let bbox_h: f64 = row.try_get("bbox_h")?;
    let strategy: String = row.try_get("strategy")?;
    let outcome_status: String = row.try_get("outcome_status")?;
    let detected_count: i64 = row.try_get("detected_count")?;
    let estimated_count: i64 = row.try_get("estimated_count")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(RegionRecord {
        id: parse_column(&id)?,
        region_index: region_index as u32,
        container_class: container_class.parse()?,
        confidence: confidence as f32,
        bbox: NormalizedBox {
            x: bbox_x as f32,
            y: bbox_y as f32,
            width: bbox_w as f32,
            height: bbox_h as f32,
        },
        strategy: strategy.parse()?,
        outcome_status: outcome_status.parse()?,
        detected_count: detected_count.max(0) as u64,
        estimated_count: estimated_count.max(0) as u64,
        estimation_attempted: row.try_get("estimation_attempted")?,
        attempts: attempts.max(0) as u32,
        error: row.try_get("error")?,
    })
}
