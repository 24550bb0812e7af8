//! Calibration samples from verified manual counts
//!
//! A sample pairs a manually verified plant count with the vegetation area
//! it covered. The per-class area-per-plant fallback used by band estimation
//! becomes the mean of `plant_area_px / verified_count` once samples exist.

use gpc_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ClassAreaDefaults, ContainerClass};

/// Store one verified sample
pub async fn record_calibration_sample(
    pool: &SqlitePool,
    container_class: ContainerClass,
    verified_count: u32,
    plant_area_px: f64,
    image_unit_id: Option<Uuid>,
) -> Result<Uuid> {
    if verified_count == 0 {
        return Err(Error::InvalidInput("verified_count must be at least 1".to_string()));
    }
    if !plant_area_px.is_finite() || plant_area_px <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "plant_area_px must be positive, got {}",
            plant_area_px
        )));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO calibration_samples (
            id, container_class, image_unit_id, verified_count, plant_area_px, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(container_class.as_str())
    .bind(image_unit_id.map(|u| u.to_string()))
    .bind(i64::from(verified_count))
    .bind(plant_area_px)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    tracing::info!(
        container_class = %container_class,
        verified_count,
        plant_area_px,
        "Recorded calibration sample"
    );
    Ok(id)
}

/// Mean area per plant over stored samples; None when there are none
pub async fn class_area_per_plant(
    pool: &SqlitePool,
    container_class: ContainerClass,
) -> Result<Option<f64>> {
    let mean: Option<f64> = sqlx::query_scalar(
        r#"
        SELECT AVG(plant_area_px / verified_count)
        FROM calibration_samples
        WHERE container_class = ? AND verified_count > 0
        "#,
    )
    .bind(container_class.as_str())
    .fetch_one(pool)
    .await?;

    Ok(mean)
}

/// Configured defaults with each class replaced by its calibrated mean, if any
pub async fn load_class_defaults(
    pool: &SqlitePool,
    configured: &ClassAreaDefaults,
) -> Result<ClassAreaDefaults> {
    let mut defaults = configured.clone();
    for class in ContainerClass::ALL {
        if let Some(mean) = class_area_per_plant(pool, class).await? {
            tracing::debug!(
                container_class = %class,
                area_per_plant_px = mean,
                "Using calibrated area per plant"
            );
            defaults.set_for_class(class, mean);
        }
    }
    Ok(defaults)
}
