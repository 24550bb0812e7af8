//! Pipeline parameter persistence
//!
//! Each leaf of [`PipelineParameters`] is one `settings` row keyed
//! `pipeline.<group>.<name>` with a JSON-encoded value, e.g.
//! `pipeline.detection.tile_size = 640`. Unset keys take their defaults.

use gpc_common::{Error, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::models::PipelineParameters;

const KEY_PREFIX: &str = "pipeline.";

/// Load parameters, overlaying stored values on the defaults
pub async fn load_pipeline_parameters(pool: &SqlitePool) -> Result<PipelineParameters> {
    let rows = sqlx::query("SELECT key, value FROM settings WHERE key LIKE 'pipeline.%'")
        .fetch_all(pool)
        .await?;

    let mut tree = to_value(&PipelineParameters::default())?;
    let mut loaded_count = 0;

    for row in &rows {
        let key: String = row.try_get("key")?;
        let raw: String = row.try_get("value")?;
        let path = key.trim_start_matches(KEY_PREFIX);

        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Setting {} is not valid JSON: {}", key, e)))?;

        if set_path(&mut tree, path, value) {
            loaded_count += 1;
        } else {
            tracing::warn!(key = %key, "Ignoring unknown pipeline setting");
        }
    }

    let params: PipelineParameters = serde_json::from_value(tree)
        .map_err(|e| Error::Config(format!("Stored pipeline parameters invalid: {}", e)))?;
    params
        .validate()
        .map_err(|e| Error::Config(format!("Stored pipeline parameters invalid: {}", e)))?;

    tracing::debug!(loaded_count, "Loaded pipeline parameters from database");
    Ok(params)
}

/// Validate and store every parameter in one transaction
pub async fn save_pipeline_parameters(
    pool: &SqlitePool,
    params: &PipelineParameters,
) -> Result<()> {
    params.validate().map_err(Error::InvalidInput)?;

    let mut entries = Vec::new();
    flatten(&to_value(params)?, String::new(), &mut entries);

    let mut tx = pool.begin().await?;
    for (path, value) in &entries {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(format!("{}{}", KEY_PREFIX, path))
        .bind(value.to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(count = entries.len(), "Saved pipeline parameters");
    Ok(())
}

fn to_value(params: &PipelineParameters) -> Result<Value> {
    serde_json::to_value(params)
        .map_err(|e| Error::Internal(format!("Failed to serialize parameters: {}", e)))
}

/// Leaf values of a JSON object as `a.b.c` paths
fn flatten(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten(v, path, out);
            }
        }
        leaf => out.push((prefix, leaf.clone())),
    }
}

/// Replace the leaf at `path`; false if the path does not name an existing leaf
fn set_path(tree: &mut Value, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return false;
    };

    let mut node = tree;
    for segment in parents {
        match node.get_mut(*segment) {
            Some(child) if child.is_object() => node = child,
            _ => return false,
        }
    }

    match node.get_mut(*leaf) {
        Some(child) if !child.is_object() => {
            *child = value;
            true
        }
        _ => false,
    }
}
