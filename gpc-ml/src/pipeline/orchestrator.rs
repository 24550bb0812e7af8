//! Parent work unit: segmentation, fan-out, fan-in, persistence
//!
//! ```text
//! submit ─► pending → processing ─► fetch + decode ─► segment
//!                                                        │
//!              ┌────────── one child per region ─────────┤
//!              ▼                 ▼                       ▼
//!         run_region        run_region      ...     run_region
//!              └──────────── join (all) ─────────────────┘
//!                                                        │
//!                                    aggregate ─► persist (one transaction)
//!                                                        │
//!                                             visualization (best effort)
//! ```
//!
//! Fatal errors (source fetch/decode, segmentation, persistence) mark the
//! unit `failed` and are returned to the caller. Child errors never are.

use futures::future::join_all;
use image::RgbImage;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::region_worker::{run_region, RegionContext};
use super::{aggregate, PipelineError, PipelineEvent};
use crate::blob::ResilientBlobStore;
use crate::db::{calibration, image_units, parameters, results};
use crate::models::{
    ClassAreaDefaults, ContainerRegion, ImageStatus, ImageUnit, PipelineParameters,
    ProcessingOutcome,
};
use crate::scoring::{ModelPool, ScoringBackend};
use crate::vision::{visualization, ContainerSegmenter};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct PipelineOrchestrator {
    db: SqlitePool,
    blob_store: Arc<ResilientBlobStore>,
    segmenter_pool: ModelPool<dyn ScoringBackend>,
    detector_pool: ModelPool<dyn ScoringBackend>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineOrchestrator {
    pub fn new(
        db: SqlitePool,
        blob_store: Arc<ResilientBlobStore>,
        segmenter_pool: ModelPool<dyn ScoringBackend>,
        detector_pool: ModelPool<dyn ScoringBackend>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            blob_store,
            segmenter_pool,
            detector_pool,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    pub fn blob_store(&self) -> &Arc<ResilientBlobStore> {
        &self.blob_store
    }

    /// Dispatch a pending unit in the background and return immediately
    pub fn submit(
        self: &Arc<Self>,
        image_unit_id: Uuid,
        image_reference: String,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.process(image_unit_id, &image_reference).await {
                tracing::error!(
                    image_unit_id = %image_unit_id,
                    error = %e,
                    "Image unit processing failed"
                );
            }
        })
    }

    /// Create the pending row for an uploaded photo, then dispatch it
    pub async fn create_and_submit(
        self: &Arc<Self>,
        source_key: &str,
    ) -> Result<ImageUnit, PipelineError> {
        let unit = ImageUnit::new(source_key);
        image_units::insert_unit(&self.db, &unit).await?;
        tracing::info!(image_unit_id = %unit.id, source_key, "Image unit created");

        self.submit(unit.id, unit.source_key.clone());
        Ok(unit)
    }

    /// New attempt for a finished unit, reading the photo from the reference
    /// the previous attempt was dispatched with. The previous unit is left as
    /// it is.
    pub async fn reprocess(
        self: &Arc<Self>,
        image_unit_id: Uuid,
    ) -> Result<ImageUnit, PipelineError> {
        let previous = image_units::load_unit(&self.db, image_unit_id)
            .await?
            .ok_or(PipelineError::NotFound(image_unit_id))?;
        if !previous.is_terminal() {
            return Err(PipelineError::NotTerminal {
                id: previous.id,
                status: previous.status,
            });
        }

        let latest_attempt = image_units::list_attempts(&self.db, &previous.source_key)
            .await?
            .iter()
            .map(|u| u.attempt)
            .max()
            .unwrap_or(previous.attempt);

        let mut unit = ImageUnit::reprocess_of(&previous);
        unit.attempt = latest_attempt + 1;
        image_units::insert_unit(&self.db, &unit).await?;

        tracing::info!(
            image_unit_id = %unit.id,
            reprocess_of = %previous.id,
            attempt = unit.attempt,
            "Reprocessing image"
        );

        self.submit(unit.id, unit.dispatch_reference().to_string());
        Ok(unit)
    }

    /// Mark units left `processing` by a previous run as failed
    pub async fn recover_interrupted(&self) -> Result<u64, PipelineError> {
        Ok(image_units::fail_interrupted_units(&self.db).await?)
    }

    /// Run one unit to a terminal status
    pub async fn process(
        &self,
        image_unit_id: Uuid,
        image_reference: &str,
    ) -> Result<ImageUnit, PipelineError> {
        let mut unit = image_units::load_unit(&self.db, image_unit_id)
            .await?
            .ok_or(PipelineError::NotFound(image_unit_id))?;
        if unit.status != ImageStatus::Pending {
            return Err(PipelineError::AlreadyDispatched {
                id: unit.id,
                status: unit.status,
            });
        }

        unit.image_reference = Some(image_reference.to_string());
        unit.transition_to(ImageStatus::Processing)?;
        if !image_units::update_status(&self.db, &unit, &[ImageStatus::Pending]).await? {
            // Another dispatcher got there first
            return Err(PipelineError::AlreadyDispatched {
                id: unit.id,
                status: ImageStatus::Processing,
            });
        }

        let started = Instant::now();
        tracing::info!(
            image_unit_id = %unit.id,
            attempt = unit.attempt,
            image_reference,
            "Image unit dispatched"
        );
        self.emit(PipelineEvent::UnitStarted {
            image_unit_id: unit.id,
            attempt: unit.attempt,
        });

        let (image, regions, outcomes) = match self.run_stages(&unit, image_reference).await {
            Ok(staged) => staged,
            Err(e) => {
                self.fail_unit(unit, &e).await;
                return Err(e);
            }
        };

        let aggregation = aggregate(&outcomes);
        let processing = unit.clone();
        aggregation.apply_to(&mut unit)?;

        if let Err(e) = results::persist_results(&self.db, &unit, &regions, &outcomes).await {
            let err = PipelineError::Persistence(e);
            self.fail_unit(processing, &err).await;
            return Err(err);
        }

        tracing::info!(
            image_unit_id = %unit.id,
            status = %unit.status,
            regions = regions.len(),
            failed_regions = unit.warnings.len(),
            detected_count = unit.detected_count,
            estimated_count = unit.estimated_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image unit aggregated"
        );
        self.emit(PipelineEvent::UnitFinished {
            image_unit_id: unit.id,
            status: unit.status,
            detected_count: unit.detected_count,
            estimated_count: unit.estimated_count,
            failure_reason: unit.failure_reason.clone(),
        });

        if unit.status != ImageStatus::Failed {
            if let Some(key) = self.upload_visualization(&unit, image, regions, outcomes).await {
                unit.visualization_key = Some(key);
            }
        }

        Ok(unit)
    }

    /// Fetch, decode, segment and fan out. Any error here is fatal for the unit.
    async fn run_stages(
        &self,
        unit: &ImageUnit,
        image_reference: &str,
    ) -> Result<(Arc<RgbImage>, Vec<ContainerRegion>, Vec<ProcessingOutcome>), PipelineError> {
        let params = parameters::load_pipeline_parameters(&self.db).await?;
        let configured = &params.estimation.default_area_per_plant;
        let class_defaults = calibration::load_class_defaults(&self.db, configured).await?;

        let bytes = self.blob_store.get(image_reference).await?;
        let decode = move || image::load_from_memory(&bytes).map(|img| img.to_rgb8());
        let image = tokio::task::spawn_blocking(decode)
            .await
            .map_err(|e| PipelineError::Decode(e.to_string()))?
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        let image = Arc::new(image);

        let regions = {
            let segmenter = ContainerSegmenter::new(&params.segmentation);
            let backend = self
                .segmenter_pool
                .acquire()
                .await
                .map_err(|e| PipelineError::Segmentation(e.into()))?;
            segmenter.segment(&*backend, &image, unit.id).await?
        };

        tracing::info!(
            image_unit_id = %unit.id,
            regions = regions.len(),
            width = image.width(),
            height = image.height(),
            "Segmentation complete"
        );
        self.emit(PipelineEvent::RegionsSegmented {
            image_unit_id: unit.id,
            region_count: regions.len(),
        });

        let outcomes = self
            .fan_out(unit.id, Arc::clone(&image), &regions, params, class_defaults)
            .await;
        Ok((image, regions, outcomes))
    }

    /// One child per region, all awaited before returning
    async fn fan_out(
        &self,
        image_unit_id: Uuid,
        image: Arc<RgbImage>,
        regions: &[ContainerRegion],
        params: PipelineParameters,
        class_defaults: ClassAreaDefaults,
    ) -> Vec<ProcessingOutcome> {
        if regions.is_empty() {
            return Vec::new();
        }

        let ctx = Arc::new(RegionContext {
            detector_pool: self.detector_pool.clone(),
            params,
            class_defaults,
        });

        let handles: Vec<JoinHandle<ProcessingOutcome>> = regions
            .iter()
            .map(|region| {
                tokio::spawn(run_region(Arc::clone(&ctx), Arc::clone(&image), region.clone()))
            })
            .collect();

        let joined = join_all(handles).await;

        let outcomes: Vec<ProcessingOutcome> = regions
            .iter()
            .zip(joined)
            .map(|(region, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => ProcessingOutcome::failed(
                    region.id,
                    region.region_index,
                    region.container_class,
                    format!("Region worker aborted: {}", e),
                    0,
                ),
            })
            .collect();

        for outcome in &outcomes {
            let event = if outcome.is_success() {
                PipelineEvent::RegionCompleted {
                    image_unit_id,
                    region_index: outcome.region_index,
                    container_class: outcome.container_class,
                    detected_count: outcome.detected_count(),
                    estimated_count: outcome.estimated_count(),
                }
            } else {
                PipelineEvent::RegionFailed {
                    image_unit_id,
                    region_index: outcome.region_index,
                    container_class: outcome.container_class,
                    error: outcome.error.clone().unwrap_or_default(),
                    attempts: outcome.attempts,
                }
            };
            self.emit(event);
        }

        outcomes
    }

    /// Record a fatal error on a non-terminal unit
    async fn fail_unit(&self, mut unit: ImageUnit, error: &PipelineError) {
        tracing::error!(image_unit_id = %unit.id, error = %error, "Image unit failed");

        unit.failure_reason = Some(error.to_string());
        if let Err(e) = unit.transition_to(ImageStatus::Failed) {
            tracing::error!(image_unit_id = %unit.id, error = %e, "Cannot mark unit failed");
            return;
        }

        let expected = [ImageStatus::Pending, ImageStatus::Processing];
        match image_units::update_status(&self.db, &unit, &expected).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::error!(
                    image_unit_id = %unit.id,
                    error = %e,
                    "Failed to record unit failure"
                );
                return;
            }
        }

        self.emit(PipelineEvent::UnitFinished {
            image_unit_id: unit.id,
            status: ImageStatus::Failed,
            detected_count: 0,
            estimated_count: 0,
            failure_reason: unit.failure_reason.clone(),
        });
    }

    /// Render and upload the overlay; failures are logged, never returned
    async fn upload_visualization(
        &self,
        unit: &ImageUnit,
        image: Arc<RgbImage>,
        regions: Vec<ContainerRegion>,
        outcomes: Vec<ProcessingOutcome>,
    ) -> Option<String> {
        let key = format!("visualizations/{}.png", unit.id);

        let rendered = tokio::task::spawn_blocking(move || {
            visualization::encode_png(&visualization::render_overlay(&image, &regions, &outcomes))
        })
        .await;
        let png = match rendered {
            Ok(Ok(png)) => png,
            Ok(Err(e)) => {
                tracing::warn!(
                    image_unit_id = %unit.id,
                    error = %e,
                    "Failed to encode visualization"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    image_unit_id = %unit.id,
                    error = %e,
                    "Visualization render aborted"
                );
                return None;
            }
        };

        if let Err(e) = self.blob_store.put(&key, &png, "image/png").await {
            tracing::warn!(
                image_unit_id = %unit.id,
                key = %key,
                error = %e,
                "Visualization upload failed"
            );
            return None;
        }
        if let Err(e) = image_units::set_visualization_key(&self.db, unit.id, &key).await {
            tracing::warn!(
                image_unit_id = %unit.id,
                error = %e,
                "Failed to record visualization key"
            );
            return None;
        }

        self.emit(PipelineEvent::VisualizationUploaded {
            image_unit_id: unit.id,
            key: key.clone(),
        });
        Some(key)
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
