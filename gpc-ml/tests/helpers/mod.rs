//! Test helper utilities
//!
//! In-memory fakes for the scoring backends and blob transport, a temporary
//! database, and synthetic photos.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use image::{Rgb, RgbImage};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use gpc_ml::blob::{
    BlobTransport, CircuitBreaker, CircuitBreakerConfig, Receipt, ResilientBlobStore, RetryPolicy,
    TransportError,
};
use gpc_ml::db::{image_units, parameters};
use gpc_ml::models::{ImageUnit, PipelineParameters};
use gpc_ml::pipeline::{PipelineEvent, PipelineOrchestrator};
use gpc_ml::scoring::{ModelPool, RawDetection, ScoringBackend, ScoringError};

pub const GREEN: Rgb<u8> = Rgb([40, 160, 50]);
pub const DARK_GREEN: Rgb<u8> = Rgb([30, 110, 40]);
pub const MARKER: Rgb<u8> = Rgb([255, 0, 0]);

pub const SMALL_TRAY: u32 = 0;
pub const LARGE_BED: u32 = 2;

type ScoreFn = dyn Fn(&RgbImage) -> Result<Vec<RawDetection>, ScoringError> + Send + Sync;

/// Scoring backend driven by a closure over the scored image
pub struct FnBackend {
    name: String,
    score_fn: Arc<ScoreFn>,
    delay: Option<Duration>,
    pub calls: AtomicU32,
}

impl FnBackend {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&RgbImage) -> Result<Vec<RawDetection>, ScoringError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            score_fn: Arc::new(f),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Sleep before every scoring call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ScoringBackend for FnBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(
        &self,
        image: &RgbImage,
        _conf: f32,
        _iou: f32,
    ) -> Result<Vec<RawDetection>, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.score_fn)(image)
    }
}

/// Pool of `slots` handles to the same backend
pub fn pool_of(backend: Arc<FnBackend>, slots: usize) -> ModelPool<dyn ScoringBackend> {
    let instances: Vec<Arc<dyn ScoringBackend>> = (0..slots)
        .map(|_| Arc::clone(&backend) as Arc<dyn ScoringBackend>)
        .collect();
    ModelPool::from_instances(instances)
}

pub fn raw(class_id: u32, bbox: [f32; 4], confidence: f32) -> RawDetection {
    RawDetection {
        class_id,
        confidence,
        bbox,
        polygon: None,
    }
}

/// In-memory blob store with failure injection
#[derive(Default)]
pub struct MemoryBlobTransport {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_gets: AtomicBool,
    pub fail_puts: AtomicBool,
    pub gets: AtomicU32,
    pub puts: AtomicU32,
}

impl MemoryBlobTransport {
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl BlobTransport for MemoryBlobTransport {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<Receipt, TransportError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(TransportError::Transient("injected put failure".to_string()));
        }
        self.insert(key, bytes.to_vec());
        Ok(Receipt {
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
            etag: None,
            stored_at: Utc::now(),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, TransportError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(TransportError::Transient("injected get failure".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(key.to_string()))
    }
}

/// Temporary on-disk database with tables created
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = gpc_ml::db::init_database_pool(&temp_dir.path().join("gpc.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Parameters that keep tests fast: one child attempt, millisecond backoff
pub fn fast_parameters() -> PipelineParameters {
    let mut params = PipelineParameters::default();
    params.workers.child_max_attempts = 1;
    params.workers.child_retry_delay_ms = 1;
    params.workers.child_timeout_secs = 10;
    params.retry.max_attempts = 2;
    params.retry.base_delay_ms = 1;
    params.retry.max_delay_ms = 5;
    params
}

/// Solid photo of the given size
pub fn photo(width: u32, height: u32, color: Rgb<u8>) -> RgbImage {
    RgbImage::from_pixel(width, height, color)
}

/// PNG bytes of `image`
pub fn png(image: &RgbImage) -> Vec<u8> {
    gpc_ml::vision::visualization::encode_png(image).unwrap()
}

/// First pixel of `color` in `image`, scanning rows top to bottom
pub fn find_pixel(image: &RgbImage, color: Rgb<u8>) -> Option<(u32, u32)> {
    image
        .enumerate_pixels()
        .find(|(_, _, p)| **p == color)
        .map(|(x, y, _)| (x, y))
}

/// Everything a pipeline test needs, wired together
pub struct TestRig {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub pool: SqlitePool,
    pub transport: Arc<MemoryBlobTransport>,
    pub breaker: Arc<CircuitBreaker>,
    pub segmenter: Arc<FnBackend>,
    pub detector: Arc<FnBackend>,
    _dir: TempDir,
}

impl TestRig {
    pub async fn new(segmenter: FnBackend, detector: FnBackend) -> Self {
        Self::with_parameters(segmenter, detector, fast_parameters()).await
    }

    pub async fn with_parameters(
        segmenter: FnBackend,
        detector: FnBackend,
        params: PipelineParameters,
    ) -> Self {
        let (dir, pool) = create_test_db().await;
        parameters::save_pipeline_parameters(&pool, &params).await.unwrap();

        let transport = Arc::new(MemoryBlobTransport::default());
        let breaker = Arc::new(CircuitBreaker::new(
            "blob_store",
            CircuitBreakerConfig {
                failure_threshold: params.circuit_breaker.failure_threshold,
                cool_down: Duration::from_secs(params.circuit_breaker.cool_down_secs),
            },
        ));
        let blob_store = Arc::new(ResilientBlobStore::new(
            Arc::clone(&transport) as Arc<dyn BlobTransport>,
            Arc::clone(&breaker),
            RetryPolicy::from_parameters(&params.retry),
        ));

        let segmenter = Arc::new(segmenter);
        let detector = Arc::new(detector);
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            pool.clone(),
            blob_store,
            pool_of(Arc::clone(&segmenter), 1),
            pool_of(Arc::clone(&detector), 2),
        ));

        Self {
            orchestrator,
            pool,
            transport,
            breaker,
            segmenter,
            detector,
            _dir: dir,
        }
    }

    /// Store a photo and create its pending unit
    pub async fn upload(&self, key: &str, image: &RgbImage) -> ImageUnit {
        self.transport.insert(key, png(image));
        let unit = ImageUnit::new(key);
        image_units::insert_unit(&self.pool, &unit).await.unwrap();
        unit
    }

    pub async fn load(&self, id: Uuid) -> ImageUnit {
        image_units::load_unit(&self.pool, id).await.unwrap().unwrap()
    }

    pub async fn count_rows(&self, table: &str, image_unit_id: Uuid) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE image_unit_id = ?", table))
            .bind(image_unit_id.to_string())
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn sum_band_estimates(&self, image_unit_id: Uuid) -> i64 {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(estimated_count), 0) FROM band_estimations \
             WHERE image_unit_id = ?",
        )
        .bind(image_unit_id.to_string())
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }
}

/// Wait for the `UnitFinished` event of `id`
pub async fn wait_finished(
    events: &mut tokio::sync::broadcast::Receiver<PipelineEvent>,
    id: Uuid,
) -> PipelineEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event @ PipelineEvent::UnitFinished { image_unit_id, .. })
                    if image_unit_id == id =>
                {
                    return event;
                }
                Ok(_) => {}
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("unit did not finish in time")
}
