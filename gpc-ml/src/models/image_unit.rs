//! Image unit lifecycle
//!
//! One uploaded photo is processed as one image unit. Its status only moves
//! forward:
//!
//! ```text
//! pending → processing → completed | completed_with_warning | failed
//! ```
//!
//! Reprocessing never rewinds a terminal unit; it creates a new unit (a new
//! attempt) that references the previous one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::outcome::RegionFailure;

/// Processing status of an image unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Created, not yet dispatched
    Pending,
    /// Parent processing in flight
    Processing,
    /// All regions succeeded (or there were no regions)
    Completed,
    /// Some regions failed; counts cover the successful regions only
    CompletedWithWarning,
    /// Fatal failure, or every region failed
    Failed,
}

impl ImageStatus {
    /// Database / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Processing => "processing",
            ImageStatus::Completed => "completed",
            ImageStatus::CompletedWithWarning => "completed_with_warning",
            ImageStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are never left
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImageStatus::Completed | ImageStatus::CompletedWithWarning | ImageStatus::Failed
        )
    }

    /// Whether `self → next` is a legal forward move
    pub fn can_transition_to(&self, next: ImageStatus) -> bool {
        match (self, next) {
            (ImageStatus::Pending, ImageStatus::Processing) => true,
            // Fatal errors before dispatch still end in failed
            (ImageStatus::Pending, ImageStatus::Failed) => true,
            (ImageStatus::Processing, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = gpc_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImageStatus::Pending),
            "processing" => Ok(ImageStatus::Processing),
            "completed" => Ok(ImageStatus::Completed),
            "completed_with_warning" => Ok(ImageStatus::CompletedWithWarning),
            "failed" => Ok(ImageStatus::Failed),
            other => Err(gpc_common::Error::InvalidInput(format!(
                "Unknown image status: {}",
                other
            ))),
        }
    }
}

/// Status transition record (emitted as an event)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub image_unit_id: Uuid,
    pub old_status: ImageStatus,
    pub new_status: ImageStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One photo as a unit of processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUnit {
    pub id: Uuid,

    /// Blob store key of the uploaded photo
    pub source_key: String,

    /// Reference the photo was actually fetched from, recorded at dispatch.
    /// Reprocessing reads the same bytes through it.
    pub image_reference: Option<String>,

    /// 1 for the first run, incremented on each reprocess
    pub attempt: u32,

    /// Previous attempt this unit reprocesses
    pub reprocess_of: Option<Uuid>,

    pub status: ImageStatus,

    /// Sum of individually detected plants over successful regions
    pub detected_count: u64,

    /// Sum of band estimates over successful regions
    pub estimated_count: u64,

    /// Mean detection confidence over successful regions (0.0 when none)
    pub average_confidence: f32,

    /// Per-region failures recorded as warnings
    pub warnings: Vec<RegionFailure>,

    /// Reason for a failed status
    pub failure_reason: Option<String>,

    /// Blob key of the annotated overlay, once uploaded
    pub visualization_key: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImageUnit {
    /// New pending unit for an uploaded photo
    pub fn new(source_key: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), source_key)
    }

    /// New pending unit with a caller-assigned id
    pub fn with_id(id: Uuid, source_key: impl Into<String>) -> Self {
        Self {
            id,
            source_key: source_key.into(),
            image_reference: None,
            attempt: 1,
            reprocess_of: None,
            status: ImageStatus::Pending,
            detected_count: 0,
            estimated_count: 0,
            average_confidence: 0.0,
            warnings: Vec::new(),
            failure_reason: None,
            visualization_key: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// New pending attempt reprocessing `previous`
    pub fn reprocess_of(previous: &ImageUnit) -> Self {
        let mut unit = Self::new(previous.source_key.clone());
        unit.attempt = previous.attempt + 1;
        unit.reprocess_of = Some(previous.id);
        unit.image_reference = previous.image_reference.clone();
        unit
    }

    /// Where the photo is read from: the recorded dispatch reference, or the
    /// upload key when the unit was never dispatched
    pub fn dispatch_reference(&self) -> &str {
        self.image_reference.as_deref().unwrap_or(&self.source_key)
    }

    /// Move forward to `new_status`, rejecting backwards or sideways moves
    pub fn transition_to(
        &mut self,
        new_status: ImageStatus,
    ) -> gpc_common::Result<StatusTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(gpc_common::Error::InvalidInput(format!(
                "Illegal status transition for image unit {}: {} → {}",
                self.id, self.status, new_status
            )));
        }

        let now = Utc::now();
        let transition = StatusTransition {
            image_unit_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: now,
        };
        self.status = new_status;

        if new_status == ImageStatus::Processing {
            self.started_at = Some(now);
        }
        if new_status.is_terminal() {
            self.completed_at = Some(now);
        }

        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
