//! Fan-in aggregation of per-region outcomes
//!
//! Pure rules, no I/O:
//!
//! | outcomes                   | status                   |
//! |----------------------------|--------------------------|
//! | none (no regions)          | `completed`              |
//! | all succeeded              | `completed`              |
//! | some failed, some not      | `completed_with_warning` |
//! | all failed                 | `failed`                 |
//!
//! Counts and average confidence cover successful regions only.

use crate::models::{ImageStatus, ImageUnit, ProcessingOutcome, RegionFailure, StatusTransition};

/// Aggregated result for one image unit
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub status: ImageStatus,
    pub detected_count: u64,
    pub estimated_count: u64,
    pub average_confidence: f32,
    pub warnings: Vec<RegionFailure>,
    pub failure_reason: Option<String>,
}

impl Aggregation {
    /// Write the aggregation onto a `processing` unit and move it to its
    /// terminal status
    pub fn apply_to(self, unit: &mut ImageUnit) -> gpc_common::Result<StatusTransition> {
        let transition = unit.transition_to(self.status)?;
        unit.detected_count = self.detected_count;
        unit.estimated_count = self.estimated_count;
        unit.average_confidence = self.average_confidence;
        unit.warnings = self.warnings;
        unit.failure_reason = self.failure_reason;
        Ok(transition)
    }
}

pub fn aggregate(outcomes: &[ProcessingOutcome]) -> Aggregation {
    let (successes, failures): (Vec<&ProcessingOutcome>, Vec<&ProcessingOutcome>) =
        outcomes.iter().partition(|o| o.is_success());

    let status = if failures.is_empty() {
        ImageStatus::Completed
    } else if successes.is_empty() {
        ImageStatus::Failed
    } else {
        ImageStatus::CompletedWithWarning
    };

    let detected_count = successes.iter().map(|o| o.detected_count()).sum();
    let estimated_count = successes.iter().map(|o| o.estimated_count()).sum();

    let (confidence_sum, confidence_n) = successes
        .iter()
        .flat_map(|o| o.detections.iter())
        .fold((0.0f64, 0u64), |(sum, n), d| (sum + f64::from(d.confidence), n + 1));
    let average_confidence = if confidence_n == 0 {
        0.0
    } else {
        (confidence_sum / confidence_n as f64) as f32
    };

    let mut warnings: Vec<RegionFailure> = failures.iter().filter_map(|o| o.as_failure()).collect();
    warnings.sort_by_key(|w| w.region_index);

    let failure_reason = (status == ImageStatus::Failed).then(|| {
        format!(
            "All {} regions failed; first error: {}",
            failures.len(),
            warnings.first().map(|w| w.error.as_str()).unwrap_or("unknown")
        )
    });

    Aggregation {
        status,
        detected_count,
        estimated_count,
        average_confidence,
        warnings,
        failure_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BandEstimation, CalibrationSource, ContainerClass, Detection, DetectionStrategy,
    };
    use uuid::Uuid;

    fn success(index: u32, confidences: &[f32], estimated: &[u32]) -> ProcessingOutcome {
        let region_id = Uuid::new_v4();
        let detections = confidences
            .iter()
            .map(|&c| {
                let corners = [0.0, 0.0, 10.0, 10.0];
                Detection::from_corners(region_id, corners, c, DetectionStrategy::Tiled)
            })
            .collect();
        let estimations = estimated
            .iter()
            .enumerate()
            .map(|(i, &count)| BandEstimation {
                region_id,
                band_index: i as u32,
                band_top: 0,
                band_bottom: 10,
                residual_area_px: 0,
                area_per_plant_px: 100.0,
                calibration: CalibrationSource::ClassDefault,
                estimated_count: count,
                confidence: 0.3,
            })
            .collect();
        ProcessingOutcome::success(
            region_id,
            index,
            ContainerClass::LargeBed,
            detections,
            Some(estimations),
            1,
        )
    }

    fn failure(index: u32) -> ProcessingOutcome {
        ProcessingOutcome::failed(
            Uuid::new_v4(),
            index,
            ContainerClass::LargeBed,
            "detector down".to_string(),
            2,
        )
    }

    #[test]
    fn test_no_regions_is_completed_with_zero_counts() {
        let agg = aggregate(&[]);
        assert_eq!(agg.status, ImageStatus::Completed);
        assert_eq!(agg.detected_count, 0);
        assert_eq!(agg.estimated_count, 0);
        assert_eq!(agg.average_confidence, 0.0);
        assert!(agg.warnings.is_empty());
        assert!(agg.failure_reason.is_none());
    }

    #[test]
    fn test_all_success_sums_counts() {
        let agg = aggregate(&[success(0, &[0.8, 0.6], &[3, 0]), success(1, &[1.0], &[])]);
        assert_eq!(agg.status, ImageStatus::Completed);
        assert_eq!(agg.detected_count, 3);
        assert_eq!(agg.estimated_count, 3);
        assert!((agg.average_confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_partial_failure_counts_successes_only() {
        let agg = aggregate(&[failure(0), success(1, &[0.9, 0.7], &[5])]);
        assert_eq!(agg.status, ImageStatus::CompletedWithWarning);
        assert_eq!(agg.detected_count, 2);
        assert_eq!(agg.estimated_count, 5);
        assert_eq!(agg.warnings.len(), 1);
        assert_eq!(agg.warnings[0].region_index, 0);
        assert_eq!(agg.warnings[0].error, "detector down");
        assert!(agg.failure_reason.is_none());
    }

    #[test]
    fn test_all_failed_is_failed() {
        let agg = aggregate(&[failure(1), failure(0)]);
        assert_eq!(agg.status, ImageStatus::Failed);
        assert_eq!(agg.detected_count, 0);
        assert_eq!(agg.warnings.len(), 2);
        assert_eq!(agg.warnings[0].region_index, 0);
        assert!(agg.failure_reason.unwrap().contains("All 2 regions failed"));
    }

    #[test]
    fn test_success_without_detections_has_zero_confidence() {
        let agg = aggregate(&[success(0, &[], &[4])]);
        assert_eq!(agg.status, ImageStatus::Completed);
        assert_eq!(agg.average_confidence, 0.0);
        assert_eq!(agg.estimated_count, 4);
    }

    #[test]
    fn test_apply_moves_unit_to_terminal() {
        let mut unit = ImageUnit::new("photos/a.jpg");
        unit.transition_to(ImageStatus::Processing).unwrap();

        aggregate(&[failure(0), success(1, &[0.5], &[])])
            .apply_to(&mut unit)
            .unwrap();
        assert_eq!(unit.status, ImageStatus::CompletedWithWarning);
        assert_eq!(unit.detected_count, 1);
        assert_eq!(unit.warnings.len(), 1);

        // A second aggregation cannot move a terminal unit
        assert!(aggregate(&[]).apply_to(&mut unit).is_err());
    }
}
