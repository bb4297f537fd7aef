use serde::{Deserialize, Serialize};

use crate::classifier::Classification;
use crate::config::FusionConfig;
use crate::geometry::BoundingBox;

/// One bird reported for a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDetection {
    pub bbox: BoundingBox,
    pub species: String,
    /// Weighted blend of detector and classifier confidence, in `[0, 1]`.
    pub final_confidence: f32,
    /// Stability of the candidate's location at the moment it was emitted.
    pub is_stable: bool,
}

/// Combines detector and classifier confidence for one candidate.
///
/// Returns `None` unless the classifier confidence is strictly above the
/// acceptance threshold.
#[must_use]
pub fn fuse(
    bbox: BoundingBox,
    detector_confidence: f32,
    classification: Classification,
    is_stable: bool,
    config: &FusionConfig,
) -> Option<FinalDetection> {
    if classification.confidence <= config.acceptance_threshold {
        return None;
    }

    let blended = config.detector_weight * detector_confidence
        + config.classifier_weight * classification.confidence;

    Some(FinalDetection {
        bbox,
        species: classification.label,
        final_confidence: blended.clamp(0.0, 1.0),
        is_stable,
    })
}

/// Orders detections by descending final confidence (stable) and keeps at most
/// `max_detections`.
pub fn rank_and_truncate(detections: &mut Vec<FinalDetection>, max_detections: usize) {
    detections.sort_by(|a, b| b.final_confidence.total_cmp(&a.final_confidence));
    detections.truncate(max_detections);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox::new(10.0, 10.0, 110.0, 90.0)
    }

    fn det(confidence: f32) -> FinalDetection {
        FinalDetection {
            bbox: bbox(),
            species: "Robin".into(),
            final_confidence: confidence,
            is_stable: false,
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let config = FusionConfig::default();
        assert!(fuse(bbox(), 0.9, Classification::new("Robin", 0.5), false, &config).is_none());

        let above = 0.5 + f32::EPSILON;
        let out = fuse(bbox(), 0.9, Classification::new("Robin", above), true, &config).unwrap();
        assert!((out.final_confidence - (0.8 * 0.9 + 0.2 * above)).abs() < 1e-6);
        assert!(out.is_stable);
        assert_eq!(out.species, "Robin");
    }

    #[test]
    fn test_weighted_blend() {
        let out = fuse(bbox(), 0.9, Classification::new("Robin", 0.7), false, &FusionConfig::default()).unwrap();
        assert!((out.final_confidence - 0.86).abs() < 1e-6);
    }

    #[test]
    fn test_clamped_to_one() {
        let config = FusionConfig {
            detector_weight: 1.0,
            classifier_weight: 0.5,
            ..FusionConfig::default()
        };
        let out = fuse(bbox(), 1.0, Classification::new("Robin", 0.9), false, &config).unwrap();
        assert_eq!(out.final_confidence, 1.0);
    }

    #[test]
    fn test_fallback_classification_is_rejected() {
        let fallback = Classification::new("Bird", 0.5);
        assert!(fuse(bbox(), 1.0, fallback, true, &FusionConfig::default()).is_none());
    }

    #[test]
    fn test_rank_sorts_and_truncates() {
        let mut v = vec![det(0.7), det(0.9), det(0.8), det(0.95)];
        rank_and_truncate(&mut v, 3);
        let c: Vec<f32> = v.iter().map(|d| d.final_confidence).collect();
        assert_eq!(c, vec![0.95, 0.9, 0.8]);
    }

    #[test]
    fn test_serializes_as_json() {
        let json = serde_json::to_string(&det(0.86)).unwrap();
        assert!(json.contains("\"species\":\"Robin\""));
        let back: FinalDetection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, det(0.86));
    }
}
