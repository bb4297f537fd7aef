use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::AxisOrder;

// ============================================================================
// Defaults (tuned for a YOLOv8 COCO detector feeding a species classifier)
// ============================================================================

/// Detector input resolution, both axes.
pub const DEFAULT_MODEL_INPUT: u32 = 640;

/// YOLOv8 at 640x640 emits 8400 anchors.
pub const DEFAULT_NUM_ANCHORS: usize = 8400;

/// 4 box features + 80 COCO class scores.
pub const DEFAULT_NUM_FEATURES: usize = 84;

/// COCO class index for "bird".
pub const COCO_BIRD_CLASS: usize = 14;

pub const DEFAULT_FALLBACK_LABEL: &str = "Bird";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("{field} must be non-zero")]
    Zero { field: &'static str },

    #[error("aspect bounds inverted: min {min} > max {max}")]
    InvertedAspect { min: f32, max: f32 },

    #[error("target class {target} not covered by {features} features")]
    TargetClassOutOfRange { target: usize, features: usize },

    #[error("fusion weights must sum to 1.0, got {sum}")]
    WeightSum { sum: f32 },
}

/// How the raw detector buffer is shaped and which anchors may become candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub num_anchors: usize,
    pub num_features: usize,
    pub axis_order: AxisOrder,
    pub target_class: usize,
    /// Strict: a score equal to the threshold is rejected.
    pub confidence_threshold: f32,
    /// Safety valve against pathological outputs; scanning stops once reached.
    pub max_candidates: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            num_anchors: DEFAULT_NUM_ANCHORS,
            num_features: DEFAULT_NUM_FEATURES,
            axis_order: AxisOrder::FeatureMajor,
            target_class: COCO_BIRD_CLASS,
            confidence_threshold: 0.75,
            max_candidates: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryLimits {
    /// Minimum width and height in pixels.
    pub min_box_size: f32,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    /// Minimum box area as a fraction of the image area.
    pub min_relative_area: f32,
}

impl Default for GeometryLimits {
    fn default() -> Self {
        Self {
            min_box_size: 40.0,
            min_aspect_ratio: 0.3,
            max_aspect_ratio: 3.5,
            min_relative_area: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// Strict: pairs with IoU equal to the threshold both survive.
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.35,
            max_detections: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub confidence_threshold: f32,
    pub window_size: usize,
    pub min_samples: usize,
    pub min_consecutive_frames: u32,
    pub bonus: f32,
    pub max_age_ms: u64,
    pub cleanup_period_frames: u64,
    pub grid_cell_size: f32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            window_size: 5,
            min_samples: 3,
            min_consecutive_frames: 3,
            bonus: 0.15,
            max_age_ms: 5_000,
            cleanup_period_frames: 30,
            grid_cell_size: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Strict: a classifier confidence equal to this is rejected.
    pub acceptance_threshold: f32,
    pub detector_weight: f32,
    pub classifier_weight: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.5,
            detector_weight: 0.8,
            classifier_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub input_size: u32,
    pub fallback_label: String,
    /// Confidence reported when classification cannot run at all.
    pub fallback_confidence: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            fallback_label: DEFAULT_FALLBACK_LABEL.to_string(),
            fallback_confidence: 0.5,
        }
    }
}

/// Every tunable of the pipeline.
///
/// Deserialization fills any missing section or field from [`Default`], so a
/// config file only needs to name what it overrides:
///
/// ```
/// let cfg = birdwatch::PipelineConfig::from_json_str(
///     r#"{ "suppression": { "max_detections": 5 } }"#,
/// ).unwrap();
/// assert_eq!(cfg.suppression.max_detections, 5);
/// assert_eq!(cfg.decode.target_class, 14);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decode: DecodeConfig,
    pub geometry: GeometryLimits,
    pub suppression: SuppressionConfig,
    pub stability: StabilityConfig,
    pub fusion: FusionConfig,
    pub classifier: ClassifierConfig,
}

impl PipelineConfig {
    /// Parses and validates a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and any validation
    /// error from [`PipelineConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values loaded from outside the program.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.decode;
        non_zero("decode.input_width", d.input_width as usize)?;
        non_zero("decode.input_height", d.input_height as usize)?;
        non_zero("decode.num_anchors", d.num_anchors)?;
        non_zero("decode.max_candidates", d.max_candidates)?;
        if d.target_class + 4 >= d.num_features {
            return Err(ConfigError::TargetClassOutOfRange {
                target: d.target_class,
                features: d.num_features,
            });
        }
        unit_open("decode.confidence_threshold", d.confidence_threshold)?;

        let g = &self.geometry;
        positive("geometry.min_box_size", g.min_box_size)?;
        positive("geometry.min_aspect_ratio", g.min_aspect_ratio)?;
        if g.min_aspect_ratio > g.max_aspect_ratio {
            return Err(ConfigError::InvertedAspect {
                min: g.min_aspect_ratio,
                max: g.max_aspect_ratio,
            });
        }
        unit_open("geometry.min_relative_area", g.min_relative_area)?;

        unit_open("suppression.iou_threshold", self.suppression.iou_threshold)?;
        non_zero("suppression.max_detections", self.suppression.max_detections)?;

        let s = &self.stability;
        unit_open("stability.confidence_threshold", s.confidence_threshold)?;
        non_zero("stability.window_size", s.window_size)?;
        non_zero("stability.cleanup_period_frames", s.cleanup_period_frames as usize)?;
        positive("stability.grid_cell_size", s.grid_cell_size)?;
        if !(0.0..=1.0).contains(&s.bonus) {
            return Err(ConfigError::OutOfRange {
                field: "stability.bonus",
                range: "[0, 1]",
                value: f64::from(s.bonus),
            });
        }

        let f = &self.fusion;
        unit_open("fusion.acceptance_threshold", f.acceptance_threshold)?;
        let sum = f.detector_weight + f.classifier_weight;
        if f.detector_weight < 0.0 || f.classifier_weight < 0.0 || (sum - 1.0).abs() > 1e-4 {
            return Err(ConfigError::WeightSum { sum });
        }

        non_zero("classifier.input_size", self.classifier.input_size as usize)?;
        Ok(())
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(())
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::OutOfRange {
            field,
            range: "(0, inf)",
            value: f64::from(value),
        });
    }
    Ok(())
}

fn unit_open(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_nan() || value <= 0.0 || value >= 1.0 {
        return Err(ConfigError::OutOfRange {
            field,
            range: "(0, 1)",
            value: f64::from(value),
        });
    }
    Ok(())
}
