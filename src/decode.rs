use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::DecodeConfig;
use crate::geometry::BoundingBox;
use crate::tensor::{DecodeError, DetectorOutput, OutputLayout};

/// Coarse spatial bin standing in for object identity across frames.
///
/// Two boxes share a key iff their centers fall in the same grid cell. This
/// merges distinct birds that sit close together and splits a slow bird that
/// drifts across a cell edge; both are accepted approximations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    pub col: i32,
    pub row: i32,
}

impl LocationKey {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_box(bbox: &BoundingBox, cell_size: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            col: (cx / cell_size).floor() as i32,
            row: (cy / cell_size).floor() as i32,
        }
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.col, self.row)
    }
}

/// One detector proposal inside a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    /// Detector confidence; the tracker may raise it.
    pub confidence: f32,
    pub class_index: usize,
    pub location_key: LocationKey,
}

impl Candidate {
    #[must_use]
    pub fn new(bbox: BoundingBox, confidence: f32, class_index: usize, cell_size: f32) -> Self {
        Self {
            bbox,
            confidence,
            class_index,
            location_key: LocationKey::for_box(&bbox, cell_size),
        }
    }
}

/// Highest class score and its index. Ties keep the lowest index; NaN scores
/// never win. `None` when there are no scores.
fn arg_max(scores: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    scores
        .enumerate()
        .fold(None, |best, (idx, score)| match best {
            _ if score.is_nan() => best,
            Some((_, best_score)) if score <= best_score => best,
            _ => Some((idx, score)),
        })
}

/// Turns the raw detector buffer into candidates in source-image pixels.
///
/// Anchors are scanned in ascending index order and scanning stops as soon as
/// `config.max_candidates` have been accepted, so identical input always keeps
/// the same subset.
///
/// # Errors
///
/// Fails when the buffer does not match the configured layout, when the target
/// class is not present in it, or when the image has a zero dimension.
#[instrument(skip(raw, config), fields(raw_len = raw.len()))]
#[allow(clippy::cast_precision_loss)]
pub fn decode(
    raw: &[f32],
    config: &DecodeConfig,
    image_width: u32,
    image_height: u32,
    min_box_size: f32,
    cell_size: f32,
) -> Result<Vec<Candidate>, DecodeError> {
    if image_width == 0 || image_height == 0 {
        return Err(DecodeError::InvalidImageDimensions {
            width: image_width,
            height: image_height,
        });
    }

    let layout = OutputLayout::new(config.num_anchors, config.num_features, config.axis_order);
    let output = DetectorOutput::new(raw, layout)?;
    if config.target_class >= layout.num_classes() {
        return Err(DecodeError::TargetClassOutOfRange {
            target: config.target_class,
            classes: layout.num_classes(),
        });
    }

    let input_w = config.input_width as f32;
    let input_h = config.input_height as f32;
    let img_w = image_width as f32;
    let img_h = image_height as f32;
    let scale_x = img_w / input_w;
    let scale_y = img_h / input_h;

    let mut candidates = Vec::with_capacity(config.max_candidates.min(64));
    let mut scanned = 0usize;

    for anchor in 0..output.num_anchors() {
        if candidates.len() >= config.max_candidates {
            break;
        }
        scanned += 1;

        let (cx, cy, w, h) = output.box_of(anchor);

        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            continue;
        }
        // A sane head never leaves the input canvas; anything else is noise.
        if cx <= 0.0 || cy <= 0.0 || w <= 0.0 || h <= 0.0 || w > input_w || h > input_h {
            continue;
        }

        let Some((class_index, confidence)) = arg_max(output.scores_of(anchor)) else {
            continue;
        };

        if confidence <= config.confidence_threshold || class_index != config.target_class {
            continue;
        }

        let bbox = BoundingBox::from_center(cx * scale_x, cy * scale_y, w * scale_x, h * scale_y)
            .clamped(img_w, img_h);

        if bbox.width() < min_box_size || bbox.height() < min_box_size {
            debug!(anchor, width = bbox.width(), height = bbox.height(), "clamped box too small");
            continue;
        }

        candidates.push(Candidate::new(bbox, confidence, class_index, cell_size));
    }

    debug!(scanned, accepted = candidates.len(), "decoded detector output");
    Ok(candidates)
}
