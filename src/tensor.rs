//! Shape contract for the raw detector buffer.
//!
//! A YOLOv8-style head produces, per anchor, `[cx, cy, w, h, score_0 .. score_{C-1}]`
//! in model-input pixels. Exporters disagree on which axis comes first, so the
//! order is part of the contract instead of being baked into index arithmetic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Features preceding the class scores: center-x, center-y, width, height.
pub const BOX_FEATURES: usize = 4;

pub const FEATURE_CX: usize = 0;
pub const FEATURE_CY: usize = 1;
pub const FEATURE_W: usize = 2;
pub const FEATURE_H: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrder {
    /// `[features, anchors]`: element `(f, a)` lives at `f * num_anchors + a`.
    #[default]
    FeatureMajor,
    /// `[anchors, features]`: element `(f, a)` lives at `a * num_features + f`.
    AnchorMajor,
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("detector output size mismatch: expected {expected} values, got {got}")]
    OutputSizeMismatch { expected: usize, got: usize },

    #[error("detector output has {features} features, need at least {min}", min = BOX_FEATURES + 1)]
    TooFewFeatures { features: usize },

    #[error("target class {target} outside the {classes} classes in the output")]
    TargetClassOutOfRange { target: usize, classes: usize },

    #[error("invalid image dimensions: {width}x{height}")]
    InvalidImageDimensions { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    pub num_anchors: usize,
    pub num_features: usize,
    pub order: AxisOrder,
}

impl OutputLayout {
    #[must_use]
    pub const fn new(num_anchors: usize, num_features: usize, order: AxisOrder) -> Self {
        Self {
            num_anchors,
            num_features,
            order,
        }
    }

    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.num_features.saturating_sub(BOX_FEATURES)
    }

    /// Total element count a buffer with this layout must have.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.num_anchors * self.num_features
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn index(&self, feature: usize, anchor: usize) -> usize {
        match self.order {
            AxisOrder::FeatureMajor => feature * self.num_anchors + anchor,
            AxisOrder::AnchorMajor => anchor * self.num_features + feature,
        }
    }
}

/// Borrowed, shape-checked view over a raw detector buffer.
#[derive(Debug, Clone, Copy)]
pub struct DetectorOutput<'a> {
    data: &'a [f32],
    layout: OutputLayout,
}

impl<'a> DetectorOutput<'a> {
    /// Wraps `data` after checking it matches `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::OutputSizeMismatch`] when the buffer length does not
    /// equal `num_anchors * num_features`, and [`DecodeError::TooFewFeatures`]
    /// when there is no room for a single class score.
    pub fn new(data: &'a [f32], layout: OutputLayout) -> Result<Self, DecodeError> {
        if layout.num_features <= BOX_FEATURES {
            return Err(DecodeError::TooFewFeatures {
                features: layout.num_features,
            });
        }
        if data.len() != layout.len() {
            return Err(DecodeError::OutputSizeMismatch {
                expected: layout.len(),
                got: data.len(),
            });
        }
        Ok(Self { data, layout })
    }

    #[must_use]
    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    #[must_use]
    pub fn num_anchors(&self) -> usize {
        self.layout.num_anchors
    }

    /// Reads feature `feature` of anchor `anchor`. Both indices must be in range.
    #[inline]
    #[must_use]
    pub fn get(&self, feature: usize, anchor: usize) -> f32 {
        self.data[self.layout.index(feature, anchor)]
    }

    /// `(cx, cy, w, h)` for an anchor, in model-input pixels.
    #[must_use]
    pub fn box_of(&self, anchor: usize) -> (f32, f32, f32, f32) {
        (
            self.get(FEATURE_CX, anchor),
            self.get(FEATURE_CY, anchor),
            self.get(FEATURE_W, anchor),
            self.get(FEATURE_H, anchor),
        )
    }

    /// Class scores for an anchor, in class-index order.
    pub fn scores_of(&self, anchor: usize) -> impl Iterator<Item = f32> + 'a {
        let this = *self;
        (BOX_FEATURES..self.layout.num_features).map(move |f| this.get(f, anchor))
    }
}
