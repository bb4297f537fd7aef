//! Seam between the pipeline and the species classifier.
//!
//! The pipeline never runs a model. For every surviving candidate it computes a
//! [`CropRegion`] and hands it, together with the frame, to a
//! [`SpeciesClassifier`] supplied by the host.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::{ClassifierConfig, DEFAULT_FALLBACK_LABEL};
use crate::geometry::BoundingBox;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier inference failed: {0}")]
    Inference(String),

    #[error("classifier returned unusable output: {reason}")]
    UnusableOutput { reason: String },
}

#[derive(Debug, Error)]
pub enum LabelsError {
    #[error("failed to parse species labels: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("species label list is empty")]
    Empty,
}

/// A species label and the classifier's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

impl Classification {
    #[must_use]
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    /// The pair reported when classification could not run.
    #[must_use]
    pub fn fallback(config: &ClassifierConfig) -> Self {
        Self::new(config.fallback_label.clone(), config.fallback_confidence)
    }

    /// Arg-max over a probability vector. The first maximum wins; an index past
    /// the end of `labels` maps to the generic fallback label.
    ///
    /// # Errors
    ///
    /// [`ClassifyError::UnusableOutput`] for an empty vector or a non-finite maximum.
    pub fn from_probabilities(
        probabilities: &[f32],
        labels: &SpeciesLabels,
    ) -> Result<Self, ClassifyError> {
        let Some((&first, rest)) = probabilities.split_first() else {
            return Err(ClassifyError::UnusableOutput {
                reason: "empty probability vector".into(),
            });
        };

        let (best_idx, best) = rest
            .iter()
            .enumerate()
            .fold((0usize, first), |(bi, bp), (i, &p)| {
                if p > bp {
                    (i + 1, p)
                } else {
                    (bi, bp)
                }
            });

        if !best.is_finite() {
            return Err(ClassifyError::UnusableOutput {
                reason: format!("non-finite maximum probability {best}"),
            });
        }

        Ok(Self::new(labels.name_or_fallback(best_idx), best))
    }

    /// Whether the confidence can be fused at all.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Class-index to species-name table for the classifier head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SpeciesLabels(Vec<String>);

impl TryFrom<Vec<String>> for SpeciesLabels {
    type Error = LabelsError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<SpeciesLabels> for Vec<String> {
    fn from(labels: SpeciesLabels) -> Self {
        labels.0
    }
}

impl Default for SpeciesLabels {
    fn default() -> Self {
        Self(vec![DEFAULT_FALLBACK_LABEL.to_string()])
    }
}

impl SpeciesLabels {
    /// # Errors
    ///
    /// [`LabelsError::Empty`] for an empty table.
    pub fn new(names: Vec<String>) -> Result<Self, LabelsError> {
        if names.is_empty() {
            return Err(LabelsError::Empty);
        }
        Ok(Self(names))
    }

    /// Parses a JSON array of names, e.g. `["American Robin", "Blue Jay"]`.
    ///
    /// # Errors
    ///
    /// [`LabelsError::Parse`] for malformed JSON, [`LabelsError::Empty`] for `[]`.
    pub fn from_json_str(json: &str) -> Result<Self, LabelsError> {
        let names: Vec<String> = serde_json::from_str(json)?;
        Self::new(names)
    }

    /// Like [`SpeciesLabels::from_json_str`], degrading to `["Bird"]` on failure.
    #[must_use]
    pub fn load_or_fallback(json: &str) -> Self {
        Self::from_json_str(json).unwrap_or_else(|e| {
            warn!(error = %e, "species labels unavailable, using generic label");
            Self::default()
        })
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn name_or_fallback(&self, index: usize) -> &str {
        self.get(index).unwrap_or(DEFAULT_FALLBACK_LABEL)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Anything with pixel dimensions the pipeline can rescale boxes into.
pub trait SourceImage {
    fn dimensions(&self) -> (u32, u32);
}

/// Dimensions only, for hosts that keep pixels on their side of the seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SourceImage for ImageSize {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Integer pixel rectangle to cut out of the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Pixel crop for a box: the origin is truncated and floored at zero, and the
    /// extent is the box size cut to what remains of the image. `None` when
    /// nothing is left or the box is not finite.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn from_box(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Option<Self> {
        if !bbox.is_finite() {
            return None;
        }

        let x = bbox.left.max(0.0) as u32;
        let y = bbox.top.max(0.0) as u32;
        if x >= image_width || y >= image_height {
            return None;
        }

        let width = (bbox.width().max(0.0).min((image_width - x) as f32)) as u32;
        let height = (bbox.height().max(0.0).min((image_height - y) as f32)) as u32;

        if width == 0 || height == 0 {
            return None;
        }

        Some(Self {
            x,
            y,
            width,
            height,
        })
    }
}

/// Host-provided species classifier.
///
/// Implementations crop `region` out of `image`, run their model and report
/// the top label. Errors are per-candidate: the pipeline logs them and moves on.
pub trait SpeciesClassifier<I: ?Sized> {
    /// # Errors
    ///
    /// Any failure to produce a classification for this region.
    fn classify(&mut self, image: &I, region: &CropRegion) -> Result<Classification, ClassifyError>;
}

impl<I, F> SpeciesClassifier<I> for F
where
    I: ?Sized,
    F: FnMut(&I, &CropRegion) -> Result<Classification, ClassifyError>,
{
    fn classify(&mut self, image: &I, region: &CropRegion) -> Result<Classification, ClassifyError> {
        self(image, region)
    }
}
