// lib.rs - Bird detection post-processing core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

//! Turns raw YOLO-style detector output into a short list of bird sightings.
//!
//! One frame flows decode -> non-max suppression -> temporal stability ->
//! per-candidate classification -> fusion. Only the detector tensor and the
//! species classifier live outside this crate; see [`SpeciesClassifier`].

pub mod classifier;
pub mod config;
pub mod decode;
pub mod fusion;
pub mod gate;
pub mod geometry;
pub mod nms;
pub mod pipeline;
#[cfg(feature = "preprocess")]
pub mod preprocess;
pub mod tensor;
pub mod tracker;
pub mod validate;

pub use classifier::{
    Classification, ClassifyError, CropRegion, ImageSize, LabelsError, SourceImage,
    SpeciesClassifier, SpeciesLabels,
};
pub use config::{
    ClassifierConfig, ConfigError, DecodeConfig, FusionConfig, GeometryLimits, PipelineConfig,
    StabilityConfig, SuppressionConfig,
};
pub use decode::{Candidate, LocationKey};
pub use fusion::FinalDetection;
pub use gate::{FrameDropped, FrameGate, GateError};
pub use geometry::BoundingBox;
pub use pipeline::{BirdPipeline, FrameReport, PipelineError, SessionId};
pub use tensor::{AxisOrder, DecodeError, OutputLayout};
pub use tracker::{Clock, DetectionHistory, HistoryStore, ManualClock, SystemClock, TimestampMs};
