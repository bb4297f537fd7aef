use std::fmt;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::classifier::{Classification, CropRegion, SourceImage, SpeciesClassifier};
use crate::config::PipelineConfig;
use crate::decode::decode;
use crate::fusion::{fuse, rank_and_truncate, FinalDetection};
use crate::nms::suppress;
use crate::tensor::DecodeError;
use crate::tracker::{self, Clock, HistoryStore, SystemClock};
use crate::validate::is_plausible;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed detector output: {0}")]
    Decode(#[from] DecodeError),
}

/// Identifies one observation session; a new one starts on every reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What happened to one frame, stage by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub session: SessionId,
    /// Candidates out of the decoder.
    pub decoded: usize,
    /// Candidates left after non-max suppression.
    pub after_suppression: usize,
    /// Candidates dropped by the geometric validator.
    pub skipped_invalid: usize,
    pub classification_failures: usize,
    pub detections: Vec<FinalDetection>,
    pub elapsed_ms: u64,
}

/// Per-frame detection pipeline.
///
/// Owns the cross-frame history and the frame counter, so calls must be
/// serialized; wrap it in a [`crate::FrameGate`] when frames come from another
/// thread.
pub struct BirdPipeline<C, K = SystemClock> {
    config: PipelineConfig,
    classifier: C,
    clock: K,
    history: HistoryStore,
    frame_count: u64,
    session: SessionId,
}

impl<C> BirdPipeline<C, SystemClock> {
    #[must_use]
    pub fn new(config: PipelineConfig, classifier: C) -> Self {
        Self::with_clock(config, classifier, SystemClock)
    }
}

impl<C, K: Clock> BirdPipeline<C, K> {
    #[must_use]
    pub fn with_clock(config: PipelineConfig, classifier: C, clock: K) -> Self {
        let session = SessionId::new();
        debug!(%session, "pipeline created");
        Self {
            config,
            classifier,
            clock,
            history: HistoryStore::new(),
            frame_count: 0,
            session,
        }
    }

    /// Runs one frame and returns the final detections, best first.
    ///
    /// Malformed detector output yields an empty list and a warning.
    pub fn process_frame<I>(&mut self, raw: &[f32], image: &I) -> Vec<FinalDetection>
    where
        I: SourceImage + ?Sized,
        C: SpeciesClassifier<I>,
    {
        match self.try_process_frame(raw, image) {
            Ok(report) => report.detections,
            Err(e) => {
                warn!(error = %e, frame = self.frame_count, "frame rejected");
                Vec::new()
            }
        }
    }

    /// Like [`BirdPipeline::process_frame`], but reports every stage and
    /// surfaces malformed input as an error.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Decode`] when the detector buffer does not match the
    /// configured layout or the image has a zero dimension. The frame still
    /// counts, and history is left as it was.
    #[instrument(skip(self, raw, image), fields(raw_len = raw.len(), session = %self.session))]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn try_process_frame<I>(&mut self, raw: &[f32], image: &I) -> Result<FrameReport, PipelineError>
    where
        I: SourceImage + ?Sized,
        C: SpeciesClassifier<I>,
    {
        let start = Instant::now();
        self.frame_count += 1;
        counter!("birdwatch.frames.processed").increment(1);

        let now = self.clock.now();
        let period = self.config.stability.cleanup_period_frames;
        if self.frame_count.checked_rem(period) == Some(0) {
            tracker::cleanup(&mut self.history, now, &self.config.stability);
        }

        let config = &self.config;
        let (width, height) = image.dimensions();

        let candidates = decode(
            raw,
            &config.decode,
            width,
            height,
            config.geometry.min_box_size,
            config.stability.grid_cell_size,
        )
        .inspect_err(|_| counter!("birdwatch.frames.rejected").increment(1))?;
        let decoded = candidates.len();

        let candidates = suppress(candidates, &config.suppression);
        let after_suppression = candidates.len();

        let mut candidates = tracker::update(candidates, &mut self.history, now, &config.stability);
        if candidates.len() > config.suppression.max_detections {
            candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            candidates.truncate(config.suppression.max_detections);
        }

        let mut skipped_invalid = 0;
        let mut classification_failures = 0;
        let mut detections = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if !is_plausible(&candidate.bbox, width, height, &config.geometry) {
                skipped_invalid += 1;
                continue;
            }

            let is_stable = self
                .history
                .is_stable(&candidate.location_key, &config.stability);

            let classification = match CropRegion::from_box(&candidate.bbox, width, height) {
                None => Classification::fallback(&config.classifier),
                Some(region) => match self.classifier.classify(image, &region) {
                    Ok(c) if c.is_usable() => c,
                    Ok(c) => {
                        warn!(key = %candidate.location_key, confidence = c.confidence, "classifier returned out-of-range confidence");
                        counter!("birdwatch.classifier.failures").increment(1);
                        classification_failures += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(key = %candidate.location_key, error = %e, "classification failed, skipping candidate");
                        counter!("birdwatch.classifier.failures").increment(1);
                        classification_failures += 1;
                        continue;
                    }
                },
            };

            if let Some(detection) = fuse(
                candidate.bbox,
                candidate.confidence,
                classification,
                is_stable,
                &config.fusion,
            ) {
                detections.push(detection);
            }
        }

        rank_and_truncate(&mut detections, config.suppression.max_detections);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        counter!("birdwatch.detections.emitted").increment(detections.len() as u64);
        histogram!("birdwatch.frame.duration_ms").record(elapsed_ms as f64);

        debug!(
            decoded,
            after_suppression,
            skipped_invalid,
            classification_failures,
            emitted = detections.len(),
            "frame done"
        );

        Ok(FrameReport {
            frame_index: self.frame_count,
            session: self.session,
            decoded,
            after_suppression,
            skipped_invalid,
            classification_failures,
            detections,
            elapsed_ms,
        })
    }

    /// Forgets all history, restarts frame counting and opens a new session.
    pub fn reset(&mut self) -> SessionId {
        self.history.clear();
        self.frame_count = 0;
        self.session = SessionId::new();
        debug!(session = %self.session, "pipeline reset");
        self.session
    }

    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn classifier_mut(&mut self) -> &mut C {
        &mut self.classifier
    }
}

impl<C, K> fmt::Debug for BirdPipeline<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BirdPipeline")
            .field("session", &self.session)
            .field("frame_count", &self.frame_count)
            .field("histories", &self.history.len())
            .finish_non_exhaustive()
    }
}
