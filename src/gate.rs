use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use metrics::counter;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::classifier::{SourceImage, SpeciesClassifier};
use crate::fusion::FinalDetection;
use crate::pipeline::{BirdPipeline, FrameReport, PipelineError};
use crate::tracker::{Clock, SystemClock};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("frame dropped: another frame is still in flight")]
pub struct FrameDropped;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Dropped(#[from] FrameDropped),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Admits one frame at a time into a shared [`BirdPipeline`].
///
/// A frame that arrives while another is being processed, or while
/// [`FrameGate::with_pipeline`] holds the pipeline, is dropped, never queued.
/// Needs no async runtime: admission is a non-blocking `try_acquire` on a
/// one-permit semaphore followed by a `try_lock` on the pipeline.
pub struct FrameGate<C, K = SystemClock> {
    permit: Semaphore,
    pipeline: Mutex<BirdPipeline<C, K>>,
    dropped: AtomicU64,
}

impl<C, K: Clock> FrameGate<C, K> {
    #[must_use]
    pub fn new(pipeline: BirdPipeline<C, K>) -> Self {
        Self {
            permit: Semaphore::new(1),
            pipeline: Mutex::new(pipeline),
            dropped: AtomicU64::new(0),
        }
    }

    /// Processes the frame if the pipeline is idle.
    ///
    /// # Errors
    ///
    /// [`FrameDropped`] when another frame holds the pipeline.
    pub fn submit<I>(&self, raw: &[f32], image: &I) -> Result<Vec<FinalDetection>, FrameDropped>
    where
        I: SourceImage + ?Sized,
        C: SpeciesClassifier<I>,
    {
        let (_permit, mut pipeline) = self.admit()?;
        Ok(pipeline.process_frame(raw, image))
    }

    /// Gated [`BirdPipeline::try_process_frame`].
    ///
    /// # Errors
    ///
    /// [`GateError::Dropped`] when busy, [`GateError::Pipeline`] for malformed input.
    pub fn try_submit<I>(&self, raw: &[f32], image: &I) -> Result<FrameReport, GateError>
    where
        I: SourceImage + ?Sized,
        C: SpeciesClassifier<I>,
    {
        let (_permit, mut pipeline) = self.admit()?;
        Ok(pipeline.try_process_frame(raw, image)?)
    }

    /// Frames rejected because the pipeline was busy.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Runs `f` against the pipeline, waiting for any in-flight frame.
    /// Frames submitted while `f` runs are dropped.
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&mut BirdPipeline<C, K>) -> R) -> R {
        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut pipeline)
    }

    #[must_use]
    pub fn into_inner(self) -> BirdPipeline<C, K> {
        self.pipeline
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Poison is ignored: a classifier panic leaves the history usable.
    fn admit(&self) -> Result<(SemaphorePermit<'_>, MutexGuard<'_, BirdPipeline<C, K>>), FrameDropped> {
        let admitted = self.permit.try_acquire().ok().and_then(|permit| {
            let pipeline = match self.pipeline.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return None,
            };
            Some((permit, pipeline))
        });

        admitted.ok_or_else(|| {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            counter!("birdwatch.frames.dropped").increment(1);
            debug!(total, "pipeline busy, frame dropped");
            FrameDropped
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::classifier::{Classification, ClassifyError, CropRegion, ImageSize};
    use crate::config::{DecodeConfig, PipelineConfig};
    use crate::tracker::ManualClock;

    const ANCHORS: usize = 2;
    const FEATURES: usize = 6;

    fn config() -> PipelineConfig {
        PipelineConfig {
            decode: DecodeConfig {
                num_anchors: ANCHORS,
                num_features: FEATURES,
                target_class: 1,
                ..DecodeConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    fn one_bird() -> Vec<f32> {
        let mut buf = vec![0.0; ANCHORS * FEATURES];
        for (f, v) in [320.0, 320.0, 120.0, 100.0, 0.0, 0.9].iter().enumerate() {
            buf[f * ANCHORS] = *v;
        }
        buf
    }

    #[test]
    fn test_idle_gate_admits_frames() {
        let classifier = |_: &ImageSize, _: &CropRegion| -> Result<Classification, ClassifyError> {
            Ok(Classification::new("Robin", 0.7))
        };
        let gate = FrameGate::new(BirdPipeline::with_clock(config(), classifier, ManualClock::new(0)));
        let image = ImageSize::new(640, 640);

        assert_eq!(gate.submit(&one_bird(), &image).unwrap().len(), 1);
        assert_eq!(gate.submit(&one_bird(), &image).unwrap().len(), 1);
        assert_eq!(gate.dropped_frames(), 0);
        assert_eq!(gate.with_pipeline(|p| p.frame_count()), 2);
    }

    #[test]
    fn test_malformed_frame_surfaces_through_try_submit() {
        let classifier = |_: &ImageSize, _: &CropRegion| -> Result<Classification, ClassifyError> {
            Ok(Classification::new("Robin", 0.7))
        };
        let gate = FrameGate::new(BirdPipeline::with_clock(config(), classifier, ManualClock::new(0)));
        let err = gate.try_submit(&[0.0; 5], &ImageSize::new(640, 640)).unwrap_err();
        assert!(matches!(err, GateError::Pipeline(_)));
        assert_eq!(gate.into_inner().frame_count(), 1);
    }

    #[test]
    fn test_busy_gate_drops_instead_of_queueing() {
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let classifier = move |_: &ImageSize, _: &CropRegion| -> Result<Classification, ClassifyError> {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            Ok(Classification::new("Robin", 0.7))
        };
        let gate = FrameGate::new(BirdPipeline::with_clock(config(), classifier, ManualClock::new(0)));
        let image = ImageSize::new(640, 640);
        let frame = one_bird();

        thread::scope(|s| {
            let busy = s.spawn(|| gate.submit(&frame, &image));
            entered_rx.recv().unwrap();

            assert_eq!(gate.submit(&frame, &image), Err(FrameDropped));
            assert!(matches!(gate.try_submit(&frame, &image), Err(GateError::Dropped(_))));

            release_tx.send(()).unwrap();
            assert_eq!(busy.join().unwrap().unwrap().len(), 1);
        });

        assert_eq!(gate.dropped_frames(), 2);
        assert_eq!(gate.with_pipeline(|p| p.frame_count()), 1);
    }

    #[test]
    fn test_frames_dropped_while_pipeline_borrowed() {
        let classifier = |_: &ImageSize, _: &CropRegion| -> Result<Classification, ClassifyError> {
            Ok(Classification::new("Robin", 0.7))
        };
        let gate = FrameGate::new(BirdPipeline::with_clock(config(), classifier, ManualClock::new(0)));
        let image = ImageSize::new(640, 640);
        let frame = one_bird();
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let shared = &gate;
            let holder = s.spawn(move || {
                shared.with_pipeline(|p| {
                    let _ = entered_tx.send(());
                    let _ = release_rx.recv();
                    p.reset()
                })
            });
            entered_rx.recv().unwrap();

            assert_eq!(gate.submit(&frame, &image), Err(FrameDropped));
            assert!(matches!(gate.try_submit(&frame, &image), Err(GateError::Dropped(_))));

            release_tx.send(()).unwrap();
            let _ = holder.join().unwrap();
        });

        assert_eq!(gate.dropped_frames(), 2);
        assert_eq!(gate.with_pipeline(|p| p.frame_count()), 0);
        // The failed admission must not leak the permit.
        assert_eq!(gate.submit(&frame, &image).unwrap().len(), 1);
    }
}
