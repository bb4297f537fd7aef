use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use birdwatch::{
    BirdPipeline, Classification, ClassifyError, CropRegion, DecodeConfig, FrameDropped, FrameGate,
    ImageSize, ManualClock, PipelineConfig,
};

const ANCHORS: usize = 4;
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

fn frame() -> Vec<f32> {
    let mut buf = vec![0.0; ANCHORS * FEATURES];
    for (f, v) in [320.0, 320.0, 120.0, 100.0, 0.0, 0.9].iter().enumerate() {
        buf[f * ANCHORS] = *v;
    }
    buf
}

fn slow_robin(_: &ImageSize, _: &CropRegion) -> Result<Classification, ClassifyError> {
    thread::sleep(Duration::from_millis(20));
    Ok(Classification::new("Robin", 0.7))
}

#[test]
fn test_concurrent_producers_never_queue() {
    const PRODUCERS: usize = 8;

    let gate = FrameGate::new(BirdPipeline::with_clock(config(), slow_robin, ManualClock::new(0)));
    let barrier = Barrier::new(PRODUCERS);
    let accepted = AtomicU64::new(0);
    let image = ImageSize::new(640, 640);
    let raw = frame();

    thread::scope(|s| {
        for _ in 0..PRODUCERS {
            s.spawn(|| {
                barrier.wait();
                match gate.submit(&raw, &image) {
                    Ok(out) => {
                        assert_eq!(out.len(), 1);
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(FrameDropped) => {}
                }
            });
        }
    });

    let accepted = accepted.load(Ordering::SeqCst);
    assert!(accepted >= 1);
    assert_eq!(accepted + gate.dropped_frames(), PRODUCERS as u64);
    assert_eq!(gate.into_inner().frame_count(), accepted);
}
