use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StabilityConfig;
use crate::decode::{Candidate, LocationKey};

/// Milliseconds on whatever clock the pipeline was given.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

impl TimestampMs {
    /// Milliseconds elapsed since `earlier`; zero if the clock went backwards.
    #[must_use]
    pub fn saturating_since(self, earlier: TimestampMs) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

/// Wall clock, milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> TimestampMs {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        TimestampMs(ms)
    }
}

/// Hand-driven clock for tests and offline replay. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(self.ms.load(Ordering::SeqCst))
    }
}

/// What the pipeline remembers about one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionHistory {
    recent: VecDeque<f32>,
    consecutive_sightings: u32,
    last_seen: TimestampMs,
}

impl DetectionHistory {
    fn new(now: TimestampMs, window: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(window + 1),
            consecutive_sightings: 0,
            last_seen: now,
        }
    }

    /// Appends a sample, evicting the oldest beyond `window`.
    fn record(&mut self, confidence: f32, now: TimestampMs, window: usize) {
        self.recent.push_back(confidence);
        while self.recent.len() > window {
            self.recent.pop_front();
        }
        self.consecutive_sightings = self.consecutive_sightings.saturating_add(1);
        self.last_seen = now;
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_confidence(&self) -> f32 {
        if self.recent.is_empty() {
            return 0.0;
        }
        self.recent.iter().sum::<f32>() / self.recent.len() as f32
    }

    #[must_use]
    pub fn is_stable(&self, config: &StabilityConfig) -> bool {
        self.recent.len() >= config.min_samples
            && self.mean_confidence() >= config.confidence_threshold
            && self.consecutive_sightings >= config.min_consecutive_frames
    }

    #[must_use]
    pub fn samples(&self) -> &VecDeque<f32> {
        &self.recent
    }

    #[must_use]
    pub fn consecutive_sightings(&self) -> u32 {
        self.consecutive_sightings
    }

    #[must_use]
    pub fn last_seen(&self) -> TimestampMs {
        self.last_seen
    }
}

/// Cross-frame memory: one [`DetectionHistory`] per [`LocationKey`].
///
/// Single writer only; the pipeline owns it and passes it to the tracker
/// functions explicitly.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: HashMap<LocationKey, DetectionHistory>,
}

impl HistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &LocationKey) -> Option<&DetectionHistory> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stability verdict for a key; unknown keys are never stable.
    #[must_use]
    pub fn is_stable(&self, key: &LocationKey, config: &StabilityConfig) -> bool {
        self.entries
            .get(key)
            .is_some_and(|h| h.is_stable(config))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocationKey, &DetectionHistory)> {
        self.entries.iter()
    }
}

/// Records every candidate in `store` and boosts those whose cell is stable.
///
/// The bonus is applied to the current candidate only, after its own sample
/// has been recorded, and is clamped at 1.0. Two candidates in the same cell
/// in one frame both feed that cell's history.
#[must_use]
pub fn update(
    mut candidates: Vec<Candidate>,
    store: &mut HistoryStore,
    now: TimestampMs,
    config: &StabilityConfig,
) -> Vec<Candidate> {
    for candidate in &mut candidates {
        let history = match store.entries.entry(candidate.location_key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                debug!(key = %candidate.location_key, "new location history");
                e.insert(DetectionHistory::new(now, config.window_size))
            }
        };

        history.record(candidate.confidence, now, config.window_size);

        if history.is_stable(config) {
            candidate.confidence = (candidate.confidence + config.bonus).min(1.0);
            debug!(
                key = %candidate.location_key,
                confidence = candidate.confidence,
                "temporal stability bonus applied"
            );
        }
    }
    candidates
}

/// Drops every history not seen for more than `max_age_ms`. Returns how many went.
pub fn cleanup(store: &mut HistoryStore, now: TimestampMs, config: &StabilityConfig) -> usize {
    let before = store.entries.len();
    store
        .entries
        .retain(|_, h| now.saturating_since(h.last_seen) <= config.max_age_ms);
    let removed = before - store.entries.len();
    debug!(removed, remaining = store.entries.len(), "history cleanup");
    removed
}
