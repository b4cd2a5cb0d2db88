//! On-demand keyframe lookup around a point in time

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::ValueEnum;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::model::Segment;
use crate::domain::store::BoundsUpdate;
use crate::error::{SegcutError, SegcutResult};
use crate::ports::{ProbePort, TimeWindow};

/// Default half-width of the first lookup window (seconds)
pub const DEFAULT_WINDOW_SECS: f64 = 5.0;

/// Default tolerance for treating a time as sitting on a keyframe (seconds)
pub const DEFAULT_EPSILON: f64 = 0.001;

/// Which keyframe to pick relative to the requested time
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyframeMode {
    Nearest,
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RangeKey {
    path: PathBuf,
    stream: usize,
    start_ms: i64,
    end_ms: i64,
}

impl RangeKey {
    fn new(path: &Path, stream: usize, window: TimeWindow) -> Self {
        Self {
            path: path.to_path_buf(),
            stream,
            start_ms: (window.start * 1000.0).round() as i64,
            end_ms: (window.end * 1000.0).round() as i64,
        }
    }
}

/// Keyframe index with a per-range cache and bounded concurrent reads
pub struct KeyframeIndex {
    probe: Arc<dyn ProbePort>,
    window: f64,
    epsilon: f64,
    permits: Semaphore,
    cache: Mutex<HashMap<RangeKey, Arc<Vec<f64>>>>,
}

impl KeyframeIndex {
    /// Create an index reading packets through `probe`
    pub fn new(probe: Arc<dyn ProbePort>) -> Self {
        Self {
            probe,
            window: DEFAULT_WINDOW_SECS,
            epsilon: DEFAULT_EPSILON,
            permits: Semaphore::new(default_concurrency()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Set the half-width of the first lookup window
    pub fn with_window(mut self, seconds: f64) -> Self {
        self.window = seconds;
        self
    }

    /// Set the keyframe coincidence tolerance
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Limit concurrent packet reads
    pub fn with_concurrency(mut self, permits: usize) -> Self {
        self.permits = Semaphore::new(permits.max(1));
        self
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Keyframe near `time`; the window is doubled once before giving up
    pub async fn near_keyframe(
        &self,
        path: &Path,
        stream: usize,
        time: f64,
        mode: KeyframeMode,
    ) -> SegcutResult<Option<f64>> {
        let mut radius = self.window;
        for _ in 0..2 {
            let window = TimeWindow::around(time, radius);
            let keyframes = self.load(path, stream, window).await?;
            if let Some(found) = pick(&keyframes, time, mode, self.epsilon) {
                debug!(time, found, ?mode, "Keyframe found");
                return Ok(Some(found));
            }
            radius *= 2.0;
        }

        debug!(time, ?mode, "No keyframe within {:.1}s", radius / 2.0);
        Ok(None)
    }

    /// Whether `time` coincides with a keyframe within epsilon
    pub async fn is_on_keyframe(&self, path: &Path, stream: usize, time: f64) -> SegcutResult<bool> {
        let nearest = self
            .near_keyframe(path, stream, time, KeyframeMode::Nearest)
            .await?;
        Ok(nearest.is_some_and(|k| (k - time).abs() <= self.epsilon))
    }

    /// Keyframe-snapped bounds for every segment with at least one resolved bound.
    ///
    /// Segments whose snapped bounds would collapse keep their bounds and are
    /// reported through a warning instead. Open bounds are judged as `0` and
    /// `duration`.
    pub async fn align_boundaries(
        &self,
        path: &Path,
        stream: usize,
        segments: &[Segment],
        duration: Option<f64>,
        mode: KeyframeMode,
    ) -> SegcutResult<Vec<BoundsUpdate>> {
        let mut updates = Vec::new();

        for seg in segments {
            if seg.is_placeholder() {
                continue;
            }
            let start = match seg.start {
                Some(t) => Some(self.near_keyframe(path, stream, t, mode).await?.unwrap_or(t)),
                None => None,
            };
            let end = match seg.end {
                Some(t) => Some(self.near_keyframe(path, stream, t, mode).await?.unwrap_or(t)),
                None => None,
            };

            if let Some(e) = end.or(duration) {
                if start.unwrap_or(0.0) >= e {
                    warn!("Aligning {} would collapse it; keeping its bounds", seg.id);
                    continue;
                }
            }
            updates.push(BoundsUpdate {
                id: seg.id,
                start,
                end,
            });
        }

        Ok(updates)
    }

    /// Number of cached ranges
    pub fn cached_ranges(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn load(&self, path: &Path, stream: usize, window: TimeWindow) -> SegcutResult<Arc<Vec<f64>>> {
        let key = RangeKey::new(path, stream, window);
        if let Some(hit) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(Arc::clone(hit));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SegcutError::Cancelled)?;
        let keyframes = Arc::new(self.probe.read_keyframes(path, stream, window).await?);

        // Concurrent readers of the same range may race here; the last one wins
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&keyframes));
        Ok(keyframes)
    }
}

/// `min(num_cpus, 4)`
pub fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// Pick a keyframe from a sorted list.
///
/// `Before` accepts `k <= t + eps`, `After` accepts `k >= t - eps`, `Nearest`
/// takes the closest and prefers the earlier one on ties.
pub fn pick(keyframes: &[f64], time: f64, mode: KeyframeMode, epsilon: f64) -> Option<f64> {
    match mode {
        KeyframeMode::Before => keyframes
            .iter()
            .copied()
            .filter(|k| *k <= time + epsilon)
            .last(),
        KeyframeMode::After => keyframes.iter().copied().find(|k| *k >= time - epsilon),
        KeyframeMode::Nearest => keyframes.iter().copied().fold(None, |best, k| match best {
            Some(b) if (b - time).abs() <= (k - time).abs() => Some(b),
            _ => Some(k),
        }),
    }
}
