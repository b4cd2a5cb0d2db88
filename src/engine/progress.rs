//! Progress tracking across the stages of an export

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::planner::ExportPlan;

/// Overall fraction reported while work remains
const MAX_BEFORE_FINISH: f64 = 0.999;

/// Weight of the merge stage relative to the whole cut workload
const MERGE_WEIGHT: f64 = 1.0;

/// Receives overall progress for UI integration
pub trait ProgressSink: Send + Sync {
    /// Called once before the first stage runs
    fn on_start(&self, input: &str, total_stages: usize);

    /// Called whenever overall progress moves forward
    fn on_progress(&self, update: &ProgressUpdate);

    /// Called when every stage succeeded
    fn on_complete(&self, outputs: &[String]);

    /// Called when a stage failed
    fn on_error(&self, error: &str);

    /// Called when the export was cancelled
    fn on_cancel(&self);
}

/// Snapshot of overall export progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Zero-based index of the running stage
    pub stage: usize,
    pub total_stages: usize,
    /// Overall fraction in `[0, 1]`
    pub fraction: f64,
    pub elapsed: Duration,
    /// Estimated time remaining
    pub eta: Option<Duration>,
}

/// One line of `-progress pipe:1` output, as far as it matters here
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Output position in seconds
    OutTime(f64),
    /// `progress=end`
    End,
}

/// Parse an ffmpeg `-progress` status line.
///
/// `out_time_ms` carries microseconds just like `out_time_us`; `N/A` values
/// yield `None`.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();
    match key.trim() {
        "out_time_us" | "out_time_ms" => value
            .parse::<i64>()
            .ok()
            .filter(|us| *us >= 0)
            .map(|us| ProgressLine::OutTime(us as f64 / 1_000_000.0)),
        "out_time" => parse_clock(value).map(ProgressLine::OutTime),
        "progress" if value == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

/// `HH:MM:SS.micro` to seconds
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Fraction of a single stage, clamped and never decreasing
#[derive(Debug, Clone)]
pub struct StageTracker {
    expected: f64,
    fraction: f64,
}

impl StageTracker {
    pub fn new(expected_duration: f64) -> Self {
        Self {
            expected: expected_duration.max(0.0),
            fraction: 0.0,
        }
    }

    /// Feed one status line; returns the fraction if it moved
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        let next = match parse_progress_line(line)? {
            ProgressLine::End => 1.0,
            ProgressLine::OutTime(t) if self.expected > 0.0 => (t / self.expected).clamp(0.0, 1.0),
            ProgressLine::OutTime(_) => return None,
        };
        if next > self.fraction {
            self.fraction = next;
            Some(next)
        } else {
            None
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }
}

struct AggregatorInner {
    /// Completed fraction per stage
    done: Vec<f64>,
    reported: f64,
    current: usize,
    started: Instant,
}

/// Weighted overall progress over the stages of one plan
#[derive(Clone)]
pub struct ProgressAggregator {
    weights: Arc<Vec<f64>>,
    inner: Arc<Mutex<AggregatorInner>>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressAggregator {
    /// Cut stages weighted by duration, plus one unit for a merge
    pub fn for_plan(plan: &ExportPlan, sink: Arc<dyn ProgressSink>) -> Self {
        let total = plan.total_duration();
        let count = plan.segments.len();
        let mut weights: Vec<f64> = plan
            .segments
            .iter()
            .map(|s| {
                if total > 0.0 {
                    s.duration() / total
                } else {
                    1.0 / count.max(1) as f64
                }
            })
            .collect();
        if plan.merge.is_some() {
            weights.push(MERGE_WEIGHT);
        }
        Self::with_weights(weights, sink)
    }

    pub fn with_weights(weights: Vec<f64>, sink: Arc<dyn ProgressSink>) -> Self {
        let stages = weights.len();
        Self {
            weights: Arc::new(weights),
            inner: Arc::new(Mutex::new(AggregatorInner {
                done: vec![0.0; stages],
                reported: 0.0,
                current: 0,
                started: Instant::now(),
            })),
            sink,
        }
    }

    pub fn total_stages(&self) -> usize {
        self.weights.len()
    }

    /// Record the fraction of `stage`; out-of-order or backwards updates are ignored
    pub fn update(&self, stage: usize, fraction: f64) {
        let update = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(slot) = inner.done.get_mut(stage) else {
                return;
            };
            *slot = slot.max(fraction.clamp(0.0, 1.0));
            inner.current = inner.current.max(stage);

            let overall = (self.weighted(&inner.done)).min(MAX_BEFORE_FINISH);
            if overall <= inner.reported {
                return;
            }
            inner.reported = overall;
            self.snapshot(&inner, overall)
        };
        self.sink.on_progress(&update);
    }

    /// Mark `stage` as fully done
    pub fn complete_stage(&self, stage: usize) {
        self.update(stage, 1.0);
    }

    /// Report exactly 1.0; only called when every stage succeeded
    pub fn finish(&self) {
        let update = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.done.iter_mut().for_each(|d| *d = 1.0);
            inner.reported = 1.0;
            self.snapshot(&inner, 1.0)
        };
        self.sink.on_progress(&update);
    }

    /// Last overall fraction reported
    pub fn overall(&self) -> f64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).reported
    }

    pub fn sink(&self) -> &Arc<dyn ProgressSink> {
        &self.sink
    }

    fn weighted(&self, done: &[f64]) -> f64 {
        let total: f64 = self.weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.weights
            .iter()
            .zip(done)
            .map(|(w, d)| w * d)
            .sum::<f64>()
            / total
    }

    fn snapshot(&self, inner: &AggregatorInner, fraction: f64) -> ProgressUpdate {
        let elapsed = inner.started.elapsed();
        let eta = (fraction > 0.0 && fraction < 1.0)
            .then(|| Duration::from_secs_f64(elapsed.as_secs_f64() * (1.0 - fraction) / fraction));
        ProgressUpdate {
            stage: inner.current,
            total_stages: self.weights.len(),
            fraction,
            elapsed,
            eta,
        }
    }
}

/// Progress bar on stdout for CLI usage
pub struct ConsoleProgressSink {
    verbose: bool,
}

impl ConsoleProgressSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressSink for ConsoleProgressSink {
    fn on_start(&self, input: &str, total_stages: usize) {
        if self.verbose {
            println!("Exporting {} in {} stage(s)", input, total_stages);
        }
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        let percent = update.fraction * 100.0;
        let bar_length = 20;
        let filled = ((update.fraction * bar_length as f64) as usize).min(bar_length);
        let bar = "#".repeat(filled) + &"-".repeat(bar_length - filled);
        match update.eta {
            Some(eta) if self.verbose => println!(
                "[{}] {:>5.1}% stage {}/{} eta {}s",
                bar,
                percent,
                update.stage + 1,
                update.total_stages,
                eta.as_secs()
            ),
            _ => println!("[{}] {:>5.1}%", bar, percent),
        }
    }

    fn on_complete(&self, outputs: &[String]) {
        for output in outputs {
            println!("Wrote {}", output);
        }
    }

    fn on_error(&self, error: &str) {
        eprintln!("Export failed: {}", error);
    }

    fn on_cancel(&self) {
        println!("Export cancelled");
    }
}

/// JSON lines on stdout for structured output
pub struct JsonProgressSink;

impl ProgressSink for JsonProgressSink {
    fn on_start(&self, input: &str, total_stages: usize) {
        let event = serde_json::json!({
            "event": "start",
            "input": input,
            "total_stages": total_stages,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        let event = serde_json::json!({
            "event": "progress",
            "stage": update.stage,
            "total_stages": update.total_stages,
            "fraction": update.fraction,
            "eta_secs": update.eta.map(|d| d.as_secs_f64()),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_complete(&self, outputs: &[String]) {
        let event = serde_json::json!({
            "event": "complete",
            "outputs": outputs,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_error(&self, error: &str) {
        let event = serde_json::json!({
            "event": "error",
            "error": error,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }

    fn on_cancel(&self) {
        let event = serde_json::json!({
            "event": "cancel",
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        println!("{}", event);
    }
}

/// Sink that drops every event
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn on_start(&self, _input: &str, _total_stages: usize) {}
    fn on_progress(&self, _update: &ProgressUpdate) {}
    fn on_complete(&self, _outputs: &[String]) {}
    fn on_error(&self, _error: &str) {}
    fn on_cancel(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        fractions: Mutex<Vec<f64>>,
    }

    impl ProgressSink for Recorder {
        fn on_start(&self, _input: &str, _total_stages: usize) {}
        fn on_progress(&self, update: &ProgressUpdate) {
            self.fractions.lock().unwrap().push(update.fraction);
        }
        fn on_complete(&self, _outputs: &[String]) {}
        fn on_error(&self, _error: &str) {}
        fn on_cancel(&self) {}
    }

    #[test]
    fn test_parse_progress_lines() {
        assert_eq!(
            parse_progress_line("out_time_us=2500000"),
            Some(ProgressLine::OutTime(2.5))
        );
        // ffmpeg reports microseconds under out_time_ms as well
        assert_eq!(
            parse_progress_line("out_time_ms=1000000"),
            Some(ProgressLine::OutTime(1.0))
        );
        assert_eq!(
            parse_progress_line("out_time=00:01:02.500000"),
            Some(ProgressLine::OutTime(62.5))
        );
        assert_eq!(parse_progress_line("out_time=N/A"), None);
        assert_eq!(parse_progress_line("out_time_us=N/A"), None);
        assert_eq!(parse_progress_line("progress=end"), Some(ProgressLine::End));
        assert_eq!(parse_progress_line("progress=continue"), None);
        assert_eq!(parse_progress_line("frame=12"), None);
    }

    #[test]
    fn test_stage_tracker_is_monotonic_and_clamped() {
        let mut tracker = StageTracker::new(10.0);
        assert_eq!(tracker.observe("out_time_us=5000000"), Some(0.5));
        assert_eq!(tracker.observe("out_time_us=3000000"), None);
        assert_eq!(tracker.observe("out_time_us=50000000"), Some(1.0));
        assert_eq!(tracker.fraction(), 1.0);
    }

    #[test]
    fn test_weighted_overall_is_capped_until_finish() {
        let recorder = Arc::new(Recorder::default());
        let aggregator = ProgressAggregator::with_weights(vec![0.25, 0.75, 1.0], recorder.clone());

        aggregator.update(0, 1.0);
        assert!((aggregator.overall() - 0.125).abs() < 1e-9);
        aggregator.update(1, 1.0);
        aggregator.update(2, 1.0);
        assert_eq!(aggregator.overall(), MAX_BEFORE_FINISH);

        aggregator.finish();
        let fractions = recorder.fractions.lock().unwrap();
        assert_eq!(*fractions.last().unwrap(), 1.0);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_backwards_updates_are_dropped() {
        let recorder = Arc::new(Recorder::default());
        let aggregator = ProgressAggregator::with_weights(vec![1.0, 1.0], recorder.clone());
        aggregator.update(0, 0.8);
        aggregator.update(0, 0.2);
        aggregator.update(7, 1.0);
        assert_eq!(recorder.fractions.lock().unwrap().len(), 1);
        assert!((aggregator.overall() - 0.4).abs() < 1e-9);
    }
}
