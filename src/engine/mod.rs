//! Cut execution: one external process per stage, progress and cancellation

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{SegcutError, SegcutResult};
use crate::planner::{CutMode, PlannedSegment};
use crate::ports::{CommandSpec, FsPort, ProbePort, ProcessOutput, ProcessRunnerPort};

pub mod concat;
pub mod copy;
pub mod progress;
pub mod smart_cut;

pub use progress::{
    ConsoleProgressSink, JsonProgressSink, NoOpProgressSink, ProgressAggregator, ProgressSink,
    ProgressUpdate,
};

use progress::StageTracker;

/// Where a running stage reports to and listens for cancellation
pub struct StageContext<'a> {
    pub stage: usize,
    pub progress: &'a ProgressAggregator,
    pub cancel: &'a CancellationToken,
}

impl StageContext<'_> {
    /// Report the fraction of this stage
    pub fn report(&self, fraction: f64) {
        self.progress.update(self.stage, fraction);
    }
}

/// Runs planned segments and merges through the process runner
pub struct CutExecutor {
    runner: Arc<dyn ProcessRunnerPort>,
    probe: Arc<dyn ProbePort>,
    fs: Arc<dyn FsPort>,
    ffmpeg_path: String,
    epsilon: f64,
}

impl CutExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunnerPort>,
        probe: Arc<dyn ProbePort>,
        fs: Arc<dyn FsPort>,
        ffmpeg_path: impl Into<String>,
        epsilon: f64,
    ) -> Self {
        Self {
            runner,
            probe,
            fs,
            ffmpeg_path: ffmpeg_path.into(),
            epsilon,
        }
    }

    /// Produce `segment.output_path` from `input`; returns warnings
    pub async fn execute(
        &self,
        input: &Path,
        segment: &PlannedSegment,
        ctx: &StageContext<'_>,
    ) -> SegcutResult<Vec<String>> {
        info!(
            "Cutting {:.3}s - {:.3}s into {}",
            segment.cut_from,
            segment.cut_to,
            segment.output_path.display()
        );

        let warnings = match &segment.mode {
            CutMode::Copy => {
                self.copy_whole(input, segment, ctx).await?;
                Vec::new()
            }
            CutMode::SmartCut { boundary, encoder } => {
                self.smart_cut(input, segment, *boundary, encoder, ctx).await?
            }
        };

        ctx.progress.complete_stage(ctx.stage);
        Ok(warnings)
    }

    /// Stream copy of the whole segment into its output path
    pub(crate) async fn copy_whole(
        &self,
        input: &Path,
        segment: &PlannedSegment,
        ctx: &StageContext<'_>,
    ) -> SegcutResult<ProcessOutput> {
        self.copy_range(
            input,
            segment,
            segment.cut_from,
            segment.cut_to,
            &segment.output_path,
            ctx,
            &|f| ctx.report(f),
        )
        .await
    }

    /// Stream copy `[from, to)` of the segment's streams into `output`
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn copy_range(
        &self,
        input: &Path,
        segment: &PlannedSegment,
        from: f64,
        to: f64,
        output: &Path,
        ctx: &StageContext<'_>,
        report: &(dyn Fn(f64) + Sync),
    ) -> SegcutResult<ProcessOutput> {
        let spec = copy::copy_command(&self.ffmpeg_path, input, from, to, &segment.streams, output);
        self.run_stage(spec, to - from, "copy", ctx, report).await
    }

    /// Spawn `spec`, forward its progress to `report`, and wait for it.
    ///
    /// Cancellation of `ctx.cancel` is forwarded to the process.
    pub(crate) async fn run_stage(
        &self,
        spec: CommandSpec,
        expected_duration: f64,
        label: &str,
        ctx: &StageContext<'_>,
        report: &(dyn Fn(f64) + Sync),
    ) -> SegcutResult<ProcessOutput> {
        if ctx.cancel.is_cancelled() {
            return Err(SegcutError::Cancelled);
        }
        debug!("Running {}", spec);

        let mut handle = self.runner.run(spec).await?;
        let process_token = handle.cancel_token();
        let cancel = ctx.cancel.clone();
        let forwarder = tokio::spawn(async move {
            cancel.cancelled().await;
            process_token.cancel();
        });

        let mut tracker = StageTracker::new(expected_duration);
        while let Some(line) = handle.next_status_line().await {
            if let Some(fraction) = tracker.observe(&line) {
                report(fraction);
            }
        }

        let output = handle.wait().await;
        forwarder.abort();
        output?.into_result(&format!("{} (stage {})", label, ctx.stage + 1))
    }
}

/// Scratch directory next to `output`, removed when dropped
pub(crate) fn work_dir_near(output: &Path) -> SegcutResult<tempfile::TempDir> {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tempfile::Builder::new()
        .prefix(".segcut-")
        .tempdir_in(parent)
        .map_err(|e| SegcutError::from_io(e, parent))
}
