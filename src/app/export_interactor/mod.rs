// Export interactor - Orchestrates the segment export use case

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::model::Segment;
use crate::domain::timeline;
use crate::engine::{CutExecutor, ProgressAggregator, ProgressSink, StageContext};
use crate::error::{ResourceKind, SegcutError, SegcutResult};
use crate::planner::{ExportPlan, ExportPlanner, ExportSettings};
use crate::ports::{FsPort, ProbePort};

/// Observable state of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportState {
    Idle,
    Planning,
    /// Running cut stage `stage` (zero-based) of `total`
    Executing { stage: usize, total: usize },
    Merging,
    Done,
    Failed,
    Cancelled,
}

impl ExportState {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ExportState::Planning | ExportState::Executing { .. } | ExportState::Merging
        )
    }
}

/// Application-wide exclusive right to run an export
#[derive(Debug, Default)]
pub struct ExportLock {
    inner: Arc<tokio::sync::Mutex<()>>,
}

/// Held for the lifetime of one export; released on drop
#[derive(Debug)]
pub struct ExportToken {
    _guard: OwnedMutexGuard<()>,
}

impl ExportLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock without waiting
    pub fn try_acquire(&self) -> SegcutResult<ExportToken> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .map(|guard| ExportToken { _guard: guard })
            .map_err(|_| SegcutError::ExportInProgress)
    }

    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Export request
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub input: PathBuf,
    /// Segments in user order
    pub segments: Vec<Segment>,
    /// Export the gaps between the enabled segments instead
    pub invert: bool,
    pub settings: ExportSettings,
    pub overwrite: bool,
}

/// Export response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResponse {
    pub output_paths: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Interactor for the export use case
pub struct ExportInteractor {
    probe_port: Arc<dyn ProbePort>,
    fs_port: Arc<dyn FsPort>,
    planner: Arc<ExportPlanner>,
    executor: Arc<CutExecutor>,
    lock: Arc<ExportLock>,
    sink: Arc<dyn ProgressSink>,
    state: watch::Sender<ExportState>,
    cancel: Mutex<CancellationToken>,
}

impl ExportInteractor {
    /// Create new export interactor with injected ports
    pub fn new(
        probe_port: Arc<dyn ProbePort>,
        fs_port: Arc<dyn FsPort>,
        planner: Arc<ExportPlanner>,
        executor: Arc<CutExecutor>,
        lock: Arc<ExportLock>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let (state, _) = watch::channel(ExportState::Idle);
        Self {
            probe_port,
            fs_port,
            planner,
            executor,
            lock,
            sink,
            state,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ExportState {
        *self.state.borrow()
    }

    /// Cancel the running stage; only accepted while executing or merging.
    ///
    /// An accepted request always ends the export as cancelled, even when the
    /// last stage has already finished.
    pub fn cancel(&self) -> bool {
        let token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        match self.state() {
            ExportState::Executing { .. } | ExportState::Merging => {
                info!("Cancelling export");
                token.cancel();
                true
            }
            other => {
                warn!("Ignoring cancel request in state {:?}", other);
                false
            }
        }
    }

    /// Run one export end to end
    pub async fn export_segments(&self, request: ExportRequest) -> SegcutResult<ExportResponse> {
        let _token = self.lock.try_acquire()?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = cancel.clone();
        self.transition(ExportState::Planning);
        info!("Starting export of {}", request.input.display());

        let result = self.run(request, &cancel).await;
        match &result {
            Ok(response) => {
                info!(
                    "Export completed: {} file(s) written",
                    response.output_paths.len()
                );
            }
            Err(e) if e.is_cancelled() => {
                self.transition(ExportState::Cancelled);
                self.sink.on_cancel();
                info!("Export cancelled; produced files were kept");
            }
            Err(e) => {
                self.transition(ExportState::Failed);
                self.sink.on_error(&e.to_string());
                warn!("Export failed: {}", e);
            }
        }
        result
    }

    async fn run(&self, request: ExportRequest, cancel: &CancellationToken) -> SegcutResult<ExportResponse> {
        if !self.fs_port.exists(&request.input).await {
            return Err(SegcutError::resource(
                ResourceKind::NotFound,
                format!("Input file does not exist: {}", request.input.display()),
            ));
        }

        let media = self.probe_port.probe(&request.input).await?;
        let (outputs, mut warnings) =
            timeline::output_segments(&request.segments, media.duration, request.invert)?;
        let plan = self.planner.plan(&media, &outputs, &request.settings).await?;
        warnings.extend(plan.warnings.iter().cloned());

        self.preflight(&plan, &request).await?;

        let progress = ProgressAggregator::for_plan(&plan, Arc::clone(&self.sink));
        self.sink
            .on_start(&plan.input.to_string_lossy(), progress.total_stages());

        let total = plan.segments.len();
        let mut completed: Vec<PathBuf> = Vec::with_capacity(total);

        for (stage, segment) in plan.segments.iter().enumerate() {
            self.transition(ExportState::Executing { stage, total });
            let ctx = StageContext {
                stage,
                progress: &progress,
                cancel,
            };

            let outcome = match self.fs_port.ensure_writable_dir(&request.settings.output_dir).await {
                Ok(()) => self.executor.execute(&plan.input, segment, &ctx).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(stage_warnings) => {
                    warnings.extend(stage_warnings);
                    completed.push(segment.output_path.clone());
                }
                Err(e) => return Err(stage_failed(stage, &completed, e)),
            }
        }

        let output_paths = match &plan.merge {
            Some(step) => {
                self.transition(ExportState::Merging);
                let ctx = StageContext {
                    stage: total,
                    progress: &progress,
                    cancel,
                };
                let titles: Vec<String> = plan.segments.iter().map(|s| s.output.name.clone()).collect();

                let outcome = match self.fs_port.ensure_writable_dir(&request.settings.output_dir).await {
                    Ok(()) => self.executor.merge(step, &completed, &titles, &ctx).await,
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(merge_warnings) => warnings.extend(merge_warnings),
                    Err(e) => return Err(stage_failed(total, &completed, e)),
                }

                if step.delete_intermediates {
                    vec![step.output_path.clone()]
                } else {
                    completed.push(step.output_path.clone());
                    completed
                }
            }
            None => completed,
        };

        self.settle(cancel)?;
        progress.finish();
        let written: Vec<String> = output_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        self.sink.on_complete(&written);

        Ok(ExportResponse {
            output_paths,
            warnings,
        })
    }

    /// Writable output directory and no unintended overwrite, before any process runs
    async fn preflight(&self, plan: &ExportPlan, request: &ExportRequest) -> SegcutResult<()> {
        let output_dir = &request.settings.output_dir;
        self.fs_port.create_dir_all(output_dir).await?;
        self.fs_port.ensure_writable_dir(output_dir).await?;

        if !request.overwrite {
            for target in plan.target_paths() {
                if self.fs_port.exists(&target).await {
                    return Err(SegcutError::resource(
                        ResourceKind::OutputExists,
                        format!(
                            "{} already exists; enable overwrite to replace it",
                            target.display()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Move to `Done` unless a cancel was accepted; `cancel` reads the state
    /// under the same lock
    fn settle(&self, cancel: &CancellationToken) -> SegcutResult<()> {
        let _slot = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if cancel.is_cancelled() {
            return Err(SegcutError::Cancelled);
        }
        self.transition(ExportState::Done);
        Ok(())
    }

    fn transition(&self, next: ExportState) {
        self.state.send_replace(next);
    }
}

/// Wrap a stage error with the outputs already on disk; cancellation passes through
fn stage_failed(stage: usize, completed: &[PathBuf], error: SegcutError) -> SegcutError {
    if error.is_cancelled() {
        return error;
    }
    SegcutError::StageFailed {
        stage,
        completed: completed.to_vec(),
        source: Box::new(error),
    }
}
