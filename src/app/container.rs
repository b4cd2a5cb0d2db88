use std::sync::Arc;

use crate::adapters::{FfprobeAdapter, LocalFsAdapter, TokioProcessRunner};
use crate::app::{
    batch_interactor::BatchConvertInteractor, export_interactor::ExportInteractor,
    export_interactor::ExportLock, inspect_interactor::InspectInteractor,
};
use crate::config::AppConfig;
use crate::engine::{CutExecutor, ProgressSink};
use crate::error::SegcutResult;
use crate::planner::{ExportPlanner, KeyframeIndex};
use crate::ports::{FsPort, ProbePort, ProcessRunnerPort};

pub trait AppContainer: Send + Sync {
    fn export_interactor(&self) -> Arc<ExportInteractor>;
    fn inspect_interactor(&self) -> Arc<InspectInteractor>;
    fn batch_interactor(&self) -> Arc<BatchConvertInteractor>;
}

pub struct DefaultAppContainer {
    export_interactor: Arc<ExportInteractor>,
    inspect_interactor: Arc<InspectInteractor>,
    batch_interactor: Arc<BatchConvertInteractor>,
}

impl DefaultAppContainer {
    /// Wire the production adapters
    pub fn new(config: &AppConfig, sink: Arc<dyn ProgressSink>) -> SegcutResult<Self> {
        config.validate()?;
        let runner: Arc<dyn ProcessRunnerPort> =
            Arc::new(TokioProcessRunner::new(config.cancel_grace()));
        let probe: Arc<dyn ProbePort> = Arc::new(FfprobeAdapter::new(
            Arc::clone(&runner),
            config.ffprobe_path.clone(),
        ));
        let fs: Arc<dyn FsPort> = Arc::new(LocalFsAdapter::new());
        Ok(Self::with_ports(config, runner, probe, fs, sink))
    }

    /// Wire the given ports; one export lock is shared by every interactor
    pub fn with_ports(
        config: &AppConfig,
        runner: Arc<dyn ProcessRunnerPort>,
        probe_port: Arc<dyn ProbePort>,
        fs_port: Arc<dyn FsPort>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let keyframes = Arc::new(
            KeyframeIndex::new(Arc::clone(&probe_port))
                .with_window(config.keyframe_window_secs)
                .with_epsilon(config.keyframe_epsilon)
                .with_concurrency(config.keyframe_concurrency),
        );
        let planner = Arc::new(ExportPlanner::new(Arc::clone(&keyframes)));
        let executor = Arc::new(CutExecutor::new(
            runner,
            Arc::clone(&probe_port),
            Arc::clone(&fs_port),
            config.ffmpeg_path.clone(),
            config.keyframe_epsilon,
        ));
        let lock = Arc::new(ExportLock::new());

        let export_interactor = Arc::new(ExportInteractor::new(
            Arc::clone(&probe_port),
            Arc::clone(&fs_port),
            planner,
            executor,
            lock,
            sink,
        ));

        let inspect_interactor = Arc::new(InspectInteractor::new(
            Arc::clone(&probe_port),
            Arc::clone(&fs_port),
            keyframes,
        ));

        let batch_interactor = Arc::new(BatchConvertInteractor::new(
            fs_port,
            Arc::clone(&export_interactor),
        ));

        Self {
            export_interactor,
            inspect_interactor,
            batch_interactor,
        }
    }
}

impl AppContainer for DefaultAppContainer {
    fn export_interactor(&self) -> Arc<ExportInteractor> {
        Arc::clone(&self.export_interactor)
    }

    fn inspect_interactor(&self) -> Arc<InspectInteractor> {
        Arc::clone(&self.inspect_interactor)
    }

    fn batch_interactor(&self) -> Arc<BatchConvertInteractor> {
        Arc::clone(&self.batch_interactor)
    }
}
