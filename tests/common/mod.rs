//! In-memory ports for driving the export pipeline without ffmpeg

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use segcut::domain::model::{MediaInfo, StreamInfo, StreamKind, Timebase};
use segcut::engine::{ProgressSink, ProgressUpdate};
use segcut::ports::{
    CommandSpec, ProbePort, ProcessHandle, ProcessOutput, ProcessRunnerPort, TimeWindow,
};
use segcut::{SegcutError, SegcutResult};

/// What the mock runner does for one call, by zero-based call number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behaviour {
    Succeed,
    /// Exit with status 1 and the given stderr line
    Fail(&'static str),
    /// Emit one progress line, then wait for cancellation
    Block,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Records every command and writes its output file (the last argument)
#[derive(Default)]
pub struct MockRunner {
    pub commands: Mutex<Vec<CommandSpec>>,
    behaviours: Mutex<HashMap<usize, Behaviour>>,
    /// Notified when a blocking call has started
    pub blocked: Arc<Notify>,
    /// Runs after each successful call has written its output
    after_success: Mutex<Option<Hook>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_call(self, call: usize, behaviour: Behaviour) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(call, behaviour);
        self
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    pub fn set_after_success(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.after_success.lock().unwrap() = Some(Arc::new(hook));
    }
}

fn requested_duration(spec: &CommandSpec) -> Option<f64> {
    spec.args
        .iter()
        .position(|a| a == "-t")
        .and_then(|i| spec.args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl ProcessRunnerPort for MockRunner {
    async fn run(&self, spec: CommandSpec) -> SegcutResult<ProcessHandle> {
        let call = {
            let mut commands = self.commands.lock().unwrap();
            commands.push(spec.clone());
            commands.len() - 1
        };
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(&call)
            .copied()
            .unwrap_or(Behaviour::Succeed);

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let blocked = Arc::clone(&self.blocked);
        let output = spec.args.last().map(PathBuf::from);
        let duration = requested_duration(&spec);
        let after_success = self.after_success.lock().unwrap().clone();

        let completion = tokio::spawn(async move {
            if let Some(t) = duration {
                let _ = tx
                    .send(format!("out_time_us={}", (t * 0.5 * 1_000_000.0) as i64))
                    .await;
            }
            match behaviour {
                Behaviour::Succeed => {
                    if let Some(t) = duration {
                        let _ = tx
                            .send(format!("out_time_us={}", (t * 1_000_000.0) as i64))
                            .await;
                    }
                    let _ = tx.send("progress=end".to_string()).await;
                    if let Some(path) = output {
                        if let Err(e) = tokio::fs::write(&path, b"media").await {
                            return Err(SegcutError::Io(e));
                        }
                    }
                    if let Some(hook) = after_success {
                        hook();
                    }
                    Ok(ProcessOutput {
                        exit_code: Some(0),
                        ..Default::default()
                    })
                }
                Behaviour::Fail(line) => Ok(ProcessOutput {
                    exit_code: Some(1),
                    stderr_tail: vec![line.to_string()],
                    ..Default::default()
                }),
                Behaviour::Block => {
                    blocked.notify_one();
                    token.cancelled().await;
                    Ok(ProcessOutput {
                        exit_code: None,
                        cancelled: true,
                        ..Default::default()
                    })
                }
            }
        });

        Ok(ProcessHandle::new(rx, completion, cancel))
    }
}

/// Probe answering with fixed media info and keyframes
pub struct MockProbe {
    pub media: MediaInfo,
    pub keyframes: Vec<f64>,
    pub durations: Mutex<HashMap<PathBuf, f64>>,
    /// Video timebase reported for produced files, by file stem
    pub video_time_bases: Mutex<HashMap<String, Timebase>>,
    pub keyframe_reads: Mutex<usize>,
}

impl MockProbe {
    pub fn new(media: MediaInfo, keyframes: Vec<f64>) -> Self {
        Self {
            media,
            keyframes,
            durations: Mutex::new(HashMap::new()),
            video_time_bases: Mutex::new(HashMap::new()),
            keyframe_reads: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ProbePort for MockProbe {
    async fn probe(&self, path: &Path) -> SegcutResult<MediaInfo> {
        if path == self.media.path {
            return Ok(self.media.clone());
        }
        // Produced files share the input's streams
        let duration = self.durations.lock().unwrap().get(path).copied().unwrap_or(5.0);
        let mut media = MediaInfo {
            path: path.to_path_buf(),
            duration: Some(duration),
            ..self.media.clone()
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(time_base) = self.video_time_bases.lock().unwrap().get(&stem) {
            if let Some(video) = media.streams.iter_mut().find(|s| s.kind == StreamKind::Video) {
                video.time_base = Some(*time_base);
            }
        }
        Ok(media)
    }

    async fn read_keyframes(
        &self,
        _path: &Path,
        _stream_index: usize,
        window: TimeWindow,
    ) -> SegcutResult<Vec<f64>> {
        *self.keyframe_reads.lock().unwrap() += 1;
        Ok(self
            .keyframes
            .iter()
            .copied()
            .filter(|k| *k >= window.start && *k < window.end)
            .collect())
    }
}

/// Sink keeping every reported fraction
#[derive(Default)]
pub struct RecordingSink {
    pub fractions: Mutex<Vec<f64>>,
    pub completed: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub cancelled: Mutex<bool>,
}

impl ProgressSink for RecordingSink {
    fn on_start(&self, _input: &str, _total_stages: usize) {}

    fn on_progress(&self, update: &ProgressUpdate) {
        self.fractions.lock().unwrap().push(update.fraction);
    }

    fn on_complete(&self, outputs: &[String]) {
        self.completed.lock().unwrap().extend(outputs.iter().cloned());
    }

    fn on_error(&self, error: &str) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn on_cancel(&self) {
        *self.cancelled.lock().unwrap() = true;
    }
}

/// 40 s h264 + aac input living at `path`
pub fn sample_media(path: &Path) -> MediaInfo {
    let mut video = StreamInfo::new(0, StreamKind::Video, "h264");
    video.time_base = Some(Timebase { num: 1, den: 15360 });
    video.bit_rate = Some(2_000_000);
    video.pix_fmt = Some("yuv420p".to_string());
    let mut audio = StreamInfo::new(1, StreamKind::Audio, "aac");
    audio.time_base = Some(Timebase { num: 1, den: 48000 });

    MediaInfo {
        path: path.to_path_buf(),
        duration: Some(40.0),
        format_name: "matroska,webm".to_string(),
        bit_rate: Some(2_200_000),
        streams: vec![video, audio],
        format_tags: Default::default(),
    }
}
