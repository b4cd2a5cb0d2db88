// Inspect interactor - Media inspection and keyframe lookups

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::model::{MediaInfo, Segment, StreamKind, TimeSpec};
use crate::domain::store::BoundsUpdate;
use crate::error::{ResourceKind, SegcutError, SegcutResult};
use crate::planner::{KeyframeIndex, KeyframeMode};
use crate::ports::{FsPort, ProbePort};
use crate::utils::format_bit_rate;

/// Result of one keyframe lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyframeLookup {
    pub time: f64,
    pub keyframe: Option<f64>,
}

/// Interactor for media inspection
pub struct InspectInteractor {
    probe_port: Arc<dyn ProbePort>,
    fs_port: Arc<dyn FsPort>,
    keyframes: Arc<KeyframeIndex>,
}

impl InspectInteractor {
    /// Create new inspect interactor with injected ports
    pub fn new(
        probe_port: Arc<dyn ProbePort>,
        fs_port: Arc<dyn FsPort>,
        keyframes: Arc<KeyframeIndex>,
    ) -> Self {
        Self {
            probe_port,
            fs_port,
            keyframes,
        }
    }

    /// Probe `input`
    pub async fn inspect(&self, input: &Path) -> SegcutResult<MediaInfo> {
        info!("Inspecting {}", input.display());
        self.require_file(input).await?;
        let media = self.probe_port.probe(input).await?;
        debug!("{} stream(s) found", media.streams.len());
        Ok(media)
    }

    /// Look up keyframes near each of `times` concurrently.
    ///
    /// Lookups share the keyframe index and its concurrency bound; triggering
    /// `cancel` aborts the ones still pending. Results keep the order of `times`.
    pub async fn keyframes_near(
        &self,
        input: &Path,
        stream: Option<usize>,
        times: &[f64],
        mode: KeyframeMode,
        cancel: &CancellationToken,
    ) -> SegcutResult<Vec<KeyframeLookup>> {
        let media = self.inspect(input).await?;
        let stream = match stream {
            Some(index) => media
                .stream(index)
                .filter(|s| s.kind == StreamKind::Video)
                .map(|s| s.index)
                .ok_or_else(|| {
                    SegcutError::validation(format!("stream {} is not a video stream", index))
                })?,
            None => media
                .primary_video_stream()
                .map(|s| s.index)
                .ok_or_else(|| SegcutError::validation("no video stream to read keyframes from"))?,
        };

        let mut tasks = JoinSet::new();
        for (slot, time) in times.iter().copied().enumerate() {
            let index = Arc::clone(&self.keyframes);
            let path: PathBuf = input.to_path_buf();
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => (slot, Err(SegcutError::Cancelled)),
                    found = index.near_keyframe(&path, stream, time, mode) => (slot, found),
                }
            });
        }

        let mut results = vec![None; times.len()];
        while let Some(joined) = tasks.join_next().await {
            let (slot, found) = joined.map_err(|e| SegcutError::Io(std::io::Error::other(e)))?;
            results[slot] = Some(KeyframeLookup {
                time: times[slot],
                keyframe: found?,
            });
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Keyframe-snapped bounds for `segments` on the primary video stream
    pub async fn align_segments(
        &self,
        input: &Path,
        segments: &[Segment],
        mode: KeyframeMode,
    ) -> SegcutResult<Vec<BoundsUpdate>> {
        let media = self.inspect(input).await?;
        let stream = media
            .primary_video_stream()
            .map(|s| s.index)
            .ok_or_else(|| SegcutError::validation("no video stream to align to"))?;
        self.keyframes
            .align_boundaries(input, stream, segments, media.duration, mode)
            .await
    }

    /// Human-readable summary
    pub fn format_as_text(&self, media: &MediaInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Media File Information:");
        let _ = writeln!(output, "  File: {}", media.path.display());
        let _ = writeln!(output, "  Container: {}", media.format_name);
        match media.duration {
            Some(d) => {
                let _ = writeln!(output, "  Duration: {} ({:.3}s)", TimeSpec::from_seconds(d), d);
            }
            None => {
                let _ = writeln!(output, "  Duration: unknown");
            }
        }
        if let Some(bit_rate) = media.bit_rate {
            let _ = writeln!(output, "  Bitrate: {}", format_bit_rate(bit_rate));
        }

        let _ = writeln!(output, "\nStreams ({}):", media.streams.len());
        for stream in &media.streams {
            let mut line = format!("  #{} {:?} {}", stream.index, stream.kind, stream.codec_name);
            if let (Some(w), Some(h)) = (stream.width, stream.height) {
                let _ = write!(line, " {}x{}", w, h);
            }
            if let Some(rate) = stream.sample_rate {
                let _ = write!(line, " {} Hz", rate);
            }
            if let Some(channels) = stream.channels {
                let _ = write!(line, " {}ch", channels);
            }
            if let Some(tb) = stream.time_base {
                let _ = write!(line, " tb={}", tb);
            }
            if let Some(lang) = stream.tags.get("language") {
                let _ = write!(line, " [{}]", lang);
            }
            if stream.attached_pic {
                line.push_str(" (cover art)");
            }
            let _ = writeln!(output, "{}", line);
        }
        output
    }

    /// Pretty JSON
    pub fn format_as_json(&self, media: &MediaInfo) -> SegcutResult<String> {
        serde_json::to_string_pretty(media).map_err(|e| SegcutError::Validation {
            message: format!("JSON serialization failed: {}", e),
        })
    }

    async fn require_file(&self, input: &Path) -> SegcutResult<()> {
        if self.fs_port.exists(input).await {
            Ok(())
        } else {
            Err(SegcutError::resource(
                ResourceKind::NotFound,
                format!("Input file does not exist: {}", input.display()),
            ))
        }
    }
}
