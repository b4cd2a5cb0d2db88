//! FFprobe-backed implementation of [`ProbePort`]
//!
//! ffprobe runs through the process runner with JSON output; the JSON is
//! decoded into private serde structs and mapped onto the domain model.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::model::{MediaInfo, StreamInfo, StreamKind, Timebase};
use crate::error::{SegcutError, SegcutResult};
use crate::ports::{CommandSpec, ProbePort, ProcessRunnerPort, TimeWindow};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfStream>,
    format: Option<FfFormat>,
}

#[derive(Debug, Deserialize)]
struct FfStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    time_base: Option<String>,
    bit_rate: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    profile: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    #[serde(default)]
    disposition: BTreeMap<String, i64>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfPackets {
    #[serde(default)]
    packets: Vec<FfPacket>,
}

#[derive(Debug, Deserialize)]
struct FfPacket {
    pts_time: Option<String>,
    #[serde(default)]
    flags: String,
}

/// Probe adapter that shells out to `ffprobe`
pub struct FfprobeAdapter {
    runner: Arc<dyn ProcessRunnerPort>,
    ffprobe_path: String,
}

impl FfprobeAdapter {
    /// Create an adapter using `ffprobe_path` as the executable
    pub fn new(runner: Arc<dyn ProcessRunnerPort>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            runner,
            ffprobe_path: ffprobe_path.into(),
        }
    }

    async fn run_json(&self, path: &Path, spec: CommandSpec) -> SegcutResult<String> {
        let output = self.runner.run(spec).await?.wait().await?;
        if output.cancelled {
            return Err(SegcutError::Cancelled);
        }
        if !output.success() {
            let reason = output
                .stderr_tail
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| format!("ffprobe exited with {:?}", output.exit_code));
            return Err(SegcutError::Probe {
                message: format!("{}: {}", path.display(), reason),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ProbePort for FfprobeAdapter {
    async fn probe(&self, path: &Path) -> SegcutResult<MediaInfo> {
        let spec = CommandSpec::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
            .arg(path.to_string_lossy())
            .capture_stdout();
        let json = self.run_json(path, spec).await?;
        let info = parse_probe_json(path, &json)?;
        debug!(
            "Probed {}: {} stream(s), duration {:?}",
            path.display(),
            info.streams.len(),
            info.duration
        );
        Ok(info)
    }

    async fn read_keyframes(
        &self,
        path: &Path,
        stream_index: usize,
        window: TimeWindow,
    ) -> SegcutResult<Vec<f64>> {
        let spec = CommandSpec::new(&self.ffprobe_path)
            .args(["-v", "error", "-select_streams"])
            .arg(stream_index.to_string())
            .args(["-show_packets", "-show_entries", "packet=pts_time,flags"])
            .arg("-read_intervals")
            .arg(format!("{:.6}%{:.6}", window.start, window.end))
            .args(["-of", "json"])
            .arg(path.to_string_lossy())
            .capture_stdout();
        let json = self.run_json(path, spec).await?;
        parse_keyframes_json(&json, window)
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.trim().parse::<T>().ok())
}

/// Map ffprobe `-show_format -show_streams` JSON onto [`MediaInfo`]
pub fn parse_probe_json(path: &Path, json: &str) -> SegcutResult<MediaInfo> {
    let raw: FfprobeOutput = serde_json::from_str(json).map_err(|e| SegcutError::Probe {
        message: format!("unreadable ffprobe output for {}: {}", path.display(), e),
    })?;

    let streams = raw
        .streams
        .into_iter()
        .map(|s| StreamInfo {
            index: s.index,
            kind: StreamKind::from_codec_type(s.codec_type.as_deref().unwrap_or_default()),
            codec_name: s.codec_name.unwrap_or_default(),
            time_base: s
                .time_base
                .as_deref()
                .and_then(|tb| Timebase::parse(tb).ok()),
            bit_rate: parse_number(s.bit_rate.as_ref()),
            width: s.width,
            height: s.height,
            pix_fmt: s.pix_fmt,
            profile: s.profile,
            sample_rate: parse_number(s.sample_rate.as_ref()),
            channels: s.channels,
            attached_pic: s.disposition.get("attached_pic").copied().unwrap_or(0) != 0,
            tags: s.tags,
        })
        .collect();

    let format = raw.format;
    let duration = format
        .as_ref()
        .and_then(|f| parse_number::<f64>(f.duration.as_ref()))
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(MediaInfo {
        path: path.to_path_buf(),
        duration,
        format_name: format
            .as_ref()
            .and_then(|f| f.format_name.clone())
            .unwrap_or_default(),
        bit_rate: format.as_ref().and_then(|f| parse_number(f.bit_rate.as_ref())),
        streams,
        format_tags: format.map(|f| f.tags).unwrap_or_default(),
    })
}

/// Keyframe timestamps inside `window` from ffprobe packet JSON, ascending
pub fn parse_keyframes_json(json: &str, window: TimeWindow) -> SegcutResult<Vec<f64>> {
    let raw: FfPackets = serde_json::from_str(json).map_err(|e| SegcutError::Probe {
        message: format!("unreadable ffprobe packet output: {}", e),
    })?;

    let mut times: Vec<f64> = raw
        .packets
        .iter()
        .filter(|p| p.flags.contains('K'))
        .filter_map(|p| parse_number::<f64>(p.pts_time.as_ref()))
        .filter(|t| *t >= window.start && *t <= window.end)
        .collect();
    times.sort_by(f64::total_cmp);
    times.dedup();
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "time_base": "1/15360",
             "bit_rate": "2500000", "width": 1920, "height": 1080, "pix_fmt": "yuv420p",
             "profile": "High", "disposition": {"default": 1, "attached_pic": 0},
             "tags": {"language": "und"}},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "time_base": "1/48000",
             "sample_rate": "48000", "channels": 2},
            {"index": 2, "codec_type": "video", "codec_name": "mjpeg", "time_base": "1/90000",
             "disposition": {"attached_pic": 1}}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "60.022000",
                   "bit_rate": "2700000", "tags": {"title": "Demo"}}
    }"#;

    #[test]
    fn test_parse_probe_json() {
        let info = parse_probe_json(Path::new("in.mp4"), PROBE_JSON).unwrap();
        assert_eq!(info.duration, Some(60.022));
        assert_eq!(info.bit_rate, Some(2_700_000));
        assert_eq!(info.streams.len(), 3);

        let video = info.primary_video_stream().unwrap();
        assert_eq!(video.index, 0);
        assert_eq!(video.time_base, Some(Timebase { num: 1, den: 15360 }));
        assert_eq!(video.bit_rate, Some(2_500_000));
        assert!(info.streams[2].attached_pic);
        assert_eq!(info.streams[1].sample_rate, Some(48_000));
        assert_eq!(info.format_tags.get("title").map(String::as_str), Some("Demo"));
    }

    #[test]
    fn test_missing_duration_is_none() {
        let info = parse_probe_json(Path::new("live.ts"), r#"{"streams": [], "format": {"duration": "N/A"}}"#).unwrap();
        assert_eq!(info.duration, None);
    }

    #[test]
    fn test_garbage_is_probe_error() {
        let err = parse_probe_json(Path::new("x"), "not json").unwrap_err();
        assert!(matches!(err, SegcutError::Probe { .. }));
    }

    #[test]
    fn test_parse_keyframes_filters_flags_and_window() {
        let json = r#"{"packets": [
            {"pts_time": "13.000000", "flags": "K__"},
            {"pts_time": "12.500000", "flags": "___"},
            {"pts_time": "8.000000", "flags": "K__"},
            {"pts_time": "40.000000", "flags": "K__"},
            {"pts_time": "N/A", "flags": "K__"}
        ]}"#;
        let times = parse_keyframes_json(json, TimeWindow { start: 5.0, end: 20.0 }).unwrap();
        assert_eq!(times, vec![8.0, 13.0]);
    }
}
