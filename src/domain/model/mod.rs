// Domain models - Core types and data structures

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SegcutError, SegcutResult};

/// Time specification with precision - represents time in seconds with fractional precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeSpec {
    pub seconds: f64,
}

impl TimeSpec {
    /// Create a new TimeSpec from seconds
    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds }
    }

    /// Create a new TimeSpec from hours, minutes, seconds, milliseconds
    pub fn from_components(hours: u32, minutes: u32, seconds: u32, milliseconds: u32) -> Self {
        let total_seconds = hours as f64 * 3600.0
            + minutes as f64 * 60.0
            + seconds as f64
            + milliseconds as f64 / 1000.0;
        Self {
            seconds: total_seconds,
        }
    }

    /// Parse time string in various formats
    pub fn parse(time_str: &str) -> SegcutResult<Self> {
        let trimmed = time_str.trim();
        let invalid = || SegcutError::InvalidTimeFormat {
            time: trimmed.to_string(),
        };

        // Try parsing as seconds (float)
        if let Ok(seconds) = trimmed.parse::<f64>() {
            if seconds < 0.0 || !seconds.is_finite() {
                return Err(invalid());
            }
            return Ok(Self::from_seconds(seconds));
        }

        // Try parsing as HH:MM:SS.ms or MM:SS.ms
        let parts: Vec<&str> = trimmed.split(':').collect();
        let (hours, minutes, seconds_part) = match parts.as_slice() {
            [m, s] => (0u32, m.parse::<u32>().map_err(|_| invalid())?, *s),
            [h, m, s] => (
                h.parse::<u32>().map_err(|_| invalid())?,
                m.parse::<u32>().map_err(|_| invalid())?,
                *s,
            ),
            _ => return Err(invalid()),
        };

        let seconds = seconds_part.parse::<f64>().map_err(|_| invalid())?;
        if parts.len() == 3 && minutes >= 60 {
            return Err(invalid());
        }
        if !(0.0..60.0).contains(&seconds) {
            return Err(invalid());
        }

        Ok(Self::from_seconds(
            hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds,
        ))
    }

    /// Format as H:MM:SS.mmm (hours omitted when zero)
    pub fn format_hms(&self) -> String {
        let total_ms = (self.seconds * 1000.0).round() as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let seconds = (total_ms % 60_000) / 1000;
        let milliseconds = total_ms % 1000;

        if hours > 0 {
            format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, milliseconds)
        } else {
            format!("{:02}:{:02}.{:03}", minutes, seconds, milliseconds)
        }
    }

    /// Filesystem-safe rendering, e.g. `00.01.02.500`
    pub fn format_for_filename(&self) -> String {
        let total_ms = (self.seconds * 1000.0).round() as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let seconds = (total_ms % 60_000) / 1000;
        let milliseconds = total_ms % 1000;
        format!("{:02}.{:02}.{:02}.{:03}", hours, minutes, seconds, milliseconds)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_hms())
    }
}

/// Timebase for timestamp calculations - represents rational number for timestamp conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    /// Create a new timebase
    pub fn new(num: i32, den: i32) -> SegcutResult<Self> {
        if den == 0 || num == 0 {
            return Err(SegcutError::Probe {
                message: format!("Invalid timebase {}/{}", num, den),
            });
        }
        Ok(Self { num, den })
    }

    /// Parse the `num/den` notation used by ffprobe
    pub fn parse(text: &str) -> SegcutResult<Self> {
        let (num, den) = text.trim().split_once('/').ok_or_else(|| SegcutError::Probe {
            message: format!("Invalid timebase: {}", text),
        })?;
        let num = num.parse::<i32>().map_err(|_| SegcutError::Probe {
            message: format!("Invalid timebase numerator: {}", text),
        })?;
        let den = den.parse::<i32>().map_err(|_| SegcutError::Probe {
            message: format!("Invalid timebase denominator: {}", text),
        })?;
        Self::new(num, den)
    }

    /// Convert to floating point seconds
    pub fn to_seconds(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Convert PTS to seconds
    pub fn pts_to_seconds(&self, pts: i64) -> f64 {
        pts as f64 * self.to_seconds()
    }

    /// Convert seconds to PTS
    pub fn seconds_to_pts(&self, seconds: f64) -> i64 {
        (seconds / self.to_seconds()).round() as i64
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Stable identity of a user segment, never reused within a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg-{}", self.0)
    }
}

/// A user-defined time interval on the media timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub selected: bool,
}

impl Segment {
    /// Segment with both bounds unresolved, used for an empty timeline
    pub fn placeholder(id: SegmentId) -> Self {
        Self {
            id,
            start: None,
            end: None,
            name: String::new(),
            tags: BTreeMap::new(),
            selected: true,
        }
    }

    /// True when neither bound has been set
    pub fn is_placeholder(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// `start ?? 0`
    pub fn apparent_start(&self) -> f64 {
        self.start.unwrap_or(0.0)
    }

    /// `end ?? duration`; `None` while the duration is still unknown
    pub fn apparent_end(&self, duration: Option<f64>) -> Option<f64> {
        self.end.or(duration)
    }
}

/// Segment fields before an id has been assigned (import, add)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentDraft {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

impl SegmentDraft {
    /// Draft with the given bounds and no name
    pub fn new(start: Option<f64>, end: Option<f64>) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Why this draft can never form a valid segment, if it cannot
    pub fn problem(&self) -> Option<String> {
        if let Some(start) = self.start {
            if start < 0.0 || !start.is_finite() {
                return Some(format!("negative or non-finite start {}", start));
            }
        }
        if let Some(end) = self.end {
            if !end.is_finite() {
                return Some(format!("non-finite end {}", end));
            }
            if end <= self.start.unwrap_or(0.0) {
                return Some(format!(
                    "start {} is not before end {}",
                    self.start.unwrap_or(0.0),
                    end
                ));
            }
        }
        None
    }
}

/// Where an output segment came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputSource {
    /// A user segment
    Segment(SegmentId),
    /// A gap produced by inversion, identified by its bounds
    Gap(String),
}

impl OutputSource {
    /// Identity for an inverted gap, stable for identical bounds
    pub fn gap(start: f64, end: f64) -> Self {
        let start_us = (start * 1_000_000.0).round() as i64;
        let end_us = (end * 1_000_000.0).round() as i64;
        OutputSource::Gap(format!("gap:{}-{}", start_us, end_us))
    }
}

impl fmt::Display for OutputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSource::Segment(id) => write!(f, "{}", id),
            OutputSource::Gap(key) => f.write_str(key),
        }
    }
}

/// Fully resolved interval handed to the export pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSegment {
    pub start: f64,
    pub end: f64,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub source: OutputSource,
}

impl OutputSegment {
    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl StreamKind {
    /// Map ffprobe's `codec_type`
    pub fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => StreamKind::Video,
            "audio" => StreamKind::Audio,
            "subtitle" => StreamKind::Subtitle,
            "data" => StreamKind::Data,
            "attachment" => StreamKind::Attachment,
            _ => StreamKind::Unknown,
        }
    }
}

/// One stream of a probed media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub codec_name: String,
    pub time_base: Option<Timebase>,
    pub bit_rate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pix_fmt: Option<String>,
    pub profile: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    /// Cover art is flagged as a video stream but never carries keyframes
    pub attached_pic: bool,
    pub tags: BTreeMap<String, String>,
}

impl StreamInfo {
    /// Minimal stream description
    pub fn new(index: usize, kind: StreamKind, codec_name: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            codec_name: codec_name.into(),
            time_base: None,
            bit_rate: None,
            width: None,
            height: None,
            pix_fmt: None,
            profile: None,
            sample_rate: None,
            channels: None,
            attached_pic: false,
            tags: BTreeMap::new(),
        }
    }

    /// Real video (not cover art)
    pub fn is_real_video(&self) -> bool {
        self.kind == StreamKind::Video && !self.attached_pic
    }
}

/// Complete media file information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub duration: Option<f64>,
    pub format_name: String,
    pub bit_rate: Option<u64>,
    pub streams: Vec<StreamInfo>,
    pub format_tags: BTreeMap<String, String>,
}

impl MediaInfo {
    /// Look up a stream by its container index
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.index == index)
    }

    /// First real video stream, used as the keyframe reference
    pub fn primary_video_stream(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is_real_video())
    }

    /// Indices of every stream, in container order
    pub fn all_stream_indices(&self) -> Vec<usize> {
        self.streams.iter().map(|s| s.index).collect()
    }

    /// Whether the container belongs to the mp4/mov family
    pub fn is_mov_family(&self) -> bool {
        self.format_name
            .split(',')
            .any(|f| matches!(f.trim(), "mov" | "mp4" | "m4a" | "3gp" | "3g2" | "mj2"))
    }
}
