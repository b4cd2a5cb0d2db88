//! Export planning and keyframe analysis module

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::model::{MediaInfo, OutputSegment, StreamInfo, StreamKind, Timebase};
use crate::error::{SegcutError, SegcutResult};

pub mod keyframe_index;
pub mod strategy;

pub use keyframe_index::{KeyframeIndex, KeyframeMode};
pub use strategy::ExportPlanner;

/// How segment boundaries are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutStrategy {
    /// Snap the start back to the preceding keyframe, then stream copy
    #[default]
    Keyframe,
    /// Stream copy at the requested bounds
    Normal,
    /// Frame-accurate start: encode up to the next keyframe, copy the rest
    Smart,
}

impl FromStr for CutStrategy {
    type Err = SegcutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyframe" => Ok(CutStrategy::Keyframe),
            "normal" => Ok(CutStrategy::Normal),
            "smart" => Ok(CutStrategy::Smart),
            other => Err(SegcutError::Config {
                message: format!(
                    "Invalid cut strategy: {}. Valid strategies: keyframe, normal, smart",
                    other
                ),
            }),
        }
    }
}

impl fmt::Display for CutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CutStrategy::Keyframe => "keyframe",
            CutStrategy::Normal => "normal",
            CutStrategy::Smart => "smart",
        };
        f.write_str(name)
    }
}

/// Encoder settings for the transcoded head of a smart cut
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderProfile {
    /// Source codec family, e.g. `h264`
    pub codec: String,
    /// ffmpeg encoder, e.g. `libx264`
    pub encoder: String,
    pub bit_rate: Option<u64>,
    /// Must match the source exactly for the concatenation to stay in sync
    pub time_base: Timebase,
    pub pix_fmt: Option<String>,
}

/// Cut mode of one planned segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CutMode {
    /// One stream copy over the whole segment
    Copy,
    /// Encode `[from, boundary)`, copy `[boundary, to)`, concatenate
    SmartCut {
        boundary: f64,
        encoder: EncoderProfile,
    },
}

impl CutMode {
    pub fn is_copy(&self) -> bool {
        matches!(self, CutMode::Copy)
    }
}

/// One item of an export plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSegment {
    pub output: OutputSegment,
    pub cut_from: f64,
    pub cut_to: f64,
    pub mode: CutMode,
    pub output_path: PathBuf,
    /// Input stream indices, in output order
    pub streams: Vec<usize>,
    /// Video stream used for keyframe decisions, if any is selected
    pub reference_stream: Option<usize>,
}

impl PlannedSegment {
    /// Length of the cut in seconds
    pub fn duration(&self) -> f64 {
        (self.cut_to - self.cut_from).max(0.0)
    }

    /// Position of the reference stream among the output streams
    pub fn reference_output_index(&self) -> Option<usize> {
        let reference = self.reference_stream?;
        self.streams.iter().position(|s| *s == reference)
    }
}

/// Trailing merge of every per-segment output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeStep {
    pub output_path: PathBuf,
    pub chapters: bool,
    pub delete_intermediates: bool,
}

/// Ordered execution plan for one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPlan {
    pub input: PathBuf,
    pub segments: Vec<PlannedSegment>,
    pub merge: Option<MergeStep>,
    pub warnings: Vec<String>,
}

impl ExportPlan {
    /// Sum of all planned cut durations
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(PlannedSegment::duration).sum()
    }

    /// Every file the plan will create
    pub fn target_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.segments.iter().map(|s| s.output_path.clone()).collect();
        if let Some(merge) = &self.merge {
            paths.push(merge.output_path.clone());
        }
        paths
    }
}

/// Which input streams end up in the output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum StreamSelection {
    /// Every stream that can be stream-copied
    #[default]
    All,
    /// Exactly these input indices
    Indices(Vec<usize>),
}

impl StreamSelection {
    /// Resolve against the probed media; empty or unknown selections are rejected
    pub fn resolve(&self, media: &MediaInfo) -> SegcutResult<Vec<usize>> {
        let indices: Vec<usize> = match self {
            StreamSelection::All => media
                .streams
                .iter()
                .filter(|s| is_copyable(s))
                .map(|s| s.index)
                .collect(),
            StreamSelection::Indices(indices) => {
                if let Some(missing) = indices.iter().find(|i| media.stream(**i).is_none()) {
                    return Err(SegcutError::validation(format!(
                        "stream {} does not exist in {}",
                        missing,
                        media.path.display()
                    )));
                }
                indices.clone()
            }
        };

        if indices.is_empty() {
            return Err(SegcutError::validation("no tracks selected for export"));
        }
        Ok(indices)
    }
}

fn is_copyable(stream: &StreamInfo) -> bool {
    !matches!(stream.kind, StreamKind::Attachment | StreamKind::Unknown)
}

/// Settings the planner needs for one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub strategy: CutStrategy,
    pub streams: StreamSelection,
    pub merge: bool,
    pub chapters: bool,
    pub delete_intermediates: bool,
    pub segment_template: String,
    pub merged_template: String,
    pub max_filename_len: usize,
    /// Output extension; the input's extension when `None`
    pub output_ext: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn media() -> MediaInfo {
        let mut attachment = StreamInfo::new(2, StreamKind::Attachment, "ttf");
        attachment.tags.insert("filename".into(), "font.ttf".into());
        MediaInfo {
            path: PathBuf::from("in.mkv"),
            duration: Some(10.0),
            format_name: "matroska,webm".into(),
            bit_rate: None,
            streams: vec![
                StreamInfo::new(0, StreamKind::Video, "h264"),
                StreamInfo::new(1, StreamKind::Audio, "aac"),
                attachment,
            ],
            format_tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Smart".parse::<CutStrategy>().unwrap(), CutStrategy::Smart);
        assert!("exact".parse::<CutStrategy>().is_err());
        assert_eq!(CutStrategy::default().to_string(), "keyframe");
    }

    #[test]
    fn test_all_streams_skip_attachments() {
        assert_eq!(StreamSelection::All.resolve(&media()).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_empty_or_unknown_selection_is_rejected() {
        assert!(StreamSelection::Indices(vec![]).resolve(&media()).is_err());
        assert!(StreamSelection::Indices(vec![7]).resolve(&media()).is_err());
        assert_eq!(
            StreamSelection::Indices(vec![1]).resolve(&media()).unwrap(),
            vec![1]
        );
    }
}
