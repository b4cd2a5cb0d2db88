//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

use crate::domain::model::{SegmentDraft, TimeSpec};
use crate::error::{SegcutError, SegcutResult};
use crate::planner::{CutStrategy, KeyframeMode};

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Input media file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Segment as START-END[=NAME]; either bound may be left empty (repeatable)
    #[arg(short, long = "segment", value_name = "RANGE", allow_hyphen_values = true)]
    pub segments: Vec<String>,

    /// Read segments from a JSON or CSV edit decision list
    #[arg(long, conflicts_with = "segments")]
    pub edl: Option<PathBuf>,

    /// Export the gaps between the segments instead
    #[arg(long)]
    pub invert: bool,

    /// Cut strategy (keyframe, normal, smart)
    #[arg(long)]
    pub strategy: Option<CutStrategy>,

    /// Snap segment bounds to keyframes before exporting
    #[arg(long, value_enum, value_name = "MODE")]
    pub align: Option<KeyframeMode>,

    /// Merge the exported segments into one file
    #[arg(long)]
    pub merge: bool,

    /// Write one chapter per segment into the merged file
    #[arg(long, requires = "merge")]
    pub chapters: bool,

    /// Keep the per-segment files after merging
    #[arg(long)]
    pub keep_intermediates: bool,

    /// Input stream indices to export (comma separated); all by default
    #[arg(long, value_delimiter = ',')]
    pub streams: Vec<usize>,

    /// Output directory (default: next to the input)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output container extension (default: same as input)
    #[arg(long)]
    pub format: Option<String>,

    /// File name template for segment outputs
    #[arg(long)]
    pub template: Option<String>,

    /// Replace existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// Report progress as JSON lines on stdout
    #[arg(long)]
    pub json_progress: bool,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input media file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the keyframe command
#[derive(Args, Debug)]
pub struct KeyframeArgs {
    /// Input media file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Times to look up (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(required = true)]
    pub times: Vec<String>,

    /// Video stream index (default: first video stream)
    #[arg(long)]
    pub stream: Option<usize>,

    /// Which keyframe to pick
    #[arg(long, value_enum, default_value = "nearest")]
    pub mode: KeyframeMode,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the validate-edl command
#[derive(Args, Debug)]
pub struct ValidateEdlArgs {
    /// JSON or CSV edit decision list
    pub edl: PathBuf,

    /// Media duration in seconds, to resolve open-ended segments
    #[arg(long)]
    pub duration: Option<f64>,

    /// Print the accepted segments as CSV
    #[arg(long)]
    pub csv: bool,
}

/// Arguments for the batch command
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Files or directories to convert
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Output container extension (default: same as each input)
    #[arg(long)]
    pub format: Option<String>,

    /// Replace existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// Report progress as JSON lines on stdout
    #[arg(long)]
    pub json_progress: bool,
}

/// Parse `START-END[=NAME]`, e.g. `10-20`, `1:00-1:30.5=Intro`, `-20`, `10-`
pub fn parse_segment_arg(arg: &str) -> SegcutResult<SegmentDraft> {
    let (range, name) = match arg.split_once('=') {
        Some((range, name)) => (range, name.trim()),
        None => (arg, ""),
    };
    let (start, end) = range.split_once('-').ok_or_else(|| {
        SegcutError::validation(format!("segment '{}' must look like START-END", arg))
    })?;

    let bound = |text: &str| -> SegcutResult<Option<f64>> {
        if text.trim().is_empty() {
            Ok(None)
        } else {
            TimeSpec::parse(text).map(|t| Some(t.seconds))
        }
    };

    let draft = SegmentDraft::new(bound(start)?, bound(end)?).with_name(name);
    match draft.problem() {
        Some(problem) => Err(SegcutError::validation(format!("segment '{}': {}", arg, problem))),
        None => Ok(draft),
    }
}
