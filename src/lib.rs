//! segcut - lossless segment export for media files
//!
//! Segments are cut with stream copy through an external `ffmpeg`. The smart
//! strategy re-encodes only the span from a segment start to the next
//! keyframe and joins it with the copied remainder.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod planner;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use app::{ExportInteractor, ExportRequest, ExportResponse, ExportState};
pub use config::AppConfig;
pub use domain::model::{MediaInfo, OutputSegment, Segment, SegmentId, StreamInfo};
pub use error::{SegcutError, SegcutResult};
