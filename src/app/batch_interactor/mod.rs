// Batch interactor - Lossless conversion of many files, one at a time

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::export_interactor::{ExportInteractor, ExportRequest, ExportResponse};
use crate::domain::model::{Segment, SegmentId};
use crate::error::SegcutResult;
use crate::planner::ExportSettings;
use crate::ports::FsPort;

/// Extensions picked up when walking directories
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "webm", "avi", "ts", "mts", "m2ts", "mpg", "mpeg", "flv", "wmv",
    "3gp", "ogv", "mp3", "m4a", "aac", "flac", "wav", "ogg", "opus",
];

/// Outcome for one input file
#[derive(Debug)]
pub struct BatchOutcome {
    pub input: PathBuf,
    pub result: SegcutResult<ExportResponse>,
}

/// Interactor for batch conversion
pub struct BatchConvertInteractor {
    fs_port: Arc<dyn FsPort>,
    export: Arc<ExportInteractor>,
}

impl BatchConvertInteractor {
    pub fn new(fs_port: Arc<dyn FsPort>, export: Arc<ExportInteractor>) -> Self {
        Self { fs_port, export }
    }

    /// Every media file under `inputs`; plain files are taken as given
    pub async fn collect_inputs(&self, inputs: &[PathBuf]) -> SegcutResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for input in inputs {
            files.extend(self.fs_port.list_media_files(input, MEDIA_EXTENSIONS).await?);
        }
        Ok(files)
    }

    /// Export each file as one full-length segment.
    ///
    /// Failures are recorded and the batch moves on; a cancellation ends it.
    pub async fn convert(
        &self,
        inputs: &[PathBuf],
        settings: &ExportSettings,
        overwrite: bool,
    ) -> SegcutResult<Vec<BatchOutcome>> {
        let files = self.collect_inputs(inputs).await?;
        info!("Converting {} file(s)", files.len());

        let settings = ExportSettings {
            merge: false,
            ..settings.clone()
        };
        let mut outcomes = Vec::with_capacity(files.len());

        for (i, file) in files.into_iter().enumerate() {
            info!("Processing file {}: {}", i + 1, file.display());
            let request = ExportRequest {
                input: file.clone(),
                segments: vec![Segment::placeholder(SegmentId(1))],
                invert: false,
                settings: settings.clone(),
                overwrite,
            };

            let result = self.export.export_segments(request).await;
            let cancelled = matches!(&result, Err(e) if e.is_cancelled());
            if let Err(e) = &result {
                warn!("{}: {}", file.display(), e);
            }
            outcomes.push(BatchOutcome {
                input: file,
                result,
            });

            if cancelled {
                info!("Batch cancelled after {} file(s)", outcomes.len());
                break;
            }
        }

        Ok(outcomes)
    }
}
