//! Error handling module for segcut

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Number of trailing status lines kept on an execution failure
pub const STATUS_TAIL_LINES: usize = 20;

/// Kind of resource problem behind a [`SegcutError::Resource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Out of disk space on the output volume
    DiskFull,
    /// Missing read/write permission
    PermissionDenied,
    /// Target exists and overwriting is disabled
    OutputExists,
    /// Input or tool not found
    NotFound,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResourceKind::DiskFull => "disk full",
            ResourceKind::PermissionDenied => "permission denied",
            ResourceKind::OutputExists => "output exists",
            ResourceKind::NotFound => "not found",
        };
        f.write_str(text)
    }
}

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before anything was spawned
    Validation,
    /// Disk, permission or overwrite problem
    Resource,
    /// A spawned process or the toolchain failed
    Execution,
    /// User-initiated; not a failure
    Cancelled,
}

/// Main error type for segcut operations
#[derive(Error, Debug)]
pub enum SegcutError {
    /// Invalid or overlapping segments, empty track selection, bad names
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Disk space, permissions, refuse-to-overwrite
    #[error("Resource error ({kind}): {message}")]
    Resource { kind: ResourceKind, message: String },

    /// A spawned process exited non-zero for reasons other than cancellation
    #[error("{stage} failed (exit code {exit_code:?}): {message}")]
    Execution {
        stage: String,
        exit_code: Option<i32>,
        message: String,
        status_text: Vec<String>,
    },

    /// User-initiated cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// Another export already holds the ownership token
    #[error("Another export is already in progress")]
    ExportInProgress,

    /// Media probe error
    #[error("Failed to probe media file: {message}")]
    Probe { message: String },

    /// Invalid time format
    #[error("Invalid time format: {time}. Expected HH:MM:SS.ms, MM:SS.ms, or seconds")]
    InvalidTimeFormat { time: String },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A stage failed after earlier stages completed
    #[error("Stage {stage} failed ({} earlier output(s) kept): {source}", completed.len())]
    StageFailed {
        stage: usize,
        completed: Vec<PathBuf>,
        #[source]
        source: Box<SegcutError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SegcutError {
    /// Shorthand for a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        SegcutError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a resource error
    pub fn resource(kind: ResourceKind, message: impl Into<String>) -> Self {
        SegcutError::Resource {
            kind,
            message: message.into(),
        }
    }

    /// Map an I/O error on `path` into the taxonomy
    pub fn from_io(error: std::io::Error, path: &std::path::Path) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::PermissionDenied => SegcutError::resource(
                ResourceKind::PermissionDenied,
                format!("{}: {}", path.display(), error),
            ),
            ErrorKind::NotFound => SegcutError::resource(
                ResourceKind::NotFound,
                format!("{}: {}", path.display(), error),
            ),
            ErrorKind::AlreadyExists => SegcutError::resource(
                ResourceKind::OutputExists,
                format!("{}: {}", path.display(), error),
            ),
            _ if is_disk_full_message(&error.to_string()) => SegcutError::resource(
                ResourceKind::DiskFull,
                format!("{}: {}", path.display(), error),
            ),
            _ => SegcutError::Io(error),
        }
    }

    /// Classify a non-zero process exit from its captured status text
    pub fn from_process_failure(stage: &str, exit_code: Option<i32>, status_text: &[String]) -> Self {
        let tail: Vec<String> = status_text
            .iter()
            .rev()
            .take(STATUS_TAIL_LINES)
            .rev()
            .cloned()
            .collect();

        if let Some(line) = tail.iter().find(|l| is_disk_full_message(l)) {
            return SegcutError::resource(ResourceKind::DiskFull, line.trim().to_string());
        }
        if let Some(line) = tail
            .iter()
            .find(|l| l.to_ascii_lowercase().contains("permission denied"))
        {
            return SegcutError::resource(ResourceKind::PermissionDenied, line.trim().to_string());
        }

        let message = tail
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| "process exited without output".to_string());

        SegcutError::Execution {
            stage: stage.to_string(),
            exit_code,
            message,
            status_text: tail,
        }
    }

    /// Coarse category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            SegcutError::Validation { .. } | SegcutError::InvalidTimeFormat { .. } => {
                ErrorCategory::Validation
            }
            SegcutError::Resource { .. } | SegcutError::ExportInProgress => ErrorCategory::Resource,
            SegcutError::Cancelled => ErrorCategory::Cancelled,
            SegcutError::StageFailed { source, .. } => source.category(),
            SegcutError::Config { .. } => ErrorCategory::Validation,
            SegcutError::Execution { .. } | SegcutError::Probe { .. } | SegcutError::Io(_) => {
                ErrorCategory::Execution
            }
        }
    }

    /// True for user-initiated cancellation, wrapped or not
    pub fn is_cancelled(&self) -> bool {
        self.category() == ErrorCategory::Cancelled
    }
}

fn is_disk_full_message(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("no space left on device") || lower.contains("disk full")
}

/// Result type alias for segcut operations
pub type SegcutResult<T> = std::result::Result<T, SegcutError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_disk_full_is_resource() {
        let err = SegcutError::from_process_failure(
            "cut",
            Some(1),
            &lines(&["frame=10", "out.mp4: No space left on device"]),
        );
        assert!(matches!(
            err,
            SegcutError::Resource {
                kind: ResourceKind::DiskFull,
                ..
            }
        ));
        assert_eq!(err.category(), ErrorCategory::Resource);
    }

    #[test]
    fn test_permission_denied_is_resource() {
        let err = SegcutError::from_process_failure(
            "cut",
            Some(1),
            &lines(&["/out/a.mp4: Permission denied"]),
        );
        assert!(matches!(
            err,
            SegcutError::Resource {
                kind: ResourceKind::PermissionDenied,
                ..
            }
        ));
    }

    #[test]
    fn test_other_failure_keeps_status_text() {
        let err = SegcutError::from_process_failure(
            "concat",
            Some(69),
            &lines(&["Invalid data found when processing input", ""]),
        );
        match err {
            SegcutError::Execution {
                stage,
                exit_code,
                message,
                status_text,
            } => {
                assert_eq!(stage, "concat");
                assert_eq!(exit_code, Some(69));
                assert_eq!(message, "Invalid data found when processing input");
                assert_eq!(status_text.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_status_text_is_bounded() {
        let many: Vec<String> = (0..100).map(|i| format!("line {i}")).collect();
        let err = SegcutError::from_process_failure("cut", Some(1), &many);
        if let SegcutError::Execution { status_text, .. } = err {
            assert_eq!(status_text.len(), STATUS_TAIL_LINES);
            assert_eq!(status_text.last().map(String::as_str), Some("line 99"));
        } else {
            panic!("expected execution failure");
        }
    }

    #[test]
    fn test_stage_failed_delegates_category() {
        let err = SegcutError::StageFailed {
            stage: 2,
            completed: vec![PathBuf::from("a.mp4")],
            source: Box::new(SegcutError::Cancelled),
        };
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_io_permission_maps_to_resource() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = SegcutError::from_io(io, std::path::Path::new("/x"));
        assert_eq!(err.category(), ErrorCategory::Resource);
    }
}
