// Adapters - External system implementations

pub mod ffprobe;
pub mod fs_local;
pub mod process_tokio;

// Re-export adapters
pub use ffprobe::FfprobeAdapter;
pub use fs_local::LocalFsAdapter;
pub use process_tokio::TokioProcessRunner;
