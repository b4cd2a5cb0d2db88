//! Local file system adapter

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ResourceKind, SegcutError, SegcutResult};
use crate::ports::FsPort;

/// [`FsPort`] over the local disk
#[derive(Debug, Default, Clone)]
pub struct LocalFsAdapter;

impl LocalFsAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FsPort for LocalFsAdapter {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, dir: &Path) -> SegcutResult<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SegcutError::from_io(e, dir))
    }

    async fn ensure_writable_dir(&self, dir: &Path) -> SegcutResult<()> {
        let metadata = tokio::fs::metadata(dir)
            .await
            .map_err(|e| SegcutError::from_io(e, dir))?;
        if !metadata.is_dir() {
            return Err(SegcutError::resource(
                ResourceKind::NotFound,
                format!("{} is not a directory", dir.display()),
            ));
        }

        // Permissions can change between checks, so actually create a file
        let probe_dir = dir.to_path_buf();
        let probe = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".segcut-write-")
                .tempfile_in(&probe_dir)
        })
        .await
        .map_err(|e| SegcutError::Io(std::io::Error::other(e)))?;

        match probe {
            Ok(file) => {
                debug!("Output directory {} is writable", dir.display());
                drop(file);
                Ok(())
            }
            Err(e) => Err(SegcutError::from_io(e, dir)),
        }
    }

    async fn remove_file(&self, path: &Path) -> SegcutResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| SegcutError::from_io(e, path))
    }

    async fn list_media_files(&self, root: &Path, extensions: &[&str]) -> SegcutResult<Vec<PathBuf>> {
        let root = root.to_path_buf();
        let extensions: Vec<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();

        let listing = tokio::task::spawn_blocking(move || -> SegcutResult<Vec<PathBuf>> {
            if root.is_file() {
                return Ok(vec![root]);
            }

            let mut files = Vec::new();
            for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    match e.into_io_error() {
                        Some(io) => SegcutError::from_io(io, &path),
                        None => SegcutError::validation(format!(
                            "file system loop at {}",
                            path.display()
                        )),
                    }
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let matches = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
                    .unwrap_or(false);
                if matches {
                    files.push(entry.into_path());
                }
            }
            Ok(files)
        })
        .await
        .map_err(|e| SegcutError::Io(std::io::Error::other(e)))?;

        listing
    }
}
