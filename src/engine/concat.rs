//! Lossless concatenation of per-segment outputs, with optional chapters

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::engine::copy::base_command_with_stdin;
use crate::engine::{work_dir_near, CutExecutor, StageContext};
use crate::error::{SegcutError, SegcutResult};
use crate::planner::MergeStep;
use crate::ports::CommandSpec;

/// One chapter, times in milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub start_ms: u64,
    pub end_ms: u64,
    pub title: String,
}

/// `ffconcat` list for `files`, in order
pub fn build_concat_list(files: &[PathBuf]) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for file in files {
        let escaped = file.to_string_lossy().replace('\'', "'\\''");
        let _ = writeln!(list, "file '{}'", escaped);
    }
    list
}

/// Chapters laid end to end from actual file durations.
///
/// Empty titles fall back to `Segment N`.
pub fn chapters_from_durations(titles: &[String], durations: &[f64]) -> Vec<Chapter> {
    let mut chapters = Vec::with_capacity(durations.len());
    let mut cursor_ms = 0u64;
    for (i, duration) in durations.iter().enumerate() {
        let length_ms = (duration.max(0.0) * 1000.0).round() as u64;
        let title = titles
            .get(i)
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("Segment {}", i + 1));
        chapters.push(Chapter {
            start_ms: cursor_ms,
            end_ms: cursor_ms + length_ms,
            title,
        });
        cursor_ms += length_ms;
    }
    chapters
}

/// FFMETADATA document holding `chapters`
pub fn build_ffmetadata(chapters: &[Chapter]) -> String {
    let mut doc = String::from(";FFMETADATA1\n");
    for chapter in chapters {
        let _ = write!(
            doc,
            "\n[CHAPTER]\nTIMEBASE=1/1000\nSTART={}\nEND={}\ntitle={}\n",
            chapter.start_ms,
            chapter.end_ms,
            escape_metadata(&chapter.title)
        );
    }
    doc
}

fn escape_metadata(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Concat demuxer reading its list from stdin, optionally taking chapters from `metadata`
pub fn concat_command(ffmpeg: &str, list: String, metadata: Option<&Path>, output: &Path) -> CommandSpec {
    let mut spec = base_command_with_stdin(ffmpeg)
        .args([
            "-f",
            "concat",
            "-safe",
            "0",
            "-protocol_whitelist",
            "file,pipe,fd",
            "-i",
            "-",
        ])
        .with_stdin(list.into_bytes());

    if let Some(metadata) = metadata {
        spec = spec
            .args(["-f", "ffmetadata", "-i"])
            .arg(metadata.to_string_lossy())
            .args(["-map_metadata", "1", "-map_chapters", "1"]);
    }

    spec.args(["-map", "0", "-c", "copy", "-y"])
        .arg(output.to_string_lossy())
}

/// Absolute paths so the list does not depend on the ffmpeg working directory
pub(crate) async fn absolute_paths(files: &[PathBuf]) -> SegcutResult<Vec<PathBuf>> {
    let mut absolute = Vec::with_capacity(files.len());
    for file in files {
        let path = tokio::fs::canonicalize(file)
            .await
            .map_err(|e| SegcutError::from_io(e, file))?;
        absolute.push(path);
    }
    Ok(absolute)
}

impl CutExecutor {
    /// Merge `files` into the merge output; returns warnings.
    ///
    /// Intermediates are only deleted after the merge succeeded.
    pub async fn merge(
        &self,
        step: &MergeStep,
        files: &[PathBuf],
        titles: &[String],
        ctx: &StageContext<'_>,
    ) -> SegcutResult<Vec<String>> {
        info!(
            "Merging {} file(s) into {}",
            files.len(),
            step.output_path.display()
        );
        let mut warnings = Vec::new();
        let sources = absolute_paths(files).await?;

        let mut expected = 0.0;
        let mut durations = Vec::with_capacity(sources.len());
        for source in &sources {
            let duration = self.probe.probe(source).await?.duration.unwrap_or(0.0);
            expected += duration;
            durations.push(duration);
        }

        let work_dir = work_dir_near(&step.output_path)?;
        let metadata = if step.chapters {
            let chapters = chapters_from_durations(titles, &durations);
            debug!("Writing {} chapter(s)", chapters.len());
            let path = work_dir.path().join("chapters.txt");
            tokio::fs::write(&path, build_ffmetadata(&chapters))
                .await
                .map_err(|e| SegcutError::from_io(e, &path))?;
            Some(path)
        } else {
            None
        };

        let spec = concat_command(
            &self.ffmpeg_path,
            build_concat_list(&sources),
            metadata.as_deref(),
            &step.output_path,
        );
        self.run_stage(spec, expected, "merge", ctx, &|f| ctx.report(f))
            .await?;
        drop(work_dir);

        if step.delete_intermediates {
            for file in files {
                if let Err(e) = self.fs.remove_file(file).await {
                    let message = format!("Could not delete {}: {}", file.display(), e);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }

        info!("Merged output written to {}", step.output_path.display());
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_list_escapes_single_quotes() {
        let list = build_concat_list(&[
            PathBuf::from("/out/a.mp4"),
            PathBuf::from("/out/it's.mp4"),
        ]);
        assert_eq!(
            list,
            "ffconcat version 1.0\nfile '/out/a.mp4'\nfile '/out/it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn test_chapters_accumulate_actual_durations() {
        let chapters = chapters_from_durations(
            &["Intro".to_string(), String::new()],
            &[10.0106, 5.0],
        );
        assert_eq!(chapters[0].start_ms, 0);
        assert_eq!(chapters[0].end_ms, 10011);
        assert_eq!(chapters[1].start_ms, 10011);
        assert_eq!(chapters[1].end_ms, 15011);
        assert_eq!(chapters[1].title, "Segment 2");
    }

    #[test]
    fn test_ffmetadata_escapes_titles() {
        let doc = build_ffmetadata(&[Chapter {
            start_ms: 0,
            end_ms: 1000,
            title: "a=b;c".into(),
        }]);
        assert!(doc.starts_with(";FFMETADATA1\n"));
        assert!(doc.contains("TIMEBASE=1/1000\nSTART=0\nEND=1000\ntitle=a\\=b\\;c\n"));
    }

    #[test]
    fn test_concat_command_with_chapters() {
        let spec = concat_command(
            "ffmpeg",
            "ffconcat version 1.0\n".into(),
            Some(Path::new("/tmp/meta.txt")),
            Path::new("/out/merged.mp4"),
        );
        let args = spec.args.join(" ");
        assert!(!args.contains("-nostdin"));
        assert!(args.contains("-f concat -safe 0"));
        assert!(args.contains("-i /tmp/meta.txt -map_metadata 1 -map_chapters 1"));
        assert!(args.ends_with("-map 0 -c copy -y /out/merged.mp4"));
        assert_eq!(spec.stdin.as_deref(), Some("ffconcat version 1.0\n".as_bytes()));
    }
}
