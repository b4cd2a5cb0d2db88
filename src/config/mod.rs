//! Application configuration: defaults, TOML file, `SEGCUT_*` environment
//!
//! Precedence is CLI > environment > file > defaults. The CLI layer applies
//! its own overrides on top of what [`AppConfig::load`] returns.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::naming::{DEFAULT_MAX_FILENAME_LEN, DEFAULT_MERGED_TEMPLATE, DEFAULT_SEGMENT_TEMPLATE};
use crate::domain::store::DEFAULT_UNDO_DEPTH;
use crate::error::{SegcutError, SegcutResult};
use crate::planner::keyframe_index::{default_concurrency, DEFAULT_EPSILON, DEFAULT_WINDOW_SECS};
use crate::planner::{CutStrategy, ExportSettings, StreamSelection};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "SEGCUT_";

/// Name of the config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "segcut.toml";

/// Effective configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub cut_strategy: CutStrategy,
    pub output_template: String,
    pub merged_template: String,
    pub max_filename_len: usize,
    pub keyframe_window_secs: f64,
    pub keyframe_concurrency: usize,
    pub keyframe_epsilon: f64,
    pub cancel_grace_ms: u64,
    pub undo_depth: usize,
    pub overwrite: bool,
    pub chapters: bool,
    pub delete_intermediates: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            cut_strategy: CutStrategy::default(),
            output_template: DEFAULT_SEGMENT_TEMPLATE.to_string(),
            merged_template: DEFAULT_MERGED_TEMPLATE.to_string(),
            max_filename_len: DEFAULT_MAX_FILENAME_LEN,
            keyframe_window_secs: DEFAULT_WINDOW_SECS,
            keyframe_concurrency: default_concurrency(),
            keyframe_epsilon: DEFAULT_EPSILON,
            cancel_grace_ms: 3000,
            undo_depth: DEFAULT_UNDO_DEPTH,
            overwrite: false,
            chapters: false,
            delete_intermediates: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    segcut: Option<AppConfig>,
}

impl AppConfig {
    /// Defaults, then the first config file found, then the environment.
    ///
    /// An explicit path must exist; the implicit locations are optional.
    pub fn load(explicit: Option<&Path>) -> SegcutResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_locations().into_iter().find(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found; using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file with a `[segcut]` section
    pub fn from_file(path: &Path) -> SegcutResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SegcutError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml(&content).map_err(|e| SegcutError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse TOML content; a missing `[segcut]` section means defaults
    pub fn from_toml(content: &str) -> SegcutResult<Self> {
        let parsed: ConfigFile = toml::from_str(content).map_err(|e| SegcutError::Config {
            message: format!("Failed to parse TOML config: {}", e),
        })?;
        Ok(parsed.segcut.unwrap_or_default())
    }

    /// Apply `SEGCUT_<KEY>` overrides read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> SegcutResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = 0;
        let mut read = |key: &str| {
            let value = lookup(&format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase()));
            overrides += usize::from(value.is_some());
            value.map(|v| (key.to_string(), v))
        };

        if let Some((_, v)) = read("ffmpeg_path") {
            self.ffmpeg_path = v;
        }
        if let Some((_, v)) = read("ffprobe_path") {
            self.ffprobe_path = v;
        }
        if let Some((_, v)) = read("output_template") {
            self.output_template = v;
        }
        if let Some((_, v)) = read("merged_template") {
            self.merged_template = v;
        }
        parse_into(&mut self.cut_strategy, read("cut_strategy"))?;
        parse_into(&mut self.max_filename_len, read("max_filename_len"))?;
        parse_into(&mut self.keyframe_window_secs, read("keyframe_window_secs"))?;
        parse_into(&mut self.keyframe_concurrency, read("keyframe_concurrency"))?;
        parse_into(&mut self.keyframe_epsilon, read("keyframe_epsilon"))?;
        parse_into(&mut self.cancel_grace_ms, read("cancel_grace_ms"))?;
        parse_into(&mut self.undo_depth, read("undo_depth"))?;
        parse_into(&mut self.overwrite, read("overwrite"))?;
        parse_into(&mut self.chapters, read("chapters"))?;
        parse_into(&mut self.delete_intermediates, read("delete_intermediates"))?;

        if overrides > 0 {
            info!("Applied {} environment variable override(s)", overrides);
        }
        Ok(())
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> SegcutResult<()> {
        let fail = |message: String| Err(SegcutError::Config { message });

        if self.ffmpeg_path.trim().is_empty() || self.ffprobe_path.trim().is_empty() {
            return fail("ffmpeg_path and ffprobe_path must not be empty".to_string());
        }
        if !(self.keyframe_window_secs.is_finite() && self.keyframe_window_secs > 0.0) {
            return fail(format!(
                "keyframe_window_secs must be positive, got {}",
                self.keyframe_window_secs
            ));
        }
        if !(self.keyframe_epsilon.is_finite() && self.keyframe_epsilon >= 0.0) {
            return fail(format!(
                "keyframe_epsilon must not be negative, got {}",
                self.keyframe_epsilon
            ));
        }
        if self.keyframe_concurrency == 0 {
            return fail("keyframe_concurrency must be at least 1".to_string());
        }
        if self.undo_depth == 0 {
            return fail("undo_depth must be at least 1".to_string());
        }
        // Room for at least a one-character stem plus an extension
        if self.max_filename_len < 8 {
            return fail(format!(
                "max_filename_len must be at least 8, got {}",
                self.max_filename_len
            ));
        }
        if !self.output_template.contains("{ext}") || !self.merged_template.contains("{ext}") {
            return fail("output templates must contain {ext}".to_string());
        }
        Ok(())
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Export settings seeded from this configuration
    pub fn export_settings(&self, output_dir: impl Into<PathBuf>) -> ExportSettings {
        ExportSettings {
            output_dir: output_dir.into(),
            strategy: self.cut_strategy,
            streams: StreamSelection::All,
            merge: false,
            chapters: self.chapters,
            delete_intermediates: self.delete_intermediates,
            segment_template: self.output_template.clone(),
            merged_template: self.merged_template.clone(),
            max_filename_len: self.max_filename_len,
            output_ext: None,
        }
    }
}

fn parse_into<T: FromStr>(slot: &mut T, entry: Option<(String, String)>) -> SegcutResult<()> {
    if let Some((key, value)) = entry {
        *slot = value.trim().parse().map_err(|_| SegcutError::Config {
            message: format!(
                "Invalid value for {}{}: {}",
                ENV_PREFIX,
                key.to_ascii_uppercase(),
                value
            ),
        })?;
    }
    Ok(())
}

/// `./segcut.toml`, then `$XDG_CONFIG_HOME/segcut/config.toml`
fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = config_home {
        paths.push(dir.join("segcut").join("config.toml"));
    }
    paths
}
