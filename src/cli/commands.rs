//! Command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::{AppContainer, DefaultAppContainer, ExportInteractor, ExportRequest};
use crate::cli::args::{
    parse_segment_arg, BatchArgs, ExportArgs, InspectArgs, KeyframeArgs, ValidateEdlArgs,
};
use crate::config::AppConfig;
use crate::domain::edl::{self, EdlFormat};
use crate::domain::model::{SegmentDraft, TimeSpec};
use crate::domain::store::SegmentStore;
use crate::domain::timeline;
use crate::engine::{ConsoleProgressSink, JsonProgressSink, NoOpProgressSink, ProgressSink};
use crate::error::SegcutError;
use crate::planner::StreamSelection;

/// Execute the export command
pub async fn export(args: ExportArgs, config_path: Option<&Path>, verbose: bool) -> Result<()> {
    info!("Starting export of {}", args.input.display());

    let mut config = load_config(config_path)?;
    if let Some(strategy) = args.strategy {
        config.cut_strategy = strategy;
    }
    if let Some(template) = &args.template {
        config.output_template = template.clone();
    }
    config.validate().context("Invalid configuration")?;

    let drafts = match &args.edl {
        Some(path) => read_edl(path).await?,
        None => args
            .segments
            .iter()
            .map(|s| parse_segment_arg(s))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid segment argument")?,
    };

    let mut store = SegmentStore::new(config.undo_depth);
    if !drafts.is_empty() {
        store.replace_all(drafts).context("Invalid segments")?;
    }

    let container = DefaultAppContainer::new(&config, progress_sink(args.json_progress, verbose))
        .context("Failed to set up export pipeline")?;

    if let Some(mode) = args.align {
        let updates = container
            .inspect_interactor()
            .align_segments(&args.input, store.segments(), mode)
            .await
            .context("Failed to align segments to keyframes")?;
        store
            .apply_alignment(&updates)
            .context("Failed to apply keyframe alignment")?;
        info!("Aligned {} segment(s) to keyframes", updates.len());
    }

    let output_dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => default_output_dir(&args.input),
    };
    let mut settings = config.export_settings(output_dir);
    if !args.streams.is_empty() {
        settings.streams = StreamSelection::Indices(args.streams.clone());
    }
    settings.merge = args.merge;
    settings.chapters = args.merge && (args.chapters || config.chapters);
    settings.delete_intermediates = config.delete_intermediates && !args.keep_intermediates;
    settings.output_ext = args.format.clone();

    let request = ExportRequest {
        input: args.input.clone(),
        segments: store.segments().to_vec(),
        invert: args.invert,
        settings,
        overwrite: args.overwrite || config.overwrite,
    };

    let interactor = container.export_interactor();
    let watcher = spawn_interrupt_watcher(Arc::clone(&interactor));
    let result = interactor.export_segments(request).await;
    watcher.abort();

    match result {
        Ok(response) => {
            for warning in &response.warnings {
                warn!("{}", warning);
            }
            info!("Export finished: {} file(s)", response.output_paths.len());
            Ok(())
        }
        Err(SegcutError::StageFailed {
            stage,
            completed,
            source,
        }) => {
            for path in &completed {
                eprintln!("Kept {}", path.display());
            }
            Err(anyhow::Error::new(*source)).context(format!("Export failed at stage {}", stage + 1))
        }
        Err(e) => Err(anyhow::Error::new(e)).context("Export failed"),
    }
}

/// Execute the inspect command
pub async fn inspect(args: InspectArgs, config_path: Option<&Path>) -> Result<()> {
    info!("Inspecting {}", args.input.display());

    let config = load_config(config_path)?;
    let container = DefaultAppContainer::new(&config, Arc::new(NoOpProgressSink))
        .context("Failed to set up probe")?;
    let interactor = container.inspect_interactor();
    let media = interactor
        .inspect(&args.input)
        .await
        .context("Failed to inspect input file")?;

    if args.json {
        let json = interactor
            .format_as_json(&media)
            .context("Failed to serialize media info to JSON")?;
        println!("{}", json);
    } else {
        print!("{}", interactor.format_as_text(&media));
    }
    Ok(())
}

/// Execute the keyframe command
pub async fn keyframe(args: KeyframeArgs, config_path: Option<&Path>) -> Result<()> {
    let times = args
        .times
        .iter()
        .map(|t| TimeSpec::parse(t).map(|spec| spec.seconds))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid time")?;

    let config = load_config(config_path)?;
    let container = DefaultAppContainer::new(&config, Arc::new(NoOpProgressSink))
        .context("Failed to set up probe")?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = container
        .inspect_interactor()
        .keyframes_near(&args.input, args.stream, &times, args.mode, &cancel)
        .await;
    watcher.abort();
    let lookups = result.context("Keyframe lookup failed")?;

    if args.json {
        let rows: Vec<serde_json::Value> = lookups
            .iter()
            .map(|l| serde_json::json!({ "time": l.time, "keyframe": l.keyframe }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("Failed to serialize lookups")?
        );
    } else {
        for lookup in &lookups {
            match lookup.keyframe {
                Some(k) => println!("{:.3} -> {:.3}", lookup.time, k),
                None => println!("{:.3} -> none", lookup.time),
            }
        }
    }
    Ok(())
}

/// Execute the validate-edl command
pub async fn validate_edl(args: ValidateEdlArgs) -> Result<()> {
    let drafts = read_edl(&args.edl).await?;

    let mut store = SegmentStore::default();
    store.replace_all(drafts).context("Invalid segments")?;

    if let Some(duration) = args.duration {
        timeline::validate(store.segments(), Some(duration))
            .context("Segments do not fit the media duration")?;
        if timeline::invert(store.segments(), Some(duration)).is_none() {
            warn!("Segments overlap; they cannot be inverted");
        }
    }

    if args.csv {
        print!("{}", edl::to_csv(store.segments()));
    } else {
        println!("{} segment(s) accepted", store.len());
    }
    Ok(())
}

/// Execute the batch command
pub async fn batch(args: BatchArgs, config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let container = DefaultAppContainer::new(&config, progress_sink(args.json_progress, verbose))
        .context("Failed to set up export pipeline")?;

    let mut settings = config.export_settings(args.output_dir.clone());
    settings.output_ext = args.format.clone();

    let watcher = spawn_interrupt_watcher(container.export_interactor());
    let result = container
        .batch_interactor()
        .convert(&args.inputs, &settings, args.overwrite || config.overwrite)
        .await;
    watcher.abort();
    let outcomes = result.context("Batch conversion failed")?;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            eprintln!("Failed {}: {}", outcome.input.display(), e);
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", failed, outcomes.len());
    }
    info!("Batch finished: {} file(s)", outcomes.len());
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    AppConfig::load(path).context("Failed to load configuration")
}

async fn read_edl(path: &Path) -> Result<Vec<SegmentDraft>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let import = edl::parse(&content, EdlFormat::from_path(path))
        .with_context(|| format!("Failed to import {}", path.display()))?;
    for warning in &import.warnings {
        warn!("{}: {}", path.display(), warning);
    }
    Ok(import.drafts)
}

fn progress_sink(json: bool, verbose: bool) -> Arc<dyn ProgressSink> {
    if json {
        Arc::new(JsonProgressSink)
    } else {
        Arc::new(ConsoleProgressSink::new(verbose))
    }
}

fn default_output_dir(input: &Path) -> PathBuf {
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Ctrl-C cancels the running stage; outside a stage it ends the process
fn spawn_interrupt_watcher(interactor: Arc<ExportInteractor>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !interactor.cancel() {
                eprintln!("Interrupted");
                std::process::exit(130);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_dir_is_input_parent() {
        assert_eq!(default_output_dir(Path::new("media/a.mp4")), PathBuf::from("media"));
        assert_eq!(default_output_dir(Path::new("a.mp4")), PathBuf::from("."));
    }
}
