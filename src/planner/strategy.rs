//! Export planning: cut mode per segment, output paths, merge step

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::model::{MediaInfo, OutputSegment, StreamInfo};
use crate::domain::naming::{self, NamingContext};
use crate::error::{SegcutError, SegcutResult};
use crate::planner::keyframe_index::{KeyframeIndex, KeyframeMode};
use crate::planner::{
    CutMode, CutStrategy, EncoderProfile, ExportPlan, ExportSettings, MergeStep, PlannedSegment,
};

/// Codec families that can be transcoded for a smart-cut head
const ENCODER_FAMILIES: [(&str, &str); 7] = [
    ("h264", "libx264"),
    ("hevc", "libx265"),
    ("vp8", "libvpx"),
    ("vp9", "libvpx-vp9"),
    ("av1", "libsvtav1"),
    ("mpeg4", "mpeg4"),
    ("mpeg2video", "mpeg2video"),
];

impl EncoderProfile {
    /// Profile matching `stream`, or `None` when its codec cannot be smart cut.
    ///
    /// The bitrate falls back to the container's when the stream has none. A
    /// stream without a known timebase is never eligible.
    pub fn for_stream(stream: &StreamInfo, container_bit_rate: Option<u64>) -> Option<Self> {
        let (codec, encoder) = ENCODER_FAMILIES
            .iter()
            .find(|(codec, _)| *codec == stream.codec_name)?;
        let time_base = stream.time_base?;

        Some(Self {
            codec: codec.to_string(),
            encoder: encoder.to_string(),
            bit_rate: stream.bit_rate.or(container_bit_rate),
            time_base,
            pix_fmt: stream.pix_fmt.clone(),
        })
    }
}

/// Turns output segments and settings into an [`ExportPlan`]
pub struct ExportPlanner {
    keyframes: Arc<KeyframeIndex>,
}

impl ExportPlanner {
    /// Create a planner backed by `keyframes`
    pub fn new(keyframes: Arc<KeyframeIndex>) -> Self {
        Self { keyframes }
    }

    /// Plan the export of `outputs` from `media`
    pub async fn plan(
        &self,
        media: &MediaInfo,
        outputs: &[OutputSegment],
        settings: &ExportSettings,
    ) -> SegcutResult<ExportPlan> {
        info!(
            "Planning {} segment(s) from {} with {} cuts",
            outputs.len(),
            media.path.display(),
            settings.strategy
        );

        if outputs.is_empty() {
            return Err(SegcutError::validation("nothing to export"));
        }

        let streams = settings.streams.resolve(media)?;
        let reference_stream = streams
            .iter()
            .filter_map(|i| media.stream(*i))
            .find(|s| s.is_real_video())
            .map(|s| s.index);

        let (segment_paths, merge_path) = self.output_paths(media, outputs, settings)?;
        let mut warnings = Vec::new();
        let mut segments = Vec::with_capacity(outputs.len());

        for (output, output_path) in outputs.iter().zip(segment_paths) {
            let (cut_from, mode) = self
                .decide(media, output, reference_stream, settings.strategy, &mut warnings)
                .await?;
            debug!(
                "{}: [{:.3}, {:.3}) -> {:?}",
                output.source, cut_from, output.end, mode
            );

            segments.push(PlannedSegment {
                output: output.clone(),
                cut_from,
                cut_to: output.end,
                mode,
                output_path,
                streams: streams.clone(),
                reference_stream,
            });
        }

        if settings.merge && merge_path.is_none() {
            let message = "Only one segment to export; merge skipped".to_string();
            warn!("{}", message);
            warnings.push(message);
        }
        let merge = merge_path.map(|output_path| MergeStep {
            output_path,
            chapters: settings.chapters,
            delete_intermediates: settings.delete_intermediates,
        });

        Ok(ExportPlan {
            input: media.path.clone(),
            segments,
            merge,
            warnings,
        })
    }

    /// Cut start and mode for one segment
    async fn decide(
        &self,
        media: &MediaInfo,
        output: &OutputSegment,
        reference_stream: Option<usize>,
        strategy: CutStrategy,
        warnings: &mut Vec<String>,
    ) -> SegcutResult<(f64, CutMode)> {
        let Some(reference) = reference_stream else {
            return Ok((output.start, CutMode::Copy));
        };

        match strategy {
            CutStrategy::Normal => Ok((output.start, CutMode::Copy)),
            CutStrategy::Keyframe => {
                let snapped = self
                    .keyframes
                    .near_keyframe(&media.path, reference, output.start, KeyframeMode::Before)
                    .await?;
                Ok((snapped.unwrap_or(output.start), CutMode::Copy))
            }
            CutStrategy::Smart => {
                let next = self
                    .keyframes
                    .near_keyframe(&media.path, reference, output.start, KeyframeMode::After)
                    .await?;
                let Some(boundary) = next else {
                    let message = format!(
                        "No keyframe found near {:.3}s; {} cut without frame accuracy",
                        output.start, output.source
                    );
                    warn!("{}", message);
                    warnings.push(message);
                    return Ok((output.start, CutMode::Copy));
                };

                if (boundary - output.start).abs() <= self.keyframes.epsilon() {
                    return Ok((output.start, CutMode::Copy));
                }

                let stream = media.stream(reference);
                match stream.and_then(|s| EncoderProfile::for_stream(s, media.bit_rate)) {
                    Some(encoder) => Ok((
                        output.start,
                        CutMode::SmartCut {
                            boundary: boundary.min(output.end),
                            encoder,
                        },
                    )),
                    None => {
                        let codec = stream.map(|s| s.codec_name.as_str()).unwrap_or("unknown");
                        let message = format!(
                            "Codec {} cannot be smart cut; {} cut without frame accuracy",
                            codec, output.source
                        );
                        warn!("{}", message);
                        warnings.push(message);
                        Ok((output.start, CutMode::Copy))
                    }
                }
            }
        }
    }

    /// Per-segment paths plus the merged path, validated together
    fn output_paths(
        &self,
        media: &MediaInfo,
        outputs: &[OutputSegment],
        settings: &ExportSettings,
    ) -> SegcutResult<(Vec<PathBuf>, Option<PathBuf>)> {
        let ctx = NamingContext {
            stem: file_stem(&media.path),
            ext: settings
                .output_ext
                .clone()
                .or_else(|| {
                    media
                        .path
                        .extension()
                        .map(|e| e.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| "mkv".to_string()),
            count: outputs.len(),
            max_len: settings.max_filename_len,
        };

        let mut names: Vec<String> = outputs
            .iter()
            .enumerate()
            .map(|(i, seg)| naming::generate(seg, i, &settings.segment_template, &ctx))
            .collect();

        let merged_name = if settings.merge && outputs.len() > 1 {
            let whole = OutputSegment {
                start: outputs.iter().map(|o| o.start).fold(f64::INFINITY, f64::min),
                end: outputs.iter().map(|o| o.end).fold(0.0, f64::max),
                name: String::new(),
                tags: Default::default(),
                source: outputs[0].source.clone(),
            };
            Some(naming::generate(&whole, 0, &settings.merged_template, &ctx))
        } else {
            None
        };

        if let Some(merged) = &merged_name {
            names.push(merged.clone());
        }
        naming::validate(&names, settings.max_filename_len)?;
        if merged_name.is_some() {
            names.pop();
        }

        let segment_paths = names.iter().map(|n| settings.output_dir.join(n)).collect();
        let merge_path = merged_name.map(|n| settings.output_dir.join(n));

        Ok((segment_paths, merge_path))
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{StreamKind, Timebase};

    fn video(codec: &str) -> StreamInfo {
        let mut stream = StreamInfo::new(0, StreamKind::Video, codec);
        stream.time_base = Some(Timebase { num: 1, den: 15360 });
        stream
    }

    #[test]
    fn test_encoder_profile_families() {
        let profile = EncoderProfile::for_stream(&video("hevc"), None).unwrap();
        assert_eq!(profile.encoder, "libx265");
        assert_eq!(
            EncoderProfile::for_stream(&video("vp9"), None).unwrap().encoder,
            "libvpx-vp9"
        );
        assert!(EncoderProfile::for_stream(&video("prores"), None).is_none());
    }

    #[test]
    fn test_encoder_profile_bitrate_falls_back_to_container() {
        let mut stream = video("h264");
        assert_eq!(
            EncoderProfile::for_stream(&stream, Some(4_000_000)).unwrap().bit_rate,
            Some(4_000_000)
        );
        stream.bit_rate = Some(1_000_000);
        assert_eq!(
            EncoderProfile::for_stream(&stream, Some(4_000_000)).unwrap().bit_rate,
            Some(1_000_000)
        );
    }

    #[test]
    fn test_encoder_profile_requires_timebase() {
        let mut stream = video("h264");
        stream.time_base = None;
        assert!(EncoderProfile::for_stream(&stream, None).is_none());
    }
}
