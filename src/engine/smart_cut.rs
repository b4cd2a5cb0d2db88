//! Frame-accurate start: encode up to the next keyframe, copy the rest, join

use std::path::Path;

use tracing::{debug, info, warn};

use crate::engine::concat::{absolute_paths, build_concat_list, concat_command};
use crate::engine::copy::{base_command, input_range};
use crate::engine::{work_dir_near, CutExecutor, StageContext};
use crate::error::{SegcutError, SegcutResult};
use crate::planner::{EncoderProfile, PlannedSegment};
use crate::ports::CommandSpec;

/// Extensions written by the mov/mp4 muxer
const MOV_EXTENSIONS: [&str; 7] = ["mp4", "mov", "m4v", "m4a", "3gp", "3g2", "mj2"];

fn uses_mov_muxer(output: &Path) -> bool {
    output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| MOV_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Encode `[from, to)`: the reference stream with `encoder`, every other stream copied.
///
/// The source timebase is forced on the encoded stream so the head can be
/// joined with a copied tail.
#[allow(clippy::too_many_arguments)]
pub fn head_command(
    ffmpeg: &str,
    input: &Path,
    streams: &[usize],
    from: f64,
    to: f64,
    encoder: &EncoderProfile,
    out_index: usize,
    output: &Path,
) -> CommandSpec {
    let mut spec = input_range(base_command(ffmpeg), input, from, to, streams)
        .args(["-c", "copy"])
        .arg(format!("-c:{}", out_index))
        .arg(encoder.encoder.as_str());

    if let Some(bit_rate) = encoder.bit_rate {
        spec = spec.arg(format!("-b:{}", out_index)).arg(bit_rate.to_string());
    }
    if let Some(pix_fmt) = &encoder.pix_fmt {
        spec = spec.arg(format!("-pix_fmt:{}", out_index)).arg(pix_fmt.as_str());
    }

    spec = if uses_mov_muxer(output) {
        spec.arg("-video_track_timescale")
            .arg(encoder.time_base.den.to_string())
    } else {
        spec.arg(format!("-enc_time_base:{}", out_index))
            .arg(encoder.time_base.to_string())
    };

    spec.args(["-map_metadata", "0", "-avoid_negative_ts", "make_zero", "-y"])
        .arg(output.to_string_lossy())
}

/// Whether a failed encode means the encoder is missing from this ffmpeg build
pub fn is_unsupported_encoder(error: &SegcutError) -> bool {
    let SegcutError::Execution {
        message,
        status_text,
        ..
    } = error
    else {
        return false;
    };
    std::iter::once(message).chain(status_text).any(|line| {
        let lower = line.to_ascii_lowercase();
        lower.contains("unknown encoder")
            || lower.contains("encoder not found")
            || (lower.contains("encoder") && lower.contains("not available"))
    })
}

impl CutExecutor {
    /// Smart cut of `segment` with the head encoded up to `boundary`; returns warnings
    pub(crate) async fn smart_cut(
        &self,
        input: &Path,
        segment: &PlannedSegment,
        boundary: f64,
        encoder: &EncoderProfile,
        ctx: &StageContext<'_>,
    ) -> SegcutResult<Vec<String>> {
        let (from, to) = (segment.cut_from, segment.cut_to);

        let out_index = match segment.reference_output_index() {
            Some(index) if (boundary - from).abs() > self.epsilon => index,
            _ => {
                debug!("Start {:.3}s is on a keyframe; copying", from);
                self.copy_whole(input, segment, ctx).await?;
                return Ok(Vec::new());
            }
        };

        let work = work_dir_near(&segment.output_path)?;
        let ext = segment
            .output_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mkv".to_string());
        let head = work.path().join(format!("head.{}", ext));
        let tail = work.path().join(format!("tail.{}", ext));

        let span = (to - from).max(f64::EPSILON);
        let head_end = boundary.min(to);
        let head_share = ((head_end - from) / span).clamp(0.0, 1.0);

        info!(
            "Step 1/3: Encoding {:.3}s - {:.3}s with {}",
            from, head_end, encoder.encoder
        );
        let spec = head_command(
            &self.ffmpeg_path,
            input,
            &segment.streams,
            from,
            head_end,
            encoder,
            out_index,
            &head,
        );
        match self
            .run_stage(spec, head_end - from, "smart cut encode", ctx, &|f| {
                ctx.report(f * head_share)
            })
            .await
        {
            Ok(_) => {}
            Err(e) if is_unsupported_encoder(&e) => {
                let message = format!(
                    "Encoder {} is unavailable; {} cut without frame accuracy",
                    encoder.encoder, segment.output.source
                );
                warn!("{}", message);
                drop(work);
                self.copy_whole(input, segment, ctx).await?;
                return Ok(vec![message]);
            }
            Err(e) => return Err(e),
        }

        if boundary >= to {
            debug!("Encoded head covers the whole segment");
            tokio::fs::rename(&head, &segment.output_path)
                .await
                .map_err(|e| SegcutError::from_io(e, &segment.output_path))?;
            return Ok(Vec::new());
        }

        info!("Step 2/3: Copying {:.3}s - {:.3}s", boundary, to);
        self.copy_range(input, segment, boundary, to, &tail, ctx, &|f| {
            ctx.report(head_share + f * (1.0 - head_share))
        })
        .await?;

        info!("Step 3/3: Joining encoded head and copied tail");
        self.check_timebases(&head, &tail, out_index).await?;
        let parts = absolute_paths(&[head, tail]).await?;
        let spec = concat_command(
            &self.ffmpeg_path,
            build_concat_list(&parts),
            None,
            &segment.output_path,
        );
        self.run_stage(spec, to - from, "smart cut join", ctx, &|_| {})
            .await?;

        Ok(Vec::new())
    }

    /// Both parts must carry the same timebase on the reference stream
    async fn check_timebases(&self, head: &Path, tail: &Path, out_index: usize) -> SegcutResult<()> {
        let head_tb = self.probe.probe(head).await?.stream(out_index).and_then(|s| s.time_base);
        let tail_tb = self.probe.probe(tail).await?.stream(out_index).and_then(|s| s.time_base);

        if head_tb != tail_tb {
            let show = |tb: Option<crate::domain::model::Timebase>| {
                tb.map(|t| t.to_string()).unwrap_or_else(|| "unknown".to_string())
            };
            return Err(SegcutError::Execution {
                stage: "smart cut join".to_string(),
                exit_code: None,
                message: format!(
                    "timebase mismatch between encoded head ({}) and copied tail ({})",
                    show(head_tb),
                    show(tail_tb)
                ),
                status_text: Vec::new(),
            });
        }
        debug!("Head and tail share timebase {:?}", head_tb);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Timebase;

    fn profile() -> EncoderProfile {
        EncoderProfile {
            codec: "h264".into(),
            encoder: "libx264".into(),
            bit_rate: Some(2_500_000),
            time_base: Timebase { num: 1, den: 15360 },
            pix_fmt: Some("yuv420p".into()),
        }
    }

    #[test]
    fn test_head_command_for_mp4_sets_track_timescale() {
        let spec = head_command(
            "ffmpeg",
            Path::new("in.mp4"),
            &[0, 1],
            12.3,
            13.0,
            &profile(),
            0,
            Path::new("/out/.segcut-x/head.mp4"),
        );
        let args = spec.args.join(" ");
        assert!(args.contains("-ss 12.300000 -i in.mp4 -t 0.700000"));
        assert!(args.contains("-c copy -c:0 libx264 -b:0 2500000 -pix_fmt:0 yuv420p"));
        assert!(args.contains("-video_track_timescale 15360"));
        assert!(!args.contains("-enc_time_base"));
    }

    #[test]
    fn test_head_command_for_mkv_sets_encoder_timebase() {
        let spec = head_command(
            "ffmpeg",
            Path::new("in.mkv"),
            &[1, 0],
            1.0,
            2.0,
            &profile(),
            1,
            Path::new("head.mkv"),
        );
        let args = spec.args.join(" ");
        assert!(args.contains("-c:1 libx264"));
        assert!(args.contains("-enc_time_base:1 1/15360"));
    }

    #[test]
    fn test_unsupported_encoder_classification() {
        let missing = SegcutError::from_process_failure(
            "smart cut encode",
            Some(1),
            &["Unknown encoder 'libsvtav1'".to_string()],
        );
        assert!(is_unsupported_encoder(&missing));

        let other = SegcutError::from_process_failure(
            "smart cut encode",
            Some(1),
            &["Invalid data found when processing input".to_string()],
        );
        assert!(!is_unsupported_encoder(&other));
        assert!(!is_unsupported_encoder(&SegcutError::Cancelled));
    }
}
