//! Stream copy of one time range

use std::path::Path;

use crate::ports::CommandSpec;

/// Quiet stderr and machine-readable progress on stdout
pub(crate) fn base_command_with_stdin(ffmpeg: &str) -> CommandSpec {
    CommandSpec::new(ffmpeg).args([
        "-hide_banner",
        "-loglevel",
        "error",
        "-progress",
        "pipe:1",
        "-nostats",
    ])
}

/// [`base_command_with_stdin`] for invocations that never read stdin
pub(crate) fn base_command(ffmpeg: &str) -> CommandSpec {
    base_command_with_stdin(ffmpeg).arg("-nostdin")
}

/// Seconds with microsecond precision, as ffmpeg expects them
pub(crate) fn seconds_arg(seconds: f64) -> String {
    format!("{:.6}", seconds.max(0.0))
}

/// Input seek plus `-map` for each selected stream
pub(crate) fn input_range(spec: CommandSpec, input: &Path, from: f64, to: f64, streams: &[usize]) -> CommandSpec {
    let mut spec = spec
        .arg("-ss")
        .arg(seconds_arg(from))
        .arg("-i")
        .arg(input.to_string_lossy())
        .arg("-t")
        .arg(seconds_arg(to - from));
    for index in streams {
        spec = spec.arg("-map").arg(format!("0:{}", index));
    }
    spec
}

/// Lossless copy of `[from, to)` into `output`
pub fn copy_command(
    ffmpeg: &str,
    input: &Path,
    from: f64,
    to: f64,
    streams: &[usize],
    output: &Path,
) -> CommandSpec {
    input_range(base_command(ffmpeg), input, from, to, streams)
        .args(["-c", "copy", "-map_metadata", "0", "-avoid_negative_ts", "make_zero", "-y"])
        .arg(output.to_string_lossy())
}
