//! Time resolution for user segments
//!
//! Open-ended bounds are resolved against the media duration lazily, since the
//! duration may only become known after the file has been probed. Inversion
//! computes the complement of a non-overlapping segment set.

use tracing::{debug, warn};

use crate::domain::model::{OutputSegment, OutputSource, Segment, SegmentId};
use crate::error::{SegcutError, SegcutResult};

/// Apparent bounds of one segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApparentBounds {
    pub start: f64,
    /// `None` only while the segment is open-ended and the duration is unknown
    pub end: Option<f64>,
}

impl ApparentBounds {
    /// Both bounds known and strictly ordered
    pub fn is_valid(&self) -> bool {
        match self.end {
            Some(end) => self.start >= 0.0 && self.start < end,
            None => false,
        }
    }
}

/// Resolve `start ?? 0` and `end ?? duration`
pub fn resolve(segment: &Segment, duration: Option<f64>) -> ApparentBounds {
    ApparentBounds {
        start: segment.apparent_start(),
        end: segment.apparent_end(duration),
    }
}

/// Ids of every segment whose apparent bounds are not a proper interval
pub fn find_invalid(segments: &[Segment], duration: Option<f64>) -> Vec<SegmentId> {
    segments
        .iter()
        .filter(|seg| !resolve(seg, duration).is_valid())
        .map(|seg| seg.id)
        .collect()
}

/// Refuse segment sets containing any invalid interval
pub fn validate(segments: &[Segment], duration: Option<f64>) -> SegcutResult<()> {
    let invalid = find_invalid(segments, duration);
    if invalid.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = invalid.iter().map(|id| id.to_string()).collect();
    Err(SegcutError::validation(format!(
        "segment(s) with start >= end or unresolved bounds: {}",
        ids.join(", ")
    )))
}

/// Complement of `segments` over `[0, duration)`.
///
/// Returns `None` when the duration is unknown, a segment is invalid, or any
/// two segments overlap. Touching segments produce no gap between them.
pub fn invert(segments: &[Segment], duration: Option<f64>) -> Option<Vec<OutputSegment>> {
    let duration = duration?;
    if !find_invalid(segments, Some(duration)).is_empty() {
        return None;
    }

    let mut sorted: Vec<(f64, f64)> = segments
        .iter()
        .filter_map(|seg| {
            let bounds = resolve(seg, Some(duration));
            bounds.end.map(|end| (bounds.start, end))
        })
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    if sorted.windows(2).any(|pair| pair[0].1 > pair[1].0) {
        debug!("Inversion undefined: overlapping segments");
        return None;
    }

    let mut gaps = Vec::with_capacity(sorted.len() + 1);
    let mut cursor = 0.0_f64;
    for (start, end) in &sorted {
        if *start > cursor {
            gaps.push(gap(cursor, *start));
        }
        cursor = cursor.max(*end);
    }
    if cursor < duration {
        gaps.push(gap(cursor, duration));
    }

    Some(gaps)
}

fn gap(start: f64, end: f64) -> OutputSegment {
    OutputSegment {
        start,
        end,
        name: String::new(),
        tags: Default::default(),
        source: OutputSource::gap(start, end),
    }
}

/// Produce the export list for one export call.
///
/// Selected segments are used when any are selected; otherwise every segment
/// is exported and a warning is returned alongside the result.
pub fn output_segments(
    segments: &[Segment],
    duration: Option<f64>,
    inverted: bool,
) -> SegcutResult<(Vec<OutputSegment>, Vec<String>)> {
    let mut warnings = Vec::new();

    let selected: Vec<Segment> = segments.iter().filter(|s| s.selected).cloned().collect();
    let enabled = if selected.is_empty() {
        let message = "No segments selected; exporting all segments".to_string();
        warn!("{}", message);
        warnings.push(message);
        segments.to_vec()
    } else {
        selected
    };

    validate(&enabled, duration)?;

    if inverted {
        let gaps = invert(&enabled, duration).ok_or_else(|| {
            SegcutError::validation("cannot invert overlapping segments")
        })?;
        if gaps.is_empty() {
            return Err(SegcutError::validation(
                "inverted selection covers no part of the media",
            ));
        }
        return Ok((gaps, warnings));
    }

    let outputs = enabled
        .iter()
        .filter_map(|seg| {
            let bounds = resolve(seg, duration);
            bounds.end.map(|end| OutputSegment {
                start: bounds.start,
                end,
                name: seg.name.clone(),
                tags: seg.tags.clone(),
                source: OutputSource::Segment(seg.id),
            })
        })
        .collect();

    Ok((outputs, warnings))
}
