//! Output file naming
//!
//! Templates use `{stem}`, `{ext}`, `{index}`, `{count}`, `{name}`, `{start}`,
//! `{end}` and `{tag:KEY}`. Unknown placeholders are kept literally.

use std::collections::HashSet;

use crate::domain::model::{OutputSegment, TimeSpec};
use crate::error::{SegcutError, SegcutResult};

/// Template used for per-segment outputs
pub const DEFAULT_SEGMENT_TEMPLATE: &str = "{stem}-{start}-{end}{name}.{ext}";

/// Template used for the merged output
pub const DEFAULT_MERGED_TEMPLATE: &str = "{stem}-merged.{ext}";

/// Default byte limit for generated file names
pub const DEFAULT_MAX_FILENAME_LEN: usize = 200;

const RESERVED_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Values shared by every name in one export
#[derive(Debug, Clone)]
pub struct NamingContext {
    pub stem: String,
    pub ext: String,
    pub count: usize,
    pub max_len: usize,
}

/// Render `template` for the segment at zero-based `index`
pub fn generate(segment: &OutputSegment, index: usize, template: &str, ctx: &NamingContext) -> String {
    let mut out = String::with_capacity(template.len() + ctx.stem.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let key = &after[..close];
        match expand(key, segment, index, ctx) {
            Some(value) => out.push_str(&sanitize(&value)),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    truncate_preserving_extension(&sanitize(&out), ctx.max_len)
}

fn expand(key: &str, segment: &OutputSegment, index: usize, ctx: &NamingContext) -> Option<String> {
    let value = match key {
        "stem" => ctx.stem.clone(),
        "ext" => ctx.ext.clone(),
        "index" => (index + 1).to_string(),
        "count" => ctx.count.to_string(),
        "name" if segment.name.is_empty() => String::new(),
        "name" => format!("-{}", segment.name),
        "start" => TimeSpec::from_seconds(segment.start).format_for_filename(),
        "end" => TimeSpec::from_seconds(segment.end).format_for_filename(),
        _ => {
            let tag = key.strip_prefix("tag:")?;
            segment.tags.get(tag).cloned().unwrap_or_default()
        }
    };
    Some(value)
}

/// Replace separators, reserved and control characters with `_`
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if RESERVED_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

fn truncate_preserving_extension(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= max_len / 2 => name.split_at(dot),
        _ => (name, ""),
    };
    let mut budget = max_len.saturating_sub(ext.len());
    while !stem.is_char_boundary(budget) {
        budget -= 1;
    }
    format!("{}{}", &stem[..budget], ext)
}

/// Reject unusable or colliding file names
pub fn validate(names: &[String], max_len: usize) -> SegcutResult<()> {
    let mut seen = HashSet::new();

    for name in names {
        if name.trim().is_empty() {
            return Err(SegcutError::validation("empty output file name"));
        }
        if let Some(c) = name.chars().find(|c| RESERVED_CHARS.contains(c) || c.is_control()) {
            return Err(SegcutError::validation(format!(
                "output file name {:?} contains reserved character {:?}",
                name, c
            )));
        }
        if name.len() > max_len {
            return Err(SegcutError::validation(format!(
                "output file name {:?} exceeds {} bytes",
                name, max_len
            )));
        }
        if name == "." || name == ".." || name.ends_with(' ') || name.ends_with('.') {
            return Err(SegcutError::validation(format!(
                "output file name {:?} is not portable",
                name
            )));
        }

        let stem = name.split('.').next().unwrap_or_default().to_ascii_uppercase();
        if RESERVED_NAMES.contains(&stem.as_str()) {
            return Err(SegcutError::validation(format!(
                "output file name {:?} uses reserved name {}",
                name, stem
            )));
        }

        if !seen.insert(name.to_lowercase()) {
            return Err(SegcutError::validation(format!(
                "output file name {:?} collides with another segment",
                name
            )));
        }
    }

    Ok(())
}
