//! Edit decision list import and export
//!
//! Import formats are loosely typed. Records are coerced into
//! [`SegmentDraft`]s here; rows that can never form a valid segment are
//! dropped with a warning.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::domain::model::{Segment, SegmentDraft, TimeSpec};
use crate::error::{SegcutError, SegcutResult};

/// Supported interchange formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdlFormat {
    Json,
    Csv,
}

impl EdlFormat {
    /// Pick a format from the file extension, defaulting to JSON
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => EdlFormat::Csv,
            _ => EdlFormat::Json,
        }
    }
}

/// Result of an import: the accepted drafts plus one warning per dropped row
#[derive(Debug, Clone, Default)]
pub struct EdlImport {
    pub drafts: Vec<SegmentDraft>,
    pub warnings: Vec<String>,
}

/// Parse EDL text in the given format
pub fn parse(content: &str, format: EdlFormat) -> SegcutResult<EdlImport> {
    let rows = match format {
        EdlFormat::Json => json_rows(content)?,
        EdlFormat::Csv => csv_rows(content)?,
    };
    accept(rows)
}

type Row = Result<SegmentDraft, String>;

fn accept(rows: Vec<Row>) -> SegcutResult<EdlImport> {
    let mut import = EdlImport::default();
    for (index, row) in rows.into_iter().enumerate() {
        let checked = row.and_then(|draft| match draft.problem() {
            Some(problem) => Err(problem),
            None => Ok(draft),
        });
        match checked {
            Ok(draft) => import.drafts.push(draft),
            Err(reason) => {
                let message = format!("Skipping row {}: {}", index + 1, reason);
                warn!("{}", message);
                import.warnings.push(message);
            }
        }
    }

    if import.drafts.is_empty() {
        return Err(SegcutError::validation("EDL contains no valid segments"));
    }
    Ok(import)
}

fn json_rows(content: &str) -> SegcutResult<Vec<Row>> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| SegcutError::validation(format!("invalid EDL JSON: {}", e)))?;

    let records = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("cutSegments").or_else(|| map.get("segments")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => {
                return Err(SegcutError::validation(
                    "EDL JSON object has no segment array",
                ))
            }
        },
        _ => return Err(SegcutError::validation("EDL JSON must be an array")),
    };

    Ok(records.iter().map(json_record).collect())
}

fn json_record(record: &Value) -> Row {
    let map = record
        .as_object()
        .ok_or_else(|| "record is not an object".to_string())?;

    let start = json_time(map.get("start"))?;
    let end = json_time(map.get("end"))?;
    let name = match map.get("name") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let mut tags = BTreeMap::new();
    if let Some(Value::Object(raw)) = map.get("tags") {
        for (key, value) in raw {
            let coerced = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            tags.insert(key.clone(), coerced);
        }
    }

    Ok(SegmentDraft {
        start,
        end,
        name,
        tags,
    })
}

fn json_time(value: Option<&Value>) -> Result<Option<f64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("unrepresentable time {}", n)),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => TimeSpec::parse(s)
            .map(|t| Some(t.seconds))
            .map_err(|e| e.to_string()),
        Some(other) => Err(format!("unsupported time value {}", other)),
    }
}

fn csv_rows(content: &str) -> SegcutResult<Vec<Row>> {
    let records = split_csv(content)?;
    let mut rows = Vec::with_capacity(records.len());

    for (index, fields) in records.into_iter().enumerate() {
        if fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        if index == 0 && fields[0].trim().eq_ignore_ascii_case("start") {
            continue;
        }

        let time = |field: Option<&String>| -> Result<Option<f64>, String> {
            match field.map(|f| f.trim()) {
                None | Some("") => Ok(None),
                Some(text) => TimeSpec::parse(text)
                    .map(|t| Some(t.seconds))
                    .map_err(|e| e.to_string()),
            }
        };

        let row = time(fields.first()).and_then(|start| {
            let end = time(fields.get(1))?;
            Ok(SegmentDraft {
                start,
                end,
                name: fields.get(2).cloned().unwrap_or_default(),
                tags: BTreeMap::new(),
            })
        });
        rows.push(row);
    }

    Ok(rows)
}

/// Split CSV into records of fields, honouring double-quoted fields
fn split_csv(content: &str) -> SegcutResult<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut fields));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(SegcutError::validation("unterminated quoted field in CSV"));
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(fields);
    }
    Ok(records)
}

/// Export segments as `start,end,name` CSV rows; open bounds stay blank
pub fn to_csv(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        let start = seg.start.map(|t| t.to_string()).unwrap_or_default();
        let end = seg.end.map(|t| t.to_string()).unwrap_or_default();
        out.push_str(&format!("{},{},{}\n", start, end, quote_csv(&seg.name)));
    }
    out
}

fn quote_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::SegmentId;

    #[test]
    fn test_json_array_with_loose_types() {
        let content = r#"[
            {"start": 1.5, "end": "00:10", "name": "a", "tags": {"n": 3, "ok": true, "skip": [1]}},
            {"start": null, "end": 4}
        ]"#;
        let import = parse(content, EdlFormat::Json).unwrap();
        assert_eq!(import.drafts.len(), 2);
        assert_eq!(import.drafts[0].end, Some(10.0));
        assert_eq!(import.drafts[0].tags.get("n").map(String::as_str), Some("3"));
        assert_eq!(import.drafts[0].tags.get("ok").map(String::as_str), Some("true"));
        assert!(!import.drafts[0].tags.contains_key("skip"));
        assert_eq!(import.drafts[1].start, None);
    }

    #[test]
    fn test_json_project_object() {
        let content = r#"{"version": 1, "cutSegments": [{"start": 0, "end": 2}]}"#;
        let import = parse(content, EdlFormat::Json).unwrap();
        assert_eq!(import.drafts.len(), 1);
    }

    #[test]
    fn test_invalid_rows_are_filtered() {
        let content = r#"[{"start": 5, "end": 5}, {"start": -1, "end": 2}, {"start": 1, "end": 2}]"#;
        let import = parse(content, EdlFormat::Json).unwrap();
        assert_eq!(import.drafts.len(), 1);
        assert_eq!(import.warnings.len(), 2);
    }

    #[test]
    fn test_all_invalid_is_hard_error() {
        let content = r#"[{"start": 5, "end": 1}]"#;
        let err = parse(content, EdlFormat::Json).unwrap_err();
        assert!(matches!(err, SegcutError::Validation { .. }));
    }

    #[test]
    fn test_csv_with_header_quotes_and_open_bounds() {
        let content = "start,end,name\n0,10,\"Intro, part 1\"\n20,,\"say \"\"hi\"\"\"\n,5,head\n";
        let import = parse(content, EdlFormat::Csv).unwrap();
        assert_eq!(import.drafts.len(), 3);
        assert_eq!(import.drafts[0].name, "Intro, part 1");
        assert_eq!(import.drafts[1].end, None);
        assert_eq!(import.drafts[1].name, "say \"hi\"");
        assert_eq!(import.drafts[2].start, None);
    }

    #[test]
    fn test_csv_unparseable_time_is_skipped() {
        let content = "abc,10,x\n1,2,y";
        let import = parse(content, EdlFormat::Csv).unwrap();
        assert_eq!(import.drafts.len(), 1);
        assert_eq!(import.warnings.len(), 1);
    }

    #[test]
    fn test_to_csv_is_reimportable() {
        let mut seg = Segment::placeholder(SegmentId(1));
        seg.start = Some(1.5);
        seg.name = "a,b".into();
        let csv = to_csv(&[seg]);
        assert_eq!(csv, "1.5,,\"a,b\"\n");
        let import = parse(&csv, EdlFormat::Csv).unwrap();
        assert_eq!(import.drafts[0].name, "a,b");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(EdlFormat::from_path(Path::new("cuts.CSV")), EdlFormat::Csv);
        assert_eq!(EdlFormat::from_path(Path::new("cuts.llc")), EdlFormat::Json);
    }
}
