//! Dataset loading: JSON/CSV/plain-text files, inline pipe tables, and
//! nested dataset references.

use crate::error::{HarnessError, HarnessResult};
use crate::types::DatasetRow;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

fn canonical_header(key: &str) -> Option<&'static str> {
    match key.trim().to_lowercase().as_str() {
        "id" => Some("id"),
        "question" => Some("question"),
        "expected_answer" | "expected_output" => Some("expected_answer"),
        "category" => Some("category"),
        "dataset_file" => Some("dataset_file"),
        "source_reference" => Some("source_reference"),
        _ => None,
    }
}

fn optional_str(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn is_empty_value(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

fn normalize_record(record: &Map<String, Value>, index: usize) -> HarnessResult<DatasetRow> {
    let mut known: Map<String, Value> = Map::new();
    let mut additional: BTreeMap<String, Value> = BTreeMap::new();

    for (key, value) in record {
        match canonical_header(key) {
            Some(canonical) => {
                known.insert(canonical.to_string(), value.clone());
            }
            None => {
                if !is_empty_value(value) {
                    additional.insert(key.clone(), value.clone());
                }
            }
        }
    }

    let question = optional_str(known.get("question")).unwrap_or_default();
    if question.is_empty() {
        return Err(HarnessError::Dataset {
            message: format!("Dataset row {index} has empty question"),
        });
    }

    let id = optional_str(known.get("id")).unwrap_or_else(|| format!("Q{index}"));

    Ok(DatasetRow {
        id,
        question,
        expected_answer: optional_str(known.get("expected_answer")),
        dataset_file: optional_str(known.get("dataset_file")),
        category: optional_str(known.get("category")),
        source_reference: optional_str(known.get("source_reference")),
        additional_metadata: additional,
    })
}

/// Normalize raw records into rows. Indexing is 1-based so generated ids and
/// error messages match what a human counting rows would say.
pub fn load_dataset_records(records: &[Map<String, Value>]) -> HarnessResult<Vec<DatasetRow>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| normalize_record(record, i + 1))
        .collect()
}

fn records_from_json(raw: Value) -> HarnessResult<Vec<Map<String, Value>>> {
    let list = match raw {
        Value::Object(mut obj) => obj.remove("questions").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    let Value::Array(items) = list else {
        return Err(HarnessError::Dataset {
            message: "JSON dataset must be a list or contain a 'questions' list".to_string(),
        });
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(HarnessError::Dataset {
                message: format!("JSON dataset entries must be objects, got: {other}"),
            }),
        })
        .collect()
}

/// Minimal RFC-4180 reader: quoted fields, doubled-quote escapes, newlines
/// inside quotes, CRLF line endings.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    rows
}

fn records_from_csv(text: &str) -> HarnessResult<Vec<Map<String, Value>>> {
    let mut rows = parse_csv(text).into_iter();
    let Some(headers) = rows.next() else {
        return Ok(Vec::new());
    };
    Ok(rows
        .map(|values| {
            headers
                .iter()
                .zip(values)
                .map(|(header, value)| (header.clone(), Value::String(value)))
                .collect()
        })
        .collect())
}

/// Load a dataset file; the format is picked by extension. Plain-text and
/// markdown files carry one question per non-empty line.
pub fn load_dataset_file(path: &Path) -> HarnessResult<Vec<DatasetRow>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    debug!(path = %path.display(), format = %extension, "Loading dataset file");

    match extension.as_str() {
        "json" => {
            let raw: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            load_dataset_records(&records_from_json(raw)?)
        }
        "csv" => load_dataset_records(&records_from_csv(&std::fs::read_to_string(path)?)?),
        "txt" | "md" => {
            let text = std::fs::read_to_string(path)?;
            let records: Vec<Map<String, Value>> = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .enumerate()
                .map(|(i, line)| {
                    let mut record = Map::new();
                    record.insert("id".to_string(), Value::String(format!("Q{}", i + 1)));
                    record.insert("question".to_string(), Value::String(line.to_string()));
                    record
                })
                .collect();
            load_dataset_records(&records)
        }
        _ => Err(HarnessError::Dataset {
            message: format!("Unsupported dataset format: {}", path.display()),
        }),
    }
}

/// Parse a pipe table (as pasted from a scenario outline or markdown doc):
/// first pipe line is the header, every following pipe line is a row with
/// the same column count.
pub fn load_inline_table(table_text: &str) -> HarnessResult<Vec<DatasetRow>> {
    let pipe_lines: Vec<&str> = table_text
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|') && line.ends_with('|'))
        .collect();

    if pipe_lines.len() < 2 {
        return Err(HarnessError::Dataset {
            message: "Inline dataset table must contain header and at least one row".to_string(),
        });
    }

    let split_cells = |line: &str| -> Vec<String> {
        line.trim_matches('|')
            .split('|')
            .map(|part| part.trim().to_string())
            .collect()
    };

    let headers = split_cells(pipe_lines[0]);
    let mut records: Vec<Map<String, Value>> = Vec::new();
    for row_line in &pipe_lines[1..] {
        let values = split_cells(row_line);
        if values.len() != headers.len() {
            return Err(HarnessError::Dataset {
                message: format!("Invalid inline table row: {row_line}"),
            });
        }
        records.push(
            headers
                .iter()
                .cloned()
                .zip(values.into_iter().map(Value::String))
                .collect(),
        );
    }

    load_dataset_records(&records)
}

/// Resolve a dataset reference to a file, trying in order: absolute path,
/// path relative to the working directory, path relative to the data root,
/// and finally a named dataset at `<data_root>/datasets/<ref>.json`.
pub fn resolve_dataset_reference(dataset_ref: &str, data_root: &Path) -> HarnessResult<PathBuf> {
    let candidate = PathBuf::from(dataset_ref);
    if candidate.is_absolute() && candidate.exists() {
        return Ok(candidate);
    }
    if candidate.is_relative() && candidate.exists() {
        return Ok(candidate);
    }

    let root_candidate = data_root.join(dataset_ref);
    if root_candidate.exists() {
        return Ok(root_candidate);
    }

    let named_candidate = data_root.join("datasets").join(format!("{dataset_ref}.json"));
    if named_candidate.exists() {
        return Ok(named_candidate);
    }

    Err(HarnessError::Dataset {
        message: format!("Dataset reference not found: {dataset_ref}"),
    })
}

/// Replace every row carrying a `dataset_file` reference with the rows of
/// the referenced file, in place. One level only; nested files referencing
/// further files are not followed.
pub fn expand_dataset_references(
    rows: Vec<DatasetRow>,
    data_root: &Path,
) -> HarnessResult<Vec<DatasetRow>> {
    let mut expanded: Vec<DatasetRow> = Vec::new();
    for row in rows {
        match &row.dataset_file {
            Some(reference) => {
                let nested_path = resolve_dataset_reference(reference, data_root)?;
                expanded.extend(load_dataset_file(&nested_path)?);
            }
            None => expanded.push(row),
        }
    }
    Ok(expanded)
}
