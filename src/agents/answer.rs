//! Final answer classification
//!
//! The model hands back arbitrary JSON through the `final_answer` tool. Before
//! checks run and results are displayed it is sorted into a table, a saved
//! artifact, or a plain value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalAnswer {
    /// Records with named fields
    Table { rows: Vec<Row> },
    /// A file written during the run, plus whatever the model returned with it
    Artifact { path: PathBuf, value: Value },
    Scalar { value: Value },
}

impl FinalAnswer {
    /// Sort a raw answer. A configured artifact that exists on disk wins;
    /// JSON text is parsed before classification.
    pub fn classify(raw: Value, artifact: Option<&Path>) -> Self {
        let parsed = raw
            .as_str()
            .and_then(|text| serde_json::from_str::<Value>(text.trim()).ok())
            .filter(|v| v.is_array() || v.is_object());
        let value = parsed.unwrap_or(raw);

        if let Some(path) = artifact {
            if path.is_file() {
                return FinalAnswer::Artifact {
                    path: path.to_path_buf(),
                    value,
                };
            }
        }

        match as_rows(&value) {
            Some(rows) => FinalAnswer::Table { rows },
            None => FinalAnswer::Scalar { value },
        }
    }

    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            FinalAnswer::Table { rows } => Some(rows),
            _ => None,
        }
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        match self {
            FinalAnswer::Artifact { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Plain-text rendering for logs and the `text` output format
    pub fn to_text(&self) -> String {
        match self {
            FinalAnswer::Table { rows } => {
                serde_json::to_string_pretty(rows).unwrap_or_else(|_| format!("{:?}", rows))
            }
            FinalAnswer::Artifact { path, value } => match value {
                Value::Null => path.display().to_string(),
                other => format!("{} ({})", path.display(), value_text(other)),
            },
            FinalAnswer::Scalar { value } => value_text(value),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret a value as rows: a list of records, a list of lists, or a
/// record of equal-length columns
fn as_rows(value: &Value) -> Option<Vec<Row>> {
    match value {
        Value::Array(items) if !items.is_empty() => {
            if items.iter().all(Value::is_object) {
                return Some(
                    items
                        .iter()
                        .filter_map(|item| item.as_object().cloned())
                        .collect(),
                );
            }
            if items.iter().all(Value::is_array) {
                return Some(
                    items
                        .iter()
                        .filter_map(Value::as_array)
                        .map(|cells| {
                            cells
                                .iter()
                                .enumerate()
                                .map(|(i, cell)| (i.to_string(), cell.clone()))
                                .collect()
                        })
                        .collect(),
                );
            }
            None
        }
        Value::Object(columns) if !columns.is_empty() => {
            let lengths: Vec<usize> = columns
                .values()
                .map(|c| c.as_array().map(Vec::len))
                .collect::<Option<Vec<_>>>()?;
            let len = *lengths.first()?;
            if len == 0 || lengths.iter().any(|l| *l != len) {
                return None;
            }
            Some(
                (0..len)
                    .map(|i| {
                        columns
                            .iter()
                            .map(|(name, column)| (name.clone(), column[i].clone()))
                            .collect()
                    })
                    .collect(),
            )
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_become_table() {
        let answer = FinalAnswer::classify(
            json!([{"city": "Tokyo", "population_m": 37.19}, {"city": "Delhi", "population_m": 33.81}]),
            None,
        );
        let rows = answer.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["city"], "Delhi");
    }

    #[test]
    fn test_json_text_is_parsed() {
        let answer = FinalAnswer::classify(json!(r#"[{"city": "Tokyo"}]"#), None);
        assert_eq!(answer.rows().map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_columns_become_rows() {
        let answer = FinalAnswer::classify(
            json!({"city": ["Tokyo", "Delhi"], "temp_c": [9.6, 14.2]}),
            None,
        );
        let rows = answer.rows().unwrap();
        assert_eq!(rows[0]["temp_c"], 9.6);
        assert_eq!(rows[1]["city"], "Delhi");

        let ragged = FinalAnswer::classify(json!({"a": [1, 2], "b": [1]}), None);
        assert!(ragged.rows().is_none());
    }

    #[test]
    fn test_list_of_lists_uses_index_columns() {
        let answer = FinalAnswer::classify(json!([["Tokyo", 37.19]]), None);
        assert_eq!(answer.rows().unwrap()[0]["1"], 37.19);
    }

    #[test]
    fn test_plain_text_is_scalar() {
        let answer = FinalAnswer::classify(json!("Tokyo is the largest"), None);
        assert_eq!(answer.to_text(), "Tokyo is the largest");
        assert!(answer.rows().is_none());
    }

    #[test]
    fn test_existing_artifact_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_map.png");

        let before = FinalAnswer::classify(json!("saved_map.png"), Some(&path));
        assert!(before.artifact_path().is_none());

        std::fs::write(&path, b"png").unwrap();
        let after = FinalAnswer::classify(json!("saved_map.png"), Some(&path));
        assert_eq!(after.artifact_path(), Some(path.as_path()));
    }
}
