//! Rendering final answers for the terminal

use serde_json::Value;

use crate::agents::FinalAnswer;
use crate::ai::TokenUsage;

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("answer is not tabular ({0})")]
    NotTabular(&'static str),
    #[error("table has no columns")]
    NoColumns,
    #[error("could not serialize answer: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Render a table answer with a leading index column, columns in first-seen order
pub fn render_table(answer: &FinalAnswer) -> Result<String, DisplayError> {
    let rows = match answer {
        FinalAnswer::Table { rows } => rows,
        FinalAnswer::Artifact { .. } => return Err(DisplayError::NotTabular("artifact")),
        FinalAnswer::Scalar { .. } => return Err(DisplayError::NotTabular("scalar")),
    };

    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }
    if columns.is_empty() {
        return Err(DisplayError::NoColumns);
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            std::iter::once(i.to_string())
                .chain(columns.iter().map(|c| cell(row.get(*c))))
                .collect()
        })
        .collect();

    let header: Vec<String> = std::iter::once(String::new())
        .chain(columns.iter().map(|c| c.to_string()))
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|i| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(header[i].chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<w$}", v, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(&header));
    out.push('\n');
    out.push_str(&"-".repeat(widths.iter().sum::<usize>() + 2 * (widths.len() - 1)));
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row));
        out.push('\n');
    }
    Ok(out)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Text for an answer. Tables that cannot be drawn fall back to the raw value.
pub fn format_answer(answer: &FinalAnswer, format: OutputFormat) -> Result<String, DisplayError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(answer)?),
        OutputFormat::Text => match answer {
            FinalAnswer::Artifact { path, value } => {
                let mut out = format!("Saved artifact: {}", path.display());
                if !value.is_null() {
                    out.push_str(&format!("\nReturned value: {}", cell(Some(value))));
                }
                Ok(out)
            }
            _ => match render_table(answer) {
                Ok(table) => Ok(table),
                Err(e) => Ok(format!(
                    "Could not display as table: {}\n{}",
                    e,
                    answer.to_text()
                )),
            },
        },
    }
}

pub fn print_answer(answer: &FinalAnswer, format: OutputFormat) -> Result<(), DisplayError> {
    println!("{}", format_answer(answer, format)?);
    Ok(())
}

pub fn format_usage(steps: usize, usage: &TokenUsage) -> String {
    format!(
        "Steps: {} | Input tokens: {} | Output tokens: {} | Total: {}",
        steps,
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cities(n: usize) -> FinalAnswer {
        let rows: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "city": format!("City {}", i),
                    "population_millions": 30.0 - i as f64,
                    "december_temp_c": 20,
                })
            })
            .collect();
        FinalAnswer::classify(Value::Array(rows), None)
    }

    #[test]
    fn test_render_table_has_header_and_rows() {
        let table = render_table(&cities(10)).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 12);
        assert!(lines[0].contains("city"));
        assert!(lines[0].contains("december_temp_c"));
        assert!(lines[1].starts_with("---"));
        assert!(lines[2].starts_with("0 "));
        assert!(lines[11].starts_with("9 "));
        assert!(lines[11].contains("City 9"));
    }

    #[test]
    fn test_scalar_falls_back_to_raw_value() {
        let answer = FinalAnswer::classify(json!("Tokyo is the largest"), None);
        assert!(render_table(&answer).is_err());

        let text = format_answer(&answer, OutputFormat::Text).unwrap();
        assert!(text.starts_with("Could not display as table"));
        assert!(text.contains("Tokyo is the largest"));
    }

    #[test]
    fn test_missing_cells_render_blank() {
        let answer = FinalAnswer::classify(json!([{"a": 1, "b": 2}, {"a": 3}]), None);
        let table = render_table(&answer).unwrap();
        assert!(table.lines().nth(3).unwrap().starts_with("1  3"));
    }

    #[test]
    fn test_json_format() {
        let text = format_answer(&cities(1), OutputFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["kind"], "table");
    }
}
