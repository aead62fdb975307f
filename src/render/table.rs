use super::svg::format_value;
use crate::models::QueryResult;
use serde_json::Value;

const MAX_CELL_WIDTH: usize = 32;

pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Number(number) => number
            .as_f64()
            .map(format_value)
            .unwrap_or_else(|| number.to_string()),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_WIDTH {
        return text.to_string();
    }
    let mut clipped = text.chars().take(MAX_CELL_WIDTH - 1).collect::<String>();
    clipped.push('~');
    clipped
}

/// Fixed-width text table. `selected` marks a row with `>`.
pub fn render_table(result: &QueryResult, max_rows: usize, selected: Option<usize>) -> String {
    if result.columns.is_empty() {
        return "(no columns)\n".to_string();
    }

    let shown = result.rows.len().min(max_rows);
    let cells = result.rows[..shown]
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .map(|column| clip(&row.get(column).map(cell_text).unwrap_or_default()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut widths = result
        .columns
        .iter()
        .map(|column| clip(column).chars().count())
        .collect::<Vec<_>>();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: &[String], marker: char| {
        let joined = values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:<width$}", value, width = *width))
            .collect::<Vec<_>>()
            .join(" | ");
        format!("{} {}\n", marker, joined.trim_end())
    };

    let header = result.columns.iter().map(|column| clip(column)).collect::<Vec<_>>();
    let mut out = line(&header, ' ');
    let rule = widths.iter().map(|width| "-".repeat(*width)).collect::<Vec<_>>().join("-+-");
    out.push_str(&format!("  {}\n", rule));
    for (index, row) in cells.iter().enumerate() {
        out.push_str(&line(row, if selected == Some(index) { '>' } else { ' ' }));
    }

    let hidden = result.rows.len() - shown;
    if hidden > 0 || result.truncated {
        let mut note = format!("({} rows", result.rows.len());
        if hidden > 0 {
            note.push_str(&format!(", {} not shown", hidden));
        }
        if result.truncated {
            note.push_str(", result truncated at the row limit");
        }
        note.push_str(")\n");
        out.push_str(&note);
    } else {
        out.push_str(&format!("({} rows)\n", result.rows.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::render_table;
    use crate::models::{QueryResult, Row};
    use serde_json::json;

    fn result() -> QueryResult {
        let rows = [json!({"channel": "Fz", "avg_alpha": 0.8}), json!({"channel": "O1", "avg_alpha": null})]
            .into_iter()
            .map(|value| value.as_object().expect("object").clone())
            .collect::<Vec<Row>>();
        QueryResult {
            columns: vec!["channel".to_string(), "avg_alpha".to_string()],
            rows,
            truncated: false,
        }
    }

    #[test]
    fn renders_aligned_columns_with_selection_marker() {
        let table = render_table(&result(), 10, Some(1));
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "  channel | avg_alpha");
        assert_eq!(lines[2], "  Fz      | 0.8");
        assert_eq!(lines[3], "> O1      |");
        assert_eq!(lines[4], "(2 rows)");
    }

    #[test]
    fn notes_hidden_and_truncated_rows() {
        let mut result = result();
        result.truncated = true;
        let table = render_table(&result, 1, None);
        assert!(table.ends_with("(2 rows, 1 not shown, result truncated at the row limit)\n"));
    }
}
