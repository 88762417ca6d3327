//! Plain-text and JSON rendering for command output.

use serde::Serialize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::{QueryResult, Value};

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
}

fn pad(text: &str, width: usize, align: Align) -> String {
    let fill = " ".repeat(width.saturating_sub(text.width()));
    match align {
        Align::Left => format!("{text}{fill}"),
        Align::Right => format!("{fill}{text}"),
    }
}

/// Cut `text` to at most `max` display columns, marking the cut with `…`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > max {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

fn render_grid(headers: &[String], rows: &[Vec<(String, Align)>]) -> String {
    if headers.is_empty() {
        return "Empty set\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in rows {
        for (i, (cell, _)) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.width());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = separator.clone();
    let header: String = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("| {} ", pad(h, *w, Align::Left)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in rows {
        let line: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let (cell, align) = row
                    .get(i)
                    .map(|(c, a)| (c.as_str(), *a))
                    .unwrap_or(("", Align::Left));
                format!("| {} ", pad(cell, *w, align))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }
    output.push_str(&separator);
    output
}

/// ASCII table of plain string cells.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let rows: Vec<Vec<(String, Align)>> = rows
        .iter()
        .map(|row| row.iter().map(|c| (c.clone(), Align::Left)).collect())
        .collect();
    render_grid(&headers, &rows)
}

/// ASCII table of a query result with a row-count footer. Numbers are right-aligned.
pub fn render_result(result: &QueryResult) -> String {
    let rows: Vec<Vec<(String, Align)>> = result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| {
                    let align = match value {
                        Value::Int(_) | Value::Float(_) | Value::Numeric(_) => Align::Right,
                        _ => Align::Left,
                    };
                    (value.to_string(), align)
                })
                .collect()
        })
        .collect();

    let mut output = render_grid(&result.columns, &rows);
    if !result.columns.is_empty() {
        let noun = if result.row_count() == 1 { "row" } else { "rows" };
        output.push_str(&format!("{} {} in set\n", result.row_count(), noun));
    }
    output
}

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Query results as a JSON array of objects keyed by column name.
pub fn render_result_json(result: &QueryResult) -> anyhow::Result<String> {
    render_json(&result.to_records())
}
