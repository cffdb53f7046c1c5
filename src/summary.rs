//! Status-count summary rendering.

use std::fmt::Write;

use crate::model::StatusCounts;

const TITLE: &str = "Task Status";
const HEADERS: [&str; 2] = ["Status", "Count"];

/// Output format of `summary`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SummaryFormat {
    /// Boxed two-column table.
    #[default]
    Table,
    /// `status<TAB>count` lines.
    Tsv,
}

/// Render non-zero status counts in lifecycle order.
pub fn render_summary(counts: &StatusCounts, format: SummaryFormat) -> String {
    let rows: Vec<(String, String)> = counts
        .non_zero()
        .into_iter()
        .map(|(status, n)| (status.to_string(), n.to_string()))
        .collect();

    match format {
        SummaryFormat::Tsv => rows
            .iter()
            .map(|(status, count)| format!("{status}\t{count}\n"))
            .collect(),
        SummaryFormat::Table => render_table(&rows),
    }
}

fn render_table(rows: &[(String, String)]) -> String {
    let status_width = rows
        .iter()
        .map(|(s, _)| s.len())
        .chain([HEADERS[0].len()])
        .max()
        .unwrap_or(0);
    let count_width = rows
        .iter()
        .map(|(_, c)| c.len())
        .chain([HEADERS[1].len()])
        .max()
        .unwrap_or(0);

    // Borders plus one space of padding on each side of a cell.
    let total_width = status_width + count_width + 7;
    let rule = |left: char, mid: char, right: char| {
        format!(
            "{left}{}{mid}{}{right}\n",
            "─".repeat(status_width + 2),
            "─".repeat(count_width + 2)
        )
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", center(TITLE, total_width).trim_end());
    out.push_str(&rule('┌', '┬', '┐'));
    let _ = writeln!(
        out,
        "│ {} │ {:<count_width$} │",
        center(HEADERS[0], status_width),
        HEADERS[1]
    );
    out.push_str(&rule('├', '┼', '┤'));
    for (status, count) in rows {
        let _ = writeln!(
            out,
            "│ {} │ {count:<count_width$} │",
            center(status, status_width)
        );
    }
    out.push_str(&rule('└', '┴', '┘'));
    out
}

/// Center `text` in `width` columns, extra space going right.
fn center(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text.chars().count());
    let left = pad / 2;
    format!("{}{text}{}", " ".repeat(left), " ".repeat(pad - left))
}
