//! Rendering shared by the sheet commands.

use std::collections::BTreeMap;

use serde::Serialize;
use sitewatch_core::Record;
use sitewatch_core::bindings::ColumnBindings;
use sitewatch_core::bindings::FieldRole;
use sitewatch_core::classify::ClassificationTag;
use sitewatch_core::view::Page;

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOut {
    pub row: u32,
    pub fields: BTreeMap<String, String>,
    pub tags: Vec<ClassificationTag>,
}

impl From<&Record> for RecordOut {
    fn from(record: &Record) -> Self {
        Self {
            row: record.row_number(),
            fields: record
                .fields()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            tags: record.tags().iter().copied().collect(),
        }
    }
}

/// Bound cell for `role`, or `-` when blank or unbound.
pub fn role_cell<'r>(record: &'r Record, bindings: &ColumnBindings, role: FieldRole) -> &'r str {
    bindings
        .value(record, role)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("-")
}

/// Left-aligned columns sized to their widest cell.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let mut out = render_row(headers.iter().copied(), &widths);
    for row in rows {
        out.push('\n');
        out.push_str(&render_row(row.iter().map(String::as_str), &widths));
    }
    out
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths.iter().copied())
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

pub fn page_footer<T>(page: &Page<T>) -> String {
    format!(
        "page {}/{} ({} record(s))",
        page.page, page.total_pages, page.total_items
    )
}
