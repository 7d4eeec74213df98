//! Next free row for an append, judged by a window of watched columns.
//!
//! The whole-column span covering the window is read fresh on every call.
//! A row is occupied when any watched cell holds anything at all,
//! whitespace included.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::a1;
use crate::error::Result;
use crate::error::SheetsError;
use crate::tabular::TabularAdapter;

/// Columns whose occupancy decides where the next row goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchWindow {
    columns: Vec<usize>,
}

impl WatchWindow {
    pub fn new(mut columns: Vec<usize>) -> Result<Self> {
        columns.sort_unstable();
        columns.dedup();
        if columns.is_empty() {
            return Err(SheetsError::InvalidInput(
                "watch window needs at least one column".to_string(),
            ));
        }
        if let Some(last) = columns.last() {
            a1::column_letter(*last)?;
        }
        Ok(Self { columns })
    }

    /// Parse `"F,G,H"`, `"F:H"` or a mix such as `"A, F:H"`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut columns = Vec::new();
        for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once(':') {
                Some((from, to)) => {
                    let (from, to) = (a1::column_index(from)?, a1::column_index(to)?);
                    if from > to {
                        return Err(SheetsError::InvalidInput(format!(
                            "column range '{part}' runs backwards"
                        )));
                    }
                    columns.extend(from..=to);
                }
                None => columns.push(a1::column_index(part)?),
            }
        }
        Self::new(columns)
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// First and last watched column.
    pub fn span(&self) -> (usize, usize) {
        let first = self.columns.first().copied().unwrap_or_default();
        let last = self.columns.last().copied().unwrap_or(first);
        (first, last)
    }

    /// `cells` starts at the first column of [`Self::span`].
    pub fn is_occupied(&self, cells: &[String]) -> bool {
        let (first, _) = self.span();
        self.columns
            .iter()
            .filter_map(|col| cells.get(col - first))
            .any(|cell| !cell.is_empty())
    }
}

/// Target row for an append given the span grid read from row 1.
pub fn next_free_row(span_rows: &[Vec<String>], window: &WatchWindow, header_row_index: usize) -> u32 {
    let floor = header_row_index as u32 + 2;
    let last_occupied = span_rows
        .iter()
        .rposition(|cells| window.is_occupied(cells))
        .map(|idx| idx as u32 + 1);
    match last_occupied {
        Some(row) => (row + 1).max(floor),
        None => floor,
    }
}

#[derive(Clone)]
pub struct AppendRowResolver {
    adapter: Arc<TabularAdapter>,
}

impl AppendRowResolver {
    pub fn new(adapter: Arc<TabularAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn resolve(
        &self,
        spreadsheet_id: &str,
        tab_name: &str,
        window: &WatchWindow,
        header_row_index: usize,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let (first, last) = window.span();
        let range = a1::column_span(tab_name, first, last)?;
        let rows = self.adapter.read_range(spreadsheet_id, &range, cancel).await?;
        let row = next_free_row(&rows, window, header_row_index);
        debug!(spreadsheet_id, tab = tab_name, %range, row, "resolved append row");
        Ok(row)
    }

    /// Fails with `AppendConflict` when `row` gained content since it was
    /// resolved.
    pub async fn verify_row_free(
        &self,
        spreadsheet_id: &str,
        tab_name: &str,
        window: &WatchWindow,
        row: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (first, last) = window.span();
        let range = a1::row_span(tab_name, first, last, row)?;
        let rows = self.adapter.read_range(spreadsheet_id, &range, cancel).await?;
        if rows.iter().any(|cells| window.is_occupied(cells)) {
            return Err(SheetsError::AppendConflict { row });
        }
        Ok(())
    }
}
