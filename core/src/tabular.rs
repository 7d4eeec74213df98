//! Tab-as-record-store: header discovery and row materialisation.
//!
//! A tab is read whole. The row at `header_row_index` (zero-based) names the
//! fields; every following row becomes a [`Record`] whose `row_number` is the
//! live 1-based sheet row.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use sha2::Digest;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::a1;
use crate::classify::ClassificationTag;
use crate::error::Result;
use crate::error::SheetsError;
use crate::retry::RetryConfig;
use crate::retry::execute_with_backoff_cancellable;
use crate::sheets::SheetsApi;

/// Header layout of one tab, derived on every fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSchema {
    tab_name: String,
    header_row_index: usize,
    headers: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl TabSchema {
    pub fn new(tab_name: impl Into<String>, header_row_index: usize, headers: Vec<String>) -> Self {
        let tab_name = tab_name.into();
        let mut by_name = HashMap::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            // Later columns shadow earlier ones with the same name.
            if let Some(prev) = by_name.insert(header.clone(), idx)
                && !header.is_empty()
            {
                warn!(tab = %tab_name, header = %header, first = prev, last = idx, "duplicate header");
            }
        }
        Self {
            tab_name,
            header_row_index,
            headers,
            by_name,
        }
    }

    pub fn tab_name(&self) -> &str {
        &self.tab_name
    }

    pub fn header_row_index(&self) -> usize {
        self.header_row_index
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Column of `name`; the last one wins when a name repeats.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Non-empty header names that occur more than once, in first-seen order.
    pub fn duplicate_headers(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut dups: Vec<&str> = Vec::new();
        for header in self.headers.iter().filter(|h| !h.is_empty()) {
            if !seen.insert(header.as_str()) && !dups.contains(&header.as_str()) {
                dups.push(header.as_str());
            }
        }
        dups
    }

    /// First sheet row below the header (1-based).
    pub fn first_data_row(&self) -> u32 {
        self.header_row_index as u32 + 2
    }

    /// Stable hash of the ordered header list.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        for header in &self.headers {
            hasher.update(header.as_bytes());
            hasher.update([0x1f]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// One data row of a tab.
#[derive(Debug, Clone)]
pub struct Record {
    row_number: u32,
    schema: Arc<TabSchema>,
    cells: Vec<String>,
    tags: BTreeSet<ClassificationTag>,
}

impl Record {
    pub fn new(schema: Arc<TabSchema>, row_number: u32, mut cells: Vec<String>) -> Self {
        cells.resize(schema.width(), String::new());
        Self {
            row_number,
            schema,
            cells,
            tags: BTreeSet::new(),
        }
    }

    pub fn row_number(&self) -> u32 {
        self.row_number
    }

    pub fn schema(&self) -> &Arc<TabSchema> {
        &self.schema
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// Cell at `column`, `""` when the column is outside the header width.
    pub fn cell(&self, column: usize) -> &str {
        self.cells.get(column).map(String::as_str).unwrap_or("")
    }

    /// Value under header `name`; `None` only if the header does not exist.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.schema.position(name).map(|idx| self.cell(idx))
    }

    /// `(header, value)` pairs in column order, duplicates included.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schema
            .headers()
            .iter()
            .map(String::as_str)
            .zip(self.cells.iter().map(String::as_str))
    }

    pub fn tags(&self) -> &BTreeSet<ClassificationTag> {
        &self.tags
    }

    pub fn has_tag(&self, tag: ClassificationTag) -> bool {
        self.tags.contains(&tag)
    }

    pub(crate) fn tag(&mut self, tag: ClassificationTag) {
        self.tags.insert(tag);
    }

    /// Hash of the cell contents, used to detect rows that moved or changed.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for cell in &self.cells {
            hasher.update(cell.as_bytes());
            hasher.update([0x1f]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Split a raw grid into schema and records.
pub fn parse_grid(
    tab_name: &str,
    mut grid: Vec<Vec<String>>,
    header_row_index: usize,
) -> Result<(Arc<TabSchema>, Vec<Record>)> {
    if grid.len() <= header_row_index {
        return Err(SheetsError::Malformed(format!(
            "tab '{tab_name}' has {} row(s), header expected at row {}",
            grid.len(),
            header_row_index + 1
        )));
    }

    let data = grid.split_off(header_row_index + 1);
    let headers: Vec<String> = grid
        .pop()
        .unwrap_or_default()
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(SheetsError::Malformed(format!(
            "tab '{tab_name}' has an empty header row at row {}",
            header_row_index + 1
        )));
    }

    let schema = Arc::new(TabSchema::new(tab_name, header_row_index, headers));
    let first = schema.first_data_row();
    let records = data
        .into_iter()
        .enumerate()
        .map(|(offset, row)| Record::new(Arc::clone(&schema), first + offset as u32, row))
        .collect();
    Ok((schema, records))
}

/// Result of one whole-tab read.
#[derive(Debug, Clone)]
pub struct TabSnapshot {
    pub spreadsheet_id: String,
    pub schema: Arc<TabSchema>,
    pub records: Vec<Record>,
    pub fetched_at: DateTime<Utc>,
}

impl TabSnapshot {
    pub fn record(&self, row_number: u32) -> Option<&Record> {
        self.records.iter().find(|r| r.row_number() == row_number)
    }
}

/// Reads tabs through a [`SheetsApi`], retrying transient failures.
#[derive(Clone)]
pub struct TabularAdapter {
    api: Arc<dyn SheetsApi>,
    retry: RetryConfig,
}

impl TabularAdapter {
    pub fn new(api: Arc<dyn SheetsApi>, retry: RetryConfig) -> Self {
        Self { api, retry }
    }

    pub async fn fetch(
        &self,
        spreadsheet_id: &str,
        tab_name: &str,
        header_row_index: usize,
        cancel: &CancellationToken,
    ) -> Result<TabSnapshot> {
        let grid = self
            .read_range(spreadsheet_id, &a1::quote_tab(tab_name), cancel)
            .await?;
        let (schema, records) = parse_grid(tab_name, grid, header_row_index)?;
        debug!(
            spreadsheet_id,
            tab = tab_name,
            headers = schema.width(),
            records = records.len(),
            "fetched tab"
        );
        Ok(TabSnapshot {
            spreadsheet_id: spreadsheet_id.to_string(),
            schema,
            records,
            fetched_at: Utc::now(),
        })
    }

    /// Raw cell grid of an arbitrary range.
    pub async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<String>>> {
        let grid = execute_with_backoff_cancellable(
            || self.api.get_values(spreadsheet_id, range),
            &self.retry,
            cancel,
            |status| {
                warn!(
                    range,
                    attempt = status.attempt,
                    sleep_ms = status.sleep.as_millis() as u64,
                    reason = %status.reason,
                    "retrying sheet read"
                );
            },
        )
        .await?;
        Ok(grid)
    }

    pub async fn list_tabs(
        &self,
        spreadsheet_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let tabs = execute_with_backoff_cancellable(
            || self.api.list_tabs(spreadsheet_id),
            &self.retry,
            cancel,
            |status| {
                warn!(
                    spreadsheet_id,
                    attempt = status.attempt,
                    reason = %status.reason,
                    "retrying tab listing"
                );
            },
        )
        .await?;
        Ok(tabs)
    }
}

#[cfg(test)]
pub(crate) fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(|c| (*c).to_string()).collect())
        .collect()
}
