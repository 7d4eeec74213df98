//! Downtime entries written by operators.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

use crate::a1;
use crate::error::Result;
use crate::error::SheetsError;

/// Timestamp layout written into the sheet.
pub const SHEET_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(SHEET_TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DowntimeEntry {
    pub site_code: String,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub cause: String,
    pub action_taken: Option<String>,
}

impl DowntimeEntry {
    pub fn new(
        site_code: &str,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
        cause: &str,
        action_taken: Option<&str>,
    ) -> Result<Self> {
        let site_code = site_code.trim();
        let cause = cause.trim();
        if site_code.is_empty() {
            return Err(SheetsError::InvalidInput("site code is required".to_string()));
        }
        if cause.is_empty() {
            return Err(SheetsError::InvalidInput("cause is required".to_string()));
        }
        if let Some(end) = end
            && end <= start
        {
            return Err(SheetsError::InvalidInput(
                "end time must be after start time".to_string(),
            ));
        }
        Ok(Self {
            site_code: site_code.to_string(),
            start,
            end,
            cause: cause.to_string(),
            action_taken: action_taken
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        })
    }

    /// Same event for another site.
    pub fn for_site(&self, site_code: &str) -> Result<Self> {
        Self::new(
            site_code,
            self.start,
            self.end,
            &self.cause,
            self.action_taken.as_deref(),
        )
    }
}

/// Column letters a downtime entry is written into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DowntimeColumns {
    pub site: String,
    pub start: String,
    pub end: String,
    pub cause: String,
    /// Left unwritten when unset.
    pub action: Option<String>,
}

impl Default for DowntimeColumns {
    fn default() -> Self {
        Self {
            site: "A".to_string(),
            start: "F".to_string(),
            end: "G".to_string(),
            cause: "H".to_string(),
            action: None,
        }
    }
}

impl DowntimeColumns {
    pub fn validate(&self) -> Result<()> {
        for letter in [&self.site, &self.start, &self.end, &self.cause]
            .into_iter()
            .chain(self.action.as_ref())
        {
            a1::column_index(letter)?;
        }
        Ok(())
    }

    /// Cells for one entry. An open-ended entry leaves the end cell blank.
    pub fn cells(&self, entry: &DowntimeEntry) -> Result<Vec<(usize, String)>> {
        let mut cells = vec![
            (a1::column_index(&self.site)?, entry.site_code.clone()),
            (a1::column_index(&self.start)?, format_timestamp(entry.start)),
            (
                a1::column_index(&self.end)?,
                entry.end.map(format_timestamp).unwrap_or_default(),
            ),
            (a1::column_index(&self.cause)?, entry.cause.clone()),
        ];
        if let Some(action) = &self.action {
            cells.push((
                a1::column_index(action)?,
                entry
                    .action_taken
                    .clone()
                    .unwrap_or_else(|| "None".to_string()),
            ));
        }
        Ok(cells)
    }
}
