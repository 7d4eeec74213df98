use std::fmt;

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::TimeDelta;

use crate::bindings::ColumnBindings;
use crate::bindings::FieldRole;
use crate::error::Result;
use crate::tabular::Record;

use super::is_blank;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

/// Parse the timestamp shapes operators type into the sheet.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Elapsed downtime as shown in the downtime list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowntimeDuration {
    /// Start or end is missing.
    NotAvailable,
    /// Unparseable, or end is not after start.
    Invalid,
    Span(TimeDelta),
}

impl DowntimeDuration {
    pub fn between(start: &str, end: &str) -> Self {
        if is_blank(start) || is_blank(end) {
            return DowntimeDuration::NotAvailable;
        }
        match (parse_timestamp(start), parse_timestamp(end)) {
            (Some(start), Some(end)) if end > start => DowntimeDuration::Span(end - start),
            _ => DowntimeDuration::Invalid,
        }
    }
}

impl fmt::Display for DowntimeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DowntimeDuration::NotAvailable => f.write_str("N/A"),
            DowntimeDuration::Invalid => f.write_str("Invalid"),
            DowntimeDuration::Span(span) => {
                let minutes = span.num_minutes();
                write!(f, "{}h {}m", minutes / 60, minutes % 60)
            }
        }
    }
}

/// Rows that record any downtime: start or end present.
#[derive(Debug, Clone, Copy)]
pub struct DowntimeClassifier {
    start: usize,
    end: usize,
}

impl DowntimeClassifier {
    pub fn new(bindings: &ColumnBindings) -> Result<Self> {
        Ok(Self {
            start: bindings.require(FieldRole::StartTime)?,
            end: bindings.require(FieldRole::EndTime)?,
        })
    }

    pub fn is_match(&self, record: &Record) -> bool {
        !is_blank(record.cell(self.start)) || !is_blank(record.cell(self.end))
    }

    pub fn duration(&self, record: &Record) -> DowntimeDuration {
        DowntimeDuration::between(record.cell(self.start), record.cell(self.end))
    }
}
