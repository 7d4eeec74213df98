use crate::bindings::ColumnBindings;
use crate::bindings::FieldRole;
use crate::error::Result;
use crate::tabular::Record;

use super::is_blank;

/// Downtime that started and was never closed: start set, end empty.
#[derive(Debug, Clone, Copy)]
pub struct NoUptimeClassifier {
    start: usize,
    end: usize,
}

impl NoUptimeClassifier {
    pub fn new(bindings: &ColumnBindings) -> Result<Self> {
        Ok(Self {
            start: bindings.require(FieldRole::StartTime)?,
            end: bindings.require(FieldRole::EndTime)?,
        })
    }

    pub fn end_column(&self) -> usize {
        self.end
    }

    pub fn is_match(&self, record: &Record) -> bool {
        !is_blank(record.cell(self.start)) && is_blank(record.cell(self.end))
    }
}
