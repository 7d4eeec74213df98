//! Compile field edits into a single `values:batchUpdate` request.

use serde::Deserialize;
use serde::Serialize;

use crate::a1;
use crate::bindings::ColumnBindings;
use crate::bindings::FieldRole;
use crate::error::Result;
use crate::error::SheetsError;
use crate::tabular::Record;
use crate::tabular::TabSchema;

/// How a write addresses its column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    Role(FieldRole),
    /// Zero-based column index.
    Column(usize),
    /// Header name; the last column with that name wins.
    Header(String),
}

impl From<FieldRole> for FieldRef {
    fn from(role: FieldRole) -> Self {
        FieldRef::Role(role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub row_number: u32,
    pub field: FieldRef,
    pub new_value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueInputOption {
    Raw,
    /// Values are parsed as if typed into the sheet UI.
    #[default]
    UserEntered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    #[serde(skip)]
    pub tab_name: String,
    pub value_input_option: ValueInputOption,
    pub data: Vec<ValueRange>,
}

impl WriteRequest {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ranges(&self) -> impl Iterator<Item = &str> {
        self.data.iter().map(|vr| vr.range.as_str())
    }
}

pub struct BatchCompiler<'a> {
    schema: &'a TabSchema,
    bindings: &'a ColumnBindings,
}

impl<'a> BatchCompiler<'a> {
    pub fn new(schema: &'a TabSchema, bindings: &'a ColumnBindings) -> Self {
        Self { schema, bindings }
    }

    pub fn column(&self, field: &FieldRef) -> Result<usize> {
        match field {
            FieldRef::Role(role) => self.bindings.require(*role),
            FieldRef::Column(idx) => Ok(*idx),
            FieldRef::Header(name) => self.schema.position(name).ok_or_else(|| {
                SheetsError::InvalidInput(format!(
                    "tab '{}' has no column named '{name}'",
                    self.schema.tab_name()
                ))
            }),
        }
    }

    /// Apply the same `edits` to every selected record.
    ///
    /// Records are de-duplicated by row number. A field listed twice keeps
    /// its first position and its last value.
    pub fn compile(&self, records: &[&Record], edits: &[(FieldRef, String)]) -> Result<WriteRequest> {
        if records.is_empty() {
            return Err(SheetsError::InvalidInput("no records selected".to_string()));
        }
        if edits.is_empty() {
            return Err(SheetsError::InvalidInput("no fields to update".to_string()));
        }

        let mut rows: Vec<u32> = Vec::with_capacity(records.len());
        for record in records {
            if !rows.contains(&record.row_number()) {
                rows.push(record.row_number());
            }
        }

        let pending: Vec<PendingEdit> = rows
            .iter()
            .flat_map(|row| {
                edits.iter().map(move |(field, value)| PendingEdit {
                    row_number: *row,
                    field: field.clone(),
                    new_value: value.clone(),
                })
            })
            .collect();
        self.compile_edits(&pending)
    }

    /// Arbitrary per-row edits; the last edit to a cell wins.
    pub fn compile_edits(&self, edits: &[PendingEdit]) -> Result<WriteRequest> {
        if edits.is_empty() {
            return Err(SheetsError::InvalidInput("no edits to apply".to_string()));
        }
        let mut cells: Vec<(u32, usize, &str)> = Vec::with_capacity(edits.len());
        for edit in edits {
            let column = self.column(&edit.field)?;
            match cells
                .iter_mut()
                .find(|(row, col, _)| *row == edit.row_number && *col == column)
            {
                Some(existing) => existing.2 = edit.new_value.as_str(),
                None => cells.push((edit.row_number, column, edit.new_value.as_str())),
            }
        }
        let tab_name = self.schema.tab_name();
        let data = cells
            .into_iter()
            .map(|(row, column, value)| value_range(tab_name, column, row, value))
            .collect::<Result<Vec<_>>>()?;
        Ok(write_request(tab_name, data))
    }
}

/// Cells of one new row, one range per cell so unrelated columns in between
/// are left untouched. Needs no header row, so it works on an empty tab.
pub fn compile_row(tab_name: &str, row: u32, cells: &[(usize, String)]) -> Result<WriteRequest> {
    if cells.is_empty() {
        return Err(SheetsError::InvalidInput("no cells to write".to_string()));
    }
    let mut columns: Vec<(usize, &str)> = Vec::with_capacity(cells.len());
    for (column, value) in cells {
        match columns.iter_mut().find(|(c, _)| c == column) {
            Some(existing) => existing.1 = value.as_str(),
            None => columns.push((*column, value.as_str())),
        }
    }
    let data = columns
        .into_iter()
        .map(|(column, value)| value_range(tab_name, column, row, value))
        .collect::<Result<Vec<_>>>()?;
    Ok(write_request(tab_name, data))
}

fn value_range(tab_name: &str, column: usize, row: u32, value: &str) -> Result<ValueRange> {
    Ok(ValueRange {
        range: a1::cell(tab_name, column, row)?,
        values: vec![vec![value.to_string()]],
    })
}

fn write_request(tab_name: &str, data: Vec<ValueRange>) -> WriteRequest {
    WriteRequest {
        tab_name: tab_name.to_string(),
        value_input_option: ValueInputOption::UserEntered,
        data,
    }
}
