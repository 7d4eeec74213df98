//! A1 notation: column letters, cell references and tab-qualified ranges.

use crate::error::Result;
use crate::error::SheetsError;

/// Number of columns addressable with at most three letters (`A`..=`ZZZ`).
pub const MAX_COLUMNS: usize = 26 + 26 * 26 + 26 * 26 * 26;

/// Zero-based column index to bijective base-26 letters.
///
/// `0 -> A`, `25 -> Z`, `26 -> AA`, `701 -> ZZ`, `702 -> AAA`.
pub fn column_letter(index: usize) -> Result<String> {
    if index >= MAX_COLUMNS {
        return Err(SheetsError::ColumnOutOfRange(index));
    }
    let mut n = index + 1;
    let mut letters = Vec::with_capacity(3);
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    Ok(letters.into_iter().map(char::from).collect())
}

/// Inverse of [`column_letter`]. Case-insensitive.
pub fn column_index(letters: &str) -> Result<usize> {
    let letters = letters.trim();
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SheetsError::InvalidInput(format!(
            "'{letters}' is not a column letter"
        )));
    }
    let mut n: usize = 0;
    for c in letters.chars() {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .ok_or_else(|| SheetsError::InvalidInput(format!("column '{letters}' overflows")))?;
        if n > MAX_COLUMNS {
            return Err(SheetsError::ColumnOutOfRange(n - 1));
        }
    }
    Ok(n - 1)
}

/// Tab name as it must appear before `!` in a range.
///
/// Always quoted: a bare `Q1` or `Jan2025` would be read as a cell of the
/// first tab.
pub fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

/// `Tab!F12`
pub fn cell(tab: &str, column: usize, row: u32) -> Result<String> {
    Ok(format!("{}!{}{row}", quote_tab(tab), column_letter(column)?))
}

/// `Tab!A12:H12`
pub fn row_span(tab: &str, first: usize, last: usize, row: u32) -> Result<String> {
    Ok(format!(
        "{}!{}{row}:{}{row}",
        quote_tab(tab),
        column_letter(first)?,
        column_letter(last)?
    ))
}

/// Whole-column span, `Tab!F:H`.
pub fn column_span(tab: &str, first: usize, last: usize) -> Result<String> {
    Ok(format!(
        "{}!{}:{}",
        quote_tab(tab),
        column_letter(first)?,
        column_letter(last)?
    ))
}
