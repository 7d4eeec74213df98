use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::Result;
use crate::error::SheetsError;

#[allow(clippy::expect_used)]
static SHEETS_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("valid regex"));

#[allow(clippy::expect_used)]
static RAW_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{10,}$").expect("valid regex"));

/// Canonical spreadsheet id from either a sharing URL or a bare id.
pub fn extract_spreadsheet_id(link: &str) -> Result<String> {
    let link = link.trim();
    if let Some(caps) = SHEETS_URL_RE.captures(link) {
        return Ok(caps[1].to_string());
    }
    if RAW_ID_RE.is_match(link) {
        return Ok(link.to_string());
    }
    Err(SheetsError::InvalidInput(format!(
        "'{link}' is neither a spreadsheet URL nor a spreadsheet id"
    )))
}
