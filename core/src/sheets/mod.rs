//! Transport to the spreadsheet service.

mod client;

pub use client::DEFAULT_API_BASE;
pub use client::HttpSheetsClient;

use async_trait::async_trait;
use serde::Deserialize;

use crate::batch::WriteRequest;
use crate::error::Result;

/// What the upstream reported after a successful batch update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchUpdateSummary {
    pub total_updated_rows: u64,
    pub total_updated_cells: u64,
}

#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Titles of every tab in the spreadsheet, in sheet order.
    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<String>>;

    /// Cell grid of `range` (A1 notation). Trailing empty rows and cells
    /// may be absent.
    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>>;

    /// Submit all ranges of `request` in one call, authorised by the
    /// delegated `access_token`.
    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        request: &WriteRequest,
        access_token: &str,
    ) -> Result<BatchUpdateSummary>;
}
