// Shared fixtures for the wiremock-backed suites.
mod consent;
mod orchestrator;
mod sheets_client;

use serde_json::Value;
use serde_json::json;

pub(crate) const SHEET_ID: &str = "SHEET123456";
pub(crate) const API_KEY: &str = "test-key";

pub(crate) fn values(rows: &[&[&str]]) -> Value {
    json!({ "values": rows })
}
