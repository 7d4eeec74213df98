//! Site monitoring over shared spreadsheets: tab reads, record
//! classification, delegated writes and conflict-checked appends.

pub mod a1;
pub mod append;
pub mod auth;
pub mod batch;
pub mod billing;
pub mod bindings;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod downtime;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod retry;
pub mod sheets;
pub mod spreadsheet_id;
pub mod tabular;
pub mod view;

pub use config::ConfigLoader;
pub use config::SitewatchConfig;
pub use error::Result;
pub use error::SheetsError;
pub use orchestrator::Orchestrator;
pub use orchestrator::OrchestratorSettings;
pub use orchestrator::TabKind;
pub use orchestrator::TabTarget;
pub use phase::FilePhaseRegistry;
pub use tabular::Record;
pub use tabular::TabSchema;
