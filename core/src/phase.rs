//! Phases: operator-registered pointers to a spreadsheet and default tab.
//!
//! The registry itself is an external table reached through
//! [`PhaseRegistry`]. Deleting a phase never touches the spreadsheet.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::error::SheetsError;
use crate::spreadsheet_id::extract_spreadsheet_id;

pub const DEFAULT_TAB_NAME: &str = "Sheet1";

/// Row shape of the external `phases` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRow {
    pub id: String,
    pub name: String,
    pub sheets_link: String,
    pub sheet_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    pub spreadsheet_id: String,
    pub default_tab_name: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PhaseRow> for Phase {
    type Error = SheetsError;

    fn try_from(row: PhaseRow) -> Result<Self> {
        let default_tab_name = row
            .sheet_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TAB_NAME.to_string());
        Ok(Phase {
            spreadsheet_id: extract_spreadsheet_id(&row.sheets_link)?,
            id: row.id,
            name: row.name,
            default_tab_name,
            created_at: row.created_at,
        })
    }
}

/// Insert shape; all fields are trimmed before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPhase {
    pub name: String,
    pub sheets_link: String,
    pub sheet_name: String,
}

impl NewPhase {
    pub fn new(name: &str, sheets_link: &str, sheet_name: Option<&str>) -> Result<Self> {
        let name = name.trim();
        let sheets_link = sheets_link.trim();
        let sheet_name = sheet_name.map(str::trim).unwrap_or(DEFAULT_TAB_NAME);
        if name.is_empty() {
            return Err(SheetsError::InvalidInput("phase name is required".to_string()));
        }
        if sheets_link.is_empty() {
            return Err(SheetsError::InvalidInput("sheets link is required".to_string()));
        }
        if sheet_name.is_empty() {
            return Err(SheetsError::InvalidInput("sheet name is required".to_string()));
        }
        extract_spreadsheet_id(sheets_link)?;
        Ok(Self {
            name: name.to_string(),
            sheets_link: sheets_link.to_string(),
            sheet_name: sheet_name.to_string(),
        })
    }
}

/// `list/insert/delete` on the external phase table.
#[async_trait]
pub trait PhaseRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<PhaseRow>>;

    async fn insert(&self, phase: NewPhase) -> Result<PhaseRow>;

    /// `false` when no phase had that id.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// JSON-file registry for single-operator use.
#[derive(Debug, Clone)]
pub struct FilePhaseRegistry {
    path: PathBuf,
}

impl FilePhaseRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/sitewatch/phases.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sitewatch").join("phases.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<PhaseRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(SheetsError::registry)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(SheetsError::registry)
    }

    fn write(&self, rows: &[PhaseRow]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(SheetsError::registry)?;
        }
        let content = serde_json::to_string_pretty(rows).map_err(SheetsError::registry)?;
        fs::write(&self.path, content).map_err(SheetsError::registry)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(SheetsError::registry)?;
        }
        Ok(())
    }
}

#[async_trait]
impl PhaseRegistry for FilePhaseRegistry {
    async fn list(&self) -> Result<Vec<PhaseRow>> {
        let mut rows = self.read()?;
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }

    async fn insert(&self, phase: NewPhase) -> Result<PhaseRow> {
        let mut rows = self.read()?;
        let row = PhaseRow {
            id: uuid::Uuid::new_v4().to_string(),
            name: phase.name,
            sheets_link: phase.sheets_link,
            sheet_name: Some(phase.sheet_name),
            created_at: Utc::now(),
        };
        rows.push(row.clone());
        self.write(&rows)?;
        info!(id = %row.id, name = %row.name, "phase added");
        Ok(row)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut rows = self.read()?;
        let before = rows.len();
        rows.retain(|row| row.id != id);
        if rows.len() == before {
            return Ok(false);
        }
        self.write(&rows)?;
        info!(id, "phase removed");
        Ok(true)
    }
}
