//! Field identity: which column plays which role in a tab.
//!
//! Headers are matched against per-role aliases after normalisation
//! (lowercase, punctuation folded to spaces). Exact matches are assigned
//! before partial word matches, and a column is bound to at most one role.
//! Explicit column-letter overrides bypass matching entirely. Results are
//! cached per header signature.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::a1;
use crate::error::Result;
use crate::error::SheetsError;
use crate::tabular::Record;
use crate::tabular::TabSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    SiteCode,
    StartTime,
    EndTime,
    Cause,
    ActionPlan,
    Project,
}

impl FieldRole {
    pub const ALL: [FieldRole; 6] = [
        FieldRole::SiteCode,
        FieldRole::StartTime,
        FieldRole::EndTime,
        FieldRole::Cause,
        FieldRole::ActionPlan,
        FieldRole::Project,
    ];

    fn default_aliases(self) -> &'static [&'static str] {
        match self {
            FieldRole::SiteCode => &["site code", "site", "site id", "site name"],
            FieldRole::StartTime => &["start", "start time", "downtime start", "start date"],
            FieldRole::EndTime => &["end", "end time", "downtime end", "uptime", "end date"],
            FieldRole::Cause => &["cause", "root cause", "reason"],
            FieldRole::ActionPlan => &["action plan", "action taken", "action", "resolution"],
            FieldRole::Project => &["project"],
        }
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldRole::SiteCode => "site code",
            FieldRole::StartTime => "start time",
            FieldRole::EndTime => "end time",
            FieldRole::Cause => "cause",
            FieldRole::ActionPlan => "action plan",
            FieldRole::Project => "project",
        };
        f.write_str(name)
    }
}

/// Alias lists and column overrides used to bind roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingRules {
    pub aliases: BTreeMap<FieldRole, Vec<String>>,
    /// Role -> column letter, e.g. `end_time = "G"`.
    pub columns: BTreeMap<FieldRole, String>,
}

impl Default for BindingRules {
    fn default() -> Self {
        let aliases = FieldRole::ALL
            .iter()
            .map(|role| {
                let names = role.default_aliases().iter().map(|a| (*a).to_string());
                (*role, names.collect())
            })
            .collect();
        Self {
            aliases,
            columns: BTreeMap::new(),
        }
    }
}

impl BindingRules {
    pub fn with_column(mut self, role: FieldRole, letter: impl Into<String>) -> Self {
        self.columns.insert(role, letter.into());
        self
    }

    /// Reject overrides that are not column letters.
    pub fn validate(&self) -> Result<()> {
        for letter in self.columns.values() {
            a1::column_index(letter)?;
        }
        Ok(())
    }

    pub fn resolve(&self, schema: &TabSchema) -> Result<ColumnBindings> {
        let mut columns = BTreeMap::new();
        let mut taken = BTreeSet::new();

        for (role, letter) in &self.columns {
            let idx = a1::column_index(letter)?;
            columns.insert(*role, idx);
            taken.insert(idx);
        }

        let normalized: Vec<Vec<String>> = schema.headers().iter().map(|h| words(h)).collect();
        for exact in [true, false] {
            for role in FieldRole::ALL {
                if columns.contains_key(&role) {
                    continue;
                }
                let aliases: Vec<Vec<String>> = self
                    .aliases
                    .get(&role)
                    .map(|list| list.iter().map(|a| words(a)).collect())
                    .unwrap_or_default();
                let found = normalized.iter().enumerate().find(|(idx, header)| {
                    !taken.contains(idx)
                        && !header.is_empty()
                        && aliases.iter().any(|alias| {
                            if exact {
                                *header == alias
                            } else {
                                contains_phrase(header, alias)
                            }
                        })
                });
                if let Some((idx, _)) = found {
                    columns.insert(role, idx);
                    taken.insert(idx);
                }
            }
        }

        Ok(ColumnBindings {
            signature: schema.signature(),
            columns,
        })
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Resolved role -> column map for one header signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBindings {
    signature: String,
    columns: BTreeMap<FieldRole, usize>,
}

impl ColumnBindings {
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn column(&self, role: FieldRole) -> Option<usize> {
        self.columns.get(&role).copied()
    }

    pub fn require(&self, role: FieldRole) -> Result<usize> {
        self.column(role).ok_or_else(|| {
            SheetsError::Malformed(format!("no column is bound to the {role} field"))
        })
    }

    pub fn value<'r>(&self, record: &'r Record, role: FieldRole) -> Option<&'r str> {
        self.column(role).map(|idx| record.cell(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldRole, usize)> + '_ {
        self.columns.iter().map(|(role, idx)| (*role, *idx))
    }
}

/// Resolves bindings once per distinct header signature.
#[derive(Debug, Default)]
pub struct BindingCache {
    rules: BindingRules,
    resolved: Mutex<HashMap<String, Arc<ColumnBindings>>>,
}

impl BindingCache {
    pub fn new(rules: BindingRules) -> Self {
        Self {
            rules,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn bindings_for(&self, schema: &TabSchema) -> Result<Arc<ColumnBindings>> {
        let signature = schema.signature();
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = resolved.get(&signature) {
            return Ok(Arc::clone(hit));
        }
        let bindings = Arc::new(self.rules.resolve(schema)?);
        debug!(
            tab = schema.tab_name(),
            signature = %&signature[..12],
            bound = bindings.columns.len(),
            "resolved column bindings"
        );
        resolved.insert(signature, Arc::clone(&bindings));
        Ok(bindings)
    }

    pub fn len(&self) -> usize {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
