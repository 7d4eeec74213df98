use serde::Serialize;

use crate::bindings::ColumnBindings;
use crate::bindings::FieldRole;
use crate::error::Result;
use crate::tabular::Record;

use super::is_blank;

/// Which escalation fields a record is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EscalationGap {
    pub missing_cause: bool,
    pub missing_action_plan: bool,
}

/// Flags records whose cause or action plan is empty or whitespace.
#[derive(Debug, Clone, Copy)]
pub struct EscalationClassifier {
    cause: usize,
    action_plan: usize,
}

impl EscalationClassifier {
    pub fn new(bindings: &ColumnBindings) -> Result<Self> {
        Ok(Self {
            cause: bindings.require(FieldRole::Cause)?,
            action_plan: bindings.require(FieldRole::ActionPlan)?,
        })
    }

    pub fn gap(&self, record: &Record) -> Option<EscalationGap> {
        let gap = EscalationGap {
            missing_cause: is_blank(record.cell(self.cause)),
            missing_action_plan: is_blank(record.cell(self.action_plan)),
        };
        (gap.missing_cause || gap.missing_action_plan).then_some(gap)
    }

    pub fn is_match(&self, record: &Record) -> bool {
        self.gap(record).is_some()
    }
}
