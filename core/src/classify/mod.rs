//! Per-record classification into the operational views.
//!
//! Every classifier is pure and looks at one record at a time. Column
//! identity comes from [`ColumnBindings`]; a classifier cannot be built
//! when a role it reads is unbound.

pub mod downtime;
pub mod due_status;
pub mod escalation;
pub mod no_uptime;

pub use downtime::DowntimeClassifier;
pub use downtime::DowntimeDuration;
pub use downtime::parse_timestamp;
pub use due_status::DueDay;
pub use due_status::DueStatus;
pub use due_status::PaymentRemarks;
pub use due_status::classify_due;
pub use due_status::due_date;
pub use escalation::EscalationClassifier;
pub use escalation::EscalationGap;
pub use no_uptime::NoUptimeClassifier;

use serde::Serialize;

use crate::bindings::ColumnBindings;
use crate::tabular::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationTag {
    /// Has a start or end time.
    Downtime,
    /// Started but never restored.
    NoUptime,
    MissingCause,
    MissingActionPlan,
}

/// Tag `records` with every classification whose columns are bound.
pub fn annotate(records: &mut [Record], bindings: &ColumnBindings) {
    let downtime = DowntimeClassifier::new(bindings).ok();
    let no_uptime = NoUptimeClassifier::new(bindings).ok();
    let escalation = EscalationClassifier::new(bindings).ok();

    for record in records.iter_mut() {
        if downtime.as_ref().is_some_and(|c| c.is_match(record)) {
            record.tag(ClassificationTag::Downtime);
        }
        if no_uptime.as_ref().is_some_and(|c| c.is_match(record)) {
            record.tag(ClassificationTag::NoUptime);
        }
        if let Some(gap) = escalation.as_ref().and_then(|c| c.gap(record)) {
            if gap.missing_cause {
                record.tag(ClassificationTag::MissingCause);
            }
            if gap.missing_action_plan {
                record.tag(ClassificationTag::MissingActionPlan);
            }
        }
    }
}

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
