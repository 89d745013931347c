use chrono::NaiveDate;

use crate::models::{Citation, InvoiceRecord, RuleClass};
use crate::pipeline_config::ValidationConfig;

/// Whether a rule's verdict must rest on retrieved policy text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceRequirement {
    /// Decided from the record alone.
    None,
    /// Needs at least one retrieved passage; never passes without citing one.
    Required,
}

/// Everything a predicate may look at. Borrowed, so rules share nothing mutable.
pub struct RuleContext<'a> {
    pub record: &'a InvoiceRecord,
    /// Retrieved passages above the relevance floor, best first. Empty for
    /// rules that need no evidence.
    pub citations: &'a [Citation],
    pub config: &'a ValidationConfig,
    pub today: NaiveDate,
}

/// A predicate's verdict before evidence enforcement.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub passed: bool,
    pub reason: String,
    /// Indices into `RuleContext::citations` that support the verdict.
    pub cited: Vec<usize>,
}

impl RuleOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
            cited: Vec::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            cited: Vec::new(),
        }
    }

    pub fn citing(mut self, cited: Vec<usize>) -> Self {
        self.cited = cited;
        self
    }
}

/// One business rule. Self-contained and independently testable.
///
/// Implementations are pure over `(record, citations)`: no I/O, no interior
/// state. The Validator owns retrieval and evidence enforcement.
pub trait BusinessRule: Send + Sync {
    fn id(&self) -> &'static str;

    fn class(&self) -> RuleClass;

    fn evidence(&self) -> EvidenceRequirement {
        EvidenceRequirement::None
    }

    /// Policy search text for this record. `None` when the fields the query
    /// needs are missing. Only consulted for evidence-backed rules.
    fn query(&self, _record: &InvoiceRecord) -> Option<String> {
        None
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome;
}
