//! Business-rule validation of an invoice record against the policy corpus.
//!
//! The Validator never fails: a rule that cannot be decided becomes a failed
//! finding, marked `insufficient_evidence` when retrieval came back empty.

pub mod evidence;
pub mod rule;
pub mod rules;
pub mod tax_id;
pub mod validator;

pub use rule::{BusinessRule, EvidenceRequirement, RuleContext, RuleOutcome};
pub use rules::builtin_rules;
pub use validator::{ValidationOutcome, Validator};
