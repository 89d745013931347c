//! Rule evaluation against the policy index.
//!
//! Each rule runs on its own scoped thread: rules borrow the record and
//! share nothing mutable, and `PolicyIndex::search` is safe to call
//! concurrently. Findings are collected back into declared rule order.

use std::sync::Arc;

use chrono::{Local, NaiveDate};

use super::rule::{BusinessRule, EvidenceRequirement, RuleContext};
use super::rules::builtin_rules;
use crate::models::{Citation, InvoiceRecord, PipelineStage, PipelineWarning, RuleClass, ValidationFinding};
use crate::pipeline::policy::{PolicyError, PolicyIndex};
use crate::pipeline_config::ValidationConfig;

/// Findings in rule order, the overall verdict, and any degradations met.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub findings: Vec<ValidationFinding>,
    /// AND over required findings.
    pub valid: bool,
    pub warnings: Vec<PipelineWarning>,
}

/// Why evidence could not be gathered for a rule.
enum EvidenceGap {
    NoQuery,
    NoIndex,
    SearchFailed(String),
    BelowFloor(String),
}

impl EvidenceGap {
    fn reason(&self) -> String {
        let detail = match self {
            Self::NoQuery => "the record lacks the fields needed for a policy query".to_string(),
            Self::NoIndex => "no policy index is available".to_string(),
            Self::SearchFailed(e) => format!("policy search failed: {e}"),
            Self::BelowFloor(query) => {
                format!("no policy passage above the relevance floor for \"{query}\"")
            }
        };
        format!("insufficient evidence: {detail}")
    }
}

pub struct Validator {
    rules: Vec<Box<dyn BusinessRule>>,
    index: Option<Arc<PolicyIndex>>,
    config: ValidationConfig,
}

impl Validator {
    /// Validator with the built-in rule set.
    pub fn new(index: Option<Arc<PolicyIndex>>, config: ValidationConfig) -> Self {
        Self::with_rules(builtin_rules(), index, config)
    }

    pub fn with_rules(
        rules: Vec<Box<dyn BusinessRule>>,
        index: Option<Arc<PolicyIndex>>,
        config: ValidationConfig,
    ) -> Self {
        Self { rules, index, config }
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn validate(&self, record: &InvoiceRecord) -> ValidationOutcome {
        self.validate_on(record, Local::now().date_naive())
    }

    /// Validate as of `today`, which date rules compare against.
    pub fn validate_on(&self, record: &InvoiceRecord, today: NaiveDate) -> ValidationOutcome {
        let findings: Vec<ValidationFinding> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .rules
                .iter()
                .map(|rule| s.spawn(move || self.evaluate(rule.as_ref(), record, today)))
                .collect();
            handles
                .into_iter()
                .zip(&self.rules)
                .map(|(handle, rule)| {
                    handle.join().unwrap_or_else(|_| ValidationFinding {
                        rule_id: rule.id().to_string(),
                        class: rule.class(),
                        passed: false,
                        reason: "rule evaluation panicked".to_string(),
                        insufficient_evidence: false,
                        citations: Vec::new(),
                    })
                })
                .collect()
        });

        let valid = findings
            .iter()
            .filter(|f| f.class == RuleClass::Required)
            .all(|f| f.passed);

        let mut warnings = Vec::new();
        let needs_evidence = self
            .rules
            .iter()
            .any(|r| r.evidence() == EvidenceRequirement::Required);
        if needs_evidence && !self.index.as_ref().is_some_and(|i| i.is_built()) {
            warnings.push(PipelineWarning::new(
                PipelineStage::Validation,
                "policy index unavailable; evidence-backed rules report insufficient evidence",
            ));
        }

        let failed = findings.iter().filter(|f| !f.passed).count();
        tracing::info!(rules = findings.len(), failed, valid, "Validation complete");
        ValidationOutcome {
            findings,
            valid,
            warnings,
        }
    }

    fn evaluate(&self, rule: &dyn BusinessRule, record: &InvoiceRecord, today: NaiveDate) -> ValidationFinding {
        let needs_evidence = rule.evidence() == EvidenceRequirement::Required;

        let citations = if needs_evidence {
            match self.retrieve(rule, record) {
                Ok(citations) => citations,
                Err(gap) => {
                    tracing::warn!(rule_id = rule.id(), reason = %gap.reason(), "Rule lacks evidence");
                    return ValidationFinding {
                        rule_id: rule.id().to_string(),
                        class: rule.class(),
                        passed: false,
                        reason: gap.reason(),
                        insufficient_evidence: true,
                        citations: Vec::new(),
                    };
                }
            }
        } else {
            Vec::new()
        };

        let outcome = rule.evaluate(&RuleContext {
            record,
            citations: &citations,
            config: &self.config,
            today,
        });

        let cited: Vec<Citation> = outcome
            .cited
            .iter()
            .filter_map(|&i| citations.get(i).cloned())
            .collect();

        let (passed, reason, cited) = if needs_evidence && outcome.passed && cited.is_empty() {
            (
                false,
                format!("{} (not supported by any retrieved passage)", outcome.reason),
                cited,
            )
        } else if needs_evidence && !outcome.passed && cited.is_empty() {
            // A failed lookup shows what was consulted.
            (false, outcome.reason, citations)
        } else {
            (outcome.passed, outcome.reason, cited)
        };

        tracing::debug!(rule_id = rule.id(), passed, citations = cited.len(), "Rule evaluated");
        ValidationFinding {
            rule_id: rule.id().to_string(),
            class: rule.class(),
            passed,
            reason,
            insufficient_evidence: false,
            citations: cited,
        }
    }

    fn retrieve(&self, rule: &dyn BusinessRule, record: &InvoiceRecord) -> Result<Vec<Citation>, EvidenceGap> {
        let query = rule.query(record).ok_or(EvidenceGap::NoQuery)?;
        let index = self.index.as_ref().ok_or(EvidenceGap::NoIndex)?;
        let hits = match index.search(&query, self.config.top_k) {
            Ok(hits) => hits,
            Err(PolicyError::NotBuilt) => return Err(EvidenceGap::NoIndex),
            Err(e) => return Err(EvidenceGap::SearchFailed(e.to_string())),
        };
        let kept: Vec<Citation> = hits
            .into_iter()
            .filter(|c| c.relevance_score() >= self.config.min_relevance)
            .collect();
        if kept.is_empty() {
            return Err(EvidenceGap::BelowFloor(query));
        }
        Ok(kept)
    }
}
