//! Built-in rule set, in the order findings are reported.

use chrono::NaiveDate;

use super::evidence::{
    is_tax_related, mentions_code, mentions_name, mentions_resolution, mentions_tax_id, stated_percentages,
};
use super::rule::{BusinessRule, EvidenceRequirement, RuleContext, RuleOutcome};
use super::tax_id::{nit_check_digit, parse_tax_id};
use crate::models::{ArithmeticCheck, InvoiceRecord, RuleClass};

/// Item sums may drift from the subtotal by this share of it...
const ITEMS_RELATIVE_TOLERANCE: f64 = 0.02;
/// ...or by this absolute amount, whichever is larger.
const ITEMS_ABSOLUTE_TOLERANCE: f64 = 1.0;

const TAX_ID_MIN_DIGITS: usize = 6;
const TAX_ID_MAX_DIGITS: usize = 15;

/// SHA-384 and SHA-512 digests, in hex.
const CUFE_HEX_LENGTHS: [usize; 2] = [96, 128];
/// CIIU classes have four digits.
const ACTIVITY_CODE_MIN_DIGITS: usize = 4;

pub fn builtin_rules() -> Vec<Box<dyn BusinessRule>> {
    vec![
        Box::new(TotalsArithmetic),
        Box::new(TaxRatePolicy),
        Box::new(WithholdingRateLimit),
        Box::new(InvoiceNumberPresent),
        Box::new(TaxIdFormat),
        Box::new(IssueDateValid),
        Box::new(IssueDateAge),
        Box::new(TaxIdCheckDigit),
        Box::new(CufeFormat),
        Box::new(EconomicActivityCode),
        Box::new(ItemsLineArithmetic),
        Box::new(ItemsSumMatchesSubtotal),
        Box::new(PaymentDueDate),
        Box::new(SupplierRegistration),
        Box::new(CurrencyPolicy),
        Box::new(EconomicActivityPolicy),
        Box::new(DianResolution),
    ]
}

fn parse_iso(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

// ═══════════════════════════════════════════════════════════
// Totals
// ═══════════════════════════════════════════════════════════

pub struct TotalsArithmetic;

impl BusinessRule for TotalsArithmetic {
    fn id(&self) -> &'static str {
        "totals.arithmetic"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Required
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let epsilon = ctx.config.totals_epsilon;
        match ctx.record.totals.check_arithmetic(epsilon) {
            ArithmeticCheck::Consistent { difference } => RuleOutcome::pass(format!(
                "subtotal + tax = total (difference {difference:.2}, epsilon {epsilon})"
            )),
            ArithmeticCheck::Inconsistent { difference } => RuleOutcome::fail(format!(
                "arithmetic-inconsistent: subtotal + tax differs from total by {difference:.2} (epsilon {epsilon})"
            )),
            ArithmeticCheck::Incomplete { missing } => {
                RuleOutcome::fail(format!("cannot check totals, missing: {}", missing.join(", ")))
            }
        }
    }
}

pub struct TaxRatePolicy;

impl BusinessRule for TaxRatePolicy {
    fn id(&self) -> &'static str {
        "totals.tax_rate_policy"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Required
    }

    fn evidence(&self) -> EvidenceRequirement {
        EvidenceRequirement::Required
    }

    fn query(&self, record: &InvoiceRecord) -> Option<String> {
        let mut query = String::from("IVA tax rate percentage applicable to invoices");
        if let Some(supplier) = record.header.supplier_name.get() {
            query.push_str(" supplied by ");
            query.push_str(supplier);
        }
        Some(query)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(rate) = ctx.record.totals.effective_tax_rate() else {
            return RuleOutcome::fail("effective tax rate unknown: subtotal or tax missing");
        };

        let mut stated = Vec::new();
        let mut supporting = Vec::new();
        for (i, citation) in ctx.citations.iter().enumerate() {
            let text = citation.passage();
            if !is_tax_related(text) {
                continue;
            }
            for pct in stated_percentages(text) {
                stated.push(pct);
                if (pct - rate).abs() <= ctx.config.tax_rate_tolerance && !supporting.contains(&i) {
                    supporting.push(i);
                }
            }
        }

        if !supporting.is_empty() {
            return RuleOutcome::pass(format!("effective tax rate {rate:.2}% matches a stated policy rate"))
                .citing(supporting);
        }
        if stated.is_empty() {
            return RuleOutcome::fail(format!(
                "effective tax rate {rate:.2}%, but no retrieved passage states a tax rate"
            ));
        }
        let listed: Vec<String> = stated.iter().map(|p| format!("{p}%")).collect();
        RuleOutcome::fail(format!(
            "effective tax rate {rate:.2}% does not match policy rates {}",
            listed.join(", ")
        ))
    }
}

pub struct WithholdingRateLimit;

impl BusinessRule for WithholdingRateLimit {
    fn id(&self) -> &'static str {
        "totals.withholding_rate"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(rate) = ctx.record.totals.withholding_rate.copied() else {
            return RuleOutcome::pass("no withholding stated");
        };
        let limit = ctx.config.max_withholding_rate;
        if rate > limit {
            RuleOutcome::fail(format!("withholding rate {rate:.2}% exceeds {limit}%"))
        } else {
            RuleOutcome::pass(format!("withholding rate {rate:.2}%"))
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Header
// ═══════════════════════════════════════════════════════════

pub struct InvoiceNumberPresent;

impl BusinessRule for InvoiceNumberPresent {
    fn id(&self) -> &'static str {
        "header.invoice_number"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Required
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        match ctx.record.header.invoice_number.get() {
            Some(number) if !number.trim().is_empty() => {
                RuleOutcome::pass(format!("invoice number {number}"))
            }
            _ => RuleOutcome::fail("invoice number missing"),
        }
    }
}

pub struct TaxIdFormat;

impl BusinessRule for TaxIdFormat {
    fn id(&self) -> &'static str {
        "header.tax_id"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Required
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(raw) = ctx.record.header.tax_id.get() else {
            return RuleOutcome::fail("supplier tax id missing");
        };
        match parse_tax_id(raw) {
            Some(id) if (TAX_ID_MIN_DIGITS..=TAX_ID_MAX_DIGITS).contains(&id.base.len()) => {
                RuleOutcome::pass(format!("tax id {raw} has {} digits", id.base.len()))
            }
            Some(id) => RuleOutcome::fail(format!(
                "tax id {raw} has {} digits, expected {TAX_ID_MIN_DIGITS}-{TAX_ID_MAX_DIGITS}",
                id.base.len()
            )),
            None => RuleOutcome::fail(format!("tax id {raw} is not numeric")),
        }
    }
}

pub struct IssueDateValid;

impl BusinessRule for IssueDateValid {
    fn id(&self) -> &'static str {
        "header.issue_date"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Required
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(raw) = ctx.record.header.issue_date.get() else {
            return RuleOutcome::fail("issue date missing");
        };
        match parse_iso(raw) {
            Some(date) if date > ctx.today => {
                RuleOutcome::fail(format!("issue date {date} is in the future"))
            }
            Some(date) => RuleOutcome::pass(format!("issued {date}")),
            None => RuleOutcome::fail(format!("issue date {raw} is not a calendar date")),
        }
    }
}

pub struct IssueDateAge;

impl BusinessRule for IssueDateAge {
    fn id(&self) -> &'static str {
        "header.issue_date_age"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(date) = ctx.record.header.issue_date.get().and_then(|d| parse_iso(d)) else {
            return RuleOutcome::fail("issue date unavailable, age unknown");
        };
        let age = (ctx.today - date).num_days();
        if age > ctx.config.max_invoice_age_days {
            RuleOutcome::fail(format!(
                "invoice is {age} days old, limit {}",
                ctx.config.max_invoice_age_days
            ))
        } else {
            RuleOutcome::pass(format!("invoice is {age} days old"))
        }
    }
}

pub struct TaxIdCheckDigit;

impl BusinessRule for TaxIdCheckDigit {
    fn id(&self) -> &'static str {
        "header.tax_id_check_digit"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(id) = ctx.record.header.tax_id.get().and_then(|raw| parse_tax_id(raw)) else {
            return RuleOutcome::pass("no parsable tax id to verify");
        };
        let Some(stated) = id.check_digit else {
            return RuleOutcome::pass("tax id carries no check digit");
        };
        match nit_check_digit(&id.base) {
            Some(expected) if expected == stated => {
                RuleOutcome::pass(format!("check digit {stated} is correct"))
            }
            Some(expected) => RuleOutcome::fail(format!(
                "check digit {stated} does not match computed {expected}"
            )),
            None => RuleOutcome::fail("tax id too long for check digit verification"),
        }
    }
}

pub struct CufeFormat;

impl BusinessRule for CufeFormat {
    fn id(&self) -> &'static str {
        "header.cufe"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(cufe) = ctx.record.header.cufe.get() else {
            return RuleOutcome::fail("CUFE missing, invoice cannot be matched to an electronic record");
        };
        let digits = cufe.chars().filter(char::is_ascii_hexdigit).count();
        if CUFE_HEX_LENGTHS.contains(&digits) {
            RuleOutcome::pass(format!("CUFE has {digits} hex digits"))
        } else {
            RuleOutcome::fail(format!("CUFE has {digits} hex digits, expected 96 or 128"))
        }
    }
}

pub struct EconomicActivityCode;

impl BusinessRule for EconomicActivityCode {
    fn id(&self) -> &'static str {
        "header.economic_activity"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(code) = ctx.record.header.economic_activity.get() else {
            return RuleOutcome::pass("no economic activity code stated");
        };
        if code.len() < ACTIVITY_CODE_MIN_DIGITS {
            RuleOutcome::fail(format!(
                "economic activity code {code} is shorter than {ACTIVITY_CODE_MIN_DIGITS} digits"
            ))
        } else {
            RuleOutcome::pass(format!("economic activity code {code}"))
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Items
// ═══════════════════════════════════════════════════════════

pub struct ItemsLineArithmetic;

impl BusinessRule for ItemsLineArithmetic {
    fn id(&self) -> &'static str {
        "items.line_arithmetic"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let items = &ctx.record.items;
        if items.is_empty() {
            return RuleOutcome::pass("no line items");
        }
        let suspect: Vec<String> = items
            .iter()
            .filter(|item| item.arithmetic_suspect)
            .map(|item| (item.row_index + 1).to_string())
            .collect();
        if suspect.is_empty() {
            RuleOutcome::pass(format!("{} line items consistent", items.len()))
        } else {
            RuleOutcome::fail(format!("arithmetic-suspect rows: {}", suspect.join(", ")))
        }
    }
}

pub struct ItemsSumMatchesSubtotal;

impl BusinessRule for ItemsSumMatchesSubtotal {
    fn id(&self) -> &'static str {
        "items.sum_matches_subtotal"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let items = &ctx.record.items;
        if items.is_empty() {
            return RuleOutcome::pass("no line items");
        }
        let Some(subtotal) = ctx.record.totals.subtotal.copied() else {
            return RuleOutcome::fail("subtotal missing, cannot compare line items");
        };
        let sum: f64 = items.iter().filter_map(|item| item.line_total.copied()).sum();
        let tolerance = (subtotal.abs() * ITEMS_RELATIVE_TOLERANCE).max(ITEMS_ABSOLUTE_TOLERANCE);
        let difference = (sum - subtotal).abs();
        if difference <= tolerance {
            RuleOutcome::pass(format!("line totals sum to {sum:.2}, subtotal {subtotal:.2}"))
        } else {
            RuleOutcome::fail(format!(
                "line totals sum to {sum:.2} but subtotal is {subtotal:.2} (tolerance {tolerance:.2})"
            ))
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Payment
// ═══════════════════════════════════════════════════════════

pub struct PaymentDueDate;

impl BusinessRule for PaymentDueDate {
    fn id(&self) -> &'static str {
        "payment.due_date"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let header = &ctx.record.header;
        let Some(due_raw) = header.due_date.get() else {
            return RuleOutcome::pass("no due date stated");
        };
        let Some(due) = parse_iso(due_raw) else {
            return RuleOutcome::fail(format!("due date {due_raw} is not a calendar date"));
        };
        let Some(issued) = header.issue_date.get().and_then(|d| parse_iso(d)) else {
            return RuleOutcome::fail("due date stated without a usable issue date");
        };

        let term = (due - issued).num_days();
        if term < 0 {
            RuleOutcome::fail(format!("due date {due} precedes issue date {issued}"))
        } else if term > ctx.config.max_payment_term_days {
            RuleOutcome::fail(format!(
                "payment term of {term} days exceeds {}",
                ctx.config.max_payment_term_days
            ))
        } else {
            RuleOutcome::pass(format!("payment term of {term} days"))
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Policy lookups
// ═══════════════════════════════════════════════════════════

pub struct SupplierRegistration;

impl BusinessRule for SupplierRegistration {
    fn id(&self) -> &'static str {
        "policy.supplier_registration"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evidence(&self) -> EvidenceRequirement {
        EvidenceRequirement::Required
    }

    fn query(&self, record: &InvoiceRecord) -> Option<String> {
        let name = record.header.supplier_name.get();
        let tax_id = record.header.tax_id.get();
        if name.is_none() && tax_id.is_none() {
            return None;
        }
        let mut query = String::from("registered approved supplier");
        for part in [name, tax_id].into_iter().flatten() {
            query.push(' ');
            query.push_str(part);
        }
        Some(query)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let header = &ctx.record.header;
        let name = header.supplier_name.get();
        let base = header.tax_id.get().and_then(|raw| parse_tax_id(raw)).map(|id| id.base);

        let supporting: Vec<usize> = ctx
            .citations
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                let text = c.passage();
                name.is_some_and(|n| mentions_name(text, n))
                    || base.as_deref().is_some_and(|b| mentions_tax_id(text, b))
            })
            .map(|(i, _)| i)
            .collect();

        let who = name.cloned().or_else(|| header.tax_id.get().cloned()).unwrap_or_default();
        if supporting.is_empty() {
            RuleOutcome::fail(format!("no retrieved policy passage names supplier {who}"))
        } else {
            RuleOutcome::pass(format!("supplier {who} appears in policy")).citing(supporting)
        }
    }
}

pub struct CurrencyPolicy;

impl BusinessRule for CurrencyPolicy {
    fn id(&self) -> &'static str {
        "policy.currency"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evidence(&self) -> EvidenceRequirement {
        EvidenceRequirement::Required
    }

    fn query(&self, record: &InvoiceRecord) -> Option<String> {
        record
            .header
            .currency
            .get()
            .map(|code| format!("accepted invoice currency {code}"))
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(code) = ctx.record.header.currency.get() else {
            return RuleOutcome::fail("currency missing");
        };
        let supporting: Vec<usize> = ctx
            .citations
            .iter()
            .enumerate()
            .filter(|(_, c)| mentions_code(c.passage(), code))
            .map(|(i, _)| i)
            .collect();
        if supporting.is_empty() {
            RuleOutcome::fail(format!("no retrieved policy passage mentions {code}"))
        } else {
            RuleOutcome::pass(format!("currency {code} is covered by policy")).citing(supporting)
        }
    }
}

pub struct EconomicActivityPolicy;

impl BusinessRule for EconomicActivityPolicy {
    fn id(&self) -> &'static str {
        "policy.economic_activity"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evidence(&self) -> EvidenceRequirement {
        EvidenceRequirement::Required
    }

    fn query(&self, record: &InvoiceRecord) -> Option<String> {
        record
            .header
            .economic_activity
            .get()
            .filter(|code| code.len() >= ACTIVITY_CODE_MIN_DIGITS)
            .map(|code| format!("actividad económica código {code}"))
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(code) = ctx.record.header.economic_activity.get() else {
            return RuleOutcome::fail("economic activity code missing");
        };
        let supporting: Vec<usize> = ctx
            .citations
            .iter()
            .enumerate()
            .filter(|(_, c)| mentions_code(c.passage(), code))
            .map(|(i, _)| i)
            .collect();
        if supporting.is_empty() {
            RuleOutcome::fail(format!("no retrieved policy passage lists activity code {code}"))
        } else {
            RuleOutcome::pass(format!("activity code {code} is listed in policy")).citing(supporting)
        }
    }
}

/// The supplier must hold a DIAN invoicing resolution covering its numbering.
pub struct DianResolution;

impl BusinessRule for DianResolution {
    fn id(&self) -> &'static str {
        "policy.dian_resolution"
    }

    fn class(&self) -> RuleClass {
        RuleClass::Advisory
    }

    fn evidence(&self) -> EvidenceRequirement {
        EvidenceRequirement::Required
    }

    fn query(&self, record: &InvoiceRecord) -> Option<String> {
        let header = &record.header;
        if header.invoice_number.is_missing() {
            return None;
        }
        let mut query = String::from("resolución DIAN facturación electrónica");
        for part in [header.supplier_name.get(), header.tax_id.get()].into_iter().flatten() {
            query.push(' ');
            query.push_str(part);
        }
        Some(query)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let header = &ctx.record.header;
        let Some(number) = header.invoice_number.get() else {
            return RuleOutcome::fail("invoice number missing, resolution cannot be checked");
        };
        let name = header.supplier_name.get();
        let base = header.tax_id.get().and_then(|raw| parse_tax_id(raw)).map(|id| id.base);

        let supporting: Vec<usize> = ctx
            .citations
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                let text = c.passage();
                mentions_resolution(text)
                    && (name.is_some_and(|n| mentions_name(text, n))
                        || base.as_deref().is_some_and(|b| mentions_tax_id(text, b)))
            })
            .map(|(i, _)| i)
            .collect();

        if supporting.is_empty() {
            RuleOutcome::fail(format!(
                "no retrieved passage holds an invoicing resolution for the issuer of {number}"
            ))
        } else {
            RuleOutcome::pass(format!("invoice {number} issued under a cited invoicing resolution"))
                .citing(supporting)
        }
    }
}
