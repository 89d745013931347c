//! Text tests applied to retrieved policy passages.

use std::sync::LazyLock;

use regex::Regex;

static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:[.,]\d{1,2})?)[ \t]*(?:%|por[ \t]*ciento|percent)").expect("valid regex")
});

static TAX_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:iva|vat|tax|taxes|impuesto|impuestos|tasa|tarifa)\b").expect("valid regex")
});

static RESOLUTION_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:resoluci[oó]n|resolution|autorizaci[oó]n[ \t]+de[ \t]+numeraci[oó]n)\b")
        .expect("valid regex")
});

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.\- ]*\d").expect("valid regex"));

/// Percentages stated in `text`, in order of appearance.
pub fn stated_percentages(text: &str) -> Vec<f64> {
    PERCENT
        .captures_iter(text)
        .filter_map(|c| c[1].replace(',', ".").parse::<f64>().ok())
        .filter(|p| (0.0..=100.0).contains(p))
        .collect()
}

pub fn is_tax_related(text: &str) -> bool {
    TAX_TERMS.is_match(text)
}

/// `text` refers to an invoicing resolution or numbering authorization.
pub fn mentions_resolution(text: &str) -> bool {
    RESOLUTION_TERMS.is_match(text)
}

/// Lowercase, punctuation removed, whitespace collapsed: "ACME S.A.S." → "acme sas".
fn fold(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `text` names `name`, ignoring case and punctuation.
pub fn mentions_name(text: &str, name: &str) -> bool {
    let needle = fold(name);
    !needle.is_empty() && fold(text).contains(&needle)
}

/// `text` contains a number whose digits start with `base`
/// (so `900.123.456-7` matches base `900123456`).
pub fn mentions_tax_id(text: &str, base: &str) -> bool {
    !base.is_empty()
        && DIGIT_RUN.find_iter(text).any(|m| {
            let digits: String = m.as_str().chars().filter(char::is_ascii_digit).collect();
            digits.starts_with(base)
        })
}

/// `text` contains `code` as a whole word, case-insensitive.
pub fn mentions_code(text: &str, code: &str) -> bool {
    let code = code.trim();
    if code.is_empty() {
        return false;
    }
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| word.eq_ignore_ascii_case(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_in_several_notations() {
        assert_eq!(stated_percentages("IVA rate is 19%"), vec![19.0]);
        assert_eq!(stated_percentages("tarifa del 5 por ciento y 0,5 %"), vec![5.0, 0.5]);
        assert!(stated_percentages("no rate here").is_empty());
    }

    #[test]
    fn resolution_terms() {
        assert!(mentions_resolution("Resolución DIAN No. 18764000001234"));
        assert!(mentions_resolution("Autorización de numeración vigente"));
        assert!(!mentions_resolution("Resolved by the purchasing team"));
    }

    #[test]
    fn tax_terms_are_word_matched() {
        assert!(is_tax_related("La tarifa general del IVA"));
        assert!(!is_tax_related("Parking taxonomy"));
    }

    #[test]
    fn supplier_names_fold_punctuation() {
        assert!(mentions_name("Approved: ACME SAS, Bogotá", "ACME S.A.S."));
        assert!(!mentions_name("Approved: Globex Ltd", "ACME S.A.S."));
        assert!(!mentions_name("anything", "..."));
    }

    #[test]
    fn tax_ids_match_with_separators() {
        assert!(mentions_tax_id("NIT 900.123.456-7 registered", "900123456"));
        assert!(!mentions_tax_id("NIT 800.197.268-4", "900123456"));
    }

    #[test]
    fn currency_codes_are_whole_words() {
        assert!(mentions_code("Invoices are accepted in COP and USD.", "usd"));
        assert!(!mentions_code("USDT settlements", "USD"));
    }
}
