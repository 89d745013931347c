//! Colombian NIT check digit (DIAN modulo-11 scheme).

/// Weights applied to the base digits, rightmost first.
const NIT_WEIGHTS: [u32; 15] = [3, 7, 13, 17, 19, 23, 29, 37, 41, 43, 47, 53, 59, 67, 71];

/// A tax id split into its base digits and optional check digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxId {
    pub base: String,
    pub check_digit: Option<u32>,
}

/// Parse `900123456-7`, `900.123.456-7` or `900123456`.
///
/// Returns `None` when the base contains anything other than digits and
/// separators, or when the part after `-` is not a single digit.
pub fn parse_tax_id(raw: &str) -> Option<TaxId> {
    let (base_raw, check_raw) = match raw.trim().rsplit_once('-') {
        Some((base, check)) => (base, Some(check.trim())),
        None => (raw.trim(), None),
    };

    let mut base = String::new();
    for c in base_raw.chars() {
        match c {
            '0'..='9' => base.push(c),
            '.' | ' ' => {}
            _ => return None,
        }
    }
    if base.is_empty() {
        return None;
    }

    let check_digit = match check_raw {
        Some(check) if check.len() == 1 => Some(check.chars().next()?.to_digit(10)?),
        Some(_) => return None,
        None => None,
    };
    Some(TaxId { base, check_digit })
}

/// Expected check digit for the base digits, or `None` past 15 digits.
pub fn nit_check_digit(base: &str) -> Option<u32> {
    if base.len() > NIT_WEIGHTS.len() {
        return None;
    }
    let mut sum = 0u32;
    for (c, weight) in base.chars().rev().zip(NIT_WEIGHTS) {
        sum += c.to_digit(10)? * weight;
    }
    let remainder = sum % 11;
    Some(if remainder > 1 { 11 - remainder } else { remainder })
}
