//! Prompt construction and the answer protocol.
//!
//! One prompt per field. The model sees the fields already established from
//! the document, an excerpt of the recognized text and the declared output
//! format, and answers either
//!
//! ```text
//! VALUE: <value>
//! RATIONALE: <one sentence>
//! ```
//!
//! or the single word `NULL`.

use super::format::DeclaredFormat;

pub const SYSTEM_PROMPT: &str = "\
You complete missing fields of a supplier invoice from its recognized text.
RULES:
1. Use ONLY information present in the document text or the known fields.
2. NEVER guess. If the value is not supported by the text, answer NULL.
3. The value MUST follow the requested format exactly.
4. Answer with two lines, VALUE: and RATIONALE:, or with NULL alone.";

/// Build the prompt for one field.
pub fn build_field_prompt(
    field_name: &str,
    format: &DeclaredFormat,
    known: &[(&'static str, String)],
    uncertain_reading: Option<&str>,
    excerpt: &str,
) -> String {
    let mut prompt = String::new();

    if !known.is_empty() {
        prompt.push_str("Known fields:\n");
        for (name, value) in known {
            prompt.push_str(&format!("- {name}: {value}\n"));
        }
        prompt.push('\n');
    }

    if !excerpt.is_empty() {
        prompt.push_str("<document>\n");
        prompt.push_str(excerpt);
        prompt.push_str("\n</document>\n\n");
    }

    prompt.push_str(&format!("Field: {field_name}\nFormat: {}\n", format.description));
    if let Some(reading) = uncertain_reading {
        prompt.push_str(&format!(
            "The text recognizer read \"{reading}\" with low confidence. Correct it only if the document supports a different value.\n"
        ));
    }
    prompt.push_str("Answer:");
    prompt
}

/// A parsed model answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAnswer {
    pub value: String,
    pub rationale: Option<String>,
}

/// Parse the answer protocol. `None` for `NULL`, empty or unstructured text.
pub fn parse_answer(text: &str) -> Option<ModelAnswer> {
    let mut value = None;
    let mut rationale = None;

    for line in text.lines().map(str::trim) {
        if let Some(rest) = strip_key(line, "VALUE:") {
            value.get_or_insert_with(|| rest.to_string());
        } else if let Some(rest) = strip_key(line, "RATIONALE:") {
            rationale.get_or_insert_with(|| rest.to_string());
        }
    }

    let value = value?
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c.is_whitespace())
        .to_string();
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        return None;
    }

    Some(ModelAnswer {
        value,
        rationale: rationale.filter(|r| !r.is_empty()),
    })
}

fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let head = line.get(..key.len())?;
    head.eq_ignore_ascii_case(key)
        .then(|| line[key.len()..].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::FieldKey;
    use crate::pipeline::normalize::format_for;

    #[test]
    fn prompt_carries_known_fields_format_and_excerpt() {
        let format = format_for(FieldKey::TaxId).unwrap();
        let known = vec![("supplier_name", "ACME S.A.S.".to_string())];
        let prompt = build_field_prompt("tax_id", format, &known, None, "NIT 900123456-7");
        assert!(prompt.contains("- supplier_name: ACME S.A.S."));
        assert!(prompt.contains("<document>\nNIT 900123456-7\n</document>"));
        assert!(prompt.contains(format.description));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn prompt_without_excerpt_has_no_document_block() {
        let format = format_for(FieldKey::Currency).unwrap();
        let prompt = build_field_prompt("currency", format, &[], Some("C0P"), "");
        assert!(!prompt.contains("<document>"));
        assert!(prompt.contains("\"C0P\""));
    }

    #[test]
    fn parses_value_and_rationale() {
        let answer = parse_answer("VALUE: 900123456-7\nRATIONALE: printed after NIT").unwrap();
        assert_eq!(answer.value, "900123456-7");
        assert_eq!(answer.rationale.as_deref(), Some("printed after NIT"));
    }

    #[test]
    fn null_and_free_text_are_no_answer() {
        assert_eq!(parse_answer("NULL"), None);
        assert_eq!(parse_answer("VALUE: null\nRATIONALE: not found"), None);
        assert_eq!(parse_answer("The tax id is probably 900123456"), None);
    }

    #[test]
    fn value_quotes_are_trimmed_and_keys_are_case_insensitive() {
        let answer = parse_answer("value: \"COP\"").unwrap();
        assert_eq!(answer.value, "COP");
        assert_eq!(answer.rationale, None);
    }
}
