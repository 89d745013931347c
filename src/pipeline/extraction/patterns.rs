//! The declared field → pattern table.
//!
//! Each field has patterns ordered most specific first. A pattern either
//! scans the full text (named group `v` holds the value), looks at a label
//! region's neighbors, or tests whole regions for a value shape. Text
//! patterns only match horizontal whitespace, so a label never reaches
//! into the next row.

use std::sync::LazyLock;

use regex::Regex;

use super::dates::DATE_SHAPE;

/// Header and totals fields the pattern table covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    SupplierName,
    SupplierAddress,
    TaxId,
    InvoiceNumber,
    IssueDate,
    DueDate,
    Currency,
    Subtotal,
    Tax,
    Total,
    /// Electronic invoice code (CUFE), hex digits only.
    Cufe,
    /// Economic activity (CIIU) code, digits only.
    EconomicActivity,
    /// Withholding tax rate in percent.
    WithholdingRate,
}

/// Core fields, header first, in report order. These are the fields
/// reported missing and offered to the normalizer.
pub const ALL_FIELDS: [FieldKey; 10] = [
    FieldKey::SupplierName,
    FieldKey::SupplierAddress,
    FieldKey::TaxId,
    FieldKey::InvoiceNumber,
    FieldKey::IssueDate,
    FieldKey::DueDate,
    FieldKey::Currency,
    FieldKey::Subtotal,
    FieldKey::Tax,
    FieldKey::Total,
];

/// Fields only some invoices carry (Colombian electronic invoices mostly).
/// Extracted when printed, never inferred by the normalizer.
pub const SUPPLEMENTARY_FIELDS: [FieldKey; 3] =
    [FieldKey::Cufe, FieldKey::EconomicActivity, FieldKey::WithholdingRate];

impl FieldKey {
    /// Totals fields hold numbers; the rest hold text.
    pub fn is_amount(&self) -> bool {
        matches!(self, Self::Subtotal | Self::Tax | Self::Total | Self::WithholdingRate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupplierName => "supplier_name",
            Self::SupplierAddress => "supplier_address",
            Self::TaxId => "tax_id",
            Self::InvoiceNumber => "invoice_number",
            Self::IssueDate => "issue_date",
            Self::DueDate => "due_date",
            Self::Currency => "currency",
            Self::Subtotal => "subtotal",
            Self::Tax => "tax",
            Self::Total => "total",
            Self::Cufe => "cufe",
            Self::EconomicActivity => "economic_activity",
            Self::WithholdingRate => "withholding_rate",
        }
    }
}

/// How directly a pattern ties a value to its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// Value shape alone, no label.
    Shape,
    /// Label region with the value in a neighboring region.
    Proximity,
    /// Label variant or partial label.
    LooseLabel,
    /// Canonical label immediately followed by the value.
    ExactLabel,
}

impl Specificity {
    /// Multiplier applied to region confidence.
    pub fn weight(&self) -> f32 {
        match self {
            Self::ExactLabel => 1.0,
            Self::LooseLabel => 0.9,
            Self::Proximity => 0.75,
            Self::Shape => 0.6,
        }
    }
}

pub enum Matcher {
    /// Regex over the full text.
    Text(Regex),
    /// A region whose whole text is `label`; the value is the region to its
    /// right, else the region below, when that region matches `value`.
    Neighborhood { label: Regex, value: Regex },
    /// A region whose whole text matches.
    Region(Regex),
}

pub struct FieldPattern {
    pub id: &'static str,
    pub field: FieldKey,
    pub specificity: Specificity,
    pub matcher: Matcher,
    /// Words that, right before the match, disqualify it (`Due` before `date:`).
    pub reject_preceding: &'static [&'static str],
}

const AMOUNT: &str = r"(?P<v>-?\d[\d.,]*\d|\d)";
const INVOICE_ID: &str = r"(?P<v>[A-Z0-9][A-Z0-9\-/]*\d[A-Z0-9\-/]*)";
const TAX_ID: &str = r"(?P<v>\d[\d.\-]{4,16}\d)";
/// Hex runs, optionally split by OCR into groups of four or more.
const HEX_CODE: &str = r"(?P<v>[0-9A-Fa-f]{8,}(?:[ \t\-]?[0-9A-Fa-f]{4,})*)";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid field pattern")
}

fn text(id: &'static str, field: FieldKey, specificity: Specificity, pattern: &str) -> FieldPattern {
    FieldPattern {
        id,
        field,
        specificity,
        matcher: Matcher::Text(re(pattern)),
        reject_preceding: &[],
    }
}

fn neighborhood(id: &'static str, field: FieldKey, label: &str, value: &str) -> FieldPattern {
    FieldPattern {
        id,
        field,
        specificity: Specificity::Proximity,
        matcher: Matcher::Neighborhood {
            label: re(label),
            value: re(value),
        },
        reject_preceding: &[],
    }
}

fn region(id: &'static str, field: FieldKey, pattern: &str) -> FieldPattern {
    FieldPattern {
        id,
        field,
        specificity: Specificity::Shape,
        matcher: Matcher::Region(re(pattern)),
        reject_preceding: &[],
    }
}

pub static FIELD_PATTERNS: LazyLock<Vec<FieldPattern>> = LazyLock::new(build_table);

fn build_table() -> Vec<FieldPattern> {
    use FieldKey::*;
    use Specificity::*;

    let date = format!("(?P<v>{DATE_SHAPE})");
    let amount_value = format!(r"^[^\d\n]{{0,4}}{AMOUNT}[ \t]*$");

    vec![
        // ── Invoice number ──────────────────────────────────────
        text(
            "invoice_number.label",
            InvoiceNumber,
            ExactLabel,
            &format!(
                r"(?i)\b(?:invoice|factura(?:[ \t]+de[ \t]+venta)?|bill)[ \t]*(?:no\.?|n[º°o]\.?|number|num\.?|#)[ \t]*[:.]?[ \t]*{INVOICE_ID}"
            ),
        ),
        text(
            "invoice_number.loose",
            InvoiceNumber,
            LooseLabel,
            &format!(r"(?i)\b(?:invoice|factura|bill)[ \t]*[:#][ \t]*{INVOICE_ID}"),
        ),
        neighborhood(
            "invoice_number.neighborhood",
            InvoiceNumber,
            r"(?i)^(?:invoice|factura)[ \t]*(?:no\.?|n[º°o]\.?|number|#)?[ \t]*[:.]?$",
            &format!(r"(?i)^{INVOICE_ID}$"),
        ),
        text(
            "invoice_number.shape",
            InvoiceNumber,
            Shape,
            r"\b(?P<v>(?:INV|FAC|FV|FE)-?\d{3,}(?:-\d+)*)\b",
        ),
        // ── Tax id ──────────────────────────────────────────────
        text(
            "tax_id.label",
            TaxId,
            ExactLabel,
            &format!(
                r"(?i)\b(?:NIT|RUT|RUC|CUIT|tax[ \t]*id|VAT[ \t]*(?:no\.?|number|id|reg\w*))[ \t]*[.:#]?[ \t]*(?:no\.?[ \t]*)?[:.]?[ \t]*{TAX_ID}"
            ),
        ),
        neighborhood(
            "tax_id.neighborhood",
            TaxId,
            r"(?i)^(?:NIT|RUT|tax[ \t]*id)[ \t]*[.:]?$",
            &format!(r"^{TAX_ID}$"),
        ),
        text(
            "tax_id.shape",
            TaxId,
            Shape,
            r"\b(?P<v>\d{3}\.\d{3}\.\d{3}(?:-\d)?|\d{9}-\d)\b",
        ),
        // ── Dates ───────────────────────────────────────────────
        text(
            "issue_date.label",
            IssueDate,
            ExactLabel,
            &format!(
                r"(?i)\b(?:fecha[ \t]+(?:de[ \t]+)?(?:emisi[oó]n|expedici[oó]n|factura)|issue[ \t]+date|invoice[ \t]+date|date[ \t]+of[ \t]+issue)[ \t]*[:.]?[ \t]*{date}"
            ),
        ),
        FieldPattern {
            reject_preceding: &["due", "payment", "pago", "vencimiento"],
            ..text(
                "issue_date.loose",
                IssueDate,
                LooseLabel,
                &format!(r"(?i)\b(?:fecha|date)[ \t]*[:.][ \t]*{date}"),
            )
        },
        neighborhood(
            "issue_date.neighborhood",
            IssueDate,
            r"(?i)^(?:fecha(?:[ \t]+de[ \t]+emisi[oó]n)?|date|issue[ \t]+date|invoice[ \t]+date)[ \t]*:?$",
            &format!(r"^{date}$"),
        ),
        text("issue_date.shape", IssueDate, Shape, &format!(r"\b{date}\b")),
        text(
            "due_date.label",
            DueDate,
            ExactLabel,
            &format!(
                r"(?i)\b(?:fecha[ \t]+(?:de[ \t]+)?vencimiento|vencimiento|due[ \t]+date|payment[ \t]+due|pay[ \t]+by)[ \t]*[:.]?[ \t]*{date}"
            ),
        ),
        neighborhood(
            "due_date.neighborhood",
            DueDate,
            r"(?i)^(?:fecha[ \t]+(?:de[ \t]+)?vencimiento|vencimiento|due[ \t]+date)[ \t]*:?$",
            &format!(r"^{date}$"),
        ),
        // ── Supplier ────────────────────────────────────────────
        text(
            "supplier_name.label",
            SupplierName,
            ExactLabel,
            r"(?im)\b(?:seller|supplier|vendor|proveedor|raz[oó]n[ \t]+social|emisor|vendedor)[ \t]*:[ \t]*(?P<v>[^\n]+?)(?:[ \t]{2,}|$)",
        ),
        neighborhood(
            "supplier_name.neighborhood",
            SupplierName,
            r"(?i)^(?:seller|supplier|vendor|proveedor|from|emisor|vendedor)[ \t]*:?$",
            r"^(?P<v>.{3,80})$",
        ),
        region(
            "supplier_name.company_suffix",
            SupplierName,
            r"(?i)^(?P<v>[\p{L}0-9&.,' \-]{2,60}?[ \t](?:S\.?[ \t]?A\.?[ \t]?S\.?|S\.?[ \t]?A\.?|LTDA\.?|S\.?[ \t]?R\.?[ \t]?L\.?|INC\.?|LLC|LTD\.?|GMBH|CORP\.?|S\.?L\.?))$",
        ),
        text(
            "supplier_address.label",
            SupplierAddress,
            ExactLabel,
            r"(?im)\b(?:direcci[oó]n|address|domicilio)[ \t]*:[ \t]*(?P<v>[^\n]+?)(?:[ \t]{2,}|$)",
        ),
        region(
            "supplier_address.street",
            SupplierAddress,
            r"(?i)^(?P<v>(?:calle|carrera|cra\.?|cl\.?|avenida|av\.?|diagonal|transversal|street|road)[ \t]+.*\d.*|\d+[ \t]+[\p{L} ]+[ \t](?:street|st\.?|avenue|ave\.?|road|rd\.?|blvd\.?)\b.*)$",
        ),
        // ── Currency ────────────────────────────────────────────
        text(
            "currency.label",
            Currency,
            ExactLabel,
            r"(?i)\b(?:moneda|currency|divisa)[ \t]*:[ \t]*(?P<v>[A-Z]{3})\b",
        ),
        text(
            "currency.code",
            Currency,
            LooseLabel,
            r"\b(?P<v>USD|EUR|COP|MXN|GBP|PEN|CLP|ARS|BRL|CAD)\b",
        ),
        text("currency.symbol", Currency, Shape, r"(?P<v>€|US\$|£)"),
        // ── Totals ──────────────────────────────────────────────
        text(
            "subtotal.label",
            Subtotal,
            ExactLabel,
            &format!(
                r"(?i)\b(?:sub[ \t]*-?[ \t]*total|base[ \t]+imponible|net[ \t]+(?:amount|worth))\b[^\d\n]{{0,20}}?{AMOUNT}"
            ),
        ),
        neighborhood(
            "subtotal.neighborhood",
            Subtotal,
            r"(?i)^(?:sub[ \t]*-?[ \t]*total|base[ \t]+imponible)[ \t]*:?$",
            &amount_value,
        ),
        text(
            "tax.label",
            Tax,
            ExactLabel,
            &format!(
                r"(?i)\b(?:IVA|I\.V\.A\.|VAT|tax|impuestos?)[ \t]*(?:\([ \t]*\d{{1,2}}(?:[.,]\d+)?[ \t]*%[ \t]*\))?[ \t]*[:=][ \t]*[^\d\n]{{0,6}}?{AMOUNT}"
            ),
        ),
        text(
            "tax.percent",
            Tax,
            LooseLabel,
            &format!(
                r"(?i)\b(?:IVA|VAT|tax)[ \t]+\d{{1,2}}(?:[.,]\d+)?[ \t]*%[ \t]*[:=]?[ \t]*[^\d\n]{{0,6}}?{AMOUNT}"
            ),
        ),
        neighborhood(
            "tax.neighborhood",
            Tax,
            r"(?i)^(?:IVA|VAT|tax|impuestos?)[ \t]*(?:\(?[ \t]*\d{1,2}(?:[.,]\d+)?[ \t]*%[ \t]*\)?)?[ \t]*:?$",
            &amount_value,
        ),
        text(
            "total.label",
            Total,
            ExactLabel,
            &format!(
                r"(?im)^[ \t]*(?:grand[ \t]+)?total(?:[ \t]+(?:a[ \t]+pagar|factura|due|amount|general))?[ \t]*(?:\(?[A-Z]{{3}}\)?)?[ \t]*[:=]?[ \t]*[^\d\n]{{0,6}}?{AMOUNT}"
            ),
        ),
        FieldPattern {
            reject_preceding: &["sub", "sub-"],
            ..text(
                "total.loose",
                Total,
                LooseLabel,
                &format!(r"(?i)\b(?:grand[ \t]+)?total(?:[ \t]+a[ \t]+pagar)?[ \t]*:[ \t]*[^\d\n]{{0,6}}?{AMOUNT}"),
            )
        },
        neighborhood(
            "total.neighborhood",
            Total,
            r"(?i)^(?:grand[ \t]+)?total(?:[ \t]+a[ \t]+pagar)?[ \t]*:?$",
            &amount_value,
        ),
        // ── Electronic invoice data ─────────────────────────────
        text(
            "cufe.label",
            Cufe,
            ExactLabel,
            &format!(
                r"(?i)\b(?:CUFE|CUDE|c[oó]digo[ \t]+[uú]nico[ \t]+de[ \t]+factura(?:[ \t]+electr[oó]nica)?)[ \t]*[:.]?[ \t]*{HEX_CODE}"
            ),
        ),
        neighborhood(
            "cufe.neighborhood",
            Cufe,
            r"(?i)^(?:CUFE|CUDE)[ \t]*:?$",
            &format!(r"^{HEX_CODE}$"),
        ),
        text(
            "economic_activity.label",
            EconomicActivity,
            ExactLabel,
            r"(?i)\b(?:actividad[ \t]+econ[oó]mica|act\.?[ \t]*econ\.?|c[oó]digo[ \t]+CIIU|CIIU)[ \t]*(?:c[oó]digo|no\.?)?[ \t]*[:.#]?[ \t]*(?P<v>\d{1,6})\b",
        ),
        text(
            "withholding_rate.label",
            WithholdingRate,
            ExactLabel,
            r"(?i)\b(?:retenci[oó]n(?:[ \t]+en[ \t]+la)?(?:[ \t]+fuente)?|rete[ \t]*fuente|withholding(?:[ \t]+tax)?)[^\d\n]{0,12}?(?P<v>\d{1,2}(?:[.,]\d{1,2})?)[ \t]*%",
        ),
    ]
}

/// Patterns for one field, in declared order.
pub fn patterns_for(field: FieldKey) -> impl Iterator<Item = (usize, &'static FieldPattern)> {
    FIELD_PATTERNS
        .iter()
        .enumerate()
        .filter(move |(_, p)| p.field == field)
}
