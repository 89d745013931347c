//! Line-item table detection.
//!
//! A header row (description/quantity plus price/total keywords) fixes the
//! order of numeric columns; data rows follow until a totals row. Without a
//! header, runs of consecutive rows ending in two or more numbers are taken
//! as the table. Each row's trailing numbers are mapped onto quantity, unit
//! price and line total; rows whose product does not match are kept and
//! flagged.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::amounts::{approx_equal, is_numeric_token, parse_amount};
use super::patterns::Specificity;
use crate::models::{InvoiceItem, TrackedField};
use crate::pipeline::reconcile::ReconciledLayout;
use crate::pipeline_config::ExtractionConfig;

static HEADER_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:descripci[oó]n|description|concepto|producto|product|art[ií]culo|item|detalle)\b")
        .expect("valid regex")
});

static HEADER_QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:cantidad|cant\.?|qty|quantity)(?:\W|$)").expect("valid regex")
});

static HEADER_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:precio(?:\s+unit(?:ario)?)?|unit\s*price|price|v\.?\s*unit(?:ario)?|valor\s+unit(?:ario)?|rate)\b")
        .expect("valid regex")
});

static HEADER_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:total|importe|amount)\b").expect("valid regex")
});

/// Rows that end the item table.
static STOP_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:sub\s*-?\s*total|total|grand\s+total|iva|i\.v\.a\.?|vat|tax|impuestos?|base\s+imponible|summary|resumen)\b")
        .expect("valid regex")
});

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("valid regex"));

static LEADING_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}[.)]?\s+").expect("valid regex"));

const HEADER_METHOD: &str = "items.header_columns";
const POSITIONAL_METHOD: &str = "items.positional";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Quantity,
    UnitPrice,
    LineTotal,
}

/// A number read from a row, with its byte range in the full text.
#[derive(Debug, Clone)]
struct Cell {
    value: f64,
    span: Range<usize>,
}

#[derive(Debug, Default)]
struct RowValues {
    quantity: Option<Cell>,
    unit_price: Option<Cell>,
    line_total: Option<Cell>,
}

/// One row split into its description part and trailing numbers.
#[derive(Debug)]
struct SplitRow {
    description: String,
    description_span: Option<Range<usize>>,
    numbers: Vec<Cell>,
}

pub struct TableExtractor<'a> {
    layout: &'a ReconciledLayout,
    config: &'a ExtractionConfig,
    single_source_weight: f32,
}

impl<'a> TableExtractor<'a> {
    pub fn new(layout: &'a ReconciledLayout, config: &'a ExtractionConfig, single_source_weight: f32) -> Self {
        Self {
            layout,
            config,
            single_source_weight,
        }
    }

    pub fn extract(&self) -> Vec<InvoiceItem> {
        let rows = self.layout.rows();
        let header = rows
            .iter()
            .enumerate()
            .find_map(|(i, row)| header_columns(self.layout.row_text(row)).map(|cols| (i, cols)));

        let items = match &header {
            Some((header_row, columns)) => self.extract_with_header(*header_row, columns),
            None => self.extract_headerless(),
        };

        let suspects = items.iter().filter(|i| i.arithmetic_suspect).count();
        tracing::debug!(
            items = items.len(),
            suspects,
            header = header.is_some(),
            "Line items extracted"
        );
        items
    }

    fn extract_with_header(&self, header_row: usize, columns: &[Column]) -> Vec<InvoiceItem> {
        let mut items: Vec<InvoiceItem> = Vec::new();

        for row_index in (header_row + 1)..self.layout.rows().len() {
            let text = self.row_text(row_index);
            if STOP_ROW.is_match(text) {
                break;
            }
            let split = self.split_row(row_index);

            if split.numbers.is_empty() {
                // Wrapped description line
                if let (Some(last), false) = (items.last_mut(), split.description.is_empty()) {
                    if let Some(previous) = last.description.value.as_mut() {
                        previous.push(' ');
                        previous.push_str(&split.description);
                    }
                }
                continue;
            }
            if !is_plausible_description(&split.description) {
                continue;
            }

            let (values, method, weight) = if split.numbers.len() == columns.len() {
                (by_columns(&split.numbers, columns), HEADER_METHOD, Specificity::LooseLabel.weight())
            } else {
                (self.by_position(&split.numbers), POSITIONAL_METHOD, Specificity::Shape.weight())
            };
            items.push(self.build_item(row_index, split, values, method, weight));
        }
        items
    }

    fn extract_headerless(&self) -> Vec<InvoiceItem> {
        let mut candidates: Vec<(usize, SplitRow)> = Vec::new();
        for row_index in 0..self.layout.rows().len() {
            if STOP_ROW.is_match(self.row_text(row_index)) {
                break;
            }
            let split = self.split_row(row_index);
            if split.numbers.len() >= 2 && is_plausible_description(&split.description) {
                candidates.push((row_index, split));
            }
        }

        // A lone two-number row is too weak to call a table
        let rows: Vec<usize> = candidates.iter().map(|(r, _)| *r).collect();
        let has_neighbor = |r: usize| rows.contains(&(r + 1)) || (r > 0 && rows.contains(&(r - 1)));

        candidates
            .into_iter()
            .filter(|(r, split)| split.numbers.len() >= 3 || has_neighbor(*r))
            .map(|(row_index, split)| {
                let values = self.by_position(&split.numbers);
                self.build_item(row_index, split, values, POSITIONAL_METHOD, Specificity::Shape.weight())
            })
            .collect()
    }

    fn row_text(&self, row_index: usize) -> &str {
        self.layout.row_text(&self.layout.rows()[row_index])
    }

    fn split_row(&self, row_index: usize) -> SplitRow {
        let row = &self.layout.rows()[row_index];
        let offset = row.text_range.start;
        let tokens: Vec<(Range<usize>, &str)> = TOKEN
            .find_iter(self.layout.row_text(row))
            .map(|m| (offset + m.start()..offset + m.end(), m.as_str()))
            .collect();

        let mut numbers = Vec::new();
        let mut cut = tokens.len();
        while cut > 0 {
            let (span, token) = &tokens[cut - 1];
            if matches!(*token, "$" | "€" | "£") || token.ends_with('%') {
                cut -= 1;
                continue;
            }
            if !is_numeric_token(token) {
                break;
            }
            match parse_amount(token) {
                Some(value) => numbers.push(Cell {
                    value,
                    span: span.clone(),
                }),
                None => break,
            }
            cut -= 1;
        }
        numbers.reverse();

        let head = &tokens[..cut];
        let joined = head.iter().map(|(_, t)| *t).collect::<Vec<_>>().join(" ");
        let description = LEADING_INDEX.replace(&joined, "").trim().to_string();
        let description_span = match (head.first(), head.last()) {
            (Some((first, _)), Some((last, _))) => Some(first.start..last.end),
            _ => None,
        };

        SplitRow {
            description,
            description_span,
            numbers,
        }
    }

    fn by_position(&self, numbers: &[Cell]) -> RowValues {
        match numbers {
            [] => RowValues::default(),
            [total] => RowValues {
                line_total: Some(total.clone()),
                ..RowValues::default()
            },
            [quantity, total] => RowValues {
                quantity: Some(quantity.clone()),
                line_total: Some(total.clone()),
                ..RowValues::default()
            },
            [quantity, price, total] => RowValues {
                quantity: Some(quantity.clone()),
                unit_price: Some(price.clone()),
                line_total: Some(total.clone()),
            },
            [quantity, price, rest @ ..] => {
                let expected = quantity.value * price.value;
                let total = rest
                    .iter()
                    .find(|c| self.within_tolerance(expected, c.value))
                    .or(rest.last())
                    .cloned();
                RowValues {
                    quantity: Some(quantity.clone()),
                    unit_price: Some(price.clone()),
                    line_total: total,
                }
            }
        }
    }

    fn within_tolerance(&self, expected: f64, actual: f64) -> bool {
        approx_equal(
            expected,
            actual,
            self.config.item_relative_tolerance,
            self.config.item_absolute_tolerance,
        )
    }

    fn build_item(
        &self,
        row_index: usize,
        split: SplitRow,
        values: RowValues,
        method: &str,
        weight: f32,
    ) -> InvoiceItem {
        let field = |cell: &Option<Cell>| -> TrackedField<f64> {
            match cell {
                Some(c) => match self.layout.confidence_over(c.span.clone(), self.single_source_weight) {
                    Some(conf) => TrackedField::extracted(c.value, conf * weight, method),
                    None => TrackedField::missing(),
                },
                None => TrackedField::missing(),
            }
        };

        let quantity = field(&values.quantity);
        let unit_price = field(&values.unit_price);
        let line_total = field(&values.line_total);

        let arithmetic_suspect = match (quantity.copied(), unit_price.copied(), line_total.copied()) {
            (Some(q), Some(p), Some(t)) => !self.within_tolerance(q * p, t),
            _ => true,
        };

        let description = match (split.description.is_empty(), split.description_span) {
            (false, Some(span)) => match self.layout.confidence_over(span, self.single_source_weight) {
                Some(conf) => TrackedField::extracted(split.description, conf * weight, method),
                None => TrackedField::missing(),
            },
            _ => TrackedField::missing(),
        };

        InvoiceItem {
            row_index,
            description,
            quantity,
            unit_price,
            line_total,
            arithmetic_suspect,
        }
    }
}

/// Numeric column order if the row reads as a table header.
fn header_columns(text: &str) -> Option<Vec<Column>> {
    let description = HEADER_DESCRIPTION.is_match(text);
    let quantity = HEADER_QUANTITY.find(text).map(|m| (m.start(), Column::Quantity));
    let price = HEADER_PRICE.find(text).map(|m| (m.start(), Column::UnitPrice));
    let total = HEADER_TOTAL.find(text).map(|m| (m.start(), Column::LineTotal));

    if !description && quantity.is_none() {
        return None;
    }
    let mut columns: Vec<(usize, Column)> = [quantity, price, total].into_iter().flatten().collect();
    if columns.len() < 2 {
        return None;
    }
    columns.sort_by_key(|(pos, _)| *pos);
    Some(columns.into_iter().map(|(_, c)| c).collect())
}

fn by_columns(numbers: &[Cell], columns: &[Column]) -> RowValues {
    let mut values = RowValues::default();
    for (cell, column) in numbers.iter().zip(columns) {
        let slot = match column {
            Column::Quantity => &mut values.quantity,
            Column::UnitPrice => &mut values.unit_price,
            Column::LineTotal => &mut values.line_total,
        };
        *slot = Some(cell.clone());
    }
    values
}

/// Item descriptions carry words and are not field labels.
fn is_plausible_description(description: &str) -> bool {
    description.chars().filter(|c| c.is_alphabetic()).count() >= 2 && !description.ends_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::reconcile::types::region;
    use crate::pipeline::reconcile::TextRegion;

    /// One region per row, rows 40px apart.
    fn layout(lines: &[&str]) -> ReconciledLayout {
        let regions: Vec<TextRegion> = lines
            .iter()
            .enumerate()
            .map(|(i, text)| region(text, 20.0, 40.0 * i as f32, 600.0, 30.0, 90.0))
            .collect();
        ReconciledLayout::from_regions(regions)
    }

    fn extract(lines: &[&str]) -> Vec<InvoiceItem> {
        let layout = layout(lines);
        TableExtractor::new(&layout, &ExtractionConfig::default(), 0.9).extract()
    }

    #[test]
    fn header_maps_columns() {
        let items = extract(&[
            "Invoice No: INV-2024-001",
            "Description  Qty  Unit Price  Total",
            "Widget A  2  20.00  40.00",
            "Widget B  1  40.00  40.00",
            "Subtotal: 80.00",
        ]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description.get().map(String::as_str), Some("Widget A"));
        assert_eq!(items[0].quantity.copied(), Some(2.0));
        assert_eq!(items[0].unit_price.copied(), Some(20.0));
        assert_eq!(items[0].line_total.copied(), Some(40.0));
        assert!(!items[0].arithmetic_suspect);
        assert_eq!(items[0].row_index, 2);
        assert!((items[0].quantity.confidence - 81.0).abs() < 1e-3, "got {}", items[0].quantity.confidence);
    }

    #[test]
    fn header_order_decides_meaning() {
        let items = extract(&[
            "Item  Unit Price  Qty  Amount",
            "Cable  15.00  3  45.00",
            "Total: 45.00",
        ]);
        assert_eq!(items[0].unit_price.copied(), Some(15.0));
        assert_eq!(items[0].quantity.copied(), Some(3.0));
        assert!(!items[0].arithmetic_suspect);
    }

    #[test]
    fn mismatched_row_is_kept_and_flagged() {
        let items = extract(&[
            "Descripción  Cantidad  Precio  Total",
            "Producto A  10  50.000  500.000",
            "Producto B  5  80.000  450.000",
            "Subtotal: $950.000",
        ]);
        assert_eq!(items.len(), 2);
        assert!(!items[0].arithmetic_suspect);
        assert!(items[1].arithmetic_suspect, "5 × 80.000 ≠ 450.000 should be flagged");
        assert_eq!(items[1].line_total.copied(), Some(450_000.0));
    }

    #[test]
    fn wrapped_description_joins_previous_item() {
        let items = extract(&[
            "Description  Qty  Price  Total",
            "Steel bolts  100  0.50  50.00",
            "zinc plated M8",
            "Total: 50.00",
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].description.get().map(String::as_str),
            Some("Steel bolts zinc plated M8")
        );
    }

    #[test]
    fn headerless_run_of_rows() {
        let items = extract(&[
            "ACME S.A.S.",
            "1 Widget  2  40.00  80.00",
            "2 Gadget  1  16.00  16.00",
            "Tel: 601 555 1234",
            "Subtotal: 96.00",
        ]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description.get().map(String::as_str), Some("Widget"));
        assert!((items[1].line_total.confidence - 54.0).abs() < 1e-3);
    }

    #[test]
    fn two_numbers_leave_price_missing() {
        let items = extract(&[
            "Description  Qty  Total",
            "Consulting hours  3  300.00",
            "Extra  40.00",
            "Total: 340.00",
        ]);
        assert_eq!(items[0].quantity.copied(), Some(3.0));
        assert!(items[0].unit_price.is_missing());
        assert!(items[0].arithmetic_suspect, "Unverifiable rows are suspect");
        assert_eq!(items[1].line_total.copied(), Some(40.0));
        assert!(items[1].quantity.is_missing());
    }

    #[test]
    fn four_numbers_pick_the_matching_total() {
        let items = extract(&["Widget  2  40.00  19%  80.00  95.20", "Gizmo  1  10.00  10.00", "Total: 105.20"]);
        assert_eq!(items[0].line_total.copied(), Some(80.0));
        assert!(!items[0].arithmetic_suspect);
    }

    #[test]
    fn no_table_no_items() {
        let items = extract(&["Invoice No: INV-2024-001", "NIT: 900.123.456-7", "Total: 96.00"]);
        assert!(items.is_empty());
    }
}
