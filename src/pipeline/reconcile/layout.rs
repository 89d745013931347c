//! Reading order and the concatenated full text.
//!
//! Regions are grouped into row bands per page (top to bottom), each band
//! sorted left to right. The full text joins regions in a row with two
//! spaces and rows with a newline; a span table maps byte ranges of the
//! full text back to regions, so extraction can recover the confidence of
//! whatever text a pattern matched.

use std::ops::Range;

use super::confidence::mean;
use super::types::TextRegion;

/// Separator between regions sharing a row.
pub const CELL_SEPARATOR: &str = "  ";

/// Fraction of the shorter height two regions must share to sit on one row.
const ROW_OVERLAP_RATIO: f32 = 0.5;

/// A row band: a contiguous run of regions in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRow {
    pub page: usize,
    /// Indices into `ReconciledLayout::regions`.
    pub regions: Range<usize>,
    /// Byte range of the row inside the full text.
    pub text_range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledLayout {
    regions: Vec<TextRegion>,
    rows: Vec<LayoutRow>,
    full_text: String,
    /// Byte range of each region inside `full_text`, parallel to `regions`.
    spans: Vec<Range<usize>>,
}

impl ReconciledLayout {
    /// Put regions into reading order and build the full text.
    pub fn from_regions(regions: Vec<TextRegion>) -> Self {
        let mut by_page: std::collections::BTreeMap<usize, Vec<TextRegion>> = Default::default();
        for r in regions {
            by_page.entry(r.page).or_default().push(r);
        }

        let mut ordered = Vec::new();
        let mut rows = Vec::new();
        let mut full_text = String::new();
        let mut spans = Vec::new();

        for (page, page_regions) in by_page {
            for band in row_bands(page_regions) {
                if !full_text.is_empty() {
                    full_text.push('\n');
                }
                let row_start = full_text.len();
                let first = ordered.len();
                for (i, region) in band.into_iter().enumerate() {
                    if i > 0 {
                        full_text.push_str(CELL_SEPARATOR);
                    }
                    let start = full_text.len();
                    full_text.push_str(&region.text);
                    spans.push(start..full_text.len());
                    ordered.push(region);
                }
                rows.push(LayoutRow {
                    page,
                    regions: first..ordered.len(),
                    text_range: row_start..full_text.len(),
                });
            }
        }

        Self {
            regions: ordered,
            rows,
            full_text,
            spans,
        }
    }

    pub fn regions(&self) -> &[TextRegion] {
        &self.regions
    }

    pub fn rows(&self) -> &[LayoutRow] {
        &self.rows
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.regions.iter().map(|r| r.page + 1).max().unwrap_or(0)
    }

    pub fn row_text(&self, row: &LayoutRow) -> &str {
        &self.full_text[row.text_range.clone()]
    }

    pub fn row_regions(&self, row: &LayoutRow) -> &[TextRegion] {
        &self.regions[row.regions.clone()]
    }

    /// Byte range of a region inside the full text.
    pub fn span_of(&self, region_index: usize) -> Option<Range<usize>> {
        self.spans.get(region_index).cloned()
    }

    /// Indices of regions whose text intersects the byte range.
    pub fn regions_in_span(&self, range: Range<usize>) -> Vec<usize> {
        self.spans
            .iter()
            .enumerate()
            .filter(|(_, span)| span.start < range.end && range.start < span.end)
            .map(|(i, _)| i)
            .collect()
    }

    /// Weakest effective confidence among regions under a byte range.
    pub fn confidence_over(&self, range: Range<usize>, single_source_weight: f32) -> Option<f32> {
        self.regions_in_span(range)
            .into_iter()
            .map(|i| self.regions[i].effective_confidence(single_source_weight))
            .reduce(f32::min)
    }

    /// Row index containing the region.
    pub fn row_of(&self, region_index: usize) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.regions.contains(&region_index))
    }

    /// Next region to the right on the same row.
    pub fn right_neighbor(&self, region_index: usize) -> Option<usize> {
        let row = &self.rows[self.row_of(region_index)?];
        let next = region_index + 1;
        row.regions.contains(&next).then_some(next)
    }

    /// First region on the following row of the same page that overlaps
    /// horizontally with the given region.
    pub fn region_below(&self, region_index: usize) -> Option<usize> {
        let row_index = self.row_of(region_index)?;
        let row = &self.rows[row_index];
        let next_row = self.rows.get(row_index + 1).filter(|r| r.page == row.page)?;
        let anchor = &self.regions[region_index].region;
        next_row.regions.clone().find(|&i| {
            let b = &self.regions[i].region;
            b.x < anchor.right() && anchor.x < b.right()
        })
    }

    pub fn mean_confidence(&self) -> Option<f32> {
        mean(self.regions.iter().map(|r| r.confidence))
    }
}

/// Group a page's regions into rows, top to bottom, each left to right.
fn row_bands(mut regions: Vec<TextRegion>) -> Vec<Vec<TextRegion>> {
    regions.sort_by(|a, b| {
        a.region
            .center_y()
            .total_cmp(&b.region.center_y())
            .then(a.region.x.total_cmp(&b.region.x))
    });

    let mut bands: Vec<Vec<TextRegion>> = Vec::new();
    for region in regions {
        let joins_last = bands.last().is_some_and(|band| {
            let anchor = &band[0].region;
            let cy = region.region.center_y();
            (cy >= anchor.y && cy <= anchor.bottom())
                || anchor.vertical_overlap_ratio(&region.region) >= ROW_OVERLAP_RATIO
        });
        match bands.last_mut() {
            Some(band) if joins_last => band.push(region),
            _ => bands.push(vec![region]),
        }
    }

    for band in &mut bands {
        band.sort_by(|a, b| a.region.x.total_cmp(&b.region.x));
    }
    bands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::reconcile::types::region;

    fn sample() -> ReconciledLayout {
        ReconciledLayout::from_regions(vec![
            region("96.00", 400.0, 302.0, 80.0, 26.0, 90.0),
            region("Total:", 50.0, 300.0, 90.0, 30.0, 95.0),
            region("ACME S.A.S.", 50.0, 20.0, 200.0, 30.0, 88.0),
            region("Invoice No: INV-2024-001", 50.0, 60.0, 300.0, 30.0, 96.0),
        ])
    }

    #[test]
    fn reading_order_is_rows_then_columns() {
        let layout = sample();
        let texts: Vec<&str> = layout.regions().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["ACME S.A.S.", "Invoice No: INV-2024-001", "Total:", "96.00"]);
        assert_eq!(layout.rows().len(), 3);
    }

    #[test]
    fn full_text_joins_cells_and_rows() {
        let layout = sample();
        assert_eq!(
            layout.full_text(),
            "ACME S.A.S.\nInvoice No: INV-2024-001\nTotal:  96.00"
        );
        assert_eq!(layout.row_text(&layout.rows()[2]), "Total:  96.00");
    }

    #[test]
    fn spans_map_back_to_regions() {
        let layout = sample();
        let text = layout.full_text();
        let at = text.find("96.00").unwrap();
        assert_eq!(layout.regions_in_span(at..at + 5), vec![3]);
        let span = layout.span_of(1).unwrap();
        assert_eq!(&text[span], "Invoice No: INV-2024-001");
    }

    #[test]
    fn neighbors() {
        let layout = sample();
        assert_eq!(layout.right_neighbor(2), Some(3));
        assert_eq!(layout.right_neighbor(3), None);
        assert_eq!(layout.region_below(0), Some(1));
        assert_eq!(layout.region_below(3), None);
    }

    #[test]
    fn pages_are_read_in_order() {
        let mut second = region("Page two", 10.0, 10.0, 100.0, 20.0, 80.0);
        second.page = 1;
        let layout = ReconciledLayout::from_regions(vec![
            second,
            region("Page one", 10.0, 500.0, 100.0, 20.0, 80.0),
        ]);
        assert_eq!(layout.full_text(), "Page one\nPage two");
        assert_eq!(layout.page_count(), 2);
        // Rows on different pages are never vertical neighbors
        assert_eq!(layout.region_below(0), None);
    }

    #[test]
    fn mean_confidence_of_regions() {
        let layout = sample();
        let mean = layout.mean_confidence().unwrap();
        assert!((mean - 92.25).abs() < 1e-4, "Expected 92.25, got {mean}");
        assert_eq!(ReconciledLayout::from_regions(vec![]).mean_confidence(), None);
    }
}
