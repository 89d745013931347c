//! Tesseract TSV output → line-level observations.
//!
//! TSV columns: level page_num block_num par_num line_num word_num left top width height conf text.
//! Level 5 rows are words. Words sharing (page, block, paragraph, line) are
//! joined into one observation whose box is the union of the word boxes and
//! whose confidence is the mean word confidence.

use super::types::{BoundingBox, TextObservation};

#[derive(Debug)]
struct LineAccumulator {
    key: (u32, u32, u32, u32),
    words: Vec<String>,
    region: BoundingBox,
    confidence_sum: f32,
}

impl LineAccumulator {
    fn into_observation(self, source: &str) -> TextObservation {
        let count = self.words.len().max(1) as f32;
        TextObservation {
            text: self.words.join(" "),
            region: self.region,
            confidence: (self.confidence_sum / count).clamp(0.0, 100.0),
            source: source.to_string(),
        }
    }
}

/// Parse TSV text into observations tagged with `source`, in TSV order.
pub fn parse_tsv_lines(tsv: &str, source: &str) -> Vec<TextObservation> {
    let mut lines: Vec<TextObservation> = Vec::new();
    let mut current: Option<LineAccumulator> = None;

    for row in tsv.lines() {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Header row and non-word levels fail this parse or the level check
        match fields[0].trim().parse::<i32>() {
            Ok(5) => {}
            _ => continue,
        }

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        // Tesseract reports -1 for entries it cannot score
        let conf: f32 = match fields[10].trim().parse() {
            Ok(c) if c >= 0.0 => c,
            _ => continue,
        };

        let Some(key) = parse_line_key(&fields[1..5]) else {
            continue;
        };
        let Some(region) = parse_bounding_box(fields[6], fields[7], fields[8], fields[9]) else {
            continue;
        };

        match current.as_mut() {
            Some(acc) if acc.key == key => {
                acc.words.push(word.to_string());
                acc.region = acc.region.union(&region);
                acc.confidence_sum += conf;
            }
            _ => {
                if let Some(done) = current.take() {
                    lines.push(done.into_observation(source));
                }
                current = Some(LineAccumulator {
                    key,
                    words: vec![word.to_string()],
                    region,
                    confidence_sum: conf,
                });
            }
        }
    }

    if let Some(done) = current {
        lines.push(done.into_observation(source));
    }
    lines
}

fn parse_line_key(fields: &[&str]) -> Option<(u32, u32, u32, u32)> {
    Some((
        fields[0].trim().parse().ok()?,
        fields[1].trim().parse().ok()?,
        fields[2].trim().parse().ok()?,
        fields[3].trim().parse().ok()?,
    ))
}

/// Parse bounding box coordinates from TSV string fields.
/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox::new(
        left.trim().parse().ok()?,
        top.trim().parse().ok()?,
        width.trim().parse().ok()?,
        height.trim().parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for r in rows {
            out.push('\n');
            out.push_str(r);
        }
        out
    }

    #[test]
    fn words_on_one_line_are_joined() {
        let input = tsv(&[
            "4\t1\t1\t1\t1\t0\t10\t20\t300\t30\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t20\t120\t30\t92\tInvoice",
            "5\t1\t1\t1\t1\t2\t140\t22\t40\t28\t88\tNo:",
            "5\t1\t1\t1\t1\t3\t190\t20\t120\t30\t90\tINV-2024-001",
        ]);
        let lines = parse_tsv_lines(&input, "tesseract-psm6");
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.text, "Invoice No: INV-2024-001");
        assert_eq!(line.source, "tesseract-psm6");
        assert!((line.confidence - 90.0).abs() < 1e-4, "Expected mean 90, got {}", line.confidence);
        assert_eq!(line.region.x, 10.0);
        assert_eq!(line.region.right(), 310.0);
        assert_eq!(line.region.bottom(), 50.0);
    }

    #[test]
    fn separate_lines_stay_separate() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t20\t100\t30\t95\tSubtotal:",
            "5\t1\t1\t1\t1\t2\t120\t20\t60\t30\t93\t80.00",
            "5\t1\t1\t1\t2\t1\t10\t60\t60\t30\t91\tTotal:",
            "5\t1\t1\t1\t2\t2\t120\t60\t60\t30\t89\t96.00",
        ]);
        let lines = parse_tsv_lines(&input, "t");
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["Subtotal: 80.00", "Total: 96.00"]);
    }

    #[test]
    fn unscored_and_empty_words_are_dropped() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t20\t100\t30\t-1\tghost",
            "5\t1\t1\t1\t1\t2\t120\t20\t60\t30\t80\t ",
            "5\t1\t1\t1\t1\t3\t200\t20\t60\t30\t70\tkept",
        ]);
        let lines = parse_tsv_lines(&input, "t");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "kept");
        assert_eq!(lines[0].confidence, 70.0);
    }

    #[test]
    fn fractional_confidence_from_tesseract_5() {
        let input = tsv(&["5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t96.417\tNIT"]);
        let lines = parse_tsv_lines(&input, "t");
        assert!((lines[0].confidence - 96.417).abs() < 1e-3);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let input = tsv(&["garbage", "5\t1\t1\t1\t1\t1\tx\t0\t10\t10\t90\tbad-box"]);
        assert!(parse_tsv_lines(&input, "t").is_empty());
    }
}
