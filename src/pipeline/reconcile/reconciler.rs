//! Observation Reconciler: many noisy backends → one layout.
//!
//! Observations are clustered greedily, strongest first: each seed picks up
//! at most one observation from every other backend whose box overlaps it
//! by at least the IoU threshold. A cluster's text comes from its most
//! confident reading; readings that disagree with it survive as
//! alternatives and cost the region confidence. A final suppression pass
//! folds any remaining overlaps together so the layout never contains two
//! regions covering the same area.

use std::collections::BTreeSet;

use super::confidence::{disagreement_confidence, noisy_or};
use super::layout::ReconciledLayout;
use super::similarity::{canonical, normalized_edit_distance};
use super::types::{AlternativeReading, TextRegion};
use super::ReconcileError;
use crate::pipeline::recognition::TextObservation;
use crate::pipeline_config::ReconcileConfig;

/// One observation tagged with the backend slot it came from.
#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    backend: usize,
    observation: &'a TextObservation,
}

impl Candidate<'_> {
    fn confidence(&self) -> f32 {
        self.observation.confidence
    }
}

pub struct ObservationReconciler {
    config: ReconcileConfig,
}

impl ObservationReconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconcile a whole document.
    ///
    /// `pages[p][b]` holds backend `b`'s observations for page `p`. A failed
    /// backend is simply an empty sequence.
    pub fn reconcile(
        &self,
        pages: &[Vec<Vec<TextObservation>>],
    ) -> Result<ReconciledLayout, ReconcileError> {
        let backends = pages.iter().map(Vec::len).max().unwrap_or(0);
        if !pages.iter().flatten().any(|b| !b.is_empty()) {
            return Err(ReconcileError::NoRecognitionOutput { backends });
        }

        let mut regions = Vec::new();
        for (page, per_backend) in pages.iter().enumerate() {
            regions.extend(self.reconcile_page(page, per_backend));
        }
        if regions.is_empty() {
            return Err(ReconcileError::EmptyLayout);
        }

        let layout = ReconciledLayout::from_regions(regions);
        let disputed = layout.regions().iter().filter(|r| r.has_disagreement()).count();
        tracing::info!(
            pages = pages.len(),
            backends,
            regions = layout.regions().len(),
            disputed,
            mean_confidence = layout.mean_confidence().unwrap_or(0.0),
            "Observations reconciled"
        );
        Ok(layout)
    }

    /// Reconcile one page. Output order is confidence order, not reading order.
    pub fn reconcile_page(&self, page: usize, per_backend: &[Vec<TextObservation>]) -> Vec<TextRegion> {
        let mut candidates: Vec<Candidate<'_>> = per_backend
            .iter()
            .enumerate()
            .flat_map(|(backend, observations)| {
                observations
                    .iter()
                    .map(move |observation| Candidate { backend, observation })
            })
            .filter(|c| !c.observation.text.trim().is_empty())
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence()
                .total_cmp(&a.confidence())
                .then(a.backend.cmp(&b.backend))
        });

        let mut used = vec![false; candidates.len()];
        let mut regions = Vec::new();

        for seed in 0..candidates.len() {
            if used[seed] {
                continue;
            }
            used[seed] = true;
            let seed_box = candidates[seed].observation.region;
            let mut members = vec![candidates[seed]];

            for backend in (0..per_backend.len()).filter(|&b| b != candidates[seed].backend) {
                let best = (0..candidates.len())
                    .filter(|&j| !used[j] && candidates[j].backend == backend)
                    .map(|j| (j, seed_box.iou(&candidates[j].observation.region)))
                    .filter(|(_, iou)| *iou >= self.config.overlap_iou)
                    .max_by(|a, b| a.1.total_cmp(&b.1));
                if let Some((j, _)) = best {
                    used[j] = true;
                    members.push(candidates[j]);
                }
            }

            regions.push(self.merge_cluster(page, &members));
        }

        self.suppress_overlaps(regions)
    }

    /// Build one region from a cluster whose first member is the strongest.
    fn merge_cluster(&self, page: usize, members: &[Candidate<'_>]) -> TextRegion {
        let contributing_sources: BTreeSet<String> =
            members.iter().map(|c| c.observation.source.clone()).collect();

        if members.len() == 1 {
            let only = members[0].observation;
            return TextRegion {
                page,
                text: canonical(&only.text),
                region: only.region,
                confidence: only.confidence,
                contributing_sources,
                single_source: true,
                alternatives: Vec::new(),
            };
        }

        let agree_at = self.config.agreement_edit_distance;
        let n = members.len();
        let mut distance = vec![vec![0.0f32; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = normalized_edit_distance(&members[i].observation.text, &members[j].observation.text);
                distance[i][j] = d;
                distance[j][i] = d;
            }
        }

        // Confidence of every reading that agrees with member i, itself included
        let support: Vec<f32> = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| distance[i][j] <= agree_at)
                    .map(|j| members[j].confidence())
                    .sum()
            })
            .collect();

        let top = members[0].confidence();
        let winner = (0..n)
            .filter(|&i| top - members[i].confidence() <= self.config.tie_margin)
            .max_by(|&a, &b| {
                support[a]
                    .total_cmp(&support[b])
                    .then(members[b].backend.cmp(&members[a].backend))
            })
            .unwrap_or(0);

        let (agreeing, dissenting): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| distance[winner][i] <= agree_at);

        let agreeing_conf: Vec<f32> = agreeing.iter().map(|&i| members[i].confidence()).collect();
        let confidence = if dissenting.is_empty() {
            noisy_or(agreeing_conf)
        } else {
            let severity = dissenting
                .iter()
                .map(|&i| distance[winner][i].max(self.config.min_disagreement_severity))
                .fold(0.0f32, f32::max)
                .min(1.0);
            let dissenting_conf: Vec<f32> =
                dissenting.iter().map(|&i| members[i].confidence()).collect();
            disagreement_confidence(&agreeing_conf, &dissenting_conf, severity)
        };

        let mut alternatives: Vec<AlternativeReading> = dissenting
            .iter()
            .map(|&i| AlternativeReading {
                text: canonical(&members[i].observation.text),
                confidence: members[i].confidence(),
                source: members[i].observation.source.clone(),
                edit_distance: distance[winner][i],
            })
            .collect();
        alternatives.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let chosen = members[winner].observation;
        if !alternatives.is_empty() {
            tracing::debug!(
                page,
                text = %chosen.text,
                alternatives = alternatives.len(),
                confidence,
                "Backends disagree on region"
            );
        }

        TextRegion {
            page,
            text: canonical(&chosen.text),
            region: chosen.region,
            confidence,
            contributing_sources,
            single_source: false,
            alternatives,
        }
    }

    /// Fold regions that still overlap into the stronger one.
    fn suppress_overlaps(&self, mut regions: Vec<TextRegion>) -> Vec<TextRegion> {
        regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut kept: Vec<TextRegion> = Vec::with_capacity(regions.len());
        for region in regions {
            match kept
                .iter_mut()
                .find(|k| k.region.iou(&region.region) >= self.config.overlap_iou)
            {
                Some(keeper) => self.absorb(keeper, region),
                None => kept.push(region),
            }
        }
        kept
    }

    fn absorb(&self, keeper: &mut TextRegion, other: TextRegion) {
        let distance = normalized_edit_distance(&keeper.text, &other.text);
        if distance > self.config.agreement_edit_distance {
            let severity = distance.max(self.config.min_disagreement_severity).min(1.0);
            let share = other.confidence / (keeper.confidence + other.confidence).max(f32::EPSILON);
            keeper.confidence *= 1.0 - severity * share;
            keeper.alternatives.push(AlternativeReading {
                source: other
                    .contributing_sources
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("+"),
                text: other.text,
                confidence: other.confidence,
                edit_distance: distance,
            });
        }
        keeper.alternatives.extend(other.alternatives);
        keeper.contributing_sources.extend(other.contributing_sources);
        keeper.single_source = keeper.contributing_sources.len() == 1;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::pipeline::recognition::BoundingBox;

    fn obs(text: &str, x: f32, y: f32, confidence: f32, source: &str) -> TextObservation {
        TextObservation {
            text: text.to_string(),
            region: BoundingBox::new(x, y, 240.0, 30.0),
            confidence,
            source: source.to_string(),
        }
    }

    fn reconciler() -> ObservationReconciler {
        ObservationReconciler::new(ReconcileConfig::default())
    }

    #[test]
    fn two_agree_one_dissents() {
        let pages = vec![vec![
            vec![obs("INV-2024-001", 100.0, 50.0, 92.0, "tesseract-psm6")],
            vec![obs("INV-2024-001", 102.0, 51.0, 88.0, "tesseract-psm4")],
            vec![obs("INV-2O24-001", 99.0, 49.0, 60.0, "tesseract-psm11")],
        ]];
        let layout = reconciler().reconcile(&pages).unwrap();
        assert_eq!(layout.regions().len(), 1);

        let region = &layout.regions()[0];
        assert_eq!(region.text, "INV-2024-001");
        assert!(region.confidence > 92.0, "Expected > 92, got {}", region.confidence);
        assert_eq!(region.alternatives.len(), 1);
        assert_eq!(region.alternatives[0].text, "INV-2O24-001");
        assert_eq!(region.alternatives[0].source, "tesseract-psm11");
        assert_eq!(region.contributing_sources.len(), 3);
        assert!(!region.single_source);
    }

    #[test]
    fn pair_disagreement_lowers_confidence_below_both() {
        let pages = vec![vec![
            vec![obs("Total: 96.00", 0.0, 0.0, 80.0, "a")],
            vec![obs("Total: 86.00", 0.0, 0.0, 75.0, "b")],
        ]];
        let region = reconciler().reconcile(&pages).unwrap().regions()[0].clone();
        assert_eq!(region.text, "Total: 96.00");
        assert!(region.confidence < 75.0, "Expected < 75, got {}", region.confidence);
        let readings: Vec<&str> = region.readings().collect();
        assert_eq!(readings, vec!["Total: 96.00", "Total: 86.00"]);
    }

    #[test]
    fn single_source_region_keeps_confidence() {
        let pages = vec![vec![
            vec![obs("NIT: 900.123.456-7", 0.0, 0.0, 83.0, "a")],
            vec![obs("Fecha: 2024-03-15", 0.0, 400.0, 77.0, "b")],
        ]];
        let layout = reconciler().reconcile(&pages).unwrap();
        assert_eq!(layout.regions().len(), 2);
        for region in layout.regions() {
            assert!(region.single_source);
            assert_eq!(region.contributing_sources.len(), 1);
        }
        assert_eq!(layout.regions()[0].confidence, 83.0);
        let weighted = layout.regions()[0].effective_confidence(0.9);
        assert!((weighted - 74.7).abs() < 1e-3, "Expected 74.7, got {weighted}");
    }

    #[test]
    fn one_surviving_backend_is_enough() {
        let pages = vec![vec![
            vec![],
            vec![obs("Subtotal: 80.00", 0.0, 0.0, 90.0, "b")],
            vec![],
        ]];
        let layout = reconciler().reconcile(&pages).unwrap();
        assert_eq!(layout.full_text(), "Subtotal: 80.00");
    }

    #[test]
    fn all_backends_empty_is_fatal() {
        let pages = vec![vec![vec![], vec![]], vec![vec![], vec![]]];
        let err = reconciler().reconcile(&pages).unwrap_err();
        assert_eq!(err, ReconcileError::NoRecognitionOutput { backends: 2 });
    }

    #[test]
    fn blank_text_only_is_empty_layout() {
        let pages = vec![vec![vec![obs("   ", 0.0, 0.0, 40.0, "a")]]];
        let err = reconciler().reconcile(&pages).unwrap_err();
        assert_eq!(err, ReconcileError::EmptyLayout);
    }

    #[test]
    fn tie_goes_to_reading_with_more_support() {
        let pages = vec![vec![
            vec![obs("Total: 96.00", 0.0, 0.0, 80.0, "a")],
            vec![obs("Total: 86.00", 0.0, 0.0, 80.0, "b")],
            vec![obs("Total: 86.00", 0.0, 0.0, 50.0, "c")],
        ]];
        let region = reconciler().reconcile(&pages).unwrap().regions()[0].clone();
        assert_eq!(region.text, "Total: 86.00");
        assert_eq!(region.alternatives[0].text, "Total: 96.00");
    }

    #[test]
    fn exact_tie_goes_to_backend_order() {
        let pages = vec![vec![
            vec![obs("ACME S.A.S.", 0.0, 0.0, 80.0, "first")],
            vec![obs("ACNE S.A.S.", 0.0, 0.0, 80.0, "second")],
        ]];
        let region = reconciler().reconcile(&pages).unwrap().regions()[0].clone();
        assert_eq!(region.text, "ACME S.A.S.");
    }

    #[test]
    fn tie_margin_is_configurable() {
        let config = ReconcileConfig {
            tie_margin: 10.0,
            ..ReconcileConfig::default()
        };
        let pages = vec![vec![
            vec![obs("Total: 96.00", 0.0, 0.0, 85.0, "a")],
            vec![obs("Total: 86.00", 0.0, 0.0, 80.0, "b")],
            vec![obs("Total: 86.00", 0.0, 0.0, 70.0, "c")],
        ]];
        let wide = ObservationReconciler::new(config).reconcile(&pages).unwrap();
        assert_eq!(wide.regions()[0].text, "Total: 86.00");

        let narrow = reconciler().reconcile(&pages).unwrap();
        assert_eq!(narrow.regions()[0].text, "Total: 96.00");
    }

    #[test]
    fn same_backend_duplicates_are_folded() {
        let pages = vec![vec![vec![
            obs("Total: 96.00", 0.0, 0.0, 90.0, "a"),
            obs("Total: 96.00", 4.0, 1.0, 70.0, "a"),
        ]]];
        let layout = reconciler().reconcile(&pages).unwrap();
        assert_eq!(layout.regions().len(), 1);
        assert_eq!(layout.regions()[0].confidence, 90.0);
    }

    #[test]
    fn final_regions_never_overlap_past_threshold() {
        let pages = vec![vec![
            vec![
                obs("Line A", 0.0, 0.0, 90.0, "a"),
                obs("Line A'", 30.0, 0.0, 60.0, "a"),
                obs("Line B", 0.0, 40.0, 80.0, "a"),
            ],
            vec![obs("Line A", 60.0, 0.0, 85.0, "b"), obs("Line B", 0.0, 42.0, 82.0, "b")],
        ]];
        let layout = reconciler().reconcile(&pages).unwrap();
        let regions = layout.regions();
        for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                let iou = regions[i].region.iou(&regions[j].region);
                assert!(iou < 0.5, "Regions {i} and {j} overlap with IoU {iou}");
            }
        }
    }

    proptest! {
        /// Agreeing readings never lower confidence below the best source.
        #[test]
        fn agreement_never_lowers_confidence(
            text in "[A-Z0-9]{4,16}",
            a in 1.0f32..99.0,
            b in 1.0f32..99.0,
            shift in 0.0f32..20.0,
        ) {
            let pages = vec![vec![
                vec![obs(&text, 0.0, 0.0, a, "a")],
                vec![obs(&text, shift, 0.0, b, "b")],
            ]];
            let layout = reconciler().reconcile(&pages).unwrap();
            prop_assert_eq!(layout.regions().len(), 1);
            let c = layout.regions()[0].confidence;
            prop_assert!(c >= a.max(b) - 1e-3, "Expected >= {}, got {}", a.max(b), c);
        }

        /// Disagreeing readings fall below the weaker source and both survive.
        #[test]
        fn disagreement_lowers_confidence_and_keeps_both(
            text in "[A-Z]{6,12}",
            a in 1.0f32..99.0,
            b in 1.0f32..99.0,
        ) {
            let other = format!("{text}-X9");
            let pages = vec![vec![
                vec![obs(&text, 0.0, 0.0, a, "a")],
                vec![obs(&other, 0.0, 0.0, b, "b")],
            ]];
            let layout = reconciler().reconcile(&pages).unwrap();
            prop_assert_eq!(layout.regions().len(), 1);
            let region = &layout.regions()[0];
            prop_assert!(region.confidence < a.min(b), "Expected < {}, got {}", a.min(b), region.confidence);
            let readings: Vec<&str> = region.readings().collect();
            prop_assert!(readings.contains(&text.as_str()));
            prop_assert!(readings.contains(&other.as_str()));
        }
    }
}
