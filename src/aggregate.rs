//! Weighted aggregation of layer scores into a final score.
//!
//! Two passes that must not be conflated:
//! - the layer pass combines keyword, semantic and judge-overall scores;
//! - the dimension pass recomputes judge-overall from a chosen subset of
//!   judge dimensions, each with its own independently normalized weight.

use crate::error::{Result, ScorecardError};
use crate::judge::{Dimension, JudgeRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One of the three independent scoring signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Keyword,
    Semantic,
    Judge,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Keyword, Layer::Semantic, Layer::Judge];
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Keyword => "keyword",
            Layer::Semantic => "semantic",
            Layer::Judge => "judge",
        };
        f.write_str(name)
    }
}

/// Caller-supplied layer weights. Not required to sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default)]
    pub keyword: f64,
    #[serde(default)]
    pub semantic: f64,
    #[serde(default, alias = "gpt")]
    pub judge: f64,
}

impl WeightConfig {
    pub fn new(keyword: f64, semantic: f64, judge: f64) -> Self {
        Self {
            keyword,
            semantic,
            judge,
        }
    }

    /// Default split for a given set of active layers.
    pub fn default_for(active: ActiveLayers) -> Self {
        match (active.semantic, active.judge) {
            (true, true) => Self::new(0.3, 0.3, 0.4),
            (true, false) => Self::new(0.5, 0.5, 0.0),
            (false, true) => Self::new(0.4, 0.0, 0.6),
            (false, false) => Self::new(1.0, 0.0, 0.0),
        }
    }

    pub fn weight(&self, layer: Layer) -> f64 {
        let raw = match layer {
            Layer::Keyword => self.keyword,
            Layer::Semantic => self.semantic,
            Layer::Judge => self.judge,
        };
        sanitize_weight(raw)
    }

    /// Reject negative or non-finite weights.
    pub fn check(&self) -> Result<()> {
        for layer in Layer::ALL {
            let raw = match layer {
                Layer::Keyword => self.keyword,
                Layer::Semantic => self.semantic,
                Layer::Judge => self.judge,
            };
            if !raw.is_finite() || raw < 0.0 {
                return Err(ScorecardError::Config(format!(
                    "{} weight must be a non-negative number, got {}",
                    layer, raw
                )));
            }
        }
        Ok(())
    }

    /// Renormalize over the active layers only.
    ///
    /// Inactive layers get weight zero. When the active weights sum to zero
    /// the active layers share equally.
    pub fn normalized(&self, active: ActiveLayers) -> NormalizedWeights {
        let active_layers: Vec<Layer> = Layer::ALL
            .into_iter()
            .filter(|layer| active.contains(*layer))
            .collect();

        let mut normalized = NormalizedWeights::default();
        if active_layers.is_empty() {
            return normalized;
        }

        let total: f64 = active_layers.iter().map(|layer| self.weight(*layer)).sum();
        for layer in &active_layers {
            let share = if total > 0.0 {
                self.weight(*layer) / total
            } else {
                1.0 / active_layers.len() as f64
            };
            normalized.set(*layer, share);
        }
        normalized
    }
}

fn sanitize_weight(raw: f64) -> f64 {
    if raw.is_finite() && raw > 0.0 { raw } else { 0.0 }
}

/// Which layers produced a usable score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveLayers {
    pub keyword: bool,
    pub semantic: bool,
    pub judge: bool,
}

impl ActiveLayers {
    pub fn contains(&self, layer: Layer) -> bool {
        match layer {
            Layer::Keyword => self.keyword,
            Layer::Semantic => self.semantic,
            Layer::Judge => self.judge,
        }
    }
}

/// Weights after renormalization; inactive layers are zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedWeights {
    pub keyword: f64,
    pub semantic: f64,
    pub judge: f64,
}

impl NormalizedWeights {
    pub fn get(&self, layer: Layer) -> f64 {
        match layer {
            Layer::Keyword => self.keyword,
            Layer::Semantic => self.semantic,
            Layer::Judge => self.judge,
        }
    }

    fn set(&mut self, layer: Layer, value: f64) {
        match layer {
            Layer::Keyword => self.keyword = value,
            Layer::Semantic => self.semantic = value,
            Layer::Judge => self.judge = value,
        }
    }

    pub fn sum(&self) -> f64 {
        self.keyword + self.semantic + self.judge
    }
}

/// Per-layer scores for one answer version. `None` marks an inactive layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerScores {
    pub keyword: Option<f64>,
    pub semantic: Option<f64>,
    pub judge: Option<f64>,
}

impl LayerScores {
    pub fn get(&self, layer: Layer) -> Option<f64> {
        match layer {
            Layer::Keyword => self.keyword,
            Layer::Semantic => self.semantic,
            Layer::Judge => self.judge,
        }
    }

    pub fn active(&self) -> ActiveLayers {
        ActiveLayers {
            keyword: self.keyword.is_some_and(f64::is_finite),
            semantic: self.semantic.is_some_and(f64::is_finite),
            judge: self.judge.is_some_and(f64::is_finite),
        }
    }
}

/// Outcome of the layer pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub final_score: f64,
    pub weights: NormalizedWeights,
}

/// Combine layer scores into the final score for one version.
pub fn aggregate(scores: &LayerScores, weights: &WeightConfig) -> Aggregation {
    let active = scores.active();
    let normalized = weights.normalized(active);

    let final_score = Layer::ALL
        .into_iter()
        .filter_map(|layer| scores.get(layer).map(|score| score * normalized.get(layer)))
        .filter(|weighted| weighted.is_finite())
        .sum();

    Aggregation {
        final_score,
        weights: normalized,
    }
}

/// Per-dimension weights for the judge-overall recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionWeights(pub BTreeMap<Dimension, f64>);

impl Default for DimensionWeights {
    fn default() -> Self {
        Self::equal()
    }
}

impl DimensionWeights {
    /// 0.25 for each of the four dimensions.
    pub fn equal() -> Self {
        Self(Dimension::ALL.iter().map(|dim| (*dim, 0.25)).collect())
    }

    pub fn check(&self) -> Result<()> {
        for (dim, weight) in &self.0 {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ScorecardError::Config(format!(
                    "{} weight must be a non-negative number, got {}",
                    dim, weight
                )));
            }
        }
        Ok(())
    }

    /// Normalize over `selected`; equal split when the selection sums to zero.
    pub fn normalized(&self, selected: &[Dimension]) -> BTreeMap<Dimension, f64> {
        let mut dims: Vec<Dimension> = selected.to_vec();
        dims.sort();
        dims.dedup();
        if dims.is_empty() {
            return BTreeMap::new();
        }

        let raw: Vec<f64> = dims
            .iter()
            .map(|dim| sanitize_weight(self.0.get(dim).copied().unwrap_or(0.0)))
            .collect();
        let total: f64 = raw.iter().sum();
        let count = dims.len() as f64;

        dims.into_iter()
            .zip(raw)
            .map(|(dim, weight)| {
                let share = if total > 0.0 { weight / total } else { 1.0 / count };
                (dim, share)
            })
            .collect()
    }
}

/// Recompute judge-overall from the selected dimensions.
///
/// Dimensions without a score are skipped and the remaining weights are
/// rescaled. Falls back to the record's own overall when nothing scored.
/// An empty selection means all four dimensions.
pub fn judge_overall(
    record: &JudgeRecord,
    selected: &[Dimension],
    weights: &DimensionWeights,
) -> Option<f64> {
    let selected = if selected.is_empty() {
        &Dimension::ALL[..]
    } else {
        selected
    };
    let normalized = weights.normalized(selected);

    let mut score_sum = 0.0;
    let mut applied = 0.0;
    for (dim, weight) in &normalized {
        if let Some(score) = record.score(*dim) {
            score_sum += score * weight;
            applied += weight;
        }
    }

    if applied > 0.0 {
        Some(score_sum / applied)
    } else {
        record.overall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::parse_judge_text;

    fn all_active() -> ActiveLayers {
        ActiveLayers {
            keyword: true,
            semantic: true,
            judge: true,
        }
    }

    #[test]
    fn test_default_weights_by_active_set() {
        let only_keyword = ActiveLayers {
            keyword: true,
            ..Default::default()
        };
        assert_eq!(
            WeightConfig::default_for(only_keyword),
            WeightConfig::new(1.0, 0.0, 0.0)
        );
        assert_eq!(
            WeightConfig::default_for(all_active()),
            WeightConfig::new(0.3, 0.3, 0.4)
        );
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        let cases = [
            WeightConfig::new(1.0, 2.0, 3.0),
            WeightConfig::new(0.3, 0.3, 0.4),
            WeightConfig::new(10.0, 0.0, 0.5),
            WeightConfig::new(0.001, 0.002, 0.0),
        ];
        for weights in cases {
            let normalized = weights.normalized(all_active());
            assert!((normalized.sum() - 1.0).abs() < 1e-6, "{:?}", weights);
        }
    }

    #[test]
    fn test_inactive_layer_weight_redistributed() {
        let weights = WeightConfig::new(0.3, 0.3, 0.4);
        let active = ActiveLayers {
            keyword: true,
            semantic: false,
            judge: true,
        };
        let normalized = weights.normalized(active);
        assert_eq!(normalized.semantic, 0.0);
        assert!((normalized.keyword - 0.3 / 0.7).abs() < 1e-9);
        assert!((normalized.judge - 0.4 / 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weights_fall_back_to_equal_split() {
        let weights = WeightConfig::new(0.0, 0.0, 0.0);
        let normalized = weights.normalized(all_active());
        for layer in Layer::ALL {
            assert!((normalized.get(layer) - 1.0 / 3.0).abs() < 1e-9);
        }

        // Only the semantic layer carries weight but it is disabled.
        let weights = WeightConfig::new(0.0, 1.0, 0.0);
        let active = ActiveLayers {
            keyword: true,
            semantic: false,
            judge: true,
        };
        let normalized = weights.normalized(active);
        assert!((normalized.keyword - 0.5).abs() < 1e-9);
        assert!((normalized.judge - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_final_score_is_convex_combination() {
        let scores = LayerScores {
            keyword: Some(40.0),
            semantic: Some(70.0),
            judge: Some(90.0),
        };
        for weights in [
            WeightConfig::new(1.0, 1.0, 1.0),
            WeightConfig::new(0.0, 0.0, 5.0),
            WeightConfig::new(0.7, 0.2, 0.1),
        ] {
            let result = aggregate(&scores, &weights);
            assert!(result.final_score >= 40.0 - 1e-9);
            assert!(result.final_score <= 90.0 + 1e-9);
        }

        let result = aggregate(&scores, &WeightConfig::new(0.3, 0.3, 0.4));
        assert!((result.final_score - (12.0 + 21.0 + 36.0)).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_semantic_layer_excluded() {
        let scores = LayerScores {
            keyword: Some(50.0),
            semantic: None,
            judge: Some(100.0),
        };
        let result = aggregate(&scores, &WeightConfig::new(0.5, 0.5, 0.0));
        assert_eq!(result.weights.semantic, 0.0);
        assert!((result.final_score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_active_layers_scores_zero() {
        let result = aggregate(&LayerScores::default(), &WeightConfig::new(1.0, 1.0, 1.0));
        assert_eq!(result.final_score, 0.0);
        assert_eq!(result.weights.sum(), 0.0);
    }

    #[test]
    fn test_judge_overall_equal_weights() {
        let record = parse_judge_text(
            r#"{"relevance":92,"completeness":{"score":88},"accuracy":95,"faithfulness":90,"overall":91}"#,
        )
        .unwrap();
        let overall = judge_overall(&record, &Dimension::ALL, &DimensionWeights::equal()).unwrap();
        assert!((overall - 91.25).abs() < 1e-9);
    }

    #[test]
    fn test_judge_overall_subset_with_own_weights() {
        let record = parse_judge_text(
            r#"{"relevance":80,"completeness":60,"accuracy":100,"faithfulness":40}"#,
        )
        .unwrap();
        let mut weights = DimensionWeights::equal();
        weights.0.insert(Dimension::Relevance, 3.0);
        weights.0.insert(Dimension::Accuracy, 1.0);

        let overall = judge_overall(
            &record,
            &[Dimension::Relevance, Dimension::Accuracy],
            &weights,
        )
        .unwrap();
        assert!((overall - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_judge_overall_skips_unscored_dimension() {
        let record = parse_judge_text(r#"{"relevance":80,"accuracy":60,"overall":10}"#).unwrap();
        let overall =
            judge_overall(&record, &Dimension::ALL, &DimensionWeights::equal()).unwrap();
        assert!((overall - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_judge_overall_falls_back_to_record_overall() {
        let record = parse_judge_text(r#"{"completeness":70,"overall":77}"#).unwrap();
        let overall = judge_overall(&record, &[Dimension::Relevance], &DimensionWeights::equal());
        assert_eq!(overall, Some(77.0));
    }
}
