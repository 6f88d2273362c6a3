//! AI Aggregator
//!
//! Merges named analyzer verdicts into one [`AggregatedResult`].
//!
//! Two strategies serve different call sites and are kept apart on purpose:
//!
//! - [`AggregationStrategy::WeightedByConfidence`]: orchestrator path.
//!   `score = Σ(risk · weight · confidence) / Σ weight`, inclusive thresholds
//!   (≤0.3 Safe, ≤0.7 Warning), issues and recommendations deduplicated
//!   keeping first occurrence.
//! - [`AggregationStrategy::FixedThreeModel`]: engine path.
//!   Straight weighted sum over the `source` / `bytecode` / `behavior` slots,
//!   exclusive thresholds (<0.3 Safe, <0.7 Warning), lists concatenated as-is.
//!
//! The weight table is shared read-only configuration. [`AiAggregator::reconfigure`]
//! swaps the whole table; in-flight aggregations keep the snapshot they started with.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::models::config::{FixedWeights, ModelWeights};
use crate::models::errors::{AppError, AppResult};
use crate::models::types::{
    AggregatedResult, ContractMetadata, ModelOutput, RiskLevel, ThresholdRule,
};
use crate::utils::constants::{
    EMBEDDING_DIM, SLOT_BEHAVIOR, SLOT_BYTECODE, SLOT_SOURCE, SOURCE_LENGTH_NORMALIZER,
};

/// Which aggregation algorithm to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    WeightedByConfidence,
    FixedThreeModel,
}

impl AggregationStrategy {
    pub fn threshold_rule(&self) -> ThresholdRule {
        match self {
            Self::WeightedByConfidence => ThresholdRule::Inclusive,
            Self::FixedThreeModel => ThresholdRule::Exclusive,
        }
    }
}

pub struct AiAggregator {
    weights: RwLock<Arc<ModelWeights>>,
    fixed: FixedWeights,
}

impl Default for AiAggregator {
    fn default() -> Self {
        Self::new(ModelWeights::default())
    }
}

impl AiAggregator {
    pub fn new(weights: ModelWeights) -> Self {
        Self {
            weights: RwLock::new(Arc::new(weights)),
            fixed: FixedWeights::default(),
        }
    }

    pub fn with_fixed_weights(mut self, fixed: FixedWeights) -> Self {
        self.fixed = fixed;
        self
    }

    /// Current weight table snapshot
    pub fn weights(&self) -> Arc<ModelWeights> {
        match self.weights.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the weight table. `ModelWeights` is validated on construction.
    pub fn reconfigure(&self, weights: ModelWeights) {
        let mut guard = match self.weights.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(weights);
        info!("⚖️ Aggregator weights reconfigured");
    }

    /// Run `strategy` over `outputs`
    pub fn aggregate(
        &self,
        strategy: AggregationStrategy,
        outputs: &[ModelOutput],
    ) -> AppResult<AggregatedResult> {
        match strategy {
            AggregationStrategy::WeightedByConfidence => self.aggregate_weighted(outputs),
            AggregationStrategy::FixedThreeModel => self.aggregate_fixed(outputs),
        }
    }

    // ============================================
    // Confidence-weighted
    // ============================================

    fn aggregate_weighted(&self, outputs: &[ModelOutput]) -> AppResult<AggregatedResult> {
        if outputs.is_empty() {
            return Ok(AggregatedResult::no_analysis());
        }
        check_outputs(outputs)?;

        let weights = self.weights();
        let mut raw_contributions = BTreeMap::new();
        let mut contribution_sum = 0.0;
        let mut total_weight = 0.0;
        let mut confidence_sum = 0.0;

        for output in outputs {
            let weight = weights.weight_for(&output.model_name);
            let contribution = output.risk_score * weight * output.confidence;
            raw_contributions.insert(output.model_name.clone(), contribution);
            contribution_sum += contribution;
            total_weight += weight;
            confidence_sum += output.confidence;
        }

        let final_risk_score = if total_weight > 0.0 {
            (contribution_sum / total_weight).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let confidence = (confidence_sum / outputs.len() as f64).clamp(0.0, 1.0);
        let final_risk_level = RiskLevel::classify(final_risk_score, ThresholdRule::Inclusive);

        let detected_issues = dedup_keep_first(outputs.iter().flat_map(|o| &o.detected_issues));
        let recommendations = dedup_keep_first(outputs.iter().flat_map(|o| &o.recommendations));

        let model_contributions = normalize(raw_contributions, contribution_sum);
        let explanation =
            weighted_explanation(final_risk_level, final_risk_score, outputs.len(), &detected_issues);

        debug!(
            score = final_risk_score,
            level = %final_risk_level,
            models = outputs.len(),
            "weighted aggregation complete"
        );

        Ok(AggregatedResult {
            final_risk_level,
            final_risk_score,
            confidence,
            explanation,
            detected_issues,
            recommendations,
            model_contributions,
        })
    }

    // ============================================
    // Fixed three-model
    // ============================================

    fn aggregate_fixed(&self, outputs: &[ModelOutput]) -> AppResult<AggregatedResult> {
        check_outputs(outputs)?;
        if let Some(extra) = outputs
            .iter()
            .find(|o| ![SLOT_SOURCE, SLOT_BYTECODE, SLOT_BEHAVIOR].contains(&o.model_name.as_str()))
        {
            return Err(AppError::aggregation_failed(format!(
                "Unexpected engine slot '{}'",
                extra.model_name
            )));
        }

        let source = find_slot(outputs, SLOT_SOURCE)?;
        let bytecode = find_slot(outputs, SLOT_BYTECODE)?;
        let behavior = find_slot(outputs, SLOT_BEHAVIOR)?;

        let w = self.fixed;
        let total_weight = w.source + w.bytecode + w.behavior;
        if total_weight <= 0.0 {
            return Err(AppError::aggregation_failed("Engine weights sum to zero"));
        }

        let weighted = |f: fn(&ModelOutput) -> f64| {
            (f(source) * w.source + f(bytecode) * w.bytecode + f(behavior) * w.behavior)
                / total_weight
        };
        let final_risk_score = weighted(|o: &ModelOutput| o.risk_score).clamp(0.0, 1.0);
        let confidence = weighted(|o: &ModelOutput| o.confidence).clamp(0.0, 1.0);
        let final_risk_level = RiskLevel::classify(final_risk_score, ThresholdRule::Exclusive);

        let ordered = [source, bytecode, behavior];
        let detected_issues = ordered
            .iter()
            .flat_map(|o| o.detected_issues.iter().cloned())
            .collect();
        let recommendations = ordered
            .iter()
            .flat_map(|o| o.recommendations.iter().cloned())
            .collect();

        let mut raw = BTreeMap::new();
        raw.insert(SLOT_SOURCE.to_string(), source.risk_score * w.source);
        raw.insert(SLOT_BYTECODE.to_string(), bytecode.risk_score * w.bytecode);
        raw.insert(SLOT_BEHAVIOR.to_string(), behavior.risk_score * w.behavior);
        let raw_sum: f64 = raw.values().sum();

        let explanation = format!(
            "Aggregated analysis: {} risk. Source: {}. Bytecode: {}. Behavior: {}",
            final_risk_level, source.explanation, bytecode.explanation, behavior.explanation
        );

        Ok(AggregatedResult {
            final_risk_level,
            final_risk_score,
            confidence,
            explanation,
            detected_issues,
            recommendations,
            model_contributions: normalize(raw, raw_sum),
        })
    }

    // ============================================
    // Embedding
    // ============================================

    /// Fixed-length feature vector for similarity search.
    ///
    /// Layout: `(risk_score, confidence)` per output in the given order, then
    /// normalized source length, verified, proxy, library usage, has comments.
    /// Zero-padded or truncated to [`EMBEDDING_DIM`].
    pub fn embedding_vector(outputs: &[ModelOutput], metadata: &ContractMetadata) -> Vec<f32> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let mut features: Vec<f32> = Vec::with_capacity(EMBEDDING_DIM);

        for output in outputs {
            features.push(output.risk_score as f32);
            features.push(output.confidence as f32);
        }

        let source_len =
            (metadata.source_code_length as f64 / SOURCE_LENGTH_NORMALIZER).min(1.0);
        features.push(source_len as f32);
        features.push(flag(metadata.verified));
        features.push(flag(metadata.is_proxy));
        features.push(flag(metadata.library_usage));
        features.push(flag(metadata.has_comments));

        features.resize(EMBEDDING_DIM, 0.0);
        features
    }
}

/// Reject duplicate model names and invalid outputs
fn check_outputs(outputs: &[ModelOutput]) -> AppResult<()> {
    let mut seen = HashSet::new();
    for output in outputs {
        if !seen.insert(output.model_name.as_str()) {
            return Err(AppError::aggregation_failed(format!(
                "Duplicate model name '{}'",
                output.model_name
            )));
        }
        output.validate()?;
    }
    Ok(())
}

fn find_slot<'a>(outputs: &'a [ModelOutput], name: &str) -> AppResult<&'a ModelOutput> {
    outputs
        .iter()
        .find(|o| o.model_name == name)
        .ok_or_else(|| AppError::aggregation_failed(format!("Missing engine slot '{}'", name)))
}

fn dedup_keep_first<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

fn normalize(raw: BTreeMap<String, f64>, sum: f64) -> BTreeMap<String, f64> {
    raw.into_iter()
        .map(|(name, value)| {
            let share = if sum > 0.0 { value / sum } else { 0.0 };
            (name, share)
        })
        .collect()
}

fn weighted_explanation(
    level: RiskLevel,
    score: f64,
    model_count: usize,
    issues: &[String],
) -> String {
    let mut text = format!("Contract assessed as {} (score: {:.2}/1.0). ", level, score);

    match level {
        RiskLevel::Safe => {
            text.push_str(
                "The contract appears to be well-written and follows security best practices. ",
            );
            if issues.is_empty() {
                text.push_str("No significant security issues detected.");
            } else {
                text.push_str("Minor issues were identified but don't pose significant risks.");
            }
        }
        RiskLevel::Warning => {
            text.push_str(
                "The contract has some concerning patterns that require careful review. ",
            );
            if !issues.is_empty() {
                text.push_str(&format!("Key issues: {}. ", join_first(issues, 3)));
            }
            text.push_str("Thorough auditing is recommended before interaction.");
        }
        RiskLevel::Dangerous => {
            text.push_str(
                "The contract exhibits multiple high-risk patterns and should be avoided. ",
            );
            if !issues.is_empty() {
                text.push_str(&format!("Critical issues: {}. ", join_first(issues, 5)));
            }
            text.push_str("Immediate security review and avoidance strongly recommended.");
        }
    }

    if model_count > 1 {
        text.push_str(&format!(" Consensus reached across {} AI models.", model_count));
    }
    text
}

fn join_first(items: &[String], n: usize) -> String {
    items.iter().take(n).cloned().collect::<Vec<_>>().join(", ")
}
