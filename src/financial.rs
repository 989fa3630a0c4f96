//! C3 — financial transform (spec §4.3). Cascade order, per-layer recovery
//! formulas, and the vectorized fast-path restriction are ported exactly
//! from `original_source/backend/app/simulation/financial.py`
//! (`FinancialCalculator.calculate_net_loss`/`calculate_batch_losses`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{Day, PolicyId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTerms {
    pub policy_id: PolicyId,
    pub coverage_limit: f64,
    #[serde(default)]
    pub deductible: f64,
    #[serde(default)]
    pub sub_limits: BTreeMap<String, f64>,
    #[serde(default)]
    pub coinsurance: f64,
    #[serde(default)]
    pub waiting_period: u64,
    #[serde(default)]
    pub policy_aggregate: Option<f64>,
}

impl PolicyTerms {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.coverage_limit <= 0.0 {
            return Err(CoreError::financial("coverage_limit must be positive"));
        }
        if self.deductible < 0.0 {
            return Err(CoreError::financial("deductible must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.coinsurance) {
            return Err(CoreError::financial("coinsurance must be between 0 and 1"));
        }
        for (tag, bound) in &self.sub_limits {
            if *bound <= 0.0 {
                return Err(CoreError::financial(format!("sub_limit '{tag}' must be positive")));
            }
        }
        if let Some(agg) = self.policy_aggregate {
            if agg <= 0.0 {
                return Err(CoreError::financial("policy_aggregate must be positive"));
            }
        }
        Ok(())
    }

    fn min_sub_limit(&self) -> Option<f64> {
        self.sub_limits.values().copied().fold(None, |acc, v| {
            Some(acc.map_or(v, |a: f64| a.min(v)))
        })
    }

    /// True when this policy's shape is eligible for the vectorized fast
    /// path: no sub-limits, no policy aggregate (DESIGN.md open-question
    /// resolution #2).
    fn vectorizable(&self) -> bool {
        self.sub_limits.is_empty() && self.policy_aggregate.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinsuranceKind {
    QuotaShare,
    Surplus,
    ExcessOfLoss,
    StopLoss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinsuranceLayer {
    pub kind: ReinsuranceKind,
    #[serde(default)]
    pub attachment_point: f64,
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub cession_rate: f64,
    pub priority: u32,
}

impl ReinsuranceLayer {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.attachment_point < 0.0 {
            return Err(CoreError::financial("attachment_point must be non-negative"));
        }
        if let Some(limit) = self.limit {
            if limit <= 0.0 {
                return Err(CoreError::financial("layer limit must be positive"));
            }
        }
        if !(0.0..=1.0).contains(&self.cession_rate) {
            return Err(CoreError::financial("cession_rate must be between 0 and 1"));
        }
        if self.priority == 0 {
            return Err(CoreError::financial("priority must be >= 1"));
        }
        Ok(())
    }

    fn recovery(&self, loss: f64) -> f64 {
        if loss <= 0.0 {
            return 0.0;
        }
        let limit = self.limit.unwrap_or(f64::INFINITY);
        match self.kind {
            ReinsuranceKind::QuotaShare => loss * self.cession_rate,
            ReinsuranceKind::Surplus => loss.min(limit) * self.cession_rate,
            ReinsuranceKind::ExcessOfLoss => {
                if loss <= self.attachment_point {
                    0.0
                } else {
                    (loss - self.attachment_point).max(0.0).min(limit)
                }
            }
            ReinsuranceKind::StopLoss => {
                if loss <= self.attachment_point {
                    0.0
                } else {
                    ((loss - self.attachment_point) * self.cession_rate).min(limit)
                }
            }
        }
    }

    fn erodes(&self) -> bool {
        matches!(self.kind, ReinsuranceKind::ExcessOfLoss | ReinsuranceKind::StopLoss)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaximumLossEstimate {
    pub theoretical_maximum: f64,
    pub correlated_maximum: f64,
    /// `correlated_maximum * 0.8` — rule-of-thumb haircut for typical loss
    /// patterns falling short of a fully correlated worst case
    /// (`financial.py::estimate_maximum_loss`).
    pub practical_maximum: f64,
    pub net_maximum: f64,
}

/// Per-event breakdown, one policy, produced by the scalar cascade — exposed
/// mainly for tests that check intermediate cascade stages against the
/// literal scenarios in spec §8.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyLossBreakdown {
    pub gross: f64,
    pub after_deductible: f64,
    pub after_coinsurance: f64,
    pub covered: f64,
}

pub struct FinancialCalculator;

impl FinancialCalculator {
    /// Scalar, per-event cascade for a single policy over one iteration's
    /// event severities (spec §4.3 steps 1-6).
    pub fn policy_iteration_loss(policy: &PolicyTerms, severities: &[f64]) -> f64 {
        let n = severities.len();
        let mut running_total = 0.0;
        for (i, &s) in severities.iter().enumerate() {
            let day = Day::for_event_index(i, n);
            if day.0 < policy.waiting_period {
                continue;
            }
            let after_deductible = (s - policy.deductible).max(0.0);
            let after_coinsurance = after_deductible * (1.0 - policy.coinsurance);
            let mut covered = after_coinsurance.min(policy.coverage_limit);
            if let Some(min_sub) = policy.min_sub_limit() {
                covered = covered.min(min_sub);
            }
            running_total += covered;
            if let Some(agg) = policy.policy_aggregate {
                running_total = running_total.min(agg);
            }
        }
        running_total
    }

    /// Ground-up mode (spec §4.3): no portfolio, loss is the raw sum of
    /// event severities, already clipped at `max_events_per_iteration` by
    /// the caller.
    pub fn ground_up_iteration_loss(severities: &[f64]) -> f64 {
        severities.iter().sum()
    }

    /// Portfolio mode: sum the scalar per-policy loss across all policies
    /// (spec §4.3 step 7 and §9's resolved "every event hits every policy"
    /// simplification).
    pub fn portfolio_gross_loss(policies: &[PolicyTerms], severities: &[f64]) -> f64 {
        policies.iter().map(|p| Self::policy_iteration_loss(p, severities)).sum()
    }

    /// Apply reinsurance layers in ascending priority to an aggregate gross
    /// loss (spec §4.3). Returns `(net_loss, total_recovery)`.
    pub fn apply_reinsurance(gross_loss: f64, layers: &[ReinsuranceLayer]) -> (f64, f64) {
        if gross_loss <= 0.0 || layers.is_empty() {
            return (gross_loss.max(0.0), 0.0);
        }
        let mut sorted: Vec<&ReinsuranceLayer> = layers.iter().collect();
        sorted.sort_by_key(|l| l.priority);

        let mut remaining = gross_loss;
        let mut total_recovery = 0.0;
        for layer in sorted {
            let recovery = layer.recovery(remaining);
            total_recovery += recovery;
            if layer.erodes() {
                remaining -= recovery;
            }
        }
        total_recovery = total_recovery.min(gross_loss);
        let net = (gross_loss - total_recovery).clamp(0.0, gross_loss);
        (net, total_recovery)
    }

    /// Theoretical and correlation-adjusted maximum loss estimates
    /// (SPEC_FULL §10.5, carried from `financial.py::estimate_maximum_loss`).
    /// `theoretical_maximum` assumes every policy hits its full coverage
    /// limit in the same iteration; `correlated_maximum` applies a haircut
    /// for the fact that cyber losses across an insured portfolio are not
    /// perfectly correlated.
    pub fn estimate_maximum_loss(policies: &[PolicyTerms], correlation_factor: f64) -> MaximumLossEstimate {
        let theoretical_maximum: f64 = policies.iter().map(|p| p.coverage_limit).sum();
        let total_deductibles: f64 = policies.iter().map(|p| p.deductible).sum();
        let correlated_maximum = theoretical_maximum * correlation_factor.clamp(0.0, 1.0);
        let practical_maximum = correlated_maximum * 0.8;
        MaximumLossEstimate {
            theoretical_maximum,
            correlated_maximum,
            practical_maximum,
            net_maximum: practical_maximum - total_deductibles,
        }
    }

    /// Whether `(policies, layers)` qualifies for the vectorized fast path:
    /// exactly one policy, quota-share-only reinsurance, no sub-limits, no
    /// policy aggregate (spec §4.3; DESIGN.md resolution #2).
    pub fn can_vectorize(policies: &[PolicyTerms], layers: &[ReinsuranceLayer]) -> bool {
        policies.len() == 1
            && policies[0].vectorizable()
            && layers.iter().all(|l| l.kind == ReinsuranceKind::QuotaShare)
    }

    /// Vectorized fast path (spec §4.3): applies deductible, coinsurance,
    /// limit, and total quota-share cession across the whole event-severity
    /// vector without a per-event cascade loop. Must be called only when
    /// `can_vectorize` holds; produces results identical to the scalar path
    /// on such inputs.
    pub fn net_loss_vectorized(policy: &PolicyTerms, severities: &[f64], quota_share_layers: &[ReinsuranceLayer]) -> f64 {
        let n = severities.len();
        let covered_sum: f64 = severities
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let day = Day::for_event_index(i, n);
                if day.0 < policy.waiting_period {
                    return 0.0;
                }
                let after_deductible = (s - policy.deductible).max(0.0);
                let after_coinsurance = after_deductible * (1.0 - policy.coinsurance);
                after_coinsurance.min(policy.coverage_limit)
            })
            .sum();
        let total_cession: f64 = quota_share_layers.iter().map(|l| l.cession_rate).sum::<f64>().min(1.0);
        covered_sum * (1.0 - total_cession)
    }
}


/// Property 4 (spec §8): financial monotonicity under fixed severities.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn severities_strategy() -> impl Strategy<Value = Vec<f64>> {
        proptest::collection::vec(0.0f64..500_000.0, 1..12)
    }

    fn base_policy(limit: f64, deductible: f64, coinsurance: f64) -> PolicyTerms {
        PolicyTerms {
            policy_id: PolicyId(1),
            coverage_limit: limit,
            deductible,
            sub_limits: BTreeMap::new(),
            coinsurance,
            waiting_period: 0,
            policy_aggregate: None,
        }
    }

    proptest! {
        #[test]
        fn lower_deductible_never_decreases_net_loss(
            severities in severities_strategy(),
            lo in 0.0f64..100_000.0,
            delta in 0.0f64..100_000.0,
        ) {
            let hi = lo + delta;
            let p_lo = base_policy(5_000_000.0, lo, 0.0);
            let p_hi = base_policy(5_000_000.0, hi, 0.0);
            let loss_lo = FinancialCalculator::policy_iteration_loss(&p_lo, &severities);
            let loss_hi = FinancialCalculator::policy_iteration_loss(&p_hi, &severities);
            prop_assert!(loss_lo >= loss_hi - 1e-9);
        }

        #[test]
        fn higher_coverage_limit_never_decreases_net_loss(
            severities in severities_strategy(),
            lo in 10_000.0f64..1_000_000.0,
            delta in 0.0f64..4_000_000.0,
        ) {
            let hi = lo + delta;
            let p_lo = base_policy(lo, 0.0, 0.0);
            let p_hi = base_policy(hi, 0.0, 0.0);
            let loss_lo = FinancialCalculator::policy_iteration_loss(&p_lo, &severities);
            let loss_hi = FinancialCalculator::policy_iteration_loss(&p_hi, &severities);
            prop_assert!(loss_hi >= loss_lo - 1e-9);
        }

        #[test]
        fn higher_coinsurance_never_increases_net_loss(
            severities in severities_strategy(),
            c_lo in 0.0f64..0.5,
            c_delta in 0.0f64..0.5,
        ) {
            let c_hi = (c_lo + c_delta).min(1.0);
            let p_lo = base_policy(5_000_000.0, 0.0, c_lo);
            let p_hi = base_policy(5_000_000.0, 0.0, c_hi);
            let loss_lo = FinancialCalculator::policy_iteration_loss(&p_lo, &severities);
            let loss_hi = FinancialCalculator::policy_iteration_loss(&p_hi, &severities);
            prop_assert!(loss_hi <= loss_lo + 1e-9);
        }

        #[test]
        fn quota_share_strictly_cedes_positive_loss(
            gross in 1.0f64..10_000_000.0,
            cession_rate in 0.001f64..1.0,
        ) {
            let layers = [ReinsuranceLayer {
                kind: ReinsuranceKind::QuotaShare,
                attachment_point: 0.0,
                limit: None,
                cession_rate,
                priority: 1,
            }];
            let (net, _) = FinancialCalculator::apply_reinsurance(gross, &layers);
            prop_assert!(net < gross);
        }
    }
}
