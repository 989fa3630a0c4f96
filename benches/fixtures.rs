use cyberloss_sim::distributions::{FrequencyDistribution, SeverityDistribution};
use cyberloss_sim::engine::{ConvergenceCheckConfig, EventParams, JobSpec, ReinsuranceConfig};
use cyberloss_sim::financial::{PolicyTerms, ReinsuranceKind, ReinsuranceLayer};
use cyberloss_sim::types::PolicyId;

#[derive(Clone, Copy)]
pub struct Scenario {
    pub iterations: usize,
    pub batch_size: usize,
    pub max_events_per_iteration: usize,
}

pub const SMALL: Scenario = Scenario { iterations: 10_000, batch_size: 1000, max_events_per_iteration: 50 };
pub const MEDIUM: Scenario = Scenario { iterations: 100_000, batch_size: 1000, max_events_per_iteration: 100 };
pub const LARGE: Scenario = Scenario { iterations: 1_000_000, batch_size: 2000, max_events_per_iteration: 100 };

pub fn ground_up_spec(scenario: &Scenario, seed: u64, parallel: bool) -> JobSpec {
    JobSpec {
        name: "bench-ground-up".to_string(),
        iterations: scenario.iterations,
        seed: Some(seed),
        event_params: EventParams {
            frequency: FrequencyDistribution::Poisson { lambda: 3.0 },
            severity: SeverityDistribution::Lognormal { mu: 10.5, sigma: 1.7 },
        },
        portfolio: None,
        apply_deductibles: false,
        apply_limits: false,
        apply_reinsurance: false,
        reinsurance_config: ReinsuranceConfig::default(),
        max_events_per_iteration: scenario.max_events_per_iteration,
        convergence_check: ConvergenceCheckConfig::default(),
        batch_size: scenario.batch_size,
        parallel_processing: parallel,
        max_workers: None,
        save_raw_losses: false,
        calculate_percentiles: true,
        percentile_levels: vec![0.5, 0.9, 0.95, 0.99],
    }
}

fn single_policy() -> PolicyTerms {
    PolicyTerms {
        policy_id: PolicyId(1),
        coverage_limit: 5_000_000.0,
        deductible: 25_000.0,
        sub_limits: Default::default(),
        coinsurance: 0.1,
        waiting_period: 0,
        policy_aggregate: None,
    }
}

/// Single-policy, quota-share-only spec — eligible for the vectorized
/// financial fast path.
pub fn vectorized_eligible_spec(scenario: &Scenario, seed: u64) -> JobSpec {
    let mut spec = ground_up_spec(scenario, seed, true);
    spec.portfolio = Some(vec![single_policy()]);
    spec.apply_deductibles = true;
    spec.apply_limits = true;
    spec.apply_reinsurance = true;
    spec.reinsurance_config.portfolio_level = vec![ReinsuranceLayer {
        kind: ReinsuranceKind::QuotaShare,
        attachment_point: 0.0,
        limit: None,
        cession_rate: 0.3,
        priority: 1,
    }];
    spec
}

/// Same portfolio, but with an excess-of-loss layer — forces the scalar
/// per-event cascade path for comparison.
pub fn scalar_only_spec(scenario: &Scenario, seed: u64) -> JobSpec {
    let mut spec = vectorized_eligible_spec(scenario, seed);
    spec.reinsurance_config.portfolio_level.push(ReinsuranceLayer {
        kind: ReinsuranceKind::ExcessOfLoss,
        attachment_point: 1_000_000.0,
        limit: Some(2_000_000.0),
        cession_rate: 0.0,
        priority: 2,
    });
    spec
}
