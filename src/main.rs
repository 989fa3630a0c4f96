use std::sync::Arc;

use cyberloss_sim::config::ServiceConfig;
use cyberloss_sim::distributions::{FrequencyDistribution, SeverityDistribution};
use cyberloss_sim::engine::{EventParams, JobSpec, ReinsuranceConfig};
use cyberloss_sim::events::EventBus;
use cyberloss_sim::metrics::DEFAULT_PERCENTILE_LEVELS;
use cyberloss_sim::registry::JobRegistry;
use cyberloss_sim::types::UserId;

/// Default entry point: runs one illustrative job against the canonical
/// service configuration and prints its headline risk metrics. The
/// general-purpose harness lives in `src/bin/run_job.rs`.
fn main() {
    env_logger::init();

    let spec = JobSpec {
        name: "demo-portfolio".to_string(),
        iterations: 50_000,
        seed: Some(42),
        event_params: EventParams {
            frequency: FrequencyDistribution::Poisson { lambda: 3.0 },
            severity: SeverityDistribution::Lognormal { mu: 11.0, sigma: 1.8 },
        },
        portfolio: None,
        apply_deductibles: false,
        apply_limits: false,
        apply_reinsurance: false,
        reinsurance_config: ReinsuranceConfig::default(),
        max_events_per_iteration: 200,
        convergence_check: Default::default(),
        batch_size: 1000,
        parallel_processing: true,
        max_workers: None,
        save_raw_losses: false,
        calculate_percentiles: true,
        percentile_levels: DEFAULT_PERCENTILE_LEVELS.to_vec(),
    };

    let requester = UserId(0);
    let registry = Arc::new(JobRegistry::new(ServiceConfig::canonical(), Arc::new(EventBus::new())));
    let job_id = match registry.submit(requester, spec) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("failed to submit job: {e}");
            std::process::exit(1);
        }
    };

    loop {
        match registry.status(job_id, requester) {
            Ok(status) if matches!(
                status,
                cyberloss_sim::registry::JobStatus::Completed
                    | cyberloss_sim::registry::JobStatus::Failed
                    | cyberloss_sim::registry::JobStatus::Cancelled
            ) => break,
            Ok(_) => std::thread::sleep(std::time::Duration::from_millis(20)),
            Err(e) => {
                eprintln!("job lookup failed: {e}");
                std::process::exit(1);
            }
        }
    }

    match registry.results(job_id, requester) {
        Ok(Some(results)) => {
            println!("expected_loss: {:.2}", results.metrics.expected_loss);
            println!("var[0.990]: {:.2}", results.metrics.var.get("0.990").copied().unwrap_or(0.0));
            println!("tvar[0.990]: {:.2}", results.metrics.tvar.get("0.990").copied().unwrap_or(0.0));
            println!("iterations_completed: {}", results.iterations_completed);
        }
        Ok(None) => {
            if let Ok(Some(message)) = registry.error(job_id, requester) {
                eprintln!("job did not complete: {message}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("failed to fetch results: {e}");
            std::process::exit(1);
        }
    }
}
