//! CLI harness: reads a `JobSpec` as JSON from a file argument or stdin,
//! runs it to completion, prints progress to stderr and the final
//! `Results` as JSON to stdout. Style (manual `Result` handling,
//! `eprintln!` + `process::exit(1)`, no panics) follows
//! `samthorold-rins/src/bin/analyse.rs`.

use std::io::Read as _;
use std::sync::Arc;

use cyberloss_sim::config::ServiceConfig;
use cyberloss_sim::engine::JobSpec;
use cyberloss_sim::events::EventBus;
use cyberloss_sim::financial::FinancialCalculator;
use cyberloss_sim::registry::{JobRegistry, JobStatus};
use cyberloss_sim::types::UserId;

fn read_spec() -> Result<JobSpec, String> {
    let mut input = String::new();
    match std::env::args().nth(1) {
        Some(path) => {
            input = std::fs::read_to_string(&path).map_err(|e| format!("failed to read '{path}': {e}"))?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut input)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
        }
    }
    serde_json::from_str(&input).map_err(|e| format!("invalid job spec JSON: {e}"))
}

fn main() {
    env_logger::init();

    let spec = match read_spec() {
        Ok(spec) => spec,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    };
    let portfolio_for_summary = spec.portfolio.clone();
    let requester = UserId(0);

    let registry = Arc::new(JobRegistry::new(ServiceConfig::canonical(), Arc::new(EventBus::new())));
    let job_id = match registry.submit(requester, spec) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("error: failed to submit job: {e}");
            std::process::exit(1);
        }
    };

    let mut last_reported = 0.0_f64;
    loop {
        match registry.status(job_id, requester) {
            Ok(JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled) => break,
            Ok(_) => {
                if let Ok(elapsed) = registry.elapsed(job_id, requester) {
                    let fraction = elapsed.as_secs_f64();
                    if fraction - last_reported > 1.0 {
                        eprintln!("running... ({:.0}s elapsed)", fraction);
                        last_reported = fraction;
                    }
                }
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(e) => {
                eprintln!("error: job lookup failed: {e}");
                std::process::exit(1);
            }
        }
    }

    match registry.status(job_id, requester) {
        Ok(JobStatus::Completed) => match registry.results(job_id, requester) {
            Ok(Some(results)) => {
                if let Some(policies) = &portfolio_for_summary {
                    let estimate = FinancialCalculator::estimate_maximum_loss(policies, 1.0);
                    eprintln!(
                        "maximum loss estimate: theoretical={:.2} correlated={:.2} practical={:.2}",
                        estimate.theoretical_maximum, estimate.correlated_maximum, estimate.practical_maximum
                    );
                }
                match serde_json::to_writer_pretty(std::io::stdout(), &results) {
                    Ok(()) => println!(),
                    Err(e) => {
                        eprintln!("error: failed to serialize results: {e}");
                        std::process::exit(1);
                    }
                }
            }
            Ok(None) => {
                eprintln!("error: job marked completed but has no results");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        Ok(JobStatus::Failed) => {
            let message = registry.error(job_id, requester).ok().flatten().unwrap_or_else(|| "unknown error".to_string());
            eprintln!("error: job failed: {message}");
            std::process::exit(1);
        }
        Ok(JobStatus::Cancelled) => {
            eprintln!("error: job was cancelled");
            std::process::exit(1);
        }
        Ok(_) => unreachable!("loop only exits on a terminal status"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
