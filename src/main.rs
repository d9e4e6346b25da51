//! Shift planner CLI.
//!
//! Loads a schedule from a JSON file, submits it to the job manager and
//! waits for the solve to finish.
//!
//! Run with: cargo run -- schedule.json
//!
//! Exit codes: 0 on clean shutdown, 2 on misconfiguration, 70 on
//! internal error.

use std::time::Duration;

use shift_planner::config::AppConfig;
use shift_planner::domain::Schedule;
use shift_planner::error::PlanningError;
use shift_planner::jobs::{JobManager, JobManagerConfig, JobStatus};
use shift_planner::solver::LogLevel;

const EXIT_MISCONFIGURED: i32 = 2;
const EXIT_INTERNAL: i32 = 70;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return EXIT_MISCONFIGURED;
        }
    };

    init_tracing(config.log_level);

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: shift-planner <schedule.json>");
        return EXIT_MISCONFIGURED;
    };

    let schedule = match load_schedule(&path) {
        Ok(schedule) => schedule,
        Err(err) => {
            eprintln!("cannot load schedule from {path}: {err}");
            return EXIT_MISCONFIGURED;
        }
    };

    let store = match config.storage.build() {
        Ok(store) => store,
        Err(err) => {
            eprintln!("cannot open job store: {err}");
            return EXIT_MISCONFIGURED;
        }
    };

    let manager_config = JobManagerConfig {
        workers: 1,
        solver: config.solver_config(),
    };
    let manager = match JobManager::new(store, manager_config) {
        Ok(manager) => manager,
        Err(err) => {
            eprintln!("cannot start job manager: {err}");
            return EXIT_INTERNAL;
        }
    };

    let job_id = match manager.submit(schedule).await {
        Ok(job_id) => job_id,
        Err(err @ PlanningError::InvalidInput { .. }) => {
            eprintln!("invalid schedule: {err}");
            return EXIT_MISCONFIGURED;
        }
        Err(err) => {
            eprintln!("submission failed: {err}");
            return EXIT_INTERNAL;
        }
    };
    println!("job {job_id} submitted");

    loop {
        let job = match manager.get(job_id) {
            Ok(job) => job,
            Err(err) => {
                eprintln!("job lookup failed: {err}");
                return EXIT_INTERNAL;
            }
        };
        if job.status.is_terminal() {
            return report(&job);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn report(job: &shift_planner::jobs::Job) -> i32 {
    match job.status {
        JobStatus::Completed => {
            if let Some(output) = &job.output_schedule {
                let score = output
                    .score
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unscored".to_string());
                println!(
                    "job {} completed: score {}, {}/{} shifts assigned",
                    job.id,
                    score,
                    output.assigned_shift_count(),
                    output.shift_count()
                );
            } else {
                println!("job {} completed without a solution", job.id);
            }
            0
        }
        _ => {
            if let Some(error) = &job.error {
                eprintln!("job {} failed: {} ({})", job.id, error.message, error.code);
            } else {
                eprintln!("job {} failed", job.id);
            }
            EXIT_INTERNAL
        }
    }
}

fn load_schedule(path: &str) -> Result<Schedule, String> {
    let payload = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&payload).map_err(|e| e.to_string())
}

fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let default_filter = match level {
        LogLevel::Info => "shift_planner=info",
        LogLevel::Debug => "shift_planner=debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
