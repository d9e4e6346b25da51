//! Solver engine: construction heuristic followed by late-acceptance
//! local search, under a wall-clock budget with cooperative cancellation.
//!
//! The solver owns its working schedule exclusively and never blocks on
//! I/O; it yields only to check the cancel token and emit log records.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::constraints::{evaluate, EvaluatorConfig};
use crate::domain::Schedule;
use crate::error::{ErrorRecord, PlanningError, PlanningResult};
use crate::score::HardMediumSoftScore;

/// Late acceptance history size.
const LATE_ACCEPTANCE_SIZE: usize = 400;

/// Solver log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn is_debug(self) -> bool {
        self == LogLevel::Debug
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            _ => Err(()),
        }
    }
}

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Wall-clock budget for one solve.
    pub time_budget: Duration,
    pub log_level: LogLevel,
    /// Seed for the move generator. When omitted, a deterministic default
    /// is derived from the schedule contents.
    pub seed: Option<u64>,
    pub evaluator: EvaluatorConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(120),
            log_level: LogLevel::Info,
            seed: None,
            evaluator: EvaluatorConfig::default(),
        }
    }
}

/// Cooperative cancellation flag, checked by the solver at least every
/// 100 ms of wall clock.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What ended the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminatedBy {
    Budget,
    Cancel,
    Optimum,
}

/// A best-score observation at some elapsed wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSample {
    pub elapsed_ms: u64,
    pub score: HardMediumSoftScore,
}

/// Result of one solver run. The solver always returns an outcome; a
/// catastrophic fault surfaces as `terminated_by: Cancel` with `error`
/// attached rather than a panic escaping to the caller.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub schedule: Schedule,
    pub best_score: HardMediumSoftScore,
    pub improvements: Vec<ScoreSample>,
    pub terminated_by: TerminatedBy,
    pub error: Option<ErrorRecord>,
}

/// Deterministic fallback seed derived from the schedule contents.
fn default_seed(schedule: &Schedule) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut employee_ids: Vec<&str> = schedule.employees.iter().map(|e| e.id.as_str()).collect();
    employee_ids.sort_unstable();
    employee_ids.hash(&mut hasher);
    let mut shift_ids: Vec<&str> = schedule.shifts.iter().map(|s| s.id.as_str()).collect();
    shift_ids.sort_unstable();
    shift_ids.hash(&mut hasher);
    hasher.finish()
}

/// Solves the schedule within the configured budget.
///
/// Pinned shifts keep their assignee (including a pinned `None`). The best
/// known solution is tracked independently of the walker position and is
/// what gets returned.
pub fn solve(schedule: Schedule, config: &SolverConfig, cancel: &CancelToken) -> SolveOutcome {
    let fallback = schedule.clone();
    match catch_unwind(AssertUnwindSafe(|| solve_inner(schedule, config, cancel))) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let error = PlanningError::internal(format!("solver fault: {message}"));
            let best_score = fallback.score.unwrap_or_default();
            SolveOutcome {
                schedule: fallback,
                best_score,
                improvements: Vec::new(),
                terminated_by: TerminatedBy::Cancel,
                error: Some(error.to_record(None)),
            }
        }
    }
}

fn solve_inner(mut schedule: Schedule, config: &SolverConfig, cancel: &CancelToken) -> SolveOutcome {
    let started = Instant::now();
    let seed = config.seed.unwrap_or_else(|| default_seed(&schedule));
    let mut rng = StdRng::seed_from_u64(seed);

    info!(
        shifts = schedule.shifts.len(),
        employees = schedule.employees.len(),
        budget_ms = config.time_budget.as_millis() as u64,
        seed,
        "solve started"
    );

    let mut current_score = evaluate(&schedule, &config.evaluator);
    let mut best_schedule = schedule.clone();
    let mut best_score = current_score;
    let mut improvements = Vec::new();

    // Phase A: construction.
    if config.log_level.is_debug() {
        debug!(score = %current_score, "construction phase started");
    }
    construct(&mut schedule, config, cancel, started);
    current_score = evaluate(&schedule, &config.evaluator);
    if current_score > best_score {
        best_schedule = schedule.clone();
        best_score = current_score;
        let sample = ScoreSample {
            elapsed_ms: started.elapsed().as_millis() as u64,
            score: best_score,
        };
        improvements.push(sample);
        info!(score = %best_score, elapsed_ms = sample.elapsed_ms, "new best");
    }
    if config.log_level.is_debug() {
        debug!(score = %current_score, "construction phase ended");
    }

    // Phase B: late-acceptance local search.
    if config.log_level.is_debug() {
        debug!("local search phase started");
    }
    let movable: Vec<usize> = schedule
        .shifts
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.pinned)
        .map(|(i, _)| i)
        .collect();

    let mut terminated_by = TerminatedBy::Budget;
    let mut step: u64 = 0;
    let mut history = vec![current_score; LATE_ACCEPTANCE_SIZE];
    let mut last_heartbeat = started;
    let mut fault: Option<PlanningError> = None;

    loop {
        // Termination on the exact zero score only: a score with positive
        // soft credit is strictly better than zero and the search may
        // still find more of it, so it keeps running.
        if best_score == HardMediumSoftScore::ZERO {
            terminated_by = TerminatedBy::Optimum;
            break;
        }
        if cancel.is_cancelled() {
            terminated_by = TerminatedBy::Cancel;
            break;
        }
        if started.elapsed() >= config.time_budget {
            terminated_by = TerminatedBy::Budget;
            break;
        }
        if movable.is_empty() {
            // Everything is pinned; there is nothing left to search.
            break;
        }

        if config.log_level.is_debug() && last_heartbeat.elapsed() >= Duration::from_secs(1) {
            last_heartbeat = Instant::now();
            debug!(step, current = %current_score, best = %best_score, "heartbeat");
        }

        let undo = match propose_move(&mut schedule, &movable, &mut rng) {
            Ok(Some(undo)) => undo,
            Ok(None) => {
                step += 1;
                continue;
            }
            Err(err) => {
                fault = Some(err);
                terminated_by = TerminatedBy::Cancel;
                break;
            }
        };

        let candidate = evaluate(&schedule, &config.evaluator);
        let slot = (step as usize) % LATE_ACCEPTANCE_SIZE;
        if candidate >= history[slot] || candidate >= current_score {
            current_score = candidate;
            if current_score > best_score {
                best_schedule = schedule.clone();
                best_score = current_score;
                let sample = ScoreSample {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    score: best_score,
                };
                improvements.push(sample);
                info!(score = %best_score, elapsed_ms = sample.elapsed_ms, step, "new best");
            }
        } else {
            undo.apply(&mut schedule);
        }
        history[slot] = current_score;
        step += 1;
    }

    if config.log_level.is_debug() {
        debug!(step, "local search phase ended");
    }

    best_schedule.score = Some(best_score);
    info!(
        score = %best_score,
        steps = step,
        elapsed_ms = started.elapsed().as_millis() as u64,
        terminated_by = ?terminated_by,
        "solve ended"
    );

    SolveOutcome {
        schedule: best_schedule,
        best_score,
        improvements,
        terminated_by,
        error: fault.map(|e| e.to_record(None)),
    }
}

// ============================================================================
// Phase A: construction
// ============================================================================

/// Assigns every unpinned, unassigned shift greedily: highest priority
/// first (ties by earlier start, then id), choosing the employee that
/// passes the skill, availability and overlap filters with the least
/// incremental hard+medium penalty (ties by lowest running weekly
/// minutes, then id). Unassignable shifts stay unassigned.
fn construct(
    schedule: &mut Schedule,
    config: &SolverConfig,
    cancel: &CancelToken,
    started: Instant,
) {
    let mut order: Vec<usize> = schedule
        .shifts
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.pinned && s.assignee.is_none())
        .map(|(i, _)| i)
        .collect();
    order.sort_by(|&a, &b| {
        let sa = &schedule.shifts[a];
        let sb = &schedule.shifts[b];
        sa.priority
            .cmp(&sb.priority)
            .then(sa.start.cmp(&sb.start))
            .then(sa.id.cmp(&sb.id))
    });

    let mut employee_ids: Vec<String> = schedule.employees.iter().map(|e| e.id.clone()).collect();
    employee_ids.sort_unstable();

    for shift_idx in order {
        if cancel.is_cancelled() || started.elapsed() >= config.time_budget {
            return;
        }

        let mut best: Option<(HardMediumSoftScore, i64, String)> = None;
        for employee_id in &employee_ids {
            // Each candidate costs a full rescore, so the cancellation
            // bound is checked inside this loop too, not just per shift.
            if cancel.is_cancelled() || started.elapsed() >= config.time_budget {
                return;
            }
            if !passes_construction_filters(schedule, shift_idx, employee_id) {
                continue;
            }

            schedule.shifts[shift_idx].assignee = Some(employee_id.clone());
            let score = evaluate(schedule, &config.evaluator);
            schedule.shifts[shift_idx].assignee = None;

            let hard_medium = HardMediumSoftScore::of(score.hard, score.medium, 0);
            let week_minutes = weekly_minutes(schedule, employee_id, shift_idx);
            let better = match &best {
                None => true,
                Some((best_score, best_minutes, _)) => {
                    hard_medium > *best_score
                        || (hard_medium == *best_score && week_minutes < *best_minutes)
                }
            };
            if better {
                best = Some((hard_medium, week_minutes, employee_id.clone()));
            }
        }

        if let Some((_, _, employee_id)) = best {
            schedule.shifts[shift_idx].assignee = Some(employee_id);
        }
    }
}

/// Hard filters (a) and (b) of the construction heuristic: required
/// skills, availability, and no overlap against the employee's current
/// assignments.
fn passes_construction_filters(schedule: &Schedule, shift_idx: usize, employee_id: &str) -> bool {
    let shift = &schedule.shifts[shift_idx];
    let Ok(employee) = schedule.index_employee(employee_id) else {
        return false;
    };
    if !employee.has_all(&shift.required_skills) {
        return false;
    }
    if employee.is_unavailable_on(shift.civil_date()) {
        return false;
    }
    !schedule.shifts.iter().enumerate().any(|(i, other)| {
        i != shift_idx
            && other.assignee.as_deref() == Some(employee_id)
            && other.overlaps(shift)
    })
}

/// Minutes already assigned to `employee_id` in the ISO week of the given
/// shift.
fn weekly_minutes(schedule: &Schedule, employee_id: &str, shift_idx: usize) -> i64 {
    use chrono::Datelike;
    let week = schedule.shifts[shift_idx].start.date().iso_week();
    schedule
        .shifts
        .iter()
        .filter(|s| {
            s.assignee.as_deref() == Some(employee_id) && s.start.date().iso_week() == week
        })
        .map(|s| s.duration_minutes())
        .sum()
}

// ============================================================================
// Phase B: moves
// ============================================================================

/// Reverts one applied move.
enum Undo {
    Change {
        shift_idx: usize,
        previous: Option<String>,
    },
    Swap {
        a: usize,
        b: usize,
    },
}

impl Undo {
    fn apply(self, schedule: &mut Schedule) {
        match self {
            Undo::Change {
                shift_idx,
                previous,
            } => schedule.shifts[shift_idx].assignee = previous,
            Undo::Swap { a, b } => {
                let tmp = schedule.shifts[a].assignee.take();
                schedule.shifts[a].assignee = schedule.shifts[b].assignee.take();
                schedule.shifts[b].assignee = tmp;
            }
        }
    }
}

/// Applies one random change or swap move over unpinned shifts. Returns
/// `None` for a degenerate pick (no-op move). Altering a pinned shift is
/// an invariant breach checked at application time.
fn propose_move(
    schedule: &mut Schedule,
    movable: &[usize],
    rng: &mut StdRng,
) -> PlanningResult<Option<Undo>> {
    let employee_count = schedule.employees.len();
    if rng.gen_bool(0.5) && movable.len() >= 2 {
        // Swap move.
        let a = movable[rng.gen_range(0..movable.len())];
        let b = movable[rng.gen_range(0..movable.len())];
        if a == b || schedule.shifts[a].assignee == schedule.shifts[b].assignee {
            return Ok(None);
        }
        guard_unpinned(schedule, a)?;
        guard_unpinned(schedule, b)?;
        let tmp = schedule.shifts[a].assignee.take();
        schedule.shifts[a].assignee = schedule.shifts[b].assignee.take();
        schedule.shifts[b].assignee = tmp;
        Ok(Some(Undo::Swap { a, b }))
    } else {
        // Change move: any employee, or unassign.
        let shift_idx = movable[rng.gen_range(0..movable.len())];
        let pick = rng.gen_range(0..=employee_count);
        let value = if pick == employee_count {
            None
        } else {
            Some(schedule.employees[pick].id.clone())
        };
        if schedule.shifts[shift_idx].assignee == value {
            return Ok(None);
        }
        guard_unpinned(schedule, shift_idx)?;
        let previous = schedule.shifts[shift_idx].assignee.take();
        schedule.shifts[shift_idx].assignee = value;
        Ok(Some(Undo::Change {
            shift_idx,
            previous,
        }))
    }
}

fn guard_unpinned(schedule: &Schedule, shift_idx: usize) -> PlanningResult<()> {
    if schedule.shifts[shift_idx].pinned {
        return Err(PlanningError::internal(format!(
            "move targeted pinned shift '{}'",
            schedule.shifts[shift_idx].id
        )));
    }
    Ok(())
}
