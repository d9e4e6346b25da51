//! Constraint catalog and score evaluator.
//!
//! The evaluator is a pure function of the schedule contents: two
//! semantically equal schedules receive identical scores regardless of
//! collection ordering (iteration is id-sorted internally). Scoring is
//! from-scratch on every call; there is no cached or delta state.

use chrono::Datelike;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::{Employee, Schedule, Shift};
use crate::score::HardMediumSoftScore;

/// Weekly hard ceiling: 45 hours.
const WEEKLY_MAX_MINUTES: i64 = 45 * 60;
/// Minimum rest between two shifts: 8 hours.
const MIN_REST_MINUTES: i64 = 8 * 60;
/// Weekly floor for full-time employees: 32 hours.
const WEEKLY_MIN_FULL_TIME_MINUTES: i64 = 32 * 60;
/// Daily fair-distribution target: 8 hours.
const DAILY_TARGET_MINUTES: i64 = 8 * 60;
/// Soft weight multiplier per priority unit for an unassigned shift.
const UNASSIGNED_WEIGHT: i64 = 10;

/// Per-deployment weekly target mapping used by the weekly-target
/// constraint. Targets are minutes per ISO week. Employees with neither
/// employment tag have no target unless `default_target_minutes` is set.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub full_time_target_minutes: i64,
    pub part_time_target_minutes: i64,
    pub default_target_minutes: Option<i64>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            full_time_target_minutes: 40 * 60,
            part_time_target_minutes: 20 * 60,
            default_target_minutes: None,
        }
    }
}

/// Score level of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreLevel {
    Hard,
    Medium,
    Soft,
}

/// Identity and level of a catalog constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintRef {
    pub id: &'static str,
    pub level: ScoreLevel,
}

pub const REQUIRED_SKILL: ConstraintRef = ConstraintRef {
    id: "required_skill",
    level: ScoreLevel::Hard,
};
pub const NO_OVERLAP: ConstraintRef = ConstraintRef {
    id: "no_overlap",
    level: ScoreLevel::Hard,
};
pub const WEEKLY_MAXIMUM: ConstraintRef = ConstraintRef {
    id: "weekly_maximum",
    level: ScoreLevel::Hard,
};
pub const UNAVAILABLE_DATE: ConstraintRef = ConstraintRef {
    id: "unavailable_date",
    level: ScoreLevel::Hard,
};
pub const MINIMUM_REST: ConstraintRef = ConstraintRef {
    id: "minimum_rest",
    level: ScoreLevel::Medium,
};
pub const WEEKLY_MINIMUM: ConstraintRef = ConstraintRef {
    id: "weekly_minimum",
    level: ScoreLevel::Medium,
};
pub const UNASSIGNED_SHIFT: ConstraintRef = ConstraintRef {
    id: "unassigned_shift",
    level: ScoreLevel::Soft,
};
pub const FAIR_DISTRIBUTION: ConstraintRef = ConstraintRef {
    id: "fair_distribution",
    level: ScoreLevel::Soft,
};
pub const WEEKLY_TARGET: ConstraintRef = ConstraintRef {
    id: "weekly_target",
    level: ScoreLevel::Soft,
};
pub const PREFERRED_DAY_OFF: ConstraintRef = ConstraintRef {
    id: "preferred_day_off",
    level: ScoreLevel::Soft,
};
pub const PREFERRED_WORK_DAY: ConstraintRef = ConstraintRef {
    id: "preferred_work_day",
    level: ScoreLevel::Soft,
};

/// The full catalog, hard first.
pub const CATALOG: &[ConstraintRef] = &[
    REQUIRED_SKILL,
    NO_OVERLAP,
    WEEKLY_MAXIMUM,
    UNAVAILABLE_DATE,
    MINIMUM_REST,
    WEEKLY_MINIMUM,
    UNASSIGNED_SHIFT,
    FAIR_DISTRIBUTION,
    WEEKLY_TARGET,
    PREFERRED_DAY_OFF,
    PREFERRED_WORK_DAY,
];

/// Receives one record per constraint match during a scan.
///
/// `justify` is only invoked by sinks that build human-readable analyses,
/// so the scoring hot path never allocates justification strings.
trait ConstraintSink {
    fn record(
        &mut self,
        constraint: ConstraintRef,
        delta: HardMediumSoftScore,
        shift_ids: &[&str],
        justify: &dyn Fn() -> String,
    );
}

/// Computes the score of a schedule.
pub fn evaluate(schedule: &Schedule, config: &EvaluatorConfig) -> HardMediumSoftScore {
    let mut sink = ScoreSink::default();
    scan(schedule, config, &mut sink);
    sink.score
}

/// Per-constraint breakdown with match justifications.
pub fn analyze(schedule: &Schedule, config: &EvaluatorConfig) -> ScoreAnalysis {
    let mut sink = AnalysisSink::new();
    scan(schedule, config, &mut sink);
    sink.finish()
}

/// Hard+medium contribution attributed to each shift, for the incremental
/// planner's "clean shift" test. Pair violations attribute to both members;
/// weekly violations attribute to every shift of that employee-week. Shifts
/// with no contribution are absent from the map.
pub fn shift_breakdown(
    schedule: &Schedule,
    config: &EvaluatorConfig,
) -> HashMap<String, HardMediumSoftScore> {
    let mut sink = BreakdownSink::default();
    scan(schedule, config, &mut sink);
    sink.by_shift
}

/// True iff the shift contributes zero hard and zero medium penalty.
/// Soft penalties never make a shift dirty.
pub fn is_clean_shift(breakdown: &HashMap<String, HardMediumSoftScore>, shift_id: &str) -> bool {
    breakdown
        .get(shift_id)
        .map(|delta| delta.hard == 0 && delta.medium == 0)
        .unwrap_or(true)
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Default)]
struct ScoreSink {
    score: HardMediumSoftScore,
}

impl ConstraintSink for ScoreSink {
    fn record(
        &mut self,
        _constraint: ConstraintRef,
        delta: HardMediumSoftScore,
        _shift_ids: &[&str],
        _justify: &dyn Fn() -> String,
    ) {
        self.score += delta;
    }
}

#[derive(Default)]
struct BreakdownSink {
    by_shift: HashMap<String, HardMediumSoftScore>,
}

impl ConstraintSink for BreakdownSink {
    fn record(
        &mut self,
        _constraint: ConstraintRef,
        delta: HardMediumSoftScore,
        shift_ids: &[&str],
        _justify: &dyn Fn() -> String,
    ) {
        for id in shift_ids {
            *self.by_shift.entry((*id).to_string()).or_default() += delta;
        }
    }
}

/// One matched violation or reward within a constraint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintMatch {
    pub score: HardMediumSoftScore,
    pub justification: String,
    pub shift_ids: Vec<String>,
}

/// Total and matches for one catalog constraint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintAnalysis {
    pub id: &'static str,
    pub level: ScoreLevel,
    pub score: HardMediumSoftScore,
    pub matches: Vec<ConstraintMatch>,
}

/// Full score breakdown for a schedule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreAnalysis {
    pub score: HardMediumSoftScore,
    pub constraints: Vec<ConstraintAnalysis>,
}

struct AnalysisSink {
    by_constraint: BTreeMap<&'static str, Vec<ConstraintMatch>>,
    score: HardMediumSoftScore,
}

impl AnalysisSink {
    fn new() -> Self {
        Self {
            by_constraint: BTreeMap::new(),
            score: HardMediumSoftScore::ZERO,
        }
    }

    fn finish(mut self) -> ScoreAnalysis {
        let constraints = CATALOG
            .iter()
            .map(|c| {
                let matches = self.by_constraint.remove(c.id).unwrap_or_default();
                let score = matches
                    .iter()
                    .fold(HardMediumSoftScore::ZERO, |acc, m| acc + m.score);
                ConstraintAnalysis {
                    id: c.id,
                    level: c.level,
                    score,
                    matches,
                }
            })
            .collect();
        ScoreAnalysis {
            score: self.score,
            constraints,
        }
    }
}

impl ConstraintSink for AnalysisSink {
    fn record(
        &mut self,
        constraint: ConstraintRef,
        delta: HardMediumSoftScore,
        shift_ids: &[&str],
        justify: &dyn Fn() -> String,
    ) {
        self.score += delta;
        self.by_constraint
            .entry(constraint.id)
            .or_default()
            .push(ConstraintMatch {
                score: delta,
                justification: justify(),
                shift_ids: shift_ids.iter().map(|s| s.to_string()).collect(),
            });
    }
}

// ============================================================================
// Scan
// ============================================================================

fn is_full_time(employee: &Employee) -> bool {
    employee.skills.contains("Full-time") || employee.skills.contains("Regular")
}

fn is_part_time(employee: &Employee) -> bool {
    employee.skills.contains("Part-time")
}

fn target_minutes(employee: &Employee, config: &EvaluatorConfig) -> Option<i64> {
    if is_part_time(employee) {
        Some(config.part_time_target_minutes)
    } else if is_full_time(employee) {
        Some(config.full_time_target_minutes)
    } else {
        config.default_target_minutes
    }
}

/// ISO week key: `(iso year, iso week number)`.
fn week_key(shift: &Shift) -> (i32, u32) {
    let iso = shift.start.date().iso_week();
    (iso.year(), iso.week())
}

fn div_ceil(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}

fn div_round(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator / 2) / denominator
}

/// Walks every constraint over the schedule in deterministic id-sorted
/// order, feeding matches to the sink.
fn scan<S: ConstraintSink>(schedule: &Schedule, config: &EvaluatorConfig, sink: &mut S) {
    let mut employees: Vec<&Employee> = schedule.employees.iter().collect();
    employees.sort_by_key(|e| e.id.as_str());
    let employee_by_id: HashMap<&str, &Employee> =
        employees.iter().map(|e| (e.id.as_str(), *e)).collect();

    let mut shifts: Vec<&Shift> = schedule.shifts.iter().collect();
    shifts.sort_by_key(|s| s.id.as_str());

    // Assigned shifts per employee, ordered by (start, end, id) so pair
    // constraints see a stable earlier/later orientation.
    let mut assigned: BTreeMap<&str, Vec<&Shift>> = BTreeMap::new();
    for shift in &shifts {
        if let Some(assignee) = &shift.assignee {
            assigned.entry(assignee.as_str()).or_default().push(shift);
        }
    }
    for shifts_of in assigned.values_mut() {
        shifts_of.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(a.end.cmp(&b.end))
                .then(a.id.cmp(&b.id))
        });
    }

    // ------------------------------------------------------------------
    // H1: required skill — one hard unit per missing skill per shift
    // ------------------------------------------------------------------
    for shift in &shifts {
        let Some(assignee) = &shift.assignee else {
            continue;
        };
        let Some(employee) = employee_by_id.get(assignee.as_str()) else {
            continue;
        };
        let mut missing: Vec<&str> = shift
            .required_skills
            .iter()
            .filter(|skill| !employee.skills.contains(*skill))
            .map(|s| s.as_str())
            .collect();
        if missing.is_empty() {
            continue;
        }
        missing.sort_unstable();
        let mut delta = HardMediumSoftScore::ZERO;
        delta.penalize(HardMediumSoftScore::ONE_HARD, missing.len() as i64);
        sink.record(REQUIRED_SKILL, delta, &[shift.id.as_str()], &|| {
            format!(
                "{} lacks {} required by shift {}",
                employee.name,
                missing.join(", "),
                shift.id
            )
        });
    }

    // ------------------------------------------------------------------
    // H2: no overlap — one hard unit per overlapping assigned pair
    // ------------------------------------------------------------------
    for (employee_id, shifts_of) in &assigned {
        for (i, a) in shifts_of.iter().enumerate() {
            for b in &shifts_of[i + 1..] {
                if !a.overlaps(b) {
                    continue;
                }
                sink.record(
                    NO_OVERLAP,
                    HardMediumSoftScore::ONE_HARD,
                    &[a.id.as_str(), b.id.as_str()],
                    &|| format!("shifts {} and {} overlap for {}", a.id, b.id, employee_id),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // H3: weekly maximum — hard units = excess over 45h, per started hour
    // ------------------------------------------------------------------
    for (employee_id, shifts_of) in &assigned {
        let mut weekly: BTreeMap<(i32, u32), (i64, Vec<&str>)> = BTreeMap::new();
        for shift in shifts_of {
            let entry = weekly.entry(week_key(shift)).or_default();
            entry.0 += shift.duration_minutes();
            entry.1.push(shift.id.as_str());
        }
        for ((year, week), (minutes, ids)) in &weekly {
            if *minutes <= WEEKLY_MAX_MINUTES {
                continue;
            }
            let units = div_ceil(minutes - WEEKLY_MAX_MINUTES, 60);
            let mut delta = HardMediumSoftScore::ZERO;
            delta.penalize(HardMediumSoftScore::ONE_HARD, units);
            sink.record(WEEKLY_MAXIMUM, delta, ids, &|| {
                format!(
                    "{} works {} minutes in week {}-W{:02}, above the 2700 ceiling",
                    employee_id, minutes, year, week
                )
            });
        }
    }

    // ------------------------------------------------------------------
    // H4: unavailable date — one hard unit per shift on a blocked date
    // ------------------------------------------------------------------
    for shift in &shifts {
        let Some(assignee) = &shift.assignee else {
            continue;
        };
        let Some(employee) = employee_by_id.get(assignee.as_str()) else {
            continue;
        };
        if employee.is_unavailable_on(shift.civil_date()) {
            sink.record(
                UNAVAILABLE_DATE,
                HardMediumSoftScore::ONE_HARD,
                &[shift.id.as_str()],
                &|| {
                    format!(
                        "{} is unavailable on {} (shift {})",
                        employee.name,
                        shift.civil_date(),
                        shift.id
                    )
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // M1: minimum rest — gap under 8h between two shifts, per started hour
    // ------------------------------------------------------------------
    // Overlapping pairs are the no-overlap constraint's concern and are
    // not double-counted here.
    for (employee_id, shifts_of) in &assigned {
        for (i, earlier) in shifts_of.iter().enumerate() {
            for later in &shifts_of[i + 1..] {
                if later.start < earlier.end {
                    continue;
                }
                let gap = (later.start - earlier.end).num_minutes();
                if gap >= MIN_REST_MINUTES {
                    continue;
                }
                let units = div_ceil(MIN_REST_MINUTES - gap, 60).max(1);
                let mut delta = HardMediumSoftScore::ZERO;
                delta.penalize(HardMediumSoftScore::ONE_MEDIUM, units);
                sink.record(
                    MINIMUM_REST,
                    delta,
                    &[earlier.id.as_str(), later.id.as_str()],
                    &|| {
                        format!(
                            "{} has only {} minutes of rest between {} and {}",
                            employee_id, gap, earlier.id, later.id
                        )
                    },
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // M2: weekly minimum for full-time employees
    // ------------------------------------------------------------------
    for (employee_id, shifts_of) in &assigned {
        let Some(employee) = employee_by_id.get(employee_id) else {
            continue;
        };
        if !is_full_time(employee) {
            continue;
        }
        let mut weekly: BTreeMap<(i32, u32), (i64, Vec<&str>)> = BTreeMap::new();
        for shift in shifts_of {
            let entry = weekly.entry(week_key(shift)).or_default();
            entry.0 += shift.duration_minutes();
            entry.1.push(shift.id.as_str());
        }
        for ((year, week), (minutes, ids)) in &weekly {
            if *minutes >= WEEKLY_MIN_FULL_TIME_MINUTES {
                continue;
            }
            let units = div_ceil(WEEKLY_MIN_FULL_TIME_MINUTES - minutes, 60);
            let mut delta = HardMediumSoftScore::ZERO;
            delta.penalize(HardMediumSoftScore::ONE_MEDIUM, units);
            sink.record(WEEKLY_MINIMUM, delta, ids, &|| {
                format!(
                    "full-time {} works only {} minutes in week {}-W{:02}",
                    employee.name, minutes, year, week
                )
            });
        }
    }

    // ------------------------------------------------------------------
    // S1: unassigned shift — priority-weighted
    // ------------------------------------------------------------------
    for shift in &shifts {
        if shift.is_assigned() {
            continue;
        }
        let mut delta = HardMediumSoftScore::ZERO;
        delta.penalize(
            HardMediumSoftScore::ONE_SOFT,
            shift.priority as i64 * UNASSIGNED_WEIGHT,
        );
        sink.record(UNASSIGNED_SHIFT, delta, &[shift.id.as_str()], &|| {
            format!(
                "shift {} (priority {}) is unassigned",
                shift.id, shift.priority
            )
        });
    }

    // ------------------------------------------------------------------
    // S2: fair distribution — deviation from 8h per worked day
    // ------------------------------------------------------------------
    for (employee_id, shifts_of) in &assigned {
        let mut daily: BTreeMap<chrono::NaiveDate, (i64, Vec<&str>)> = BTreeMap::new();
        for shift in shifts_of {
            let entry = daily.entry(shift.civil_date()).or_default();
            entry.0 += shift.duration_minutes();
            entry.1.push(shift.id.as_str());
        }
        for (date, (minutes, ids)) in &daily {
            let units = div_round((minutes - DAILY_TARGET_MINUTES).abs(), 60);
            if units == 0 {
                continue;
            }
            let mut delta = HardMediumSoftScore::ZERO;
            delta.penalize(HardMediumSoftScore::ONE_SOFT, units);
            sink.record(FAIR_DISTRIBUTION, delta, ids, &|| {
                format!("{} works {} minutes on {}", employee_id, minutes, date)
            });
        }
    }

    // ------------------------------------------------------------------
    // S3: weekly target — deviation from the per-deployment mapping
    // ------------------------------------------------------------------
    for (employee_id, shifts_of) in &assigned {
        let Some(employee) = employee_by_id.get(employee_id) else {
            continue;
        };
        let Some(target) = target_minutes(employee, config) else {
            continue;
        };
        let mut weekly: BTreeMap<(i32, u32), (i64, Vec<&str>)> = BTreeMap::new();
        for shift in shifts_of {
            let entry = weekly.entry(week_key(shift)).or_default();
            entry.0 += shift.duration_minutes();
            entry.1.push(shift.id.as_str());
        }
        for ((year, week), (minutes, ids)) in &weekly {
            let units = div_round((minutes - target).abs(), 60);
            if units == 0 {
                continue;
            }
            let mut delta = HardMediumSoftScore::ZERO;
            delta.penalize(HardMediumSoftScore::ONE_SOFT, units);
            sink.record(WEEKLY_TARGET, delta, ids, &|| {
                format!(
                    "{} works {} minutes in week {}-W{:02}, target {}",
                    employee.name, minutes, year, week, target
                )
            });
        }
    }

    // ------------------------------------------------------------------
    // S4: preference days — symmetric one-soft credit or penalty
    // ------------------------------------------------------------------
    // The day universe is the set of distinct civil start-dates of shifts
    // in the schedule.
    let day_universe: BTreeSet<chrono::NaiveDate> =
        shifts.iter().map(|s| s.civil_date()).collect();
    for employee in &employees {
        let worked_days: BTreeSet<chrono::NaiveDate> = assigned
            .get(employee.id.as_str())
            .map(|shifts_of| shifts_of.iter().map(|s| s.civil_date()).collect())
            .unwrap_or_default();
        for date in &day_universe {
            let weekday = date.weekday();
            let works = worked_days.contains(date);
            if employee.preferred_days_off.contains(&weekday) {
                let mut delta = HardMediumSoftScore::ZERO;
                if works {
                    delta.penalize(HardMediumSoftScore::ONE_SOFT, 1);
                } else {
                    delta.reward(HardMediumSoftScore::ONE_SOFT, 1);
                }
                sink.record(PREFERRED_DAY_OFF, delta, &[], &|| {
                    format!(
                        "{} prefers {} off and {} on {}",
                        employee.name,
                        weekday,
                        if works { "works" } else { "rests" },
                        date
                    )
                });
            }
            if employee.preferred_work_days.contains(&weekday) {
                let mut delta = HardMediumSoftScore::ZERO;
                if works {
                    delta.reward(HardMediumSoftScore::ONE_SOFT, 1);
                } else {
                    delta.penalize(HardMediumSoftScore::ONE_SOFT, 1);
                }
                sink.record(PREFERRED_WORK_DAY, delta, &[], &|| {
                    format!(
                        "{} prefers working {} and {} on {}",
                        employee.name,
                        weekday,
                        if works { "works" } else { "rests" },
                        date
                    )
                });
            }
        }
    }
}
