//! Incremental re-optimization: pinning strategies and point mutations.
//!
//! A workforce mutation never re-plans the whole schedule. Instead the
//! planner computes the set of shifts the mutation may legitimately
//! change, pins the complement, re-solves, and clears all pins afterward.
//! Soft penalties never force a shift out of its pin.

use std::collections::{BTreeSet, HashSet};
use tracing::info;

use crate::constraints::{self, evaluate, EvaluatorConfig};
use crate::domain::Schedule;
use crate::error::{PlanningError, PlanningResult};
use crate::score::HardMediumSoftScore;

/// The pin/unpin split computed for one mutation. `unpinned` is the
/// affected set: only these shifts may change assignee in the re-solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinPlan {
    pub pinned: BTreeSet<String>,
    pub unpinned: BTreeSet<String>,
}

impl PinPlan {
    fn split(schedule: &Schedule, unpin: impl Fn(&crate::domain::Shift) -> bool) -> Self {
        let mut pinned = BTreeSet::new();
        let mut unpinned = BTreeSet::new();
        for shift in &schedule.shifts {
            if unpin(shift) {
                unpinned.insert(shift.id.clone());
            } else {
                pinned.insert(shift.id.clone());
            }
        }
        Self { pinned, unpinned }
    }
}

/// Pin plan for an appended employee: keep every assignment that is
/// currently clean (zero hard + zero medium contribution), free every
/// violating assignment and every unassigned shift for the solver.
pub fn pin_for_added_employee(schedule: &Schedule, config: &EvaluatorConfig) -> PinPlan {
    let breakdown = constraints::shift_breakdown(schedule, config);
    PinPlan::split(schedule, |shift| {
        !shift.is_assigned() || !constraints::is_clean_shift(&breakdown, &shift.id)
    })
}

/// Pin plan for a skill-set replacement on `employee_id`.
///
/// The affected set is: shifts assigned to the employee whose requirement
/// coverage flips between the old and new skills, shifts assigned to
/// someone else in violation of the skill constraint that the updated
/// employee could now cover, and every unassigned shift.
pub fn pin_for_skill_update(
    schedule: &Schedule,
    employee_id: &str,
    old_skills: &HashSet<String>,
    new_skills: &HashSet<String>,
) -> PinPlan {
    let covers = |skills: &HashSet<String>, required: &HashSet<String>| {
        required.iter().all(|skill| skills.contains(skill))
    };

    PinPlan::split(schedule, |shift| {
        let Some(assignee) = shift.assignee.as_deref() else {
            return true;
        };
        if assignee == employee_id {
            return covers(old_skills, &shift.required_skills)
                != covers(new_skills, &shift.required_skills);
        }
        // Another employee's violating assignment the update could fix.
        let holder_satisfies = schedule
            .index_employee(assignee)
            .map(|holder| holder.has_all(&shift.required_skills))
            .unwrap_or(false);
        !holder_satisfies && covers(new_skills, &shift.required_skills)
    })
}

/// Applies a pin plan ahead of a re-solve.
pub fn apply_pin_plan(schedule: &mut Schedule, plan: &PinPlan) {
    for shift in &mut schedule.shifts {
        shift.pinned = plan.pinned.contains(&shift.id);
    }
    info!(
        pinned = plan.pinned.len(),
        unpinned = plan.unpinned.len(),
        "pin plan applied"
    );
}

/// Clears every pin after a mutation-driven solve, success or failure.
pub fn clear_pins(schedule: &mut Schedule) {
    for shift in &mut schedule.shifts {
        shift.pinned = false;
    }
}

/// Persistent pin toggle. Unknown shift ids are rejected without touching
/// the schedule.
pub fn pin_shifts(schedule: &mut Schedule, shift_ids: &[String], pin: bool) -> PlanningResult<()> {
    for id in shift_ids {
        if schedule.shift_by_id(id).is_none() {
            return Err(PlanningError::invalid_input(format!(
                "unknown shift id '{id}'"
            )));
        }
    }
    for shift in &mut schedule.shifts {
        if shift_ids.iter().any(|id| id == &shift.id) {
            shift.pinned = pin;
        }
    }
    Ok(())
}

/// Directly sets a shift's assignee, bypassing the solver.
///
/// Succeeds iff the change leaves the hard score exactly unchanged
/// (zero hard delta); otherwise the schedule is left untouched and the
/// offending constraint is reported. A point mutation that would repair
/// an existing hard violation is rejected too: repairs go through a
/// pinned re-solve, which keeps the rest of the schedule consistent.
/// On success the schedule's score is recomputed and returned.
pub fn reassign(
    schedule: &mut Schedule,
    shift_id: &str,
    new_assignee: Option<&str>,
    config: &EvaluatorConfig,
) -> PlanningResult<HardMediumSoftScore> {
    let Some(shift_idx) = schedule.shifts.iter().position(|s| s.id == shift_id) else {
        return Err(PlanningError::invalid_input(format!(
            "unknown shift id '{shift_id}'"
        )));
    };
    let shift = &schedule.shifts[shift_idx];

    if let Some(employee_id) = new_assignee {
        let employee = schedule
            .index_employee(employee_id)
            .map_err(|_| {
                PlanningError::invalid_input(format!("unknown employee id '{employee_id}'"))
            })?;

        // Named pre-checks give precise constraint codes before the
        // generic hard-delta guard below.
        if !employee.has_all(&shift.required_skills) {
            return Err(PlanningError::illegal_move(
                "required_skill",
                format!(
                    "employee '{}' lacks skills required by shift '{}'",
                    employee_id, shift_id
                ),
            ));
        }
        if employee.is_unavailable_on(shift.civil_date()) {
            return Err(PlanningError::illegal_move(
                "unavailable_date",
                format!(
                    "employee '{}' is unavailable on {}",
                    employee_id,
                    shift.civil_date()
                ),
            ));
        }
        let overlap = schedule.shifts.iter().any(|other| {
            other.id != shift_id
                && other.assignee.as_deref() == Some(employee_id)
                && other.overlaps(shift)
        });
        if overlap {
            return Err(PlanningError::illegal_move(
                "no_overlap",
                format!(
                    "employee '{}' already works an overlapping shift",
                    employee_id
                ),
            ));
        }
    }

    let hard_before = evaluate(schedule, config).hard;
    let previous = schedule.shifts[shift_idx].assignee.take();
    schedule.shifts[shift_idx].assignee = new_assignee.map(|s| s.to_string());
    let after = evaluate(schedule, config);

    if after.hard != hard_before {
        schedule.shifts[shift_idx].assignee = previous;
        return Err(PlanningError::illegal_move(
            "hard_conflict",
            format!(
                "reassigning shift '{shift_id}' would change the hard score \
                 from {hard_before} to {}",
                after.hard
            ),
        ));
    }

    schedule.score = Some(after);
    Ok(after)
}
