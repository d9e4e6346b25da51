//! Domain model for shift planning.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{PlanningError, PlanningResult};
use crate::score::HardMediumSoftScore;

/// An employee who can be assigned to shifts.
///
/// Problem fact: immutable during a single solve. The incremental planner
/// may append employees and replace skill sets between solves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub skills: HashSet<String>,
    #[serde(default)]
    pub preferred_days_off: HashSet<Weekday>,
    #[serde(default)]
    pub preferred_work_days: HashSet<Weekday>,
    /// Calendar dates the employee cannot work. Compared by civil date in
    /// the schedule's timezone; any time component is dropped by the loader.
    #[serde(default)]
    pub unavailable_dates: HashSet<NaiveDate>,
}

impl Employee {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            skills: HashSet::new(),
            preferred_days_off: HashSet::new(),
            preferred_work_days: HashSet::new(),
            unavailable_dates: HashSet::new(),
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill.into());
        self
    }

    pub fn with_skills(mut self, skills: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for skill in skills {
            self.skills.insert(skill.into());
        }
        self
    }

    pub fn with_unavailable_date(mut self, date: NaiveDate) -> Self {
        self.unavailable_dates.insert(date);
        self
    }

    pub fn with_preferred_day_off(mut self, day: Weekday) -> Self {
        self.preferred_days_off.insert(day);
        self
    }

    pub fn with_preferred_work_day(mut self, day: Weekday) -> Self {
        self.preferred_work_days.insert(day);
        self
    }

    /// Whether this employee covers every required skill.
    pub fn has_all(&self, required: &HashSet<String>) -> bool {
        required.iter().all(|skill| self.skills.contains(skill))
    }

    pub fn is_unavailable_on(&self, date: NaiveDate) -> bool {
        self.unavailable_dates.contains(&date)
    }
}

/// A shift that needs to be staffed.
///
/// Planning entity: `assignee` is the planning variable. A pinned shift's
/// assignee must not be changed by the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub required_skills: HashSet<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// 1 is the highest priority, 10 the lowest. Governs the unassigned
    /// penalty weight.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// When true the solver leaves `assignee` untouched, including a pinned
    /// `None` ("leave unassigned").
    #[serde(default)]
    pub pinned: bool,
    /// Id of the assigned employee, resolved through the schedule's
    /// employee index. The planning variable.
    #[serde(default)]
    pub assignee: Option<String>,
}

fn default_priority() -> u8 {
    5
}

impl Shift {
    pub fn new(id: impl Into<String>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            required_skills: HashSet::new(),
            location: None,
            priority: default_priority(),
            pinned: false,
            assignee: None,
        }
    }

    pub fn with_required_skill(mut self, skill: impl Into<String>) -> Self {
        self.required_skills.insert(skill.into());
        self
    }

    pub fn with_required_skills(
        mut self,
        skills: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        for skill in skills {
            self.required_skills.insert(skill.into());
        }
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_assignee(mut self, employee_id: impl Into<String>) -> Self {
        self.assignee = Some(employee_id.into());
        self
    }

    /// Shift length in whole minutes.
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// True iff the `[start, end)` intervals intersect on a common instant.
    pub fn overlaps(&self, other: &Shift) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Civil date of the shift start.
    pub fn civil_date(&self) -> NaiveDate {
        self.start.date()
    }

    /// Day of the week the shift starts on.
    pub fn weekday(&self) -> Weekday {
        self.start.weekday()
    }

    pub fn is_assigned(&self) -> bool {
        self.assignee.is_some()
    }
}

/// The planning solution: employees, shifts and the last computed score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub employees: Vec<Employee>,
    pub shifts: Vec<Shift>,
    /// Last computed score, or `None` if the schedule changed since.
    #[serde(default)]
    pub score: Option<HardMediumSoftScore>,
    /// IANA timezone name all naive datetimes in this schedule refer to.
    /// Loader concern; the core only does civil-date arithmetic within it.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

impl Schedule {
    pub fn new(employees: Vec<Employee>, shifts: Vec<Shift>) -> Self {
        Self {
            employees,
            shifts,
            score: None,
            time_zone: default_time_zone(),
        }
    }

    /// Id → position map over `employees`.
    pub fn employee_index(&self) -> HashMap<&str, usize> {
        self.employees
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.as_str(), i))
            .collect()
    }

    /// Resolves an employee id reference.
    ///
    /// A dangling id only arises from malformed input; the solver never
    /// produces one.
    pub fn index_employee(&self, id: &str) -> PlanningResult<&Employee> {
        self.employees
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| PlanningError::internal(format!("dangling employee reference '{id}'")))
    }

    pub fn shift_by_id(&self, id: &str) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.id == id)
    }

    pub fn employee_count(&self) -> usize {
        self.employees.len()
    }

    pub fn shift_count(&self) -> usize {
        self.shifts.len()
    }

    pub fn assigned_shift_count(&self) -> usize {
        self.shifts.iter().filter(|s| s.is_assigned()).count()
    }

    pub fn unassigned_shift_count(&self) -> usize {
        self.shift_count() - self.assigned_shift_count()
    }

    /// Structural integrity checks run at submission. The solver and the
    /// incremental planner assume a schedule that passed this.
    ///
    /// Checks: unique employee ids, unique shift ids, resolvable assignee
    /// references, `end > start`, no empty skill tags, priority in `1..=10`.
    pub fn validate(&self) -> PlanningResult<()> {
        let mut employee_ids = HashSet::new();
        for employee in &self.employees {
            if employee.id.trim().is_empty() {
                return Err(PlanningError::invalid_input("employee with empty id"));
            }
            if !employee_ids.insert(employee.id.as_str()) {
                return Err(PlanningError::invalid_input(format!(
                    "duplicate employee id '{}'",
                    employee.id
                )));
            }
            for skill in &employee.skills {
                if skill.trim().is_empty() {
                    return Err(PlanningError::invalid_input(format!(
                        "employee '{}' has an empty skill tag",
                        employee.id
                    )));
                }
            }
        }

        let mut shift_ids = HashSet::new();
        for shift in &self.shifts {
            if shift.id.trim().is_empty() {
                return Err(PlanningError::invalid_input("shift with empty id"));
            }
            if !shift_ids.insert(shift.id.as_str()) {
                return Err(PlanningError::invalid_input(format!(
                    "duplicate shift id '{}'",
                    shift.id
                )));
            }
            if shift.end <= shift.start {
                return Err(PlanningError::invalid_input(format!(
                    "shift '{}' ends at or before it starts",
                    shift.id
                )));
            }
            if !(1..=10).contains(&shift.priority) {
                return Err(PlanningError::invalid_input(format!(
                    "shift '{}' priority {} outside 1..=10",
                    shift.id, shift.priority
                )));
            }
            for skill in &shift.required_skills {
                if skill.trim().is_empty() {
                    return Err(PlanningError::invalid_input(format!(
                        "shift '{}' has an empty required skill tag",
                        shift.id
                    )));
                }
            }
            if let Some(assignee) = &shift.assignee {
                if !employee_ids.contains(assignee.as_str()) {
                    return Err(PlanningError::invalid_input(format!(
                        "shift '{}' references unknown employee '{}'",
                        shift.id, assignee
                    )));
                }
            }
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn duration_and_weekday() {
        let monday = date(2024, 1, 15);
        let shift = shift_on("s1", monday, 8, 16);
        assert_eq!(shift.duration_minutes(), 480);
        assert_eq!(shift.weekday(), Weekday::Mon);
        assert_eq!(shift.civil_date(), monday);
    }

    #[test]
    fn overlap_is_half_open() {
        let day = date(2024, 1, 15);
        let morning = shift_on("s1", day, 8, 16);
        let evening = shift_on("s2", day, 16, 23);
        let late_morning = shift_on("s3", day, 15, 20);

        // Touching intervals do not overlap.
        assert!(!morning.overlaps(&evening));
        assert!(!evening.overlaps(&morning));
        assert!(morning.overlaps(&late_morning));
        assert!(late_morning.overlaps(&evening));
    }

    #[test]
    fn has_all_skills() {
        let employee = Employee::new("e1", "Amy Cole").with_skills(["Nurse", "CPR"]);
        let mut required = HashSet::new();
        required.insert("Nurse".to_string());
        assert!(employee.has_all(&required));
        required.insert("Anaesthetics".to_string());
        assert!(!employee.has_all(&required));
        // Every employee satisfies an empty requirement set.
        assert!(employee.has_all(&HashSet::new()));
    }

    #[test]
    fn index_employee_reports_dangling_reference() {
        let schedule = Schedule::new(vec![Employee::new("e1", "Amy")], vec![]);
        assert!(schedule.index_employee("e1").is_ok());
        let err = schedule.index_employee("ghost").unwrap_err();
        assert_eq!(err.code(), "internal");
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![Employee::new("e1", "Amy"), Employee::new("e1", "Beth")],
            vec![],
        );
        assert_eq!(schedule.validate().unwrap_err().code(), "invalid_input");

        let schedule = Schedule::new(
            vec![Employee::new("e1", "Amy")],
            vec![shift_on("s1", day, 8, 16), shift_on("s1", day, 16, 23)],
        );
        assert_eq!(schedule.validate().unwrap_err().code(), "invalid_input");
    }

    #[test]
    fn validate_rejects_inverted_interval() {
        let day = date(2024, 1, 15);
        let shift = Shift::new("s1", dt(day, 16, 0), dt(day, 8, 0));
        let schedule = Schedule::new(vec![], vec![shift]);
        assert!(schedule.validate().is_err());

        // Zero-length shifts are also invalid.
        let shift = Shift::new("s1", dt(day, 8, 0), dt(day, 8, 0));
        let schedule = Schedule::new(vec![], vec![shift]);
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn validate_rejects_dangling_assignee() {
        let day = date(2024, 1, 15);
        let shift = shift_on("s1", day, 8, 16).with_assignee("ghost");
        let schedule = Schedule::new(vec![Employee::new("e1", "Amy")], vec![shift]);
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_skill_tag() {
        let employee = Employee::new("e1", "Amy").with_skill("  ");
        let schedule = Schedule::new(vec![employee], vec![]);
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_schedule() {
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![Employee::new("e1", "Amy").with_skill("Nurse")],
            vec![shift_on("s1", day, 8, 16)
                .with_required_skill("Nurse")
                .with_assignee("e1")],
        );
        assert!(schedule.validate().is_ok());
        assert_eq!(schedule.assigned_shift_count(), 1);
        assert_eq!(schedule.unassigned_shift_count(), 0);
    }

    #[test]
    fn schedule_json_round_trip() {
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![Employee::new("e1", "Amy")
                .with_skill("Nurse")
                .with_preferred_day_off(Weekday::Sat)
                .with_unavailable_date(day)],
            vec![shift_on("s1", day, 8, 16)
                .with_required_skill("Nurse")
                .with_location("Critical care")
                .with_priority(1)],
        );

        let json = serde_json::to_string(&schedule).unwrap();
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(schedule, back);
    }
}
