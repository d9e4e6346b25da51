//! Lexicographic hard/medium/soft score.
//!
//! Penalties accumulate as negative values, rewards as positive; a higher
//! score is better, with `hard` dominating `medium` dominating `soft`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A hard/medium/soft score triple.
///
/// Ordering is lexicographic: `hard` first, then `medium`, then `soft`.
/// `(0, 0, 0)` is the score of a schedule with no violations and no
/// preference matches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct HardMediumSoftScore {
    pub hard: i64,
    pub medium: i64,
    pub soft: i64,
}

impl HardMediumSoftScore {
    pub const ZERO: Self = Self::of(0, 0, 0);
    pub const ONE_HARD: Self = Self::of(-1, 0, 0);
    pub const ONE_MEDIUM: Self = Self::of(0, -1, 0);
    pub const ONE_SOFT: Self = Self::of(0, 0, -1);

    pub const fn of(hard: i64, medium: i64, soft: i64) -> Self {
        Self { hard, medium, soft }
    }

    pub const fn of_hard(hard: i64) -> Self {
        Self::of(hard, 0, 0)
    }

    pub const fn of_medium(medium: i64) -> Self {
        Self::of(0, medium, 0)
    }

    pub const fn of_soft(soft: i64) -> Self {
        Self::of(0, 0, soft)
    }

    /// No hard violations.
    pub fn is_feasible(&self) -> bool {
        self.hard >= 0
    }

    /// Subtracts `weight` scaled by `count` (a penalty of `count` units).
    pub fn penalize(&mut self, weight: Self, count: i64) {
        self.hard -= weight.hard.abs() * count;
        self.medium -= weight.medium.abs() * count;
        self.soft -= weight.soft.abs() * count;
    }

    /// Adds `weight` scaled by `count` (a reward of `count` units).
    pub fn reward(&mut self, weight: Self, count: i64) {
        self.hard += weight.hard.abs() * count;
        self.medium += weight.medium.abs() * count;
        self.soft += weight.soft.abs() * count;
    }
}

impl std::ops::Add for HardMediumSoftScore {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::of(
            self.hard + rhs.hard,
            self.medium + rhs.medium,
            self.soft + rhs.soft,
        )
    }
}

impl std::ops::AddAssign for HardMediumSoftScore {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Display for HardMediumSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}hard/{}medium/{}soft",
            self.hard, self.medium, self.soft
        )
    }
}
