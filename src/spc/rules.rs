//! Western Electric run rules as tagged data.
//!
//! Each rule is a [`RuleDef`]: an id, a severity, the number of most recent
//! points it inspects, and a pure predicate over exactly that many points.
//! The [`super::RuleEvaluator`] feeds each predicate the suffix of its rolling
//! buffer; a rule whose window is longer than the buffered history is not
//! evaluated.
//!
//! | Rule | Pattern                                         | Window | Severity |
//! |------|-------------------------------------------------|--------|----------|
//! | 1    | point beyond 3σ                                 | 1      | Critical |
//! | 2    | 9 in a row on one side of the center line      | 9      | High     |
//! | 3    | 6 in a row strictly increasing or decreasing    | 6      | Medium   |
//! | 4    | 14 in a row alternating up and down             | 14     | Medium   |
//! | 5    | 2 of 3 in zone A or beyond, same side           | 3      | High     |
//! | 6    | 4 of 5 in zone B or beyond, same side           | 5      | Medium   |
//! | 7    | 15 in a row within zone C                       | 15     | Low      |
//! | 8    | 8 in a row outside zone C, either side          | 8      | Medium   |
//!
//! # References
//!
//! - Western Electric (1956). *Statistical Quality Control Handbook*.
//! - Nelson, L.S. (1984). "The Shewhart Control Chart: Tests for Special Causes",
//!   *Journal of Quality Technology* 16(4), pp. 237-239.
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::zones::{Side, ZonePoint};

/// Longest rule window; the evaluator's buffer capacity.
pub const MAX_WINDOW: usize = 15;

/// Identifier of a run rule (1..=8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RuleId {
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
}

impl RuleId {
    pub const ALL: [RuleId; 8] = [
        RuleId::R1,
        RuleId::R2,
        RuleId::R3,
        RuleId::R4,
        RuleId::R5,
        RuleId::R6,
        RuleId::R7,
        RuleId::R8,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    /// The rule's definition.
    pub fn def(self) -> &'static RuleDef {
        &RULES[self as usize - 1]
    }
}

impl TryFrom<u8> for RuleId {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        RuleId::ALL
            .get((n as usize).wrapping_sub(1))
            .copied()
            .ok_or_else(|| format!("rule id must be 1..=8, got {n}"))
    }
}

impl From<RuleId> for u8 {
    fn from(id: RuleId) -> u8 {
        id.number()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}", self.number())
    }
}

/// Severity of a rule violation, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// A run rule: id, severity, window length, and predicate.
pub struct RuleDef {
    pub id: RuleId,
    pub severity: Severity,
    /// Number of most recent points the predicate inspects.
    pub window: usize,
    pub description: &'static str,
    /// Called with exactly `window` points, oldest first.
    pub predicate: fn(&[ZonePoint]) -> bool,
}

impl fmt::Debug for RuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDef")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .field("window", &self.window)
            .finish()
    }
}

impl RuleDef {
    /// Tests the rule against the most recent points of `history`.
    ///
    /// Returns `false` when `history` is shorter than the rule's window.
    pub fn matches(&self, history: &[ZonePoint]) -> bool {
        history.len() >= self.window && (self.predicate)(&history[history.len() - self.window..])
    }
}

/// The eight rules, indexed by `RuleId - 1`.
pub static RULES: [RuleDef; 8] = [
    RuleDef {
        id: RuleId::R1,
        severity: Severity::Critical,
        window: 1,
        description: "1 point beyond 3 sigma",
        predicate: beyond_limits,
    },
    RuleDef {
        id: RuleId::R2,
        severity: Severity::High,
        window: 9,
        description: "9 consecutive points on the same side of the center line",
        predicate: same_side_run,
    },
    RuleDef {
        id: RuleId::R3,
        severity: Severity::Medium,
        window: 6,
        description: "6 consecutive points steadily increasing or decreasing",
        predicate: monotonic_trend,
    },
    RuleDef {
        id: RuleId::R4,
        severity: Severity::Medium,
        window: 14,
        description: "14 consecutive points alternating up and down",
        predicate: alternating,
    },
    RuleDef {
        id: RuleId::R5,
        severity: Severity::High,
        window: 3,
        description: "2 of 3 consecutive points in zone A or beyond, same side",
        predicate: two_of_three_zone_a,
    },
    RuleDef {
        id: RuleId::R6,
        severity: Severity::Medium,
        window: 5,
        description: "4 of 5 consecutive points in zone B or beyond, same side",
        predicate: four_of_five_zone_b,
    },
    RuleDef {
        id: RuleId::R7,
        severity: Severity::Low,
        window: 15,
        description: "15 consecutive points within zone C (stratification)",
        predicate: stratification,
    },
    RuleDef {
        id: RuleId::R8,
        severity: Severity::Medium,
        window: 8,
        description: "8 consecutive points outside zone C (mixture)",
        predicate: mixture,
    },
];

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

fn beyond_limits(points: &[ZonePoint]) -> bool {
    points.iter().all(|p| p.is_out_of_control)
}

/// Points exactly on the center line belong to neither side and break the run.
fn same_side_run(points: &[ZonePoint]) -> bool {
    match points[0].side {
        Some(side) => points.iter().all(|p| p.side == Some(side)),
        None => false,
    }
}

/// Direction between consecutive points: +1 up, -1 down, 0 equal.
fn direction(a: &ZonePoint, b: &ZonePoint) -> i8 {
    if b.value > a.value {
        1
    } else if b.value < a.value {
        -1
    } else {
        0
    }
}

/// Repeated values break the trend.
fn monotonic_trend(points: &[ZonePoint]) -> bool {
    let first = direction(&points[0], &points[1]);
    first != 0 && points.windows(2).all(|w| direction(&w[0], &w[1]) == first)
}

fn alternating(points: &[ZonePoint]) -> bool {
    let dirs: Vec<i8> = points.windows(2).map(|w| direction(&w[0], &w[1])).collect();
    dirs.iter().all(|&d| d != 0) && dirs.windows(2).all(|w| w[0] == -w[1])
}

fn count_on_side(points: &[ZonePoint], side: Side, pred: fn(&ZonePoint) -> bool) -> usize {
    points
        .iter()
        .filter(|p| p.side == Some(side) && pred(p))
        .count()
}

fn two_of_three_zone_a(points: &[ZonePoint]) -> bool {
    [Side::Above, Side::Below]
        .into_iter()
        .any(|side| count_on_side(points, side, ZonePoint::beyond_two_sigma) >= 2)
}

fn four_of_five_zone_b(points: &[ZonePoint]) -> bool {
    [Side::Above, Side::Below]
        .into_iter()
        .any(|side| count_on_side(points, side, ZonePoint::beyond_one_sigma) >= 4)
}

fn stratification(points: &[ZonePoint]) -> bool {
    points.iter().all(ZonePoint::in_zone_c)
}

fn mixture(points: &[ZonePoint]) -> bool {
    points.iter().all(ZonePoint::beyond_one_sigma)
}

// ---------------------------------------------------------------------------
// Rule selection
// ---------------------------------------------------------------------------

/// A set of enabled rules. Serializes as a sorted list of rule numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<RuleId>", into = "Vec<RuleId>")]
pub struct RuleSet(u8);

impl RuleSet {
    /// All eight rules.
    pub fn all() -> Self {
        Self(0xFF)
    }

    pub fn none() -> Self {
        Self(0)
    }

    /// The four classic Western Electric zone tests: rules 1, 2, 5, and 6.
    pub fn western_electric_classic() -> Self {
        [RuleId::R1, RuleId::R2, RuleId::R5, RuleId::R6]
            .into_iter()
            .collect()
    }

    pub fn with(mut self, id: RuleId) -> Self {
        self.0 |= 1 << (id as u8 - 1);
        self
    }

    pub fn without(mut self, id: RuleId) -> Self {
        self.0 &= !(1 << (id as u8 - 1));
        self
    }

    pub fn is_enabled(&self, id: RuleId) -> bool {
        self.0 & (1 << (id as u8 - 1)) != 0
    }

    /// Enabled rule definitions in rule-number order.
    pub fn defs(&self) -> impl Iterator<Item = &'static RuleDef> {
        let set = *self;
        RULES.iter().filter(move |def| set.is_enabled(def.id))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<RuleId> for RuleSet {
    fn from_iter<I: IntoIterator<Item = RuleId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), RuleSet::with)
    }
}

impl From<Vec<RuleId>> for RuleSet {
    fn from(ids: Vec<RuleId>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<RuleSet> for Vec<RuleId> {
    fn from(set: RuleSet) -> Self {
        RuleId::ALL
            .into_iter()
            .filter(|id| set.is_enabled(*id))
            .collect()
    }
}
