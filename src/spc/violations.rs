//! Rule violations and their aggregation for alerting and reporting.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chart::LimitsRef;
use super::rules::{RuleId, Severity};
use super::zones::{Side, Zone, ZonePoint};
use crate::model::CharacteristicId;

/// One rule firing on one point. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub characteristic_id: CharacteristicId,
    pub rule_id: RuleId,
    pub severity: Severity,
    /// Sequence numbers of the triggering window, oldest first.
    pub point_indices: Vec<u64>,
    /// Timestamp of the point that completed the pattern.
    pub detected_at: DateTime<Utc>,
    /// Limit snapshot the window was classified against.
    pub limits_ref: LimitsRef,
}

/// A point in a violation's triggering window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub zone: Zone,
    pub side: Option<Side>,
    pub sigma_distance: Option<f64>,
}

impl From<&ZonePoint> for Evidence {
    fn from(p: &ZonePoint) -> Self {
        Self {
            index: p.index,
            timestamp: p.timestamp,
            value: p.value,
            zone: p.zone,
            side: p.side,
            sigma_distance: p.sigma_distance,
        }
    }
}

/// A violation together with the points that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// Arrival order at the aggregator; breaks timestamp ties.
    pub sequence: u64,
    pub violation: RuleViolation,
    pub evidence: Vec<Evidence>,
}

/// Counts over a set of violation records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub total: usize,
    pub by_rule: BTreeMap<RuleId, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub highest_severity: Option<Severity>,
}

impl ViolationSummary {
    fn add(&mut self, v: &RuleViolation) {
        self.total += 1;
        *self.by_rule.entry(v.rule_id).or_default() += 1;
        *self.by_severity.entry(v.severity).or_default() += 1;
        self.highest_severity = self.highest_severity.max(Some(v.severity));
    }
}

/// Collects violations from any number of streams into one time-ordered log.
///
/// Records are ordered by `detected_at`, then by arrival. Violations are
/// never merged or deduplicated: each rule firing is its own record.
#[derive(Debug, Clone, Default)]
pub struct ViolationAggregator {
    records: Vec<ViolationRecord>,
    next_sequence: u64,
}

impl ViolationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a violation with the points of its triggering window.
    ///
    /// Points in `window` that are not part of the violation are ignored.
    pub fn record(&mut self, violation: RuleViolation, window: &[ZonePoint]) {
        let evidence: Vec<Evidence> = window
            .iter()
            .filter(|p| violation.point_indices.contains(&p.index))
            .map(Evidence::from)
            .collect();
        debug!(
            characteristic = %violation.characteristic_id,
            rule = violation.rule_id.number(),
            points = evidence.len(),
            "recorded violation"
        );

        let record = ViolationRecord {
            sequence: self.next_sequence,
            violation,
            evidence,
        };
        self.next_sequence += 1;

        let at = self
            .records
            .partition_point(|r| r.violation.detected_at <= record.violation.detected_at);
        self.records.insert(at, record);
    }

    /// Adds every violation in `violations`, resolving evidence from `window`.
    pub fn extend<I>(&mut self, violations: I, window: &[ZonePoint])
    where
        I: IntoIterator<Item = RuleViolation>,
    {
        for v in violations {
            self.record(v, window);
        }
    }

    /// All records, time-ordered.
    pub fn records(&self) -> &[ViolationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_characteristic<'a>(
        &'a self,
        id: &'a CharacteristicId,
    ) -> impl Iterator<Item = &'a ViolationRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| &r.violation.characteristic_id == id)
    }

    /// Records evaluated against one specific limit snapshot.
    pub fn for_snapshot<'a>(
        &'a self,
        limits: &'a LimitsRef,
    ) -> impl Iterator<Item = &'a ViolationRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| &r.violation.limits_ref == limits)
    }

    /// Records at or above `severity`.
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &ViolationRecord> + '_ {
        self.records
            .iter()
            .filter(move |r| r.violation.severity >= severity)
    }

    pub fn summary(&self) -> ViolationSummary {
        let mut summary = ViolationSummary::default();
        for r in &self.records {
            summary.add(&r.violation);
        }
        summary
    }

    /// Hands off all records, leaving the aggregator empty.
    ///
    /// Sequence numbers keep increasing after a drain.
    pub fn drain(&mut self) -> Vec<ViolationRecord> {
        std::mem::take(&mut self.records)
    }
}
