//! Streaming run-rule evaluation for one characteristic.
//!
//! A [`RuleEvaluator`] owns a bounded buffer of the most recent
//! [`MAX_WINDOW`] classified points. Every arrival is classified against the
//! evaluator's [`LimitSnapshot`], pushed into the buffer (evicting the oldest
//! point when full), and every enabled rule is tested against the buffer
//! suffix it needs. Each rule that matches yields its own [`RuleViolation`];
//! simultaneous matches are never merged.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::chart::LimitSnapshot;
use super::rules::{RuleId, RuleSet, Severity, MAX_WINDOW};
use super::violations::RuleViolation;
use super::zones::{classify, ZonePoint};
use crate::error::{SpcError, SpcResult};
use crate::model::Measurement;

/// Result of pushing one point through a [`RuleEvaluator`].
#[derive(Debug, Clone, PartialEq)]
pub struct PointEvaluation {
    pub point: ZonePoint,
    /// Rules that fired on this point, in rule-number order.
    pub violations: Vec<RuleViolation>,
    /// Buffered points covering every triggering window, oldest first;
    /// empty when no rule fired.
    pub evidence: Vec<ZonePoint>,
}

impl PointEvaluation {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Single-writer rule evaluator for one characteristic stream.
///
/// Points must be pushed in arrival order. Sequence numbers are assigned
/// from 0 and keep counting across [`RuleEvaluator::rebase`].
///
/// Zero-variance limits collapse every zone onto the center line, so only
/// rule 1 is evaluated against them: any deviation from the center line is
/// beyond the limits.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::model::Measurement;
/// use u_spc::spc::{ControlLimitCalculator, LimitHistory, RuleEvaluator, RuleId, RuleSet};
///
/// let now = Utc::now();
/// let baseline: Vec<Measurement> = [10.0, 10.2, 9.8, 10.1, 9.9, 10.0]
///     .iter()
///     .map(|&v| Measurement::new(now, v))
///     .collect();
/// let limits = ControlLimitCalculator::default()
///     .individuals("bore".into(), &baseline)
///     .unwrap();
/// let mut history = LimitHistory::new("bore".into());
/// let snapshot = history.publish(limits).unwrap();
///
/// let mut evaluator = RuleEvaluator::new(snapshot, RuleSet::all()).unwrap();
/// let result = evaluator.push(now, 12.0).unwrap();
/// assert_eq!(result.violations[0].rule_id, RuleId::R1);
/// ```
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    snapshot: LimitSnapshot,
    rules: RuleSet,
    buffer: VecDeque<ZonePoint>,
    next_index: u64,
}

impl RuleEvaluator {
    /// Creates an evaluator over a published limit snapshot.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the chart does not support run rules.
    pub fn new(snapshot: LimitSnapshot, rules: RuleSet) -> SpcResult<Self> {
        check_snapshot(&snapshot)?;
        Ok(Self {
            snapshot,
            rules,
            buffer: VecDeque::with_capacity(MAX_WINDOW),
            next_index: 0,
        })
    }

    pub fn snapshot(&self) -> &LimitSnapshot {
        &self.snapshot
    }

    /// Rules as configured.
    pub fn rules(&self) -> RuleSet {
        self.rules
    }

    /// Rules actually evaluated under the current snapshot.
    pub fn active_rules(&self) -> RuleSet {
        active_rules(self.rules, &self.snapshot)
    }

    /// Number of buffered points (never more than [`MAX_WINDOW`]).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered points, oldest first.
    pub fn points(&self) -> impl Iterator<Item = &ZonePoint> {
        self.buffer.iter()
    }

    /// Sequence number the next point will receive.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Classifies and evaluates one plotted value.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if `value` is NaN or infinite; the buffer is
    /// left untouched.
    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) -> SpcResult<PointEvaluation> {
        if !value.is_finite() {
            return Err(SpcError::validation(format!(
                "non-finite value {value} for {}",
                self.snapshot.limits().characteristic_id
            )));
        }

        let point = classify(self.next_index, timestamp, value, self.snapshot.limits());
        self.next_index += 1;
        if self.buffer.len() == MAX_WINDOW {
            self.buffer.pop_front();
        }
        self.buffer.push_back(point.clone());

        let history: &[ZonePoint] = self.buffer.make_contiguous();
        let violations: Vec<RuleViolation> = active_rules(self.rules, &self.snapshot)
            .defs()
            .filter(|def| def.matches(history))
            .map(|def| {
                let window = &history[history.len() - def.window..];
                RuleViolation {
                    characteristic_id: self.snapshot.limits().characteristic_id.clone(),
                    rule_id: def.id,
                    severity: def.severity,
                    point_indices: window.iter().map(|p| p.index).collect(),
                    detected_at: timestamp,
                    limits_ref: self.snapshot.reference(),
                }
            })
            .collect();
        let span = violations
            .iter()
            .map(|v| v.point_indices.len())
            .max()
            .unwrap_or(0);
        let evidence = history[history.len() - span..].to_vec();

        for v in &violations {
            if v.severity >= Severity::High {
                info!(
                    characteristic = %v.characteristic_id,
                    rule = v.rule_id.number(),
                    severity = %v.severity,
                    index = point.index,
                    value,
                    limits = %v.limits_ref,
                    "run rule violated"
                );
            } else {
                debug!(
                    characteristic = %v.characteristic_id,
                    rule = v.rule_id.number(),
                    severity = %v.severity,
                    index = point.index,
                    "run rule violated"
                );
            }
        }

        Ok(PointEvaluation {
            point,
            violations,
            evidence,
        })
    }

    /// Convenience for [`Self::push`] with a measurement.
    pub fn push_measurement(&mut self, measurement: &Measurement) -> SpcResult<PointEvaluation> {
        self.push(measurement.timestamp, measurement.value)
    }

    /// Switches to a newer limit snapshot and clears the buffer.
    ///
    /// Points classified against the old limits are not re-evaluated under the
    /// new ones.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the snapshot belongs to another
    /// characteristic, or under the same conditions as [`Self::new`].
    pub fn rebase(&mut self, snapshot: LimitSnapshot) -> SpcResult<()> {
        let current = &self.snapshot.limits().characteristic_id;
        if &snapshot.limits().characteristic_id != current {
            return Err(SpcError::validation(format!(
                "cannot rebase evaluator for {current} onto limits for {}",
                snapshot.limits().characteristic_id
            )));
        }
        check_snapshot(&snapshot)?;
        debug!(
            characteristic = %current,
            from = self.snapshot.revision(),
            to = snapshot.revision(),
            "rebased rule evaluator"
        );
        self.snapshot = snapshot;
        self.buffer.clear();
        Ok(())
    }

    /// Drops all buffered history; sequence numbers keep counting.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn check_snapshot(snapshot: &LimitSnapshot) -> SpcResult<()> {
    let limits = snapshot.limits();
    if !limits.chart_type.supports_run_rules() {
        return Err(SpcError::validation(format!(
            "run rules do not apply to {} charts",
            limits.chart_type
        )));
    }
    if limits.zero_variance {
        warn!(
            characteristic = %limits.characteristic_id,
            revision = snapshot.revision(),
            "zero-variance limits; only rule 1 is evaluated"
        );
    }
    Ok(())
}

fn active_rules(rules: RuleSet, snapshot: &LimitSnapshot) -> RuleSet {
    if snapshot.limits().zero_variance {
        if rules.is_enabled(RuleId::R1) {
            RuleSet::none().with(RuleId::R1)
        } else {
            RuleSet::none()
        }
    } else {
        rules
    }
}

/// Feeds a whole series through a fresh evaluator.
///
/// # Errors
///
/// Same as [`RuleEvaluator::new`] and [`RuleEvaluator::push`]; evaluation
/// stops at the first failing point.
pub fn evaluate_series(
    snapshot: LimitSnapshot,
    rules: RuleSet,
    series: &[Measurement],
) -> SpcResult<Vec<PointEvaluation>> {
    let mut evaluator = RuleEvaluator::new(snapshot, rules)?;
    series
        .iter()
        .map(|m| evaluator.push_measurement(m))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{series, t};
    use crate::spc::chart::{ChartType, ControlLimits, LimitHistory};
    use crate::spc::limits::ControlLimitCalculator;
    use crate::spc::rules::RuleId;
    use crate::spc::zones::{Side, Zone};
    use crate::model::Subgroup;

    /// CL = 25, sigma = 1.
    fn snapshot() -> LimitSnapshot {
        let mut history = LimitHistory::new("c".into());
        history
            .publish(ControlLimits::three_sigma("c".into(), ChartType::IMr, 25.0, 1.0))
            .unwrap()
    }

    fn evaluator() -> RuleEvaluator {
        RuleEvaluator::new(snapshot(), RuleSet::all()).unwrap()
    }

    fn feed(ev: &mut RuleEvaluator, values: &[f64]) -> Vec<PointEvaluation> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| ev.push(t(i as i64), v).unwrap())
            .collect()
    }

    fn fired(eval: &PointEvaluation) -> Vec<RuleId> {
        eval.violations.iter().map(|v| v.rule_id).collect()
    }

    #[test]
    fn isolated_outlier_fires_only_rule_one() {
        // Zone C history with no long same-side runs, trends, or alternation.
        let cycle = [25.3, 25.6, 24.6, 24.4, 25.0];
        let prior: Vec<f64> = (0..14).map(|i| cycle[i % cycle.len()]).collect();
        let mut ev = evaluator();
        for eval in feed(&mut ev, &prior) {
            assert!(eval.is_clean(), "unexpected {:?}", fired(&eval));
            assert_eq!(eval.point.zone, Zone::C);
        }

        let eval = ev.push(t(14), 28.5).unwrap();
        assert_eq!(fired(&eval), vec![RuleId::R1]);
        let v = &eval.violations[0];
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.point_indices, vec![14]);
        assert_eq!(v.detected_at, t(14));
    }

    #[test]
    fn reference_scenario_point_beyond_xbar_limits() {
        let groups: Vec<Subgroup> = (0..20)
            .map(|i| Subgroup::new(format!("g{i}"), vec![10.02, 9.98, 10.0, 10.0, 10.0], t(i)).unwrap())
            .collect();
        let limits = ControlLimitCalculator::default()
            .xbar_r("bore".into(), &groups, 5)
            .unwrap();
        let snapshot = LimitHistory::new("bore".into()).publish(limits).unwrap();
        let mut ev = RuleEvaluator::new(snapshot, RuleSet::all()).unwrap();

        let eval = ev.push(t(100), 10.08).unwrap();
        assert_eq!(eval.point.zone, Zone::A);
        assert_eq!(eval.point.side, Some(Side::Above));
        assert!(eval.point.is_out_of_control);
        assert_eq!(fired(&eval), vec![RuleId::R1]);
        assert_eq!(eval.violations[0].severity, Severity::Critical);
        assert_eq!(eval.violations[0].limits_ref.revision, 1);
    }

    #[test]
    fn simultaneous_rules_reported_separately() {
        // Fifth point completes both 2-of-3 in zone A and 4-of-5 beyond 1 sigma.
        let mut ev = evaluator();
        let evals = feed(&mut ev, &[25.5, 26.5, 26.6, 27.5, 27.6]);
        assert!(evals[..4].iter().all(PointEvaluation::is_clean));
        assert_eq!(fired(&evals[4]), vec![RuleId::R5, RuleId::R6]);
        assert_eq!(evals[4].violations[0].point_indices, vec![2, 3, 4]);
        assert_eq!(evals[4].violations[1].point_indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rule_fires_on_every_arrival_while_condition_holds() {
        let mut ev = evaluator();
        let evals = feed(&mut ev, &[25.5; 11]);
        let hits: Vec<usize> = evals
            .iter()
            .enumerate()
            .filter(|(_, e)| fired(e).contains(&RuleId::R2))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits, vec![8, 9, 10]);
        assert_eq!(evals[10].violations[0].point_indices, (2..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn rules_need_full_window() {
        let mut ev = evaluator();
        let evals = feed(&mut ev, &[20.0, 21.0, 22.0, 23.0, 24.0]);
        assert!(evals.iter().all(|e| !fired(e).contains(&RuleId::R3)));
        let eval = ev.push(t(5), 25.0).unwrap();
        assert!(fired(&eval).contains(&RuleId::R3));
    }

    #[test]
    fn disabled_rules_do_not_fire() {
        let rules = RuleSet::all().without(RuleId::R1);
        let mut ev = RuleEvaluator::new(snapshot(), rules).unwrap();
        assert!(ev.push(t(0), 40.0).unwrap().is_clean());
    }

    #[test]
    fn buffer_is_bounded() {
        let mut ev = evaluator();
        feed(&mut ev, &[25.1; 40]);
        assert_eq!(ev.buffered(), MAX_WINDOW);
        assert_eq!(ev.next_index(), 40);
        assert_eq!(ev.points().next().map(|p| p.index), Some(25));
    }

    #[test]
    fn rejects_non_finite_value() {
        let mut ev = evaluator();
        assert!(ev.push(t(0), f64::NAN).is_err());
        assert_eq!(ev.buffered(), 0);
        assert_eq!(ev.next_index(), 0);
    }

    #[test]
    fn zero_variance_limits_evaluate_rule_one_only() {
        let mut history = LimitHistory::new("c".into());
        let flat = history
            .publish(ControlLimits::three_sigma("c".into(), ChartType::IMr, 1.0, 0.0))
            .unwrap();
        let mut ev = RuleEvaluator::new(flat, RuleSet::all()).unwrap();
        assert_eq!(ev.active_rules(), RuleSet::none().with(RuleId::R1));
        assert_eq!(ev.rules(), RuleSet::all());

        // Fifteen points on the center line would be rule 7 under real zones.
        let evals = feed(&mut ev, &[1.0; 15]);
        assert!(evals.iter().all(PointEvaluation::is_clean), "flat run raised a violation");

        let off = ev.push(t(20), 1.001).unwrap();
        assert_eq!(fired(&off), vec![RuleId::R1], "any deviation is beyond collapsed limits");
        assert!(off.point.is_out_of_control);
    }

    #[test]
    fn rejects_unsuitable_limits() {
        let mut history = LimitHistory::new("c".into());
        let cusum = history
            .publish(ControlLimits::three_sigma("c".into(), ChartType::Cusum, 0.0, 1.0))
            .unwrap();
        assert!(RuleEvaluator::new(cusum, RuleSet::all()).is_err());
    }

    #[test]
    fn rebase_clears_buffer_and_tags_new_revision() {
        let mut history = LimitHistory::new("c".into());
        let first = history
            .publish(ControlLimits::three_sigma("c".into(), ChartType::IMr, 25.0, 1.0))
            .unwrap();
        let second = history
            .publish(ControlLimits::three_sigma("c".into(), ChartType::IMr, 30.0, 1.0))
            .unwrap();

        let mut ev = RuleEvaluator::new(first, RuleSet::all()).unwrap();
        feed(&mut ev, &[25.5; 8]);
        ev.rebase(second).unwrap();
        assert_eq!(ev.buffered(), 0);

        let eval = ev.push(t(20), 40.0).unwrap();
        assert_eq!(eval.point.index, 8);
        assert_eq!(eval.violations[0].limits_ref.revision, 2);

        let other = LimitHistory::new("x".into())
            .publish(ControlLimits::three_sigma("x".into(), ChartType::IMr, 1.0, 1.0))
            .unwrap();
        assert!(ev.rebase(other).is_err());
    }

    #[test]
    fn evidence_matches_window() {
        let mut ev = evaluator();
        let evals = feed(&mut ev, &[25.5, 27.5, 27.6, 25.2]);
        assert!(evals[1].evidence.is_empty());
        let evidence = &evals[2].evidence;
        assert_eq!(evidence.len(), 3);
        assert_eq!(evidence[1].value, 27.5);
        // Rule 5 still holds on the fourth point: window 1..=3.
        assert_eq!(evals[3].evidence.first().map(|p| p.index), Some(1));
    }

    #[test]
    fn evaluate_series_matches_streaming() {
        let data = series(&[25.0, 27.5, 27.6, 24.0, 29.0, 25.2]);
        let batch = evaluate_series(snapshot(), RuleSet::all(), &data).unwrap();
        let mut ev = evaluator();
        let streamed: Vec<PointEvaluation> =
            data.iter().map(|m| ev.push_measurement(m).unwrap()).collect();
        assert_eq!(batch, streamed);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn buffer_never_exceeds_capacity(
                values in proptest::collection::vec(15.0_f64..35.0, 0..80)
            ) {
                let mut ev = evaluator();
                for (i, v) in values.iter().enumerate() {
                    ev.push(t(i as i64), *v).unwrap();
                    prop_assert!(ev.buffered() <= MAX_WINDOW);
                }
                prop_assert_eq!(ev.next_index(), values.len() as u64);
            }

            #[test]
            fn six_increasing_points_trigger_rule_three(
                start in -100.0_f64..100.0,
                steps in proptest::collection::vec(0.01_f64..10.0, 5)
            ) {
                let mut values = vec![start];
                for s in &steps {
                    let last = values[values.len() - 1];
                    values.push(last + s);
                }
                let mut ev = evaluator();
                let evals = feed(&mut ev, &values);
                prop_assert!(fired(&evals[5]).contains(&RuleId::R3));
            }

            #[test]
            fn replay_is_deterministic(
                values in proptest::collection::vec(15.0_f64..35.0, 1..40)
            ) {
                let data = series(&values);
                let a = evaluate_series(snapshot(), RuleSet::all(), &data).unwrap();
                let b = evaluate_series(snapshot(), RuleSet::all(), &data).unwrap();
                prop_assert_eq!(a, b);
            }
        }
    }
}
