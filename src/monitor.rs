//! Per-characteristic streaming monitors and the multi-stream engine.
//!
//! A [`CharacteristicMonitor`] owns all mutable state for one stream: the
//! published limit history, the chart state (rule evaluator, shift detector
//! or pre-control tracker) and the arrival-order watermark. Monitors never
//! share state, so the [`SpcEngine`] fans batch work for different
//! characteristics out across a rayon pool and merges the results back in
//! input order.
//!
//! Every submission is validated before any state changes: a rejected
//! measurement leaves its monitor exactly as it was.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityAnalyzer, CapabilityResult};
use crate::config::{ChartConfig, CharacteristicSpec, EngineConfig};
use crate::detection::{Cusum, CusumPoint, Ewma, EwmaPoint};
use crate::error::{SpcError, SpcResult};
use crate::model::{CharacteristicId, Measurement, MeasurementRecord, Subgroup};
use crate::spc::{
    ControlLimitCalculator, ControlLimits, LimitHistory, LimitSnapshot, LimitsRef,
    PointEvaluation, PreControlAction, PreControlTracker, PreControlZone, PreControlZones,
    RuleEvaluator, RuleViolation, Side, ViolationAggregator, ViolationRecord, ZonePoint,
};

/// What a single accepted measurement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Value buffered into an X-bar subgroup that is not yet complete.
    Pending {
        subgroup_id: String,
        collected: usize,
        size: usize,
    },
    /// A plotted point on an X-bar/R or I-MR chart.
    Shewhart(PointEvaluation),
    Cusum(CusumPoint),
    Ewma(EwmaPoint),
    PreControl {
        zone: PreControlZone,
        action: PreControlAction,
    },
}

/// Result of submitting one measurement to a monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOutcome {
    pub characteristic_id: CharacteristicId,
    pub timestamp: DateTime<Utc>,
    /// Limit snapshot the observation was judged against.
    pub limits_ref: LimitsRef,
    pub observation: Observation,
}

impl MonitorOutcome {
    /// Run-rule violations raised by this measurement.
    pub fn violations(&self) -> &[RuleViolation] {
        match &self.observation {
            Observation::Shewhart(eval) => &eval.violations,
            _ => &[],
        }
    }

    /// Points backing [`Self::violations`], oldest first.
    pub fn evidence(&self) -> &[ZonePoint] {
        match &self.observation {
            Observation::Shewhart(eval) => &eval.evidence,
            _ => &[],
        }
    }

    /// Direction of a CUSUM or EWMA shift signal, if one fired.
    pub fn shift(&self) -> Option<Side> {
        match &self.observation {
            Observation::Cusum(p) => p.signal,
            Observation::Ewma(p) => p.signal,
            _ => None,
        }
    }

    /// Pre-control decision, for pre-control charts.
    pub fn pre_control_action(&self) -> Option<PreControlAction> {
        match &self.observation {
            Observation::PreControl { action, .. } => Some(*action),
            _ => None,
        }
    }
}

/// Closed subgroup ids remembered per X-bar/R stream.
const CLOSED_SUBGROUP_MEMORY: usize = 64;

#[derive(Debug, Clone)]
struct PendingSubgroup {
    id: String,
    values: Vec<f64>,
}

#[derive(Debug, Clone)]
enum ChartState {
    XbarR {
        evaluator: RuleEvaluator,
        size: usize,
        pending: Option<PendingSubgroup>,
        /// Completed or discarded subgroup ids, oldest first.
        closed: VecDeque<String>,
    },
    IMr(RuleEvaluator),
    Cusum(Cusum),
    Ewma(Ewma),
    PreControl(PreControlTracker),
}

impl ChartState {
    fn build(spec: &CharacteristicSpec, snapshot: &LimitSnapshot) -> SpcResult<Self> {
        let limits = snapshot.limits();
        Ok(match &spec.chart {
            ChartConfig::XbarR { subgroup_size } => ChartState::XbarR {
                evaluator: RuleEvaluator::new(snapshot.clone(), spec.rules)?,
                size: *subgroup_size,
                pending: None,
                closed: VecDeque::new(),
            },
            ChartConfig::IMr => ChartState::IMr(RuleEvaluator::new(snapshot.clone(), spec.rules)?),
            ChartConfig::Cusum(_) => ChartState::Cusum(Cusum::from_limits(limits)?),
            ChartConfig::Ewma(_) => ChartState::Ewma(Ewma::from_limits(limits)?),
            ChartConfig::PreControl => {
                ChartState::PreControl(PreControlTracker::new(PreControlZones::from_limits(limits)?))
            }
        })
    }
}

/// Streaming monitor for one characteristic.
///
/// Measurements must arrive with non-decreasing timestamps; equal timestamps
/// are accepted. X-bar/R monitors assemble subgroups from consecutive
/// measurements sharing a `subgroup_id` and plot the mean once the configured
/// size is reached.
#[derive(Debug, Clone)]
pub struct CharacteristicMonitor {
    spec: CharacteristicSpec,
    history: LimitHistory,
    state: ChartState,
    watermark: Option<DateTime<Utc>>,
}

impl CharacteristicMonitor {
    /// Creates a monitor and publishes `limits` as revision 1.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the spec is invalid, the limits belong to
    /// another characteristic or chart, or the chart cannot run on them.
    pub fn new(spec: CharacteristicSpec, limits: ControlLimits) -> SpcResult<Self> {
        spec.validate()?;
        check_limits(&spec, &limits)?;
        let mut history = LimitHistory::new(spec.characteristic_id.clone());
        let snapshot = history.publish(limits)?;
        let state = ChartState::build(&spec, &snapshot)?;
        Ok(Self {
            spec,
            history,
            state,
            watermark: None,
        })
    }

    /// Computes limits from `baseline` and creates a monitor over them.
    pub fn from_baseline(
        spec: CharacteristicSpec,
        calculator: &ControlLimitCalculator,
        baseline: &[Measurement],
    ) -> SpcResult<Self> {
        let limits = calculator.compute(&spec, baseline)?;
        Self::new(spec, limits)
    }

    pub fn spec(&self) -> &CharacteristicSpec {
        &self.spec
    }

    pub fn history(&self) -> &LimitHistory {
        &self.history
    }

    /// Snapshot currently used for new points.
    pub fn current_limits(&self) -> SpcResult<&LimitSnapshot> {
        self.history.current().ok_or_else(|| {
            SpcError::validation(format!(
                "no limits published for {}",
                self.spec.characteristic_id
            ))
        })
    }

    /// Timestamp of the latest accepted measurement.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Publishes a new limit revision and restarts chart state on it.
    ///
    /// Run-rule buffers are cleared and detectors start from their target;
    /// a partially collected subgroup is kept. Earlier violations keep
    /// pointing at the revision they were raised under.
    pub fn recalibrate(&mut self, limits: ControlLimits) -> SpcResult<LimitsRef> {
        check_limits(&self.spec, &limits)?;
        // Build the new state against a scratch history so a failure leaves
        // the monitor untouched.
        let mut history = self.history.clone();
        let snapshot = history.publish(limits)?;
        let state = match &self.state {
            ChartState::XbarR {
                evaluator,
                size,
                pending,
                closed,
            } => {
                let mut evaluator = evaluator.clone();
                evaluator.rebase(snapshot.clone())?;
                ChartState::XbarR {
                    evaluator,
                    size: *size,
                    pending: pending.clone(),
                    closed: closed.clone(),
                }
            }
            ChartState::IMr(evaluator) => {
                let mut evaluator = evaluator.clone();
                evaluator.rebase(snapshot.clone())?;
                ChartState::IMr(evaluator)
            }
            _ => ChartState::build(&self.spec, &snapshot)?,
        };
        self.history = history;
        self.state = state;
        let reference = snapshot.reference();
        debug!(
            characteristic = %self.spec.characteristic_id,
            revision = reference.revision,
            "monitor recalibrated"
        );
        Ok(reference)
    }

    /// Submits one measurement.
    ///
    /// # Errors
    ///
    /// - [`SpcError::Validation`] for a non-finite value, a missing subgroup id
    ///   on an X-bar/R chart, or a measurement for an already completed
    ///   subgroup
    /// - [`SpcError::OutOfOrder`] if the timestamp is earlier than the last
    ///   accepted one
    pub fn submit(&mut self, measurement: &Measurement) -> SpcResult<MonitorOutcome> {
        let id = &self.spec.characteristic_id;
        if !measurement.value.is_finite() {
            return Err(SpcError::validation(format!(
                "non-finite value {} for {id}",
                measurement.value
            )));
        }
        if let Some(last) = self.watermark {
            if measurement.timestamp < last {
                return Err(SpcError::OutOfOrder {
                    characteristic: id.to_string(),
                    last: last.to_rfc3339(),
                    received: measurement.timestamp.to_rfc3339(),
                });
            }
        }
        let limits_ref = self.current_limits()?.reference();

        let observation = match &mut self.state {
            ChartState::XbarR {
                evaluator,
                size,
                pending,
                closed,
            } => {
                let subgroup_id = measurement.subgroup_id.as_deref().ok_or_else(|| {
                    SpcError::validation(format!("X-bar/R measurement for {id} has no subgroup_id"))
                })?;
                if closed.iter().any(|c| c == subgroup_id) {
                    return Err(SpcError::validation(format!(
                        "subgroup {subgroup_id} of {id} is already closed"
                    )));
                }
                let mut current = match pending.take() {
                    Some(p) if p.id == subgroup_id => p,
                    Some(p) => {
                        warn!(
                            characteristic = %id,
                            subgroup = %p.id,
                            collected = p.values.len(),
                            size = *size,
                            "discarding incomplete subgroup"
                        );
                        close_subgroup(closed, p.id);
                        PendingSubgroup {
                            id: subgroup_id.to_string(),
                            values: Vec::with_capacity(*size),
                        }
                    }
                    None => PendingSubgroup {
                        id: subgroup_id.to_string(),
                        values: Vec::with_capacity(*size),
                    },
                };
                current.values.push(measurement.value);

                if current.values.len() < *size {
                    let observation = Observation::Pending {
                        subgroup_id: current.id.clone(),
                        collected: current.values.len(),
                        size: *size,
                    };
                    *pending = Some(current);
                    observation
                } else {
                    let subgroup = Subgroup::new(current.id, current.values, measurement.timestamp)?;
                    let eval = evaluator.push(subgroup.timestamp(), subgroup.mean())?;
                    close_subgroup(closed, subgroup.id().to_string());
                    Observation::Shewhart(eval)
                }
            }
            ChartState::IMr(evaluator) => {
                Observation::Shewhart(evaluator.push(measurement.timestamp, measurement.value)?)
            }
            ChartState::Cusum(cusum) => {
                let point = cusum.update(measurement.value)?;
                if let Some(side) = point.signal {
                    info!(characteristic = %id, ?side, index = point.index, "CUSUM shift signal");
                }
                Observation::Cusum(point)
            }
            ChartState::Ewma(ewma) => {
                let point = ewma.update(measurement.value)?;
                if let Some(side) = point.signal {
                    info!(characteristic = %id, ?side, index = point.index, "EWMA shift signal");
                }
                Observation::Ewma(point)
            }
            ChartState::PreControl(tracker) => {
                let (zone, action) = tracker.observe(measurement.value)?;
                if matches!(action, PreControlAction::Stop | PreControlAction::Adjust) {
                    info!(characteristic = %id, ?zone, ?action, "pre-control intervention");
                }
                Observation::PreControl { zone, action }
            }
        };

        self.watermark = Some(measurement.timestamp);
        Ok(MonitorOutcome {
            characteristic_id: id.clone(),
            timestamp: measurement.timestamp,
            limits_ref,
            observation,
        })
    }
}

fn close_subgroup(closed: &mut VecDeque<String>, id: String) {
    if closed.len() == CLOSED_SUBGROUP_MEMORY {
        closed.pop_front();
    }
    closed.push_back(id);
}

fn check_limits(spec: &CharacteristicSpec, limits: &ControlLimits) -> SpcResult<()> {
    if limits.characteristic_id != spec.characteristic_id {
        return Err(SpcError::validation(format!(
            "limits for {} cannot drive monitor for {}",
            limits.characteristic_id, spec.characteristic_id
        )));
    }
    let expected = spec.chart.chart_type();
    if limits.chart_type != expected {
        return Err(SpcError::validation(format!(
            "{} limits cannot drive a {expected} monitor for {}",
            limits.chart_type, spec.characteristic_id
        )));
    }
    Ok(())
}

/// Multi-characteristic SPC engine.
///
/// Holds one [`CharacteristicMonitor`] per calibrated characteristic and a
/// shared [`ViolationAggregator`]. Batch operations over independent
/// characteristics run in parallel; results always come back in a
/// deterministic order.
#[derive(Debug)]
pub struct SpcEngine {
    config: EngineConfig,
    calculator: ControlLimitCalculator,
    analyzer: CapabilityAnalyzer,
    monitors: HashMap<CharacteristicId, CharacteristicMonitor>,
    violations: ViolationAggregator,
}

impl SpcEngine {
    /// # Errors
    ///
    /// Returns the first validation or configuration error in `config`.
    pub fn new(config: EngineConfig) -> SpcResult<Self> {
        config.validate()?;
        let calculator = ControlLimitCalculator::new(config.policy.clone());
        let analyzer = CapabilityAnalyzer::new(config.policy.clone());
        debug!(
            characteristics = config.characteristics.len(),
            "SPC engine configured"
        );
        Ok(Self {
            config,
            calculator,
            analyzer,
            monitors: HashMap::new(),
            violations: ViolationAggregator::new(),
        })
    }

    pub fn from_yaml_str(content: &str) -> SpcResult<Self> {
        Self::new(EngineConfig::from_yaml_str(content)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn monitor(&self, id: &CharacteristicId) -> Option<&CharacteristicMonitor> {
        self.monitors.get(id)
    }

    pub fn violations(&self) -> &ViolationAggregator {
        &self.violations
    }

    /// Removes and returns every aggregated violation.
    pub fn drain_violations(&mut self) -> Vec<ViolationRecord> {
        self.violations.drain()
    }

    fn spec(&self, id: &CharacteristicId) -> SpcResult<&CharacteristicSpec> {
        self.config
            .characteristic(id)
            .ok_or_else(|| SpcError::UnknownCharacteristic(id.to_string()))
    }

    /// Computes control limits for every configured characteristic in
    /// parallel, in configuration order.
    ///
    /// A characteristic without a baseline entry is computed on an empty
    /// series, which only succeeds for charts that need no data.
    pub fn compute_all_limits(
        &self,
        baselines: &HashMap<CharacteristicId, Vec<Measurement>>,
    ) -> Vec<(CharacteristicId, SpcResult<ControlLimits>)> {
        self.config
            .characteristics
            .par_iter()
            .map(|spec| {
                let baseline = baselines
                    .get(&spec.characteristic_id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                (
                    spec.characteristic_id.clone(),
                    self.calculator.compute(spec, baseline),
                )
            })
            .collect()
    }

    /// Capability analysis for every configured characteristic in parallel,
    /// in configuration order.
    pub fn capability_all(
        &self,
        samples: &HashMap<CharacteristicId, Vec<Measurement>>,
    ) -> Vec<(CharacteristicId, SpcResult<CapabilityResult>)> {
        self.config
            .characteristics
            .par_iter()
            .map(|spec| {
                let data = samples
                    .get(&spec.characteristic_id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                (
                    spec.characteristic_id.clone(),
                    self.analyzer.analyze_spec(spec, data),
                )
            })
            .collect()
    }

    /// Capability analysis for one characteristic.
    pub fn capability(
        &self,
        id: &CharacteristicId,
        samples: &[Measurement],
    ) -> SpcResult<CapabilityResult> {
        self.analyzer.analyze_spec(self.spec(id)?, samples)
    }

    /// Installs externally computed limits, creating or recalibrating the
    /// characteristic's monitor.
    pub fn install_limits(&mut self, limits: ControlLimits) -> SpcResult<LimitsRef> {
        let id = limits.characteristic_id.clone();
        let spec = self.spec(&id)?.clone();
        match self.monitors.get_mut(&id) {
            Some(monitor) => monitor.recalibrate(limits),
            None => {
                let monitor = CharacteristicMonitor::new(spec, limits)?;
                let reference = monitor.current_limits()?.reference();
                self.monitors.insert(id, monitor);
                Ok(reference)
            }
        }
    }

    /// Computes limits from `baseline` and installs them.
    pub fn calibrate(
        &mut self,
        id: &CharacteristicId,
        baseline: &[Measurement],
    ) -> SpcResult<LimitsRef> {
        let limits = self.calculator.compute(self.spec(id)?, baseline)?;
        self.install_limits(limits)
    }

    /// Computes limits for every characteristic in parallel, then installs
    /// each successful result.
    pub fn calibrate_all(
        &mut self,
        baselines: &HashMap<CharacteristicId, Vec<Measurement>>,
    ) -> Vec<(CharacteristicId, SpcResult<LimitsRef>)> {
        self.compute_all_limits(baselines)
            .into_iter()
            .map(|(id, limits)| {
                let installed = limits.and_then(|l| self.install_limits(l));
                (id, installed)
            })
            .collect()
    }

    /// Routes one record to its monitor and aggregates any violations.
    ///
    /// # Errors
    ///
    /// - [`SpcError::UnknownCharacteristic`] for an unconfigured id
    /// - [`SpcError::Validation`] if the characteristic has not been calibrated
    /// - any error from [`CharacteristicMonitor::submit`]
    pub fn submit(&mut self, record: &MeasurementRecord) -> SpcResult<MonitorOutcome> {
        let outcome = self
            .monitor_mut(&record.characteristic_id)?
            .submit(&record.measurement)?;
        self.collect(&outcome);
        Ok(outcome)
    }

    /// Submits a batch of records.
    ///
    /// Records are partitioned by characteristic and each stream is processed
    /// on the rayon pool in its original relative order. Results are returned
    /// in input order and violations are aggregated in that order, so the
    /// outcome matches submitting the records one by one.
    pub fn submit_batch(&mut self, records: &[MeasurementRecord]) -> Vec<SpcResult<MonitorOutcome>> {
        let mut results: Vec<Option<SpcResult<MonitorOutcome>>> = vec![None; records.len()];
        let mut streams: HashMap<CharacteristicId, Vec<(usize, &Measurement)>> = HashMap::new();

        for (pos, record) in records.iter().enumerate() {
            match self.monitor_mut(&record.characteristic_id) {
                Ok(_) => streams
                    .entry(record.characteristic_id.clone())
                    .or_default()
                    .push((pos, &record.measurement)),
                Err(e) => results[pos] = Some(Err(e)),
            }
        }

        let processed: Vec<Vec<(usize, SpcResult<MonitorOutcome>)>> = self
            .monitors
            .par_iter_mut()
            .filter_map(|(id, monitor)| streams.get(id).map(|stream| (monitor, stream)))
            .map(|(monitor, stream)| {
                stream
                    .iter()
                    .map(|(pos, m)| (*pos, monitor.submit(m)))
                    .collect()
            })
            .collect();

        for (pos, result) in processed.into_iter().flatten() {
            results[pos] = Some(result);
        }

        results
            .into_iter()
            .map(|r| {
                let r = r.unwrap_or_else(|| Err(SpcError::validation("record was not processed")));
                if let Ok(outcome) = &r {
                    self.collect(outcome);
                }
                r
            })
            .collect()
    }

    fn monitor_mut(&mut self, id: &CharacteristicId) -> SpcResult<&mut CharacteristicMonitor> {
        self.spec(id)?;
        self.monitors.get_mut(id).ok_or_else(|| {
            SpcError::validation(format!("{id} has no control limits; calibrate it first"))
        })
    }

    fn collect(&mut self, outcome: &MonitorOutcome) {
        let evidence = outcome.evidence();
        for v in outcome.violations() {
            self.violations.record(v.clone(), evidence);
        }
    }
}
