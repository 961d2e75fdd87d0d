//! Input data model: measurements, subgroups, and characteristic identity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SpcError, SpcResult};
use crate::stats;

/// Identifier of a measured characteristic (one monitored stream).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacteristicId(String);

impl CharacteristicId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CharacteristicId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single recorded measurement. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgroup_id: Option<String>,
}

impl Measurement {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            subgroup_id: None,
        }
    }

    pub fn in_subgroup(mut self, subgroup_id: impl Into<String>) -> Self {
        self.subgroup_id = Some(subgroup_id.into());
        self
    }
}

/// A measurement addressed to a characteristic stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub characteristic_id: CharacteristicId,
    #[serde(flatten)]
    pub measurement: Measurement,
}

/// Measurements taken together under one subgroup id.
///
/// Mean and range are always recomputed from the member values.
#[derive(Debug, Clone, PartialEq)]
pub struct Subgroup {
    id: String,
    values: Vec<f64>,
    last_timestamp: DateTime<Utc>,
}

impl Subgroup {
    /// Builds a subgroup from raw values.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if `values` is empty or contains NaN/infinity.
    pub fn new(
        id: impl Into<String>,
        values: Vec<f64>,
        last_timestamp: DateTime<Utc>,
    ) -> SpcResult<Self> {
        let id = id.into();
        if values.is_empty() {
            return Err(SpcError::validation(format!("subgroup {id} is empty")));
        }
        if !values.iter().all(|v| v.is_finite()) {
            return Err(SpcError::validation(format!(
                "subgroup {id} contains a non-finite value"
            )));
        }
        Ok(Self {
            id,
            values,
            last_timestamp,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of measurements in the subgroup.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Timestamp of the latest member measurement.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.last_timestamp
    }

    pub fn mean(&self) -> f64 {
        stats::mean(&self.values).unwrap_or(f64::NAN)
    }

    pub fn range(&self) -> f64 {
        stats::range(&self.values).unwrap_or(0.0)
    }
}

/// Groups measurements by `subgroup_id`, preserving first-appearance order.
///
/// # Errors
///
/// - [`SpcError::Validation`] if `measurements` is empty, any measurement has
///   no subgroup id, or a value is non-finite.
pub fn group_subgroups(measurements: &[Measurement]) -> SpcResult<Vec<Subgroup>> {
    if measurements.is_empty() {
        return Err(SpcError::validation("measurement series is empty"));
    }
    let mut order: Vec<String> = Vec::new();
    let mut buckets: Vec<(Vec<f64>, DateTime<Utc>)> = Vec::new();

    for m in measurements {
        let id = m.subgroup_id.as_deref().ok_or_else(|| {
            SpcError::validation(format!(
                "measurement at {} has no subgroup_id",
                m.timestamp.to_rfc3339()
            ))
        })?;
        match order.iter().position(|existing| existing == id) {
            Some(pos) => {
                let (values, ts) = &mut buckets[pos];
                values.push(m.value);
                if m.timestamp > *ts {
                    *ts = m.timestamp;
                }
            }
            None => {
                order.push(id.to_string());
                buckets.push((vec![m.value], m.timestamp));
            }
        }
    }

    order
        .into_iter()
        .zip(buckets)
        .map(|(id, (values, ts))| Subgroup::new(id, values, ts))
        .collect()
}

/// Extracts raw values, rejecting empty or non-finite series.
pub(crate) fn finite_values(measurements: &[Measurement]) -> SpcResult<Vec<f64>> {
    if measurements.is_empty() {
        return Err(SpcError::validation("measurement series is empty"));
    }
    measurements
        .iter()
        .map(|m| {
            if m.value.is_finite() {
                Ok(m.value)
            } else {
                Err(SpcError::validation(format!(
                    "non-finite value at {}",
                    m.timestamp.to_rfc3339()
                )))
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::Measurement;

    pub fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(i)
    }

    pub fn series(values: &[f64]) -> Vec<Measurement> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Measurement::new(t(i as i64), v))
            .collect()
    }

    /// Measurements with subgroup ids `g0`, `g1`, ... in chunks of `n`.
    pub fn subgrouped(values: &[f64], n: usize) -> Vec<Measurement> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Measurement::new(t(i as i64), v).in_subgroup(format!("g{}", i / n)))
            .collect()
    }
}
