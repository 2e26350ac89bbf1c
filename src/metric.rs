//! Metric value types
//!
//! A metric is identified by its name *and* its kind: a gauge and a counter
//! may share a name and still be independent entries.
//!
//! The value is a tagged [`MetricValue`], so the kind of a metric is always
//! derived from its value and the two can never disagree.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageResult, StoreError};

/// The two kinds of metric the store understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Instantaneous value, replaced on every update
    Gauge,

    /// Accumulating value, every update is added to it
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(StoreError::Decode(format!("unknown metric type: {other}"))),
        }
    }
}

/// A metric value, tagged with its kind
///
/// For counters the value carried by an update is a *delta*; the stored
/// value is the running total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Apply `incoming` on top of `self`
    ///
    /// Gauges are replaced, counters are summed. A sum that leaves the `i64`
    /// range is rejected and the stored total stays as it was.
    pub fn merge(self, name: &str, incoming: MetricValue) -> StorageResult<MetricValue> {
        match (self, incoming) {
            (MetricValue::Gauge(_), MetricValue::Gauge(new)) => Ok(MetricValue::Gauge(new)),
            (MetricValue::Counter(total), MetricValue::Counter(delta)) => total
                .checked_add(delta)
                .map(MetricValue::Counter)
                .ok_or_else(|| StoreError::CounterOverflow {
                    name: name.to_string(),
                }),
            (stored, incoming) => Err(StoreError::TypeMismatch {
                name: name.to_string(),
                expected: incoming.kind(),
                found: stored.kind(),
            }),
        }
    }

    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            MetricValue::Gauge(v) => Some(*v),
            MetricValue::Counter(_) => None,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self {
            MetricValue::Counter(v) => Some(*v),
            MetricValue::Gauge(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(v) => write!(f, "{v}"),
        }
    }
}

/// Composite storage key: `(name, kind)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Recover a key from its `"<name>_<kind>"` rendering
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, kind) = raw.rsplit_once('_')?;
        let kind = kind.parse().ok()?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, kind))
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.kind)
    }
}

/// A named metric as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    value: MetricValue,
}

impl Metric {
    /// Create a metric, rejecting an empty name
    pub fn new(name: impl Into<String>, value: MetricValue) -> StorageResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, value })
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> StorageResult<Self> {
        Self::new(name, MetricValue::Gauge(value))
    }

    pub fn counter(name: impl Into<String>, value: i64) -> StorageResult<Self> {
        Self::new(name, MetricValue::Counter(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.name.clone(), self.kind())
    }
}

pub(crate) fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidMetric(
            "metric name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Check everything an incoming update must satisfy before it is stored
///
/// Gauges must be finite: NaN and infinities have no JSON or SQL encoding
/// that reads back as the same value.
pub(crate) fn validate_update(name: &str, value: MetricValue) -> StorageResult<()> {
    validate_name(name)?;
    if let MetricValue::Gauge(v) = value {
        if !v.is_finite() {
            return Err(StoreError::InvalidMetric(format!(
                "gauge {name} must be finite, got {v}"
            )));
        }
    }
    Ok(())
}

/// Point-in-time copy of every stored metric
///
/// Keys are kept ordered so that snapshot files are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    metrics: BTreeMap<MetricKey, MetricValue>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value stored for `name`; the kind comes from the value tag
    pub fn insert(&mut self, name: impl Into<String>, value: MetricValue) -> Option<MetricValue> {
        self.metrics.insert(MetricKey::new(name, value.kind()), value)
    }

    pub fn push(&mut self, metric: Metric) {
        let key = metric.key();
        self.metrics.insert(key, metric.value);
    }

    pub fn get(&self, name: &str, kind: MetricKind) -> Option<MetricValue> {
        self.metrics.get(&MetricKey::new(name, kind)).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, &MetricValue)> {
        self.metrics.iter()
    }

    /// Consume the snapshot, yielding named metrics in key order
    pub fn into_metrics(self) -> impl Iterator<Item = Metric> {
        self.metrics
            .into_iter()
            .map(|(key, value)| Metric {
                name: key.name,
                value,
            })
    }
}

impl FromIterator<Metric> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for metric in iter {
            snapshot.push(metric);
        }
        snapshot
    }
}
