//! Metric data model and its JSON wire form.
//!
//! On the wire a metric is `{"id": .., "type": "gauge"|"counter", "value"?: f64, "delta"?: i64}`.
//! In memory the kind and its payload are one enum, so a gauge without a value (or a counter
//! carrying a float) cannot be represented once decoding succeeded.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    #[error("metric id is empty")]
    EmptyId,
    #[error("unknown metric type `{0}`")]
    UnknownKind(String),
    #[error("{kind} metric `{id}` carries no {field}")]
    MissingValue { id: String, kind: MetricKind, field: &'static str },
    #[error("{kind} metric `{id}` must not carry {field}")]
    UnexpectedValue { id: String, kind: MetricKind, field: &'static str },
    #[error("invalid {kind} value `{raw}`")]
    InvalidValue { kind: MetricKind, raw: String },
    #[error("metric `{id}` is a {stored}, not a {incoming}")]
    KindMismatch { id: String, stored: MetricKind, incoming: MetricKind },
    #[error("counter `{0}` overflowed")]
    Overflow(String),
    #[error("malformed metric payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
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
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_owned())),
        }
    }
}

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
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// A single gauge or counter sample, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self { id: id.into(), value: MetricValue::Gauge(value) }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self { id: id.into(), value: MetricValue::Counter(delta) }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Builds a metric from the textual path form `/update/{type}/{id}/{value}`.
    pub fn parse(kind: &str, id: &str, raw: &str) -> Result<Self, MetricError> {
        let kind: MetricKind = kind.parse()?;
        let invalid = || MetricError::InvalidValue { kind, raw: raw.to_owned() };
        let value = match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                MetricValue::Gauge(v)
            }
            MetricKind::Counter => MetricValue::Counter(raw.parse().map_err(|_| invalid())?),
        };
        let metric = Self { id: id.to_owned(), value };
        metric.validate()?;
        Ok(metric)
    }

    pub fn validate(&self) -> Result<(), MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        Ok(())
    }

    /// Folds `incoming` into `self`: gauges take the new value, counters add the delta.
    /// On a kind mismatch `self` is left untouched.
    pub fn merge(&mut self, incoming: &Metric) -> Result<(), MetricError> {
        match (&mut self.value, incoming.value) {
            (MetricValue::Gauge(v), MetricValue::Gauge(new)) => *v = new,
            (MetricValue::Counter(d), MetricValue::Counter(add)) => {
                *d = d.checked_add(add).ok_or_else(|| MetricError::Overflow(self.id.clone()))?;
            }
            (stored, incoming_value) => {
                return Err(MetricError::KindMismatch {
                    id: self.id.clone(),
                    stored: stored.kind(),
                    incoming: incoming_value.kind(),
                })
            }
        }
        Ok(())
    }
}

/// Lookup body for `POST /value/`: id and type only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MetricQuery {
    pub fn kind(&self) -> Result<MetricKind, MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        self.kind.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMetric {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
}

impl TryFrom<WireMetric> for Metric {
    type Error = MetricError;

    fn try_from(w: WireMetric) -> Result<Self, Self::Error> {
        if w.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let kind: MetricKind = w.kind.parse()?;
        let value = match kind {
            MetricKind::Gauge => {
                if w.delta.is_some() {
                    return Err(MetricError::UnexpectedValue { id: w.id, kind, field: "delta" });
                }
                let v = w.value.ok_or(MetricError::MissingValue { id: w.id.clone(), kind, field: "value" })?;
                MetricValue::Gauge(v)
            }
            MetricKind::Counter => {
                if w.value.is_some() {
                    return Err(MetricError::UnexpectedValue { id: w.id, kind, field: "value" });
                }
                let d = w.delta.ok_or(MetricError::MissingValue { id: w.id.clone(), kind, field: "delta" })?;
                MetricValue::Counter(d)
            }
        };
        Ok(Metric { id: w.id, value })
    }
}

impl From<Metric> for WireMetric {
    fn from(m: Metric) -> Self {
        let (value, delta) = match m.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        };
        WireMetric { id: m.id, kind: m.value.kind().as_str().to_owned(), value, delta }
    }
}

pub fn decode_batch(body: &[u8]) -> Result<Vec<Metric>, MetricError> {
    serde_json::from_slice(body).map_err(|e| MetricError::Decode(e.to_string()))
}

pub fn decode_one(body: &[u8]) -> Result<Metric, MetricError> {
    serde_json::from_slice(body).map_err(|e| MetricError::Decode(e.to_string()))
}

pub fn decode_query(body: &[u8]) -> Result<MetricQuery, MetricError> {
    serde_json::from_slice(body).map_err(|e| MetricError::Decode(e.to_string()))
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, MetricError> {
    serde_json::to_vec(value).map_err(|e| MetricError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mixed_batch_in_order() {
        let body = br#"[{"id":"cpu","type":"gauge","value":0.5},{"id":"hits","type":"counter","delta":3}]"#;
        let batch = decode_batch(body).unwrap();
        assert_eq!(batch, vec![Metric::gauge("cpu", 0.5), Metric::counter("hits", 3)]);
    }

    #[test]
    fn wire_form_omits_absent_field() {
        let json = String::from_utf8(encode(&Metric::counter("hits", 7)).unwrap()).unwrap();
        assert_eq!(json, r#"{"id":"hits","type":"counter","delta":7}"#);
        let json = String::from_utf8(encode(&Metric::gauge("cpu", 0.25)).unwrap()).unwrap();
        assert_eq!(json, r#"{"id":"cpu","type":"gauge","value":0.25}"#);
    }

    #[test]
    fn rejects_mismatched_fields() {
        assert!(decode_one(br#"{"id":"cpu","type":"gauge","delta":1}"#).is_err());
        assert!(decode_one(br#"{"id":"hits","type":"counter","value":1.0}"#).is_err());
        assert!(decode_one(br#"{"id":"cpu","type":"gauge"}"#).is_err());
        assert!(decode_one(br#"{"id":"x","type":"histogram","value":1.0}"#).is_err());
        assert!(decode_one(br#"{"id":"","type":"gauge","value":1.0}"#).is_err());
        assert!(decode_one(b"not json").is_err());
    }

    #[test]
    fn gauge_merge_is_idempotent() {
        let mut stored = Metric::gauge("cpu", 0.5);
        let update = Metric::gauge("cpu", 0.8);
        stored.merge(&update).unwrap();
        stored.merge(&update).unwrap();
        assert_eq!(stored.value, MetricValue::Gauge(0.8));
    }

    #[test]
    fn counter_merge_accumulates() {
        let deltas = [10, 5, -3, 40];
        let mut forward = Metric::counter("hits", 0);
        for d in deltas { forward.merge(&Metric::counter("hits", d)).unwrap(); }
        let mut backward = Metric::counter("hits", 0);
        for d in deltas.iter().rev() { backward.merge(&Metric::counter("hits", *d)).unwrap(); }
        assert_eq!(forward.value, MetricValue::Counter(52));
        assert_eq!(forward, backward);
    }

    #[test]
    fn kind_mismatch_leaves_stored_untouched() {
        let mut stored = Metric::gauge("cpu", 0.5);
        let err = stored.merge(&Metric::counter("cpu", 1)).unwrap_err();
        assert!(matches!(err, MetricError::KindMismatch { stored: MetricKind::Gauge, .. }));
        assert_eq!(stored, Metric::gauge("cpu", 0.5));
    }

    #[test]
    fn counter_overflow_is_an_error() {
        let mut stored = Metric::counter("hits", i64::MAX);
        assert_eq!(stored.merge(&Metric::counter("hits", 1)), Err(MetricError::Overflow("hits".into())));
        assert_eq!(stored.value, MetricValue::Counter(i64::MAX));
    }

    #[test]
    fn parses_path_form() {
        assert_eq!(Metric::parse("gauge", "cpu", "0.8").unwrap(), Metric::gauge("cpu", 0.8));
        assert_eq!(Metric::parse("counter", "hits", "5").unwrap(), Metric::counter("hits", 5));
        assert!(Metric::parse("counter", "hits", "5.5").is_err());
        assert!(Metric::parse("gauge", "cpu", "NaN").is_err());
        assert!(Metric::parse("summary", "cpu", "1").is_err());
        assert!(Metric::parse("gauge", "", "1").is_err());
    }

    #[test]
    fn value_display_matches_plain_text_form() {
        assert_eq!(MetricValue::Gauge(0.8).to_string(), "0.8");
        assert_eq!(MetricValue::Gauge(10.0).to_string(), "10");
        assert_eq!(MetricValue::Counter(-4).to_string(), "-4");
    }
}
