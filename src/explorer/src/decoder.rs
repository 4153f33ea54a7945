//! Decoding of query results into samples.
//!
//! Instant queries answer with a vector, range queries with a matrix and
//! some functions with a bare scalar. All of them are flattened into one
//! [`Sample`] per series, carrying the series' first data point.

use prom_api::{QueryData, ResultType};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("{result_type} result is not a JSON array")]
    NotAnArray { result_type: &'static str },
    #[error("series {index} carries no data point")]
    MissingPoint { index: usize },
    #[error("data point of series {index} has no timestamp")]
    MissingTimestamp { index: usize },
    #[error("data point of series {index} has no value")]
    MissingValue { index: usize },
    #[error("data point of series {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },
    #[error("sample value '{0}' is not a number")]
    InvalidNumber(String),
    #[error("sample value '{0}' is not a non-negative count")]
    InvalidCount(String),
    #[error("expected a boolean result (0 or 1), got '{0}'")]
    NotBoolean(String),
}

/// A single `(timestamp, value)` data point. The value keeps the backend's
/// string encoding until the caller decides how to interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Unix seconds, possibly fractional
    pub timestamp: f64,
    pub value: String,
}

impl Sample {
    pub fn new(timestamp: f64, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }

    pub fn as_f64(&self) -> Result<f64, DecodeError> {
        self.value
            .trim()
            .parse::<f64>()
            .map_err(|_| DecodeError::InvalidNumber(self.value.clone()))
    }

    /// Series counts and similar; fractional parts are truncated
    pub fn as_count(&self) -> Result<u64, DecodeError> {
        let value = self.as_f64()?;
        if !value.is_finite() || value < 0.0 {
            return Err(DecodeError::InvalidCount(self.value.clone()));
        }
        Ok(value as u64)
    }

    /// Results of `!= bool` comparisons
    pub fn as_bool(&self) -> Result<bool, DecodeError> {
        match self.as_f64() {
            Ok(v) if v == 0.0 => Ok(false),
            Ok(v) if v == 1.0 => Ok(true),
            _ => Err(DecodeError::NotBoolean(self.value.clone())),
        }
    }
}

pub fn decode(data: &QueryData) -> Result<Vec<Sample>, DecodeError> {
    match data.result_type {
        ResultType::Scalar | ResultType::String => match &data.result {
            Value::Null => Ok(Vec::new()),
            point => Ok(vec![decode_point(point, 0)?]),
        },
        ResultType::Vector | ResultType::Matrix => {
            let series = match &data.result {
                Value::Null => return Ok(Vec::new()),
                Value::Array(series) => series,
                _ => {
                    return Err(DecodeError::NotAnArray {
                        result_type: data.result_type.as_str(),
                    });
                }
            };

            series
                .iter()
                .enumerate()
                .map(|(index, series)| decode_series(series, index))
                .collect()
        }
    }
}

/// Decodes and returns the first sample, if any
pub fn first_sample(data: &QueryData) -> Result<Option<Sample>, DecodeError> {
    Ok(decode(data)?.into_iter().next())
}

// Vector series carry `value`, matrix series `values`. Either is accepted for
// both result types.
fn decode_series(series: &Value, index: usize) -> Result<Sample, DecodeError> {
    if let Some(point) = series.get("value") {
        return decode_point(point, index);
    }

    match series.get("values") {
        Some(Value::Array(points)) => match points.first() {
            Some(point) => decode_point(point, index),
            None => Err(DecodeError::MissingPoint { index }),
        },
        Some(_) => Err(DecodeError::Malformed {
            index,
            reason: "'values' is not an array".to_string(),
        }),
        None => Err(DecodeError::MissingPoint { index }),
    }
}

fn decode_point(point: &Value, index: usize) -> Result<Sample, DecodeError> {
    let Value::Array(pair) = point else {
        return Err(DecodeError::Malformed {
            index,
            reason: format!("expected [timestamp, value], got {point}"),
        });
    };

    let timestamp = match pair.first() {
        None | Some(Value::Null) => return Err(DecodeError::MissingTimestamp { index }),
        Some(Value::Number(ts)) => ts.as_f64().ok_or_else(|| DecodeError::Malformed {
            index,
            reason: format!("timestamp {ts} out of range"),
        })?,
        Some(other) => {
            return Err(DecodeError::Malformed {
                index,
                reason: format!("timestamp {other} is not a number"),
            });
        }
    };

    let value = match pair.get(1) {
        None | Some(Value::Null) => return Err(DecodeError::MissingValue { index }),
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        Some(other) => {
            return Err(DecodeError::Malformed {
                index,
                reason: format!("value {other} is neither a string nor a number"),
            });
        }
    };

    Ok(Sample { timestamp, value })
}
