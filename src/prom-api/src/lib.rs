use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Envelope wrapping every `/api/v1/*` response
/// See <https://prometheus.io/docs/prometheus/latest/querying/api/#format-overview>
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ApiResponse<T> {
    pub status: Status,
    pub data: Option<T>,
    #[serde(rename = "errorType")]
    pub error_type: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload of a successful response
    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.status, self.data) {
            (Status::Success, Some(data)) => Ok(data),
            (Status::Success, None) => Err(ApiError {
                error_type: "bad_response".to_string(),
                message: "response has status success but carries no data".to_string(),
            }),
            (Status::Error, _) => Err(ApiError {
                error_type: self.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: self.error.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Error reported by the backend inside an `ApiResponse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub error_type: String,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Shape of the `result` field of a query response
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Vector,
    Matrix,
    Scalar,
    String,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Vector => "vector",
            ResultType::Matrix => "matrix",
            ResultType::Scalar => "scalar",
            ResultType::String => "string",
        }
    }
}

impl FromStr for ResultType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(ResultType::Vector),
            "matrix" => Ok(ResultType::Matrix),
            "scalar" => Ok(ResultType::Scalar),
            "string" => Ok(ResultType::String),
            _ => Err(()),
        }
    }
}

/// Data of `/api/v1/query` and `/api/v1/query_range`.
///
/// The layout of `result` depends on `result_type`, so it is kept as raw JSON
/// and interpreted by the consumer:
///
/// * vector: `[{"metric": {...}, "value": [1700000000.123, "42"]}]`
/// * matrix: `[{"metric": {...}, "values": [[1700000000, "1"], ...]}]`
/// * scalar / string: `[1700000000.123, "42"]`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: ResultType,
    pub result: serde_json::Value,
}

/// GET /api/v1/query
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstantQueryParams {
    pub query: String,
    /// Evaluation timestamp (unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

/// GET /api/v1/query_range
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RangeQueryParams {
    pub query: String,
    /// Start timestamp (unix seconds)
    pub start: f64,
    /// End timestamp (unix seconds)
    pub end: f64,
    /// Resolution step in seconds
    pub step: f64,
}

/// GET /api/v1/status/tsdb (VictoriaMetrics flavour with `match[]` and `focusLabel`)
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TsdbStatusParams {
    #[serde(rename = "topN")]
    pub top_n: usize,
    /// Day to collect stats for, formatted `YYYY-MM-DD`. Today when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "focusLabel", skip_serializing_if = "Option::is_none")]
    pub focus_label: Option<String>,
    #[serde(rename = "match[]", skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// A `{"name": ..., "value": ...}` entry of the TSDB status breakdowns
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NameValue {
    pub name: String,
    pub value: u64,
}

/// Data of GET /api/v1/status/tsdb
///
/// Example:
/// {
///   "totalSeries": 50000,
///   "totalLabelValuePairs": 210000,
///   "seriesCountByMetricName": [{"name": "http_requests_total", "value": 50000}],
///   "seriesCountByLabelName": [{"name": "job", "value": 50000}],
///   "seriesCountByFocusLabelValue": [{"name": "api", "value": 31000}],
///   "seriesCountByLabelValuePair": [{"name": "job=api", "value": 31000}],
///   "labelValueCountByLabelName": [{"name": "instance", "value": 120}]
/// }
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TsdbStatus {
    pub total_series: u64,
    pub total_label_value_pairs: u64,
    pub series_count_by_metric_name: Vec<NameValue>,
    pub series_count_by_label_name: Vec<NameValue>,
    pub series_count_by_focus_label_value: Vec<NameValue>,
    pub series_count_by_label_value_pair: Vec<NameValue>,
    pub label_value_count_by_label_name: Vec<NameValue>,
}

/// GET /api/v1/status/top_queries
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TopQueriesParams {
    #[serde(rename = "topN")]
    pub top_n: usize,
    /// Only queries executed during this many seconds are considered
    #[serde(rename = "maxLifetime")]
    pub max_lifetime: String,
}

/// Result of GET /api/v1/status/top_queries. Not wrapped in an `ApiResponse`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TopQueries {
    pub max_lifetime: Option<String>,
    pub last_queries_count: Option<u64>,
    pub top_by_count: Vec<QueryStat>,
    pub top_by_avg_duration: Vec<QueryStat>,
    pub top_by_sum_duration: Vec<QueryStat>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryStat {
    pub query: String,
    pub time_range_seconds: f64,
    pub avg_duration_seconds: Option<f64>,
    pub sum_duration_seconds: Option<f64>,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_response() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [{"metric": {}, "value": [1700000000.5, "42"]}]
            }
        }"#;

        let resp: ApiResponse<QueryData> = serde_json::from_str(body).unwrap();
        let data = resp.into_result().unwrap();

        assert_eq!(data.result_type, ResultType::Vector);
        assert_eq!(data.result[0]["value"][1], "42");
    }

    #[test]
    fn test_error_response() {
        let body = r#"{
            "status": "error",
            "errorType": "bad_data",
            "error": "unknown function tlast_change_over_time"
        }"#;

        let resp: ApiResponse<QueryData> = serde_json::from_str(body).unwrap();
        let err = resp.into_result().unwrap_err();

        assert_eq!(err.error_type, "bad_data");
        assert_eq!(err.message, "unknown function tlast_change_over_time");
        assert_eq!(
            err.to_string(),
            "bad_data: unknown function tlast_change_over_time"
        );
    }

    #[test]
    fn test_success_without_data() {
        let resp: ApiResponse<QueryData> =
            serde_json::from_str(r#"{"status": "success"}"#).unwrap();

        assert_eq!(resp.into_result().unwrap_err().error_type, "bad_response");
    }

    #[test]
    fn test_tsdb_status() {
        let body = r#"{
            "status": "success",
            "data": {
                "totalSeries": 50000,
                "totalLabelValuePairs": 210000,
                "seriesCountByMetricName": [{"name": "http_requests_total", "value": 50000}],
                "seriesCountByFocusLabelValue": [
                    {"name": "api", "value": 31000},
                    {"name": "web", "value": 19000}
                ],
                "labelValueCountByLabelName": [
                    {"name": "__name__", "value": 1},
                    {"name": "instance", "value": 120}
                ]
            }
        }"#;

        let resp: ApiResponse<TsdbStatus> = serde_json::from_str(body).unwrap();
        let status = resp.into_result().unwrap();

        assert_eq!(status.total_series, 50000);
        assert_eq!(status.series_count_by_metric_name[0].value, 50000);
        assert_eq!(status.series_count_by_focus_label_value.len(), 2);
        assert_eq!(status.label_value_count_by_label_name[1].name, "instance");
        assert!(status.series_count_by_label_value_pair.is_empty());
    }

    #[test]
    fn test_top_queries() {
        let body = r#"{
            "topN": "2",
            "maxLifetime": "1h0m0s",
            "lastQueriesCount": 17,
            "topByAvgDuration": [
                {"query": "sum(rate(x[5m]))", "timeRangeSeconds": 3600, "avgDurationSeconds": 0.25, "count": 4}
            ]
        }"#;

        let top: TopQueries = serde_json::from_str(body).unwrap();

        assert_eq!(top.max_lifetime.as_deref(), Some("1h0m0s"));
        assert_eq!(top.last_queries_count, Some(17));
        assert_eq!(top.top_by_avg_duration[0].avg_duration_seconds, Some(0.25));
        assert_eq!(top.top_by_avg_duration[0].count, 4);
        assert!(top.top_by_count.is_empty());
    }

    #[test]
    fn test_tsdb_params_serialization() {
        let params = TsdbStatusParams {
            top_n: 20,
            date: None,
            focus_label: Some("job".to_string()),
            selector: Some("up".to_string()),
        };

        let json = serde_json::to_value(&params).unwrap();

        assert_eq!(json["topN"], 20);
        assert_eq!(json["focusLabel"], "job");
        assert_eq!(json["match[]"], "up");
        assert!(json.get("date").is_none());
    }

    #[test]
    fn test_result_type() {
        assert_eq!("matrix".parse::<ResultType>(), Ok(ResultType::Matrix));
        assert_eq!(ResultType::Scalar.as_str(), "scalar");
        assert!("histogram".parse::<ResultType>().is_err());
    }
}
