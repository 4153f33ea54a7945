use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use prom_api::{QueryData, TopQueries, TsdbStatus};

use crate::error::{ExplorerError, Result};

/// Day the TSDB status endpoint collects its stats for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsDate {
    /// Today, as decided by the backend
    #[default]
    Current,
    On(NaiveDate),
}

impl StatsDate {
    /// Query parameter value, `None` lets the backend pick today
    pub fn as_param(&self) -> Option<String> {
        match self {
            StatsDate::Current => None,
            StatsDate::On(date) => Some(date.format("%Y-%m-%d").to_string()),
        }
    }
}

impl fmt::Display for StatsDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsDate::Current => write!(f, "today"),
            StatsDate::On(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

impl std::str::FromStr for StatsDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("today") {
            return Ok(StatsDate::Current);
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(StatsDate::On)
    }
}

/// Read access to a Prometheus-compatible metrics backend.
///
/// Timestamps are unix seconds. Implementations do not enforce timeouts,
/// callers wrap each call with [`with_timeout`].
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Instant query evaluated at `eval_time`
    async fn query(&self, query: &str, eval_time: f64) -> Result<QueryData>;

    async fn query_range(&self, query: &str, start: f64, end: f64, step: f64)
    -> Result<QueryData>;

    /// Series counts for the selector (or the whole backend when `None`),
    /// broken down by metric name, label name and values of `focus_label`
    async fn series_cardinality_stats(
        &self,
        selector: Option<&str>,
        focus_label: &str,
        top_n: usize,
        date: StatsDate,
    ) -> Result<TsdbStatus>;

    /// Most expensive queries executed during the last `max_lifetime`
    async fn top_queries(&self, top_n: usize, max_lifetime: Duration) -> Result<TopQueries>;
}

/// Bound a backend call, turning expiry into [`ExplorerError::Timeout`]
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ExplorerError::Timeout(limit)),
    }
}
