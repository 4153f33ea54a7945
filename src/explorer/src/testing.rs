//! Scripted [`QueryBackend`] for engine tests.
//!
//! Instant and range queries are answered by the longest registered pattern
//! contained in the query text. Unmatched queries fail with an API error so a
//! missing script shows up as an absent value rather than a hang.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use prom_api::{NameValue, QueryData, ResultType, TopQueries, TsdbStatus};
use serde_json::json;

use crate::backend::{QueryBackend, StatsDate};
use crate::error::{ExplorerError, Result};

#[derive(Debug, Clone)]
enum Scripted {
    Data(QueryData),
    Fail(String),
    Hang,
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    queries: Vec<(String, Scripted)>,
    stats: HashMap<(Option<String>, String), TsdbStatus>,
    top_queries: Option<TopQueries>,
    unavailable: bool,
    calls: Mutex<Vec<String>>,
}

/// Vector result with one series per value, evaluated at t=0
pub fn vector(values: &[&str]) -> QueryData {
    let result = values
        .iter()
        .map(|v| json!({"metric": {}, "value": [0, v]}))
        .collect::<Vec<_>>();
    QueryData {
        result_type: ResultType::Vector,
        result: serde_json::Value::Array(result),
    }
}

fn name_values(entries: &[(&str, u64)]) -> Vec<NameValue> {
    entries
        .iter()
        .map(|(name, value)| NameValue {
            name: name.to_string(),
            value: *value,
        })
        .collect()
}

/// TSDB status of a single metric
pub fn metric_stats(
    metric: &str,
    total: u64,
    focus_values: &[(&str, u64)],
    unique_values_by_label: &[(&str, u64)],
) -> TsdbStatus {
    TsdbStatus {
        total_series: total,
        series_count_by_metric_name: if total == 0 {
            Vec::new()
        } else {
            name_values(&[(metric, total)])
        },
        series_count_by_focus_label_value: name_values(focus_values),
        label_value_count_by_label_name: name_values(unique_values_by_label),
        ..Default::default()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, pattern: &str, data: QueryData) -> Self {
        self.queries
            .push((pattern.to_string(), Scripted::Data(data)));
        self
    }

    /// Single-series vector answer
    pub fn with_value(self, pattern: &str, value: &str) -> Self {
        self.with_data(pattern, vector(&[value]))
    }

    pub fn with_empty(self, pattern: &str) -> Self {
        self.with_data(pattern, vector(&[]))
    }

    pub fn with_failure(mut self, pattern: &str, message: &str) -> Self {
        self.queries
            .push((pattern.to_string(), Scripted::Fail(message.to_string())));
        self
    }

    /// Matching queries never complete
    pub fn with_hang(mut self, pattern: &str) -> Self {
        self.queries.push((pattern.to_string(), Scripted::Hang));
        self
    }

    /// Status answer for an exact selector (`None` for the whole backend)
    /// and focus label
    pub fn with_stats(mut self, selector: Option<&str>, focus_label: &str, stats: TsdbStatus) -> Self {
        self.stats.insert(
            (selector.map(str::to_string), focus_label.to_string()),
            stats,
        );
        self
    }

    pub fn with_top_queries(mut self, top: TopQueries) -> Self {
        self.top_queries = Some(top);
        self
    }

    /// Every call fails as if the backend could not be reached
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Query texts and status selectors seen so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(ExplorerError::BackendUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    async fn answer(&self, query: &str) -> Result<QueryData> {
        self.record(query.to_string());
        self.check_available()?;

        let scripted = self
            .queries
            .iter()
            .filter(|(pattern, _)| query.contains(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, scripted)| scripted.clone());

        match scripted {
            Some(Scripted::Data(data)) => Ok(data),
            Some(Scripted::Fail(message)) => Err(ExplorerError::Api {
                status: 422,
                message,
            }),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(ExplorerError::Api {
                status: 400,
                message: format!("no scripted answer for {query}"),
            }),
        }
    }
}

#[async_trait]
impl QueryBackend for FakeBackend {
    async fn query(&self, query: &str, _eval_time: f64) -> Result<QueryData> {
        self.answer(query).await
    }

    async fn query_range(
        &self,
        query: &str,
        _start: f64,
        _end: f64,
        _step: f64,
    ) -> Result<QueryData> {
        self.answer(query).await
    }

    async fn series_cardinality_stats(
        &self,
        selector: Option<&str>,
        focus_label: &str,
        _top_n: usize,
        _date: StatsDate,
    ) -> Result<TsdbStatus> {
        self.record(format!(
            "status {} by {focus_label}",
            selector.unwrap_or("*")
        ));
        self.check_available()?;

        let key = (selector.map(str::to_string), focus_label.to_string());
        // unknown selectors have no series
        Ok(self.stats.get(&key).cloned().unwrap_or_default())
    }

    async fn top_queries(&self, _top_n: usize, _max_lifetime: Duration) -> Result<TopQueries> {
        self.record("top queries".to_string());
        self.check_available()?;

        Ok(self.top_queries.clone().unwrap_or_default())
    }
}
