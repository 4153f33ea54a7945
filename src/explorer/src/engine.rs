use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use prom_api::{TopQueries, TsdbStatus};

use crate::backend::{QueryBackend, StatsDate, with_timeout};
use crate::decoder::{self, Sample};
use crate::error::Result;
use crate::template::{QueryBuilder, QueryParams, Template};

/// Default bound on every backend call
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Shared entry point of the analyses: a backend, the template cache and the
/// call timeout. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct Explorer {
    backend: Arc<dyn QueryBackend>,
    queries: Arc<QueryBuilder>,
    api_timeout: Duration,
}

impl Explorer {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            backend,
            queries: Arc::new(QueryBuilder::new()),
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }

    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    pub fn api_timeout(&self) -> Duration {
        self.api_timeout
    }

    pub fn queries(&self) -> &QueryBuilder {
        &self.queries
    }

    /// Render a template and run it as an instant query
    pub async fn run(
        &self,
        template: Template,
        params: &QueryParams,
        eval_time: f64,
    ) -> Result<Vec<Sample>> {
        let query = self.queries.build(template, params)?;
        self.instant(&query, eval_time).await
    }

    /// Like [`Explorer::run`], keeping only the first sample
    pub async fn run_first(
        &self,
        template: Template,
        params: &QueryParams,
        eval_time: f64,
    ) -> Result<Option<Sample>> {
        Ok(self.run(template, params, eval_time).await?.into_iter().next())
    }

    pub async fn instant(&self, query: &str, eval_time: f64) -> Result<Vec<Sample>> {
        log::debug!("Instant query at {eval_time}: {query}");
        let data = with_timeout(self.api_timeout, self.backend.query(query, eval_time)).await?;
        Ok(decoder::decode(&data)?)
    }

    pub async fn range(&self, query: &str, start: f64, end: f64, step: f64) -> Result<Vec<Sample>> {
        log::debug!("Range query [{start}, {end}] step {step}: {query}");
        let data = with_timeout(
            self.api_timeout,
            self.backend.query_range(query, start, end, step),
        )
        .await?;
        Ok(decoder::decode(&data)?)
    }

    pub async fn stats(
        &self,
        selector: Option<&str>,
        focus_label: &str,
        top_n: usize,
        date: StatsDate,
    ) -> Result<TsdbStatus> {
        log::debug!(
            "TSDB status for {} focused on {focus_label} ({date})",
            selector.unwrap_or("all series")
        );
        with_timeout(
            self.api_timeout,
            self.backend
                .series_cardinality_stats(selector, focus_label, top_n, date),
        )
        .await
    }

    pub async fn top_queries(&self, top_n: usize, max_lifetime: Duration) -> Result<TopQueries> {
        with_timeout(self.api_timeout, self.backend.top_queries(top_n, max_lifetime)).await
    }
}

pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Evaluation timestamp `lag` before `now`
pub fn eval_time_at(now: DateTime<Utc>, lag: Duration) -> f64 {
    unix_seconds(now) - lag.as_secs_f64()
}
