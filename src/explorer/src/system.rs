//! Backend-wide overview.

use std::time::Duration;

use chrono::Utc;
use prom_api::QueryStat;

use crate::backend::StatsDate;
use crate::engine::{Explorer, eval_time_at};
use crate::error::Result;
use crate::template::{QueryParams, Template};

#[derive(Debug, Clone)]
pub struct SystemOptions {
    /// Top metrics by series count for the given day
    pub cardinality: Option<StatsDate>,
    pub top_n: usize,
    pub focus_label: String,
    pub churn_rate: bool,
    /// Top queries executed within this lifetime
    pub top_queries: Option<Duration>,
    pub lag: Duration,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            cardinality: None,
            top_n: 20,
            focus_label: "job".to_string(),
            churn_rate: false,
            top_queries: None,
            lag: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricShare {
    pub name: String,
    pub series: u64,
    /// Share of all series, rounded to two decimals
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystemReport {
    pub total_series: Option<u64>,
    pub top_metrics: Vec<MetricShare>,
    pub churn_rate: Option<f64>,
    pub top_queries: Option<Vec<QueryStat>>,
}

pub fn share_percent(series: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = series as f64 * 100.0 / total as f64;
    (percent * 100.0).round() / 100.0
}

pub async fn system_overview(explorer: &Explorer, options: &SystemOptions) -> Result<SystemReport> {
    let mut report = SystemReport::default();

    if let Some(date) = options.cardinality {
        let stats = explorer
            .stats(None, &options.focus_label, options.top_n, date)
            .await?;

        let total = stats.total_series;
        report.total_series = Some(total);
        report.top_metrics = stats
            .series_count_by_metric_name
            .into_iter()
            .map(|entry| MetricShare {
                percent: share_percent(entry.value, total),
                name: entry.name,
                series: entry.value,
            })
            .collect();
    }

    if options.churn_rate {
        let eval = eval_time_at(Utc::now(), options.lag);
        // the query does not reference any field
        let params = QueryParams::new("");
        let churn = explorer
            .run_first(Template::SystemChurnRate, &params, eval)
            .await
            .and_then(|sample| Ok(sample.map(|s| s.as_f64()).transpose()?));
        match churn {
            Ok(Some(rate)) => report.churn_rate = Some(rate),
            Ok(None) => log::warn!("No data for the system churn rate"),
            Err(e) if e.is_task_local() => log::warn!("Failed to compute system churn rate: {e}"),
            Err(e) => return Err(e),
        }
    }

    if let Some(max_lifetime) = options.top_queries {
        let top = explorer.top_queries(options.top_n, max_lifetime).await?;
        report.top_queries = Some(top.top_by_avg_duration);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExplorerError;
    use crate::testing::FakeBackend;
    use prom_api::{NameValue, TopQueries, TsdbStatus};
    use std::sync::Arc;

    #[test]
    fn test_share_percent() {
        assert_eq!(share_percent(1, 3), 33.33);
        assert_eq!(share_percent(2, 3), 66.67);
        assert_eq!(share_percent(5, 0), 0.0);
    }

    #[tokio::test]
    async fn test_top_metrics() {
        let stats = TsdbStatus {
            total_series: 3000,
            series_count_by_metric_name: vec![
                NameValue {
                    name: "http_requests_total".to_string(),
                    value: 2000,
                },
                NameValue {
                    name: "up".to_string(),
                    value: 1000,
                },
            ],
            ..Default::default()
        };
        let backend = FakeBackend::new().with_stats(None, "job", stats);
        let explorer = Explorer::new(Arc::new(backend));
        let options = SystemOptions {
            cardinality: Some(StatsDate::Current),
            ..Default::default()
        };

        let report = system_overview(&explorer, &options).await.unwrap();

        assert_eq!(report.total_series, Some(3000));
        assert_eq!(report.top_metrics[0].percent, 66.67);
        assert_eq!(report.top_metrics[1].name, "up");
        assert_eq!(report.top_metrics[1].percent, 33.33);
    }

    #[tokio::test]
    async fn test_churn_and_top_queries() {
        let top = TopQueries {
            top_by_avg_duration: vec![QueryStat {
                query: "sum(rate(http_requests_total[5m]))".to_string(),
                time_range_seconds: 3600.0,
                avg_duration_seconds: Some(1.5),
                count: 4,
                ..Default::default()
            }],
            ..Default::default()
        };
        let backend = FakeBackend::new()
            .with_value("scrape_samples_scraped", "1234")
            .with_top_queries(top);
        let explorer = Explorer::new(Arc::new(backend));
        let options = SystemOptions {
            churn_rate: true,
            top_queries: Some(Duration::from_secs(3600)),
            ..Default::default()
        };

        let report = system_overview(&explorer, &options).await.unwrap();

        assert_eq!(report.churn_rate, Some(1234.0));
        assert_eq!(report.top_queries.unwrap()[0].count, 4);
        assert!(report.total_series.is_none());
    }

    #[tokio::test]
    async fn test_churn_failure_is_logged_only() {
        let backend = FakeBackend::new().with_failure("scrape_samples_scraped", "boom");
        let explorer = Explorer::new(Arc::new(backend));
        let options = SystemOptions {
            churn_rate: true,
            ..Default::default()
        };

        let report = system_overview(&explorer, &options).await.unwrap();
        assert!(report.churn_rate.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let explorer = Explorer::new(Arc::new(FakeBackend::new().unavailable()));
        let options = SystemOptions {
            cardinality: Some(StatsDate::Current),
            ..Default::default()
        };

        let err = system_overview(&explorer, &options).await.unwrap_err();
        assert!(matches!(err, ExplorerError::BackendUnavailable(_)));
    }
}
