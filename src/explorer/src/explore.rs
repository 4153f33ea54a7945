//! Observations about a single metric, each answered by its own task.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;

use crate::analyzer::LabelInfo;
use crate::backend::StatsDate;
use crate::decoder::Sample;
use crate::engine::{Explorer, eval_time_at};
use crate::error::{ExplorerError, Result};
use crate::resolver::series_total;
use crate::template::{MetricKind, QueryParams, Template};

/// Gap percentage above which a metric counts as sparse
pub const SPARSE_GAP_THRESHOLD: f64 = 10.0;

/// Step of the range query timed by the response time observation
pub const RESPONSE_TIME_STEP_SECS: f64 = 60.0;

/// Requested observations. Durations are in seconds; `None` skips the
/// observation.
#[derive(Debug, Clone)]
pub struct ExploreOptions {
    pub cardinality: Option<StatsDate>,
    /// Top values listed per label
    pub label_count: usize,
    pub focus_label: String,
    pub top_n: usize,
    pub scrape_interval: bool,
    pub churn_rate: Option<u64>,
    pub response_time: Option<u64>,
    pub sparse: Option<u64>,
    pub loss: Option<u64>,
    pub metric_kind: MetricKind,
    pub samples_received: Option<u64>,
    pub active_timeseries: Option<u64>,
    pub ingestion_rate: Option<u64>,
    pub reset_counts: Option<u64>,
    pub lag: Duration,
}

impl Default for ExploreOptions {
    fn default() -> Self {
        Self {
            cardinality: None,
            label_count: 5,
            focus_label: "job".to_string(),
            top_n: 20,
            scrape_interval: false,
            churn_rate: None,
            response_time: None,
            sparse: None,
            loss: None,
            metric_kind: MetricKind::Counter,
            samples_received: None,
            active_timeseries: None,
            ingestion_rate: None,
            reset_counts: None,
            lag: Duration::from_secs(60),
        }
    }
}

impl ExploreOptions {
    pub fn has_observation(&self) -> bool {
        self.cardinality.is_some()
            || self.scrape_interval
            || self.churn_rate.is_some()
            || self.response_time.is_some()
            || self.sparse.is_some()
            || self.loss.is_some()
            || self.samples_received.is_some()
            || self.active_timeseries.is_some()
            || self.ingestion_rate.is_some()
            || self.reset_counts.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observed<T> {
    /// Window the value was observed over, in seconds
    pub window: u64,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sparseness {
    pub gap_percent: f64,
    pub is_sparse: bool,
}

impl Sparseness {
    /// `avg_present` is the average number of seconds the series were present
    /// within `window`
    pub fn from_presence(window: u64, avg_present: f64) -> Self {
        let window = window.max(1) as f64;
        let gap_percent = (window - avg_present) * 100.0 / window;
        Self {
            gap_percent,
            is_sparse: gap_percent > SPARSE_GAP_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardinalityOverview {
    pub total: u64,
    pub labels: BTreeMap<String, LabelInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExploreReport {
    pub metric: String,
    pub cardinality: Option<CardinalityOverview>,
    pub scrape_interval: Option<f64>,
    pub churn_rate: Option<Observed<f64>>,
    pub response_time: Option<Observed<Duration>>,
    pub sparseness: Option<Observed<Sparseness>>,
    pub last_loss: Option<Observed<f64>>,
    pub samples_received: Option<Observed<u64>>,
    pub active_timeseries: Option<Observed<u64>>,
    pub ingestion_rate: Option<Observed<f64>>,
    pub reset_count: Option<Observed<u64>>,
    /// Observations that failed or returned no data
    pub failed: Vec<String>,
}

enum Observation {
    LabelValues(String, Vec<(String, u64)>),
    ScrapeInterval(f64),
    ChurnRate(Observed<f64>),
    ResponseTime(Observed<Duration>),
    Sparseness(Observed<Sparseness>),
    LastLoss(Observed<f64>),
    SamplesReceived(Observed<u64>),
    ActiveTimeSeries(Observed<u64>),
    IngestionRate(Observed<f64>),
    ResetCount(Observed<u64>),
}

type Task = tokio::task::JoinHandle<(String, Result<Option<Observation>>)>;

pub async fn explore(
    explorer: &Explorer,
    metric: &str,
    options: &ExploreOptions,
) -> Result<ExploreReport> {
    let mut report = ExploreReport {
        metric: metric.to_string(),
        ..Default::default()
    };
    let mut tasks: Vec<Task> = Vec::new();

    if let Some(date) = options.cardinality {
        let stats = explorer
            .stats(Some(metric), &options.focus_label, options.top_n, date)
            .await?;
        let total = series_total(&stats);
        if total == 0 {
            return Err(ExplorerError::NoSeriesFound {
                selector: metric.to_string(),
            });
        }

        let mut labels = BTreeMap::new();
        for entry in &stats.label_value_count_by_label_name {
            if entry.name == "__name__" {
                continue;
            }
            labels.insert(
                entry.name.clone(),
                LabelInfo {
                    unique_value_count: Some(entry.value),
                    ..Default::default()
                },
            );

            let explorer = explorer.clone();
            let (metric, label) = (metric.to_string(), entry.name.clone());
            let top = options.label_count;
            tasks.push(tokio::spawn(async move {
                let name = format!("values of {label}");
                let outcome = explorer
                    .stats(Some(&metric), &label, top, date)
                    .await
                    .map(|stats| {
                        let values = stats
                            .series_count_by_focus_label_value
                            .into_iter()
                            .map(|entry| (entry.name, entry.value))
                            .collect();
                        Some(Observation::LabelValues(label, values))
                    });
                (name, outcome)
            }));
        }

        report.cardinality = Some(CardinalityOverview { total, labels });
    }

    let lag = options.lag;
    let params = |window: u64| QueryParams::new(metric).with_duration(window);

    if options.scrape_interval {
        spawn_template(
            &mut tasks,
            explorer,
            "scrape interval",
            lag,
            Template::ScrapeInterval,
            QueryParams::new(metric),
            |sample| Ok(Observation::ScrapeInterval(sample.as_f64()?)),
        );
    }

    if let Some(window) = options.churn_rate {
        spawn_template(
            &mut tasks,
            explorer,
            "churn rate",
            lag,
            Template::ChurnRate,
            params(window),
            move |sample| {
                Ok(Observation::ChurnRate(Observed {
                    window,
                    value: sample.as_f64()?,
                }))
            },
        );
    }

    if let Some(window) = options.sparse {
        spawn_template(
            &mut tasks,
            explorer,
            "sparseness",
            lag,
            Template::SparseDuration,
            params(window),
            move |sample| {
                Ok(Observation::Sparseness(Observed {
                    window,
                    value: Sparseness::from_presence(window, sample.as_f64()?),
                }))
            },
        );
    }

    if let Some(window) = options.loss {
        spawn_template(
            &mut tasks,
            explorer,
            "last loss",
            lag,
            Template::LastLoss,
            params(window).with_kind(options.metric_kind),
            move |sample| {
                Ok(Observation::LastLoss(Observed {
                    window,
                    value: sample.as_f64()?,
                }))
            },
        );
    }

    if let Some(window) = options.samples_received {
        spawn_template(
            &mut tasks,
            explorer,
            "samples received",
            lag,
            Template::SamplesReceived,
            params(window),
            move |sample| {
                Ok(Observation::SamplesReceived(Observed {
                    window,
                    value: sample.as_count()?,
                }))
            },
        );
    }

    if let Some(window) = options.active_timeseries {
        spawn_template(
            &mut tasks,
            explorer,
            "active time series",
            lag,
            Template::ActiveTimeSeries,
            params(window),
            move |sample| {
                Ok(Observation::ActiveTimeSeries(Observed {
                    window,
                    value: sample.as_count()?,
                }))
            },
        );
    }

    if let Some(window) = options.ingestion_rate {
        spawn_template(
            &mut tasks,
            explorer,
            "ingestion rate",
            lag,
            Template::IngestionRate,
            params(window),
            move |sample| {
                Ok(Observation::IngestionRate(Observed {
                    window,
                    value: sample.as_f64()?,
                }))
            },
        );
    }

    if let Some(window) = options.reset_counts {
        spawn_template(
            &mut tasks,
            explorer,
            "reset count",
            lag,
            Template::ResetCount,
            params(window),
            move |sample| {
                Ok(Observation::ResetCount(Observed {
                    window,
                    value: sample.as_count()?,
                }))
            },
        );
    }

    if let Some(window) = options.response_time {
        let query = explorer
            .queries()
            .build(Template::ResponseTime, &params(window))?;
        spawn_observation(&mut tasks, explorer, "response time", lag, move |explorer, eval| async move {
            let started = Instant::now();
            explorer
                .range(&query, eval - window as f64, eval, RESPONSE_TIME_STEP_SECS)
                .await?;
            Ok(Some(Observation::ResponseTime(Observed {
                window,
                value: started.elapsed(),
            })))
        });
    }

    for joined in join_all(tasks).await {
        let (name, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                log::error!("Observation task panicked: {e}");
                continue;
            }
        };

        match outcome {
            Ok(Some(observation)) => report.record(observation),
            Ok(None) => {
                log::warn!("No data for {name} of {metric}");
                report.failed.push(name);
            }
            Err(e) if e.is_task_local() => {
                log::warn!("Failed to observe {name} of {metric}: {e}");
                report.failed.push(name);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

impl ExploreReport {
    fn record(&mut self, observation: Observation) {
        match observation {
            Observation::LabelValues(label, values) => {
                if let Some(info) = self
                    .cardinality
                    .as_mut()
                    .and_then(|overview| overview.labels.get_mut(&label))
                {
                    info.sample_values = values;
                }
            }
            Observation::ScrapeInterval(v) => self.scrape_interval = Some(v),
            Observation::ChurnRate(v) => self.churn_rate = Some(v),
            Observation::ResponseTime(v) => self.response_time = Some(v),
            Observation::Sparseness(v) => self.sparseness = Some(v),
            Observation::LastLoss(v) => self.last_loss = Some(v),
            Observation::SamplesReceived(v) => self.samples_received = Some(v),
            Observation::ActiveTimeSeries(v) => self.active_timeseries = Some(v),
            Observation::IngestionRate(v) => self.ingestion_rate = Some(v),
            Observation::ResetCount(v) => self.reset_count = Some(v),
        }
    }
}

/// Spawn one observation. `observe` receives its own explorer handle and the
/// evaluation timestamp, read when the task starts.
fn spawn_observation<F, Fut>(
    tasks: &mut Vec<Task>,
    explorer: &Explorer,
    name: &str,
    lag: Duration,
    observe: F,
) where
    F: FnOnce(Explorer, f64) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Observation>>> + Send + 'static,
{
    let explorer = explorer.clone();
    let name = name.to_string();
    tasks.push(tokio::spawn(async move {
        let eval = eval_time_at(Utc::now(), lag);
        (name, observe(explorer, eval).await)
    }));
}

/// Spawn an instant query observation; an empty result yields no value
fn spawn_template<I>(
    tasks: &mut Vec<Task>,
    explorer: &Explorer,
    name: &str,
    lag: Duration,
    template: Template,
    params: QueryParams,
    interpret: I,
) where
    I: FnOnce(Sample) -> Result<Observation> + Send + 'static,
{
    spawn_observation(tasks, explorer, name, lag, move |explorer, eval| async move {
        match explorer.run_first(template, &params, eval).await? {
            Some(sample) => interpret(sample).map(Some),
            None => Ok(None),
        }
    });
}
