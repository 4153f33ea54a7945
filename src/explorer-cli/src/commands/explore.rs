use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, ValueEnum};
use explorer::StatsDate;
use explorer::explore::{self, ExploreOptions};
use explorer::template::MetricKind;

use super::Context;
use crate::report;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum MetricKindArg {
    /// Monotonic counter, loss is the last time the value changed
    #[default]
    Counter,
    /// Gauge or anything else, loss is the last sample timestamp
    Other,
}

impl From<MetricKindArg> for MetricKind {
    fn from(kind: MetricKindArg) -> Self {
        match kind {
            MetricKindArg::Counter => MetricKind::Counter,
            MetricKindArg::Other => MetricKind::Other,
        }
    }
}

/// Observations take an optional window in seconds, e.g. `--churn-rate` or
/// `--churn-rate=7200`
#[derive(Args, Debug, Clone)]
pub struct ExploreArgs {
    /// Metric selector
    pub metric: String,

    /// Series count and label values for a day: `today` or YYYY-MM-DD
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "today")]
    pub cardinality: Option<StatsDate>,

    /// Top values listed per label with --cardinality
    #[arg(long, default_value_t = 5)]
    pub label_count: usize,

    /// Scrape interval of the metric
    #[arg(long)]
    pub scrape_interval: bool,

    /// Percent change of the series count against one hour earlier
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "3600")]
    pub churn_rate: Option<u64>,

    /// Time the backend needs to answer a range query over the window
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "300")]
    pub response_time: Option<u64>,

    /// Share of the window in which series had no samples
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "3600")]
    pub sparse: Option<u64>,

    /// Last loss of signal
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "3600")]
    pub loss: Option<u64>,

    /// Template used for --loss
    #[arg(long, value_enum, default_value_t = MetricKindArg::Counter)]
    pub metric_kind: MetricKindArg,

    /// Samples received within the window
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "1800")]
    pub sample_received: Option<u64>,

    /// Series with samples within the window
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "3600")]
    pub active_timeseries: Option<u64>,

    /// Active series per scrape interval
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "300")]
    pub ingestion_rate: Option<u64>,

    /// Counter resets within the window
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "3600")]
    pub reset_counts: Option<u64>,

    /// Evaluate queries this many seconds in the past
    #[arg(long)]
    pub lag: Option<u64>,
}

impl ExploreArgs {
    pub fn options(&self, ctx: &Context) -> ExploreOptions {
        let defaults = &ctx.config.cardinality;
        ExploreOptions {
            cardinality: self.cardinality,
            label_count: self.label_count,
            focus_label: defaults.focus_label.clone(),
            top_n: defaults.top_n,
            scrape_interval: self.scrape_interval,
            churn_rate: self.churn_rate,
            response_time: self.response_time,
            sparse: self.sparse,
            loss: self.loss,
            metric_kind: self.metric_kind.into(),
            samples_received: self.sample_received,
            active_timeseries: self.active_timeseries,
            ingestion_rate: self.ingestion_rate,
            reset_counts: self.reset_counts,
            lag: self.lag.map(Duration::from_secs).unwrap_or(defaults.lag),
        }
    }

    pub async fn run(self, ctx: &Context) -> anyhow::Result<()> {
        let options = self.options(ctx);
        if !options.has_observation() {
            anyhow::bail!("Nothing to explore, pass at least one observation flag (see --help)");
        }

        let report = explore::explore(&ctx.explorer, &self.metric, &options)
            .await
            .with_context(|| format!("Failed to explore {}", self.metric))?;

        if !report.failed.is_empty() {
            log::warn!("Omitted observations: {}", report.failed.join(", "));
        }
        ctx.print(&report::explore_sections(&report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use chrono::NaiveDate;
    use clap::Parser;
    use common::Configuration;
    use common::config::OutputFormat;
    use explorer::testing::FakeBackend;
    use std::sync::Arc;

    fn parse(args: &[&str]) -> ExploreArgs {
        let mut argv = vec!["metric-explorer", "explore"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Explore(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_flags_without_value_use_defaults() {
        let args = parse(&["--churn-rate", "--sparse", "--sample-received", "up"]);

        assert_eq!(args.metric, "up");
        assert_eq!(args.churn_rate, Some(3600));
        assert_eq!(args.sparse, Some(3600));
        assert_eq!(args.sample_received, Some(1800));
        assert_eq!(args.response_time, None);
    }

    #[test]
    fn test_flags_with_value() {
        let args = parse(&[
            "up",
            "--churn-rate=7200",
            "--cardinality=2024-03-01",
            "--loss=600",
            "--metric-kind",
            "other",
        ]);

        assert_eq!(args.churn_rate, Some(7200));
        assert_eq!(
            args.cardinality,
            Some(StatsDate::On(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );
        assert_eq!(args.loss, Some(600));
        assert_eq!(MetricKind::from(args.metric_kind), MetricKind::Other);
    }

    #[test]
    fn test_cardinality_today() {
        let args = parse(&["--cardinality", "up"]);
        assert_eq!(args.cardinality, Some(StatsDate::Current));
    }

    #[tokio::test]
    async fn test_requires_an_observation() {
        let ctx = Context::new(
            Arc::new(FakeBackend::new()),
            Configuration::default(),
            OutputFormat::Csv,
        );

        let err = parse(&["up"]).run(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("Nothing to explore"));
    }
}
