use std::time::Duration;

use anyhow::Context as _;
use clap::Args;
use explorer::analyzer::{self, AnalyzeOptions, Arity, DurationPolicy};
use explorer::resolver::{self, ResolverOptions, SelectorState};
use explorer::{CardinalityResult, StatsDate};

use super::Context;
use crate::report;

#[derive(Args, Debug, Clone)]
pub struct CcArgs {
    /// Metric selector, e.g. 'http_requests_total{job="api"}'
    pub metric: String,

    /// Label used to narrow over-limit metrics [default: from config]
    #[arg(long)]
    pub filter_label: Option<String>,

    /// Labels per candidate: 1 for single labels, 2 for label pairs
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub label_count: u8,

    /// Upper bound of the query window in seconds, clamped to the time since UTC midnight
    #[arg(long)]
    pub cc_duration: Option<u64>,

    /// Use --cc-duration as is instead of clamping it to the current UTC day
    #[arg(long, requires = "cc_duration")]
    pub pin_duration: bool,

    /// Evaluate queries this many seconds in the past
    #[arg(long)]
    pub lag: Option<u64>,

    /// Rank of the filter label value used for narrowing, 1 being the most populous
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub relative_label_no: Option<u64>,

    /// Series count above which the metric gets narrowed
    #[arg(long)]
    pub allowed_cardinality_limit: Option<u64>,

    /// Fail instead of narrowing metrics above the limit
    #[arg(long)]
    pub disable_relative_cardinality: bool,

    /// Only consider these labels (repeatable or comma separated)
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Also check whether dropping each candidate creates duplicate series
    #[arg(long)]
    pub drop: bool,
}

impl CcArgs {
    pub fn resolver_options(&self, ctx: &Context) -> ResolverOptions {
        let defaults = &ctx.config.cardinality;
        ResolverOptions {
            focus_label: self
                .filter_label
                .clone()
                .unwrap_or_else(|| defaults.focus_label.clone()),
            top_n: defaults.top_n,
            allowed_cardinality_limit: self
                .allowed_cardinality_limit
                .unwrap_or(defaults.allowed_cardinality_limit),
            relative_label_no: self
                .relative_label_no
                .map(|n| n as usize)
                .unwrap_or(defaults.relative_label_no),
            narrowing_enabled: !self.disable_relative_cardinality,
            date: StatsDate::Current,
        }
    }

    pub fn analyze_options(&self, ctx: &Context) -> AnalyzeOptions {
        let defaults = &ctx.config.cardinality;
        let duration = match (self.cc_duration, self.pin_duration) {
            (Some(secs), true) => DurationPolicy::Pinned(secs),
            (Some(secs), false) => DurationPolicy::Clamped(Duration::from_secs(secs)),
            (None, _) => DurationPolicy::Clamped(defaults.per_duration),
        };

        AnalyzeOptions {
            labels: self
                .labels
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            arity: self.arity(),
            duration,
            lag: self.lag.map(Duration::from_secs).unwrap_or(defaults.lag),
            drop_action: self.drop,
        }
    }

    pub fn arity(&self) -> Arity {
        if self.label_count == 2 {
            Arity::Pair
        } else {
            Arity::Single
        }
    }

    /// Resolve and analyze without printing
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<CardinalityResult> {
        let resolved = resolver::resolve(&ctx.explorer, &self.metric, &self.resolver_options(ctx))
            .await
            .with_context(|| format!("Failed to resolve {}", self.metric))?;

        if let SelectorState::Narrowed { label, value } = &resolved.state {
            log::info!("Cardinality is relative to {label}=\"{value}\"");
        }

        let result = analyzer::analyze(&ctx.explorer, &resolved, &self.analyze_options(ctx))
            .await
            .with_context(|| format!("Failed to analyze {}", resolved.selector))?;

        if !result.missing.is_empty() {
            log::warn!(
                "No contribution for {} candidate(s): {}",
                result.missing.len(),
                result.missing.join("; ")
            );
        }
        Ok(result)
    }

    pub async fn run(self, ctx: &Context) -> anyhow::Result<()> {
        let result = self.execute(ctx).await?;
        let section = report::cardinality_section(&result, self.arity(), self.drop)?;
        ctx.print(&[section])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;
    use common::Configuration;
    use common::config::OutputFormat;
    use explorer::testing::{FakeBackend, metric_stats};
    use std::sync::Arc;

    fn parse(args: &[&str]) -> CcArgs {
        let mut argv = vec!["metric-explorer", "cc"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Cc(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn context(backend: FakeBackend) -> Context {
        Context::new(Arc::new(backend), Configuration::default(), OutputFormat::Csv)
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "up",
            "--filter-label",
            "namespace",
            "--relative-label-no",
            "1",
            "--allowed-cardinality-limit",
            "500",
            "--disable-relative-cardinality",
            "--labels",
            "pod,container",
            "--labels",
            "node",
            "--label-count",
            "2",
            "--cc-duration",
            "600",
            "--pin-duration",
        ]);
        let ctx = context(FakeBackend::new());

        let resolver = args.resolver_options(&ctx);
        assert_eq!(resolver.focus_label, "namespace");
        assert_eq!(resolver.relative_label_no, 1);
        assert_eq!(resolver.allowed_cardinality_limit, 500);
        assert!(!resolver.narrowing_enabled);

        let analyze = args.analyze_options(&ctx);
        assert_eq!(analyze.labels, vec!["pod", "container", "node"]);
        assert_eq!(analyze.arity, Arity::Pair);
        assert_eq!(analyze.duration, DurationPolicy::Pinned(600));
    }

    #[test]
    fn test_defaults_come_from_config() {
        let args = parse(&["up"]);
        let ctx = context(FakeBackend::new());

        let resolver = args.resolver_options(&ctx);
        assert_eq!(resolver.focus_label, "job");
        assert_eq!(resolver.relative_label_no, 3);
        assert!(resolver.narrowing_enabled);

        let analyze = args.analyze_options(&ctx);
        assert_eq!(
            analyze.duration,
            DurationPolicy::Clamped(Duration::from_secs(12 * 3600))
        );
        assert_eq!(analyze.lag, Duration::from_secs(60));
        assert!(!analyze.drop_action);
    }

    #[test]
    fn test_rejects_invalid_label_count() {
        let argv = ["metric-explorer", "cc", "up", "--label-count", "3"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[tokio::test]
    async fn test_execute() {
        let backend = FakeBackend::new()
            .with_stats(
                Some("up"),
                "job",
                metric_stats("up", 200, &[("node", 200)], &[("instance", 20)]),
            )
            .with_value("without ( instance )", "10");
        let ctx = context(backend);

        let result = parse(&["up"]).execute(&ctx).await.unwrap();

        assert_eq!(result.total_cardinality, 200);
        assert_eq!(result.per_candidate["instance"].contribution_percent, 95);
    }
}
