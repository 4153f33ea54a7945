use std::time::Duration;

use anyhow::Context as _;
use clap::Args;
use explorer::StatsDate;
use explorer::system::{self, SystemOptions};

use super::Context;
use crate::report;

#[derive(Args, Debug, Clone)]
pub struct SystemArgs {
    /// Top metrics by series count for a day: `today` or YYYY-MM-DD
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "today")]
    pub cardinality: Option<StatsDate>,

    /// Number of metrics or queries listed [default: from config]
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Series created within the last hour
    #[arg(long)]
    pub churn_rate: bool,

    /// Slowest queries by average duration
    #[arg(long)]
    pub top_queries: bool,

    /// Only queries executed within this many seconds are considered
    #[arg(long, default_value_t = 3600)]
    pub top_query_max_lifetime: u64,

    /// Evaluate queries this many seconds in the past
    #[arg(long)]
    pub lag: Option<u64>,
}

impl SystemArgs {
    pub fn options(&self, ctx: &Context) -> SystemOptions {
        let defaults = &ctx.config.cardinality;
        SystemOptions {
            cardinality: self.cardinality,
            top_n: self.top_n.unwrap_or(defaults.top_n),
            focus_label: defaults.focus_label.clone(),
            churn_rate: self.churn_rate,
            top_queries: self
                .top_queries
                .then(|| Duration::from_secs(self.top_query_max_lifetime)),
            lag: self.lag.map(Duration::from_secs).unwrap_or(defaults.lag),
        }
    }

    pub async fn run(self, ctx: &Context) -> anyhow::Result<()> {
        let options = self.options(ctx);
        if options.cardinality.is_none() && !options.churn_rate && options.top_queries.is_none() {
            anyhow::bail!("Nothing to show, pass --cardinality, --churn-rate or --top-queries");
        }

        let report = system::system_overview(&ctx.explorer, &options)
            .await
            .context("Failed to collect the system overview")?;
        ctx.print(&report::system_sections(&report)?)
    }
}
