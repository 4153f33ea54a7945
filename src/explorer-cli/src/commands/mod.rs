pub mod cardinality;
pub mod explore;
pub mod system;

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use common::Configuration;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::OutputFormat;
use explorer::{Explorer, HttpBackend, QueryBackend};

use crate::report::{self, Section};

/// metric-explorer: find out where the series of a metric come from
#[derive(Parser, Debug)]
#[command(name = "metric-explorer", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Base URL of the Prometheus-compatible query API, overrides the configuration
    #[arg(long, global = true, env = "METRIC_EXPLORER_URL")]
    pub datasource: Option<String>,

    /// Report format, overrides the configuration
    #[arg(long, global = true, value_enum)]
    pub dump_as: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attribute the cardinality of a metric to its labels
    Cc(cardinality::CcArgs),
    /// Observe a single metric: cardinality, churn, sparseness and more
    Explore(explore::ExploreArgs),
    /// Overview of the whole backend
    System(system::SystemArgs),
    #[command(flatten)]
    Common(CommonCommands),
}

/// Everything a command needs to talk to the backend and print results
pub struct Context {
    pub explorer: Explorer,
    pub config: Configuration,
    pub format: OutputFormat,
}

impl Context {
    pub fn new(backend: Arc<dyn QueryBackend>, config: Configuration, format: OutputFormat) -> Self {
        let explorer = Explorer::new(backend).with_api_timeout(config.datasource.timeout);
        Self {
            explorer,
            config,
            format,
        }
    }

    /// Render sections to stdout
    pub fn print(&self, sections: &[Section]) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        report::render(sections, self.format, &mut out)
    }
}

impl Cli {
    /// Effective configuration: file and environment, then CLI overrides
    pub fn configuration(&self) -> anyhow::Result<Configuration> {
        let mut config = utils::load_config(self.common.config.as_ref())?;
        if let Some(url) = &self.datasource {
            config.datasource.url = url.clone();
        }
        if let Some(format) = self.dump_as {
            config.output.format = format;
        }
        Ok(config)
    }

    /// Run the parsed command. `version` is printed by `version`.
    pub async fn run(self, version: &str) -> anyhow::Result<()> {
        let config = self.configuration()?;

        if let Commands::Common(command) = &self.command {
            return utils::handle_common_command(command, &config, version);
        }

        utils::validate_config(&config).context("Invalid configuration")?;
        log::debug!("Using datasource {}", config.datasource.url);

        let backend = Arc::new(HttpBackend::new(&config.datasource.url));
        let format = config.output.format;
        let ctx = Context::new(backend, config, format);

        match self.command {
            Commands::Cc(args) => args.run(&ctx).await,
            Commands::Explore(args) => args.run(&ctx).await,
            Commands::System(args) => args.run(&ctx).await,
            Commands::Common(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "metric-explorer",
            "cc",
            "up",
            "--dump-as",
            "table",
            "--datasource",
            "http://vm:8428",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.dump_as, Some(OutputFormat::Table));
        assert_eq!(cli.datasource.as_deref(), Some("http://vm:8428"));
        assert!(cli.common.verbose);
        assert!(matches!(cli.command, Commands::Cc(_)));
    }

    #[test]
    fn test_common_subcommands() {
        let cli = Cli::try_parse_from(["metric-explorer", "config", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Common(CommonCommands::Config { json: true })
        ));

        let cli = Cli::try_parse_from(["metric-explorer", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Common(CommonCommands::Validate)
        ));
    }

    #[tokio::test]
    async fn test_version_runs_without_backend() {
        let cli = Cli::try_parse_from(["metric-explorer", "version"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Common(CommonCommands::Version)
        ));

        // the datasource is never contacted for common commands
        cli.run("metric-explorer 0.1.0").await.unwrap();
    }
}
