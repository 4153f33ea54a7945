use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared by every command
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that inspect the tool itself instead of the backend
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level derived from the verbosity flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    /// Logs go to stderr, stdout is reserved for reports.
    pub fn init_logging(args: &CommonArgs) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            let cardinality = &config.cardinality;
            println!("metric-explorer configuration:");
            println!("==============================");
            println!("Datasource URL: {}", config.datasource.url);
            println!("Backend call timeout: {:?}", config.datasource.timeout);
            println!("Focus label: {}", cardinality.focus_label);
            println!("Top N: {}", cardinality.top_n);
            println!(
                "Allowed cardinality limit: {}",
                cardinality.allowed_cardinality_limit
            );
            println!("Relative label no: {}", cardinality.relative_label_no);
            println!("Per-label duration: {:?}", cardinality.per_duration);
            println!("Lag: {:?}", cardinality.lag);
            println!("Output format: {:?}", config.output.format);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.datasource.url.is_empty() {
            anyhow::bail!("Datasource URL cannot be empty");
        }

        let url = url::Url::parse(&config.datasource.url)
            .with_context(|| format!("Invalid datasource URL '{}'", config.datasource.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!(
                "Datasource URL must use http or https, got '{}'",
                url.scheme()
            );
        }

        if config.datasource.timeout.is_zero() {
            anyhow::bail!("Datasource timeout must be greater than zero");
        }

        let cardinality = &config.cardinality;
        if cardinality.focus_label.is_empty() {
            anyhow::bail!("Focus label cannot be empty");
        }

        if cardinality.top_n == 0 {
            anyhow::bail!("top_n must be at least 1");
        }

        if cardinality.relative_label_no == 0 {
            anyhow::bail!("relative_label_no is 1-based and must be at least 1");
        }

        if cardinality.per_duration.as_secs() == 0 {
            anyhow::bail!("per_duration must be at least one second");
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle the commands that don't talk to the backend. `version` is the
    /// line printed by `version`, built by the binary.
    pub fn handle_common_command(
        command: &CommonCommands,
        config: &Configuration,
        version: &str,
    ) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{version}");
                Ok(())
            }
        }
    }

    /// Version line of a binary. Pass `env!("CARGO_PKG_NAME")` and
    /// `env!("CARGO_PKG_VERSION")` from the binary crate.
    pub fn version_info(name: &str, version: &str) -> String {
        format!("{name} {version}")
    }
}
