use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Name of the configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "metric-explorer.toml";

/// Prefix of environment overrides, e.g. `METRIC_EXPLORER__DATASOURCE__URL`
pub const ENV_PREFIX: &str = "METRIC_EXPLORER__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasourceConfig {
    /// Base URL of the Prometheus-compatible query API
    pub url: String,
    /// Timeout applied to every single backend call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:8428"),
            timeout: Duration::from_secs(3 * 60),
        }
    }
}

/// Defaults for the cardinality exploration, overridable per invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardinalityConfig {
    /// Label used for relative narrowing and per-value breakdowns
    pub focus_label: String,
    /// Number of entries requested from the TSDB status endpoint
    pub top_n: usize,
    /// Series count above which relative narrowing kicks in
    pub allowed_cardinality_limit: u64,
    /// 1-based rank of the focus label value used to narrow the selector
    pub relative_label_no: usize,
    /// Upper bound of the window used for label contribution queries
    #[serde(with = "humantime_serde")]
    pub per_duration: Duration,
    /// How far back from now queries are evaluated
    #[serde(with = "humantime_serde")]
    pub lag: Duration,
}

impl Default for CardinalityConfig {
    fn default() -> Self {
        Self {
            focus_label: "job".to_string(),
            top_n: 20,
            allowed_cardinality_limit: 30_000,
            relative_label_no: 3,
            per_duration: Duration::from_secs(12 * 60 * 60),
            lag: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Comma-separated values with header row
    #[default]
    Csv,
    /// Pretty-printed table
    Table,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Query backend connection
    pub datasource: DatasourceConfig,
    /// Cardinality exploration defaults
    pub cardinality: CardinalityConfig,
    /// Report rendering
    pub output: OutputConfig,
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Load from an explicit file. Unlike [`Configuration::load`] the file must exist.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file_exact(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();

        assert_eq!(config.datasource.url, "http://localhost:8428");
        assert_eq!(config.datasource.timeout, Duration::from_secs(180));
        assert_eq!(config.cardinality.focus_label, "job");
        assert_eq!(config.cardinality.top_n, 20);
        assert_eq!(config.cardinality.allowed_cardinality_limit, 30_000);
        assert_eq!(config.cardinality.relative_label_no, 3);
        assert_eq!(config.cardinality.per_duration, Duration::from_secs(43_200));
        assert_eq!(config.cardinality.lag, Duration::from_secs(60));
        assert_eq!(config.output.format, OutputFormat::Csv);
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;

            assert_eq!(config.datasource.url, "http://localhost:8428");
            assert_eq!(config.cardinality.focus_label, "job");
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [datasource]
                url = "http://vmselect:8481/select/0/prometheus"
                timeout = "30s"

                [cardinality]
                focus_label = "namespace"
                per_duration = "6h"

                [output]
                format = "table"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;

            assert_eq!(
                config.datasource.url,
                "http://vmselect:8481/select/0/prometheus"
            );
            assert_eq!(config.datasource.timeout, Duration::from_secs(30));
            assert_eq!(config.cardinality.focus_label, "namespace");
            assert_eq!(config.cardinality.per_duration, Duration::from_secs(21_600));
            // untouched keys keep their defaults
            assert_eq!(config.cardinality.relative_label_no, 3);
            assert_eq!(config.output.format, OutputFormat::Table);
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("METRIC_EXPLORER__DATASOURCE__URL", "http://prometheus:9090");
            jail.set_env(
                "METRIC_EXPLORER__CARDINALITY__ALLOWED_CARDINALITY_LIMIT",
                "5000",
            );

            let config = Configuration::load().map_err(|e| *e)?;

            assert_eq!(config.datasource.url, "http://prometheus:9090");
            assert_eq!(config.cardinality.allowed_cardinality_limit, 5000);
            Ok(())
        });
    }

    #[test]
    fn test_env_wins_over_file() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[cardinality]\ntop_n = 50\n")?;
            jail.set_env("METRIC_EXPLORER__CARDINALITY__TOP_N", "7");

            let config =
                Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;

            assert_eq!(config.cardinality.top_n, 7);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        Jail::expect_with(|_jail| {
            assert!(Configuration::load_from_path(Path::new("nope.toml")).is_err());
            Ok(())
        });
    }
}
