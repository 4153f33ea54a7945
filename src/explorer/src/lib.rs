//! Cardinality exploration of Prometheus-compatible metrics backends.
//!
//! [`resolver::resolve`] checks a selector against the allowed cardinality
//! and narrows it when needed, [`analyzer::analyze`] attributes the series
//! count to labels. [`explore::explore`] and [`system::system_overview`]
//! gather per-metric and backend-wide observations.

pub mod analyzer;
pub mod backend;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod explore;
pub mod http;
pub mod resolver;
pub mod system;
pub mod template;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use analyzer::{AnalyzeOptions, Arity, CardinalityResult, DurationPolicy, LabelInfo};
pub use backend::{QueryBackend, StatsDate};
pub use engine::Explorer;
pub use error::{ExplorerError, Result};
pub use http::HttpBackend;
pub use resolver::{ResolvedSelector, ResolverOptions, SelectorState};
pub use template::MetricKind;
