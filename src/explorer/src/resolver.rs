//! Relative cardinality.
//!
//! A selector whose series count exceeds the allowed limit is too expensive to
//! break down label by label. Instead it is narrowed once with a filter on
//! the focus label, picking the value at a configurable rank of the
//! per-value series breakdown.

use prom_api::{NameValue, TsdbStatus};

use crate::backend::StatsDate;
use crate::engine::Explorer;
use crate::error::{ExplorerError, Result};

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub focus_label: String,
    pub top_n: usize,
    pub allowed_cardinality_limit: u64,
    /// 1-based rank of the focus value used for narrowing
    pub relative_label_no: usize,
    pub narrowing_enabled: bool,
    pub date: StatsDate,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            focus_label: "job".to_string(),
            top_n: 20,
            allowed_cardinality_limit: 30_000,
            relative_label_no: 3,
            narrowing_enabled: true,
            date: StatsDate::Current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorState {
    Direct,
    Narrowed { label: String, value: String },
}

/// Selector the analysis runs against, with the status it was checked with
#[derive(Debug, Clone)]
pub struct ResolvedSelector {
    pub selector: String,
    pub total: u64,
    pub state: SelectorState,
    pub stats: TsdbStatus,
}

impl ResolvedSelector {
    /// Labels present on the selected series, `__name__` excluded
    pub fn discovered_labels(&self) -> Vec<String> {
        self.stats
            .label_value_count_by_label_name
            .iter()
            .filter(|entry| entry.name != "__name__")
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Number of distinct values of `label`, if the status listed it
    pub fn unique_values(&self, label: &str) -> Option<u64> {
        self.stats
            .label_value_count_by_label_name
            .iter()
            .find(|entry| entry.name == label)
            .map(|entry| entry.value)
    }
}

/// Series count of the selector; the status lists the matched metric first
pub fn series_total(stats: &TsdbStatus) -> u64 {
    stats
        .series_count_by_metric_name
        .first()
        .map(|entry| entry.value)
        .unwrap_or(0)
}

/// Focus value at 1-based `rank`, clamped to the last (least populous) entry
pub fn pick_focus_value(values: &[NameValue], rank: usize) -> Option<&NameValue> {
    if values.is_empty() {
        return None;
    }
    let index = rank.max(1).saturating_sub(1).min(values.len() - 1);
    values.get(index)
}

/// Add `label="value"` as the first matcher of `selector`
pub fn inject_filter(selector: &str, label: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    let matcher = format!("{label}=\"{escaped}\"");

    match selector.find('{') {
        Some(open) => {
            let rest = &selector[open + 1..];
            let separator = if rest.trim_start().starts_with('}') {
                ""
            } else {
                ","
            };
            format!("{}{{{matcher}{separator}{rest}", &selector[..open])
        }
        None => format!("{selector}{{{matcher}}}"),
    }
}

pub async fn resolve(
    explorer: &Explorer,
    selector: &str,
    options: &ResolverOptions,
) -> Result<ResolvedSelector> {
    let stats = explorer
        .stats(
            Some(selector),
            &options.focus_label,
            options.top_n,
            options.date,
        )
        .await?;

    let total = series_total(&stats);
    if total == 0 {
        return Err(ExplorerError::NoSeriesFound {
            selector: selector.to_string(),
        });
    }

    let limit = options.allowed_cardinality_limit;
    if total <= limit {
        log::info!("{selector} has {total} series, within the limit of {limit}");
        return Ok(ResolvedSelector {
            selector: selector.to_string(),
            total,
            state: SelectorState::Direct,
            stats,
        });
    }

    if !options.narrowing_enabled {
        return Err(ExplorerError::CardinalityLimitExceeded {
            selector: selector.to_string(),
            cardinality: total,
            limit,
            narrowed: false,
        });
    }

    // no breakdown available: filter on the empty value, which matches series
    // without the focus label
    let value = pick_focus_value(
        &stats.series_count_by_focus_label_value,
        options.relative_label_no,
    )
    .map(|entry| entry.name.clone())
    .unwrap_or_default();

    let narrowed = inject_filter(selector, &options.focus_label, &value);
    log::info!(
        "{selector} has {total} series, above the limit of {limit}; narrowing to {narrowed}"
    );

    let stats = explorer
        .stats(
            Some(&narrowed),
            &options.focus_label,
            options.top_n,
            options.date,
        )
        .await?;

    let total = series_total(&stats);
    if total == 0 {
        return Err(ExplorerError::NoSeriesFound { selector: narrowed });
    }
    if total > limit {
        return Err(ExplorerError::CardinalityLimitExceeded {
            selector: narrowed,
            cardinality: total,
            limit,
            narrowed: true,
        });
    }

    Ok(ResolvedSelector {
        selector: narrowed,
        total,
        state: SelectorState::Narrowed {
            label: options.focus_label.clone(),
            value,
        },
        stats,
    })
}
