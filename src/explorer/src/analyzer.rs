//! Per-label cardinality contribution.
//!
//! For each candidate label (or label set) one task counts the series left
//! once the candidate is removed from the selector. The drop from the total is
//! the candidate's contribution. With the drop action enabled the task also
//! checks whether removing the candidate merges distinct series.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::engine::{Explorer, eval_time_at};
use crate::error::{ExplorerError, Result};
use crate::resolver::ResolvedSelector;
use crate::template::{QueryParams, Template};

/// Labels per candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arity {
    #[default]
    Single,
    Pair,
}

/// Window of the contribution queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPolicy {
    /// Exactly this many seconds
    Pinned(u64),
    /// At most this long, never reaching back past UTC midnight
    Clamped(Duration),
}

impl DurationPolicy {
    pub fn seconds_at(&self, now: DateTime<Utc>) -> u64 {
        match self {
            DurationPolicy::Pinned(secs) => *secs,
            DurationPolicy::Clamped(per) => clamp_to_utc_day(*per, now),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Explicit candidate labels; all discovered labels when empty
    pub labels: Vec<String>,
    pub arity: Arity,
    pub duration: DurationPolicy,
    pub lag: Duration,
    /// Also check whether dropping the candidate creates duplicate series
    pub drop_action: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            arity: Arity::Single,
            duration: DurationPolicy::Clamped(Duration::from_secs(12 * 60 * 60)),
            lag: Duration::from_secs(60),
            drop_action: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelInfo {
    pub unique_value_count: Option<u64>,
    pub contribution_percent: u64,
    /// Most populous values with their series counts
    pub sample_values: Vec<(String, u64)>,
    pub duplicate_exists_on_drop: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardinalityResult {
    pub metric: String,
    pub total_cardinality: u64,
    pub per_candidate: BTreeMap<String, LabelInfo>,
    /// Candidates whose queries failed
    pub missing: Vec<String>,
}

impl CardinalityResult {
    /// Candidates by contribution, highest first
    pub fn ranked(&self) -> Vec<(&str, &LabelInfo)> {
        let mut ranked: Vec<_> = self
            .per_candidate
            .iter()
            .map(|(key, info)| (key.as_str(), info))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.contribution_percent
                .cmp(&a.1.contribution_percent)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked
    }
}

/// Candidate keys. Labels are deduplicated in first-seen order. Pairs are
/// unordered and joined with `", "`, ready to be used inside `without ( .. )`.
pub fn candidates(discovered: &[String], explicit: &[String], arity: Arity) -> Vec<String> {
    let mut labels: Vec<&String> = Vec::new();
    let source = if explicit.is_empty() { discovered } else { explicit };
    for label in source.iter().filter(|l| *l != "__name__") {
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    let mut keys = match arity {
        Arity::Single => labels.iter().map(|l| l.to_string()).collect::<Vec<_>>(),
        Arity::Pair => {
            let mut pairs = Vec::new();
            for (i, first) in labels.iter().enumerate() {
                for second in &labels[i + 1..] {
                    pairs.push(format!("{first}, {second}"));
                }
            }
            pairs
        }
    };

    let arity_len = match arity {
        Arity::Single => 1,
        Arity::Pair => 2,
    };
    if !explicit.is_empty() && labels.len() > arity_len {
        keys.push(
            labels
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
    }

    keys
}

/// `per`, shortened to the time elapsed since UTC midnight. At least one
/// second.
pub fn clamp_to_utc_day(per: Duration, now: DateTime<Utc>) -> u64 {
    let since_midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| (now.naive_utc() - midnight).num_seconds())
        .unwrap_or(0)
        .max(0) as u64;

    per.as_secs().min(since_midnight).max(1)
}

/// Share of `total` removed when a candidate is dropped, truncated to an
/// integer percentage
pub fn contribution_percent(total: u64, after: u64) -> Result<u64> {
    if total == 0 {
        return Err(ExplorerError::NoSeriesFound {
            selector: "<empty>".to_string(),
        });
    }
    Ok(total.saturating_sub(after).saturating_mul(100) / total)
}

pub async fn analyze(
    explorer: &Explorer,
    resolved: &ResolvedSelector,
    options: &AnalyzeOptions,
) -> Result<CardinalityResult> {
    if resolved.total == 0 {
        return Err(ExplorerError::NoSeriesFound {
            selector: resolved.selector.clone(),
        });
    }

    let keys = candidates(&resolved.discovered_labels(), &options.labels, options.arity);
    log::info!(
        "Analyzing {} candidates of {} ({} series)",
        keys.len(),
        resolved.selector,
        resolved.total
    );

    let results: Arc<Mutex<BTreeMap<String, LabelInfo>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let mut tasks = Vec::with_capacity(keys.len());

    for key in keys.iter().cloned() {
        let explorer = explorer.clone();
        let results = Arc::clone(&results);
        let selector = resolved.selector.clone();
        let total = resolved.total;
        let unique_value_count = match options.arity {
            Arity::Single => resolved.unique_values(&key),
            Arity::Pair => None,
        };
        let options = options.clone();

        tasks.push(tokio::spawn(async move {
            let outcome = analyze_candidate(&explorer, &selector, &key, total, &options).await;
            match outcome {
                Ok(Some((contribution_percent, duplicate_exists_on_drop))) => {
                    let info = LabelInfo {
                        unique_value_count,
                        contribution_percent,
                        sample_values: Vec::new(),
                        duplicate_exists_on_drop,
                    };
                    results.lock().await.insert(key, info);
                }
                Ok(None) => log::warn!("No data for candidate '{key}'"),
                Err(e) if e.is_task_local() => {
                    log::warn!("Failed to analyze candidate '{key}': {e}");
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }));
    }

    for joined in join_all(tasks).await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => log::error!("Candidate task panicked: {e}"),
        }
    }

    let per_candidate = match Arc::try_unwrap(results) {
        Ok(mutex) => mutex.into_inner(),
        Err(shared) => shared.lock().await.clone(),
    };
    let missing = keys
        .into_iter()
        .filter(|key| !per_candidate.contains_key(key))
        .collect();

    Ok(CardinalityResult {
        metric: resolved.selector.clone(),
        total_cardinality: resolved.total,
        per_candidate,
        missing,
    })
}

/// Contribution and, with the drop action, the duplicate check of one
/// candidate. `None` when the backend returned no data.
async fn analyze_candidate(
    explorer: &Explorer,
    selector: &str,
    key: &str,
    total: u64,
    options: &AnalyzeOptions,
) -> Result<Option<(u64, Option<bool>)>> {
    let now = Utc::now();
    let params = QueryParams::new(selector)
        .with_labels(key)
        .with_duration(options.duration.seconds_at(now));
    let eval_time = eval_time_at(now, options.lag);

    let Some(sample) = explorer
        .run_first(Template::LabelCardinality, &params, eval_time)
        .await?
    else {
        return Ok(None);
    };
    let contribution = contribution_percent(total, sample.as_count()?)?;

    let duplicates = if options.drop_action {
        let checked = explorer
            .run_first(Template::DuplicateLabels, &params, eval_time)
            .await
            .and_then(|sample| {
                sample
                    .map(|s| s.as_bool())
                    .transpose()
                    .map_err(ExplorerError::from)
            });
        match checked {
            Ok(duplicates) => duplicates,
            Err(e) if e.is_task_local() => {
                log::warn!("Duplicate check failed for candidate '{key}': {e}");
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    Ok(Some((contribution, duplicates)))
}
