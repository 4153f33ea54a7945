//! Query templates.
//!
//! Every analytic query the explorer issues is produced from one of the fixed
//! [`Template`]s. Template text uses a tiny placeholder syntax:
//!
//! - `{{metric}}`: the metric selector, e.g. `http_requests_total{job="api"}`
//! - `{{labels}}`: a label or a comma separated label set
//! - `{{duration}}`: the window in seconds, rendered as a bare number
//! - `{{#counter}} .. {{else}} .. {{/counter}}`: branch on [`MetricKind`]
//!
//! Compiled templates are cached per [`QueryBuilder`], keyed by the SHA-256 of
//! the template text.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template parse error: {0}")]
    Parse(String),
    #[error("Template render error: field '{0}' is referenced but not set")]
    Render(Field),
}

/// Substitution fields a template may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Metric,
    Labels,
    Duration,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Metric => "metric",
            Field::Labels => "labels",
            Field::Duration => "duration",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    #[default]
    Counter,
    Other,
}

/// Values substituted into a template. Built fresh for every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub metric: String,
    /// Label or comma joined label set, e.g. `pod, container`
    pub labels: Option<String>,
    pub duration_secs: Option<u64>,
    pub metric_kind: MetricKind,
}

impl QueryParams {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            labels: None,
            duration_secs: None,
            metric_kind: MetricKind::default(),
        }
    }

    pub fn with_labels(mut self, labels: impl Into<String>) -> Self {
        self.labels = Some(labels.into());
        self
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.metric_kind = kind;
        self
    }
}

/// The fixed set of analytic queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    /// Number of series left once the labels are removed
    LabelCardinality,
    /// 1 when removing the labels merges distinct series, 0 otherwise
    DuplicateLabels,
    /// Percent change of the series count against one hour earlier
    ChurnRate,
    /// Active series divided by the scrape interval
    IngestionRate,
    SamplesReceived,
    ActiveTimeSeries,
    ResetCount,
    /// Time since last change for counters, last sample timestamp otherwise
    LastLoss,
    /// Average time the series were present within 8 minute sub-windows
    SparseDuration,
    ScrapeInterval,
    /// Executed as a range query to time the backend
    ResponseTime,
    SystemChurnRate,
}

impl Template {
    pub const ALL: [Template; 12] = [
        Template::LabelCardinality,
        Template::DuplicateLabels,
        Template::ChurnRate,
        Template::IngestionRate,
        Template::SamplesReceived,
        Template::ActiveTimeSeries,
        Template::ResetCount,
        Template::LastLoss,
        Template::SparseDuration,
        Template::ScrapeInterval,
        Template::ResponseTime,
        Template::SystemChurnRate,
    ];

    pub fn text(&self) -> &'static str {
        match self {
            Template::LabelCardinality => {
                "count ( group without ( {{labels}} ) ( count_over_time ( {{metric}}[{{duration}}s] ) ) )"
            }
            Template::DuplicateLabels => concat!(
                "sum ( group without ( {{labels}} ) ( count_over_time ( {{metric}}[{{duration}}s] ) ) )",
                " != bool ",
                "sum ( count without ( {{labels}} ) ( count_over_time ( {{metric}}[{{duration}}s] ) ) )"
            ),
            Template::ChurnRate => concat!(
                "( count ( count_over_time ( {{metric}}[{{duration}}s] ) ) offset 1h",
                " - count ( count_over_time ( {{metric}}[{{duration}}s] ) ) ) * 100",
                " / count ( count_over_time ( {{metric}}[{{duration}}s] ) )"
            ),
            Template::IngestionRate => {
                "count ( last_over_time ( {{metric}}[{{duration}}s] ) ) / scrape_interval ( {{metric}} )"
            }
            Template::SamplesReceived => "sum ( count_over_time ( {{metric}}[{{duration}}s] ) )",
            Template::ActiveTimeSeries => "count ( last_over_time ( {{metric}}[{{duration}}s] ) )",
            Template::ResetCount => "count ( resets ( {{metric}}[{{duration}}s] ) )",
            Template::LastLoss => concat!(
                "{{#counter}}tlast_change_over_time ( sum ( {{metric}}[{{duration}}s] ) )",
                "{{else}}timestamp ( sum ( {{metric}}[{{duration}}s] ) ){{/counter}}"
            ),
            Template::SparseDuration => {
                "avg ( duration_over_time ( {{metric}}[{{duration}}s], 8m ) )"
            }
            Template::ScrapeInterval => "scrape_interval ( {{metric}} )",
            Template::ResponseTime => "count_over_time ( {{metric}}[{{duration}}s] )",
            Template::SystemChurnRate => {
                "count ( count_over_time ( scrape_samples_scraped{}[1h] ) )"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
    ByKind {
        counter: Vec<Segment>,
        other: Vec<Segment>,
    },
}

/// A parsed template, addressed by the hash of its source text
#[derive(Debug, PartialEq, Eq)]
pub struct CompiledTemplate {
    hash: String,
    segments: Vec<Segment>,
}

impl CompiledTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut tokens = tokenize(text)?.into_iter();
        match parse_segments(&mut tokens)? {
            (segments, None) => Ok(Self {
                hash: content_hash(text),
                segments,
            }),
            (_, Some(tag)) => Err(TemplateError::Parse(format!("unexpected {{{{{tag}}}}}"))),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn render(&self, params: &QueryParams) -> Result<String, TemplateError> {
        let mut out = String::new();
        render_segments(&self.segments, params, &mut out)?;
        Ok(out)
    }
}

fn render_segments(
    segments: &[Segment],
    params: &QueryParams,
    out: &mut String,
) -> Result<(), TemplateError> {
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Field(Field::Metric) => out.push_str(&params.metric),
            Segment::Field(Field::Labels) => {
                let labels = params
                    .labels
                    .as_deref()
                    .ok_or(TemplateError::Render(Field::Labels))?;
                out.push_str(labels);
            }
            Segment::Field(Field::Duration) => {
                let secs = params
                    .duration_secs
                    .ok_or(TemplateError::Render(Field::Duration))?;
                out.push_str(&secs.to_string());
            }
            Segment::ByKind { counter, other } => match params.metric_kind {
                MetricKind::Counter => render_segments(counter, params, out)?,
                MetricKind::Other => render_segments(other, params, out)?,
            },
        }
    }
    Ok(())
}

enum Token {
    Text(String),
    Tag(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or_else(|| TemplateError::Parse(format!("unclosed tag at byte {start}")))?;
        tokens.push(Token::Tag(after_open[..end].trim().to_string()));
        rest = &after_open[end + 2..];
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

/// Parses until the input ends or a block tag (`else`, `/counter`) closes the
/// current block. The closing tag is returned to the caller.
fn parse_segments(
    tokens: &mut std::vec::IntoIter<Token>,
) -> Result<(Vec<Segment>, Option<String>), TemplateError> {
    let mut segments = Vec::new();

    while let Some(token) = tokens.next() {
        let tag = match token {
            Token::Text(text) => {
                segments.push(Segment::Text(text));
                continue;
            }
            Token::Tag(tag) => tag,
        };

        match tag.as_str() {
            "metric" => segments.push(Segment::Field(Field::Metric)),
            "labels" => segments.push(Segment::Field(Field::Labels)),
            "duration" => segments.push(Segment::Field(Field::Duration)),
            "#counter" => {
                let (counter, closing) = parse_segments(tokens)?;
                let other = match closing.as_deref() {
                    Some("/counter") => Vec::new(),
                    Some("else") => match parse_segments(tokens)? {
                        (other, Some(closing)) if closing == "/counter" => other,
                        _ => return Err(TemplateError::Parse("unclosed {{#counter}}".into())),
                    },
                    _ => return Err(TemplateError::Parse("unclosed {{#counter}}".into())),
                };
                segments.push(Segment::ByKind { counter, other });
            }
            "else" | "/counter" => return Ok((segments, Some(tag))),
            unknown => {
                return Err(TemplateError::Parse(format!(
                    "unknown placeholder '{unknown}'"
                )));
            }
        }
    }

    Ok((segments, None))
}

fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Compiled templates keyed by content hash. Entries are never evicted.
#[derive(Debug, Default)]
pub struct TemplateCache {
    compiled: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
}

impl TemplateCache {
    pub fn compile(&self, text: &str) -> Result<Arc<CompiledTemplate>, TemplateError> {
        let hash = content_hash(text);

        // a poisoned lock still guards fully inserted entries
        if let Some(compiled) = self
            .compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&hash)
        {
            return Ok(Arc::clone(compiled));
        }

        let compiled = Arc::new(CompiledTemplate::parse(text)?);
        log::debug!("Compiled query template {hash}");

        // first insert wins so concurrent compiles hand out the same object
        let mut entries = self
            .compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(entries.entry(hash).or_insert(compiled)))
    }

    pub fn len(&self) -> usize {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns a [`Template`] and [`QueryParams`] into an executable query
#[derive(Debug, Default)]
pub struct QueryBuilder {
    cache: TemplateCache,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&self, template: Template, params: &QueryParams) -> Result<String, TemplateError> {
        self.cache.compile(template.text())?.render(params)
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_cardinality_render() {
        let builder = QueryBuilder::new();
        let params = QueryParams::new("up")
            .with_labels("instance")
            .with_duration(300);

        let query = builder.build(Template::LabelCardinality, &params).unwrap();

        assert!(query.contains("group without ( instance )"));
        assert!(query.contains("[300s]"));
        assert_eq!(
            query,
            "count ( group without ( instance ) ( count_over_time ( up[300s] ) ) )"
        );
    }

    #[test]
    fn test_duplicate_labels_render() {
        let builder = QueryBuilder::new();
        let params = QueryParams::new(r#"http_requests_total{job="api"}"#)
            .with_labels("pod, container")
            .with_duration(3600);

        let query = builder.build(Template::DuplicateLabels, &params).unwrap();

        assert!(query.contains(" != bool "));
        assert!(query.contains("group without ( pod, container )"));
        assert!(query.contains("count without ( pod, container )"));
        assert_eq!(query.matches(r#"http_requests_total{job="api"}[3600s]"#).count(), 2);
    }

    #[test]
    fn test_last_loss_branches_on_metric_kind() {
        let builder = QueryBuilder::new();
        let params = QueryParams::new("node_cpu_seconds_total").with_duration(3600);

        let counter = builder.build(Template::LastLoss, &params).unwrap();
        assert_eq!(
            counter,
            "tlast_change_over_time ( sum ( node_cpu_seconds_total[3600s] ) )"
        );

        let gauge = builder
            .build(Template::LastLoss, &params.with_kind(MetricKind::Other))
            .unwrap();
        assert_eq!(gauge, "timestamp ( sum ( node_cpu_seconds_total[3600s] ) )");
    }

    #[test]
    fn test_missing_field_is_render_error() {
        let builder = QueryBuilder::new();
        let params = QueryParams::new("up").with_duration(60);

        let err = builder
            .build(Template::LabelCardinality, &params)
            .unwrap_err();
        assert_eq!(err, TemplateError::Render(Field::Labels));

        let err = builder
            .build(Template::ResetCount, &QueryParams::new("up"))
            .unwrap_err();
        assert_eq!(err, TemplateError::Render(Field::Duration));
    }

    #[test]
    fn test_templates_without_duration() {
        let builder = QueryBuilder::new();

        assert_eq!(
            builder
                .build(Template::ScrapeInterval, &QueryParams::new("up"))
                .unwrap(),
            "scrape_interval ( up )"
        );
        assert_eq!(
            builder
                .build(Template::SystemChurnRate, &QueryParams::new(""))
                .unwrap(),
            "count ( count_over_time ( scrape_samples_scraped{}[1h] ) )"
        );
    }

    #[test]
    fn test_sparseness_uses_eight_minute_subwindow() {
        let builder = QueryBuilder::new();
        let query = builder
            .build(
                Template::SparseDuration,
                &QueryParams::new("up").with_duration(3600),
            )
            .unwrap();

        assert_eq!(query, "avg ( duration_over_time ( up[3600s], 8m ) )");
    }

    #[test]
    fn test_all_templates_compile() {
        let cache = TemplateCache::default();
        for template in Template::ALL {
            cache.compile(template.text()).unwrap();
        }
        assert_eq!(cache.len(), Template::ALL.len());
    }

    #[test]
    fn test_cache_returns_same_object() {
        let cache = TemplateCache::default();
        let text = Template::ChurnRate.text();

        let first = cache.compile(text).unwrap();
        let second = cache.compile(&text.to_string()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.hash().len(), 64);
    }

    #[test]
    fn test_concurrent_compile() {
        let cache = TemplateCache::default();
        let text = Template::LabelCardinality.text();

        let compiled: Vec<Arc<CompiledTemplate>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.compile(text).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(cache.len(), 1);
        let cached = cache.compile(text).unwrap();
        for template in &compiled {
            assert!(Arc::ptr_eq(template, &cached));
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            CompiledTemplate::parse("count({{metric}"),
            Err(TemplateError::Parse(_))
        ));
        assert!(matches!(
            CompiledTemplate::parse("{{metrics}}"),
            Err(TemplateError::Parse(msg)) if msg.contains("metrics")
        ));
        assert!(matches!(
            CompiledTemplate::parse("{{#counter}}a{{else}}b"),
            Err(TemplateError::Parse(_))
        ));
        assert!(matches!(
            CompiledTemplate::parse("a{{else}}b"),
            Err(TemplateError::Parse(_))
        ));
    }

    #[test]
    fn test_counter_block_without_else() {
        let template = CompiledTemplate::parse("x{{#counter}} y{{/counter}}").unwrap();

        let counter = template.render(&QueryParams::new("m")).unwrap();
        let other = template
            .render(&QueryParams::new("m").with_kind(MetricKind::Other))
            .unwrap();

        assert_eq!(counter, "x y");
        assert_eq!(other, "x");
    }
}
