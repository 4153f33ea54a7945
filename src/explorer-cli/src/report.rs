//! Rendering of analysis results as tables or CSV.
//!
//! Every section is a set of `key: value` lines followed by an optional
//! Arrow record batch. Tables are rendered with arrow's pretty printer, CSV
//! with arrow's CSV writer, so quoting of selectors is handled there.

use std::io::Write;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use common::config::OutputFormat;
use explorer::analyzer::{Arity, CardinalityResult, LabelInfo};
use explorer::explore::ExploreReport;
use explorer::system::SystemReport;

#[derive(Debug, Clone, Default)]
pub struct Section {
    pub title: Option<String>,
    pub preamble: Vec<(String, String)>,
    pub table: Option<RecordBatch>,
}

impl Section {
    fn with_preamble(mut self, key: &str, value: impl ToString) -> Self {
        self.preamble.push((key.to_string(), value.to_string()));
        self
    }
}

pub fn render<W: Write>(sections: &[Section], format: OutputFormat, out: &mut W) -> anyhow::Result<()> {
    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        match format {
            OutputFormat::Table => render_table(section, out)?,
            OutputFormat::Csv => render_csv(section, out)?,
        }
    }
    Ok(())
}

fn render_table<W: Write>(section: &Section, out: &mut W) -> anyhow::Result<()> {
    if let Some(title) = &section.title {
        writeln!(out, "{title}")?;
    }
    for (key, value) in &section.preamble {
        writeln!(out, "{key}: {value}")?;
    }
    if let Some(batch) = &section.table {
        writeln!(out, "{}", pretty_format_batches(std::slice::from_ref(batch))?)?;
    }
    Ok(())
}

fn render_csv<W: Write>(section: &Section, out: &mut W) -> anyhow::Result<()> {
    let mut preamble = section.preamble.clone();
    if let Some(title) = &section.title {
        preamble.insert(0, (title.clone(), String::new()));
    }

    if !preamble.is_empty() {
        let (keys, values): (Vec<String>, Vec<String>) = preamble.into_iter().unzip();
        let batch = batch(vec![
            utf8("key", keys.iter().map(String::as_str)),
            utf8("value", values.iter().map(String::as_str)),
        ])?;
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(false)
            .build(&mut *out);
        writer.write(&batch)?;
    }

    if let Some(batch) = &section.table {
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(true)
            .build(&mut *out);
        writer.write(batch)?;
    }
    Ok(())
}

type Column = (Field, ArrayRef);

fn utf8<'a>(name: &str, values: impl Iterator<Item = &'a str>) -> Column {
    (
        Field::new(name, DataType::Utf8, false),
        Arc::new(StringArray::from_iter_values(values)),
    )
}

fn batch(columns: Vec<Column>) -> anyhow::Result<RecordBatch> {
    let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = columns.into_iter().unzip();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Contribution table of `cc`, highest contribution first
pub fn cardinality_section(
    result: &CardinalityResult,
    arity: Arity,
    drop_action: bool,
) -> anyhow::Result<Section> {
    let ranked = result.ranked();

    let mut columns = Vec::new();
    match arity {
        Arity::Single => {
            columns.push(utf8("Label", ranked.iter().map(|(key, _)| *key)));
            columns.push((
                Field::new("Unique Value", DataType::UInt64, true),
                Arc::new(
                    ranked
                        .iter()
                        .map(|(_, info)| info.unique_value_count)
                        .collect::<UInt64Array>(),
                ),
            ));
        }
        Arity::Pair => columns.push(utf8("Labels", ranked.iter().map(|(key, _)| *key))),
    }
    columns.push((
        Field::new("Cardinality %", DataType::UInt64, false),
        Arc::new(UInt64Array::from_iter_values(
            ranked.iter().map(|(_, info)| info.contribution_percent),
        )),
    ));
    if drop_action {
        columns.push((
            Field::new("Duplicate Labels Exists", DataType::Boolean, true),
            Arc::new(
                ranked
                    .iter()
                    .map(|(_, info)| info.duplicate_exists_on_drop)
                    .collect::<BooleanArray>(),
            ),
        ));
    }

    Ok(Section {
        table: Some(batch(columns)?),
        ..Default::default()
    }
    .with_preamble("Metric", &result.metric)
    .with_preamble("Cardinality", result.total_cardinality))
}

fn label_values(info: &LabelInfo) -> String {
    info.sample_values
        .iter()
        .map(|(value, count)| format!("{value} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_timestamp(secs: f64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

pub fn explore_sections(report: &ExploreReport) -> anyhow::Result<Vec<Section>> {
    let mut sections = Vec::new();

    if let Some(overview) = &report.cardinality {
        let mut labels: Vec<_> = overview.labels.iter().collect();
        labels.sort_by(|a, b| {
            b.1.unique_value_count
                .cmp(&a.1.unique_value_count)
                .then_with(|| a.0.cmp(b.0))
        });

        let values: Vec<String> = labels.iter().map(|(_, info)| label_values(info)).collect();
        let table = batch(vec![
            utf8("Label", labels.iter().map(|(label, _)| label.as_str())),
            (
                Field::new("Unique Value", DataType::UInt64, true),
                Arc::new(
                    labels
                        .iter()
                        .map(|(_, info)| info.unique_value_count)
                        .collect::<UInt64Array>(),
                ),
            ),
            utf8("Label Values", values.iter().map(String::as_str)),
        ])?;

        sections.push(
            Section {
                table: Some(table),
                ..Default::default()
            }
            .with_preamble("Metric", &report.metric)
            .with_preamble("Cardinality", overview.total),
        );
    }

    let mut rows: Vec<(&str, String, String)> = Vec::new();
    if let Some(interval) = report.scrape_interval {
        rows.push(("Scrape Interval", String::new(), format!("{interval}s")));
    }
    if let Some(o) = &report.churn_rate {
        rows.push(("Churn Rate", o.window.to_string(), format!("{:.2}%", o.value)));
    }
    if let Some(o) = &report.response_time {
        rows.push((
            "Response Time",
            o.window.to_string(),
            format!("{:.3}s", o.value.as_secs_f64()),
        ));
    }
    if let Some(o) = &report.sparseness {
        let verdict = if o.value.is_sparse { "sparse" } else { "dense" };
        rows.push((
            "Sparseness",
            o.window.to_string(),
            format!("{:.2}% gap ({verdict})", o.value.gap_percent),
        ));
    }
    if let Some(o) = &report.last_loss {
        rows.push(("Last Loss", o.window.to_string(), format_timestamp(o.value)));
    }
    if let Some(o) = &report.samples_received {
        rows.push(("Samples Received", o.window.to_string(), o.value.to_string()));
    }
    if let Some(o) = &report.active_timeseries {
        rows.push(("Active Time Series", o.window.to_string(), o.value.to_string()));
    }
    if let Some(o) = &report.ingestion_rate {
        rows.push(("Ingestion Rate", o.window.to_string(), format!("{:.2}", o.value)));
    }
    if let Some(o) = &report.reset_count {
        rows.push(("Reset Count", o.window.to_string(), o.value.to_string()));
    }

    if !rows.is_empty() {
        let table = batch(vec![
            utf8("Observation", rows.iter().map(|r| r.0)),
            utf8("Window (s)", rows.iter().map(|r| r.1.as_str())),
            utf8("Value", rows.iter().map(|r| r.2.as_str())),
        ])?;
        let mut section = Section {
            table: Some(table),
            ..Default::default()
        };
        if report.cardinality.is_none() {
            section = section.with_preamble("Metric", &report.metric);
        }
        sections.push(section);
    }

    Ok(sections)
}

pub fn system_sections(report: &SystemReport) -> anyhow::Result<Vec<Section>> {
    let mut sections = Vec::new();

    if let Some(total) = report.total_series {
        let metrics = &report.top_metrics;
        let table = batch(vec![
            utf8("Metric", metrics.iter().map(|m| m.name.as_str())),
            (
                Field::new("Cardinality", DataType::UInt64, false),
                Arc::new(UInt64Array::from_iter_values(metrics.iter().map(|m| m.series))),
            ),
            (
                Field::new("Percentage", DataType::Float64, false),
                Arc::new(Float64Array::from_iter_values(metrics.iter().map(|m| m.percent))),
            ),
        ])?;
        sections.push(
            Section {
                table: Some(table),
                ..Default::default()
            }
            .with_preamble("Total Series", total),
        );
    }

    if let Some(churn) = report.churn_rate {
        sections.push(Section::default().with_preamble("Churn Rate (last 1h)", churn));
    }

    if let Some(queries) = &report.top_queries {
        let table = batch(vec![
            utf8("Query", queries.iter().map(|q| q.query.as_str())),
            (
                Field::new("Time Range (s)", DataType::Float64, false),
                Arc::new(Float64Array::from_iter_values(
                    queries.iter().map(|q| q.time_range_seconds),
                )),
            ),
            (
                Field::new("Average Response Time (s)", DataType::Float64, true),
                Arc::new(
                    queries
                        .iter()
                        .map(|q| q.avg_duration_seconds)
                        .collect::<Float64Array>(),
                ),
            ),
            (
                Field::new("Count", DataType::UInt64, false),
                Arc::new(UInt64Array::from_iter_values(queries.iter().map(|q| q.count))),
            ),
        ])?;
        sections.push(Section {
            title: Some("Top Queries".to_string()),
            table: Some(table),
            ..Default::default()
        });
    }

    Ok(sections)
}
