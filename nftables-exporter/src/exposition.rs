//! Rendering of collected samples in Prometheus exposition formats.

use std::fmt::{self, Write};

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::registry::Registry;

use crate::collector::{MetricDescriptor, MetricSample};

/// Content type of the classic Prometheus text format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Content type of the OpenMetrics text format.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Wire format of a scrape response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpositionFormat {
    Text,
    OpenMetrics,
}

impl ExpositionFormat {
    /// Pick the format for a request from its `Accept` header.
    ///
    /// OpenMetrics is only served when enabled and explicitly accepted by
    /// the client; everything else gets the classic text format.
    pub fn negotiate(accept: Option<&str>, open_metrics_enabled: bool) -> Self {
        let wants_open_metrics = accept
            .map(|accept| {
                accept
                    .split(',')
                    .any(|part| part.trim().starts_with("application/openmetrics-text"))
            })
            .unwrap_or(false);

        if open_metrics_enabled && wants_open_metrics {
            ExpositionFormat::OpenMetrics
        } else {
            ExpositionFormat::Text
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExpositionFormat::Text => TEXT_CONTENT_TYPE,
            ExpositionFormat::OpenMetrics => OPENMETRICS_CONTENT_TYPE,
        }
    }
}

/// Render samples grouped under their descriptors.
pub fn render(
    descriptors: &[&'static MetricDescriptor],
    samples: Vec<MetricSample>,
    format: ExpositionFormat,
) -> Result<String, fmt::Error> {
    match format {
        ExpositionFormat::Text => render_text(descriptors, &samples),
        ExpositionFormat::OpenMetrics => render_open_metrics(descriptors, samples),
    }
}

/// One scrape's worth of samples, registered as a collector.
#[derive(Debug)]
struct SampleSet {
    descriptors: Vec<&'static MetricDescriptor>,
    samples: Vec<MetricSample>,
}

impl Collector for SampleSet {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        for descriptor in &self.descriptors {
            let mut metric_encoder = encoder.encode_descriptor(
                descriptor.name,
                descriptor.help,
                None,
                descriptor.metric_type,
            )?;

            for sample in self
                .samples
                .iter()
                .filter(|s| s.descriptor.name == descriptor.name)
            {
                let family_encoder = metric_encoder.encode_family(&sample.labels)?;
                ConstCounter::new(sample.value).encode(family_encoder)?;
            }
        }
        Ok(())
    }
}

fn render_open_metrics(
    descriptors: &[&'static MetricDescriptor],
    samples: Vec<MetricSample>,
) -> Result<String, fmt::Error> {
    let mut registry = Registry::default();
    registry.register_collector(Box::new(SampleSet {
        descriptors: descriptors.to_vec(),
        samples,
    }));

    let mut output = String::new();
    prometheus_client::encoding::text::encode(&mut output, &registry)?;
    Ok(output)
}

fn render_text(
    descriptors: &[&'static MetricDescriptor],
    samples: &[MetricSample],
) -> Result<String, fmt::Error> {
    let mut output = String::with_capacity(samples.len() * 100);

    for descriptor in descriptors {
        writeln!(
            output,
            "# HELP {} {}",
            descriptor.name,
            escape_help(descriptor.help)
        )?;
        writeln!(
            output,
            "# TYPE {} {}",
            descriptor.name,
            type_name(descriptor.metric_type)
        )?;

        for sample in samples.iter().filter(|s| s.descriptor.name == descriptor.name) {
            writeln!(
                output,
                "{}{} {}",
                descriptor.name,
                format_labels(&descriptor.label_names, &sample.labels.values()),
                format_value(sample.value)
            )?;
        }
    }

    Ok(output)
}

fn type_name(metric_type: MetricType) -> &'static str {
    match metric_type {
        MetricType::Counter => "counter",
        MetricType::Gauge => "gauge",
        _ => "untyped",
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(names: &[&str], values: &[&str]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in help text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
