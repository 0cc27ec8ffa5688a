use std::collections::{BTreeMap, HashMap};

use tracing::warn;
use vex_common::error::{Result, VexError};

use crate::types::ConstMetric;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Encodes samples into the Prometheus text exposition format.
///
/// Samples are grouped into families by name, families are written in name
/// order and samples keep their emission order inside a family. A family whose
/// samples disagree on label keys is rejected. When a series repeats, the last
/// sample wins: counters arrive sorted by name, so a series reported by both a
/// `boot` VCL and a later `reload_<timestamp>` VCL keeps the newest value.
pub fn encode_text(metrics: &[ConstMetric]) -> Result<String> {
    let mut families: BTreeMap<&str, Vec<&ConstMetric>> = BTreeMap::new();
    for metric in metrics {
        families.entry(metric.name()).or_default().push(metric);
    }

    let mut output = String::new();
    for (name, samples) in families {
        let first = samples[0];
        if samples
            .iter()
            .any(|sample| sample.descriptor.variable_labels != first.descriptor.variable_labels)
        {
            return Err(VexError::InconsistentFamily {
                name: name.to_string(),
            });
        }

        output.push_str("# HELP ");
        output.push_str(name);
        output.push(' ');
        output.push_str(&escape_help(&first.descriptor.help));
        output.push('\n');

        output.push_str("# TYPE ");
        output.push_str(name);
        output.push(' ');
        output.push_str(first.metric_type.as_prometheus_type());
        output.push('\n');

        let mut last: HashMap<&[String], usize> = HashMap::with_capacity(samples.len());
        for (index, sample) in samples.iter().enumerate() {
            if last.insert(sample.label_values.as_slice(), index).is_some() {
                warn!(
                    metric = name,
                    labels = ?sample.label_values,
                    "duplicate series, keeping the latest sample"
                );
            }
        }
        for (index, sample) in samples.iter().enumerate() {
            if last.get(sample.label_values.as_slice()) != Some(&index) {
                continue;
            }
            output.push_str(&render_sample_line(name, &sample.labels(), sample.value));
        }
    }

    Ok(output)
}

fn render_sample_line(name: &str, labels: &[(&str, &str)], value: f64) -> String {
    let mut rendered = String::new();
    rendered.push_str(name);

    if !labels.is_empty() {
        rendered.push('{');
        for (index, (key, value)) in labels.iter().enumerate() {
            if index > 0 {
                rendered.push(',');
            }
            rendered.push_str(key);
            rendered.push_str("=\"");
            rendered.push_str(&escape_label_value(value));
            rendered.push('"');
        }
        rendered.push('}');
    }

    rendered.push(' ');
    rendered.push_str(&format_metric_value(value));
    rendered.push('\n');
    rendered
}

fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else if value.fract() != 0.0 {
        value.to_string()
    } else if value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        // exponent form keeps large counters such as 2^64-1 bitmaps short
        format!("{value:e}")
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}
