//! Console logging backend.

use super::MetricLogger;
use crate::{MetricValue, Metrics};

/// Logger that prints metrics to stdout via tracing.
pub struct ConsoleLogger;

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!("Step {}: {} = {:.4}", step, name, value);
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        // Group output to avoid spamming lines
        let mut sorted_keys: Vec<_> = metrics.keys().collect();
        sorted_keys.sort();

        let mut output = format!("Step {}: ", step);
        let mut first = true;
        for key in &sorted_keys {
            match metrics.get(*key) {
                Some(MetricValue::Scalar(value)) => {
                    if !first {
                        output.push_str(", ");
                    }
                    output.push_str(&format!("{}={:.4}", key, value));
                    first = false;
                }
                Some(MetricValue::Histogram(bars)) => {
                    let rendered = bars
                        .iter()
                        .map(|(label, value)| format!("{}={:.2}", label, value))
                        .collect::<Vec<_>>()
                        .join(" ");
                    tracing::info!("Step {}: {} [{}]", step, key, rendered);
                }
                Some(MetricValue::TokenMatrix { num_options, rows }) => {
                    tracing::info!(
                        "Step {}: {} ({} options, {} tokens)",
                        step,
                        key,
                        num_options,
                        rows.len()
                    );
                }
                None => {}
            }
        }

        tracing::info!("{}", output);
    }
}
