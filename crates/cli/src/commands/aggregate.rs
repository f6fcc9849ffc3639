//! Offline aggregation of a log batch
//!
//! Runs the same decode and averaging steps as the service without
//! publishing anything, which is handy for checking captured batches.

use anyhow::{Context, Result};
use colored::Colorize;
use scaler_lib::pipeline::{LogBatchDecoder, MetricAggregator, PayloadEncoding};
use scaler_lib::AggregatedMetrics;
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_timestamp_ms, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct DatapointRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Dimensions")]
    dimensions: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
}

pub fn aggregate_file(
    file: &Path,
    encoding: PayloadEncoding,
    container_name: &str,
    format: OutputFormat,
) -> Result<()> {
    let payload = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let Some(aggregated) = aggregate(&payload, encoding, container_name)? else {
        print_warning("Control message, nothing to aggregate");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&aggregated)?,
        OutputFormat::Table => {
            let rows = aggregated
                .datapoints()
                .iter()
                .map(|d| DatapointRow {
                    metric: d.metric_name.to_string(),
                    value: format!("{:.2}", d.value),
                    unit: d.unit.clone(),
                    dimensions: d
                        .dimensions
                        .iter()
                        .map(|dim| format!("{}={}", dim.name, dim.value))
                        .collect::<Vec<_>>()
                        .join(", "),
                    timestamp: format_timestamp_ms(d.timestamp),
                })
                .collect();
            print_table(rows);
            println!(
                "\n{} samples, {} skipped",
                aggregated.sample_count.to_string().cyan(),
                aggregated.skipped_count.to_string().yellow()
            );
        }
    }
    Ok(())
}

/// Decode and average a payload. `None` for delivery probes.
pub fn aggregate(
    payload: &[u8],
    encoding: PayloadEncoding,
    container_name: &str,
) -> Result<Option<AggregatedMetrics>> {
    let batch = LogBatchDecoder::new().decode_payload(encoding, payload)?;
    if batch.control {
        return Ok(None);
    }

    let aggregated = MetricAggregator::new(container_name).aggregate(batch.records())?;
    Ok(Some(aggregated))
}
