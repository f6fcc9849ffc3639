//! Batch aggregation of utilization samples
//!
//! Reduces one decoded batch to a CPU/memory datapoint pair. Records that
//! fail field validation are skipped and counted; an all-invalid batch is
//! rejected rather than averaged into NaN.

use super::decoder::RawRecord;
use crate::error::{ScalerError, ScalerResult};
use crate::models::{AggregatedMetric, AggregatedMetrics, Dimension, MetricName, UtilizationSample};
use serde_json::{Map, Value};
use tracing::debug;

pub const DIMENSION_CLUSTER: &str = "ClusterName";
pub const DIMENSION_SERVICE: &str = "ServiceName";
pub const DIMENSION_CONTAINER: &str = "ContainerName";

/// Unit string attached to every published datapoint
pub const METRIC_UNIT: &str = "None";

/// Why a record was not turned into a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleRejection {
    NotAnObject,
    MissingField(&'static str),
    NonNumeric(&'static str),
}

impl std::fmt::Display for SampleRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleRejection::NotAnObject => write!(f, "record is not a JSON object"),
            SampleRejection::MissingField(field) => write!(f, "missing field {}", field),
            SampleRejection::NonNumeric(field) => write!(f, "field {} is not numeric", field),
        }
    }
}

/// Parse a raw record into a sample.
///
/// Numeric fields accept JSON numbers or numeric strings; non-finite
/// values are rejected.
pub fn parse_sample(record: &RawRecord) -> Result<UtilizationSample, SampleRejection> {
    let value: Value =
        serde_json::from_str(&record.message).map_err(|_| SampleRejection::NotAnObject)?;
    let obj = value.as_object().ok_or(SampleRejection::NotAnObject)?;

    let cpu_utilized = numeric_field(obj, "CpuUtilized")?;
    let memory_utilized = numeric_field(obj, "MemoryUtilized")?;
    let cluster_name = string_field(obj, DIMENSION_CLUSTER)?;
    let service_name = string_field(obj, DIMENSION_SERVICE)?;
    let container_name = obj
        .get(DIMENSION_CONTAINER)
        .and_then(Value::as_str)
        .map(str::to_string);

    // No wall-clock fallback: identical batches must yield identical datapoints
    let timestamp = obj
        .get("Timestamp")
        .and_then(Value::as_i64)
        .or(record.timestamp)
        .ok_or(SampleRejection::MissingField("Timestamp"))?;

    Ok(UtilizationSample {
        cluster_name,
        service_name,
        container_name,
        cpu_utilized,
        memory_utilized,
        timestamp,
    })
}

fn numeric_field(obj: &Map<String, Value>, field: &'static str) -> Result<f64, SampleRejection> {
    let parsed = match obj.get(field) {
        None | Some(Value::Null) => return Err(SampleRejection::MissingField(field)),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(SampleRejection::NonNumeric(field)),
    }
}

fn string_field(obj: &Map<String, Value>, field: &'static str) -> Result<String, SampleRejection> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(SampleRejection::MissingField(field))
}

/// Averages CPU and memory utilization across a batch
#[derive(Debug, Clone)]
pub struct MetricAggregator {
    container_name: String,
}

impl MetricAggregator {
    /// `container_name` is the configured container, used as the
    /// ContainerName dimension for every batch
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
        }
    }

    /// Aggregate a batch of raw records.
    ///
    /// Cluster and service identity come from the last valid sample.
    /// Samples with differing identities are not detected.
    pub fn aggregate<I>(&self, records: I) -> ScalerResult<AggregatedMetrics>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut cpu_sum = 0.0_f64;
        let mut memory_sum = 0.0_f64;
        let mut valid = 0usize;
        let mut skipped = 0usize;
        let mut identity: Option<(String, String)> = None;
        let mut newest = i64::MIN;

        for record in records {
            match parse_sample(&record) {
                Ok(sample) => {
                    cpu_sum += sample.cpu_utilized;
                    memory_sum += sample.memory_utilized;
                    valid += 1;
                    newest = newest.max(sample.timestamp);
                    identity = Some((sample.cluster_name, sample.service_name));
                }
                Err(reason) => {
                    skipped += 1;
                    debug!(reason = %reason, "Skipping invalid utilization record");
                }
            }
        }

        let Some((cluster, service)) = identity else {
            return Err(ScalerError::EmptyBatch { skipped });
        };

        let count = valid as f64;
        let dimensions = vec![
            Dimension::new(DIMENSION_CLUSTER, cluster),
            Dimension::new(DIMENSION_SERVICE, service),
            Dimension::new(DIMENSION_CONTAINER, self.container_name.clone()),
        ];

        Ok(AggregatedMetrics {
            cpu: datapoint(MetricName::CpuUtilized, dimensions.clone(), cpu_sum / count, newest),
            memory: datapoint(MetricName::MemoryUtilized, dimensions, memory_sum / count, newest),
            sample_count: valid,
            skipped_count: skipped,
        })
    }
}

fn datapoint(
    metric_name: MetricName,
    dimensions: Vec<Dimension>,
    value: f64,
    timestamp: i64,
) -> AggregatedMetric {
    AggregatedMetric {
        metric_name,
        dimensions,
        value,
        unit: METRIC_UNIT.to_string(),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> RawRecord {
        RawRecord {
            message: message.to_string(),
            timestamp: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn test_parse_sample_accepts_numeric_strings() {
        let sample = parse_sample(&record(
            r#"{"ClusterName":"c","ServiceName":"s","CpuUtilized":"12.5","MemoryUtilized":256}"#,
        ))
        .unwrap();
        assert_eq!(sample.cpu_utilized, 12.5);
        assert_eq!(sample.memory_utilized, 256.0);
        assert_eq!(sample.timestamp, 1_700_000_000_000);
        assert_eq!(sample.container_name, None);
    }

    #[test]
    fn test_parse_sample_without_any_timestamp_is_rejected() {
        let record = RawRecord {
            message: r#"{"ClusterName":"c","ServiceName":"s","CpuUtilized":1,"MemoryUtilized":2}"#
                .to_string(),
            timestamp: None,
        };
        assert_eq!(
            parse_sample(&record),
            Err(SampleRejection::MissingField("Timestamp"))
        );

        let stamped = RawRecord {
            message: r#"{"ClusterName":"c","ServiceName":"s","CpuUtilized":1,"MemoryUtilized":2,"Timestamp":7}"#
                .to_string(),
            timestamp: None,
        };
        assert_eq!(parse_sample(&stamped).unwrap().timestamp, 7);
    }

    #[test]
    fn test_parse_sample_prefers_record_timestamp() {
        let sample = parse_sample(&record(
            r#"{"ClusterName":"c","ServiceName":"s","CpuUtilized":1,"MemoryUtilized":2,"Timestamp":42}"#,
        ))
        .unwrap();
        assert_eq!(sample.timestamp, 42);
    }

    #[test]
    fn test_parse_sample_rejections() {
        assert_eq!(
            parse_sample(&record("not json")),
            Err(SampleRejection::NotAnObject)
        );
        assert_eq!(
            parse_sample(&record("[1, 2]")),
            Err(SampleRejection::NotAnObject)
        );
        assert_eq!(
            parse_sample(&record(
                r#"{"ClusterName":"c","ServiceName":"s","MemoryUtilized":2}"#
            )),
            Err(SampleRejection::MissingField("CpuUtilized"))
        );
        assert_eq!(
            parse_sample(&record(
                r#"{"ClusterName":"c","ServiceName":"s","CpuUtilized":"high","MemoryUtilized":2}"#
            )),
            Err(SampleRejection::NonNumeric("CpuUtilized"))
        );
        assert_eq!(
            parse_sample(&record(
                r#"{"ClusterName":"c","ServiceName":"s","CpuUtilized":"NaN","MemoryUtilized":2}"#
            )),
            Err(SampleRejection::NonNumeric("CpuUtilized"))
        );
        assert_eq!(
            parse_sample(&record(r#"{"ServiceName":"s","CpuUtilized":1,"MemoryUtilized":2}"#)),
            Err(SampleRejection::MissingField("ClusterName"))
        );
    }

    #[test]
    fn test_empty_input_is_empty_batch() {
        let err = MetricAggregator::new("web")
            .aggregate(Vec::<RawRecord>::new())
            .unwrap_err();
        assert_eq!(err, ScalerError::EmptyBatch { skipped: 0 });
    }
}
