//! Log batch envelope decoding
//!
//! Unwraps the transport envelope of a log subscription delivery:
//! base64 text, gzip compression, then the JSON envelope holding the
//! individual log events. Record contents are left uninterpreted.

use crate::error::{ScalerError, ScalerResult};
use base64::Engine;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Envelope message type used by the log service for delivery probes
const CONTROL_MESSAGE: &str = "CONTROL_MESSAGE";

/// How the payload of a log batch event is encoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadEncoding {
    /// Base64 text wrapping gzip-compressed JSON (log subscription default)
    #[default]
    #[serde(rename = "gzip+base64", alias = "gzip-base64")]
    GzipBase64,
    /// Raw gzip bytes
    #[serde(rename = "gzip")]
    Gzip,
    /// Uncompressed JSON
    #[serde(rename = "identity")]
    Identity,
}

impl std::str::FromStr for PayloadEncoding {
    type Err = ScalerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gzip+base64" | "gzip-base64" => Ok(PayloadEncoding::GzipBase64),
            "gzip" => Ok(PayloadEncoding::Gzip),
            "identity" => Ok(PayloadEncoding::Identity),
            other => Err(ScalerError::Validation(format!(
                "unknown payload encoding '{}'",
                other
            ))),
        }
    }
}

/// Inbound log batch trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatchEvent {
    #[serde(default)]
    pub encoding: PayloadEncoding,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEnvelope {
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    log_group: Option<String>,
    #[serde(default)]
    log_stream: Option<String>,
    #[serde(default)]
    log_events: Vec<LogEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogEvent {
    #[serde(default)]
    timestamp: Option<i64>,
    message: String,
}

/// One raw record from the batch, still unparsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub message: String,
    /// Epoch milliseconds assigned by the log service
    pub timestamp: Option<i64>,
}

/// The unwrapped contents of one log batch
#[derive(Debug, Clone)]
pub struct DecodedBatch {
    pub log_group: Option<String>,
    pub log_stream: Option<String>,
    /// True for delivery probes, which carry no records
    pub control: bool,
    events: Vec<LogEvent>,
}

impl DecodedBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Lazily yield the raw records in delivery order
    pub fn records(&self) -> impl Iterator<Item = RawRecord> + '_ {
        self.events.iter().map(|e| RawRecord {
            message: e.message.clone(),
            timestamp: e.timestamp,
        })
    }
}

/// Decoder for log batch envelopes
#[derive(Debug, Clone, Default)]
pub struct LogBatchDecoder {
    /// Upper bound on decompressed size, guards against gzip bombs
    max_decompressed_bytes: Option<usize>,
}

impl LogBatchDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_decompressed_bytes(mut self, limit: usize) -> Self {
        self.max_decompressed_bytes = Some(limit);
        self
    }

    /// Decode a whole event. Any envelope failure rejects the batch.
    pub fn decode(&self, event: &LogBatchEvent) -> ScalerResult<DecodedBatch> {
        self.decode_payload(event.encoding, event.payload.as_bytes())
    }

    pub fn decode_payload(
        &self,
        encoding: PayloadEncoding,
        payload: &[u8],
    ) -> ScalerResult<DecodedBatch> {
        let json = match encoding {
            PayloadEncoding::GzipBase64 => {
                let compressed = base64::engine::general_purpose::STANDARD
                    .decode(trim_ascii(payload))
                    .map_err(|e| ScalerError::Decode(format!("invalid base64: {}", e)))?;
                self.gunzip(&compressed)?
            }
            PayloadEncoding::Gzip => self.gunzip(payload)?,
            PayloadEncoding::Identity => payload.to_vec(),
        };

        let envelope: LogEnvelope = serde_json::from_slice(&json)
            .map_err(|e| ScalerError::Decode(format!("invalid envelope: {}", e)))?;

        let control = envelope.message_type.as_deref() == Some(CONTROL_MESSAGE);

        Ok(DecodedBatch {
            log_group: envelope.log_group,
            log_stream: envelope.log_stream,
            control,
            events: if control { Vec::new() } else { envelope.log_events },
        })
    }

    fn gunzip(&self, compressed: &[u8]) -> ScalerResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed);
        let mut out = Vec::new();

        let read = match self.max_decompressed_bytes {
            // Read one byte past the limit to detect overflow
            Some(limit) => (&mut decoder).take(limit as u64 + 1).read_to_end(&mut out),
            None => decoder.read_to_end(&mut out),
        };
        read.map_err(|e| ScalerError::Decode(format!("invalid gzip stream: {}", e)))?;

        if let Some(limit) = self.max_decompressed_bytes {
            if out.len() > limit {
                return Err(ScalerError::Decode(format!(
                    "decompressed payload exceeds {} bytes",
                    limit
                )));
            }
        }

        Ok(out)
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// Encode a JSON envelope for transport, the inverse of [`LogBatchDecoder::decode_payload`]
pub fn encode_payload(encoding: PayloadEncoding, json: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    if encoding == PayloadEncoding::Identity {
        return Ok(json.to_vec());
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json)?;
    let compressed = encoder.finish()?;

    match encoding {
        PayloadEncoding::GzipBase64 => Ok(base64::engine::general_purpose::STANDARD
            .encode(compressed)
            .into_bytes()),
        _ => Ok(compressed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip_base64(json: &str) -> String {
        String::from_utf8(encode_payload(PayloadEncoding::GzipBase64, json.as_bytes()).unwrap())
            .unwrap()
    }

    const ENVELOPE: &str = r#"{
        "messageType": "DATA_MESSAGE",
        "owner": "123456789012",
        "logGroup": "/aws/ecs/containerinsights/ConsumerCluster/performance",
        "logStream": "FargateTelemetry-1234",
        "subscriptionFilters": ["MetricsProducer"],
        "logEvents": [
            {"id": "1", "timestamp": 1000, "message": "{\"CpuUtilized\": 10}"},
            {"id": "2", "timestamp": 2000, "message": "{\"CpuUtilized\": 20}"}
        ]
    }"#;

    #[test]
    fn test_decode_gzip_base64_envelope() {
        let payload = gzip_base64(ENVELOPE);
        let event = LogBatchEvent {
            encoding: PayloadEncoding::GzipBase64,
            payload,
        };

        let batch = LogBatchDecoder::new().decode(&event).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(!batch.control);
        assert_eq!(
            batch.log_group.as_deref(),
            Some("/aws/ecs/containerinsights/ConsumerCluster/performance")
        );
        assert_eq!(batch.log_stream.as_deref(), Some("FargateTelemetry-1234"));

        let records: Vec<_> = batch.records().collect();
        assert_eq!(records[0].message, "{\"CpuUtilized\": 10}");
        assert_eq!(records[1].timestamp, Some(2000));
    }

    #[test]
    fn test_decode_identity_envelope() {
        let batch = LogBatchDecoder::new()
            .decode_payload(PayloadEncoding::Identity, ENVELOPE.as_bytes())
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_decode_raw_gzip_bytes() {
        let compressed = encode_payload(PayloadEncoding::Gzip, ENVELOPE.as_bytes()).unwrap();
        let batch = LogBatchDecoder::new()
            .decode_payload(PayloadEncoding::Gzip, &compressed)
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_control_message_yields_no_records() {
        let json = r#"{"messageType": "CONTROL_MESSAGE", "logEvents": [{"id": "x", "timestamp": 1, "message": "CWL CONTROL MESSAGE: Checking health of destination"}]}"#;
        let batch = LogBatchDecoder::new()
            .decode_payload(PayloadEncoding::Identity, json.as_bytes())
            .unwrap();
        assert!(batch.control);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let event = LogBatchEvent {
            encoding: PayloadEncoding::GzipBase64,
            payload: "!!not base64!!".to_string(),
        };
        let err = LogBatchDecoder::new().decode(&event).unwrap_err();
        assert!(matches!(err, ScalerError::Decode(_)));
    }

    #[test]
    fn test_non_gzip_payload_is_decode_error() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"plain text");
        let event = LogBatchEvent {
            encoding: PayloadEncoding::GzipBase64,
            payload,
        };
        let err = LogBatchDecoder::new().decode(&event).unwrap_err();
        assert!(matches!(err, ScalerError::Decode(_)));
    }

    #[test]
    fn test_malformed_envelope_json_is_decode_error() {
        let err = LogBatchDecoder::new()
            .decode_payload(PayloadEncoding::Identity, b"{\"logEvents\": 7}")
            .unwrap_err();
        assert!(matches!(err, ScalerError::Decode(_)));
    }

    #[test]
    fn test_decompressed_size_limit() {
        let payload = gzip_base64(ENVELOPE);
        let event = LogBatchEvent {
            encoding: PayloadEncoding::GzipBase64,
            payload,
        };
        let err = LogBatchDecoder::new()
            .with_max_decompressed_bytes(16)
            .decode(&event)
            .unwrap_err();
        assert!(err.to_string().contains("exceeds 16 bytes"));
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!(
            "gzip+base64".parse::<PayloadEncoding>().unwrap(),
            PayloadEncoding::GzipBase64
        );
        assert_eq!(
            "identity".parse::<PayloadEncoding>().unwrap(),
            PayloadEncoding::Identity
        );
        assert!("zstd".parse::<PayloadEncoding>().is_err());
    }
}
