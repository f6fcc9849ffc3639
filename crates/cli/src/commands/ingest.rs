//! Send a log batch to the scaler

use anyhow::{Context, Result};
use scaler_lib::pipeline::{encode_payload, LogBatchEvent, PayloadEncoding};
use std::path::Path;

use crate::client::{ApiClient, BatchResponse, Reply};
use crate::output::{print_json, print_info, report_invocation, OutputFormat};

/// Read a JSON log envelope from `file`, encode it and POST it
pub async fn send_batch(
    client: &ApiClient,
    file: &Path,
    encoding: PayloadEncoding,
    format: OutputFormat,
) -> Result<()> {
    let envelope = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let event = build_event(&envelope, encoding)?;

    let reply: Reply<BatchResponse> = client.post_json("v1/log-batches", &event).await?;

    match format {
        OutputFormat::Json => print_json(&reply.body)?,
        OutputFormat::Table => print_info(&format!("HTTP {}", reply.status)),
    }
    report_invocation(reply.body.success, &reply.body.outcome, &reply.body.summary)
}

pub fn build_event(envelope: &[u8], encoding: PayloadEncoding) -> Result<LogBatchEvent> {
    serde_json::from_slice::<serde_json::Value>(envelope).context("Envelope is not valid JSON")?;

    let payload = match encoding {
        PayloadEncoding::GzipBase64 => {
            String::from_utf8(encode_payload(encoding, envelope)?)?
        }
        PayloadEncoding::Identity => String::from_utf8(envelope.to_vec())?,
        PayloadEncoding::Gzip => anyhow::bail!("raw gzip cannot be sent in a JSON request"),
    };

    Ok(LogBatchEvent { encoding, payload })
}
