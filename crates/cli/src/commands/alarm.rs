//! Deliver a synthetic alarm notification

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use crate::client::{ApiClient, Reply, ScalingResponse};
use crate::output::{print_json, report_invocation, OutputFormat};

/// Build a notification envelope and POST it
pub async fn trigger_alarm(
    client: &ApiClient,
    state: &str,
    alarm_name: Option<String>,
    reason: &str,
    format: OutputFormat,
) -> Result<()> {
    let body = build_notification(state, alarm_name.as_deref(), reason);
    let reply: Reply<ScalingResponse> = client.post_raw("v1/alarm-notifications", body).await?;

    match format {
        OutputFormat::Json => print_json(&reply.body)?,
        OutputFormat::Table => {
            println!("{}", "Transitions".bold());
            println!("  {}", reply.body.transitions.join(" -> ").cyan());
        }
    }
    report_invocation(reply.body.success, &reply.body.outcome, &reply.body.summary)
}

/// Wrap an alarm state change in the topic delivery envelope
pub fn build_notification(state: &str, alarm_name: Option<&str>, reason: &str) -> String {
    let mut message = json!({
        "NewStateValue": state,
        "NewStateReason": reason,
    });
    if let Some(name) = alarm_name {
        message["AlarmName"] = json!(name);
    }

    json!({
        "Records": [{
            "Sns": { "Message": message.to_string() }
        }]
    })
    .to_string()
}
