//! Service health

use anyhow::Result;
use colored::Colorize;
use scaler_lib::{ComponentStatus, HealthResponse};
use tabled::Tabled;

use crate::client::{ApiClient, Reply};
use crate::output::{color_status, format_timestamp_ms, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let reply: Reply<HealthResponse> = client.get("healthz").await?;
    let health = reply.body;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!(
                "{} {}",
                "Overall:".bold(),
                color_status(status_name(health.status))
            );
            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_name(c.status)),
                    message: c.message.clone().unwrap_or_else(|| "-".to_string()),
                    updated: format_timestamp_ms(c.updated_at * 1000),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            print_table(rows);
        }
    }

    if health.status == ComponentStatus::Unhealthy {
        anyhow::bail!("scaler is unhealthy");
    }
    Ok(())
}

fn status_name(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}
