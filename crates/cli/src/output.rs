//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print an invocation result and turn a failed one into an error
pub fn report_invocation(success: bool, outcome: &str, summary: &str) -> anyhow::Result<()> {
    if success {
        print_success(&format!("{}: {}", color_outcome(outcome), summary));
        Ok(())
    } else {
        print_error(&format!("{}: {}", color_outcome(outcome), summary));
        anyhow::bail!("invocation failed ({})", outcome)
    }
}

/// Format an epoch-millisecond timestamp as RFC 3339
pub fn format_timestamp_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" => status.green().to_string(),
        "degraded" => status.yellow().to_string(),
        "unhealthy" => status.red().to_string(),
        _ => status.to_string(),
    }
}

pub fn color_outcome(outcome: &str) -> String {
    match outcome {
        "published" | "scaled" => outcome.green().to_string(),
        "skipped" | "saturated" | "superseded" | "ignored" => outcome.blue().to_string(),
        "alarm_stale" => outcome.yellow().to_string(),
        _ => outcome.red().to_string(),
    }
}
