//! Output formatting utilities

use chrono::{TimeZone, Utc};
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

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T]) {
    if items.is_empty() {
        println!("{}", "No rows".yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Status lines go to stderr so stdout stays machine-readable
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// Format joules with a readable prefix
pub fn format_energy(joules: f64) -> String {
    const KJ: f64 = 1_000.0;
    const MJ: f64 = KJ * 1_000.0;

    if joules >= MJ {
        format!("{:.2} MJ", joules / MJ)
    } else if joules >= KJ {
        format!("{:.2} kJ", joules / KJ)
    } else {
        format!("{:.2} J", joules)
    }
}

pub fn format_power(watts: Option<f64>) -> String {
    match watts {
        Some(w) => format!("{:.2} W", w),
        None => "-".to_string(),
    }
}

/// Unix seconds as RFC3339
pub fn format_timestamp(seconds: f64) -> String {
    Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| seconds.to_string())
}

/// Color a join status
pub fn color_status(status: &str) -> String {
    match status {
        "matched" => status.green().to_string(),
        "sparse" | "no_labels" | "no_features" => status.yellow().to_string(),
        "key_mismatch" => status.red().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_energy() {
        assert_eq!(format_energy(12.0), "12.00 J");
        assert_eq!(format_energy(3600.0), "3.60 kJ");
        assert_eq!(format_energy(2_500_000.0), "2.50 MJ");
    }

    #[test]
    fn test_format_power_and_timestamp() {
        assert_eq!(format_power(None), "-");
        assert_eq!(format_power(Some(4.0)), "4.00 W");
        assert_eq!(format_timestamp(1714564800.0), "2024-05-01T12:00:00+00:00");
    }
}
