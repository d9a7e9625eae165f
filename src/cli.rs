use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Fire one HTTP request per CSV row", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate CSV rows against a schema and report errors
    Validate(ValidateArgs),
    /// Render request templates for the first rows without sending anything
    Render(RenderArgs),
    /// Validate, render, and execute one HTTP request per row
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Schema file (YAML)
    #[arg(long)]
    pub schema: PathBuf,
    /// Input CSV file
    #[arg(long)]
    pub csv: PathBuf,
    /// Destination for the validation error report
    #[arg(long, default_value = "logs/validate_errors.csv")]
    pub report: PathBuf,
    /// Exit with status 1 when any row fails validation
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Schema file (YAML)
    #[arg(long)]
    pub schema: PathBuf,
    /// Input CSV file
    #[arg(long)]
    pub csv: PathBuf,
    /// Request template file (YAML)
    #[arg(long)]
    pub request: PathBuf,
    /// Number of rows to render
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    /// Destination for the rendered preview (one JSON object per line)
    #[arg(long, default_value = "logs/preview.jsonl")]
    pub preview: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Schema file (YAML)
    #[arg(long)]
    pub schema: PathBuf,
    /// Input CSV file
    #[arg(long)]
    pub csv: PathBuf,
    /// Request template file (YAML)
    #[arg(long)]
    pub request: PathBuf,
    /// Number of concurrent workers
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,
    /// Request rate limit such as `5/s`
    #[arg(long, value_parser = parse_rate)]
    pub rate: Option<f64>,
    /// Per-attempt HTTP timeout such as `10s` or `500ms`
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub timeout: Duration,
    /// Directory for the sent/request-error/validation logs
    #[arg(long = "log", default_value = "logs")]
    pub log_dir: PathBuf,
    /// Export failed rows (original data plus failure reason) to this CSV
    #[arg(long = "export-failed")]
    pub export_failed: Option<PathBuf>,
    /// Skip rows whose fingerprints succeeded in a prior run's sent.csv
    #[arg(long)]
    pub resume: bool,
}

pub fn parse_rate(value: &str) -> Result<f64, String> {
    let raw = value
        .trim()
        .strip_suffix("/s")
        .ok_or_else(|| format!("invalid rate '{value}'; expected a value like '5/s'"))?;
    let rate: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("invalid rate '{value}'; expected a value like '5/s'"))?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err("rate must be a positive number".to_string())
    }
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    let (digits, unit_ms) = if let Some(rest) = trimmed.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = trimmed.strip_suffix('s') {
        (rest, 1_000)
    } else if let Some(rest) = trimmed.strip_suffix('m') {
        (rest, 60_000)
    } else {
        (trimmed, 1_000)
    };
    let amount: f64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{value}'; expected '10s', '500ms', or '1m'"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err("duration must be non-negative".to_string());
    }
    Ok(Duration::from_millis((amount * unit_ms as f64).round() as u64))
}
