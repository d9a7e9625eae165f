//! Concurrent audit logging.
//!
//! Three CSV sinks live in the log directory: `sent.csv` (one line per HTTP
//! attempt group), `request_errors.csv` (the non-success subset), and
//! `validate_errors.csv` (one line per individual validation error). A
//! background writer task consumes two bounded channels and flushes after
//! every record so partial state survives a crash. Values of columns marked
//! `secret` are masked wherever they appear in a log field.

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat};
use log::error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    client::Outcome,
    io_utils,
    runner::RowObserver,
    schema::Schema,
    validator::{ValidationError, ValidationReport},
};

const CHANNEL_CAPACITY: usize = 1000;

pub const SENT_LOG: &str = "sent.csv";
pub const REQUEST_ERROR_LOG: &str = "request_errors.csv";
pub const VALIDATE_ERROR_LOG: &str = "validate_errors.csv";

const SENT_HEADERS: [&str; 11] = [
    "ts",
    "row",
    "request_id",
    "status_code",
    "success",
    "latency_ms",
    "retries",
    "error_category",
    "error_detail",
    "response_preview",
    "request_hash",
];
const REQUEST_ERROR_HEADERS: [&str; 6] = [
    "ts",
    "row",
    "request_id",
    "error_category",
    "error_detail",
    "status_code",
];
const VALIDATE_ERROR_HEADERS: [&str; 5] = ["ts", "row", "column", "value", "message"];

struct OutcomeEntry {
    ts: DateTime<Local>,
    row: u64,
    outcome: Outcome,
    /// Secret column values for this row, masked out of free-text fields.
    secret_values: Vec<String>,
}

struct ValidationEntry {
    ts: DateTime<Local>,
    row: u64,
    errors: Vec<ValidationError>,
}

struct FailedRow {
    row_number: u64,
    data: HashMap<String, String>,
    reason: String,
}

pub struct AuditLogger {
    schema: Arc<Schema>,
    secret_columns: HashSet<String>,
    outcome_tx: mpsc::Sender<OutcomeEntry>,
    validation_tx: mpsc::Sender<ValidationEntry>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    writer: Mutex<Option<tokio::task::JoinHandle<Result<()>>>>,
    failed: Mutex<Vec<FailedRow>>,
}

impl AuditLogger {
    pub fn new(schema: Arc<Schema>, log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Creating log directory {log_dir:?}"))?;
        let sinks = LogSinks::create(log_dir, schema.secret_columns())?;
        let (outcome_tx, outcome_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (validation_tx, validation_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(sinks, outcome_rx, validation_rx, stop_rx));
        Ok(Self {
            secret_columns: schema.secret_columns(),
            schema,
            outcome_tx,
            validation_tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            writer: Mutex::new(Some(writer)),
            failed: Mutex::new(Vec::new()),
        })
    }

    /// Signals the writer, which drains both channels before returning.
    pub async fn close(&self) -> Result<()> {
        if let Some(stop) = self
            .stop_tx
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take()
        {
            let _ = stop.send(());
        }
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => result?,
                Err(err) => return Err(anyhow!("audit writer task failed: {err}")),
            }
        }
        Ok(())
    }

    pub fn failed_count(&self) -> usize {
        self.failed.lock().unwrap_or_else(|err| err.into_inner()).len()
    }

    /// Writes failed rows to `path` preserving schema column order, with a
    /// trailing `failure_reason` column. Secret column values are masked.
    pub fn export_failed_rows(&self, path: &Path) -> Result<()> {
        let mut failed = self.failed.lock().unwrap_or_else(|err| err.into_inner());
        if failed.is_empty() {
            return Ok(());
        }
        // Workers report out of order; keep the export in input order.
        failed.sort_by_key(|row| row.row_number);
        let mut writer = io_utils::create_csv_writer(path)?;
        let mut headers = self.schema.column_names();
        headers.push("failure_reason".to_string());
        writer
            .write_record(&headers)
            .context("writing failed-row export header")?;
        for row in failed.iter() {
            let mut record = Vec::with_capacity(headers.len());
            for column in &self.schema.columns {
                let value = row.data.get(&column.name).cloned().unwrap_or_default();
                if column.secret && !value.is_empty() {
                    record.push(mask_value(&value));
                } else {
                    record.push(value);
                }
            }
            record.push(row.reason.clone());
            writer
                .write_record(&record)
                .context("writing failed-row export record")?;
        }
        writer.flush().context("flushing failed-row export")?;
        Ok(())
    }

    fn record_failed(&self, row_number: u64, data: &HashMap<String, String>, reason: &str) {
        self.failed
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(FailedRow {
                row_number,
                data: data.clone(),
                reason: reason.to_string(),
            });
    }

    fn secret_values(&self, data: &HashMap<String, String>) -> Vec<String> {
        self.secret_columns
            .iter()
            .filter_map(|column| data.get(column))
            .filter(|value| !value.is_empty())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RowObserver for AuditLogger {
    async fn on_row(&self, row_number: u64, report: &ValidationReport, outcome: Option<&Outcome>) {
        if !report.valid {
            let entry = ValidationEntry {
                ts: Local::now(),
                row: row_number,
                errors: report.errors.clone(),
            };
            if self.validation_tx.send(entry).await.is_err() {
                error!("validation log channel closed; dropping entry for row {row_number}");
            }
            self.record_failed(row_number, &report.data, "validation_failed");
        }
        if let Some(outcome) = outcome {
            let entry = OutcomeEntry {
                ts: Local::now(),
                row: row_number,
                outcome: outcome.clone(),
                secret_values: self.secret_values(&report.data),
            };
            if self.outcome_tx.send(entry).await.is_err() {
                error!("outcome log channel closed; dropping entry for row {row_number}");
            }
            if !outcome.success {
                let reason = outcome
                    .error_category
                    .map(|category| category.as_str())
                    .unwrap_or("request_failed");
                self.record_failed(row_number, &report.data, reason);
            }
        }
    }
}

struct LogSinks {
    sent: csv::Writer<File>,
    request_errors: csv::Writer<File>,
    validate_errors: csv::Writer<File>,
    secret_columns: HashSet<String>,
}

impl LogSinks {
    fn create(log_dir: &Path, secret_columns: HashSet<String>) -> Result<Self> {
        let mut sent = io_utils::create_csv_writer(&log_dir.join(SENT_LOG))?;
        sent.write_record(SENT_HEADERS).context("writing sent.csv header")?;
        sent.flush().context("flushing sent.csv header")?;

        let mut request_errors = io_utils::create_csv_writer(&log_dir.join(REQUEST_ERROR_LOG))?;
        request_errors
            .write_record(REQUEST_ERROR_HEADERS)
            .context("writing request_errors.csv header")?;
        request_errors
            .flush()
            .context("flushing request_errors.csv header")?;

        let mut validate_errors = io_utils::create_csv_writer(&log_dir.join(VALIDATE_ERROR_LOG))?;
        validate_errors
            .write_record(VALIDATE_ERROR_HEADERS)
            .context("writing validate_errors.csv header")?;
        validate_errors
            .flush()
            .context("flushing validate_errors.csv header")?;

        Ok(Self {
            sent,
            request_errors,
            validate_errors,
            secret_columns,
        })
    }

    fn write_outcome(&mut self, entry: &OutcomeEntry) -> Result<()> {
        let ts = format_timestamp(&entry.ts);
        let outcome = &entry.outcome;
        let detail = mask_occurrences(
            outcome.error_detail.as_deref().unwrap_or_default(),
            &entry.secret_values,
        );
        let preview = mask_occurrences(&outcome.response_preview, &entry.secret_values);
        let category = outcome
            .error_category
            .map(|category| category.as_str())
            .unwrap_or_default();
        self.sent
            .write_record([
                ts.clone(),
                entry.row.to_string(),
                outcome.request_id.clone(),
                outcome.status_code.to_string(),
                outcome.success.to_string(),
                outcome.latency_ms.to_string(),
                outcome.retries.to_string(),
                category.to_string(),
                detail.clone(),
                preview.clone(),
                outcome.fingerprint.clone(),
            ])
            .context("writing sent.csv record")?;
        self.sent.flush().context("flushing sent.csv")?;

        if !outcome.success {
            self.request_errors
                .write_record([
                    ts,
                    entry.row.to_string(),
                    outcome.request_id.clone(),
                    category.to_string(),
                    detail,
                    outcome.status_code.to_string(),
                ])
                .context("writing request_errors.csv record")?;
            self.request_errors
                .flush()
                .context("flushing request_errors.csv")?;
        }
        Ok(())
    }

    fn write_validation(&mut self, entry: &ValidationEntry) -> Result<()> {
        let ts = format_timestamp(&entry.ts);
        for error in &entry.errors {
            let value = if self.secret_columns.contains(&error.column) && !error.value.is_empty() {
                mask_value(&error.value)
            } else {
                error.value.clone()
            };
            self.validate_errors
                .write_record([
                    ts.clone(),
                    error.row.to_string(),
                    error.column.clone(),
                    value,
                    error.message.clone(),
                ])
                .context("writing validate_errors.csv record")?;
        }
        self.validate_errors
            .flush()
            .context("flushing validate_errors.csv")?;
        Ok(())
    }
}

async fn write_loop(
    mut sinks: LogSinks,
    mut outcome_rx: mpsc::Receiver<OutcomeEntry>,
    mut validation_rx: mpsc::Receiver<ValidationEntry>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            entry = outcome_rx.recv() => match entry {
                Some(entry) => sinks.write_outcome(&entry)?,
                None => break,
            },
            entry = validation_rx.recv() => match entry {
                Some(entry) => sinks.write_validation(&entry)?,
                None => break,
            },
            _ = &mut stop_rx => break,
        }
    }
    // Drain whatever is still buffered before shutting down.
    while let Ok(entry) = outcome_rx.try_recv() {
        sinks.write_outcome(&entry)?;
    }
    while let Ok(entry) = validation_rx.try_recv() {
        sinks.write_validation(&entry)?;
    }
    Ok(())
}

pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// First two + stars + last two; all stars when four characters or fewer.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let mut masked = String::with_capacity(chars.len());
    masked.extend(&chars[..2]);
    masked.extend(std::iter::repeat('*').take(chars.len() - 4));
    masked.extend(&chars[chars.len() - 2..]);
    masked
}

fn mask_occurrences(text: &str, secret_values: &[String]) -> String {
    let mut result = text.to_string();
    for value in secret_values {
        if result.contains(value.as_str()) {
            result = result.replace(value.as_str(), &mask_value(value));
        }
    }
    result
}

/// Rehydrates the idempotency index from a prior run's `sent.csv`, keeping
/// fingerprints of entries recorded as successful.
pub fn load_sent_fingerprints(path: &Path) -> Result<HashSet<String>> {
    let mut reader = io_utils::open_csv_reader_from_path(path, true, true)
        .with_context(|| format!("Opening prior run log {path:?}"))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Reading header of {path:?}"))?
        .clone();
    let success_idx = headers
        .iter()
        .position(|name| name == "success")
        .ok_or_else(|| anyhow!("{path:?} is not a sent.csv (missing 'success' column)"))?;
    let hash_idx = headers
        .iter()
        .position(|name| name == "request_hash")
        .ok_or_else(|| anyhow!("{path:?} is not a sent.csv (missing 'request_hash' column)"))?;
    let mut fingerprints = HashSet::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Reading prior run log {path:?}"))?;
        if record.get(success_idx) == Some("true") {
            if let Some(hash) = record.get(hash_idx).filter(|hash| !hash.is_empty()) {
                fingerprints.insert(hash.to_string());
            }
        }
    }
    Ok(fingerprints)
}
