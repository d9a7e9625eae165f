//! The `run` command: wires the row source, runner, and audit logger
//! together, handles Ctrl-C, resume preloading, and the failed-row export.

use std::{collections::HashSet, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;

use crate::{
    cancel::CancelToken,
    cli::RunArgs,
    client::DEFAULT_MAX_RETRIES,
    logger::{self, AuditLogger},
    reader::RowSource,
    request::RequestSpec,
    runner::{RowObserver, RunConfig, Runner},
    schema::Schema,
};

pub fn execute(args: &RunArgs) -> Result<()> {
    let schema = Arc::new(Schema::load(&args.schema)?);
    let spec = Arc::new(RequestSpec::load(&args.request)?);
    let source = RowSource::new(schema.clone(), &args.csv);
    let total_rows = source.count().context("counting CSV rows")?;

    info!(
        "Executing {total_rows} row(s) with concurrency {} (timeout {:?})",
        args.concurrency, args.timeout
    );
    if let Some(rate) = args.rate {
        info!("Rate limit: {rate}/s");
    }

    let resume_fingerprints = if args.resume {
        let prior = args.log_dir.join(logger::SENT_LOG);
        if prior.is_file() {
            let fingerprints = logger::load_sent_fingerprints(&prior)?;
            info!(
                "Resume: preloaded {} fingerprint(s) from {prior:?}",
                fingerprints.len()
            );
            fingerprints
        } else {
            warn!("Resume requested but {prior:?} does not exist; starting fresh");
            HashSet::new()
        }
    } else {
        HashSet::new()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(run_async(args, schema, spec, source, resume_fingerprints))
}

async fn run_async(
    args: &RunArgs,
    schema: Arc<Schema>,
    spec: Arc<RequestSpec>,
    source: RowSource,
    resume_fingerprints: HashSet<String>,
) -> Result<()> {
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, draining workers");
                cancel.cancel();
            }
        });
    }

    let logger = Arc::new(AuditLogger::new(schema.clone(), &args.log_dir)?);
    let config = RunConfig {
        concurrency: args.concurrency,
        rate_per_second: args.rate,
        timeout: args.timeout,
        max_retries: DEFAULT_MAX_RETRIES,
    };
    let runner = Arc::new(Runner::new(schema, spec, &config, cancel.clone())?);
    runner.preload_fingerprints(resume_fingerprints);

    let (tx, rx) = mpsc::channel(args.concurrency.max(1) * 2);
    let producer_cancel = cancel.clone();
    let producer = std::thread::spawn(move || -> Result<()> {
        for row in source.stream()? {
            let row = row?;
            if producer_cancel.is_cancelled() {
                break;
            }
            if tx.blocking_send(row).is_err() {
                break;
            }
        }
        Ok(())
    });

    let observer: Arc<dyn RowObserver> = logger.clone();
    let result = runner.run(rx, observer).await;

    let producer_result = match producer.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("CSV producer thread panicked")),
    };

    logger.close().await?;
    if let Some(path) = &args.export_failed {
        if logger.failed_count() > 0 {
            logger.export_failed_rows(path)?;
            info!("Exported {} failed row(s) to {path:?}", logger.failed_count());
        }
    }

    info!(
        "Run finished: {} total, {} success, {} failed, {} skipped in {:.1}s",
        result.total,
        result.success,
        result.failed,
        result.skipped,
        result.duration.as_secs_f64()
    );

    producer_result.context("reading CSV input")?;
    if cancel.is_cancelled() {
        bail!("run canceled before completion");
    }
    Ok(())
}
