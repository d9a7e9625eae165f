//! The `render` command: a dry run that validates the first rows and writes
//! the rendered requests to a JSONL preview file instead of sending them.

use std::{fs::File, io::BufWriter, io::Write, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    cli::RenderArgs,
    fingerprint, io_utils,
    reader::RowSource,
    request::RequestSpec,
    schema::Schema,
    template::Renderer,
    validator::{NormalizedRow, Validator},
};

pub fn execute(args: &RenderArgs) -> Result<()> {
    let schema = Arc::new(Schema::load(&args.schema)?);
    let spec = Arc::new(RequestSpec::load(&args.request)?);
    let validator = Validator::new(schema.clone())?;
    let renderer = Renderer::new(&spec)?;
    let source = RowSource::new(schema, &args.csv);

    info!(
        "Rendering up to {} row(s) from '{}'",
        args.limit,
        args.csv.display()
    );

    let rows = source.preview(args.limit).context("reading CSV input")?;
    io_utils::ensure_parent_dir(&args.preview)?;
    let file = File::create(&args.preview)
        .with_context(|| format!("Creating preview file {:?}", args.preview))?;
    let mut out = BufWriter::new(file);

    let mut processed = 0usize;
    for row in rows {
        let report = validator.validate(row.row_number, &row.columns);
        if !report.valid {
            warn!("row {}: validation failed, skipping", row.row_number);
            continue;
        }
        let fingerprint = fingerprint::compute(&spec, &report.data);
        let normalized = NormalizedRow {
            row_number: row.row_number,
            data: report.data,
            fingerprint,
        };
        let rendered = match renderer.render(&normalized) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!("row {}: {err}", row.row_number);
                continue;
            }
        };
        let headers: serde_json::Map<String, serde_json::Value> = rendered
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
            .collect();
        let line = serde_json::json!({
            "row": row.row_number,
            "method": rendered.method.as_str(),
            "url": rendered.url,
            "headers": headers,
            "body": rendered.body,
            "proxy": rendered.proxy,
        });
        writeln!(out, "{line}").context("writing preview line")?;
        processed += 1;
    }
    out.flush().context("flushing preview file")?;

    info!(
        "Preview finished: {processed} row(s) written to {:?}",
        args.preview
    );
    Ok(())
}
