//! The `validate` command: stream every row through the validator and write
//! an error report, without touching the network.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use log::info;

use crate::{
    cli::ValidateArgs,
    io_utils,
    logger::{format_timestamp, mask_value},
    reader::RowSource,
    schema::Schema,
    validator::{ValidationError, Validator},
};

pub fn execute(args: &ValidateArgs) -> Result<()> {
    let schema = Arc::new(Schema::load(&args.schema)?);
    let validator = Validator::new(schema.clone())?;
    let source = RowSource::new(schema.clone(), &args.csv);

    info!(
        "Validating '{}' against schema '{}'",
        args.csv.display(),
        args.schema.display()
    );

    let mut total_rows = 0u64;
    let mut valid_rows = 0u64;
    let mut errors: Vec<ValidationError> = Vec::new();
    for row in source.stream().context("reading CSV input")? {
        let row = row.context("reading CSV input")?;
        let report = validator.validate(row.row_number, &row.columns);
        total_rows += 1;
        if report.valid {
            valid_rows += 1;
        } else {
            errors.extend(report.errors);
        }
    }

    write_report(args, &schema, &errors)?;

    info!("Validation finished: {total_rows} row(s), {valid_rows} valid, {} invalid, {} error(s)",
        total_rows - valid_rows,
        errors.len()
    );
    for error in errors.iter().take(5) {
        info!(
            "  row {}, column {}: {}",
            error.row, error.column, error.message
        );
    }
    if !errors.is_empty() {
        info!("Error report written to {:?}", args.report);
    }

    if args.strict && !errors.is_empty() {
        bail!("validation failed with {} error(s)", errors.len());
    }
    Ok(())
}

fn write_report(args: &ValidateArgs, schema: &Schema, errors: &[ValidationError]) -> Result<()> {
    io_utils::ensure_parent_dir(&args.report)?;
    let mut writer = io_utils::create_csv_writer(&args.report)?;
    writer
        .write_record(["ts", "row", "column", "value", "message"])
        .context("writing report header")?;
    let secret_columns = schema.secret_columns();
    let ts = format_timestamp(&Local::now());
    for error in errors {
        let value = if secret_columns.contains(&error.column) && !error.value.is_empty() {
            mask_value(&error.value)
        } else {
            error.value.clone()
        };
        writer
            .write_record([
                ts.clone(),
                error.row.to_string(),
                error.column.clone(),
                value,
                error.message.clone(),
            ])
            .context("writing report record")?;
    }
    writer.flush().context("flushing report")?;
    Ok(())
}
