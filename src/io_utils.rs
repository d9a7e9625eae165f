//! CSV reader/writer construction shared by the row source and the log sinks.
//!
//! Input readers use standard comma-separated, double-quoted CSV and refuse
//! ragged rows. Writers stick to the default quoting so log files stay easy
//! to eyeball and diff.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result};

pub fn open_csv_reader<R>(reader: R, has_headers: bool, flexible: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .double_quote(true)
        .flexible(flexible);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    has_headers: bool,
    flexible: bool,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(BufReader::new(file), has_headers, flexible))
}

pub fn create_csv_writer(path: &Path) -> Result<csv::Writer<File>> {
    ensure_parent_dir(path)?;
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    Ok(csv::WriterBuilder::new().double_quote(true).from_writer(file))
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating directory {parent:?}"))?;
    }
    Ok(())
}
