#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{tempdir, TempDir};

use csvfire::request::{Method, RequestSpec, SuccessSpec};
use csvfire::schema::{ColumnSpec, ColumnType, NullPolicy, Schema};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// A column with every optional knob switched off.
pub fn column(name: &str, column_type: ColumnType) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        column_type,
        required: false,
        secret: false,
        format: None,
        min_len: None,
        max_len: None,
        regex: None,
        enum_values: Vec::new(),
        range: None,
        preprocess: Vec::new(),
        normalize: None,
        validators: Vec::new(),
        transform: Vec::new(),
    }
}

pub fn schema(columns: Vec<ColumnSpec>) -> Schema {
    Schema {
        version: 1,
        columns,
        row_rules: Vec::new(),
        uniqueness: Vec::new(),
        null_policy: NullPolicy::default(),
    }
}

pub fn request_spec(url: &str, body: &str) -> RequestSpec {
    RequestSpec {
        method: Method::Post,
        url: url.to_string(),
        headers: Vec::new(),
        body: body.to_string(),
        proxy: None,
        success: SuccessSpec::default(),
    }
}
