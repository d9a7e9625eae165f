mod common;

use std::sync::Arc;

use csvfire::reader::{RawRow, ReadError, RowSource};
use csvfire::schema::ColumnType;

use common::{column, schema, TestWorkspace};

fn two_column_source(workspace: &TestWorkspace, contents: &str) -> RowSource {
    let csv_path = workspace.write("input.csv", contents);
    let schema = Arc::new(schema(vec![
        column("name", ColumnType::String),
        column("phone", ColumnType::String),
    ]));
    RowSource::new(schema, csv_path)
}

#[test]
fn stream_yields_numbered_rows_keyed_by_column_name() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(&workspace, "name,phone\nAlice,010-1111\nBob,010-2222\n");
    let rows: Vec<RawRow> = source
        .stream()
        .expect("stream")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].row_number, 1);
    assert_eq!(rows[1].row_number, 2);
    assert_eq!(rows[0].columns["name"], "Alice");
    assert_eq!(rows[1].columns["phone"], "010-2222");
}

#[test]
fn leading_whitespace_in_fields_is_trimmed() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(&workspace, "name,phone\n  Alice,  010-1111\n");
    let rows: Vec<RawRow> = source
        .stream()
        .expect("stream")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(rows[0].columns["name"], "Alice");
    assert_eq!(rows[0].columns["phone"], "010-1111");
}

#[test]
fn quoted_fields_keep_embedded_commas_and_quotes() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(
        &workspace,
        "name,phone\n\"Lee, Alice\",\"010 \"\"mobile\"\"\"\n",
    );
    let rows: Vec<RawRow> = source
        .stream()
        .expect("stream")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(rows[0].columns["name"], "Lee, Alice");
    assert_eq!(rows[0].columns["phone"], "010 \"mobile\"");
}

#[test]
fn header_count_mismatch_is_fatal() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(&workspace, "name\nAlice\n");
    match source.stream() {
        Err(ReadError::HeaderCount { expected, found }) => {
            assert_eq!(expected, 2);
            assert_eq!(found, 1);
        }
        other => panic!("expected header count error, got {other:?}"),
    }
}

#[test]
fn header_name_mismatch_reports_position() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(&workspace, "name,mobile\nAlice,1\n");
    match source.stream() {
        Err(ReadError::HeaderMismatch {
            position,
            expected,
            found,
        }) => {
            assert_eq!(position, 1);
            assert_eq!(expected, "phone");
            assert_eq!(found, "mobile");
        }
        other => panic!("expected header mismatch, got {other:?}"),
    }
}

#[test]
fn header_comparison_is_case_sensitive() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(&workspace, "Name,phone\nAlice,1\n");
    assert!(matches!(
        source.stream(),
        Err(ReadError::HeaderMismatch { position: 0, .. })
    ));
}

#[test]
fn ragged_rows_are_malformed() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(&workspace, "name,phone\nAlice,1,extra\n");
    let result: Result<Vec<RawRow>, ReadError> = source.stream().expect("stream").collect();
    match result {
        Err(ReadError::MalformedCsv { row, .. }) => assert_eq!(row, 1),
        other => panic!("expected malformed csv, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let schema = Arc::new(schema(vec![column("name", ColumnType::String)]));
    let source = RowSource::new(schema, "/nonexistent/input.csv");
    assert!(matches!(source.stream(), Err(ReadError::Io { .. })));
}

#[test]
fn count_counts_data_rows_without_validation() {
    let workspace = TestWorkspace::new();
    // count ignores the header shape entirely
    let csv_path = workspace.write("input.csv", "a,b,c\n1,2,3\n4,5,6\n7,8,9\n");
    let schema = Arc::new(schema(vec![column("name", ColumnType::String)]));
    let source = RowSource::new(schema, csv_path);
    assert_eq!(source.count().expect("count"), 3);

    let empty = workspace.write("empty.csv", "");
    let schema = Arc::new(schema_for_empty());
    let source = RowSource::new(schema, empty);
    assert_eq!(source.count().expect("count"), 0);
}

fn schema_for_empty() -> csvfire::schema::Schema {
    schema(vec![column("name", ColumnType::String)])
}

#[test]
fn preview_returns_at_most_n_rows() {
    let workspace = TestWorkspace::new();
    let source = two_column_source(&workspace, "name,phone\nA,1\nB,2\nC,3\n");
    let rows = source.preview(2).expect("preview");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].columns["name"], "B");

    let all = source.preview(10).expect("preview");
    assert_eq!(all.len(), 3);
}
