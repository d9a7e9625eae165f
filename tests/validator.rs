mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Local};
use csvfire::schema::{
    ColumnType, NormalizeRule, NullPolicy, PreprocessRule, RangeRule, ReplacePair, RowRule,
    TransformRule, UniquenessRule, ValidatorRule,
};
use csvfire::validator::Validator;
use rust_decimal::Decimal;

use common::{column, schema};

fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn required_column_rejects_missing_and_empty_values() {
    let mut name = column("name", ColumnType::String);
    name.required = true;
    let validator = Validator::new(Arc::new(schema(vec![name]))).expect("validator");

    let report = validator.validate(1, &row(&[]));
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].column, "name");
    assert_eq!(report.errors[0].message, "required field is missing or empty");

    let report = validator.validate(2, &row(&[("name", "")]));
    assert!(!report.valid);
}

#[test]
fn empty_required_value_fails_even_without_null_policy() {
    let mut email = column("email", ColumnType::String);
    email.required = true;
    let mut s = schema(vec![email]);
    s.null_policy = NullPolicy {
        treat_empty_as_null: false,
    };
    let validator = Validator::new(Arc::new(s)).expect("validator");
    let report = validator.validate(1, &row(&[("email", "")]));
    assert!(!report.valid);
}

#[test]
fn absent_optional_columns_normalize_to_empty_string() {
    let validator =
        Validator::new(Arc::new(schema(vec![column("note", ColumnType::String)])))
            .expect("validator");
    let report = validator.validate(1, &row(&[]));
    assert!(report.valid);
    assert_eq!(report.data.get("note").map(String::as_str), Some(""));
}

#[test]
fn preprocess_applies_trim_remove_and_ordered_replace() {
    let mut phone = column("phone", ColumnType::String);
    phone.preprocess = vec![PreprocessRule {
        trim: true,
        remove: vec!["-".to_string()],
        replace: vec![
            ReplacePair {
                from: "+82".to_string(),
                to: "0".to_string(),
            },
            ReplacePair {
                from: "00".to_string(),
                to: "0".to_string(),
            },
        ],
    }];
    let validator = Validator::new(Arc::new(schema(vec![phone]))).expect("validator");
    let report = validator.validate(1, &row(&[("phone", "  +820-1234  ")]));
    assert!(report.valid);
    // trim, remove '-', '+82'->'0', then '00'->'0' in declared order
    assert_eq!(report.data["phone"], "01234");
}

#[test]
fn normalize_map_rewrites_exact_matches() {
    let mut status = column("status", ColumnType::String);
    status.normalize = Some(NormalizeRule {
        map: [("Y".to_string(), "yes".to_string())].into_iter().collect(),
    });
    status.enum_values = vec!["yes".to_string(), "no".to_string()];
    let validator = Validator::new(Arc::new(schema(vec![status]))).expect("validator");
    let report = validator.validate(1, &row(&[("status", "Y")]));
    assert!(report.valid);
    assert_eq!(report.data["status"], "yes");
}

#[test]
fn type_checks_cover_int_float_decimal_and_date() {
    let validator = Validator::new(Arc::new(schema(vec![
        column("count", ColumnType::Int),
        column("ratio", ColumnType::Float),
        column(
            "amount",
            ColumnType::Decimal {
                precision: 5,
                scale: 2,
            },
        ),
        column("birth", ColumnType::Date),
    ])))
    .expect("validator");

    let report = validator.validate(
        1,
        &row(&[
            ("count", "-42"),
            ("ratio", "3.25"),
            ("amount", "123.45"),
            ("birth", "19900115"),
        ]),
    );
    assert!(report.valid, "errors: {:?}", report.errors);

    let report = validator.validate(
        2,
        &row(&[
            ("count", "4.5"),
            ("ratio", "NaN"),
            ("amount", "1234.567"),
            ("birth", "1990-01-15"),
        ]),
    );
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 4);
}

#[test]
fn decimal_precision_and_scale_are_enforced() {
    let validator = Validator::new(Arc::new(schema(vec![column(
        "amount",
        ColumnType::Decimal {
            precision: 4,
            scale: 2,
        },
    )])))
    .expect("validator");

    assert!(validator.validate(1, &row(&[("amount", "12.34")])).valid);
    assert!(validator.validate(2, &row(&[("amount", "12.30")])).valid);
    assert!(!validator.validate(3, &row(&[("amount", "1.234")])).valid);
    assert!(!validator.validate(4, &row(&[("amount", "12345")])).valid);
    assert!(!validator.validate(5, &row(&[("amount", "12,34")])).valid);
}

#[test]
fn date_age_gate_applies_to_default_format_only() {
    let too_old = format!("{}0101", Local::now().year() - 130);
    let validator =
        Validator::new(Arc::new(schema(vec![column("birth", ColumnType::Date)])))
            .expect("validator");
    let report = validator.validate(1, &row(&[("birth", too_old.as_str())]));
    assert!(!report.valid);
    assert!(report.errors[0].message.contains("invalid age"));

    let mut birth = column("birth", ColumnType::Date);
    birth.format = Some("%Y-%m-%d".to_string());
    let validator = Validator::new(Arc::new(schema(vec![birth]))).expect("validator");
    let old_date = format!("{}-01-01", Local::now().year() - 130);
    assert!(validator.validate(1, &row(&[("birth", old_date.as_str())])).valid);
}

#[test]
fn range_bounds_numeric_columns() {
    let mut amount = column("amount", ColumnType::Int);
    amount.range = Some(RangeRule {
        min: Some(Decimal::from(1)),
        max: Some(Decimal::from(100)),
    });
    let validator = Validator::new(Arc::new(schema(vec![amount]))).expect("validator");
    assert!(validator.validate(1, &row(&[("amount", "50")])).valid);
    assert!(!validator.validate(2, &row(&[("amount", "0")])).valid);
    assert!(!validator.validate(3, &row(&[("amount", "101")])).valid);
}

#[test]
fn length_is_counted_in_codepoints() {
    let mut name = column("name", ColumnType::String);
    name.min_len = Some(2);
    name.max_len = Some(3);
    let validator = Validator::new(Arc::new(schema(vec![name]))).expect("validator");
    assert!(validator.validate(1, &row(&[("name", "김철수")])).valid);
    assert!(!validator.validate(2, &row(&[("name", "김")])).valid);
    assert!(!validator.validate(3, &row(&[("name", "김철수씨")])).valid);
}

#[test]
fn regex_uses_full_string_semantics() {
    let mut code = column("code", ColumnType::String);
    code.regex = Some("[A-Z]{2}[0-9]{2}".to_string());
    let validator = Validator::new(Arc::new(schema(vec![code]))).expect("validator");
    assert!(validator.validate(1, &row(&[("code", "AB12")])).valid);
    assert!(!validator.validate(2, &row(&[("code", "xAB12x")])).valid);
}

#[test]
fn enum_requires_exact_match() {
    let mut tier = column("tier", ColumnType::String);
    tier.enum_values = vec!["basic".to_string(), "pro".to_string()];
    let validator = Validator::new(Arc::new(schema(vec![tier]))).expect("validator");
    assert!(validator.validate(1, &row(&[("tier", "pro")])).valid);
    let report = validator.validate(2, &row(&[("tier", "Pro")]));
    assert!(!report.valid);
    assert!(report.errors[0].message.contains("must be one of"));
}

#[test]
fn custom_validators_report_their_message() {
    let mut email = column("email", ColumnType::String);
    email.validators = vec![ValidatorRule {
        regex: r"[^@]+@[^@]+\.[^@]+".to_string(),
        message: "not a valid email address".to_string(),
    }];
    let validator = Validator::new(Arc::new(schema(vec![email]))).expect("validator");
    assert!(validator.validate(1, &row(&[("email", "a@b.co")])).valid);
    let report = validator.validate(2, &row(&[("email", "bad")]));
    assert!(!report.valid);
    assert_eq!(report.errors[0].message, "not a valid email address");
}

#[test]
fn transform_formats_korean_mobile_numbers() {
    let mut phone = column("phone", ColumnType::String);
    phone.transform = vec![TransformRule::FormatKoreanPhoneE164];
    let validator = Validator::new(Arc::new(schema(vec![phone]))).expect("validator");
    let report = validator.validate(1, &row(&[("phone", "010-1234-5678")]));
    assert!(report.valid);
    assert_eq!(report.data["phone"], "+821012345678");
}

#[test]
fn failed_columns_keep_their_post_preprocess_value() {
    let mut count = column("count", ColumnType::Int);
    count.preprocess = vec![PreprocessRule {
        trim: true,
        remove: Vec::new(),
        replace: Vec::new(),
    }];
    let validator = Validator::new(Arc::new(schema(vec![count]))).expect("validator");
    let report = validator.validate(1, &row(&[("count", "  abc  ")]));
    assert!(!report.valid);
    assert_eq!(report.data.get("count").map(String::as_str), Some("abc"));
    assert_eq!(report.errors[0].value, "  abc  ");
}

#[test]
fn uniqueness_flags_the_second_occurrence() {
    let mut s = schema(vec![column("phone", ColumnType::String)]);
    s.uniqueness = vec![UniquenessRule {
        column: "phone".to_string(),
    }];
    let validator = Validator::new(Arc::new(s)).expect("validator");

    assert!(validator.validate(1, &row(&[("phone", "0101234")])).valid);
    let report = validator.validate(2, &row(&[("phone", "0101234")]));
    assert!(!report.valid);
    assert!(report.errors[0].message.contains("duplicate"));

    // Empty values never participate in uniqueness.
    assert!(validator.validate(3, &row(&[("phone", "")])).valid);
    assert!(validator.validate(4, &row(&[("phone", "")])).valid);
}

#[test]
fn age_row_rule_passes_and_fails_by_birth_date() {
    let mut s = schema(vec![column("birth", ColumnType::Date)]);
    s.row_rules = vec![RowRule {
        name: "adult".to_string(),
        expr: "age(birth) >= 19 && age(birth) <= 120".to_string(),
    }];
    let validator = Validator::new(Arc::new(s)).expect("validator");

    let adult = format!("{}0101", Local::now().year() - 30);
    assert!(validator.validate(1, &row(&[("birth", adult.as_str())])).valid);

    let minor = format!("{}0101", Local::now().year() - 5);
    let report = validator.validate(2, &row(&[("birth", minor.as_str())]));
    assert!(!report.valid);
    assert!(report.errors[0].message.contains("row rule 'adult' failed"));
}

#[test]
fn unknown_row_rule_expressions_always_pass() {
    let mut s = schema(vec![column("name", ColumnType::String)]);
    s.row_rules = vec![RowRule {
        name: "mystery".to_string(),
        expr: "len(name) > 100".to_string(),
    }];
    let validator = Validator::new(Arc::new(s)).expect("validator");
    assert!(validator.validate(1, &row(&[("name", "x")])).valid);
}

#[test]
fn all_errors_for_a_row_are_collected() {
    let mut name = column("name", ColumnType::String);
    name.required = true;
    let mut count = column("count", ColumnType::Int);
    count.required = true;
    let validator = Validator::new(Arc::new(schema(vec![name, count]))).expect("validator");
    let report = validator.validate(1, &row(&[("name", ""), ("count", "")]));
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 2);
}
