//! Row validation and normalization.
//!
//! Each column runs through the same pipeline: null handling, required
//! check, preprocess, normalize map, type check, range, length, regex, enum,
//! custom validators, and finally transforms. Errors are collected, never
//! short-circuited, so one row yields all of its errors in a single report.
//! The validator is stateful across a run: it tracks seen values for
//! uniqueness constraints and evaluates row-level predicates.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;

use crate::schema::{
    ColumnSpec, ColumnType, RowPredicate, Schema, TransformRule, DEFAULT_DATE_FORMAT,
};

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub row: u64,
    pub column: String,
    pub value: String,
    pub message: String,
}

/// Outcome of validating one row. `data` holds the normalized values
/// best-effort: columns that failed validation are still present with their
/// post-preprocess value, and absent optional columns map to an empty string.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NormalizedRow {
    pub row_number: u64,
    pub data: HashMap<String, String>,
    pub fingerprint: String,
}

struct CompiledColumn {
    regex: Option<Regex>,
    validators: Vec<(Regex, String)>,
}

struct CompiledRowRule {
    name: String,
    expr: String,
    predicate: RowPredicate,
    date_format: String,
}

pub struct Validator {
    schema: Arc<Schema>,
    columns: Vec<CompiledColumn>,
    row_rules: Vec<CompiledRowRule>,
    seen: Mutex<HashMap<String, HashSet<String>>>,
}

impl Validator {
    pub fn new(schema: Arc<Schema>) -> Result<Self> {
        let columns = schema
            .columns
            .iter()
            .map(|column| {
                let regex = column
                    .regex
                    .as_deref()
                    .map(|pattern| anchored(pattern))
                    .transpose()
                    .with_context(|| format!("compiling regex for column '{}'", column.name))?;
                let validators = column
                    .validators
                    .iter()
                    .map(|rule| {
                        let message = if rule.message.is_empty() {
                            "value does not match validation rule".to_string()
                        } else {
                            rule.message.clone()
                        };
                        anchored(&rule.regex)
                            .map(|regex| (regex, message))
                            .with_context(|| {
                                format!("compiling validator regex for column '{}'", column.name)
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledColumn { regex, validators })
            })
            .collect::<Result<Vec<_>>>()?;
        let row_rules = schema
            .row_rules
            .iter()
            .map(|rule| {
                let predicate = rule.compile();
                let date_format = match &predicate {
                    RowPredicate::AgeInRange { column, .. } => schema
                        .column(column)
                        .map(|spec| spec.date_format().to_string())
                        .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string()),
                    RowPredicate::AlwaysTrue => DEFAULT_DATE_FORMAT.to_string(),
                };
                CompiledRowRule {
                    name: rule.name.clone(),
                    expr: rule.expr.clone(),
                    predicate,
                    date_format,
                }
            })
            .collect();
        let seen = schema
            .uniqueness
            .iter()
            .map(|rule| (rule.column.clone(), HashSet::new()))
            .collect();
        Ok(Self {
            schema,
            columns,
            row_rules,
            seen: Mutex::new(seen),
        })
    }

    pub fn validate(&self, row_number: u64, raw: &HashMap<String, String>) -> ValidationReport {
        let mut report = ValidationReport {
            valid: true,
            errors: Vec::new(),
            data: HashMap::with_capacity(self.schema.columns.len()),
        };

        for (index, column) in self.schema.columns.iter().enumerate() {
            let raw_value = raw.get(&column.name).map(String::as_str).unwrap_or("");
            let mut present = raw.contains_key(&column.name);
            if self.schema.null_policy.treat_empty_as_null && raw_value.is_empty() {
                present = false;
            }

            if column.required && (!present || raw_value.is_empty()) {
                report.valid = false;
                report.errors.push(ValidationError {
                    row: row_number,
                    column: column.name.clone(),
                    value: raw_value.to_string(),
                    message: "required field is missing or empty".to_string(),
                });
                continue;
            }

            if !present || raw_value.is_empty() {
                report.data.insert(column.name.clone(), String::new());
                continue;
            }

            let mut value = preprocess(raw_value, column);
            if let Some(normalize) = &column.normalize {
                if let Some(mapped) = normalize.map.get(&value) {
                    value = mapped.clone();
                }
            }

            if let Err(err) = self.check_value(&value, column, &self.columns[index]) {
                report.valid = false;
                report.errors.push(ValidationError {
                    row: row_number,
                    column: column.name.clone(),
                    value: raw_value.to_string(),
                    message: format!("{err}"),
                });
                report.data.insert(column.name.clone(), value);
                continue;
            }

            for rule in &column.transform {
                match rule {
                    TransformRule::FormatKoreanPhoneE164 => {
                        value = korean_phone_e164(&value);
                    }
                }
            }
            report.data.insert(column.name.clone(), value);
        }

        if report.valid {
            self.check_uniqueness(row_number, &mut report);
        }
        if report.valid {
            self.check_row_rules(row_number, &mut report);
        }
        report
    }

    fn check_value(
        &self,
        value: &str,
        column: &ColumnSpec,
        compiled: &CompiledColumn,
    ) -> Result<()> {
        match &column.column_type {
            ColumnType::String => {}
            ColumnType::Int => {
                value
                    .parse::<i64>()
                    .map_err(|err| anyhow!("invalid integer: {err}"))?;
            }
            ColumnType::Float => {
                let parsed = value
                    .parse::<f64>()
                    .map_err(|err| anyhow!("invalid float: {err}"))?;
                if !parsed.is_finite() {
                    return Err(anyhow!("invalid float: NaN and infinity are not accepted"));
                }
            }
            ColumnType::Decimal { precision, scale } => {
                let parsed = Decimal::from_str_exact(value)
                    .map_err(|err| anyhow!("invalid decimal: {err}"))?
                    .normalize();
                if parsed.scale() > *scale {
                    return Err(anyhow!("too many fractional digits (max {scale})"));
                }
                let digits = parsed.mantissa().unsigned_abs().to_string().len() as u32;
                if digits > *precision {
                    return Err(anyhow!("too many significant digits (max {precision})"));
                }
            }
            ColumnType::Date => {
                let format = column.date_format();
                let parsed = NaiveDate::parse_from_str(value, format)
                    .map_err(|err| anyhow!("invalid date format: {err}"))?;
                if format == DEFAULT_DATE_FORMAT {
                    let age = age_in_years(parsed, Local::now().date_naive());
                    if !(0..=120).contains(&age) {
                        return Err(anyhow!("invalid age: {age} (must be 0-120)"));
                    }
                }
            }
        }

        if let Some(range) = &column.range {
            if let Ok(parsed) = value.parse::<Decimal>() {
                if let Some(min) = range.min {
                    if parsed < min {
                        return Err(anyhow!("value below minimum {min}"));
                    }
                }
                if let Some(max) = range.max {
                    if parsed > max {
                        return Err(anyhow!("value above maximum {max}"));
                    }
                }
            }
        }

        let length = value.chars().count();
        if let Some(min_len) = column.min_len {
            if length < min_len {
                return Err(anyhow!("value too short (min {min_len} characters)"));
            }
        }
        if let Some(max_len) = column.max_len {
            if length > max_len {
                return Err(anyhow!("value too long (max {max_len} characters)"));
            }
        }

        if let Some(regex) = &compiled.regex {
            if !regex.is_match(value) {
                return Err(anyhow!("value does not match required pattern"));
            }
        }

        if !column.enum_values.is_empty() && !column.enum_values.iter().any(|v| v == value) {
            return Err(anyhow!(
                "value must be one of: {}",
                column.enum_values.join(", ")
            ));
        }

        for (regex, message) in &compiled.validators {
            if !regex.is_match(value) {
                return Err(anyhow!("{message}"));
            }
        }

        Ok(())
    }

    fn check_uniqueness(&self, row_number: u64, report: &mut ValidationReport) {
        let mut seen = self.seen.lock().unwrap_or_else(|err| err.into_inner());
        for rule in &self.schema.uniqueness {
            let Some(value) = report.data.get(&rule.column).filter(|v| !v.is_empty()) else {
                continue;
            };
            let values = seen.entry(rule.column.clone()).or_default();
            if values.contains(value) {
                report.valid = false;
                report.errors.push(ValidationError {
                    row: row_number,
                    column: rule.column.clone(),
                    value: value.clone(),
                    message: "duplicate value violates uniqueness constraint".to_string(),
                });
            } else {
                values.insert(value.clone());
            }
        }
    }

    fn check_row_rules(&self, row_number: u64, report: &mut ValidationReport) {
        let today = Local::now().date_naive();
        for rule in &self.row_rules {
            let passed = match &rule.predicate {
                RowPredicate::AlwaysTrue => true,
                RowPredicate::AgeInRange { column, min, max } => report
                    .data
                    .get(column)
                    .filter(|value| !value.is_empty())
                    .and_then(|value| NaiveDate::parse_from_str(value, &rule.date_format).ok())
                    .map(|birth| {
                        let age = age_in_years(birth, today);
                        age >= *min && age <= *max
                    })
                    .unwrap_or(false),
            };
            if !passed {
                report.valid = false;
                report.errors.push(ValidationError {
                    row: row_number,
                    column: String::new(),
                    value: String::new(),
                    message: format!("row rule '{}' failed: {}", rule.name, rule.expr),
                });
            }
        }
    }
}

fn preprocess(value: &str, column: &ColumnSpec) -> String {
    let mut result = value.to_string();
    for rule in &column.preprocess {
        if rule.trim {
            result = result
                .trim_matches(|c: char| c.is_ascii_whitespace())
                .to_string();
        }
        for needle in &rule.remove {
            result = result.replace(needle.as_str(), "");
        }
        for pair in &rule.replace {
            result = result.replace(pair.from.as_str(), &pair.to);
        }
    }
    result
}

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(Into::into)
}

/// Korean mobile numbers reduce to E.164 by dropping the leading `0` and
/// prepending `+82`; anything that does not look like one passes through as
/// bare digits.
pub(crate) fn korean_phone_e164(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if (digits.len() == 10 && digits.starts_with('0'))
        || (digits.len() == 11 && digits.starts_with("01"))
    {
        format!("+82{}", &digits[1..])
    } else {
        digits
    }
}

pub(crate) fn age_in_years(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}
