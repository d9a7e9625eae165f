use std::{collections::BTreeMap, collections::HashSet, fmt, path::Path, str::FromStr};

use anyhow::{anyhow, Context, Result};
use log::warn;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Float,
    Decimal { precision: u32, scale: u32 },
    Date,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::Float | ColumnType::Decimal { .. }
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::String => write!(f, "string"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            ColumnType::Date => write!(f, "date"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        match normalized {
            "string" => return Ok(ColumnType::String),
            "int" => return Ok(ColumnType::Int),
            "float" => return Ok(ColumnType::Float),
            "date" => return Ok(ColumnType::Date),
            _ => {}
        }
        if let Some(params) = normalized
            .strip_prefix("decimal(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let (precision, scale) = params.split_once(',').ok_or_else(|| {
                anyhow!("invalid decimal type '{value}'; expected decimal(precision,scale)")
            })?;
            let precision: u32 = precision
                .trim()
                .parse()
                .with_context(|| format!("invalid decimal precision in '{value}'"))?;
            let scale: u32 = scale
                .trim()
                .parse()
                .with_context(|| format!("invalid decimal scale in '{value}'"))?;
            if precision == 0 || scale == 0 || scale > precision {
                return Err(anyhow!(
                    "invalid decimal type '{value}'; requires 0 < scale <= precision"
                ));
            }
            return Ok(ColumnType::Decimal { precision, scale });
        }
        Err(anyhow!(
            "unknown column type '{value}'. Supported types: string, int, float, decimal(P,S), date"
        ))
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One `{from, to}` substitution, applied to every occurrence in order of
/// declaration. An ordered list rather than a map so that overlapping
/// replacements behave predictably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePair {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreprocessRule {
    #[serde(default)]
    pub trim: bool,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub replace: Vec<ReplacePair>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeRule {
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorRule {
    pub regex: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformRule {
    FormatKoreanPhoneE164,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeRule {
    #[serde(default)]
    pub min: Option<Decimal>,
    #[serde(default)]
    pub max: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    /// Date parse format (chrono strftime); only meaningful for `date` columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preprocess: Vec<PreprocessRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize: Option<NormalizeRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transform: Vec<TransformRule>,
}

impl ColumnSpec {
    pub fn date_format(&self) -> &str {
        self.format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRule {
    pub name: String,
    pub expr: String,
}

/// A row rule decoded into a typed predicate. The rule grammar covers exactly
/// one shape, `age(<column>) >= <int> && age(<column>) <= <int>`; anything
/// else decodes to [`RowPredicate::AlwaysTrue`]. This is not a general
/// expression engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPredicate {
    AgeInRange { column: String, min: i32, max: i32 },
    AlwaysTrue,
}

impl RowRule {
    pub fn compile(&self) -> RowPredicate {
        static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(
                r"^age\((\w+)\)\s*>=\s*(\d+)\s*&&\s*age\((\w+)\)\s*<=\s*(\d+)$",
            )
            .expect("age rule pattern")
        });
        let Some(captures) = pattern.captures(self.expr.trim()) else {
            return RowPredicate::AlwaysTrue;
        };
        if &captures[1] != &captures[3] {
            return RowPredicate::AlwaysTrue;
        }
        match (captures[2].parse(), captures[4].parse()) {
            (Ok(min), Ok(max)) => RowPredicate::AgeInRange {
                column: captures[1].to_string(),
                min,
                max,
            },
            _ => RowPredicate::AlwaysTrue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniquenessRule {
    pub column: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NullPolicy {
    #[serde(default)]
    pub treat_empty_as_null: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub row_rules: Vec<RowRule>,
    #[serde(default)]
    pub uniqueness: Vec<UniquenessRule>,
    #[serde(default)]
    pub null_policy: NullPolicy,
}

impl Schema {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Reading schema file {path:?}"))?;
        let schema: Schema =
            serde_yaml::from_str(&raw).with_context(|| format!("Parsing schema YAML {path:?}"))?;
        schema
            .validate()
            .with_context(|| format!("Invalid schema {path:?}"))?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(anyhow!("unsupported schema version {}", self.version));
        }
        if self.columns.is_empty() {
            return Err(anyhow!("schema defines no columns"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(anyhow!("column name cannot be empty"));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(anyhow!("duplicate column name '{}'", column.name));
            }
            if let Some(pattern) = &column.regex {
                Regex::new(pattern)
                    .with_context(|| format!("invalid regex for column '{}'", column.name))?;
            }
            for rule in &column.validators {
                Regex::new(&rule.regex).with_context(|| {
                    format!("invalid regex in validation rule for column '{}'", column.name)
                })?;
            }
            if column.range.is_some() && !column.column_type.is_numeric() {
                return Err(anyhow!(
                    "range constraint on non-numeric column '{}'",
                    column.name
                ));
            }
        }
        for rule in &self.uniqueness {
            if self.column(&rule.column).is_none() {
                return Err(anyhow!("uniqueness constraint on unknown column '{}'", rule.column));
            }
        }
        for rule in &self.row_rules {
            match rule.compile() {
                RowPredicate::AgeInRange { column, .. } => {
                    let spec = self.column(&column).ok_or_else(|| {
                        anyhow!("row rule '{}' references unknown column '{column}'", rule.name)
                    })?;
                    if spec.column_type != ColumnType::Date {
                        return Err(anyhow!(
                            "row rule '{}' requires '{column}' to be a date column",
                            rule.name
                        ));
                    }
                }
                RowPredicate::AlwaysTrue => {
                    warn!(
                        "row rule '{}' uses an unsupported expression and will always pass: {}",
                        rule.name, rule.expr
                    );
                }
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn secret_columns(&self) -> HashSet<String> {
        self.columns
            .iter()
            .filter(|column| column.secret)
            .map(|column| column.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, column_type: ColumnType) -> ColumnSpec {
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

    #[test]
    fn column_type_parses_supported_names() {
        assert_eq!("string".parse::<ColumnType>().unwrap(), ColumnType::String);
        assert_eq!("int".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert_eq!("float".parse::<ColumnType>().unwrap(), ColumnType::Float);
        assert_eq!("date".parse::<ColumnType>().unwrap(), ColumnType::Date);
        assert_eq!(
            "decimal(10,2)".parse::<ColumnType>().unwrap(),
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            }
        );
    }

    #[test]
    fn column_type_rejects_invalid_decimals() {
        assert!("decimal(0,0)".parse::<ColumnType>().is_err());
        assert!("decimal(2,3)".parse::<ColumnType>().is_err());
        assert!("decimal(10)".parse::<ColumnType>().is_err());
        assert!("money".parse::<ColumnType>().is_err());
    }

    #[test]
    fn row_rule_compiles_age_range() {
        let rule = RowRule {
            name: "adult".to_string(),
            expr: "age(birth) >= 19 && age(birth) <= 120".to_string(),
        };
        assert_eq!(
            rule.compile(),
            RowPredicate::AgeInRange {
                column: "birth".to_string(),
                min: 19,
                max: 120
            }
        );
    }

    #[test]
    fn row_rule_falls_back_to_always_true() {
        let rule = RowRule {
            name: "odd".to_string(),
            expr: "len(name) > 3".to_string(),
        };
        assert_eq!(rule.compile(), RowPredicate::AlwaysTrue);

        let mismatched = RowRule {
            name: "cross".to_string(),
            expr: "age(birth) >= 0 && age(joined) <= 120".to_string(),
        };
        assert_eq!(mismatched.compile(), RowPredicate::AlwaysTrue);
    }

    #[test]
    fn schema_validation_rejects_duplicates_and_bad_regex() {
        let mut schema = Schema {
            version: 1,
            columns: vec![column("name", ColumnType::String)],
            row_rules: Vec::new(),
            uniqueness: Vec::new(),
            null_policy: NullPolicy::default(),
        };
        assert!(schema.validate().is_ok());

        schema.columns.push(column("name", ColumnType::Int));
        assert!(schema.validate().is_err());

        schema.columns.pop();
        schema.columns[0].regex = Some("(unclosed".to_string());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn schema_validation_checks_rule_targets() {
        let schema = Schema {
            version: 1,
            columns: vec![column("name", ColumnType::String)],
            row_rules: Vec::new(),
            uniqueness: vec![UniquenessRule {
                column: "phone".to_string(),
            }],
            null_policy: NullPolicy::default(),
        };
        assert!(schema.validate().is_err());

        let schema = Schema {
            version: 1,
            columns: vec![column("birth", ColumnType::String)],
            row_rules: vec![RowRule {
                name: "adult".to_string(),
                expr: "age(birth) >= 0 && age(birth) <= 120".to_string(),
            }],
            uniqueness: Vec::new(),
            null_policy: NullPolicy::default(),
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn schema_parses_from_yaml() {
        let yaml = r#"
version: 1
columns:
  - name: phone
    type: string
    required: true
    secret: true
    preprocess:
      - trim: true
        remove: ["-", " "]
        replace:
          - { from: "+82", to: "0" }
    transform: [format_korean_phone_e164]
  - name: amount
    type: decimal(10,2)
    range:
      min: 0
      max: 10000
uniqueness:
  - column: phone
null_policy:
  treat_empty_as_null: true
"#;
        let schema: Schema = serde_yaml::from_str(yaml).expect("parse schema");
        schema.validate().expect("valid schema");
        assert_eq!(schema.columns.len(), 2);
        assert!(schema.columns[0].secret);
        assert_eq!(
            schema.columns[0].preprocess[0].replace,
            vec![ReplacePair {
                from: "+82".to_string(),
                to: "0".to_string()
            }]
        );
        assert_eq!(
            schema.columns[0].transform,
            vec![TransformRule::FormatKoreanPhoneE164]
        );
        assert!(schema.null_policy.treat_empty_as_null);
        assert_eq!(schema.secret_columns().len(), 1);
    }
}
