use std::{collections::BTreeMap, fmt, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuccessSpec {
    #[serde(default)]
    pub status_in: Vec<u16>,
    #[serde(default)]
    pub response_keys: BTreeMap<String, String>,
}

impl SuccessSpec {
    /// Any 2xx counts as success when no explicit status list is configured.
    pub fn is_success_status(&self, status: u16) -> bool {
        if self.status_in.is_empty() {
            (200..300).contains(&status)
        } else {
            self.status_in.contains(&status)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    /// Header-name to template pairs, preserving YAML declaration order.
    #[serde(default, deserialize_with = "ordered_string_map")]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub success: SuccessSpec,
}

impl RequestSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Reading request spec file {path:?}"))?;
        let spec: RequestSpec = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing request spec YAML {path:?}"))?;
        spec.validate()
            .with_context(|| format!("Invalid request spec {path:?}"))?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("request url template cannot be empty"));
        }
        for (name, _) in &self.headers {
            if name.trim().is_empty() {
                return Err(anyhow!("header names cannot be empty"));
            }
        }
        Ok(())
    }
}

fn ordered_string_map<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct MapVisitor;

    impl<'de> serde::de::Visitor<'de> for MapVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of header names to template strings")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, String>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(MapVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_defaults_to_all_2xx() {
        let success = SuccessSpec::default();
        assert!(success.is_success_status(200));
        assert!(success.is_success_status(204));
        assert!(success.is_success_status(299));
        assert!(!success.is_success_status(301));
        assert!(!success.is_success_status(404));
    }

    #[test]
    fn explicit_status_list_wins() {
        let success = SuccessSpec {
            status_in: vec![201],
            response_keys: BTreeMap::new(),
        };
        assert!(success.is_success_status(201));
        assert!(!success.is_success_status(200));
    }

    #[test]
    fn headers_preserve_declaration_order() {
        let yaml = r#"
method: POST
url: "https://api.example.com/users"
headers:
  Zeta: "1"
  Authorization: "Bearer {{ token }}"
  Accept: "application/json"
body: "{}"
"#;
        let spec: RequestSpec = serde_yaml::from_str(yaml).expect("parse request spec");
        spec.validate().expect("valid spec");
        let names: Vec<&str> = spec.headers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["Zeta", "Authorization", "Accept"]);
        assert_eq!(spec.method, Method::Post);
    }

    #[test]
    fn empty_url_is_rejected() {
        let yaml = "method: GET\nurl: \"\"\n";
        let spec: RequestSpec = serde_yaml::from_str(yaml).expect("parse request spec");
        assert!(spec.validate().is_err());
    }
}
