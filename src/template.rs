//! Request template rendering.
//!
//! Templates use `{{ }}` delimiters and reference normalized row data by
//! column name. `dateFormat`, `toE164KR`, `mask`, and `hash` are registered
//! as both filters and functions; `upper`, `lower`, and `trim` come from the
//! engine's built-in filter set.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use minijinja::Environment;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    logger::mask_value,
    request::{Method, RequestSpec},
    validator::{korean_phone_e164, NormalizedRow},
};

#[derive(Debug, Error)]
#[error("rendering {part} template: {source}")]
pub struct TemplateError {
    pub part: String,
    #[source]
    pub source: minijinja::Error,
}

#[derive(Debug, Clone)]
pub struct RenderedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub proxy: Option<String>,
    pub fingerprint: String,
}

pub struct Renderer {
    method: Method,
    env: Environment<'static>,
    header_names: Vec<String>,
    has_proxy: bool,
}

impl Renderer {
    /// Parses every template up front so malformed specs fail at startup, not
    /// per row.
    pub fn new(spec: &RequestSpec) -> Result<Self> {
        let mut env = Environment::new();
        env.add_function("dateFormat", date_format);
        env.add_filter("dateFormat", |value: String, layout: String| {
            date_format(layout, value)
        });
        env.add_function("toE164KR", to_e164_kr);
        env.add_filter("toE164KR", to_e164_kr);
        env.add_function("mask", mask);
        env.add_filter("mask", mask);
        env.add_function("hash", hash_hex);
        env.add_filter("hash", hash_hex);

        env.add_template_owned("url".to_string(), spec.url.clone())
            .context("parsing url template")?;
        env.add_template_owned("body".to_string(), spec.body.clone())
            .context("parsing body template")?;
        let mut header_names = Vec::with_capacity(spec.headers.len());
        for (name, template) in &spec.headers {
            env.add_template_owned(format!("header:{name}"), template.clone())
                .with_context(|| format!("parsing template for header '{name}'"))?;
            header_names.push(name.clone());
        }
        let has_proxy = match &spec.proxy {
            Some(template) => {
                env.add_template_owned("proxy".to_string(), template.clone())
                    .context("parsing proxy template")?;
                true
            }
            None => false,
        };
        Ok(Self {
            method: spec.method,
            env,
            header_names,
            has_proxy,
        })
    }

    /// Renders url, headers (in declared order), body, and proxy for one row.
    /// Empty rendered headers and an empty rendered proxy are dropped. The
    /// fingerprint is copied from the normalized row.
    pub fn render(&self, row: &NormalizedRow) -> Result<RenderedRequest, TemplateError> {
        let context = minijinja::Value::from_serialize(&row.data);
        let url = self.render_part("url", &context)?;
        let mut headers = Vec::with_capacity(self.header_names.len());
        for name in &self.header_names {
            let value = self.render_part(&format!("header:{name}"), &context)?;
            if !value.is_empty() {
                headers.push((name.clone(), value));
            }
        }
        let body = self.render_part("body", &context)?;
        let proxy = if self.has_proxy {
            Some(self.render_part("proxy", &context)?).filter(|value| !value.is_empty())
        } else {
            None
        };
        Ok(RenderedRequest {
            method: self.method,
            url,
            headers,
            body,
            proxy,
            fingerprint: row.fingerprint.clone(),
        })
    }

    fn render_part(
        &self,
        name: &str,
        context: &minijinja::Value,
    ) -> Result<String, TemplateError> {
        let template = self.env.get_template(name).map_err(|source| TemplateError {
            part: name.to_string(),
            source,
        })?;
        template.render(context).map_err(|source| TemplateError {
            part: name.to_string(),
            source,
        })
    }
}

/// Parses `value` against the common date spellings and re-emits it in
/// `layout` (chrono strftime). Unparseable values pass through verbatim.
fn date_format(layout: String, value: String) -> String {
    const INPUT_FORMATS: &[&str] = &["%Y%m%d", "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
    for format in INPUT_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(&value, format) {
            let mut out = String::new();
            if write!(out, "{}", parsed.format(&layout)).is_ok() {
                return out;
            }
            return value;
        }
    }
    value
}

fn to_e164_kr(value: String) -> String {
    korean_phone_e164(&value)
}

fn mask(value: String) -> String {
    mask_value(&value)
}

fn hash_hex(value: String) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}
