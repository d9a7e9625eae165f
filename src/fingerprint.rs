//! Idempotency fingerprints: a SHA-256 digest over the request configuration
//! and the row's normalized data, with keys in a deterministic order.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::request::RequestSpec;

pub fn compute(spec: &RequestSpec, data: &HashMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("method:{}\n", spec.method));
    hasher.update(format!("url:{}\n", spec.url));
    hasher.update(format!("body:{}\n", spec.body));
    for (name, template) in &spec.headers {
        hasher.update(format!("header:{name}={template}\n"));
    }
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort_unstable();
    for key in keys {
        hasher.update(format!("data:{key}={}\n", data[key]));
    }
    format!("{:x}", hasher.finalize())
}
