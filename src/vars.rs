//! `@name` variable substitution
//!
//! Resolution is memoryless: every occurrence of a token draws a fresh value,
//! independent across occurrences and requests. Unknown tokens are left
//! literal and logged — a malformed sitemap must never take down a running
//! engine.

use crate::sitemap::VariableSpec;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves `@name` placeholders against the sitemap's variable sources
#[derive(Debug, Clone)]
pub struct VariableResolver {
    variables: Arc<HashMap<String, VariableSpec>>,
}

impl VariableResolver {
    /// Create a resolver over the given variable mapping
    pub fn new(variables: Arc<HashMap<String, VariableSpec>>) -> Self {
        Self { variables }
    }

    /// Replace every `@name` token in the template
    ///
    /// Token names are `[A-Za-z0-9_]+`. Unknown names stay literal. Drawn
    /// values containing characters unsafe in a URL segment are
    /// percent-encoded.
    pub fn resolve(&self, template: &str) -> String {
        if self.variables.is_empty() || !template.contains('@') {
            return template.to_string();
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(at) = rest.find('@') {
            out.push_str(&rest[..at]);
            let after = &rest[at + 1..];
            let name_len = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());

            if name_len == 0 {
                out.push('@');
                rest = after;
                continue;
            }

            let name = &after[..name_len];
            match self.variables.get(name) {
                Some(spec) => out.push_str(&encode_value(&draw(spec))),
                None => {
                    tracing::warn!(variable = name, "placeholder has no sitemap definition");
                    out.push('@');
                    out.push_str(name);
                }
            }
            rest = &after[name_len..];
        }
        out.push_str(rest);
        out
    }

    /// Recursively resolve tokens inside every string of a JSON value
    pub fn resolve_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.resolve(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.resolve_json(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Draw one value from a variable source, uniformly at random
fn draw(spec: &VariableSpec) -> String {
    let mut rng = rand::thread_rng();
    match spec {
        VariableSpec::List(values) => values
            .choose(&mut rng)
            .cloned()
            // Empty lists are rejected by sitemap validation.
            .unwrap_or_default(),
        VariableSpec::Range(lo, hi) => rng.gen_range(*lo..=*hi).to_string(),
    }
}

/// Percent-encode a value when it carries URL-unsafe characters
pub(crate) fn encode_value(value: &str) -> String {
    if value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b'-'))
    {
        return value.to_string();
    }
    let mut encoded = String::with_capacity(value.len() * 3);
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b'-') {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}
