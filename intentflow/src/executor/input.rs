//! Input placeholder resolution.
//!
//! `${node_id.path}` reads from a completed node's result and
//! `${context.path}` reads from the execution context. A string that is
//! exactly one placeholder is replaced by the referenced value with its JSON
//! type intact (or `null` if missing). Placeholders embedded in longer text
//! are interpolated as text, with missing values rendered empty.

use crate::core::NodeResult;
use crate::utils::lookup_path;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

const CONTEXT_ROOT: &str = "context";

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{\s*([A-Za-z0-9_\-]+(?:\.[^}\s]+)?)\s*\}").ok())
        .as_ref()
}

/// Resolves placeholders in a node's input against prior results and the context.
#[must_use]
pub fn resolve_input(
    input: &Value,
    results: &HashMap<String, NodeResult>,
    context: &Map<String, Value>,
) -> Value {
    let Some(pattern) = placeholder_pattern() else {
        return input.clone();
    };
    Resolver {
        pattern,
        results,
        context,
    }
    .resolve(input)
}

struct Resolver<'a> {
    pattern: &'static Regex,
    results: &'a HashMap<String, NodeResult>,
    context: &'a Map<String, Value>,
}

impl Resolver<'_> {
    fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => self.resolve_text(text),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_text(&self, text: &str) -> Value {
        if let Some(caps) = self.pattern.captures(text) {
            if caps.get(0).is_some_and(|m| m.as_str().len() == text.len()) {
                return self.lookup(&caps[1]).cloned().unwrap_or(Value::Null);
            }
        } else {
            return Value::String(text.to_string());
        }

        let replaced = self.pattern.replace_all(text, |caps: &Captures<'_>| {
            match self.lookup(&caps[1]) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        });
        Value::String(replaced.into_owned())
    }

    fn lookup(&self, reference: &str) -> Option<&Value> {
        let (root, path) = reference.split_once('.').unwrap_or((reference, ""));
        if root == CONTEXT_ROOT {
            let (key, rest) = path.split_once('.').unwrap_or((path, ""));
            return self.context.get(key).and_then(|v| lookup_path(v, rest));
        }
        self.results
            .get(root)
            .filter(|r| r.success)
            .and_then(|r| r.result.as_ref())
            .and_then(|v| lookup_path(v, path))
    }
}
