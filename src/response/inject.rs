//! Global value injection
//!
//! Emits one inline script assigning serialized values onto named global
//! bindings, plus a restricted snapshot of process environment variables
//! limited to keys carrying the configured public prefix. Serialized JSON
//! is escaped so a value can never terminate the script element.

use crate::response::rewrite::ElementMutation;
use lol_html::html_content::ContentType;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Global binding the environment snapshot is assigned to.
pub const ENV_GLOBAL: &str = "__PUBLIC_ENV__";

/// Build the injection script, or `None` when there is nothing to inject.
/// Bindings with invalid identifier names are dropped with a warning.
pub fn build_script(globals: &Map<String, Value>, env_prefix: &str) -> Option<String> {
    let mut assignments = Vec::new();

    for (name, value) in globals {
        if !is_valid_identifier(name) {
            warn!(binding = %name, "skipping global with invalid identifier name");
            continue;
        }
        assignments.push(format!("window.{name} = {};", serialize(value)));
    }

    let env = env_snapshot(env_prefix);
    if !env.is_empty() {
        assignments.push(format!(
            "window.{ENV_GLOBAL} = {};",
            serialize(&Value::Object(env))
        ));
    }

    if assignments.is_empty() {
        return None;
    }
    Some(format!("<script>{}</script>", assignments.join("")))
}

/// Environment variables whose key starts with the public prefix, keyed
/// with the prefix stripped.
fn env_snapshot(prefix: &str) -> Map<String, Value> {
    let mut snapshot = Map::new();
    if prefix.is_empty() {
        return snapshot;
    }
    for (key, value) in std::env::vars() {
        if let Some(stripped) = key.strip_prefix(prefix) {
            if !stripped.is_empty() {
                snapshot.insert(stripped.to_string(), Value::String(value));
            }
        }
    }
    snapshot
}

/// JSON-serialize with `<` escaped so `</script>` and comment openers can
/// never appear in the payload.
fn serialize(value: &Value) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c")
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Insert the script into a materialized document: appended inside `<head>`
/// when present, otherwise at the end of the document.
pub fn inject_into_document(document: String, script: &str) -> String {
    let injected = Arc::new(AtomicBool::new(false));
    let mutation = head_append_mutation(script.to_string(), injected.clone());

    match super::rewrite::apply_mutations(vec![mutation], &document) {
        Ok(out) => {
            if injected.load(Ordering::SeqCst) {
                out
            } else {
                let mut out = out;
                out.push_str(script);
                out
            }
        }
        Err(err) => {
            warn!(%err, "injection pass failed, skipping");
            document
        }
    }
}

/// The element mutation used by the streaming path: append the script to
/// `<head>` during the shared pass.
pub fn head_append_mutation(script: String, injected: Arc<AtomicBool>) -> ElementMutation {
    ElementMutation::new("head", move |el| {
        el.append(&script, ContentType::Html);
        injected.store(true, Ordering::SeqCst);
        Ok(())
    })
}
