// Copyright 2025 Promptgate (https://github.com/promptgate)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Prompt template tag handling.
//!
//! Callers may annotate request bodies with input markers:
//!
//! ```text
//! <helicone-prompt-input key="name">Ada</helicone-prompt-input>
//! <helicone-prompt-static>system boilerplate</helicone-prompt-static>
//! ```
//!
//! Before forwarding, the gateway strips the markers and keeps the concrete
//! values. For the logging path the same body yields a template (markers kept
//! as self-closing placeholders) plus the extracted input map, which is what
//! the version-change classifier compares.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

/// Error string recorded when a bare-string template is submitted.
pub const INVALID_TEMPLATE_ERROR: &str = "Invalid template";

static INPUT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<helicone-prompt-input\s+key="([^"]*)"\s*>(.*?)</helicone-prompt-input>"#)
        .expect("invalid input tag pattern")
});

static STATIC_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<helicone-prompt-static\s*>(.*?)</helicone-prompt-static>")
        .expect("invalid static tag pattern")
});

/// Template plus the inputs pulled out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateExtraction {
    /// The body with input spans replaced by self-closing placeholders.
    pub template: Value,
    /// Input key to concrete value, in key order.
    pub inputs: BTreeMap<String, String>,
}

/// How a new template relates to the latest stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSignal {
    /// Content changed materially.
    Bump,
    /// Only static-marked content changed.
    Update,
    /// Nothing changed.
    None,
}

impl VersionSignal {
    /// Whether the log store creates a new version for this signal. Update
    /// is intentionally treated the same as Bump.
    pub fn creates_version(&self) -> bool {
        matches!(self, VersionSignal::Bump | VersionSignal::Update)
    }
}

fn map_strings(value: &Value, f: &impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), map_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Strip all prompt markers from a body, keeping the concrete values.
/// This is the form forwarded to the provider.
pub fn strip_prompt_tags(body: &Value) -> Value {
    map_strings(body, &|s| {
        let s = INPUT_TAG.replace_all(s, "$2");
        STATIC_TAG.replace_all(&s, "$1").into_owned()
    })
}

fn extract_strings(value: &Value, inputs: &mut BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => {
            let replaced = INPUT_TAG.replace_all(s, |caps: &regex::Captures<'_>| {
                let key = caps[1].to_string();
                let placeholder = format!("<helicone-prompt-input key=\"{key}\" />");
                inputs.insert(key, caps[2].to_string());
                placeholder
            });
            Value::String(STATIC_TAG.replace_all(&replaced, "$1").into_owned())
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| extract_strings(v, inputs)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), extract_strings(v, inputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Extract the template form of a body: input spans become self-closing
/// placeholders, static wrappers are dropped (content kept), and the input
/// values are collected by key. Later occurrences of a repeated key win.
pub fn extract_template(body: &Value) -> TemplateExtraction {
    let mut inputs = BTreeMap::new();
    let template = extract_strings(body, &mut inputs);
    TemplateExtraction { template, inputs }
}

/// Wrap a bare-string template in the error sentinel shape. Bare strings are
/// recorded but never versioned.
pub fn error_sentinel(template: &str) -> Value {
    json!({
        "error": INVALID_TEMPLATE_ERROR,
        "template": template,
    })
}

/// True when a template is the bare-string error sentinel.
pub fn is_error_sentinel(template: &Value) -> bool {
    template
        .get("error")
        .and_then(Value::as_str)
        .is_some_and(|e| e == INVALID_TEMPLATE_ERROR)
}

fn without_static_content(value: &Value) -> Value {
    map_strings(value, &|s| STATIC_TAG.replace_all(s, "").into_owned())
}

/// Classify how `new` differs from `old`.
///
/// Structural equality means no signal. Templates that agree once
/// static-marked content is removed only differ in static text, which is the
/// update-not-bump signal; everything else is a bump. The store currently
/// versions both the same way (see [`VersionSignal::creates_version`]).
pub fn classify_change(old: &Value, new: &Value) -> VersionSignal {
    if old == new {
        return VersionSignal::None;
    }
    if without_static_content(old) == without_static_content(new) {
        return VersionSignal::Update;
    }
    VersionSignal::Bump
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged_body() -> Value {
        json!({
            "model": "gpt-4o-mini",
            "messages": [
                {
                    "role": "system",
                    "content": "<helicone-prompt-static>You are terse.</helicone-prompt-static>"
                },
                {
                    "role": "user",
                    "content": "Hi <helicone-prompt-input key=\"name\">Ada</helicone-prompt-input>!"
                }
            ]
        })
    }

    #[test]
    fn strip_keeps_concrete_values() {
        let stripped = strip_prompt_tags(&tagged_body());
        assert_eq!(stripped["messages"][0]["content"], "You are terse.");
        assert_eq!(stripped["messages"][1]["content"], "Hi Ada!");
    }

    #[test]
    fn extract_collects_inputs_and_placeholders() {
        let extraction = extract_template(&tagged_body());
        assert_eq!(extraction.inputs.get("name").map(String::as_str), Some("Ada"));
        assert_eq!(
            extraction.template["messages"][1]["content"],
            "Hi <helicone-prompt-input key=\"name\" />!"
        );
        // Static wrapper gone, content kept.
        assert_eq!(extraction.template["messages"][0]["content"], "You are terse.");
    }

    #[test]
    fn untagged_bodies_pass_through() {
        let body = json!({"messages": [{"role": "user", "content": "plain"}], "n": 1});
        assert_eq!(strip_prompt_tags(&body), body);
        let extraction = extract_template(&body);
        assert!(extraction.inputs.is_empty());
        assert_eq!(extraction.template, body);
    }

    #[test]
    fn sentinel_detection() {
        let sentinel = error_sentinel("just a string");
        assert!(is_error_sentinel(&sentinel));
        assert_eq!(sentinel["template"], "just a string");
        assert!(!is_error_sentinel(&json!({"messages": []})));
    }

    #[test]
    fn change_classification() {
        let a = json!({"messages": [{"content": "Hello <helicone-prompt-input key=\"x\" />"}]});
        let b = json!({"messages": [{"content": "Goodbye <helicone-prompt-input key=\"x\" />"}]});
        assert_eq!(classify_change(&a, &a.clone()), VersionSignal::None);
        assert_eq!(classify_change(&a, &b), VersionSignal::Bump);

        let s1 = json!({"content": "<helicone-prompt-static>v1</helicone-prompt-static> body"});
        let s2 = json!({"content": "<helicone-prompt-static>v2</helicone-prompt-static> body"});
        let signal = classify_change(&s1, &s2);
        assert_eq!(signal, VersionSignal::Update);
        assert!(signal.creates_version());
    }
}
