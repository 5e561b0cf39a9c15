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

//! Header directive parsing.
//!
//! Callers steer the gateway through a namespace of optional
//! `helicone-*` headers: prompt versioning, caching, retries, sessions,
//! experiments, fallback routing, omission, security scanning, and free-form
//! properties. [`HeaderDirectives::parse`] reads them all in one pass.
//!
//! The parse is total: a malformed individual field degrades to that field's
//! documented default instead of failing the request. The single exception is
//! `helicone-fallbacks`, where a structurally invalid policy must reject the
//! request rather than silently forward without it. Invalid prompt modes
//! degrade to `deactivated` and are reported through
//! [`HeaderDirectives::warnings`].

use std::collections::BTreeMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::{Uuid, Variant};

use promptgate_core::error::ConfigError;
use promptgate_core::identity::{classify_key, AuthIdentity};

const PROPERTY_PREFIX: &str = "helicone-property-";

/// Per-request prompt directives after mode inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDirectives {
    pub mode: PromptMode,
    pub prompt_id: Option<String>,
    pub version: Option<String>,
    /// Free-form format hint; `raw` disables tag stripping.
    pub format: Option<String>,
    pub name: Option<String>,
}

impl Default for PromptDirectives {
    fn default() -> Self {
        Self {
            mode: PromptMode::Deactivated,
            prompt_id: None,
            version: None,
            format: None,
            name: None,
        }
    }
}

/// Prompt capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Production,
    Testing,
    Deactivated,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::Production => "production",
            PromptMode::Testing => "testing",
            PromptMode::Deactivated => "deactivated",
        }
    }

    /// Active modes capture and format prompt templates.
    pub fn is_active(&self) -> bool {
        matches!(self, PromptMode::Production | PromptMode::Testing)
    }
}

/// Response cache controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDirectives {
    pub enabled: bool,
    pub seed: Option<i64>,
    pub bucket_max_size: Option<i32>,
    pub control: Option<String>,
}

/// Retry policy for upstream calls. Defaults apply whenever the individual
/// header is absent or unparseable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDirectives {
    pub enabled: bool,
    pub retries: u32,
    pub backoff_factor: f64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for RetryDirectives {
    fn default() -> Self {
        Self {
            enabled: false,
            retries: 5,
            backoff_factor: 2.0,
            min_timeout_ms: 1000,
            max_timeout_ms: 10_000,
        }
    }
}

/// Streaming/timeout feature toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub stream_force_format: bool,
    pub increase_timeout: bool,
    pub stream_usage: bool,
}

/// Session grouping for trace trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDirectives {
    pub session_id: Option<String>,
    pub path: Option<String>,
    pub name: Option<String>,
}

/// Experiment cell addressing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentDirectives {
    pub experiment_id: Option<String>,
    pub column_id: Option<String>,
    pub row_index: Option<String>,
}

/// Which halves of the exchange to withhold from logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmitDirectives {
    pub omit_request: bool,
    pub omit_response: bool,
}

/// LLM security scanning controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDirectives {
    pub enabled: bool,
    pub advanced: Option<String>,
}

/// A status code trigger for a fallback policy: one exact code or an
/// inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FallbackCode {
    Exact(u16),
    Range { from: u16, to: u16 },
}

impl FallbackCode {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            FallbackCode::Exact(code) => *code == status,
            FallbackCode::Range { from, to } => (*from..=*to).contains(&status),
        }
    }
}

/// One fallback route, taken when the primary call answers with a matching
/// status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    #[serde(rename = "target-url")]
    pub target_url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "onCodes")]
    pub on_codes: Vec<FallbackCode>,
    #[serde(rename = "bodyKeyOverride", default, skip_serializing_if = "Option::is_none")]
    pub body_key_override: Option<Value>,
}

impl FallbackPolicy {
    /// True when any trigger code matches the given status.
    pub fn triggers_on(&self, status: u16) -> bool {
        self.on_codes.iter().any(|code| code.matches(status))
    }
}

/// A sub-field that degraded to its default during parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveWarning {
    pub header: String,
    pub message: String,
}

/// Every directive the gateway consumes, parsed once per request.
///
/// Immutable after parsing. Absent headers always yield the documented
/// defaults, never an undefined state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderDirectives {
    /// Provisional identity from the auth headers, before vault indirection.
    pub auth: Option<AuthIdentity>,
    /// The raw dedicated auth header, when present.
    pub helicone_auth: Option<String>,
    pub prompt: PromptDirectives,
    pub cache: CacheDirectives,
    pub retry: RetryDirectives,
    pub feature_flags: FeatureFlags,
    pub session: SessionDirectives,
    pub experiment: ExperimentDirectives,
    pub fallbacks: Vec<FallbackPolicy>,
    pub omit: OmitDirectives,
    pub security: SecurityDirectives,
    /// Request id: caller-supplied when a valid UUID, otherwise random.
    pub request_id: String,
    pub node_id: Option<String>,
    pub model_override: Option<String>,
    pub manual_access_key: Option<String>,
    pub user_id: Option<String>,
    pub rate_limit_policy: Option<String>,
    pub moderations_enabled: bool,
    pub webhook_enabled: bool,
    /// Property side-table for downstream tagging, never re-parsed.
    pub properties: BTreeMap<String, String>,
    /// Sub-fields that degraded to defaults.
    pub warnings: Vec<DirectiveWarning>,
}

fn get<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn get_owned(headers: &HeaderMap, name: &str) -> Option<String> {
    get(headers, name).map(str::to_owned)
}

fn flag(headers: &HeaderMap, name: &str) -> bool {
    get(headers, name) == Some("true")
}

impl HeaderDirectives {
    /// Parse the full directive namespace out of a header map.
    ///
    /// Only a present-but-invalid `helicone-fallbacks` value errors; every
    /// other malformed field degrades and is reported in `warnings`.
    pub fn parse(headers: &HeaderMap) -> Result<Self, ConfigError> {
        let mut warnings = Vec::new();

        let prompt = Self::parse_prompt(headers, &mut warnings);
        let cache = Self::parse_cache(headers);
        let session = SessionDirectives {
            session_id: get_owned(headers, "helicone-session-id"),
            path: get_owned(headers, "helicone-session-path"),
            name: get_owned(headers, "helicone-session-name"),
        };
        let experiment = ExperimentDirectives {
            experiment_id: get_owned(headers, "helicone-experiment-id"),
            column_id: get_owned(headers, "helicone-experiment-column-id"),
            row_index: get_owned(headers, "helicone-experiment-row-index"),
        };

        let mut directives = Self {
            auth: Self::parse_auth(headers),
            helicone_auth: get_owned(headers, "helicone-auth"),
            prompt,
            cache,
            retry: Self::parse_retry(headers),
            feature_flags: FeatureFlags {
                stream_force_format: flag(headers, "helicone-stream-force-format"),
                increase_timeout: flag(headers, "helicone-increase-timeout"),
                stream_usage: flag(headers, "helicone-stream-usage"),
            },
            session,
            experiment,
            fallbacks: Self::parse_fallbacks(headers)?,
            omit: OmitDirectives {
                omit_request: flag(headers, "helicone-omit-request"),
                omit_response: flag(headers, "helicone-omit-response"),
            },
            security: SecurityDirectives {
                enabled: get(headers, "helicone-llm-security-enabled")
                    .or_else(|| get(headers, "helicone-prompt-security-enabled"))
                    .unwrap_or("")
                    .eq_ignore_ascii_case("true"),
                advanced: get_owned(headers, "helicone-llm-security-advanced"),
            },
            request_id: Self::valid_uuid_or_random(get(headers, "helicone-request-id")),
            node_id: get_owned(headers, "helicone-node-id"),
            model_override: get_owned(headers, "helicone-model-override"),
            manual_access_key: get_owned(headers, "helicone-manual-access-key"),
            user_id: get_owned(headers, "helicone-user-id"),
            rate_limit_policy: get_owned(headers, "helicone-ratelimit-policy"),
            moderations_enabled: flag(headers, "helicone-moderations-enabled"),
            webhook_enabled: flag(headers, "helicone-webhook-enabled"),
            properties: BTreeMap::new(),
            warnings,
        };
        directives.properties = Self::collect_properties(headers, &directives);
        Ok(directives)
    }

    /// Auth precedence: dedicated header, then Authorization, then JWT with
    /// its org id. All yield a provisional identity refined later by the
    /// credential resolver.
    fn parse_auth(headers: &HeaderMap) -> Option<AuthIdentity> {
        if let Some(token) = get(headers, "helicone-auth") {
            return Some(AuthIdentity::Bearer {
                token: token.to_owned(),
                key_class: classify_key(token),
            });
        }
        if let Some(token) = get(headers, "authorization") {
            return Some(AuthIdentity::Bearer {
                token: token.to_owned(),
                key_class: classify_key(token),
            });
        }
        if let Some(token) = get(headers, "helicone-jwt") {
            return Some(AuthIdentity::Jwt {
                token: token.to_owned(),
                org_id: get_owned(headers, "helicone-org-id"),
            });
        }
        None
    }

    fn parse_prompt(headers: &HeaderMap, warnings: &mut Vec<DirectiveWarning>) -> PromptDirectives {
        let prompt_id = get_owned(headers, "helicone-prompt-id");
        let mode = match get(headers, "helicone-prompt-mode") {
            Some("production") => PromptMode::Production,
            Some("testing") => PromptMode::Testing,
            Some("deactivated") => PromptMode::Deactivated,
            Some(other) => {
                warnings.push(DirectiveWarning {
                    header: "helicone-prompt-mode".into(),
                    message: format!("invalid prompt mode {other:?}, using deactivated"),
                });
                PromptMode::Deactivated
            }
            None if prompt_id.is_some() => PromptMode::Production,
            None => PromptMode::Deactivated,
        };
        PromptDirectives {
            mode,
            prompt_id,
            version: get_owned(headers, "helicone-prompt-version"),
            format: get_owned(headers, "helicone-prompt-format"),
            name: get_owned(headers, "helicone-prompt-name"),
        }
    }

    fn parse_cache(headers: &HeaderMap) -> CacheDirectives {
        CacheDirectives {
            enabled: flag(headers, "helicone-cache-enabled"),
            seed: get(headers, "helicone-cache-seed").and_then(|v| v.parse().ok()),
            bucket_max_size: get(headers, "helicone-cache-bucket-max-size")
                .and_then(|v| v.parse().ok()),
            control: get_owned(headers, "helicone-cache-control"),
        }
    }

    fn parse_retry(headers: &HeaderMap) -> RetryDirectives {
        let defaults = RetryDirectives::default();
        match get(headers, "helicone-retry-enabled") {
            None => defaults,
            Some(enabled) => RetryDirectives {
                enabled: enabled == "true",
                retries: get(headers, "helicone-retry-num")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.retries),
                backoff_factor: get(headers, "helicone-retry-factor")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.backoff_factor),
                min_timeout_ms: get(headers, "helicone-retry-min-timeout")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.min_timeout_ms),
                max_timeout_ms: get(headers, "helicone-retry-max-timeout")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.max_timeout_ms),
            },
        }
    }

    /// Strict fallback validation: a present header must be a JSON array of
    /// policies each carrying a string `target-url`, a string map `headers`,
    /// and an `onCodes` array of integers or `{from, to}` ranges.
    fn parse_fallbacks(headers: &HeaderMap) -> Result<Vec<FallbackPolicy>, ConfigError> {
        let Some(raw) = get(headers, "helicone-fallbacks") else {
            return Ok(Vec::new());
        };
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ConfigError::MalformedFallbacks(format!("invalid JSON: {e}")))?;
        let Value::Array(items) = value else {
            return Err(ConfigError::MalformedFallbacks("must be an array".into()));
        };
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<FallbackPolicy>(item).map_err(|e| {
                    ConfigError::MalformedFallbacks(format!("policy {i}: {e}"))
                })
            })
            .collect()
    }

    fn valid_uuid_or_random(candidate: Option<&str>) -> String {
        if let Some(raw) = candidate {
            if let Ok(uuid) = Uuid::parse_str(raw) {
                let version_ok = (1..=5).contains(&uuid.get_version_num());
                if version_ok && uuid.get_variant() == Variant::RFC4122 {
                    return raw.to_owned();
                }
            }
        }
        Uuid::new_v4().to_string()
    }

    /// Property side-table: the open-ended prefix scan plus entries injected
    /// from the prompt/session/experiment/cache sub-configs.
    fn collect_properties(headers: &HeaderMap, d: &HeaderDirectives) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        for (name, value) in headers.iter() {
            let name = name.as_str();
            if name.len() > PROPERTY_PREFIX.len() && name.starts_with(PROPERTY_PREFIX) {
                if let Ok(value) = value.to_str() {
                    properties.insert(name[PROPERTY_PREFIX.len()..].to_owned(), value.to_owned());
                }
            }
        }
        if let Some(prompt_id) = &d.prompt.prompt_id {
            properties.insert("Helicone-Prompt-Id".into(), prompt_id.clone());
        }
        if let Some(name) = &d.session.name {
            properties.insert("Helicone-Session-Name".into(), name.clone());
        }
        if let Some(session_id) = &d.session.session_id {
            properties.insert("Helicone-Session-Id".into(), session_id.clone());
        }
        if let Some(path) = &d.session.path {
            properties.insert("Helicone-Session-Path".into(), path.clone());
        }
        if let Some(experiment_id) = &d.experiment.experiment_id {
            properties.insert("Helicone-Experiment-Id".into(), experiment_id.clone());
        }
        if d.cache.enabled {
            properties.insert("Helicone-Cache-Enabled".into(), "true".into());
        }
        if let Some(seed) = d.cache.seed.filter(|s| *s != 0) {
            properties.insert("Helicone-Cache-Seed".into(), seed.to_string());
        }
        if let Some(size) = d.cache.bucket_max_size.filter(|s| *s != 0) {
            properties.insert("Helicone-Cache-Bucket-Max-Size".into(), size.to_string());
        }
        if let Some(control) = d.cache.control.as_deref().filter(|c| !c.is_empty()) {
            properties.insert("Helicone-Cache-Control".into(), control.to_owned());
        }
        properties
    }
}
