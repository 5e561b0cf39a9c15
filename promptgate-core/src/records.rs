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

//! Outcome record shapes for the log batch pipeline.
//!
//! Upstream handlers accumulate these after requests complete; the log store
//! commits a whole [`LogBatch`] in one transaction. Records are plain data,
//! addressed by string ids so batches survive serialization boundaries
//! unchanged.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row destined for the `request` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub auth_hash: String,
    pub path: String,
    pub provider: String,
    pub helicone_api_key_id: Option<i64>,
    pub helicone_org_id: Option<String>,
    pub helicone_proxy_key_id: Option<String>,
    pub helicone_user: Option<String>,
    pub model: Option<String>,
    pub model_override: Option<String>,
    pub prompt_id: Option<String>,
    pub prompt_values: Option<Value>,
    pub properties: Option<BTreeMap<String, String>>,
    pub request_ip: Option<String>,
    pub target_url: Option<String>,
    pub threat: Option<bool>,
    pub user_id: Option<String>,
    pub country_code: Option<String>,
    pub version: i32,
}

impl Default for RequestRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            created_at: Utc::now(),
            auth_hash: String::new(),
            path: String::new(),
            provider: String::new(),
            helicone_api_key_id: None,
            helicone_org_id: None,
            helicone_proxy_key_id: None,
            helicone_user: None,
            model: None,
            model_override: None,
            prompt_id: None,
            prompt_values: None,
            properties: None,
            request_ip: None,
            target_url: None,
            threat: None,
            user_id: None,
            country_code: None,
            version: 1,
        }
    }
}

/// One row destined for the `response` table. `request` is the owning
/// request id; the (request, org) pair is the upsert key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: String,
    pub request: String,
    pub created_at: DateTime<Utc>,
    pub helicone_org_id: Option<String>,
    pub model: Option<String>,
    pub status: Option<i32>,
    pub completion_tokens: Option<i64>,
    pub prompt_tokens: Option<i64>,
    pub delay_ms: Option<i64>,
    pub time_to_first_token: Option<i64>,
    pub prompt_cache_write_tokens: Option<i64>,
    pub prompt_cache_read_tokens: Option<i64>,
    pub prompt_audio_tokens: Option<i64>,
    pub completion_audio_tokens: Option<i64>,
    pub feedback: Option<Value>,
}

impl Default for ResponseRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            request: String::new(),
            created_at: Utc::now(),
            helicone_org_id: None,
            model: None,
            status: None,
            completion_tokens: None,
            prompt_tokens: None,
            delay_ms: None,
            time_to_first_token: None,
            prompt_cache_write_tokens: None,
            prompt_cache_read_tokens: None,
            prompt_audio_tokens: None,
            completion_audio_tokens: None,
            feedback: None,
        }
    }
}

/// A stored artifact (image, file) referenced by a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    pub request_id: String,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
}

/// A prompt template with its extracted inputs, as captured on ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TemplateWithInputs {
    pub template: Value,
    pub inputs: BTreeMap<String, String>,
    pub auto_inputs: Vec<Value>,
}

/// Prompt material captured for one request, versioned by the log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    /// User-defined prompt id (unique per organization).
    pub prompt_id: String,
    pub org_id: String,
    pub request_id: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub template: Option<TemplateWithInputs>,
}

/// A bulk-ingested prompt input row, referencing an existing version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptInputRecord {
    pub request_id: String,
    pub version_id: String,
    pub inputs: BTreeMap<String, String>,
}

/// A raw score: either numeric or boolean, typed at mapping time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Bool(bool),
    Number(f64),
}

/// Scores attached to one finished request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub request_id: String,
    pub org_id: String,
    pub scores: BTreeMap<String, ScoreValue>,
    /// Evaluator ids keyed by *mapped* attribute key.
    #[serde(default)]
    pub evaluator_ids: BTreeMap<String, String>,
}

/// Everything destined for one atomic persistence transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub requests: Vec<RequestRecord>,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    #[serde(default)]
    pub prompts: Vec<PromptRecord>,
    #[serde(default)]
    pub prompt_inputs: Vec<PromptInputRecord>,
    #[serde(default)]
    pub scores: Vec<ScoreRecord>,
    /// Organizations to flag as onboarded (advisory, best effort).
    #[serde(default)]
    pub onboarded_orgs: BTreeSet<String>,
}

impl LogBatch {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.responses.is_empty()
            && self.assets.is_empty()
            && self.prompts.is_empty()
            && self.prompt_inputs.is_empty()
            && self.scores.is_empty()
            && self.onboarded_orgs.is_empty()
    }
}

/// What a committed batch actually did, including partial-success counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAck {
    pub requests_written: usize,
    pub responses_written: usize,
    pub assets_written: usize,
    pub prompts_processed: usize,
    pub prompt_versions_created: usize,
    pub prompt_inputs_written: usize,
    /// Bulk prompt inputs dropped for referencing unknown versions.
    pub prompt_inputs_dropped: usize,
    pub scores_processed: usize,
}
