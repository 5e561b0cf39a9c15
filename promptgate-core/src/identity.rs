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

//! Authentication identity and gateway key classification.
//!
//! An inbound call authenticates in exactly one of three ways: a JWT (with an
//! org id threaded alongside), a bearer gateway key, or a bearer token that
//! was resolved *through* the vault (proxy / customer-portal indirection).
//! The identity is computed once per request and never mutated afterwards;
//! any header rewriting that produces it happens strictly earlier.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

/// Marker substring identifying a gateway key inside a comma-joined
/// Authorization value.
pub const GATEWAY_KEY_MARKER: &str = "sk-helicone-";

/// Prefix carried by customer-portal keys (resolved through the org's
/// configured provider key).
pub const PORTAL_KEY_PREFIX: &str = "Bearer sk-helicone-cp";

/// Prefix carried by vault proxy keys (resolved through a stored hashed key).
pub const PROXY_KEY_PREFIX: &str = "Bearer sk-helicone-proxy";

/// Key shapes that mark a rate-limited key. Tested before the standard set.
static RATE_LIMITED_KEY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^sk-helicone-rl-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^pk-helicone-rl-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^pk-helicone-eu-rl-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^sk-helicone-eu-rl-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid key pattern"))
    .collect()
});

/// Every accepted gateway key shape, rate-limited shapes included.
static API_KEY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut patterns: Vec<Regex> = [
        r"^sk-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^sk-helicone-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^pk-helicone-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^pk-helicone-eu-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^sk-helicone-eu-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}-[a-z0-9]{7}$",
        r"^[sp]k(-helicone)?(-eu)?(-cp)?-\w{7}-\w{7}-\w{7}-\w{7}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid key pattern"))
    .collect();
    patterns.extend(RATE_LIMITED_KEY_PATTERNS.iter().cloned());
    patterns
});

/// Shape class of a bearer gateway key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyClass {
    Standard,
    RateLimited,
}

/// Resolved authentication identity for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum AuthIdentity {
    /// Dashboard-issued JWT plus the organization it acts for.
    #[serde(rename = "jwt")]
    Jwt {
        token: String,
        #[serde(rename = "orgId", skip_serializing_if = "Option::is_none")]
        org_id: Option<String>,
    },
    /// A bearer gateway key presented directly.
    #[serde(rename = "bearer")]
    Bearer {
        token: String,
        #[serde(rename = "keyClass")]
        key_class: KeyClass,
    },
    /// A bearer token that resolved through vault indirection; the outgoing
    /// Authorization header already carries the real provider key.
    #[serde(rename = "bearerProxy")]
    BearerProxy { token: String },
}

impl AuthIdentity {
    /// The token as presented by the caller.
    pub fn token(&self) -> &str {
        match self {
            AuthIdentity::Jwt { token, .. } => token,
            AuthIdentity::Bearer { token, .. } => token,
            AuthIdentity::BearerProxy { token } => token,
        }
    }

    /// Variant tag for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthIdentity::Jwt { .. } => "jwt",
            AuthIdentity::Bearer { .. } => "bearer",
            AuthIdentity::BearerProxy { .. } => "bearerProxy",
        }
    }
}

/// Classify a bearer value by key shape. A leading `Bearer ` prefix is
/// stripped first; anything the patterns do not recognize is `Standard`.
pub fn classify_key(value: &str) -> KeyClass {
    let token = value.trim_start_matches("Bearer ").trim();
    if RATE_LIMITED_KEY_PATTERNS.iter().any(|re| re.is_match(token)) {
        KeyClass::RateLimited
    } else {
        KeyClass::Standard
    }
}

/// True when the bare token (no `Bearer ` prefix) matches any accepted
/// gateway key shape.
pub fn is_well_formed_key(token: &str) -> bool {
    API_KEY_PATTERNS.iter().any(|re| re.is_match(token))
}

/// Validate a full bearer auth header value.
///
/// Empty values pass (absence is handled elsewhere); present values must
/// carry the `Bearer ` scheme and a well-formed key.
pub fn validate_bearer_header(value: &str) -> Result<(), CredentialError> {
    if value.is_empty() {
        return Ok(());
    }
    if !value.contains("Bearer ") {
        return Err(CredentialError::MalformedHeader(
            "must include Bearer in API key".into(),
        ));
    }
    let token = value.replace("Bearer ", "");
    let token = token.trim();
    if !is_well_formed_key(token) {
        return Err(CredentialError::MalformedHeader(
            "API key is not well formed".into(),
        ));
    }
    Ok(())
}
