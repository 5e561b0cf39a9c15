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

//! Error taxonomy for the gateway ingress path.
//!
//! Three families: [`ConfigError`] for requests that are malformed before any
//! lookup happens, [`CredentialError`] for failures while resolving a
//! presented credential into a real provider key, and [`GatewayError`] as the
//! per-request umbrella. Persistence errors live in the log store crate,
//! next to the code that produces them.

use thiserror::Error;

/// A request carried contradictory or structurally invalid directives.
///
/// These reject the request before any vault or provider work happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The Authorization value embedded a gateway key *and* a dedicated
    /// auth header was set. There is no safe way to pick one.
    #[error("cannot have both helicone-auth and a comma-joined authorization header")]
    AmbiguousAuth,

    /// A fallbacks header was present but did not match the documented
    /// shape. A broken fallback policy must not silently forward.
    #[error("malformed fallbacks directive: {0}")]
    MalformedFallbacks(String),
}

/// A credential failed to resolve, tagged with the stage that failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    /// No stored key row matched the presented token's hash.
    #[error("key hash lookup failed: {0}")]
    HashLookup(String),

    /// The chain reached a provider key slot with no decryptable key in it.
    #[error("decrypted provider key missing: {0}")]
    DecryptionMissing(String),

    /// The presented proxy key did not verify against the stored digest.
    #[error("proxy key signature mismatch")]
    SignatureMismatch,

    /// A configured usage limit (cost or request count) is exhausted.
    #[error("usage limit exceeded: {0}")]
    LimitExceeded(String),

    /// The auth header itself is not a well-formed bearer credential.
    #[error("malformed auth header: {0}")]
    MalformedHeader(String),

    /// The vault backend failed before the stage could complete.
    #[error("credential backend error: {0}")]
    Backend(String),
}

/// Umbrella error for one inbound request's ingress processing.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The request body could not be materialized (bad UTF-8 or JSON).
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl CredentialError {
    /// Short stage tag for structured logging.
    pub fn stage(&self) -> &'static str {
        match self {
            CredentialError::HashLookup(_) => "hash-lookup",
            CredentialError::DecryptionMissing(_) => "decryption-missing",
            CredentialError::SignatureMismatch => "signature-mismatch",
            CredentialError::LimitExceeded(_) => "limit-exceeded",
            CredentialError::MalformedHeader(_) => "malformed-header",
            CredentialError::Backend(_) => "backend",
        }
    }
}
