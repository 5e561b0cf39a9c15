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

//! Credential resolution: presented gateway key to real provider key.
//!
//! Two chains, selected by token prefix:
//!
//! - **proxy** (`Bearer sk-helicone-proxy...`): the token embeds a key id
//!   UUID. Look up the stored key row, enforce its limits, verify the
//!   presented secret against the stored salted digest, then fetch the
//!   active provider key it points at.
//! - **portal** (`Bearer sk-helicone-cp...`): hash the whole presented
//!   value, find the owning organization through the key hash index, enforce
//!   the organization's monthly limits, then fetch the organization's
//!   configured provider key.
//!
//! Standard keys resolve to nothing: the caller's own provider credential
//! passes through untouched. Every chain failure carries the stage that
//! failed so the ingress log can tell a revoked key from an exhausted limit.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use promptgate_core::error::CredentialError;
use promptgate_core::hash::{hash_auth, verify_proxy_key};
use promptgate_core::identity::{PORTAL_KEY_PREFIX, PROXY_KEY_PREFIX};
use promptgate_core::vault::{KeyVault, LimitWindow, UsageLimiter};

use crate::cache::CredentialCache;

static PROXY_KEY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("invalid key pattern")
});

/// Outcome of a successful chain: the real provider key plus enough
/// ownership context to attribute the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProviderKey {
    pub provider_key: String,
    pub organization_id: String,
    /// Set by the proxy chain only.
    pub proxy_key_id: Option<String>,
}

/// Walks the vault chains, fronted by a shared [`CredentialCache`].
pub struct CredentialResolver {
    vault: Arc<dyn KeyVault>,
    limiter: Arc<dyn UsageLimiter>,
    cache: Arc<CredentialCache>,
}

impl CredentialResolver {
    pub fn new(
        vault: Arc<dyn KeyVault>,
        limiter: Arc<dyn UsageLimiter>,
        cache: Arc<CredentialCache>,
    ) -> Self {
        Self {
            vault,
            limiter,
            cache,
        }
    }

    /// True when the token belongs to a chain this resolver handles.
    pub fn wants_resolution(token: &str) -> bool {
        token.starts_with(PROXY_KEY_PREFIX) || token.starts_with(PORTAL_KEY_PREFIX)
    }

    /// Resolve a bearer token. `Ok(None)` means a standard key that needs no
    /// exchange; the two gateway prefixes run their chain and either yield a
    /// provider key or fail the request.
    pub async fn resolve_bearer(
        &self,
        token: &str,
    ) -> Result<Option<ResolvedProviderKey>, CredentialError> {
        if token.starts_with(PORTAL_KEY_PREFIX) {
            return self.resolve_portal(token).await.map(Some);
        }
        if token.starts_with(PROXY_KEY_PREFIX) {
            return self.resolve_proxy(token).await.map(Some);
        }
        Ok(None)
    }

    /// Portal chain, cached per presented token.
    pub async fn resolve_portal(
        &self,
        token: &str,
    ) -> Result<ResolvedProviderKey, CredentialError> {
        self.cache
            .get_or_try_resolve(format!("portal:{token}"), self.portal_chain(token))
            .await
    }

    /// Proxy chain, cached per presented token.
    pub async fn resolve_proxy(&self, token: &str) -> Result<ResolvedProviderKey, CredentialError> {
        self.cache
            .get_or_try_resolve(format!("proxy:{token}"), self.proxy_chain(token))
            .await
    }

    async fn portal_chain(&self, token: &str) -> Result<ResolvedProviderKey, CredentialError> {
        let key_hash = hash_auth(token);
        let org_id = self
            .vault
            .org_id_by_key_hash(&key_hash)
            .await?
            .ok_or_else(|| {
                CredentialError::HashLookup("no api key matches the presented token".into())
            })?;
        let org = self.vault.organization(&org_id).await?.ok_or_else(|| {
            CredentialError::Backend(format!("organization {org_id} not found"))
        })?;
        let provider_key_id = org.org_provider_key.ok_or_else(|| {
            CredentialError::DecryptionMissing(
                "organization has no provider key configured".into(),
            )
        })?;
        if !self.vault.provider_key_exists(&provider_key_id).await? {
            return Err(CredentialError::DecryptionMissing(format!(
                "provider key {provider_key_id} not found"
            )));
        }
        if let Some(limits) = org.limits {
            let within = self
                .limiter
                .check_limits_single(limits.cost, limits.requests, LimitWindow::Month, &org_id)
                .await?;
            if !within {
                return Err(CredentialError::LimitExceeded(
                    "organization monthly limit reached".into(),
                ));
            }
        }
        let provider_key = self
            .vault
            .decrypted_provider_key(&provider_key_id)
            .await?
            .ok_or_else(|| {
                CredentialError::DecryptionMissing(format!(
                    "no decrypted key for provider key {provider_key_id}"
                ))
            })?;
        debug!(org_id = %org_id, "portal key resolved");
        Ok(ResolvedProviderKey {
            provider_key,
            organization_id: org_id,
            proxy_key_id: None,
        })
    }

    async fn proxy_chain(&self, token: &str) -> Result<ResolvedProviderKey, CredentialError> {
        let proxy_key_id = PROXY_KEY_ID
            .find(token)
            .map(|m| m.as_str().to_lowercase())
            .ok_or_else(|| {
                CredentialError::MalformedHeader("proxy key id not found in token".into())
            })?;
        let stored = self
            .vault
            .stored_proxy_key(&proxy_key_id)
            .await?
            .ok_or_else(|| {
                CredentialError::HashLookup(format!("proxy key {proxy_key_id} not found"))
            })?;
        let limits = self.vault.proxy_key_limits(&stored.id).await?;
        if !limits.is_empty() && !self.limiter.check_limits(&limits).await? {
            return Err(CredentialError::LimitExceeded(
                "proxy key limit reached".into(),
            ));
        }
        let presented = token.trim_start_matches("Bearer ").trim();
        if !verify_proxy_key(presented, &stored.digest) {
            return Err(CredentialError::SignatureMismatch);
        }
        let provider_key = self
            .vault
            .active_decrypted_provider_key(&stored.provider_key_id)
            .await?
            .ok_or_else(|| {
                CredentialError::DecryptionMissing(format!(
                    "no active decrypted key for provider key {}",
                    stored.provider_key_id
                ))
            })?;
        debug!(org_id = %stored.org_id, proxy_key_id = %stored.id, "proxy key resolved");
        Ok(ResolvedProviderKey {
            provider_key,
            organization_id: stored.org_id,
            proxy_key_id: Some(stored.id),
        })
    }
}
