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

//! Credential vault and usage-limit seams.
//!
//! The resolver walks stored key material through these traits; the SQL
//! implementations live in the log store crate, and [`InMemoryKeyVault`] /
//! [`AllowAllLimiter`] cover tests and local wiring.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

/// Account row fields the portal chain reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationAccount {
    pub id: String,
    /// Id of the provider key configured for portal resolution.
    pub org_provider_key: Option<String>,
    pub limits: Option<PortalLimits>,
}

/// Monthly spend limits configured on an organization.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PortalLimits {
    pub cost: Option<f64>,
    pub requests: Option<i64>,
}

/// A stored proxy key row: the raw key never appears here, only its salted
/// digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProxyKey {
    pub id: String,
    pub org_id: String,
    pub digest: String,
    pub provider_key_id: String,
}

/// A per-proxy-key usage limit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyKeyLimit {
    pub id: String,
    pub proxy_key_id: String,
    pub cost: Option<f64>,
    pub count: Option<i64>,
    pub timewindow_seconds: Option<i64>,
}

/// Usage-limit accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitWindow {
    Day,
    Week,
    Month,
}

impl LimitWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitWindow::Day => "day",
            LimitWindow::Week => "week",
            LimitWindow::Month => "month",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            LimitWindow::Day => 86_400,
            LimitWindow::Week => 7 * 86_400,
            LimitWindow::Month => 30 * 86_400,
        }
    }
}

/// Read access to stored key material.
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Organization owning the gateway key with this hash, skipping
    /// soft-deleted keys.
    async fn org_id_by_key_hash(&self, key_hash: &str)
        -> Result<Option<String>, CredentialError>;

    async fn organization(
        &self,
        org_id: &str,
    ) -> Result<Option<OrganizationAccount>, CredentialError>;

    /// Whether a provider key slot exists at all (portal chain walks the
    /// slot before asking for the decrypted key).
    async fn provider_key_exists(&self, provider_key_id: &str)
        -> Result<bool, CredentialError>;

    /// Decrypted provider key regardless of deletion state (portal chain).
    async fn decrypted_provider_key(
        &self,
        provider_key_id: &str,
    ) -> Result<Option<String>, CredentialError>;

    /// Decrypted provider key, skipping soft-deleted rows (proxy chain).
    async fn active_decrypted_provider_key(
        &self,
        provider_key_id: &str,
    ) -> Result<Option<String>, CredentialError>;

    /// Stored proxy key by id, skipping soft-deleted rows.
    async fn stored_proxy_key(
        &self,
        proxy_key_id: &str,
    ) -> Result<Option<StoredProxyKey>, CredentialError>;

    async fn proxy_key_limits(
        &self,
        proxy_key_id: &str,
    ) -> Result<Vec<ProxyKeyLimit>, CredentialError>;
}

/// Usage-limit checks consumed during credential resolution. Returning
/// `false` means the limit is exhausted and resolution must fail.
#[async_trait]
pub trait UsageLimiter: Send + Sync {
    async fn check_limits_single(
        &self,
        cost: Option<f64>,
        requests: Option<i64>,
        window: LimitWindow,
        org_id: &str,
    ) -> Result<bool, CredentialError>;

    async fn check_limits(&self, limits: &[ProxyKeyLimit]) -> Result<bool, CredentialError>;
}

/// Limiter that never rejects. Default wiring when no usage pipeline is
/// attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllLimiter;

#[async_trait]
impl UsageLimiter for AllowAllLimiter {
    async fn check_limits_single(
        &self,
        _cost: Option<f64>,
        _requests: Option<i64>,
        _window: LimitWindow,
        _org_id: &str,
    ) -> Result<bool, CredentialError> {
        Ok(true)
    }

    async fn check_limits(&self, _limits: &[ProxyKeyLimit]) -> Result<bool, CredentialError> {
        Ok(true)
    }
}

/// Map-backed vault for tests and local setups.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyVault {
    /// key hash -> organization id
    pub key_hashes: HashMap<String, String>,
    pub organizations: HashMap<String, OrganizationAccount>,
    /// provider key id -> decrypted key (None marks a soft-deleted row)
    pub provider_keys: HashMap<String, Option<String>>,
    pub proxy_keys: HashMap<String, StoredProxyKey>,
    pub proxy_key_limits: HashMap<String, Vec<ProxyKeyLimit>>,
}

#[async_trait]
impl KeyVault for InMemoryKeyVault {
    async fn org_id_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<String>, CredentialError> {
        Ok(self.key_hashes.get(key_hash).cloned())
    }

    async fn organization(
        &self,
        org_id: &str,
    ) -> Result<Option<OrganizationAccount>, CredentialError> {
        Ok(self.organizations.get(org_id).cloned())
    }

    async fn provider_key_exists(
        &self,
        provider_key_id: &str,
    ) -> Result<bool, CredentialError> {
        Ok(self.provider_keys.contains_key(provider_key_id))
    }

    async fn decrypted_provider_key(
        &self,
        provider_key_id: &str,
    ) -> Result<Option<String>, CredentialError> {
        Ok(self
            .provider_keys
            .get(provider_key_id)
            .cloned()
            .flatten())
    }

    async fn active_decrypted_provider_key(
        &self,
        provider_key_id: &str,
    ) -> Result<Option<String>, CredentialError> {
        // Soft-deleted rows are modeled as None values.
        self.decrypted_provider_key(provider_key_id).await
    }

    async fn stored_proxy_key(
        &self,
        proxy_key_id: &str,
    ) -> Result<Option<StoredProxyKey>, CredentialError> {
        Ok(self.proxy_keys.get(proxy_key_id).cloned())
    }

    async fn proxy_key_limits(
        &self,
        proxy_key_id: &str,
    ) -> Result<Vec<ProxyKeyLimit>, CredentialError> {
        Ok(self
            .proxy_key_limits
            .get(proxy_key_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_vault_round_trip() {
        let mut vault = InMemoryKeyVault::default();
        vault.key_hashes.insert("hash1".into(), "org1".into());
        vault.organizations.insert(
            "org1".into(),
            OrganizationAccount {
                id: "org1".into(),
                org_provider_key: Some("pk1".into()),
                limits: Some(PortalLimits {
                    cost: Some(100.0),
                    requests: Some(1000),
                }),
            },
        );
        vault
            .provider_keys
            .insert("pk1".into(), Some("sk-real".into()));

        let org = vault.org_id_by_key_hash("hash1").await.unwrap();
        assert_eq!(org.as_deref(), Some("org1"));
        assert!(vault.provider_key_exists("pk1").await.unwrap());
        assert_eq!(
            vault.decrypted_provider_key("pk1").await.unwrap().as_deref(),
            Some("sk-real")
        );
        assert!(vault
            .decrypted_provider_key("missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn allow_all_limiter_allows() {
        let limiter = AllowAllLimiter;
        assert!(limiter
            .check_limits_single(Some(1.0), Some(1), LimitWindow::Month, "org")
            .await
            .unwrap());
        assert!(limiter.check_limits(&[]).await.unwrap());
    }

    #[test]
    fn window_seconds() {
        assert_eq!(LimitWindow::Month.seconds(), 30 * 86_400);
        assert_eq!(LimitWindow::Month.as_str(), "month");
    }
}
