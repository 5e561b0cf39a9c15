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

//! SQL implementations of the credential vault seams.
//!
//! [`SqliteKeyVault`] serves the resolver's portal and proxy chains over the
//! key tables. The two decrypted-key reads differ on purpose: the portal
//! chain reads through soft deletions, the proxy chain does not.
//!
//! [`RequestCountLimiter`] enforces the request-count half of usage limits
//! by counting logged requests inside the window; cost limits pass through
//! to the usage pipeline untouched.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};

use promptgate_core::error::CredentialError;
use promptgate_core::vault::{
    KeyVault, LimitWindow, OrganizationAccount, ProxyKeyLimit, StoredProxyKey, UsageLimiter,
};

use crate::StoreError;

/// One active gateway key row, as returned by the admin listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRow {
    pub api_key_hash: String,
    pub organization_id: String,
}

/// Key material reads backed by the shared SQLite pool.
#[derive(Clone)]
pub struct SqliteKeyVault {
    pool: SqlitePool,
}

impl SqliteKeyVault {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List every active gateway key hash, for warming the resolver cache.
    /// Pages through the table so one call never materializes it whole;
    /// temp keys and auto-generated experiment keys are excluded.
    pub async fn list_api_keys(&self, page_size: i64) -> Result<Vec<ApiKeyRow>, StoreError> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        let mut offset = 0i64;
        loop {
            let rows = sqlx::query(
                "SELECT api_key_hash, organization_id FROM helicone_api_keys
                 WHERE soft_delete = 0 AND temp_key = 0
                   AND api_key_name != 'auto-generated-experiment-key'
                 ORDER BY id
                 LIMIT ?1 OFFSET ?2",
            )
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("failed to list api keys: {e}")))?;

            let page_len = rows.len() as i64;
            for row in rows {
                all.push(ApiKeyRow {
                    api_key_hash: row.get("api_key_hash"),
                    organization_id: row.get("organization_id"),
                });
            }
            if page_len < page_size {
                return Ok(all);
            }
            offset += page_size;
        }
    }
}

#[async_trait]
impl KeyVault for SqliteKeyVault {
    async fn org_id_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<String>, CredentialError> {
        let row = sqlx::query(
            "SELECT organization_id FROM helicone_api_keys
             WHERE api_key_hash = ?1 AND soft_delete = 0
             LIMIT 1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CredentialError::Backend(format!("api key lookup failed: {e}")))?;
        Ok(row.map(|r| r.get("organization_id")))
    }

    async fn organization(
        &self,
        org_id: &str,
    ) -> Result<Option<OrganizationAccount>, CredentialError> {
        let Some(row) = sqlx::query(
            "SELECT id, org_provider_key, limits FROM organization WHERE id = ?1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CredentialError::Backend(format!("organization lookup failed: {e}")))?
        else {
            return Ok(None);
        };

        let limits = row
            .get::<Option<String>, _>("limits")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| {
                CredentialError::Backend(format!("invalid limits JSON for org {org_id}: {e}"))
            })?;
        Ok(Some(OrganizationAccount {
            id: row.get("id"),
            org_provider_key: row.get("org_provider_key"),
            limits,
        }))
    }

    async fn provider_key_exists(
        &self,
        provider_key_id: &str,
    ) -> Result<bool, CredentialError> {
        let row = sqlx::query("SELECT 1 FROM provider_keys WHERE id = ?1")
            .bind(provider_key_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CredentialError::Backend(format!("provider key lookup failed: {e}")))?;
        Ok(row.is_some())
    }

    async fn decrypted_provider_key(
        &self,
        provider_key_id: &str,
    ) -> Result<Option<String>, CredentialError> {
        let row = sqlx::query("SELECT decrypted_provider_key FROM provider_keys WHERE id = ?1")
            .bind(provider_key_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CredentialError::Backend(format!("provider key read failed: {e}")))?;
        Ok(row.map(|r| r.get("decrypted_provider_key")))
    }

    async fn active_decrypted_provider_key(
        &self,
        provider_key_id: &str,
    ) -> Result<Option<String>, CredentialError> {
        let row = sqlx::query(
            "SELECT decrypted_provider_key FROM provider_keys
             WHERE id = ?1 AND soft_delete = 0",
        )
        .bind(provider_key_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CredentialError::Backend(format!("provider key read failed: {e}")))?;
        Ok(row.map(|r| r.get("decrypted_provider_key")))
    }

    async fn stored_proxy_key(
        &self,
        proxy_key_id: &str,
    ) -> Result<Option<StoredProxyKey>, CredentialError> {
        let row = sqlx::query(
            "SELECT id, org_id, helicone_proxy_key, provider_key_id
             FROM helicone_proxy_keys
             WHERE id = ?1 AND soft_delete = 0",
        )
        .bind(proxy_key_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CredentialError::Backend(format!("proxy key lookup failed: {e}")))?;
        Ok(row.map(|r| StoredProxyKey {
            id: r.get("id"),
            org_id: r.get("org_id"),
            digest: r.get("helicone_proxy_key"),
            provider_key_id: r.get("provider_key_id"),
        }))
    }

    async fn proxy_key_limits(
        &self,
        proxy_key_id: &str,
    ) -> Result<Vec<ProxyKeyLimit>, CredentialError> {
        let rows = sqlx::query(
            "SELECT id, helicone_proxy_key, cost, count, timewindow_seconds
             FROM helicone_proxy_key_limits
             WHERE helicone_proxy_key = ?1",
        )
        .bind(proxy_key_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CredentialError::Backend(format!("proxy limits read failed: {e}")))?;
        Ok(rows
            .into_iter()
            .map(|r| ProxyKeyLimit {
                id: r.get("id"),
                proxy_key_id: r.get("helicone_proxy_key"),
                cost: r.get("cost"),
                count: r.get("count"),
                timewindow_seconds: r.get("timewindow_seconds"),
            })
            .collect())
    }
}

/// Limiter that counts logged requests. Limits with only a cost component
/// always pass here; spend accounting lives in the usage pipeline.
#[derive(Clone)]
pub struct RequestCountLimiter {
    pool: SqlitePool,
}

impl RequestCountLimiter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn count_since(&self, sql: &str, key: &str, since: &str) -> Result<i64, CredentialError> {
        let count: i64 = sqlx::query(sql)
            .bind(key)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CredentialError::Backend(format!("request count failed: {e}")))?
            .get("n");
        Ok(count)
    }
}

#[async_trait]
impl UsageLimiter for RequestCountLimiter {
    async fn check_limits_single(
        &self,
        _cost: Option<f64>,
        requests: Option<i64>,
        window: LimitWindow,
        org_id: &str,
    ) -> Result<bool, CredentialError> {
        let Some(limit) = requests else {
            return Ok(true);
        };
        let since = (Utc::now() - Duration::seconds(window.seconds())).to_rfc3339();
        let count = self
            .count_since(
                "SELECT COUNT(*) AS n FROM request
                 WHERE helicone_org_id = ?1 AND created_at >= ?2",
                org_id,
                &since,
            )
            .await?;
        Ok(count < limit)
    }

    async fn check_limits(&self, limits: &[ProxyKeyLimit]) -> Result<bool, CredentialError> {
        for limit in limits {
            let Some(max) = limit.count else {
                continue;
            };
            let seconds = limit
                .timewindow_seconds
                .unwrap_or(LimitWindow::Month.seconds());
            let since = (Utc::now() - Duration::seconds(seconds)).to_rfc3339();
            let count = self
                .count_since(
                    "SELECT COUNT(*) AS n FROM request
                     WHERE helicone_proxy_key_id = ?1 AND created_at >= ?2",
                    &limit.proxy_key_id,
                    &since,
                )
                .await?;
            if count >= max {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
