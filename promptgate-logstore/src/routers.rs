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

//! Router configuration storage.
//!
//! A router is an org-scoped named entity addressed by a short random hash;
//! its configuration history is append-only. Every update writes a new
//! immutable version row whose label is the SHA-256 of the config JSON, so
//! identical configs always carry identical labels and a changed config is
//! detectable by label alone.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use promptgate_core::hash::sha256_hex;

use crate::{parse_datetime, StoreError};

/// Length of the short routing hash in request URLs.
const ROUTER_HASH_LEN: usize = 12;

/// One router row.
#[derive(Debug, Clone)]
pub struct RouterRow {
    pub id: String,
    /// Short lowercase-alphanumeric handle used in request paths.
    pub hash: String,
    pub name: String,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
}

/// One immutable config version of a router.
#[derive(Debug, Clone)]
pub struct RouterVersionRow {
    pub id: String,
    pub router_id: String,
    /// SHA-256 hex of the config JSON.
    pub version: String,
    pub config: Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only router config store over the shared pool.
#[derive(Clone)]
pub struct RouterStore {
    pool: SqlitePool,
}

fn router_hash() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROUTER_HASH_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

fn router_from_row(row: &SqliteRow) -> Result<RouterRow, StoreError> {
    Ok(RouterRow {
        id: row.get("id"),
        hash: row.get("hash"),
        name: row.get("name"),
        organization_id: row.get("organization_id"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<RouterVersionRow, StoreError> {
    let config = serde_json::from_str(&row.get::<String, _>("config"))
        .map_err(|e| StoreError::Corrupt(format!("invalid stored router config JSON: {e}")))?;
    Ok(RouterVersionRow {
        id: row.get("id"),
        router_id: row.get("router_id"),
        version: row.get("version"),
        config,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}

impl RouterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a router with its initial config version, in one transaction.
    pub async fn create_router(
        &self,
        org_id: &str,
        name: &str,
        config: &Value,
    ) -> Result<RouterRow, StoreError> {
        let router = RouterRow {
            id: Uuid::new_v4().to_string(),
            hash: router_hash(),
            name: name.to_owned(),
            organization_id: org_id.to_owned(),
            created_at: Utc::now(),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("failed to begin transaction: {e}")))?;
        sqlx::query(
            "INSERT INTO routers (id, hash, name, organization_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&router.id)
        .bind(&router.hash)
        .bind(&router.name)
        .bind(&router.organization_id)
        .bind(router.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to create router {name}: {e}")))?;

        insert_version(&mut tx, &router.id, config).await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("failed to commit router create: {e}")))?;
        Ok(router)
    }

    /// Append a new config version. The previous versions stay untouched.
    pub async fn update_config(
        &self,
        org_id: &str,
        router_id: &str,
        config: &Value,
    ) -> Result<RouterVersionRow, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("failed to begin transaction: {e}")))?;
        let owned = sqlx::query("SELECT 1 FROM routers WHERE id = ?1 AND organization_id = ?2")
            .bind(router_id)
            .bind(org_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(format!("failed to check router {router_id}: {e}")))?;
        if owned.is_none() {
            return Err(StoreError::NotFound(format!("router {router_id}")));
        }

        let version = insert_version(&mut tx, router_id, config).await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("failed to commit config update: {e}")))?;
        Ok(version)
    }

    /// Latest config version of an org's router, newest write wins.
    pub async fn latest_config(
        &self,
        org_id: &str,
        router_id: &str,
    ) -> Result<Option<RouterVersionRow>, StoreError> {
        let row = sqlx::query(
            "SELECT v.id, v.router_id, v.version, v.config, v.created_at
             FROM router_config_versions v
             JOIN routers r ON r.id = v.router_id
             WHERE r.id = ?1 AND r.organization_id = ?2
             ORDER BY v.created_at DESC, v.rowid DESC
             LIMIT 1",
        )
        .bind(router_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("failed to read router config: {e}")))?;
        row.as_ref().map(version_from_row).transpose()
    }

    /// All routers of an organization, newest first.
    pub async fn list_routers(&self, org_id: &str) -> Result<Vec<RouterRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, hash, name, organization_id, created_at
             FROM routers
             WHERE organization_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("failed to list routers: {e}")))?;
        rows.iter().map(router_from_row).collect()
    }
}

async fn insert_version(
    tx: &mut Transaction<'_, Sqlite>,
    router_id: &str,
    config: &Value,
) -> Result<RouterVersionRow, StoreError> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| StoreError::Corrupt(format!("failed to serialize router config: {e}")))?;
    let version = RouterVersionRow {
        id: Uuid::new_v4().to_string(),
        router_id: router_id.to_owned(),
        version: sha256_hex(&config_json),
        config: config.clone(),
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO router_config_versions (id, router_id, version, config, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&version.id)
    .bind(&version.router_id)
    .bind(&version.version)
    .bind(config_json)
    .bind(version.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Database(format!("failed to insert router config version: {e}")))?;
    Ok(version)
}
