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

//! Transactional log batch writer.
//!
//! One [`LogStore::commit`] call applies a whole [`LogBatch`] inside a single
//! transaction: request and response upserts (deduplicated per id, earliest
//! `created_at` wins), asset inserts, prompt version processing
//! (oldest-first), bulk prompt inputs, and score rows. Any table write
//! failing rolls the whole batch back, with one exception: the advisory
//! organization-onboarding flag, whose failures are logged and swallowed.
//!
//! Commits are additionally serialized through an in-process mutex. SQLite's
//! deferred transactions would otherwise let two concurrent batches read the
//! same latest prompt version before either writes its successor, producing
//! duplicate major versions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use promptgate_core::records::{
    AssetRecord, BatchAck, LogBatch, RequestRecord, ResponseRecord,
};

use crate::{migrations, open_pool, prompts, scores, StoreError};

/// SQLite-backed writer for gateway outcomes.
pub struct LogStore {
    pool: SqlitePool,
    commit_guard: Mutex<()>,
}

impl LogStore {
    /// Open (or create) a SQLite database and run migrations.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = open_pool(database_url).await?;
        Self::from_pool(pool).await
    }

    /// Create from an existing pool, running migrations first.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        migrations::run(&pool).await?;
        Ok(Self {
            pool,
            commit_guard: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Commit a batch atomically and return per-kind counts.
    ///
    /// Ordering inside the transaction: requests, responses, onboarding
    /// flags, assets, prompts (sorted oldest-first), bulk prompt inputs,
    /// scores. Prompt inputs referencing unknown versions are dropped and
    /// counted, never failing the batch.
    pub async fn commit(&self, batch: LogBatch) -> Result<BatchAck, StoreError> {
        if batch.is_empty() {
            return Ok(BatchAck::default());
        }
        let _guard = self.commit_guard.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("failed to begin transaction: {e}")))?;

        let requests = dedup_earliest(batch.requests, |r| r.id.as_str(), |r| r.created_at);
        for record in &requests {
            upsert_request(&mut tx, record).await?;
        }

        let responses = dedup_earliest(batch.responses, |r| r.request.as_str(), |r| r.created_at);
        for record in &responses {
            upsert_response(&mut tx, record).await?;
        }

        for org_id in &batch.onboarded_orgs {
            // Advisory only. A failure here must never abort the batch.
            let update = sqlx::query(
                "UPDATE organization SET has_onboarded = 1 WHERE id = ?1 AND has_onboarded = 0",
            )
            .bind(org_id)
            .execute(&mut *tx)
            .await;
            if let Err(e) = update {
                warn!(org_id = %org_id, error = %e, "onboarding flag update failed");
            }
        }

        for record in &batch.assets {
            insert_asset(&mut tx, record).await?;
        }

        let mut prompt_records = batch.prompts;
        prompt_records.sort_by_key(|p| p.created_at);
        let mut prompt_versions_created = 0;
        for record in &prompt_records {
            let outcome = prompts::process_prompt(&mut tx, record).await?;
            if outcome.created_version {
                prompt_versions_created += 1;
            }
        }

        let (prompt_inputs_written, prompt_inputs_dropped) =
            prompts::process_prompt_inputs_batch(&mut tx, &batch.prompt_inputs).await?;

        for record in &batch.scores {
            scores::process_score(&mut tx, record).await?;
        }
        let scores_processed = batch.scores.len();

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("failed to commit batch: {e}")))?;

        let ack = BatchAck {
            requests_written: requests.len(),
            responses_written: responses.len(),
            assets_written: batch.assets.len(),
            prompts_processed: prompt_records.len(),
            prompt_versions_created,
            prompt_inputs_written,
            prompt_inputs_dropped,
            scores_processed,
        };
        debug!(
            requests = ack.requests_written,
            responses = ack.responses_written,
            prompts = ack.prompts_processed,
            scores = ack.scores_processed,
            "batch committed"
        );
        Ok(ack)
    }
}

/// Keep one record per id, the one with the earliest `created_at` (first
/// seen wins ties). Records with an empty id cannot be addressed by the
/// upsert key and are dropped.
fn dedup_earliest<T>(
    records: Vec<T>,
    key: impl Fn(&T) -> &str,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut kept: Vec<T> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in records {
        let id = key(&record).to_owned();
        if id.is_empty() {
            continue;
        }
        match index.get(&id) {
            Some(&i) => {
                if created_at(&record) < created_at(&kept[i]) {
                    kept[i] = record;
                }
            }
            None => {
                index.insert(id, kept.len());
                kept.push(record);
            }
        }
    }
    kept
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("failed to serialize JSON column: {e}")))
}

async fn upsert_request(
    tx: &mut Transaction<'_, Sqlite>,
    record: &RequestRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO request (
            id, created_at, auth_hash, path, provider, helicone_api_key_id,
            helicone_org_id, helicone_proxy_key_id, helicone_user, model,
            model_override, prompt_id, prompt_values, properties, request_ip,
            target_url, threat, user_id, country_code, version
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
         ON CONFLICT (id, helicone_org_id) DO UPDATE SET
            created_at = excluded.created_at,
            auth_hash = excluded.auth_hash,
            path = excluded.path,
            provider = excluded.provider,
            helicone_api_key_id = excluded.helicone_api_key_id,
            helicone_proxy_key_id = excluded.helicone_proxy_key_id,
            helicone_user = excluded.helicone_user,
            model = excluded.model,
            model_override = excluded.model_override,
            prompt_id = excluded.prompt_id,
            prompt_values = excluded.prompt_values,
            properties = excluded.properties,
            request_ip = excluded.request_ip,
            target_url = excluded.target_url,
            threat = excluded.threat,
            user_id = excluded.user_id,
            country_code = excluded.country_code,
            version = excluded.version",
    )
    .bind(&record.id)
    .bind(record.created_at.to_rfc3339())
    .bind(&record.auth_hash)
    .bind(&record.path)
    .bind(&record.provider)
    .bind(record.helicone_api_key_id)
    .bind(record.helicone_org_id.clone().unwrap_or_default())
    .bind(&record.helicone_proxy_key_id)
    .bind(&record.helicone_user)
    .bind(&record.model)
    .bind(&record.model_override)
    .bind(&record.prompt_id)
    .bind(to_json(&record.prompt_values)?)
    .bind(to_json(&record.properties)?)
    .bind(&record.request_ip)
    .bind(&record.target_url)
    .bind(record.threat)
    .bind(&record.user_id)
    .bind(&record.country_code)
    .bind(record.version)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Database(format!("failed to upsert request {}: {e}", record.id)))?;
    Ok(())
}

async fn upsert_response(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ResponseRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO response (
            id, request, helicone_org_id, created_at, model, status,
            completion_tokens, prompt_tokens, delay_ms, time_to_first_token,
            prompt_cache_write_tokens, prompt_cache_read_tokens,
            prompt_audio_tokens, completion_audio_tokens, feedback
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT (request, helicone_org_id) DO UPDATE SET
            created_at = excluded.created_at,
            model = excluded.model,
            status = excluded.status,
            completion_tokens = excluded.completion_tokens,
            prompt_tokens = excluded.prompt_tokens,
            delay_ms = excluded.delay_ms,
            time_to_first_token = excluded.time_to_first_token,
            prompt_cache_write_tokens = excluded.prompt_cache_write_tokens,
            prompt_cache_read_tokens = excluded.prompt_cache_read_tokens,
            prompt_audio_tokens = excluded.prompt_audio_tokens,
            completion_audio_tokens = excluded.completion_audio_tokens,
            feedback = excluded.feedback",
    )
    .bind(&record.id)
    .bind(&record.request)
    .bind(record.helicone_org_id.clone().unwrap_or_default())
    .bind(record.created_at.to_rfc3339())
    .bind(&record.model)
    .bind(record.status)
    .bind(record.completion_tokens)
    .bind(record.prompt_tokens)
    .bind(record.delay_ms)
    .bind(record.time_to_first_token)
    .bind(record.prompt_cache_write_tokens)
    .bind(record.prompt_cache_read_tokens)
    .bind(record.prompt_audio_tokens)
    .bind(record.completion_audio_tokens)
    .bind(to_json(&record.feedback)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        StoreError::Database(format!(
            "failed to upsert response for request {}: {e}",
            record.request
        ))
    })?;
    Ok(())
}

async fn insert_asset(
    tx: &mut Transaction<'_, Sqlite>,
    record: &AssetRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO asset (id, request_id, organization_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (id, request_id) DO NOTHING",
    )
    .bind(&record.id)
    .bind(&record.request_id)
    .bind(&record.organization_id)
    .bind(record.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Database(format!("failed to insert asset {}: {e}", record.id)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::Row;

    async fn store() -> LogStore {
        LogStore::new("sqlite::memory:").await.unwrap()
    }

    fn request(id: &str, org: &str, created_at: DateTime<Utc>) -> RequestRecord {
        RequestRecord {
            id: id.into(),
            created_at,
            helicone_org_id: Some(org.into()),
            path: "/v1/chat/completions".into(),
            provider: "openai".into(),
            ..RequestRecord::default()
        }
    }

    fn response(id: &str, request: &str, org: &str, status: i32) -> ResponseRecord {
        ResponseRecord {
            id: id.into(),
            request: request.into(),
            helicone_org_id: Some(org.into()),
            status: Some(status),
            ..ResponseRecord::default()
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = store().await;
        let ack = store.commit(LogBatch::default()).await.unwrap();
        assert_eq!(ack.requests_written, 0);
        assert_eq!(ack.responses_written, 0);
    }

    #[tokio::test]
    async fn duplicate_request_ids_keep_the_earliest() {
        let store = store().await;
        let t0 = Utc::now();
        let later = request("req-1", "org-1", t0 + Duration::seconds(30));
        let mut earliest = request("req-1", "org-1", t0);
        earliest.path = "/v1/earliest".into();
        let unkeyed = request("", "org-1", t0);

        let ack = store
            .commit(LogBatch {
                requests: vec![later, earliest, unkeyed],
                ..LogBatch::default()
            })
            .await
            .unwrap();
        assert_eq!(ack.requests_written, 1);

        let row = sqlx::query("SELECT path, created_at FROM request WHERE id = 'req-1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("path"), "/v1/earliest");
    }

    #[tokio::test]
    async fn request_upsert_overwrites_non_key_columns() {
        let store = store().await;
        let t0 = Utc::now();
        store
            .commit(LogBatch {
                requests: vec![request("req-1", "org-1", t0)],
                ..LogBatch::default()
            })
            .await
            .unwrap();

        let mut updated = request("req-1", "org-1", t0);
        updated.model = Some("gpt-4o".into());
        updated.user_id = Some("u-9".into());
        store
            .commit(LogBatch {
                requests: vec![updated],
                ..LogBatch::default()
            })
            .await
            .unwrap();

        let row = sqlx::query("SELECT model, user_id FROM request WHERE id = 'req-1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<Option<String>, _>("model").as_deref(), Some("gpt-4o"));
        assert_eq!(row.get::<Option<String>, _>("user_id").as_deref(), Some("u-9"));

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM request")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn same_request_different_org_stays_separate() {
        let store = store().await;
        let t0 = Utc::now();
        store
            .commit(LogBatch {
                requests: vec![request("req-1", "org-1", t0)],
                ..LogBatch::default()
            })
            .await
            .unwrap();
        store
            .commit(LogBatch {
                requests: vec![request("req-1", "org-2", t0)],
                ..LogBatch::default()
            })
            .await
            .unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM request WHERE id = 'req-1'")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn response_upsert_keeps_original_id() {
        let store = store().await;
        store
            .commit(LogBatch {
                responses: vec![response("res-1", "req-1", "org-1", 200)],
                ..LogBatch::default()
            })
            .await
            .unwrap();
        store
            .commit(LogBatch {
                responses: vec![response("res-2", "req-1", "org-1", 500)],
                ..LogBatch::default()
            })
            .await
            .unwrap();

        let row = sqlx::query("SELECT id, status FROM response WHERE request = 'req-1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("id"), "res-1");
        assert_eq!(row.get::<Option<i64>, _>("status"), Some(500));
    }

    #[tokio::test]
    async fn onboarding_flag_is_set_once_and_failures_are_swallowed() {
        let store = store().await;
        sqlx::query("INSERT INTO organization (id, name, has_onboarded) VALUES ('org-1', 'acme', 0)")
            .execute(store.pool())
            .await
            .unwrap();

        let mut batch = LogBatch::default();
        batch.onboarded_orgs.insert("org-1".into());
        // An org id with no row updates nothing and must not fail the batch.
        batch.onboarded_orgs.insert("org-missing".into());
        batch.requests.push(request("req-1", "org-1", Utc::now()));
        store.commit(batch).await.unwrap();

        let onboarded: i64 =
            sqlx::query("SELECT has_onboarded AS f FROM organization WHERE id = 'org-1'")
                .fetch_one(store.pool())
                .await
                .unwrap()
                .get("f");
        assert_eq!(onboarded, 1);
    }

    #[tokio::test]
    async fn assets_ignore_duplicate_inserts() {
        let store = store().await;
        let asset = AssetRecord {
            id: "asset-1".into(),
            request_id: "req-1".into(),
            organization_id: "org-1".into(),
            created_at: Utc::now(),
        };
        store
            .commit(LogBatch {
                assets: vec![asset.clone(), asset],
                ..LogBatch::default()
            })
            .await
            .unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM asset")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("logs.db").display());

        let store = LogStore::new(&url).await.unwrap();
        store
            .commit(LogBatch {
                requests: vec![request("req-1", "org-1", Utc::now())],
                ..LogBatch::default()
            })
            .await
            .unwrap();
        store.pool().close().await;

        let reopened = LogStore::new(&url).await.unwrap();
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM request WHERE id = 'req-1'")
            .fetch_one(reopened.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_the_whole_batch() {
        let store = store().await;
        // Second response reuses the primary key with a different request,
        // which the upsert's conflict target cannot absorb.
        let batch = LogBatch {
            requests: vec![request("req-1", "org-1", Utc::now())],
            responses: vec![
                response("res-1", "req-a", "org-1", 200),
                response("res-1", "req-b", "org-1", 200),
            ],
            ..LogBatch::default()
        };
        store.commit(batch).await.unwrap_err();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM request")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 0, "request write must roll back with the batch");
    }
}
