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

//! Prompt version lifecycle, applied inside the batch transaction.
//!
//! Each prompt record either opens a new prompt at version 0.0, supersedes
//! the latest version (major + 1, minor reset to 0), or just attaches its
//! inputs to the existing latest. Exactly one version per prompt carries the
//! `isProduction` metadata flag; creating a successor moves the flag to it.
//! Two records never auto-version: prompts first authored in the UI
//! (`createdFromUi` in the prompt's metadata) and bare-string templates,
//! which are wrapped in an error sentinel on arrival.
//!
//! The admin surface (production flips, rename, soft delete, listings) lives
//! on [`LogStore`] next to the write path so both sides share row shapes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use tracing::warn;
use uuid::Uuid;

use promptgate_core::records::{PromptInputRecord, PromptRecord, TemplateWithInputs};
use promptgate_core::template::{classify_change, error_sentinel, is_error_sentinel};

use crate::{parse_datetime, LogStore, StoreError};

const VERSION_COLUMNS: &str = "id, prompt_v2, organization, major_version, minor_version, \
     helicone_template, model, metadata, created_at";

/// One stored prompt version.
#[derive(Debug, Clone)]
pub struct PromptVersionRow {
    pub id: String,
    /// Internal id of the owning `prompt_v2` row.
    pub prompt_id: String,
    pub organization: String,
    pub major_version: i64,
    pub minor_version: i64,
    pub template: Option<Value>,
    pub model: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl PromptVersionRow {
    /// Whether this is the version production traffic resolves to.
    pub fn is_production(&self) -> bool {
        self.metadata
            .get("isProduction")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// What one prompt record did inside the transaction.
#[derive(Debug, Clone, Default)]
pub struct PromptOutcome {
    pub created_version: bool,
    /// Version the record's inputs attached to, when any.
    pub version_id: Option<String>,
}

fn version_from_row(row: &SqliteRow) -> Result<PromptVersionRow, StoreError> {
    let template = row
        .get::<Option<String>, _>("helicone_template")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("invalid stored template JSON: {e}")))?;
    let metadata: Value = serde_json::from_str(&row.get::<String, _>("metadata"))
        .map_err(|e| StoreError::Corrupt(format!("invalid version metadata JSON: {e}")))?;
    Ok(PromptVersionRow {
        id: row.get("id"),
        prompt_id: row.get("prompt_v2"),
        organization: row.get("organization"),
        major_version: row.get("major_version"),
        minor_version: row.get("minor_version"),
        template,
        model: row.get("model"),
        metadata,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}

/// Apply one prompt record: ensure the prompt row exists, decide whether the
/// submitted template supersedes the latest version, and attach the record's
/// inputs to whichever version ends up current.
pub async fn process_prompt(
    tx: &mut Transaction<'_, Sqlite>,
    record: &PromptRecord,
) -> Result<PromptOutcome, StoreError> {
    let Some(submitted) = &record.template else {
        return Ok(PromptOutcome::default());
    };

    // Bare strings are recorded as the error sentinel and never versioned.
    let template = match submitted.template.as_str() {
        Some(raw) => error_sentinel(raw),
        None => submitted.template.clone(),
    };

    let prompt = ensure_prompt(tx, record).await?;
    let latest = latest_version_in_tx(tx, &record.org_id, &prompt.id).await?;
    let mut version_id = latest.as_ref().map(|v| v.id.clone());

    let created_from_ui = prompt
        .metadata
        .get("createdFromUi")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // A record older than the latest version is replayed traffic and must
    // not rewind the ladder.
    let supersedes = match &latest {
        None => true,
        Some(existing) => {
            let old = existing.template.clone().unwrap_or(Value::Null);
            classify_change(&old, &template).creates_version()
                && existing.created_at <= record.created_at
        }
    };
    let should_create = !created_from_ui && !is_error_sentinel(&template) && supersedes;

    if should_create {
        let new_major = latest.as_ref().map_or(0, |v| v.major_version + 1);
        let new_id = Uuid::new_v4().to_string();
        let mut metadata = json!({ "isProduction": true });
        if let Some(provider) = &record.provider {
            metadata["provider"] = json!(provider);
        }
        let template_json = serde_json::to_string(&template)
            .map_err(|e| StoreError::Corrupt(format!("failed to serialize template: {e}")))?;
        sqlx::query(
            "INSERT INTO prompts_versions (
                id, prompt_v2, organization, major_version, minor_version,
                helicone_template, model, metadata, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&new_id)
        .bind(&prompt.id)
        .bind(&record.org_id)
        .bind(new_major)
        .bind(0i64)
        .bind(template_json)
        .bind(&record.model)
        .bind(metadata.to_string())
        .bind(record.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            StoreError::Database(format!(
                "failed to insert version for prompt {}: {e}",
                record.prompt_id
            ))
        })?;

        // One production version per prompt: the superseded row hands the
        // flag over.
        if let Some(existing) = &latest {
            sqlx::query(
                "UPDATE prompts_versions
                 SET metadata = json_remove(metadata, '$.isProduction')
                 WHERE id = ?1",
            )
            .bind(&existing.id)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Database(format!("failed to clear production flag: {e}")))?;
        }
        version_id = Some(new_id);
    }

    if let Some(version_id) = &version_id {
        if !submitted.inputs.is_empty() {
            write_inputs(tx, record, version_id, submitted).await?;
        }
    }

    Ok(PromptOutcome {
        created_version: should_create,
        version_id,
    })
}

/// Bulk-ingest prompt input rows. Rows referencing unknown version ids are
/// dropped and counted; the valid remainder lands in one multi-row insert.
/// Returns `(written, dropped)`.
pub async fn process_prompt_inputs_batch(
    tx: &mut Transaction<'_, Sqlite>,
    inputs: &[PromptInputRecord],
) -> Result<(usize, usize), StoreError> {
    if inputs.is_empty() {
        return Ok((0, 0));
    }

    let distinct: BTreeSet<&str> = inputs.iter().map(|i| i.version_id.as_str()).collect();
    let mut lookup = QueryBuilder::<Sqlite>::new("SELECT id FROM prompts_versions WHERE id IN (");
    let mut separated = lookup.separated(", ");
    for id in &distinct {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    let rows = lookup
        .build()
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to validate version ids: {e}")))?;
    let known: BTreeSet<String> = rows.iter().map(|r| r.get("id")).collect();

    let mut valid: Vec<&PromptInputRecord> = Vec::with_capacity(inputs.len());
    let mut dropped = 0usize;
    for input in inputs {
        if known.contains(&input.version_id) {
            valid.push(input);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!(dropped, "dropping prompt inputs with unknown version ids");
    }
    if valid.is_empty() {
        return Ok((0, dropped));
    }

    let mut serialized = Vec::with_capacity(valid.len());
    for input in &valid {
        serialized.push(
            serde_json::to_string(&input.inputs)
                .map_err(|e| StoreError::Corrupt(format!("failed to serialize inputs: {e}")))?,
        );
    }

    let now = Utc::now().to_rfc3339();
    let mut insert = QueryBuilder::<Sqlite>::new(
        "INSERT INTO prompts_2025_inputs (id, request_id, version_id, inputs, created_at) ",
    );
    insert.push_values(
        valid.iter().zip(serialized),
        |mut b, (input, inputs_json)| {
            b.push_bind(Uuid::new_v4().to_string())
                .push_bind(&input.request_id)
                .push_bind(&input.version_id)
                .push_bind(inputs_json)
                .push_bind(now.clone());
        },
    );
    insert
        .build()
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to insert prompt inputs: {e}")))?;

    Ok((valid.len(), dropped))
}

async fn write_inputs(
    tx: &mut Transaction<'_, Sqlite>,
    record: &PromptRecord,
    version_id: &str,
    submitted: &TemplateWithInputs,
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    for key in submitted.inputs.keys() {
        sqlx::query(
            "INSERT INTO prompt_input_keys (id, key, prompt_version, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (key, prompt_version) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(key)
        .bind(version_id)
        .bind(&now)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to insert input key {key}: {e}")))?;
    }

    let inputs_json = serde_json::to_string(&submitted.inputs)
        .map_err(|e| StoreError::Corrupt(format!("failed to serialize inputs: {e}")))?;
    let auto_json = serde_json::to_string(&submitted.auto_inputs)
        .map_err(|e| StoreError::Corrupt(format!("failed to serialize auto inputs: {e}")))?;
    sqlx::query(
        "INSERT INTO prompt_input_record (
            id, inputs, auto_prompt_inputs, source_request, prompt_version, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(inputs_json)
    .bind(auto_json)
    .bind(&record.request_id)
    .bind(version_id)
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        StoreError::Database(format!(
            "failed to insert input record for request {}: {e}",
            record.request_id
        ))
    })?;
    Ok(())
}

struct PromptRow {
    id: String,
    metadata: Value,
}

/// Look up the prompt for (org, user-defined id), creating it on first
/// sight. No soft-delete filter here: the unique slot stays occupied after a
/// soft delete, and traffic keeps versioning against it.
async fn ensure_prompt(
    tx: &mut Transaction<'_, Sqlite>,
    record: &PromptRecord,
) -> Result<PromptRow, StoreError> {
    let existing = sqlx::query(
        "SELECT id, metadata FROM prompt_v2 WHERE organization = ?1 AND user_defined_id = ?2",
    )
    .bind(&record.org_id)
    .bind(&record.prompt_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| {
        StoreError::Database(format!("failed to look up prompt {}: {e}", record.prompt_id))
    })?;

    if let Some(row) = existing {
        let metadata = serde_json::from_str(&row.get::<String, _>("metadata"))
            .map_err(|e| StoreError::Corrupt(format!("invalid prompt metadata JSON: {e}")))?;
        return Ok(PromptRow {
            id: row.get("id"),
            metadata,
        });
    }

    let id = Uuid::new_v4().to_string();
    let metadata = json!({ "createdFromUi": false });
    sqlx::query(
        "INSERT INTO prompt_v2 (id, organization, user_defined_id, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&id)
    .bind(&record.org_id)
    .bind(&record.prompt_id)
    .bind(metadata.to_string())
    .bind(record.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        StoreError::Database(format!("failed to create prompt {}: {e}", record.prompt_id))
    })?;
    Ok(PromptRow { id, metadata })
}

async fn latest_version_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    org_id: &str,
    prompt_row_id: &str,
) -> Result<Option<PromptVersionRow>, StoreError> {
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM prompts_versions
         WHERE organization = ?1 AND prompt_v2 = ?2
         ORDER BY major_version DESC, minor_version DESC
         LIMIT 1"
    );
    let row = sqlx::query(&sql)
        .bind(org_id)
        .bind(prompt_row_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to read latest version: {e}")))?;
    row.as_ref().map(version_from_row).transpose()
}

impl LogStore {
    async fn prompt_row_id(
        &self,
        org_id: &str,
        prompt_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT id FROM prompt_v2
             WHERE organization = ?1 AND user_defined_id = ?2 AND soft_delete = 0",
        )
        .bind(org_id)
        .bind(prompt_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| StoreError::Database(format!("failed to look up prompt {prompt_id}: {e}")))?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Move the production flag to the named version, clearing every sibling.
    pub async fn set_production_version(
        &self,
        org_id: &str,
        prompt_id: &str,
        version_id: &str,
    ) -> Result<(), StoreError> {
        let prompt_row_id = self
            .prompt_row_id(org_id, prompt_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("prompt {prompt_id}")))?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("failed to begin transaction: {e}")))?;

        let owned = sqlx::query(
            "SELECT 1 FROM prompts_versions
             WHERE id = ?1 AND prompt_v2 = ?2 AND organization = ?3",
        )
        .bind(version_id)
        .bind(&prompt_row_id)
        .bind(org_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to check version {version_id}: {e}")))?;
        if owned.is_none() {
            return Err(StoreError::NotFound(format!(
                "version {version_id} of prompt {prompt_id}"
            )));
        }

        sqlx::query(
            "UPDATE prompts_versions
             SET metadata = json_remove(metadata, '$.isProduction')
             WHERE prompt_v2 = ?1",
        )
        .bind(&prompt_row_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to clear production flags: {e}")))?;

        sqlx::query(
            "UPDATE prompts_versions
             SET metadata = json_set(metadata, '$.isProduction', json('true'))
             WHERE id = ?1",
        )
        .bind(version_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("failed to set production flag: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("failed to commit production flip: {e}")))
    }

    /// Version currently flagged production, if any.
    pub async fn production_version(
        &self,
        org_id: &str,
        prompt_id: &str,
    ) -> Result<Option<PromptVersionRow>, StoreError> {
        let Some(prompt_row_id) = self.prompt_row_id(org_id, prompt_id).await? else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM prompts_versions
             WHERE prompt_v2 = ?1 AND json_extract(metadata, '$.isProduction') = 1
             ORDER BY major_version DESC, minor_version DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(&prompt_row_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| StoreError::Database(format!("failed to read production version: {e}")))?;
        row.as_ref().map(version_from_row).transpose()
    }

    /// Highest (major, minor) version, regardless of production flag.
    pub async fn latest_version(
        &self,
        org_id: &str,
        prompt_id: &str,
    ) -> Result<Option<PromptVersionRow>, StoreError> {
        let Some(prompt_row_id) = self.prompt_row_id(org_id, prompt_id).await? else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM prompts_versions
             WHERE prompt_v2 = ?1
             ORDER BY major_version DESC, minor_version DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(&prompt_row_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| StoreError::Database(format!("failed to read latest version: {e}")))?;
        row.as_ref().map(version_from_row).transpose()
    }

    /// All versions of a prompt, newest first.
    pub async fn list_versions(
        &self,
        org_id: &str,
        prompt_id: &str,
    ) -> Result<Vec<PromptVersionRow>, StoreError> {
        let Some(prompt_row_id) = self.prompt_row_id(org_id, prompt_id).await? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM prompts_versions
             WHERE prompt_v2 = ?1
             ORDER BY major_version DESC, minor_version DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(&prompt_row_id)
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Database(format!("failed to list versions: {e}")))?;
        rows.iter().map(version_from_row).collect()
    }

    pub async fn version_count(&self, org_id: &str, prompt_id: &str) -> Result<i64, StoreError> {
        let Some(prompt_row_id) = self.prompt_row_id(org_id, prompt_id).await? else {
            return Ok(0);
        };
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM prompts_versions WHERE prompt_v2 = ?1")
            .bind(&prompt_row_id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| StoreError::Database(format!("failed to count versions: {e}")))?
            .get("n");
        Ok(count)
    }

    /// Set the prompt's display name.
    pub async fn rename_prompt(
        &self,
        org_id: &str,
        prompt_id: &str,
        pretty_name: &str,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE prompt_v2 SET pretty_name = ?1
             WHERE organization = ?2 AND user_defined_id = ?3 AND soft_delete = 0",
        )
        .bind(pretty_name)
        .bind(org_id)
        .bind(prompt_id)
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::Database(format!("failed to rename prompt {prompt_id}: {e}")))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("prompt {prompt_id}")));
        }
        Ok(())
    }

    /// Hide a prompt from admin reads. The unique (org, user-defined id)
    /// slot stays occupied, so traffic keeps versioning against it.
    pub async fn soft_delete_prompt(
        &self,
        org_id: &str,
        prompt_id: &str,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE prompt_v2 SET soft_delete = 1
             WHERE organization = ?1 AND user_defined_id = ?2",
        )
        .bind(org_id)
        .bind(prompt_id)
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::Database(format!("failed to delete prompt {prompt_id}: {e}")))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("prompt {prompt_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Duration;
    use promptgate_core::records::{BatchAck, LogBatch};

    async fn store() -> LogStore {
        LogStore::new("sqlite::memory:").await.unwrap()
    }

    fn record(prompt_id: &str, template: Value, created_at: DateTime<Utc>) -> PromptRecord {
        PromptRecord {
            prompt_id: prompt_id.into(),
            org_id: "org-1".into(),
            request_id: Uuid::new_v4().to_string(),
            model: Some("gpt-4o-mini".into()),
            provider: Some("openai".into()),
            created_at,
            template: Some(TemplateWithInputs {
                template,
                inputs: BTreeMap::new(),
                auto_inputs: Vec::new(),
            }),
        }
    }

    async fn commit_prompt(store: &LogStore, record: PromptRecord) -> BatchAck {
        store
            .commit(LogBatch {
                prompts: vec![record],
                ..LogBatch::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_template_opens_version_zero() {
        let store = store().await;
        let ack = commit_prompt(
            &store,
            record("greet", json!({"messages": ["hi"]}), Utc::now()),
        )
        .await;
        assert_eq!(ack.prompt_versions_created, 1);

        let latest = store.latest_version("org-1", "greet").await.unwrap().unwrap();
        assert_eq!((latest.major_version, latest.minor_version), (0, 0));
        assert!(latest.is_production());
        assert_eq!(latest.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(latest.metadata["provider"], "openai");
    }

    #[tokio::test]
    async fn changed_template_bumps_major_and_moves_production() {
        let store = store().await;
        let t0 = Utc::now();
        commit_prompt(&store, record("greet", json!({"m": "one"}), t0)).await;
        commit_prompt(
            &store,
            record("greet", json!({"m": "two"}), t0 + Duration::seconds(5)),
        )
        .await;

        let versions = store.list_versions("org-1", "greet").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(
            (versions[0].major_version, versions[0].minor_version),
            (1, 0)
        );
        assert!(versions[0].is_production());
        assert!(!versions[1].is_production());

        let production = store
            .production_version("org-1", "greet")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(production.id, versions[0].id);
    }

    #[tokio::test]
    async fn identical_template_attaches_without_versioning() {
        let store = store().await;
        let t0 = Utc::now();
        let template = json!({"messages": [{"role": "user", "content": "hi"}]});
        commit_prompt(&store, record("greet", template.clone(), t0)).await;
        let ack = commit_prompt(
            &store,
            record("greet", template, t0 + Duration::seconds(5)),
        )
        .await;
        assert_eq!(ack.prompt_versions_created, 0);
        assert_eq!(store.version_count("org-1", "greet").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn static_only_change_still_versions() {
        let store = store().await;
        let t0 = Utc::now();
        let v1 = json!({"content": "<helicone-prompt-static>v1</helicone-prompt-static> ask"});
        let v2 = json!({"content": "<helicone-prompt-static>v2</helicone-prompt-static> ask"});
        commit_prompt(&store, record("greet", v1, t0)).await;
        let ack = commit_prompt(&store, record("greet", v2, t0 + Duration::seconds(1))).await;
        assert_eq!(ack.prompt_versions_created, 1);
    }

    #[tokio::test]
    async fn bare_string_templates_never_version() {
        let store = store().await;
        let ack = commit_prompt(&store, record("greet", json!("just text"), Utc::now())).await;
        assert_eq!(ack.prompt_versions_created, 0);
        assert_eq!(store.version_count("org-1", "greet").await.unwrap(), 0);

        // The prompt row itself is still ensured.
        let prompts: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM prompt_v2 WHERE user_defined_id = 'greet'")
                .fetch_one(store.pool())
                .await
                .unwrap()
                .get("n");
        assert_eq!(prompts, 1);
    }

    #[tokio::test]
    async fn stale_records_do_not_supersede() {
        let store = store().await;
        let t0 = Utc::now();
        commit_prompt(&store, record("greet", json!({"m": "new"}), t0)).await;
        let ack = commit_prompt(
            &store,
            record("greet", json!({"m": "old"}), t0 - Duration::minutes(10)),
        )
        .await;
        assert_eq!(ack.prompt_versions_created, 0);

        let latest = store.latest_version("org-1", "greet").await.unwrap().unwrap();
        assert_eq!(latest.template.unwrap()["m"], "new");
    }

    #[tokio::test]
    async fn ui_authored_prompts_are_left_alone() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO prompt_v2 (id, organization, user_defined_id, metadata, created_at)
             VALUES ('p-ui', 'org-1', 'greet', '{\"createdFromUi\": true}', ?1)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(store.pool())
        .await
        .unwrap();

        let ack = commit_prompt(&store, record("greet", json!({"m": "traffic"}), Utc::now())).await;
        assert_eq!(ack.prompt_versions_created, 0);
    }

    #[tokio::test]
    async fn inputs_write_keys_once_and_records_every_time() {
        let store = store().await;
        let t0 = Utc::now();
        let template = json!({"content": "Hi <helicone-prompt-input key=\"name\" />"});

        let mut first = record("greet", template.clone(), t0);
        first
            .template
            .as_mut()
            .unwrap()
            .inputs
            .insert("name".into(), "Ada".into());
        commit_prompt(&store, first).await;

        let mut second = record("greet", template, t0 + Duration::seconds(5));
        second
            .template
            .as_mut()
            .unwrap()
            .inputs
            .insert("name".into(), "Grace".into());
        commit_prompt(&store, second).await;

        let keys: i64 = sqlx::query("SELECT COUNT(*) AS n FROM prompt_input_keys")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(keys, 1, "repeated input keys are deduplicated per version");
        let records: i64 = sqlx::query("SELECT COUNT(*) AS n FROM prompt_input_record")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(records, 2, "every record attaches its concrete inputs");
    }

    #[tokio::test]
    async fn concurrent_batches_get_distinct_majors() {
        let store = Arc::new(store().await);
        let t0 = Utc::now();
        let first = record("greet", json!({"m": "a"}), t0);
        let second = record("greet", json!({"m": "b"}), t0);

        let task_a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .commit(LogBatch {
                        prompts: vec![first],
                        ..LogBatch::default()
                    })
                    .await
                    .unwrap()
            })
        };
        let task_b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .commit(LogBatch {
                        prompts: vec![second],
                        ..LogBatch::default()
                    })
                    .await
                    .unwrap()
            })
        };
        task_a.await.unwrap();
        task_b.await.unwrap();

        let mut majors: Vec<i64> = store
            .list_versions("org-1", "greet")
            .await
            .unwrap()
            .iter()
            .map(|v| v.major_version)
            .collect();
        majors.sort_unstable();
        assert_eq!(majors, vec![0, 1]);
    }

    #[tokio::test]
    async fn production_flip_clears_siblings() {
        let store = store().await;
        let t0 = Utc::now();
        for (i, m) in ["a", "b", "c"].iter().enumerate() {
            commit_prompt(
                &store,
                record("greet", json!({"m": m}), t0 + Duration::seconds(i as i64)),
            )
            .await;
        }

        let versions = store.list_versions("org-1", "greet").await.unwrap();
        let oldest = versions.last().unwrap();
        store
            .set_production_version("org-1", "greet", &oldest.id)
            .await
            .unwrap();

        let production = store
            .production_version("org-1", "greet")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(production.id, oldest.id);
        let flagged: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM prompts_versions
             WHERE json_extract(metadata, '$.isProduction') = 1",
        )
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("n");
        assert_eq!(flagged, 1);

        let err = store
            .set_production_version("org-1", "greet", "v-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_and_soft_delete() {
        let store = store().await;
        commit_prompt(&store, record("greet", json!({"m": 1}), Utc::now())).await;

        store.rename_prompt("org-1", "greet", "Greeting").await.unwrap();
        let name: Option<String> =
            sqlx::query("SELECT pretty_name FROM prompt_v2 WHERE user_defined_id = 'greet'")
                .fetch_one(store.pool())
                .await
                .unwrap()
                .get("pretty_name");
        assert_eq!(name.as_deref(), Some("Greeting"));

        store.soft_delete_prompt("org-1", "greet").await.unwrap();
        assert!(store.latest_version("org-1", "greet").await.unwrap().is_none());
        assert!(matches!(
            store.rename_prompt("org-1", "greet", "x").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.rename_prompt("org-1", "missing", "x").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn bulk_inputs_drop_unknown_versions() {
        let store = store().await;
        commit_prompt(&store, record("greet", json!({"m": 1}), Utc::now())).await;
        let version = store.latest_version("org-1", "greet").await.unwrap().unwrap();

        let good = PromptInputRecord {
            request_id: "req-1".into(),
            version_id: version.id.clone(),
            inputs: BTreeMap::from([("name".to_string(), "Ada".to_string())]),
        };
        let bad = PromptInputRecord {
            request_id: "req-2".into(),
            version_id: "v-unknown".into(),
            inputs: BTreeMap::new(),
        };
        let ack = store
            .commit(LogBatch {
                prompt_inputs: vec![good, bad],
                ..LogBatch::default()
            })
            .await
            .unwrap();
        assert_eq!(ack.prompt_inputs_written, 1);
        assert_eq!(ack.prompt_inputs_dropped, 1);

        let written: i64 = sqlx::query("SELECT COUNT(*) AS n FROM prompts_2025_inputs")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(written, 1);
    }
}
