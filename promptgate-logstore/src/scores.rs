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

//! Score persistence: attributes upsert, values are write-once.
//!
//! A score key is an org-scoped attribute row; its per-request value lands
//! in `score_value` keyed by (attribute, request) and is never overwritten.
//! Booleans are stored as 0/1 under a `-hcone-bool`-suffixed key so numeric
//! aggregation never mixes the two kinds.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use promptgate_core::records::{ScoreRecord, ScoreValue};

use crate::StoreError;

/// A score pair after type mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedScore {
    pub key: String,
    pub value_type: &'static str,
    pub value: f64,
}

/// Map raw score pairs into stored attribute form. Booleans become 0/1
/// under `<key>-hcone-bool`; numbers pass through.
pub fn map_scores(scores: &BTreeMap<String, ScoreValue>) -> Vec<MappedScore> {
    scores
        .iter()
        .map(|(key, value)| match value {
            ScoreValue::Bool(b) => MappedScore {
                key: format!("{key}-hcone-bool"),
                value_type: "boolean",
                value: if *b { 1.0 } else { 0.0 },
            },
            ScoreValue::Number(n) => MappedScore {
                key: key.clone(),
                value_type: "number",
                value: *n,
            },
        })
        .collect()
}

/// Persist one request's scores inside the batch transaction.
pub async fn process_score(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ScoreRecord,
) -> Result<(), StoreError> {
    for mapped in map_scores(&record.scores) {
        let attribute_id: String = sqlx::query(
            "INSERT INTO score_attribute (id, score_key, value_type, evaluator_id, organization, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (score_key, organization) DO UPDATE SET
                value_type = excluded.value_type,
                evaluator_id = excluded.evaluator_id
             RETURNING id",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&mapped.key)
        .bind(mapped.value_type)
        .bind(record.evaluator_ids.get(&mapped.key))
        .bind(&record.org_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            StoreError::Database(format!("failed to upsert score attribute {}: {e}", mapped.key))
        })?
        .get("id");

        sqlx::query(
            "INSERT INTO score_value (id, score_attribute, request_id, int_value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (score_attribute, request_id) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&attribute_id)
        .bind(&record.request_id)
        .bind(mapped.value)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            StoreError::Database(format!(
                "failed to insert score value for request {}: {e}",
                record.request_id
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use promptgate_core::records::LogBatch;

    use crate::LogStore;

    fn score_record(request_id: &str) -> ScoreRecord {
        ScoreRecord {
            request_id: request_id.into(),
            org_id: "org-1".into(),
            scores: BTreeMap::from([
                ("accuracy".to_string(), ScoreValue::Number(0.9)),
                ("passed".to_string(), ScoreValue::Bool(true)),
            ]),
            evaluator_ids: BTreeMap::new(),
        }
    }

    async fn commit_scores(store: &LogStore, record: ScoreRecord) {
        store
            .commit(LogBatch {
                scores: vec![record],
                ..LogBatch::default()
            })
            .await
            .unwrap();
    }

    #[test]
    fn booleans_map_to_suffixed_binary_attributes() {
        let scores = BTreeMap::from([
            ("helpful".to_string(), ScoreValue::Bool(false)),
            ("latency".to_string(), ScoreValue::Number(412.0)),
        ]);
        let mapped = map_scores(&scores);
        assert_eq!(
            mapped,
            vec![
                MappedScore {
                    key: "helpful-hcone-bool".into(),
                    value_type: "boolean",
                    value: 0.0,
                },
                MappedScore {
                    key: "latency".into(),
                    value_type: "number",
                    value: 412.0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn scores_land_as_attributes_and_values() {
        let store = LogStore::new("sqlite::memory:").await.unwrap();
        commit_scores(&store, score_record("req-1")).await;

        let row = sqlx::query(
            "SELECT value_type FROM score_attribute WHERE score_key = 'passed-hcone-bool'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<String, _>("value_type"), "boolean");

        let value: f64 = sqlx::query(
            "SELECT v.int_value AS value FROM score_value v
             JOIN score_attribute a ON a.id = v.score_attribute
             WHERE a.score_key = 'accuracy' AND v.request_id = 'req-1'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("value");
        assert_eq!(value, 0.9);
    }

    #[tokio::test]
    async fn score_values_are_write_once() {
        let store = LogStore::new("sqlite::memory:").await.unwrap();
        commit_scores(&store, score_record("req-1")).await;

        // Same request, different number: the attribute row conflicts and
        // updates, the value row stays as first written.
        let mut second = score_record("req-1");
        second
            .scores
            .insert("accuracy".to_string(), ScoreValue::Number(0.1));
        commit_scores(&store, second).await;

        let attributes: i64 = sqlx::query("SELECT COUNT(*) AS n FROM score_attribute")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(attributes, 2);

        let value: f64 = sqlx::query(
            "SELECT v.int_value AS value FROM score_value v
             JOIN score_attribute a ON a.id = v.score_attribute
             WHERE a.score_key = 'accuracy' AND v.request_id = 'req-1'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("value");
        assert_eq!(value, 0.9);
    }

    #[tokio::test]
    async fn attribute_upsert_refreshes_evaluator() {
        let store = LogStore::new("sqlite::memory:").await.unwrap();
        commit_scores(&store, score_record("req-1")).await;

        let mut second = score_record("req-2");
        second
            .evaluator_ids
            .insert("accuracy".to_string(), "eval-7".to_string());
        commit_scores(&store, second).await;

        let evaluator: Option<String> =
            sqlx::query("SELECT evaluator_id FROM score_attribute WHERE score_key = 'accuracy'")
                .fetch_one(store.pool())
                .await
                .unwrap()
                .get("evaluator_id");
        assert_eq!(evaluator.as_deref(), Some("eval-7"));

        // A second request under the same attribute adds a second value row.
        let values: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM score_value v
             JOIN score_attribute a ON a.id = v.score_attribute
             WHERE a.score_key = 'accuracy'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("n");
        assert_eq!(values, 2);
    }
}
