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

use sqlx::SqlitePool;

use crate::StoreError;

/// Run the consolidated schema migration. Idempotent.
pub async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    tracing::debug!("running logstore migrations");

    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(format!("failed to run migrations: {e}")))?;

    tracing::info!("logstore migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Request / response / asset outcomes
--
-- Conflict targets carry the organization so two orgs can log the same
-- caller-supplied id without clobbering each other. Records arriving without
-- an organization bind '' so the upsert key stays total.
-- ============================================================================

CREATE TABLE IF NOT EXISTS request (
    id                      TEXT NOT NULL,
    created_at              TEXT NOT NULL,
    auth_hash               TEXT NOT NULL DEFAULT '',
    path                    TEXT NOT NULL DEFAULT '',
    provider                TEXT NOT NULL DEFAULT '',
    helicone_api_key_id     INTEGER,
    helicone_org_id         TEXT NOT NULL DEFAULT '',
    helicone_proxy_key_id   TEXT,
    helicone_user           TEXT,
    model                   TEXT,
    model_override          TEXT,
    prompt_id               TEXT,
    prompt_values           TEXT,
    properties              TEXT,
    request_ip              TEXT,
    target_url              TEXT,
    threat                  INTEGER,
    user_id                 TEXT,
    country_code            TEXT,
    version                 INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (id, helicone_org_id)
);
CREATE INDEX IF NOT EXISTS idx_request_org_created ON request(helicone_org_id, created_at);
CREATE INDEX IF NOT EXISTS idx_request_proxy_key   ON request(helicone_proxy_key_id);

CREATE TABLE IF NOT EXISTS response (
    id                          TEXT PRIMARY KEY,
    request                     TEXT NOT NULL,
    helicone_org_id             TEXT NOT NULL DEFAULT '',
    created_at                  TEXT NOT NULL,
    model                       TEXT,
    status                      INTEGER,
    completion_tokens           INTEGER,
    prompt_tokens               INTEGER,
    delay_ms                    INTEGER,
    time_to_first_token         INTEGER,
    prompt_cache_write_tokens   INTEGER,
    prompt_cache_read_tokens    INTEGER,
    prompt_audio_tokens         INTEGER,
    completion_audio_tokens     INTEGER,
    feedback                    TEXT,
    UNIQUE (request, helicone_org_id)
);

CREATE TABLE IF NOT EXISTS asset (
    id              TEXT NOT NULL,
    request_id      TEXT NOT NULL,
    organization_id TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,
    PRIMARY KEY (id, request_id)
);

-- ============================================================================
-- Organizations and credentials
-- ============================================================================

CREATE TABLE IF NOT EXISTS organization (
    id                TEXT PRIMARY KEY,
    name              TEXT NOT NULL DEFAULT '',
    has_onboarded     INTEGER NOT NULL DEFAULT 0,
    org_provider_key  TEXT,
    limits            TEXT
);

CREATE TABLE IF NOT EXISTS helicone_api_keys (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    api_key_hash    TEXT NOT NULL,
    api_key_name    TEXT NOT NULL DEFAULT '',
    organization_id TEXT NOT NULL,
    soft_delete     INTEGER NOT NULL DEFAULT 0,
    temp_key        INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON helicone_api_keys(api_key_hash);
CREATE INDEX IF NOT EXISTS idx_api_keys_org  ON helicone_api_keys(organization_id);

-- Decrypted key lives inline; the encrypted-at-rest column of the original
-- deployment is a property of its database, not of this schema.
CREATE TABLE IF NOT EXISTS provider_keys (
    id                      TEXT PRIMARY KEY,
    org_id                  TEXT NOT NULL,
    provider_name           TEXT NOT NULL DEFAULT '',
    provider_key_name       TEXT NOT NULL DEFAULT '',
    decrypted_provider_key  TEXT NOT NULL,
    soft_delete             INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS helicone_proxy_keys (
    id                       TEXT PRIMARY KEY,
    org_id                   TEXT NOT NULL,
    helicone_proxy_key_name  TEXT NOT NULL DEFAULT '',
    helicone_proxy_key       TEXT NOT NULL,
    provider_key_id          TEXT NOT NULL REFERENCES provider_keys(id),
    soft_delete              INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS helicone_proxy_key_limits (
    id                  TEXT PRIMARY KEY,
    helicone_proxy_key  TEXT NOT NULL REFERENCES helicone_proxy_keys(id),
    cost                REAL,
    count               INTEGER,
    timewindow_seconds  INTEGER
);

-- ============================================================================
-- Prompt definitions and versions
-- ============================================================================

CREATE TABLE IF NOT EXISTS prompt_v2 (
    id              TEXT PRIMARY KEY,
    organization    TEXT NOT NULL,
    user_defined_id TEXT NOT NULL,
    description     TEXT,
    pretty_name     TEXT,
    metadata        TEXT NOT NULL DEFAULT '{}',
    soft_delete     INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    UNIQUE (organization, user_defined_id)
);

CREATE TABLE IF NOT EXISTS prompts_versions (
    id                 TEXT PRIMARY KEY,
    prompt_v2          TEXT NOT NULL REFERENCES prompt_v2(id),
    organization       TEXT NOT NULL,
    major_version      INTEGER NOT NULL,
    minor_version      INTEGER NOT NULL,
    helicone_template  TEXT,
    model              TEXT,
    metadata           TEXT NOT NULL DEFAULT '{}',
    created_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_versions_prompt ON prompts_versions(prompt_v2, major_version, minor_version);

CREATE TABLE IF NOT EXISTS prompt_input_keys (
    id             TEXT PRIMARY KEY,
    key            TEXT NOT NULL,
    prompt_version TEXT NOT NULL REFERENCES prompts_versions(id),
    created_at     TEXT NOT NULL,
    UNIQUE (key, prompt_version)
);

CREATE TABLE IF NOT EXISTS prompt_input_record (
    id                 TEXT PRIMARY KEY,
    inputs             TEXT NOT NULL,
    auto_prompt_inputs TEXT NOT NULL DEFAULT '[]',
    source_request     TEXT,
    prompt_version     TEXT NOT NULL REFERENCES prompts_versions(id),
    created_at         TEXT NOT NULL
);

-- Bulk input ingestion lands here after version-id validation.
CREATE TABLE IF NOT EXISTS prompts_2025_inputs (
    id          TEXT PRIMARY KEY,
    request_id  TEXT NOT NULL,
    version_id  TEXT NOT NULL,
    inputs      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- ============================================================================
-- Scores
-- ============================================================================

CREATE TABLE IF NOT EXISTS score_attribute (
    id           TEXT PRIMARY KEY,
    score_key    TEXT NOT NULL,
    value_type   TEXT NOT NULL DEFAULT 'number',
    evaluator_id TEXT,
    organization TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (score_key, organization)
);

CREATE TABLE IF NOT EXISTS score_value (
    id              TEXT PRIMARY KEY,
    score_attribute TEXT NOT NULL REFERENCES score_attribute(id),
    request_id      TEXT NOT NULL,
    int_value       REAL NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (score_attribute, request_id)
);

-- ============================================================================
-- Routers
-- ============================================================================

CREATE TABLE IF NOT EXISTS routers (
    id              TEXT PRIMARY KEY,
    hash            TEXT NOT NULL DEFAULT '',
    name            TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS router_config_versions (
    id         TEXT PRIMARY KEY,
    router_id  TEXT NOT NULL REFERENCES routers(id),
    version    TEXT NOT NULL,
    config     TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_router_versions ON router_config_versions(router_id, created_at);

"#;
