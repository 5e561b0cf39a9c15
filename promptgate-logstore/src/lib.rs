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

//! SQLite-backed persistence for the gateway.
//!
//! Three storage surfaces over one shared pool:
//!
//! - [`LogStore`] — the transactional batch writer for request/response
//!   outcomes, prompt versioning, inputs, and scores, plus the prompt admin
//!   surface;
//! - [`SqliteKeyVault`] — the read side the credential resolver walks, with
//!   the api-key admin calls next to it;
//! - [`RouterStore`] — content-hash-versioned router configurations.
//!
//! All ids and timestamps are stored as TEXT (UUID string / RFC 3339), which
//! keeps rows greppable and sidesteps SQLite's lack of native types for
//! either.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Sqlite, SqlitePool};
use thiserror::Error;

pub mod migrations;
pub mod prompts;
pub mod routers;
pub mod scores;
pub mod store;
pub mod vault;

pub use prompts::PromptVersionRow;
pub use routers::{RouterRow, RouterStore, RouterVersionRow};
pub use store::LogStore;
pub use vault::{ApiKeyRow, RequestCountLimiter, SqliteKeyVault};

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    /// A stored value failed to parse back into its in-memory shape.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Parse an RFC 3339 timestamp read back from a TEXT column.
pub(crate) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid stored timestamp {raw:?}: {e}")))
}

/// Open (or create) a SQLite connection pool.
pub async fn open_pool(database_url: &str) -> Result<SqlitePool, StoreError> {
    let connect_opts = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::Database(format!("invalid database URL: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    // In-memory databases are per-connection; a single-connection pool keeps
    // every caller on the same database.
    let max_conns: u32 = if database_url.contains(":memory:") {
        1
    } else {
        10
    };

    sqlx::pool::PoolOptions::<Sqlite>::new()
        .max_connections(max_conns)
        .connect_with(connect_opts)
        .await
        .map_err(|e| StoreError::Database(format!("failed to connect to SQLite: {e}")))
}
