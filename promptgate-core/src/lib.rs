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

//! Core types shared across the promptgate workspace.
//!
//! Everything the gateway and the log store exchange lives here: the auth
//! identity sum type and key classification, the typed error taxonomy, the
//! outcome record shapes that make up a log batch, prompt template tag
//! handling, and the vault/limiter traits the credential resolver calls
//! through.
//!
//! This crate does no I/O of its own.

pub mod error;
pub mod hash;
pub mod identity;
pub mod records;
pub mod template;
pub mod vault;

pub use error::{ConfigError, CredentialError, GatewayError};
pub use hash::{hash_auth, sha256_hex};
pub use identity::{AuthIdentity, KeyClass};
pub use records::{
    AssetRecord, BatchAck, LogBatch, PromptInputRecord, PromptRecord, RequestRecord,
    ResponseRecord, ScoreRecord, ScoreValue,
};
pub use template::{TemplateExtraction, VersionSignal};
pub use vault::{KeyVault, LimitWindow, ProxyKeyLimit, UsageLimiter};
