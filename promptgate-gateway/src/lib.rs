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

//! Gateway ingress: directive parsing, credential resolution, and the
//! per-request context.
//!
//! The pipeline for one inbound call is strictly sequential:
//!
//! 1. [`directives::HeaderDirectives::parse`] turns the raw header map into
//!    one structured, validated configuration (pure, no I/O);
//! 2. [`resolver::CredentialResolver`] turns the presented credential into a
//!    real provider key, walking the vault for proxy and customer-portal
//!    keys, with results kept in a shared [`cache::CredentialCache`];
//! 3. [`context::GatewayContext`] composes the two over the request and owns
//!    body materialization, override application, and prompt tag stripping.
//!
//! A resolution failure short-circuits before any log data is queued.

pub mod cache;
pub mod config;
pub mod context;
pub mod directives;
pub mod resolver;

pub use cache::CredentialCache;
pub use config::GatewayConfig;
pub use context::{split_composite_authorization, GatewayContext};
pub use directives::{
    CacheDirectives, DirectiveWarning, ExperimentDirectives, FallbackCode, FallbackPolicy,
    FeatureFlags, HeaderDirectives, OmitDirectives, PromptDirectives, PromptMode,
    RetryDirectives, SecurityDirectives, SessionDirectives,
};
pub use resolver::{CredentialResolver, ResolvedProviderKey};
