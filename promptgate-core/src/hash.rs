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

//! Credential hashing.
//!
//! Stored gateway keys are addressed by the SHA-256 hex digest of the exact
//! presented value (scheme prefix included). Proxy keys additionally store a
//! salted digest so the raw key never touches the database.

use sha2::{Digest, Sha256};

/// Digest format version for salted proxy-key digests.
const PROXY_DIGEST_VERSION: &str = "v1";

/// SHA-256 hex digest of an arbitrary string.
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a presented auth value, as stored in the key tables.
pub fn hash_auth(value: &str) -> String {
    sha256_hex(value)
}

/// Build the stored form of a proxy key: `v1:<salt-hex>:<digest-hex>` where
/// the digest covers salt bytes followed by the key bytes.
pub fn make_proxy_key_digest(key: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(key.as_bytes());
    format!(
        "{}:{}:{}",
        PROXY_DIGEST_VERSION,
        hex::encode(salt),
        hex::encode(hasher.finalize())
    )
}

/// Verify a presented proxy key against its stored salted digest.
///
/// Unknown digest versions and malformed stored values verify as false
/// rather than erroring; a corrupt row must not authenticate anyone.
pub fn verify_proxy_key(presented: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, ':');
    let (Some(version), Some(salt_hex), Some(digest_hex)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if version != PROXY_DIGEST_VERSION {
        return false;
    }
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(presented.as_bytes());
    let computed = hex::encode(hasher.finalize());
    constant_time_eq(computed.as_bytes(), digest_hex.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
