//! Vault-level key/value facts (e.g. the last successful sync time).

use super::{require_text, FieldError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$").expect("valid key regex"));

/// Well-known key holding the epoch-ms time of the last successful ingestion.
pub const LAST_SYNC_AT_KEY: &str = "last_sync_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub updated_at: i64,
}

/// Keys are short identifiers: alphanumerics plus `_ . : -`, at most 128 chars.
pub(crate) fn validate_key(key: &str) -> Result<(), FieldError> {
    require_text("key", key)?;
    if !KEY_RE.is_match(key) {
        return Err(FieldError::new(
            "key",
            "must start alphanumeric and use only letters, digits, `_`, `.`, `:` or `-`",
        ));
    }
    Ok(())
}
