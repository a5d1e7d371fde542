// src/lexicon.rs
//! Pattern checks for natural keys and free-form attributes.
//!
//! Every value that ends up in a relational row passes through `check` first,
//! keyed by a field label so a failure names the offending field. Empty
//! strings pass here; mandatory-presence rules live in the write path, which
//! knows which fields may legitimately be absent.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, StoreError};

/// Dataset identifiers: path-like with an optional ":version" suffix,
/// e.g. `/beamline/run-17/raw:v2`.
static DID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.\-/:]*$|^/[a-zA-Z0-9_.\-/:]+$").unwrap());

/// Generic names: sites, processing steps, environments, scripts, packages,
/// buckets, os attributes. Printable, no quotes or control characters.
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.\-/:+ ]+$").unwrap());

/// File names: path-like, allows the same charset as dids plus spaces.
static FILE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.\-/: ]+$").unwrap());

/// Free-form options/details: anything printable except quotes.
static TEXT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[^"'`\x00-\x1f]*$"#).unwrap());

/// Unix epoch seconds, the only timestamp representation the store accepts.
static UNIX_TIME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{10}$").unwrap());

fn pattern_for(field: &str) -> &'static Regex {
    match field {
        "did" | "parent_did" => &DID_PATTERN,
        "file" => &FILE_PATTERN,
        "env_details" | "script_options" | "meta_data" => &TEXT_PATTERN,
        _ => &NAME_PATTERN,
    }
}

/// Check `value` against the lexicon pattern registered for `field`.
///
/// Empty values pass; callers enforce required-field presence themselves.
pub fn check(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    let re = pattern_for(field);
    if re.is_match(value) {
        Ok(())
    } else {
        Err(StoreError::validation(
            field,
            format!("'{value}' does not match lexicon pattern"),
        ))
    }
}

/// Check that a timestamp looks like Unix epoch seconds.
pub fn check_unix_time(field: &str, value: i64) -> Result<()> {
    if UNIX_TIME_PATTERN.is_match(&value.to_string()) {
        Ok(())
    } else {
        Err(StoreError::validation(
            field,
            format!("{value} is not a Unix epoch timestamp"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_patterns() {
        assert!(check("did", "/a/b/c:v1").is_ok());
        assert!(check("did", "beamline/run-17:2024").is_ok());
        assert!(check("did", "bad did with spaces").is_err());
        assert!(check("did", "").is_ok()); // presence enforced elsewhere
    }

    #[test]
    fn name_patterns() {
        assert!(check("site", "Cornell CHESS").is_ok());
        assert!(check("env_name", "conda-py3.11").is_ok());
        assert!(check("site", "drop table; --").is_err());
    }

    #[test]
    fn free_text_allows_shell_flags() {
        assert!(check("script_options", "--verbose --retries=3").is_ok());
        assert!(check("script_options", "no 'quotes' allowed").is_err());
    }

    #[test]
    fn unix_time_is_ten_digits() {
        assert!(check_unix_time("create_at", 1_700_000_000).is_ok());
        assert!(check_unix_time("create_at", 0).is_err());
        assert!(check_unix_time("create_at", 99).is_err());
    }
}
