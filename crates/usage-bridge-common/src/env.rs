//! Typed environment variable lookups
//!
//! Every helper takes a lookup function instead of reading the process
//! environment directly, so configuration loaders can be exercised in tests
//! with a plain map.

use crate::error::{CommonError, Result};
use serde::de::DeserializeOwned;
use std::str::FromStr;

/// Returns the variable when it is set and not blank.
pub fn optional<L>(lookup: &L, name: &str) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

/// Returns the variable or the given default.
pub fn string_or<L>(lookup: &L, name: &str, default: &str) -> String
where
    L: Fn(&str) -> Option<String>,
{
    optional(lookup, name).unwrap_or_else(|| default.to_string())
}

/// Parses the variable with [`FromStr`], falling back to `default` when unset.
///
/// A value that is set but does not parse is an error rather than a silent
/// fallback.
pub fn parse_or<L, T>(lookup: &L, name: &str, default: T) -> Result<T>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| CommonError::InvalidVariable {
            name: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parses a JSON-encoded variable, `None` when unset.
pub fn json<L, T>(lookup: &L, name: &str) -> Result<Option<T>>
where
    L: Fn(&str) -> Option<String>,
    T: DeserializeOwned,
{
    optional(lookup, name)
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| CommonError::InvalidVariable {
                name: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
