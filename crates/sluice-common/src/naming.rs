//! Identifier naming rules
//!
//! Source field names are free-form (`"STOP"`, `"Patient ID"`, `"user.name"`).
//! Destination identifiers are snake_case ASCII. Nested object keys are
//! joined to their parent with [`NESTING_SEPARATOR`].

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Result, SluiceError};

/// Separator placed between a parent column and a flattened child field.
pub const NESTING_SEPARATOR: &str = "__";

/// Prefix reserved for columns and tables owned by the loader itself.
pub const SYSTEM_PREFIX: &str = "_sluice";

fn camel_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap_or_else(|_| unreachable!()))
}

fn non_identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_]+").unwrap_or_else(|_| unreachable!()))
}

/// Normalize a source name into a destination identifier.
///
/// camelCase is split, everything is lowercased, runs of other characters
/// collapse into one underscore, and a leading digit gets an underscore
/// prefix. Names that normalize to nothing are rejected.
///
/// ```rust
/// use sluice_common::naming::normalize_identifier;
///
/// assert_eq!(normalize_identifier("STOP").unwrap(), "stop");
/// assert_eq!(normalize_identifier("Patient ID").unwrap(), "patient_id");
/// assert_eq!(normalize_identifier("baseExperience").unwrap(), "base_experience");
/// ```
pub fn normalize_identifier(name: &str) -> Result<String> {
    let split = camel_boundary().replace_all(name.trim(), "${1}_${2}");
    let lowered = split.to_lowercase();
    let replaced = non_identifier().replace_all(&lowered, "_");
    let trimmed = replaced.trim_end_matches('_');

    if trimmed.trim_start_matches('_').is_empty() {
        return Err(SluiceError::InvalidIdentifier(name.to_string()));
    }

    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        Ok(format!("_{}", trimmed))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Build the identifier of a flattened nested field.
pub fn nested_identifier(parent: &str, child: &str) -> Result<String> {
    Ok(format!("{}{}{}", parent, NESTING_SEPARATOR, normalize_identifier(child)?))
}

/// Quote an identifier for use in SQL.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
