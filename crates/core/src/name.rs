//! Database name handling
//!
//! A namespace is `<db>.<collection>`; the registry is keyed by the `<db>`
//! part only.

use crate::error::{Error, Result};

/// Maximum database name length in bytes (exclusive)
pub const MAX_DB_NAME_LEN: usize = 64;

const FORBIDDEN_DB_CHARS: &[char] = &['/', '\\', '.', '"', ' ', '\0'];

/// Extract and validate the database part of a namespace
///
/// `"app.users"` gives `"app"`; a namespace without a `.` is a bare
/// database name.
///
/// # Errors
///
/// `InvalidName` when the database part is empty or fails
/// [`validate_db_name`].
pub fn db_name(ns: &str) -> Result<&str> {
    let db = match ns.find('.') {
        Some(i) => &ns[..i],
        None => ns,
    };
    validate_db_name(db)?;
    Ok(db)
}

/// Validate a bare database name
///
/// `$` is accepted, internal databases use it.
pub fn validate_db_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(name, "db name can't be empty"));
    }
    if name.len() >= MAX_DB_NAME_LEN {
        return Err(Error::invalid_name(name, "db name is too long"));
    }
    if name.contains(FORBIDDEN_DB_CHARS) {
        return Err(Error::invalid_name(name, "db name contains an invalid character"));
    }
    Ok(())
}

/// ASCII case-insensitive comparison
#[inline]
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
