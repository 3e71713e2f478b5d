//! Roll number and institutional email generation.
//!
//! Both generators check candidates against the live corpus at call time. The
//! store's UNIQUE constraints remain the final arbiter; see `sink`.

use super::error::RowError;
use super::settings::ImportSettings;
use crate::students::{self, UniqueKey};
use rand::Rng;
use rusqlite::Connection;

/// Number of distinct 4-digit roll values per prefix.
pub const ROLL_KEYSPACE: u32 = 10_000;

pub fn format_roll_number(prefix: &str, n: u32) -> String {
    format!("{}{:04}", prefix, n % ROLL_KEYSPACE)
}

fn roll_taken(conn: &Connection, candidate: &str) -> rusqlite::Result<bool> {
    Ok(students::key_exists(conn, UniqueKey::RollNumber, candidate)?
        || students::key_exists(conn, UniqueKey::AdmissionNumber, candidate)?)
}

/// Draws random candidates up to `roll_draw_attempts` times, then falls back to
/// one pass over the keyspace from a random offset. Fails only when every value
/// under the prefix is held as a roll or admission number.
pub fn generate_roll_number<R: Rng + ?Sized>(
    conn: &Connection,
    rng: &mut R,
    settings: &ImportSettings,
) -> Result<String, RowError> {
    let prefix = settings.roll_prefix.as_str();
    for _ in 0..settings.roll_draw_attempts {
        let candidate = format_roll_number(prefix, rng.gen_range(0..ROLL_KEYSPACE));
        if !roll_taken(conn, &candidate)? {
            return Ok(candidate);
        }
    }

    let taken = students::identifiers_with_prefix(conn, prefix)?;
    tracing::debug!(
        prefix,
        taken = taken.len(),
        "random roll draws exhausted; scanning keyspace"
    );
    let start = rng.gen_range(0..ROLL_KEYSPACE);
    (0..ROLL_KEYSPACE)
        .map(|step| format_roll_number(prefix, start + step))
        .find(|candidate| !taken.contains(candidate))
        .ok_or_else(|| {
            RowError::IdentifierSpaceExhausted(format!(
                "all {} roll numbers with prefix {} are taken",
                ROLL_KEYSPACE, prefix
            ))
        })
}

/// `(local, domain)` for a name and department, or `None` when the name has no tokens.
pub fn derive_institutional_email(
    full_name: &str,
    department: &str,
    settings: &ImportSettings,
) -> Option<(String, String)> {
    let local = full_name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(".");
    if local.is_empty() {
        return None;
    }
    let mut dept = department.to_lowercase().replace(' ', "");
    if dept.is_empty() {
        dept = settings.default_department.to_lowercase().replace(' ', "");
    }
    Some((local, format!("{}.{}", dept, settings.email_suffix)))
}

fn email_taken(conn: &Connection, candidate: &str) -> rusqlite::Result<bool> {
    Ok(students::key_exists(conn, UniqueKey::InstitutionalEmail, candidate)?
        || students::key_exists(conn, UniqueKey::Email, candidate)?)
}

/// `local@domain`, or `local<n>@domain` for the smallest free n >= 1.
pub fn generate_institutional_email(
    conn: &Connection,
    full_name: &str,
    department: &str,
    settings: &ImportSettings,
) -> Result<String, RowError> {
    let Some((local, domain)) = derive_institutional_email(full_name, department, settings) else {
        return Err(RowError::Validation(
            "Name is required to derive an institutional email".to_string(),
        ));
    };

    let base = format!("{}@{}", local, domain);
    if !email_taken(conn, &base)? {
        return Ok(base);
    }
    for n in 1..=settings.email_suffix_attempts {
        let candidate = format!("{}{}@{}", local, n, domain);
        if !email_taken(conn, &candidate)? {
            return Ok(candidate);
        }
    }
    Err(RowError::IdentifierSpaceExhausted(format!(
        "no free institutional email for {}@{} within {} suffixes",
        local, domain, settings.email_suffix_attempts
    )))
}
