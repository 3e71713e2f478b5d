use super::error::RowError;
use crate::students::{self, NewStudent, UniqueKey};
use rusqlite::Connection;

/// Rejects a candidate whose personal email or admission number is already held.
/// Never merges into the existing record.
pub fn check_duplicate(conn: &Connection, candidate: &NewStudent) -> Result<(), RowError> {
    if students::key_exists(conn, UniqueKey::Email, &candidate.email)?
        || students::key_exists(conn, UniqueKey::AdmissionNumber, &candidate.admission_number)?
    {
        return Err(RowError::Duplicate);
    }
    Ok(())
}
