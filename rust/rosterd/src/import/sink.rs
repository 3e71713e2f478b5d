use crate::students::{self, NewStudent, UniqueKey};
use rusqlite::Connection;

#[derive(Debug)]
pub enum InsertFailure {
    /// A UNIQUE constraint rejected the row; the row's transaction was rolled back.
    Unique(UniqueKey),
    Storage(rusqlite::Error),
}

/// Persists one record in its own transaction. Earlier committed rows are unaffected
/// by a failure here.
pub fn insert_row(conn: &Connection, record: &NewStudent) -> Result<i64, InsertFailure> {
    let tx = conn.unchecked_transaction().map_err(InsertFailure::Storage)?;
    match students::insert_student(&tx, record) {
        Ok(id) => {
            tx.commit().map_err(InsertFailure::Storage)?;
            Ok(id)
        }
        Err(e) => Err(match students::unique_violation(&e) {
            Some(key) => InsertFailure::Unique(key),
            None => InsertFailure::Storage(e),
        }),
    }
}
