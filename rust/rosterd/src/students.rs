use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
    Other,
}

impl Gender {
    /// Case-insensitive lookup against the fixed enumeration.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

impl ToSql for Gender {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Gender {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Gender::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown gender: {s}").into()))
    }
}

/// Columns carrying a corpus-wide UNIQUE constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueKey {
    Email,
    Phone,
    AdmissionNumber,
    RollNumber,
    InstitutionalEmail,
}

impl UniqueKey {
    pub const ALL: [UniqueKey; 5] = [
        UniqueKey::Email,
        UniqueKey::Phone,
        UniqueKey::AdmissionNumber,
        UniqueKey::RollNumber,
        UniqueKey::InstitutionalEmail,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::AdmissionNumber => "admission_number",
            Self::RollNumber => "roll_number",
            Self::InstitutionalEmail => "institutional_email",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Gender,
    pub address: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub admission_number: String,
    pub roll_number: String,
    pub institutional_email: String,
    pub department: String,
    pub category: Option<String>,
    pub mother_name: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Gender,
    pub address: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub admission_number: String,
    pub roll_number: String,
    pub institutional_email: String,
    pub department: String,
    pub category: Option<String>,
    pub mother_name: Option<String>,
}

/// Field-level patch. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<Option<String>>,
    pub date_of_birth: Option<Option<NaiveDate>>,
    pub gender: Option<Gender>,
    pub address: Option<Option<String>>,
    pub state: Option<Option<String>>,
    pub country: Option<Option<String>>,
    pub postal_code: Option<Option<String>>,
    pub admission_number: Option<String>,
    pub roll_number: Option<String>,
    pub institutional_email: Option<String>,
    pub department: Option<String>,
    pub category: Option<Option<String>>,
    pub mother_name: Option<Option<String>>,
}

impl StudentPatch {
    fn assignments(&self) -> Vec<(&'static str, Value)> {
        fn text(v: &str) -> Value {
            Value::Text(v.to_string())
        }
        fn nullable(v: &Option<String>) -> Value {
            v.as_deref().map(text).unwrap_or(Value::Null)
        }

        let mut out = Vec::new();
        if let Some(v) = &self.first_name {
            out.push(("first_name", text(v)));
        }
        if let Some(v) = &self.last_name {
            out.push(("last_name", text(v)));
        }
        if let Some(v) = &self.email {
            out.push(("email", text(v)));
        }
        if let Some(v) = &self.phone {
            out.push(("phone", nullable(v)));
        }
        if let Some(v) = &self.date_of_birth {
            out.push((
                "date_of_birth",
                v.map(|d| Value::Text(format_date(d))).unwrap_or(Value::Null),
            ));
        }
        if let Some(v) = self.gender {
            out.push(("gender", text(v.as_str())));
        }
        if let Some(v) = &self.address {
            out.push(("address", nullable(v)));
        }
        if let Some(v) = &self.state {
            out.push(("state", nullable(v)));
        }
        if let Some(v) = &self.country {
            out.push(("country", nullable(v)));
        }
        if let Some(v) = &self.postal_code {
            out.push(("postal_code", nullable(v)));
        }
        if let Some(v) = &self.admission_number {
            out.push(("admission_number", text(v)));
        }
        if let Some(v) = &self.roll_number {
            out.push(("roll_number", text(v)));
        }
        if let Some(v) = &self.institutional_email {
            out.push(("institutional_email", text(v)));
        }
        if let Some(v) = &self.department {
            out.push(("department", text(v)));
        }
        if let Some(v) = &self.category {
            out.push(("category", nullable(v)));
        }
        if let Some(v) = &self.mother_name {
            out.push(("mother_name", nullable(v)));
        }
        out
    }
}

const SELECT_COLUMNS: &str = "id, first_name, last_name, email, phone, date_of_birth, gender,
    address, state, country, postal_code, admission_number, roll_number,
    institutional_email, department, category, mother_name, created_at, updated_at";

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentRecord> {
    let dob: Option<String> = r.get(5)?;
    Ok(StudentRecord {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        email: r.get(3)?,
        phone: r.get(4)?,
        date_of_birth: dob.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        gender: r.get(6)?,
        address: r.get(7)?,
        state: r.get(8)?,
        country: r.get(9)?,
        postal_code: r.get(10)?,
        admission_number: r.get(11)?,
        roll_number: r.get(12)?,
        institutional_email: r.get(13)?,
        department: r.get(14)?,
        category: r.get(15)?,
        mother_name: r.get(16)?,
        created_at: r.get(17)?,
        updated_at: r.get(18)?,
    })
}

pub fn key_exists(conn: &Connection, key: UniqueKey, value: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM students WHERE {} = ? LIMIT 1", key.column());
    let hit: Option<i64> = conn.query_row(&sql, [value], |r| r.get(0)).optional()?;
    Ok(hit.is_some())
}

pub fn find_by_key(
    conn: &Connection,
    key: UniqueKey,
    value: &str,
) -> rusqlite::Result<Option<StudentRecord>> {
    let sql = format!(
        "SELECT {} FROM students WHERE {} = ? LIMIT 1",
        SELECT_COLUMNS,
        key.column()
    );
    conn.query_row(&sql, [value], student_from_row).optional()
}

/// Roll and admission numbers currently using `prefix`.
pub fn identifiers_with_prefix(
    conn: &Connection,
    prefix: &str,
) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT roll_number FROM students WHERE substr(roll_number, 1, length(?1)) = ?1
         UNION
         SELECT admission_number FROM students WHERE substr(admission_number, 1, length(?1)) = ?1",
    )?;
    let taken = stmt
        .query_map([prefix], |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(taken)
}

pub fn insert_student(conn: &Connection, s: &NewStudent) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO students(
           first_name, last_name, email, phone, date_of_birth, gender,
           address, state, country, postal_code, admission_number, roll_number,
           institutional_email, department, category, mother_name,
           created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
           strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        rusqlite::params![
            &s.first_name,
            &s.last_name,
            &s.email,
            &s.phone,
            s.date_of_birth.map(format_date),
            s.gender,
            &s.address,
            &s.state,
            &s.country,
            &s.postal_code,
            &s.admission_number,
            &s.roll_number,
            &s.institutional_email,
            &s.department,
            &s.category,
            &s.mother_name,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_student(conn: &Connection, id: i64) -> rusqlite::Result<Option<StudentRecord>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", SELECT_COLUMNS);
    conn.query_row(&sql, [id], student_from_row).optional()
}

/// Wraps `term` in `%` and escapes its own LIKE wildcards with `\`.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

pub fn list_students(
    conn: &Connection,
    skip: i64,
    limit: i64,
    search: Option<&str>,
) -> rusqlite::Result<Vec<StudentRecord>> {
    let search = search.map(str::trim).filter(|s| !s.is_empty());
    let (sql, args): (String, Vec<Value>) = match search {
        Some(term) => (
            format!(
                "SELECT {} FROM students
                 WHERE first_name LIKE ?1 ESCAPE '\\'
                    OR last_name LIKE ?1 ESCAPE '\\'
                    OR email LIKE ?1 ESCAPE '\\'
                    OR admission_number LIKE ?1 ESCAPE '\\'
                 ORDER BY id LIMIT ?2 OFFSET ?3",
                SELECT_COLUMNS
            ),
            vec![
                Value::Text(like_pattern(term)),
                Value::Integer(limit),
                Value::Integer(skip),
            ],
        ),
        None => (
            format!(
                "SELECT {} FROM students ORDER BY id LIMIT ?1 OFFSET ?2",
                SELECT_COLUMNS
            ),
            vec![Value::Integer(limit), Value::Integer(skip)],
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn all_students(conn: &Connection) -> rusqlite::Result<Vec<StudentRecord>> {
    let sql = format!("SELECT {} FROM students ORDER BY id", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_students(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
}

/// Returns the updated record, or `None` when `id` does not exist.
pub fn update_student(
    conn: &Connection,
    id: i64,
    patch: &StudentPatch,
) -> rusqlite::Result<Option<StudentRecord>> {
    let assignments = patch.assignments();
    if assignments.is_empty() {
        return get_student(conn, id);
    }
    let set_clause = assignments
        .iter()
        .map(|(col, _)| format!("{} = ?", col))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE students SET {}, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
        set_clause
    );
    let mut args = assignments.into_iter().map(|(_, v)| v).collect::<Vec<_>>();
    args.push(Value::Integer(id));
    let changed = conn.execute(&sql, params_from_iter(args))?;
    if changed == 0 {
        return Ok(None);
    }
    get_student(conn, id)
}

pub fn delete_student(conn: &Connection, id: i64) -> rusqlite::Result<Option<StudentRecord>> {
    let Some(existing) = get_student(conn, id)? else {
        return Ok(None);
    };
    conn.execute("DELETE FROM students WHERE id = ?", [id])?;
    Ok(Some(existing))
}

/// Maps a SQLite UNIQUE failure on `students` back to the violated key.
pub fn unique_violation(e: &rusqlite::Error) -> Option<UniqueKey> {
    let rusqlite::Error::SqliteFailure(code, Some(msg)) = e else {
        return None;
    };
    if code.code != ErrorCode::ConstraintViolation {
        return None;
    }
    let detail = msg.strip_prefix("UNIQUE constraint failed: ")?;
    UniqueKey::ALL.into_iter().find(|key| {
        detail
            .split(',')
            .any(|part| part.trim() == format!("students.{}", key.column()))
    })
}
