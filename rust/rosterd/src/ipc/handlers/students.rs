use crate::import::identifiers::{generate_institutional_email, generate_roll_number};
use crate::import::normalize::{normalize_date, normalize_email, normalize_phone};
use crate::import::settings as import_settings;
use crate::import::source::Cell;
use crate::import::RowError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_i64, get_required_i64, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::students::{self, Gender, NewStudent, StudentPatch, UniqueKey};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

fn db_err(e: rusqlite::Error) -> HandlerErr {
    match students::unique_violation(&e) {
        Some(key) => unique_err(key),
        None => HandlerErr::new("db_query_failed", e.to_string()),
    }
}

fn unique_err(key: UniqueKey) -> HandlerErr {
    match key {
        UniqueKey::Email => HandlerErr::new("duplicate_email", "Email already registered"),
        UniqueKey::AdmissionNumber => {
            HandlerErr::new("duplicate_admission_number", "Admission number already exists")
        }
        other => HandlerErr::new(
            "constraint_violation",
            format!("{} already exists", other.column()),
        )
        .with_details(json!({ "column": other.column() })),
    }
}

fn row_err(e: RowError) -> HandlerErr {
    let code = match &e {
        RowError::IdentifierSpaceExhausted(_) => "identifier_space_exhausted",
        RowError::Storage(_) => "db_query_failed",
        _ => "bad_params",
    };
    HandlerErr::new(code, e.to_string())
}

fn text_field(v: &Value, key: &str, max_len: usize) -> Result<String, HandlerErr> {
    let s = v
        .as_str()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string", key)))?
        .trim();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    if s.chars().count() > max_len {
        return Err(HandlerErr::bad_params(format!(
            "{} must be at most {} characters",
            key, max_len
        )));
    }
    Ok(s.to_string())
}

/// `null` and blank strings clear the field.
fn nullable_text_field(v: &Value, key: &str, max_len: usize) -> Result<Option<String>, HandlerErr> {
    if v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty()) {
        return Ok(None);
    }
    text_field(v, key, max_len).map(Some)
}

fn email_field(v: &Value, key: &str) -> Result<String, HandlerErr> {
    let raw = text_field(v, key, 100)?;
    normalize_email(Some(raw))
        .map_err(row_err)?
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn parse_student_fields(obj: &Map<String, Value>) -> Result<StudentPatch, HandlerErr> {
    let mut p = StudentPatch::default();
    for (k, v) in obj {
        match k.as_str() {
            "firstName" => p.first_name = Some(text_field(v, k, 50)?),
            "lastName" => p.last_name = Some(text_field(v, k, 50)?),
            "email" => p.email = Some(email_field(v, k)?),
            "phone" => {
                p.phone = Some(match nullable_text_field(v, k, 20)? {
                    Some(s) => normalize_phone(&Cell::Text(s)).map_err(row_err)?,
                    None => None,
                })
            }
            "dateOfBirth" => {
                p.date_of_birth = Some(match nullable_text_field(v, k, 30)? {
                    Some(s) => normalize_date(&Cell::Text(s)).map_err(row_err)?,
                    None => None,
                })
            }
            "gender" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("gender must be string"))?;
                p.gender = Some(Gender::parse(s).ok_or_else(|| {
                    HandlerErr::bad_params("gender must be one of: male, female, other")
                })?);
            }
            "address" => p.address = Some(nullable_text_field(v, k, 255)?),
            "state" => p.state = Some(nullable_text_field(v, k, 50)?),
            "country" => p.country = Some(nullable_text_field(v, k, 50)?),
            "postalCode" => p.postal_code = Some(nullable_text_field(v, k, 10)?),
            "admissionNumber" => p.admission_number = Some(text_field(v, k, 20)?),
            "rollNumber" => p.roll_number = Some(text_field(v, k, 20)?),
            "institutionalEmail" => p.institutional_email = Some(email_field(v, k)?),
            "department" => p.department = Some(text_field(v, k, 100)?),
            "category" => p.category = Some(nullable_text_field(v, k, 50)?),
            "motherName" => p.mother_name = Some(nullable_text_field(v, k, 100)?),
            _ => return Err(HandlerErr::bad_params(format!("unknown student field: {}", k))),
        }
    }
    Ok(p)
}

fn student_response(conn: &Connection, id: i64) -> Result<Value, HandlerErr> {
    let student = students::get_student(conn, id)
        .map_err(db_err)?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    Ok(json!({ "student": student }))
}

fn create_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let obj = params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;
    let fields = parse_student_fields(obj)?;
    let settings = import_settings::load(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let first_name = fields
        .first_name
        .ok_or_else(|| HandlerErr::bad_params("missing firstName"))?;
    let last_name = fields
        .last_name
        .ok_or_else(|| HandlerErr::bad_params("missing lastName"))?;
    let email = fields
        .email
        .ok_or_else(|| HandlerErr::bad_params("missing email"))?;
    let admission_number = fields
        .admission_number
        .ok_or_else(|| HandlerErr::bad_params("missing admissionNumber"))?;
    let gender = fields
        .gender
        .ok_or_else(|| HandlerErr::bad_params("missing gender"))?;
    let department = fields
        .department
        .unwrap_or_else(|| settings.default_department.clone());

    if students::key_exists(conn, UniqueKey::Email, &email).map_err(db_err)? {
        return Err(unique_err(UniqueKey::Email));
    }
    if students::key_exists(conn, UniqueKey::AdmissionNumber, &admission_number).map_err(db_err)? {
        return Err(unique_err(UniqueKey::AdmissionNumber));
    }

    let roll_number = match fields.roll_number {
        Some(v) => v,
        None => generate_roll_number(conn, &mut rand::thread_rng(), &settings).map_err(row_err)?,
    };
    let institutional_email = match fields.institutional_email {
        Some(v) => v,
        None => generate_institutional_email(
            conn,
            &format!("{} {}", first_name, last_name),
            &department,
            &settings,
        )
        .map_err(row_err)?,
    };

    let record = NewStudent {
        first_name,
        last_name,
        email,
        phone: fields.phone.flatten(),
        date_of_birth: fields.date_of_birth.flatten(),
        gender,
        address: fields.address.flatten(),
        state: fields.state.flatten(),
        country: fields
            .country
            .unwrap_or_else(|| Some(settings.default_country.clone()).filter(|c| !c.is_empty())),
        postal_code: fields.postal_code.flatten(),
        admission_number,
        roll_number,
        institutional_email,
        department,
        category: fields.category.flatten(),
        mother_name: fields.mother_name.flatten(),
    };
    let id = students::insert_student(conn, &record).map_err(db_err)?;
    tracing::info!(id, roll_number = %record.roll_number, "student created");
    student_response(conn, id)
}

fn update_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "studentId")?;
    let patch_obj = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let patch = parse_student_fields(patch_obj)?;

    // A record may keep its own email/admission number.
    let checks = [
        (UniqueKey::Email, patch.email.as_deref()),
        (UniqueKey::AdmissionNumber, patch.admission_number.as_deref()),
    ];
    for (key, value) in checks {
        let Some(value) = value else { continue };
        if let Some(holder) = students::find_by_key(conn, key, value).map_err(db_err)? {
            if holder.id != id {
                return Err(unique_err(key));
            }
        }
    }

    let updated = students::update_student(conn, id, &patch)
        .map_err(db_err)?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    Ok(json!({ "student": updated }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match create_student(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let id = match get_required_i64(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match student_response(conn, id) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let skip = match get_optional_i64(&req.params, "skip") {
        Ok(v) => v.unwrap_or(0).max(0),
        Err(e) => return e.response(&req.id),
    };
    let limit = match get_optional_i64(&req.params, "limit") {
        Ok(v) => v.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        Err(e) => return e.response(&req.id),
    };
    let search = req.params.get("search").and_then(|v| v.as_str());

    match students::list_students(conn, skip, limit, search) {
        Ok(rows) => ok(&req.id, json!({ "students": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_count(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students::count_students(conn) {
        Ok(count) => ok(&req.id, json!({ "count": count })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match update_student(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let id = match get_required_i64(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match students::delete_student(conn, id) {
        Ok(Some(student)) => {
            tracing::info!(id, "student deleted");
            ok(&req.id, json!({ "student": student }))
        }
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.count" => Some(handle_students_count(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
