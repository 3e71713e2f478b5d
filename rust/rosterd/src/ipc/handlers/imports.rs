use crate::import::{self, settings as import_settings, ImportError, RowSource};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_u64, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::path::Path;

fn import_error(e: ImportError, in_path: &str) -> HandlerErr {
    let code = match &e {
        ImportError::UnsupportedFormat(_) => "unsupported_format",
        ImportError::Io { .. } | ImportError::Parse { .. } => "parse_failed",
        ImportError::Storage(_) => "db_query_failed",
    };
    HandlerErr::new(code, e.to_string()).with_details(json!({ "path": in_path }))
}

fn read_source(in_path: &str) -> Result<RowSource, HandlerErr> {
    RowSource::read_path(Path::new(in_path)).map_err(|e| import_error(e, in_path))
}

fn handle_import_preview(_state: &mut AppState, req: &Request) -> Value {
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let source = match read_source(&in_path) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let preview = import::preview(&source);
    match serde_json::to_value(&preview) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_import_save(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let seed = match get_optional_u64(&req.params, "seed") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let settings = match import_settings::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let source = match read_source(&in_path) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let report = match import::run_import(conn, &source, &settings, &mut rng) {
        Ok(v) => v,
        Err(e) => return import_error(e, &in_path).response(&req.id),
    };
    match serde_json::to_value(&report) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.import.preview" => Some(handle_import_preview(state, req)),
        "students.import.save" => Some(handle_import_save(state, req)),
        _ => None,
    }
}
