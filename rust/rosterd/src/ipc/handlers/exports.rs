use crate::export::{self, ExportFormat};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn handle_students_export(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let Some(format) = ExportFormat::from_path(&out_path) else {
        return err(
            &req.id,
            "unsupported_format",
            "outPath must end in .csv or .xlsx",
            Some(json!({ "path": out_path.to_string_lossy() })),
        );
    };

    match export::export_students(conn, format, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "rowsExported": summary.rows_exported,
                "format": summary.format.as_str(),
                "path": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": out_path.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.export" => Some(handle_students_export(state, req)),
        _ => None,
    }
}
