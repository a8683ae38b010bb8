use crate::ipc::error::{anyhow_err, canceled, err, ok_value};
use crate::ipc::types::{AppState, Request};
use crate::transfer;
use std::path::PathBuf;

/// The shell resolves the file prompt before calling. No path means the
/// user dismissed it.
fn path_param(req: &Request, key: &str) -> Option<PathBuf> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = path_param(req, "outPath") else {
        return canceled(&req.id);
    };
    match transfer::export_csv(conn, &out_path) {
        Ok(summary) => ok_value(&req.id, &summary),
        Err(e) => anyhow_err(&req.id, &e),
    }
}

fn handle_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(in_path) = path_param(req, "inPath") else {
        return canceled(&req.id);
    };
    match transfer::import_csv(conn, &in_path) {
        Ok(summary) => ok_value(&req.id, &summary),
        Err(e) => anyhow_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "collection.exportCsv" => Some(handle_export_csv(state, req)),
        "collection.importCsv" => Some(handle_import_csv(state, req)),
        _ => None,
    }
}
