use crate::cards;
use crate::db;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let seed = req
        .params
        .get("seed")
        .and_then(|v| v.as_bool())
        .unwrap_or(state.seed_demo);

    match db::open_db(&path, seed) {
        Ok((conn, seeded)) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "workspacePath": path.to_string_lossy(), "seeded": seeded }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

fn handle_db_debug(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match cards::count_cards(conn) {
        Ok(n) => ok(
            &req.id,
            json!({
                "cards": n,
                "dbPath": db::db_path(workspace).to_string_lossy()
            }),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_db_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match cards::seed_demo(conn) {
        Ok(s) if s.inserted == 0 => ok(
            &req.id,
            json!({ "inserted": 0, "message": "cards already present" }),
        ),
        Ok(s) => ok(&req.id, json!({ "inserted": s.inserted })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "db.debug" => Some(handle_db_debug(state, req)),
        "db.seed" => Some(handle_db_seed(state, req)),
        _ => None,
    }
}
