use crate::catalog::{self, ExternalCard};
use crate::ipc::error::{engine_err, err, ok, ok_value};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn code_param(req: &Request) -> Option<&str> {
    req.params
        .get("code")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn handle_upsert_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = req.params.get("cards").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing cards array", None);
    };
    let mut records = Vec::with_capacity(raw.len());
    for (idx, v) in raw.iter().enumerate() {
        match ExternalCard::from_json(v) {
            Ok(c) => records.push(c),
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    e.to_string(),
                    Some(json!({ "index": idx })),
                )
            }
        }
    }
    match catalog::upsert_catalog(conn, &records) {
        Ok(summary) => ok_value(&req.id, &summary),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_sets(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sets": [] }));
    };
    match catalog::list_sets(conn) {
        Ok(sets) => ok(&req.id, json!({ "sets": sets })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_set_info(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(code) = code_param(req) else {
        return err(&req.id, "bad_params", "missing code", None);
    };
    match catalog::set_info(conn, code) {
        Ok(info) => ok_value(&req.id, &info),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_cards_by_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(code) = code_param(req) else {
        return err(&req.id, "bad_params", "missing code", None);
    };
    match catalog::cards_by_set(conn, code) {
        Ok(cards) => ok(&req.id, json!({ "cards": cards })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.upsertBatch" => Some(handle_upsert_batch(state, req)),
        "catalog.sets" => Some(handle_sets(state, req)),
        "catalog.setInfo" => Some(handle_set_info(state, req)),
        "catalog.cardsBySet" => Some(handle_cards_by_set(state, req)),
        _ => None,
    }
}
