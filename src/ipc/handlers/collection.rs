use super::cards::external_card_param;
use crate::collection::{self, CardRef, DetailsPatch, Patch};
use crate::ipc::error::{engine_err, err, ok, ok_value};
use crate::ipc::types::{AppState, Request};
use crate::repair;
use crate::valuation;
use serde_json::{json, Value};

/// Reads `params.ref`, falling back to identity keys given inline in
/// `params`. A bare integer is a catalog card id.
fn card_ref_param(req: &Request) -> Result<CardRef, Value> {
    let raw = req.params.get("ref").unwrap_or(&req.params);
    if let Some(card_id) = raw.as_i64() {
        return Ok(CardRef::ByCardId(card_id));
    }
    let text = |key: &str| {
        raw.get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    if let Some(id) = raw.get("id").and_then(|v| v.as_i64()) {
        return Ok(CardRef::ById(id));
    }
    if let Some(card_id) = raw.get("cardId").and_then(|v| v.as_i64()) {
        return Ok(CardRef::ByCardId(card_id));
    }
    if let Some(external_id) = text("externalId") {
        return Ok(CardRef::ByExternalId(external_id.to_string()));
    }
    if let (Some(name), Some(set_name)) = (text("name"), text("setName")) {
        return Ok(CardRef::ByNameSet {
            name: name.to_string(),
            set_name: set_name.to_string(),
        });
    }
    Err(err(
        &req.id,
        "bad_params",
        "ref must carry id, cardId, externalId or name + setName",
        None,
    ))
}

fn qty_param(req: &Request, default: Option<i64>) -> Result<i64, Value> {
    match req.params.get("qty") {
        None | Some(Value::Null) => {
            default.ok_or_else(|| err(&req.id, "bad_params", "missing qty", None))
        }
        Some(v) => v
            .as_i64()
            .ok_or_else(|| err(&req.id, "bad_params", "qty must be an integer", None)),
    }
}

/// Absent key keeps the column, explicit null clears it.
fn patch_param<T>(
    req: &Request,
    key: &str,
    read: impl Fn(&Value) -> Option<T>,
) -> Result<Patch<T>, Value> {
    match req.params.get(key) {
        None => Ok(Patch::Keep),
        Some(Value::Null) => Ok(Patch::Clear),
        Some(v) => read(v)
            .map(Patch::Set)
            .ok_or_else(|| err(&req.id, "bad_params", format!("invalid {key}"), None)),
    }
}

fn details_patch_param(req: &Request) -> Result<DetailsPatch, Value> {
    let text = |v: &Value| v.as_str().map(str::to_string);
    Ok(DetailsPatch {
        paid_eur: patch_param(req, "paidEur", |v| v.as_f64())?,
        condition: patch_param(req, "condition", text)?,
        comment: patch_param(req, "comment", text)?,
    })
}

fn handle_add(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card_ref = match card_ref_param(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let qty = match qty_param(req, Some(1)) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    match collection::add(conn, &card_ref, qty) {
        Ok(out) => ok_value(&req.id, &out),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_add_external(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card = match external_card_param(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let qty = match qty_param(req, Some(1)) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    match collection::add_from_external(conn, &card, qty) {
        Ok(out) => ok_value(&req.id, &out),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_set_quantity(state: &mut AppState, req: &Request, exact: bool) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card_ref = match card_ref_param(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let qty = match qty_param(req, None) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    let res = if exact {
        collection::set_exact_quantity(conn, &card_ref, qty)
    } else {
        collection::update_quantity(conn, &card_ref, qty)
    };
    match res {
        Ok(out) => ok_value(&req.id, &out),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_remove(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card_ref = match card_ref_param(req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match collection::remove(conn, &card_ref) {
        Ok(changes) => ok(&req.id, json!({ "changes": changes })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_update_details(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(row_id) = req.params.get("id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let patch = match details_patch_param(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match collection::update_details(conn, row_id, &patch) {
        Ok(updated) => ok(&req.id, json!({ "updated": updated })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_stats(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match valuation::stats(conn) {
        Ok(s) => ok_value(&req.id, &s),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_list_detailed(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "items": [] }));
    };
    match valuation::list_detailed(conn) {
        Ok(items) => ok(&req.id, json!({ "items": items })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_diagnose(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match repair::diagnose(conn) {
        Ok(report) => ok_value(&req.id, &report),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_repair(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match repair::repair(conn) {
        Ok(report) => ok_value(&req.id, &report),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "collection.add" => Some(handle_add(state, req)),
        "collection.addExternal" => Some(handle_add_external(state, req)),
        "collection.setExact" => Some(handle_set_quantity(state, req, true)),
        "collection.updateQty" => Some(handle_set_quantity(state, req, false)),
        "collection.remove" => Some(handle_remove(state, req)),
        "collection.updateDetails" => Some(handle_update_details(state, req)),
        "collection.stats" => Some(handle_stats(state, req)),
        "collection.listDetailed" => Some(handle_list_detailed(state, req)),
        "collection.diagnose" => Some(handle_diagnose(state, req)),
        "collection.repair" => Some(handle_repair(state, req)),
        _ => None,
    }
}
