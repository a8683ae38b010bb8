use crate::cards::{self, NewCard};
use crate::catalog::ExternalCard;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::resolver::resolve_or_create_card;
use serde_json::json;

/// `params.card` as an external record.
pub(super) fn external_card_param(req: &Request) -> Result<ExternalCard, serde_json::Value> {
    let Some(raw) = req.params.get("card").filter(|v| v.is_object()) else {
        return Err(err(&req.id, "bad_params", "missing params.card", None));
    };
    ExternalCard::from_json(raw).map_err(|e| engine_err(&req.id, &e))
}

fn handle_cards_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "cards": [] }));
    };
    match cards::list_cards(conn) {
        Ok(list) => ok(&req.id, json!({ "cards": list })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_cards_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let text = |key: &str| {
        req.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing name", None);
    };
    let price_eur = match req.params.get("priceEur") {
        None | Some(serde_json::Value::Null) => 0.0,
        Some(v) => match v.as_f64() {
            Some(p) => p,
            None => return err(&req.id, "bad_params", "priceEur must be a number", None),
        },
    };
    let card = NewCard {
        name: name.to_string(),
        edition: text("edition"),
        rarity: text("rarity"),
        price_eur,
        followed: req
            .params
            .get("followed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    };
    match cards::add_card(conn, &card) {
        Ok(id) => ok(&req.id, json!({ "id": id })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_cards_toggle_follow(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(card_id) = req.params.get("cardId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing cardId", None);
    };
    match cards::toggle_follow(conn, card_id) {
        Ok(followed) => ok(&req.id, json!({ "followed": followed })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_cards_follow_external(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card = match external_card_param(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let follow = req
        .params
        .get("follow")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    match cards::follow_external(conn, &card, follow) {
        Ok((resolved, followed)) => ok(
            &req.id,
            json!({
                "cardId": resolved.card_id,
                "created": resolved.created,
                "followed": followed
            }),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_cards_resolve_external(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card = match external_card_param(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match resolve_or_create_card(conn, &card) {
        Ok(r) => ok(&req.id, json!({ "id": r.card_id, "created": r.created })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cards.list" => Some(handle_cards_list(state, req)),
        "cards.add" => Some(handle_cards_add(state, req)),
        "cards.toggleFollow" => Some(handle_cards_toggle_follow(state, req)),
        "cards.followExternal" => Some(handle_cards_follow_external(state, req)),
        "cards.resolveExternal" => Some(handle_cards_resolve_external(state, req)),
        _ => None,
    }
}
