//! Maps a loose external card onto a local `cards` row, creating one when
//! nothing matches.

use crate::catalog::ExternalCard;
use crate::error::{EngineError, EngineResult};
use crate::schema::{CardsShape, InsertBuilder};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    pub card_id: i64,
    pub created: bool,
}

/// Find-before-create on (name, set label). The collector number only
/// ranks candidates within that pair, so two printings of one card in one
/// set never become two rows.
pub fn resolve_or_create_card(conn: &Connection, card: &ExternalCard) -> EngineResult<Resolved> {
    let Some(name) = card.usable_name() else {
        return Err(EngineError::Identity("card has no name".into()));
    };
    let Some(shape) = CardsShape::load(conn) else {
        return Err(EngineError::Schema("cards table is missing".into()));
    };

    let set_name = card.set_name.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let number = card
        .collector_number
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(card_id) = find_card(conn, &shape, name, set_name, number)? {
        return Ok(Resolved {
            card_id,
            created: false,
        });
    }

    let mut ins = InsertBuilder::new();
    ins.push("name", name.to_string());
    if let (Some(col), Some(set)) = (shape.set_label, set_name) {
        ins.push(col, set.to_string());
    }
    if let Some(n) = number {
        ins.push_if(shape.collector_number, "collector_number", n.to_string());
    }
    if let Some(r) = card.rarity.as_deref() {
        ins.push_if(shape.rarity, "rarity", r.trim().to_string());
    }
    if let Some(col) = shape.price {
        ins.push(col, card.current_eur().unwrap_or(0.0));
    }
    ins.push_if(shape.followed, "followed", 0i64);

    let card_id = ins.execute(conn, "cards")?;
    debug!(card_id, name, "created card from external record");
    Ok(Resolved {
        card_id,
        created: true,
    })
}

fn find_card(
    conn: &Connection,
    shape: &CardsShape,
    name: &str,
    set_name: Option<&str>,
    number: Option<&str>,
) -> EngineResult<Option<i64>> {
    let mut sql = String::from("SELECT id FROM cards WHERE LOWER(name) = LOWER(?)");
    let mut args: Vec<Value> = vec![Value::from(name.to_string())];

    if let (Some(col), Some(set)) = (shape.set_label, set_name) {
        sql.push_str(&format!(" AND LOWER({col}) = LOWER(?)"));
        args.push(Value::from(set.to_string()));
    }
    match (shape.collector_number, number) {
        (true, Some(n)) => {
            sql.push_str(
                " ORDER BY CASE WHEN LOWER(COALESCE(collector_number, '')) = LOWER(?) THEN 0 ELSE 1 END, id",
            );
            args.push(Value::from(n.to_string()));
        }
        _ => sql.push_str(" ORDER BY id"),
    }
    sql.push_str(" LIMIT 1");

    let id = conn
        .query_row(&sql, params_from_iter(args.iter()), |r| r.get(0))
        .optional()?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn external(v: serde_json::Value) -> ExternalCard {
        ExternalCard::from_json(&v).expect("external card")
    }

    #[test]
    fn second_resolution_reuses_card() {
        let conn = db::open_memory();
        let card = external(json!({
            "name": "Lightning Bolt", "set_name": "Beta", "collector_number": "162",
            "rarity": "common", "eur": 40
        }));
        let first = resolve_or_create_card(&conn, &card).expect("first");
        assert!(first.created);
        let second = resolve_or_create_card(&conn, &card).expect("second");
        assert_eq!(second.card_id, first.card_id);
        assert!(!second.created);

        let (edition, price, followed): (String, f64, i64) = conn
            .query_row(
                "SELECT edition, price_eur, followed FROM cards WHERE id = ?",
                [first.card_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .expect("card row");
        assert_eq!(edition, "Beta");
        assert_eq!(price, 40.0);
        assert_eq!(followed, 0);
    }

    #[test]
    fn match_is_case_insensitive_and_refined_by_set() {
        let conn = db::open_memory();
        let alpha = resolve_or_create_card(
            &conn,
            &external(json!({ "name": "Counterspell", "set_name": "Alpha" })),
        )
        .expect("alpha");
        let again = resolve_or_create_card(
            &conn,
            &external(json!({ "name": "COUNTERSPELL", "set_name": "alpha" })),
        )
        .expect("again");
        assert_eq!(again.card_id, alpha.card_id);

        let other_set = resolve_or_create_card(
            &conn,
            &external(json!({ "name": "Counterspell", "set_name": "Ice Age" })),
        )
        .expect("other set");
        assert!(other_set.created);
        assert_ne!(other_set.card_id, alpha.card_id);
    }

    #[test]
    fn collector_number_never_splits_name_and_set() {
        let conn = db::open_memory();
        let plain = resolve_or_create_card(
            &conn,
            &external(json!({ "name": "Forest", "set_name": "Alpha" })),
        )
        .expect("plain");
        let numbered = resolve_or_create_card(
            &conn,
            &external(json!({ "name": "Forest", "set_name": "Alpha", "collector_number": 294 })),
        )
        .expect("numbered");
        assert_eq!(numbered.card_id, plain.card_id);
        assert!(!numbered.created);
    }

    #[test]
    fn missing_name_is_an_identity_error() {
        let conn = db::open_memory();
        let err = resolve_or_create_card(&conn, &external(json!({ "set_name": "Alpha" })))
            .expect_err("no name");
        assert!(matches!(err, EngineError::Identity(_)));
    }

    #[test]
    fn adapts_to_legacy_cards_columns() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE cards(id INTEGER PRIMARY KEY, name TEXT NOT NULL, set_name TEXT, eur REAL)",
        )
        .expect("legacy cards");
        let r = resolve_or_create_card(
            &conn,
            &external(json!({ "name": "Bolt", "set_name": "Alpha", "rarity": "common", "prices": { "eur": "1.5" } })),
        )
        .expect("resolve");
        let (set, eur): (String, f64) = conn
            .query_row("SELECT set_name, eur FROM cards WHERE id = ?", [r.card_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .expect("row");
        assert_eq!(set, "Alpha");
        assert_eq!(eur, 1.5);
    }
}
