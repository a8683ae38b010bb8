use crate::catalog::ExternalCard;
use crate::db::now_stamp;
use crate::error::{EngineError, EngineResult};
use crate::resolver::{resolve_or_create_card, Resolved};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: i64,
    pub name: String,
    pub edition: String,
    pub rarity: String,
    pub price_eur: f64,
    pub followed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewCard {
    pub name: String,
    pub edition: String,
    pub rarity: String,
    pub price_eur: f64,
    pub followed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub inserted: usize,
}

pub fn count_cards(conn: &Connection) -> EngineResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM cards", [], |r| r.get(0))?)
}

pub fn list_cards(conn: &Connection) -> EngineResult<Vec<Card>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, edition, rarity, price_eur, followed
         FROM cards
         ORDER BY name COLLATE NOCASE ASC, id ASC",
    )?;
    let cards = stmt
        .query_map([], |row| {
            Ok(Card {
                id: row.get(0)?,
                name: row.get(1)?,
                edition: row.get(2)?,
                rarity: row.get(3)?,
                price_eur: row.get(4)?,
                followed: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cards)
}

pub fn add_card(conn: &Connection, card: &NewCard) -> EngineResult<i64> {
    let name = card.name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("name", "must not be empty"));
    }
    if !card.price_eur.is_finite() || card.price_eur < 0.0 {
        return Err(EngineError::validation("priceEur", "must be a number >= 0"));
    }
    conn.execute(
        "INSERT INTO cards(name, edition, rarity, price_eur, followed, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            name,
            card.edition.trim(),
            card.rarity.trim(),
            card.price_eur,
            card.followed as i64,
            now_stamp(),
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn toggle_follow(conn: &Connection, card_id: i64) -> EngineResult<bool> {
    let current: Option<i64> = conn
        .query_row("SELECT followed FROM cards WHERE id = ?", [card_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(current) = current else {
        return Err(EngineError::NotFound(format!("card {card_id}")));
    };
    set_follow(conn, card_id, current == 0)
}

pub fn set_follow(conn: &Connection, card_id: i64, followed: bool) -> EngineResult<bool> {
    let changed = conn.execute(
        "UPDATE cards SET followed = ? WHERE id = ?",
        (followed as i64, card_id),
    )?;
    if changed == 0 {
        return Err(EngineError::NotFound(format!("card {card_id}")));
    }
    Ok(followed)
}

/// Resolve an external card to a local one and set its follow flag.
pub fn follow_external(
    conn: &Connection,
    card: &ExternalCard,
    followed: bool,
) -> EngineResult<(Resolved, bool)> {
    let resolved = resolve_or_create_card(conn, card)?;
    let followed = set_follow(conn, resolved.card_id, followed)?;
    Ok((resolved, followed))
}

const DEMO_CARDS: [(&str, &str, &str, f64, bool); 3] = [
    ("Black Lotus", "Alpha", "Rare", 200000.0, true),
    ("Lightning Bolt", "Alpha", "Common", 2.5, true),
    ("Counterspell", "Alpha", "Uncommon", 5.0, false),
];

/// Seeds the demo catalog into an empty `cards` table, atomically.
pub fn seed_demo(conn: &Connection) -> EngineResult<SeedSummary> {
    if count_cards(conn)? > 0 {
        return Ok(SeedSummary { inserted: 0 });
    }
    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO cards(name, edition, rarity, price_eur, followed, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
        )?;
        let stamp = now_stamp();
        for (name, edition, rarity, price, followed) in DEMO_CARDS {
            insert.execute((name, edition, rarity, price, followed as i64, &stamp))?;
        }
    }
    tx.commit()?;
    Ok(SeedSummary {
        inserted: DEMO_CARDS.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn seed_runs_once() {
        let conn = db::open_memory();
        assert_eq!(seed_demo(&conn).expect("seed").inserted, 3);
        assert_eq!(seed_demo(&conn).expect("reseed").inserted, 0);
        let names: Vec<String> = list_cards(&conn)
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Black Lotus", "Counterspell", "Lightning Bolt"]);
    }

    #[test]
    fn add_requires_a_name_and_follow_toggles() {
        let conn = db::open_memory();
        let err = add_card(
            &conn,
            &NewCard {
                name: "  ".into(),
                ..NewCard::default()
            },
        )
        .expect_err("empty name");
        assert!(matches!(err, EngineError::Validation { field: "name", .. }));

        let id = add_card(
            &conn,
            &NewCard {
                name: " Shivan Dragon ".into(),
                edition: "Alpha".into(),
                ..NewCard::default()
            },
        )
        .expect("add");
        assert!(toggle_follow(&conn, id).expect("toggle on"));
        assert!(!toggle_follow(&conn, id).expect("toggle off"));
        assert!(matches!(
            toggle_follow(&conn, 9999),
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(list_cards(&conn).expect("list")[0].name, "Shivan Dragon");
    }
}
