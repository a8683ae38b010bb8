//! Portfolio totals and the detailed collection listing.
//!
//! Display fields fall back from the row's own denormalized copy to the
//! external catalog and then to the local card. The effective price falls
//! back from the cached last price to the catalog price to zero.

use crate::error::EngineResult;
use crate::schema::{self, CardsShape, CollectionShape, OwnedColumn, COLLECTION};
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Sum of quantities.
    pub total: i64,
    /// Number of ownership rows.
    pub distinct: i64,
    pub invested: f64,
    pub current: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedRow {
    pub id: i64,
    pub card_id: Option<i64>,
    pub scry_id: Option<String>,
    pub quantity: i64,
    pub name: String,
    pub set_name: String,
    pub rarity: String,
    pub collector_number: Option<String>,
    pub price_eur: f64,
    pub current_value: f64,
    pub paid_eur: Option<f64>,
    pub condition: Option<String>,
    pub comment: Option<String>,
}

/// SQL fragments for one read over `collection c` plus whatever joins the
/// live schema supports.
struct ValuationQuery {
    from: String,
    row_id: String,
    qty: String,
    card_id: &'static str,
    scry_id: &'static str,
    name: String,
    set_name: String,
    rarity: String,
    collector_number: String,
    price: String,
    paid: &'static str,
    condition: &'static str,
    comment: &'static str,
}

/// `COALESCE` over the non-blank candidates, ending in `fallback`.
fn first_non_blank(candidates: &[String], fallback: &str) -> String {
    if candidates.is_empty() {
        return fallback.to_string();
    }
    let parts: Vec<String> = candidates
        .iter()
        .map(|c| format!("NULLIF(TRIM({c}), '')"))
        .collect();
    format!("COALESCE({}, {fallback})", parts.join(", "))
}

impl ValuationQuery {
    fn build(conn: &Connection, shape: &CollectionShape) -> Self {
        let own = |col: OwnedColumn| shape.has(col).then(|| format!("c.{}", col.name()));

        let mut from = format!("{COLLECTION} c");
        let catalog_joined = shape.has(OwnedColumn::ScryId) && schema::has_column(conn, "scry_cards", "id");
        if catalog_joined {
            from.push_str(" LEFT JOIN scry_cards s ON s.id = c.scry_id");
        }
        let cards = if shape.has(OwnedColumn::CardId) {
            CardsShape::load(conn)
        } else {
            None
        };
        if cards.is_some() {
            from.push_str(" LEFT JOIN cards k ON k.id = c.card_id");
        }

        let mut name = Vec::new();
        let mut set_name = Vec::new();
        let mut rarity = Vec::new();
        let mut number = Vec::new();
        let mut prices = Vec::new();

        name.extend(own(OwnedColumn::Name));
        set_name.extend(own(OwnedColumn::SetName));
        rarity.extend(own(OwnedColumn::Rarity));
        number.extend(own(OwnedColumn::CollectorNumber));
        prices.extend(own(OwnedColumn::LastEur));
        if catalog_joined {
            name.push("s.name".to_string());
            set_name.push("s.set_name".to_string());
            rarity.push("s.rarity".to_string());
            number.push("s.collector_number".to_string());
            prices.push("s.eur".to_string());
        }
        if let Some(k) = &cards {
            name.push("k.name".to_string());
            if let Some(label) = k.set_label {
                set_name.push(format!("k.{label}"));
            }
            if k.rarity {
                rarity.push("k.rarity".to_string());
            }
            if k.collector_number {
                number.push("k.collector_number".to_string());
            }
            if let Some(price) = k.price {
                prices.push(format!("k.{price}"));
            }
        }

        prices.push("0.0".to_string());

        Self {
            from,
            row_id: format!("c.{}", shape.row_id()),
            qty: format!("MAX(COALESCE(c.{}, 0), 0)", shape.qty()),
            card_id: if shape.has(OwnedColumn::CardId) { "c.card_id" } else { "NULL" },
            scry_id: if shape.has(OwnedColumn::ScryId) { "c.scry_id" } else { "NULL" },
            name: first_non_blank(&name, "''"),
            set_name: first_non_blank(&set_name, "''"),
            rarity: first_non_blank(&rarity, "''"),
            collector_number: first_non_blank(&number, "NULL"),
            price: format!("CAST(COALESCE({}) AS REAL)", prices.join(", ")),
            paid: if shape.has(OwnedColumn::PaidEur) { "c.paid_eur" } else { "NULL" },
            condition: if shape.has(OwnedColumn::Condition) { "c.condition" } else { "NULL" },
            comment: if shape.has(OwnedColumn::Comment) { "c.comment" } else { "NULL" },
        }
    }
}

pub fn stats(conn: &Connection) -> EngineResult<Stats> {
    let shape = CollectionShape::load(conn)?;
    let q = ValuationQuery::build(conn, &shape);
    let sql = format!(
        "SELECT
           COALESCE(SUM({qty}), 0),
           COUNT(*),
           COALESCE(SUM({qty} * COALESCE({paid}, 0.0)), 0.0),
           COALESCE(SUM({qty} * {price}), 0.0)
         FROM {from}",
        qty = q.qty,
        paid = q.paid,
        price = q.price,
        from = q.from,
    );
    let (total, distinct, invested, current): (i64, i64, f64, f64) =
        conn.query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?;
    let stats = Stats {
        total,
        distinct,
        invested,
        current,
        delta: current - invested,
    };
    debug!(?stats, "collection stats");
    Ok(stats)
}

pub fn list_detailed(conn: &Connection) -> EngineResult<Vec<DetailedRow>> {
    let shape = CollectionShape::load(conn)?;
    let q = ValuationQuery::build(conn, &shape);
    let sql = format!(
        "SELECT {row_id}, {card_id}, {scry_id}, {qty}, {name} AS display_name, {set_name}, {rarity},
                {number}, {price}, {paid}, {condition}, {comment}
         FROM {from}
         ORDER BY display_name COLLATE NOCASE ASC, {row_id} ASC",
        row_id = q.row_id,
        card_id = q.card_id,
        scry_id = q.scry_id,
        qty = q.qty,
        name = q.name,
        set_name = q.set_name,
        rarity = q.rarity,
        number = q.collector_number,
        price = q.price,
        paid = q.paid,
        condition = q.condition,
        comment = q.comment,
        from = q.from,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let quantity: i64 = row.get(3)?;
            let price_eur: f64 = row.get(8)?;
            Ok(DetailedRow {
                id: row.get(0)?,
                card_id: row.get(1)?,
                scry_id: row.get(2)?,
                quantity,
                name: row.get(4)?,
                set_name: row.get(5)?,
                rarity: row.get(6)?,
                collector_number: row.get(7)?,
                price_eur,
                current_value: quantity as f64 * price_eur,
                paid_eur: row.get(9)?,
                condition: row.get(10)?,
                comment: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards;
    use crate::catalog::{upsert_catalog, ExternalCard};
    use crate::collection::{add, add_from_external, update_details, CardRef, DetailsPatch, Patch};
    use crate::db;
    use serde_json::json;

    #[test]
    fn empty_collection_has_zero_totals() {
        let conn = db::open_memory();
        assert_eq!(stats(&conn).expect("stats"), Stats::default());
        assert!(list_detailed(&conn).expect("list").is_empty());
    }

    #[test]
    fn unknown_paid_price_contributes_zero_but_still_counts() {
        let conn = db::open_memory();
        cards::seed_demo(&conn).expect("seed");
        let bolt = add(&conn, &CardRef::ByCardId(2), 4).expect("bolt").row_id;
        add(&conn, &CardRef::ByCardId(3), 2).expect("counterspell");
        update_details(
            &conn,
            bolt,
            &DetailsPatch {
                paid_eur: Patch::Set(1.0),
                ..DetailsPatch::default()
            },
        )
        .expect("paid");

        let s = stats(&conn).expect("stats");
        assert_eq!(s.total, 6);
        assert_eq!(s.distinct, 2);
        assert_eq!(s.invested, 4.0);
        // Local card reference prices: 2.5 and 5.0.
        assert_eq!(s.current, 4.0 * 2.5 + 2.0 * 5.0);
        assert_eq!(s.delta, s.current - 4.0);
    }

    #[test]
    fn cached_price_wins_over_catalog_price() {
        let conn = db::open_memory();
        upsert_catalog(
            &conn,
            &[ExternalCard::from_json(&json!({
                "id": "s1", "name": "Bolt", "set": "lea", "set_name": "Alpha", "prices": { "eur": "9.0" }
            }))
            .expect("card")],
        )
        .expect("catalog");
        let out = add(&conn, &CardRef::ByExternalId("s1".into()), 1).expect("add");
        conn.execute("UPDATE collection SET last_eur = 3.0 WHERE id = ?", [out.row_id])
            .expect("cache");
        assert_eq!(list_detailed(&conn).expect("list")[0].price_eur, 3.0);

        conn.execute("UPDATE collection SET last_eur = NULL WHERE id = ?", [out.row_id])
            .expect("clear cache");
        let row = &list_detailed(&conn).expect("list")[0];
        assert_eq!(row.price_eur, 9.0);
        assert_eq!(row.current_value, 9.0);
    }

    #[test]
    fn display_fields_fall_back_and_sort_case_insensitively() {
        let conn = db::open_memory();
        upsert_catalog(
            &conn,
            &[ExternalCard::from_json(&json!({
                "id": "s9", "name": "zephyr Falcon", "set": "vis", "set_name": "Visions", "rarity": "common"
            }))
            .expect("card")],
        )
        .expect("catalog");
        add_from_external(
            &conn,
            &ExternalCard::from_json(&json!({ "name": "Ancestral Recall", "set_name": "Alpha" })).expect("card"),
            1,
        )
        .expect("recall");
        // A bare linked row whose descriptive fields are blank.
        conn.execute(
            "INSERT INTO collection(scry_id, name, set_name, qty) VALUES('s9', '  ', '', 2)",
            [],
        )
        .expect("bare row");

        let rows = list_detailed(&conn).expect("list");
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Ancestral Recall", "zephyr Falcon"]);
        assert_eq!(rows[1].set_name, "Visions");
        assert_eq!(rows[1].rarity, "common");
        assert_eq!(rows[1].price_eur, 0.0);
    }

    #[test]
    fn legacy_schema_is_valued_from_cards() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE cards(id INTEGER PRIMARY KEY, name TEXT NOT NULL, edition TEXT, price_eur REAL);
             INSERT INTO cards VALUES(1, 'Bolt', 'Alpha', 2.0);
             CREATE TABLE collection(card_id INTEGER PRIMARY KEY, qty INTEGER, paid_eur REAL);
             INSERT INTO collection VALUES(1, 3, 1.5);",
        )
        .expect("legacy");
        let s = stats(&conn).expect("stats");
        assert_eq!((s.total, s.invested, s.current), (3, 4.5, 6.0));
        let rows = list_detailed(&conn).expect("list");
        assert_eq!(rows[0].name, "Bolt");
        assert_eq!(rows[0].set_name, "Alpha");
        assert_eq!(rows[0].card_id, Some(1));
    }
}
