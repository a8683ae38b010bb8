//! Completeness report and best-effort backfill of ownership metadata.
//!
//! Rows reach the collection through several paths with different levels
//! of detail. Repair fills blank descriptive fields from the external
//! catalog and the local cards, never overwriting a non-blank value.

use crate::catalog;
use crate::error::EngineResult;
use crate::schema::{self, CardsShape, CollectionShape, OwnedColumn, UpdateBuilder, COLLECTION};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseReport {
    pub total: i64,
    pub with_link: i64,
    pub without_link: i64,
    pub join_hits: i64,
    /// `None` when the table has no name column to be missing.
    pub missing_name: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub fixed_by_name_set: usize,
    pub fixed_from_catalog: usize,
    pub fixed_from_external_id: usize,
}

fn catalog_present(conn: &Connection) -> bool {
    schema::has_column(conn, "scry_cards", "id")
}

pub fn diagnose(conn: &Connection) -> EngineResult<DiagnoseReport> {
    let shape = CollectionShape::load(conn)?;
    let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |r| r.get(0)) };

    let total = count(&format!("SELECT COUNT(*) FROM {COLLECTION}"))?;
    let with_link = if shape.has(OwnedColumn::ScryId) {
        count(&format!(
            "SELECT COUNT(*) FROM {COLLECTION} WHERE scry_id IS NOT NULL AND TRIM(scry_id) <> ''"
        ))?
    } else {
        0
    };

    let mut matchers = Vec::new();
    if shape.has(OwnedColumn::ScryId) {
        matchers.push("s.id = c.scry_id");
    }
    if shape.has(OwnedColumn::Name) && shape.has(OwnedColumn::SetName) {
        matchers.push("(LOWER(s.name) = LOWER(c.name) AND LOWER(s.set_name) = LOWER(c.set_name))");
    }
    let join_hits = if catalog_present(conn) && !matchers.is_empty() {
        count(&format!(
            "SELECT COUNT(*) FROM {COLLECTION} c
             WHERE EXISTS (SELECT 1 FROM scry_cards s WHERE {})",
            matchers.join(" OR ")
        ))?
    } else {
        0
    };

    let missing_name = if shape.has(OwnedColumn::Name) {
        Some(count(&format!(
            "SELECT COUNT(*) FROM {COLLECTION} WHERE name IS NULL OR TRIM(name) = ''"
        ))?)
    } else {
        None
    };

    Ok(DiagnoseReport {
        total,
        with_link,
        without_link: total - with_link,
        join_hits,
        missing_name,
    })
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// Queues `column = source` when the column exists, the current value is
/// blank and the source is not.
fn fill_text(
    upd: &mut UpdateBuilder,
    shape: &CollectionShape,
    col: OwnedColumn,
    current: &Option<String>,
    source: &Option<String>,
) {
    if shape.has(col) && is_blank(current) && !is_blank(source) {
        if let Some(s) = source {
            upd.set(col.name(), s.trim().to_string());
        }
    }
}

fn fill_price(upd: &mut UpdateBuilder, shape: &CollectionShape, current: Option<f64>, source: Option<f64>) {
    if shape.has(OwnedColumn::LastEur) && current.is_none() {
        if let Some(eur) = source {
            upd.set(OwnedColumn::LastEur.name(), eur);
        }
    }
}

fn column_or_null(shape: &CollectionShape, col: OwnedColumn) -> &'static str {
    if shape.has(col) {
        col.name()
    } else {
        "NULL"
    }
}

/// Row snapshot used by every pass.
struct OwnedRow {
    row_id: i64,
    card_id: Option<i64>,
    scry_id: Option<String>,
    name: Option<String>,
    set_name: Option<String>,
    rarity: Option<String>,
    last_eur: Option<f64>,
}

fn load_rows(conn: &Connection, shape: &CollectionShape) -> EngineResult<Vec<OwnedRow>> {
    let sql = format!(
        "SELECT {rid}, {card_id}, {scry_id}, {name}, {set_name}, {rarity}, {last_eur}
         FROM {COLLECTION} ORDER BY {rid}",
        rid = shape.row_id(),
        card_id = column_or_null(shape, OwnedColumn::CardId),
        scry_id = column_or_null(shape, OwnedColumn::ScryId),
        name = column_or_null(shape, OwnedColumn::Name),
        set_name = column_or_null(shape, OwnedColumn::SetName),
        rarity = column_or_null(shape, OwnedColumn::Rarity),
        last_eur = column_or_null(shape, OwnedColumn::LastEur),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(OwnedRow {
                row_id: r.get(0)?,
                card_id: r.get(1)?,
                scry_id: r.get(2)?,
                name: r.get(3)?,
                set_name: r.get(4)?,
                rarity: r.get(5)?,
                last_eur: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Applies a row's queued fills. Returns whether anything was written.
fn apply(conn: &Connection, shape: &CollectionShape, row_id: i64, upd: UpdateBuilder) -> EngineResult<bool> {
    if upd.is_empty() {
        return Ok(false);
    }
    let changed = upd.execute(
        conn,
        COLLECTION,
        &format!("{} = ?", shape.row_id()),
        vec![Value::from(row_id)],
    )?;
    Ok(changed > 0)
}

/// Runs the backfill passes in one transaction.
///
/// Passes run as: local cards, then name+set linking, then external id
/// backfill. Each pass only fills what earlier ones left blank, so a second
/// run has nothing left to do.
pub fn repair(conn: &Connection) -> EngineResult<RepairReport> {
    let shape = CollectionShape::load(conn)?;
    let tx = conn.unchecked_transaction()?;
    let mut report = RepairReport::default();

    report.fixed_from_catalog = fill_from_cards(&tx, &shape)?;
    if catalog_present(&tx) {
        report.fixed_by_name_set = link_by_name_set(&tx, &shape)?;
        report.fixed_from_external_id = fill_from_external_id(&tx, &shape)?;
    }

    tx.commit()?;
    info!(
        by_name_set = report.fixed_by_name_set,
        from_catalog = report.fixed_from_catalog,
        from_external_id = report.fixed_from_external_id,
        "collection repair finished"
    );
    Ok(report)
}

fn fill_from_external_id(conn: &Connection, shape: &CollectionShape) -> EngineResult<usize> {
    let fillable = [
        OwnedColumn::Name,
        OwnedColumn::SetName,
        OwnedColumn::Rarity,
        OwnedColumn::LastEur,
    ];
    if !shape.has(OwnedColumn::ScryId) || !fillable.iter().any(|c| shape.has(*c)) {
        return Ok(0);
    }
    let mut fixed = 0;
    for row in load_rows(conn, shape)? {
        let Some(sid) = row.scry_id.as_deref().filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        let Some(src) = catalog::external_by_id(conn, sid.trim())? else {
            continue;
        };
        let mut upd = UpdateBuilder::new();
        fill_text(&mut upd, shape, OwnedColumn::Name, &row.name, &src.name);
        fill_text(&mut upd, shape, OwnedColumn::SetName, &row.set_name, &src.set_name);
        fill_text(&mut upd, shape, OwnedColumn::Rarity, &row.rarity, &src.rarity);
        fill_price(&mut upd, shape, row.last_eur, src.current_eur());
        if apply(conn, shape, row.row_id, upd)? {
            debug!(row_id = row.row_id, scry_id = sid, "filled from external id");
            fixed += 1;
        }
    }
    Ok(fixed)
}

fn link_by_name_set(conn: &Connection, shape: &CollectionShape) -> EngineResult<usize> {
    if !(shape.has(OwnedColumn::ScryId) && shape.has(OwnedColumn::Name) && shape.has(OwnedColumn::SetName)) {
        return Ok(0);
    }
    let mut fixed = 0;
    for row in load_rows(conn, shape)? {
        if !is_blank(&row.scry_id) || is_blank(&row.name) || is_blank(&row.set_name) {
            continue;
        }
        let (Some(name), Some(set_name)) = (row.name.as_deref(), row.set_name.as_deref()) else {
            continue;
        };
        let Some(src) = catalog::external_by_name_set(conn, name, set_name)? else {
            continue;
        };
        let Some(sid) = src.id.clone() else {
            continue;
        };
        let mut upd = UpdateBuilder::new();
        upd.set(OwnedColumn::ScryId.name(), sid);
        fill_text(&mut upd, shape, OwnedColumn::Rarity, &row.rarity, &src.rarity);
        fill_price(&mut upd, shape, row.last_eur, src.current_eur());
        if apply(conn, shape, row.row_id, upd)? {
            debug!(row_id = row.row_id, name, set_name, "linked by name and set");
            fixed += 1;
        }
    }
    Ok(fixed)
}

fn fill_from_cards(conn: &Connection, shape: &CollectionShape) -> EngineResult<usize> {
    if !shape.has(OwnedColumn::CardId) {
        return Ok(0);
    }
    let Some(cards) = CardsShape::load(conn) else {
        return Ok(0);
    };
    if ![OwnedColumn::Name, OwnedColumn::SetName, OwnedColumn::Rarity]
        .iter()
        .any(|c| shape.has(*c))
    {
        return Ok(0);
    }

    let set_expr = cards.set_label.unwrap_or("NULL");
    let rarity_expr = if cards.rarity { "rarity" } else { "NULL" };
    let sql = format!("SELECT name, {set_expr}, {rarity_expr} FROM cards WHERE id = ?");
    let mut lookup = conn.prepare(&sql)?;

    let mut fixed = 0;
    for row in load_rows(conn, shape)? {
        let Some(card_id) = row.card_id else {
            continue;
        };
        let card: Option<(Option<String>, Option<String>, Option<String>)> = lookup
            .query_row([card_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .optional()?;
        let Some((name, set_name, rarity)) = card else {
            continue;
        };

        let mut upd = UpdateBuilder::new();
        fill_text(&mut upd, shape, OwnedColumn::Name, &row.name, &name);
        fill_text(&mut upd, shape, OwnedColumn::SetName, &row.set_name, &set_name);
        fill_text(&mut upd, shape, OwnedColumn::Rarity, &row.rarity, &rarity);
        if apply(conn, shape, row.row_id, upd)? {
            debug!(row_id = row.row_id, card_id, "filled from local card");
            fixed += 1;
        }
    }
    Ok(fixed)
}
