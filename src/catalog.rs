//! Local mirror of the external card database (`scry_sets` / `scry_cards`).
//!
//! Records arrive from the external source untyped: prices are usually
//! strings, collector numbers may be numbers or strings like `"123a"`, and
//! any field may be missing. `ExternalCard` absorbs all of that at the serde
//! boundary so the rest of the crate sees plain `Option`s.

use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

pub const CATALOG_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExternalCard {
    #[serde(deserialize_with = "loose_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    pub oracle_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    pub name: Option<String>,
    #[serde(rename = "set", alias = "set_code", deserialize_with = "loose_string")]
    pub set_code: Option<String>,
    #[serde(alias = "setName", deserialize_with = "loose_string")]
    pub set_name: Option<String>,
    #[serde(alias = "collectorNumber", deserialize_with = "loose_string")]
    pub collector_number: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    pub rarity: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    pub released_at: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    pub lang: Option<String>,
    pub prices: Prices,
    /// Flattened price, as sent by UI code that already picked one.
    #[serde(deserialize_with = "loose_f64")]
    pub eur: Option<f64>,
    pub image_uris: ImageUris,
    #[serde(deserialize_with = "loose_string")]
    pub type_line: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    pub oracle_text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Prices {
    #[serde(deserialize_with = "loose_f64")]
    pub eur: Option<f64>,
    #[serde(deserialize_with = "loose_f64")]
    pub eur_foil: Option<f64>,
    #[serde(deserialize_with = "loose_f64")]
    pub usd: Option<f64>,
    #[serde(deserialize_with = "loose_f64")]
    pub usd_foil: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageUris {
    #[serde(deserialize_with = "loose_string")]
    pub small: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    pub normal: Option<String>,
}

impl ExternalCard {
    pub fn from_json(value: &serde_json::Value) -> EngineResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::validation("card", e.to_string()))
    }

    /// Current market price in the reference currency.
    pub fn current_eur(&self) -> Option<f64> {
        self.eur.or(self.prices.eur)
    }

    /// Trimmed, non-empty name.
    pub fn usable_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

fn loose_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn loose_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    let n = match v {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(n.filter(|x| x.is_finite()))
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogUpsertSummary {
    pub upserted: usize,
    pub sets: usize,
    pub skipped: usize,
    pub batches: usize,
}

/// Upsert external records by external id, `CATALOG_BATCH_SIZE` per
/// transaction. Each batch is all-or-nothing; the first failing batch stops
/// the run and earlier batches stay committed.
pub fn upsert_catalog(conn: &Connection, cards: &[ExternalCard]) -> EngineResult<CatalogUpsertSummary> {
    let mut summary = CatalogUpsertSummary::default();

    for chunk in cards.chunks(CATALOG_BATCH_SIZE) {
        let tx = conn.unchecked_transaction()?;
        {
            let mut upsert_set = tx.prepare_cached(
                "INSERT INTO scry_sets(code, name, released_at) VALUES(?, ?, ?)
                 ON CONFLICT(code) DO UPDATE SET
                   name = excluded.name,
                   released_at = excluded.released_at",
            )?;
            let mut upsert_card = tx.prepare_cached(
                "INSERT INTO scry_cards(
                   id, oracle_id, name, set_code, set_name, collector_number, released_at,
                   rarity, lang, usd, usd_foil, eur, eur_foil, image_small, image_normal,
                   type_line, oracle_text
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   oracle_id = excluded.oracle_id,
                   name = excluded.name,
                   set_code = excluded.set_code,
                   set_name = excluded.set_name,
                   collector_number = excluded.collector_number,
                   released_at = excluded.released_at,
                   rarity = excluded.rarity,
                   lang = excluded.lang,
                   usd = excluded.usd,
                   usd_foil = excluded.usd_foil,
                   eur = excluded.eur,
                   eur_foil = excluded.eur_foil,
                   image_small = excluded.image_small,
                   image_normal = excluded.image_normal,
                   type_line = excluded.type_line,
                   oracle_text = excluded.oracle_text",
            )?;

            for c in chunk {
                let (Some(id), Some(name)) = (c.id.as_deref(), c.usable_name()) else {
                    summary.skipped += 1;
                    continue;
                };
                if let (Some(code), Some(set_name)) = (&c.set_code, &c.set_name) {
                    upsert_set.execute((code, set_name, &c.released_at))?;
                    summary.sets += 1;
                }
                upsert_card.execute(rusqlite::params![
                    id,
                    c.oracle_id,
                    name,
                    c.set_code,
                    c.set_name,
                    c.collector_number,
                    c.released_at,
                    c.rarity,
                    c.lang,
                    c.prices.usd,
                    c.prices.usd_foil,
                    c.current_eur(),
                    c.prices.eur_foil,
                    c.image_uris.small,
                    c.image_uris.normal,
                    c.type_line,
                    c.oracle_text,
                ])?;
                summary.upserted += 1;
            }
        }
        tx.commit()?;
        summary.batches += 1;
        debug!(batch = summary.batches, rows = chunk.len(), "catalog batch committed");
    }

    info!(
        upserted = summary.upserted,
        skipped = summary.skipped,
        batches = summary.batches,
        "catalog upsert finished"
    );
    Ok(summary)
}

/// Catalog record by external id, shaped like an incoming external card.
pub fn external_by_id(conn: &Connection, id: &str) -> EngineResult<Option<ExternalCard>> {
    let row = conn
        .query_row(
            "SELECT id, name, set_code, set_name, collector_number, rarity, eur
             FROM scry_cards WHERE id = ?",
            [id],
            external_from_row,
        )
        .optional()?;
    Ok(row)
}

/// First catalog record matching name + set name case-insensitively.
pub fn external_by_name_set(
    conn: &Connection,
    name: &str,
    set_name: &str,
) -> EngineResult<Option<ExternalCard>> {
    let row = conn
        .query_row(
            "SELECT id, name, set_code, set_name, collector_number, rarity, eur
             FROM scry_cards
             WHERE LOWER(name) = LOWER(?) AND LOWER(set_name) = LOWER(?)
             ORDER BY id
             LIMIT 1",
            (name.trim(), set_name.trim()),
            external_from_row,
        )
        .optional()?;
    Ok(row)
}

fn external_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExternalCard> {
    Ok(ExternalCard {
        id: row.get(0)?,
        name: row.get(1)?,
        set_code: row.get(2)?,
        set_name: row.get(3)?,
        collector_number: row.get(4)?,
        rarity: row.get(5)?,
        eur: row.get(6)?,
        ..ExternalCard::default()
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSummary {
    pub code: String,
    pub name: String,
    pub released_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInfo {
    pub code: String,
    pub name: String,
    pub released_at: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCard {
    pub id: String,
    pub name: String,
    pub collector_number: Option<String>,
    pub rarity: Option<String>,
    pub eur: Option<f64>,
    pub eur_foil: Option<f64>,
    pub image_small: Option<String>,
    pub image_normal: Option<String>,
}

pub fn list_sets(conn: &Connection) -> EngineResult<Vec<SetSummary>> {
    let mut stmt = conn.prepare(
        "SELECT code, name, released_at
         FROM scry_sets
         ORDER BY released_at IS NULL, released_at DESC, name ASC",
    )?;
    let sets = stmt
        .query_map([], |row| {
            Ok(SetSummary {
                code: row.get(0)?,
                name: row.get(1)?,
                released_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sets)
}

pub fn set_info(conn: &Connection, code: &str) -> EngineResult<SetInfo> {
    let head: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT code, name, released_at FROM scry_sets WHERE code = ?",
            [code],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((code, name, released_at)) = head else {
        return Err(EngineError::NotFound(format!("set {code}")));
    };
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM scry_cards WHERE set_code = ?",
        [&code],
        |r| r.get(0),
    )?;
    Ok(SetInfo {
        code,
        name,
        released_at,
        count,
    })
}

/// Cards of one set. Collector numbers that start with a digit sort first,
/// by their integer prefix; the rest sort as text.
pub fn cards_by_set(conn: &Connection, code: &str) -> EngineResult<Vec<SetCard>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, collector_number, rarity, eur, eur_foil, image_small, image_normal
         FROM scry_cards
         WHERE set_code = ?
         ORDER BY
           (collector_number GLOB '[0-9]*') DESC,
           CAST(collector_number AS INTEGER) ASC,
           collector_number ASC",
    )?;
    let cards = stmt
        .query_map([code], |row| {
            Ok(SetCard {
                id: row.get(0)?,
                name: row.get(1)?,
                collector_number: row.get(2)?,
                rarity: row.get(3)?,
                eur: row.get(4)?,
                eur_foil: row.get(5)?,
                image_small: row.get(6)?,
                image_normal: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cards)
}
