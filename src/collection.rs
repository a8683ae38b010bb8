//! Ownership upsert engine.
//!
//! One `collection` row per owned card, carrying an aggregated quantity.
//! Writers lean on a UNIQUE constraint (card_id or scry_id) when the
//! workspace has one: insert first, and turn a unique violation into an
//! update of the row that won. Workspaces without that constraint fall
//! back to look-then-write.

use crate::catalog::{self, ExternalCard};
use crate::db::now_stamp;
use crate::error::{EngineError, EngineResult};
use crate::resolver::resolve_or_create_card;
use crate::schema::{CardsShape, CollectionShape, InsertBuilder, OwnedColumn, UpdateBuilder, COLLECTION};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Ways a caller can point at an owned card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardRef {
    /// Surrogate id of the ownership row itself.
    ById(i64),
    /// Local catalog card id.
    ByCardId(i64),
    /// External catalog id.
    ByExternalId(String),
    ByNameSet { name: String, set_name: String },
}

impl fmt::Display for CardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById(id) => write!(f, "collection row {id}"),
            Self::ByCardId(id) => write!(f, "card {id}"),
            Self::ByExternalId(id) => write!(f, "external card {id}"),
            Self::ByNameSet { name, set_name } => write!(f, "card {name} ({set_name})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    M,
    NM,
    EX,
    GD,
    LP,
    PL,
    PO,
}

impl Condition {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "M" => Some(Self::M),
            "NM" => Some(Self::NM),
            "EX" => Some(Self::EX),
            "GD" => Some(Self::GD),
            "LP" => Some(Self::LP),
            "PL" => Some(Self::PL),
            "PO" => Some(Self::PO),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M => "M",
            Self::NM => "NM",
            Self::EX => "EX",
            Self::GD => "GD",
            Self::LP => "LP",
            Self::PL => "PL",
            Self::PO => "PO",
        }
    }
}

/// Partial-update field: absent leaves the column alone, `Clear` writes NULL.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

#[derive(Debug, Clone, Default)]
pub struct DetailsPatch {
    pub paid_eur: Patch<f64>,
    pub condition: Patch<String>,
    pub comment: Patch<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub row_id: i64,
    pub merged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAddOutcome {
    pub row_id: i64,
    pub card_id: Option<i64>,
    pub created: bool,
    pub merged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExactOutcome {
    Added,
    Updated,
    Removed,
    /// Quantity 0 for a card that was not owned.
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactResult {
    pub outcome: ExactOutcome,
    pub removed: bool,
    pub row_id: Option<i64>,
}

impl ExactResult {
    fn new(outcome: ExactOutcome, row_id: Option<i64>) -> Self {
        Self {
            outcome,
            removed: outcome == ExactOutcome::Removed,
            row_id,
        }
    }
}

/// Values for a row that does not exist yet. Only the fields the live
/// schema has columns for are written.
#[derive(Debug, Clone, Default)]
struct NewOwnership {
    card_id: Option<i64>,
    scry_id: Option<String>,
    name: Option<String>,
    set_name: Option<String>,
    rarity: Option<String>,
    collector_number: Option<String>,
    last_eur: Option<f64>,
}

impl NewOwnership {
    fn from_external(card: &ExternalCard, card_id: Option<i64>) -> Self {
        Self {
            card_id,
            scry_id: card.id.clone(),
            name: card.usable_name().map(str::to_string),
            set_name: card.set_name.clone(),
            rarity: card.rarity.clone(),
            collector_number: card.collector_number.clone(),
            last_eur: card.current_eur(),
        }
    }

    /// References this row will be findable by, most specific first.
    fn lookup_refs(&self) -> Vec<CardRef> {
        let mut refs = Vec::new();
        if let Some(id) = self.card_id {
            refs.push(CardRef::ByCardId(id));
        }
        if let Some(sid) = &self.scry_id {
            refs.push(CardRef::ByExternalId(sid.clone()));
        }
        if let (Some(name), Some(set_name)) = (&self.name, &self.set_name) {
            refs.push(CardRef::ByNameSet {
                name: name.clone(),
                set_name: set_name.clone(),
            });
        }
        refs
    }

    fn insert(&self, conn: &Connection, shape: &CollectionShape, qty: i64) -> EngineResult<i64> {
        if shape.card_id_required && self.card_id.is_none() {
            return Err(EngineError::Schema(
                "collection requires card_id but none could be resolved".into(),
            ));
        }
        let mut ins = InsertBuilder::new();
        ins.push(shape.qty(), qty);
        let optional: [(OwnedColumn, Value); 7] = [
            (OwnedColumn::CardId, self.card_id.into()),
            (OwnedColumn::ScryId, self.scry_id.clone().into()),
            (OwnedColumn::Name, self.name.clone().into()),
            (OwnedColumn::SetName, self.set_name.clone().into()),
            (OwnedColumn::Rarity, self.rarity.clone().into()),
            (OwnedColumn::CollectorNumber, self.collector_number.clone().into()),
            (OwnedColumn::LastEur, self.last_eur.into()),
        ];
        for (col, value) in optional {
            if shape.has(col) && !matches!(value, Value::Null) {
                ins.push(col.name(), value);
            }
        }
        let stamp = now_stamp();
        ins.push_if(shape.has(OwnedColumn::AcquiredAt), "acquired_at", stamp.clone());
        ins.push_if(shape.has(OwnedColumn::UpdatedAt), "updated_at", stamp);

        ins.execute(conn, COLLECTION)
            .map_err(|e| EngineError::from_insert(COLLECTION, e))
    }
}

/// WHERE clause selecting the rows `card_ref` names, or `None` when the
/// schema has no column that could hold that key.
fn ref_predicate(shape: &CollectionShape, card_ref: &CardRef) -> Option<(String, Vec<Value>)> {
    match card_ref {
        CardRef::ById(id) => Some((format!("{} = ?", shape.row_id()), vec![Value::from(*id)])),
        CardRef::ByCardId(id) => shape
            .has(OwnedColumn::CardId)
            .then(|| ("card_id = ?".to_string(), vec![Value::from(*id)])),
        CardRef::ByExternalId(sid) => shape
            .has(OwnedColumn::ScryId)
            .then(|| ("scry_id = ?".to_string(), vec![Value::from(sid.clone())])),
        CardRef::ByNameSet { name, set_name } => {
            (shape.has(OwnedColumn::Name) && shape.has(OwnedColumn::SetName)).then(|| {
                (
                    "LOWER(TRIM(name)) = LOWER(TRIM(?)) AND LOWER(TRIM(set_name)) = LOWER(TRIM(?))"
                        .to_string(),
                    vec![Value::from(name.clone()), Value::from(set_name.clone())],
                )
            })
        }
    }
}

fn find_row(conn: &Connection, shape: &CollectionShape, card_ref: &CardRef) -> EngineResult<Option<i64>> {
    let Some((pred, args)) = ref_predicate(shape, card_ref) else {
        return Ok(None);
    };
    let sql = format!(
        "SELECT {rid} FROM {COLLECTION} WHERE {pred} ORDER BY {rid} LIMIT 1",
        rid = shape.row_id()
    );
    let id = conn
        .query_row(&sql, params_from_iter(args.iter()), |r| r.get(0))
        .optional()?;
    Ok(id)
}

fn bump_quantity(conn: &Connection, shape: &CollectionShape, row_id: i64, delta: i64) -> EngineResult<usize> {
    let sql = format!(
        "SELECT COALESCE({qty}, 0) FROM {COLLECTION} WHERE {rid} = ?",
        qty = shape.qty(),
        rid = shape.row_id()
    );
    let Some(current) = conn
        .query_row(&sql, [row_id], |r| r.get::<_, i64>(0))
        .optional()?
    else {
        return Ok(0);
    };
    let next = current
        .checked_add(delta)
        .filter(|n| *n <= MAX_QTY)
        .ok_or_else(|| EngineError::validation("qty", format!("total must be <= {MAX_QTY}")))?;
    write_quantity(conn, shape, row_id, next)
}

fn write_quantity(conn: &Connection, shape: &CollectionShape, row_id: i64, qty: i64) -> EngineResult<usize> {
    let mut upd = UpdateBuilder::new();
    upd.set(shape.qty(), qty);
    touch(&mut upd, shape);
    Ok(upd.execute(
        conn,
        COLLECTION,
        &format!("{} = ?", shape.row_id()),
        vec![Value::from(row_id)],
    )?)
}

fn touch(upd: &mut UpdateBuilder, shape: &CollectionShape) {
    if shape.has(OwnedColumn::UpdatedAt) {
        upd.set("updated_at", now_stamp());
    }
}

/// How a new row should be reconciled with one that already exists.
#[derive(Debug, Clone, Copy)]
enum Merge {
    Add(i64),
    Exact(i64),
}

impl Merge {
    fn qty(self) -> i64 {
        match self {
            Self::Add(q) | Self::Exact(q) => q,
        }
    }

    fn apply(self, conn: &Connection, shape: &CollectionShape, row_id: i64) -> EngineResult<usize> {
        match self {
            Self::Add(delta) => bump_quantity(conn, shape, row_id, delta),
            Self::Exact(qty) => write_quantity(conn, shape, row_id, qty),
        }
    }
}

/// Returns the row id and whether an existing row absorbed the write.
fn insert_or_merge(
    conn: &Connection,
    shape: &CollectionShape,
    seed: &NewOwnership,
    merge: Merge,
) -> EngineResult<(i64, bool)> {
    let constrained = (shape.card_id_unique && seed.card_id.is_some())
        || (shape.scry_id_unique && seed.scry_id.is_some());
    let refs = seed.lookup_refs();
    if !constrained {
        if let Some(first) = refs.first() {
            if let Some(row_id) = find_row(conn, shape, first)? {
                merge.apply(conn, shape, row_id)?;
                return Ok((row_id, true));
            }
        }
    }

    match seed.insert(conn, shape, merge.qty()) {
        Ok(row_id) => Ok((row_id, false)),
        Err(EngineError::Conflict { source, .. }) => {
            // The unique key may be card_id or scry_id; whichever row won
            // is reachable through one of the seed's keys.
            for card_ref in &refs {
                if let Some(row_id) = find_row(conn, shape, card_ref)? {
                    debug!(%card_ref, row_id, "unique conflict on insert; merging into existing row");
                    merge.apply(conn, shape, row_id)?;
                    return Ok((row_id, true));
                }
            }
            Err(EngineError::from_insert(COLLECTION, source))
        }
        Err(e) => Err(e),
    }
}

/// Builds the seed for a row that is about to be created from a reference.
/// External and name+set references go through the identity resolver so
/// the new row is linked to a local card.
fn seed_for_ref(conn: &Connection, shape: &CollectionShape, card_ref: &CardRef) -> EngineResult<NewOwnership> {
    match card_ref {
        CardRef::ById(_) => Err(EngineError::NotFound(card_ref.to_string())),
        CardRef::ByCardId(card_id) => {
            if !shape.has(OwnedColumn::CardId) {
                return Err(EngineError::Schema(
                    "collection has no card_id column".into(),
                ));
            }
            seed_from_card(conn, *card_id)
        }
        CardRef::ByExternalId(sid) => {
            let Some(card) = catalog::external_by_id(conn, sid)? else {
                return Err(EngineError::NotFound(card_ref.to_string()));
            };
            seed_from_external(conn, shape, &card).map(|(seed, _)| seed)
        }
        CardRef::ByNameSet { name, set_name } => {
            let card = catalog::external_by_name_set(conn, name, set_name)?.unwrap_or_else(|| {
                ExternalCard {
                    name: Some(name.clone()),
                    set_name: Some(set_name.clone()),
                    ..ExternalCard::default()
                }
            });
            seed_from_external(conn, shape, &card).map(|(seed, _)| seed)
        }
    }
}

fn seed_from_card(conn: &Connection, card_id: i64) -> EngineResult<NewOwnership> {
    let Some(shape) = CardsShape::load(conn) else {
        return Err(EngineError::Schema("cards table is missing".into()));
    };
    let set_expr = shape.set_label.unwrap_or("NULL");
    let rarity_expr = if shape.rarity { "rarity" } else { "NULL" };
    let number_expr = if shape.collector_number {
        "collector_number"
    } else {
        "NULL"
    };
    let sql = format!(
        "SELECT name, {set_expr}, {rarity_expr}, {number_expr} FROM cards WHERE id = ?"
    );
    let row: Option<(String, Option<String>, Option<String>, Option<String>)> = conn
        .query_row(&sql, [card_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .optional()?;
    let Some((name, set_name, rarity, collector_number)) = row else {
        return Err(EngineError::NotFound(format!("card {card_id}")));
    };
    let non_blank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
    Ok(NewOwnership {
        card_id: Some(card_id),
        name: non_blank(Some(name)),
        set_name: non_blank(set_name),
        rarity: non_blank(rarity),
        collector_number: non_blank(collector_number),
        ..NewOwnership::default()
    })
}

/// Resolves the local card (when the schema links rows to cards) and
/// returns the seed plus whether the card was created.
fn seed_from_external(
    conn: &Connection,
    shape: &CollectionShape,
    card: &ExternalCard,
) -> EngineResult<(NewOwnership, bool)> {
    if card.usable_name().is_none() {
        return Err(EngineError::Identity("card has no name".into()));
    }
    let resolved = if shape.has(OwnedColumn::CardId) {
        match resolve_or_create_card(conn, card) {
            Ok(r) => Some(r),
            Err(EngineError::Schema(_)) if !shape.card_id_required => None,
            Err(e) => return Err(e),
        }
    } else {
        None
    };
    let seed = NewOwnership::from_external(card, resolved.map(|r| r.card_id));
    Ok((seed, resolved.map(|r| r.created).unwrap_or(false)))
}

/// Upper bound on a single row's quantity. Keeps row values and the
/// collection-wide sums inside SQLite's integer range.
pub const MAX_QTY: i64 = 1_000_000_000;

fn positive_qty(qty: i64) -> EngineResult<i64> {
    if qty < 1 {
        return Err(EngineError::validation("qty", "must be >= 1"));
    }
    capped_qty(qty)
}

fn capped_qty(qty: i64) -> EngineResult<i64> {
    if qty > MAX_QTY {
        return Err(EngineError::validation("qty", format!("must be <= {MAX_QTY}")));
    }
    Ok(qty)
}

/// Adds `qty` copies of the referenced card, creating the row if needed.
pub fn add(conn: &Connection, card_ref: &CardRef, qty: i64) -> EngineResult<AddOutcome> {
    let qty = positive_qty(qty)?;
    let shape = CollectionShape::load(conn)?;

    if let CardRef::ById(row_id) = card_ref {
        if bump_quantity(conn, &shape, *row_id, qty)? == 0 {
            return Err(EngineError::NotFound(card_ref.to_string()));
        }
        return Ok(AddOutcome {
            row_id: *row_id,
            merged: true,
        });
    }

    let seed = seed_for_ref(conn, &shape, card_ref)?;
    let (row_id, merged) = insert_or_merge(conn, &shape, &seed, Merge::Add(qty))?;
    debug!(%card_ref, qty, row_id, merged, "collection add");
    Ok(AddOutcome { row_id, merged })
}

/// Resolves an external card to a local identity and adds it.
pub fn add_from_external(conn: &Connection, card: &ExternalCard, qty: i64) -> EngineResult<ExternalAddOutcome> {
    let qty = positive_qty(qty)?;
    let shape = CollectionShape::load(conn)?;
    let (seed, created) = seed_from_external(conn, &shape, card)?;
    let (row_id, merged) = insert_or_merge(conn, &shape, &seed, Merge::Add(qty))?;
    debug!(
        name = seed.name.as_deref().unwrap_or(""),
        qty,
        row_id,
        merged,
        created,
        "collection add from external"
    );
    Ok(ExternalAddOutcome {
        row_id,
        card_id: seed.card_id,
        created,
        merged,
    })
}

/// Sets the owned quantity to exactly `qty`. Zero (or less) removes the row.
pub fn set_exact_quantity(conn: &Connection, card_ref: &CardRef, qty: i64) -> EngineResult<ExactResult> {
    let qty = capped_qty(qty.max(0))?;
    let shape = CollectionShape::load(conn)?;

    if qty == 0 {
        let removed = delete_matching(conn, &shape, card_ref)?;
        let outcome = if removed > 0 {
            ExactOutcome::Removed
        } else {
            ExactOutcome::Absent
        };
        return Ok(ExactResult::new(outcome, None));
    }

    if let Some(row_id) = find_row(conn, &shape, card_ref)? {
        write_quantity(conn, &shape, row_id, qty)?;
        return Ok(ExactResult::new(ExactOutcome::Updated, Some(row_id)));
    }

    let seed = seed_for_ref(conn, &shape, card_ref)?;
    let (row_id, merged) = insert_or_merge(conn, &shape, &seed, Merge::Exact(qty))?;
    let outcome = if merged {
        ExactOutcome::Updated
    } else {
        ExactOutcome::Added
    };
    Ok(ExactResult::new(outcome, Some(row_id)))
}

/// Quantity change on an owned card (UI +/- controls). Never creates a row;
/// values below zero floor at zero, which removes the row.
pub fn update_quantity(conn: &Connection, card_ref: &CardRef, qty: i64) -> EngineResult<ExactResult> {
    let qty = capped_qty(qty.max(0))?;
    let shape = CollectionShape::load(conn)?;
    if qty == 0 {
        let removed = delete_matching(conn, &shape, card_ref)?;
        let outcome = if removed > 0 {
            ExactOutcome::Removed
        } else {
            ExactOutcome::Absent
        };
        return Ok(ExactResult::new(outcome, None));
    }
    let Some(row_id) = find_row(conn, &shape, card_ref)? else {
        return Err(EngineError::NotFound(card_ref.to_string()));
    };
    write_quantity(conn, &shape, row_id, qty)?;
    Ok(ExactResult::new(ExactOutcome::Updated, Some(row_id)))
}

/// Deletes the rows the reference names. Unknown references delete nothing.
pub fn remove(conn: &Connection, card_ref: &CardRef) -> EngineResult<usize> {
    let shape = CollectionShape::load(conn)?;
    delete_matching(conn, &shape, card_ref)
}

fn delete_matching(conn: &Connection, shape: &CollectionShape, card_ref: &CardRef) -> EngineResult<usize> {
    let Some((pred, args)) = ref_predicate(shape, card_ref) else {
        return Ok(0);
    };
    let changes = conn.execute(
        &format!("DELETE FROM {COLLECTION} WHERE {pred}"),
        params_from_iter(args.iter()),
    )?;
    debug!(%card_ref, changes, "collection remove");
    Ok(changes)
}

/// Partial update of paid price, condition and comment on one row. Fields
/// whose column does not exist in this workspace are ignored.
pub fn update_details(conn: &Connection, row_id: i64, patch: &DetailsPatch) -> EngineResult<usize> {
    let shape = CollectionShape::load(conn)?;
    let mut upd = UpdateBuilder::new();

    if shape.has(OwnedColumn::PaidEur) {
        match &patch.paid_eur {
            Patch::Keep => {}
            Patch::Clear => {
                upd.set("paid_eur", Value::Null);
            }
            Patch::Set(v) => {
                if !v.is_finite() || *v < 0.0 {
                    return Err(EngineError::validation("paidEur", "must be a number >= 0"));
                }
                upd.set("paid_eur", *v);
            }
        }
    }

    if shape.has(OwnedColumn::Condition) {
        match &patch.condition {
            Patch::Keep => {}
            Patch::Set(raw) if !raw.trim().is_empty() => {
                let Some(c) = Condition::parse(raw) else {
                    return Err(EngineError::validation(
                        "condition",
                        format!("{raw:?} is not one of M, NM, EX, GD, LP, PL, PO"),
                    ));
                };
                upd.set("condition", c.as_str().to_string());
            }
            Patch::Clear | Patch::Set(_) => {
                upd.set("condition", Value::Null);
            }
        }
    }

    if shape.has(OwnedColumn::Comment) {
        match &patch.comment {
            Patch::Keep => {}
            Patch::Set(text) if !text.trim().is_empty() => {
                upd.set("comment", text.trim().to_string());
            }
            Patch::Clear | Patch::Set(_) => {
                upd.set("comment", Value::Null);
            }
        }
    }

    if upd.is_empty() {
        return Ok(0);
    }
    touch(&mut upd, &shape);
    Ok(upd.execute(
        conn,
        COLLECTION,
        &format!("{} = ?", shape.row_id()),
        vec![Value::from(row_id)],
    )?)
}
