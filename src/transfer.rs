use crate::collection::{set_exact_quantity, CardRef, ExactOutcome};
use crate::csv_codec::{self, EXPORT_HEADER};
use crate::error::EngineError;
use crate::valuation::list_detailed;
use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub path: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub ignored: usize,
}

pub fn export_csv(conn: &Connection, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let rows = list_detailed(conn)?;

    let mut text = String::new();
    text.push(csv_codec::BOM);
    text.push_str(&csv_codec::encode_record(&EXPORT_HEADER));
    for r in &rows {
        let fields = [
            r.card_id.map(|id| id.to_string()).unwrap_or_default(),
            r.quantity.to_string(),
            r.name.clone(),
            r.set_name.clone(),
            r.rarity.clone(),
            csv_codec::format_price(Some(r.price_eur)),
            csv_codec::format_price(r.paid_eur),
            r.condition.clone().unwrap_or_default(),
        ];
        text.push_str(&csv_codec::encode_record(&fields));
    }

    std::fs::write(out_path, text)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    info!(path = %out_path.display(), rows = rows.len(), "collection exported");
    Ok(ExportSummary {
        path: out_path.to_string_lossy().to_string(),
        row_count: rows.len(),
    })
}

/// Identity of one import row. A blank `card_id` (rows never linked to a
/// local card) falls back to the exported name and set label.
fn row_ref(
    fields: &[String],
    id_col: usize,
    name_col: Option<usize>,
    set_col: Option<usize>,
) -> Option<CardRef> {
    let raw_id = fields.get(id_col).map(|v| v.trim()).unwrap_or("");
    if !raw_id.is_empty() {
        return csv_codec::parse_card_id(raw_id).map(CardRef::ByCardId);
    }
    let cell = |col: Option<usize>| {
        col.and_then(|c| fields.get(c))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };
    Some(CardRef::ByNameSet {
        name: cell(name_col)?.to_string(),
        set_name: cell(set_col)?.to_string(),
    })
}

/// Applies a CSV file as the source of truth for the quantities it lists.
/// Each row commits on its own; a bad row is counted as ignored and the
/// rest still apply. A missing `card_id` or `quantity` header aborts the
/// whole import.
pub fn import_csv(conn: &Connection, in_path: &Path) -> anyhow::Result<ImportSummary> {
    let raw = std::fs::read_to_string(in_path)
        .with_context(|| format!("failed to read {}", in_path.to_string_lossy()))?;
    let text = csv_codec::normalize_newlines(csv_codec::strip_bom(&raw));

    let header_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let delimiter = csv_codec::detect_delimiter(header_line);
    let mut records = csv_codec::parse_records(&text, delimiter).into_iter();

    let Some(header) = records.next() else {
        return Err(EngineError::validation("csv", "file has no header row").into());
    };
    let Some(id_col) = csv_codec::find_column(&header.fields, "card_id") else {
        return Err(EngineError::validation("csv", "missing required column card_id").into());
    };
    let Some(qty_col) = csv_codec::find_column(&header.fields, "quantity") else {
        return Err(EngineError::validation("csv", "missing required column quantity").into());
    };

    let name_col = csv_codec::find_column(&header.fields, "name");
    let set_col = csv_codec::find_column(&header.fields, "set_name");

    let mut summary = ImportSummary::default();
    for rec in records {
        let card_ref = row_ref(&rec.fields, id_col, name_col, set_col);
        let qty = rec
            .fields
            .get(qty_col)
            .and_then(|v| csv_codec::parse_quantity(v));
        let (Some(card_ref), Some(qty)) = (card_ref, qty) else {
            debug!(line = rec.line_no, "csv row ignored: bad card reference or quantity");
            summary.ignored += 1;
            continue;
        };

        let tx = conn.unchecked_transaction().map_err(EngineError::from)?;
        match set_exact_quantity(&tx, &card_ref, qty) {
            Ok(res) => {
                tx.commit().map_err(EngineError::from)?;
                match res.outcome {
                    ExactOutcome::Added => summary.added += 1,
                    ExactOutcome::Updated => summary.updated += 1,
                    ExactOutcome::Removed => summary.removed += 1,
                    ExactOutcome::Absent => summary.ignored += 1,
                }
            }
            Err(e) => {
                // Dropping the transaction rolls the row back.
                debug!(line = rec.line_no, %card_ref, error = %e, "csv row ignored");
                summary.ignored += 1;
            }
        }
    }

    info!(
        path = %in_path.display(),
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        ignored = summary.ignored,
        "collection imported"
    );
    Ok(summary)
}
