use crate::cards;
use crate::schema;
use anyhow::Context;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DB_FILE: &str = "cardvault.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

/// Opens (creating if needed) the workspace database. Returns the
/// connection and whether demo cards were seeded.
pub fn open_db(workspace: &Path, seed_demo: bool) -> anyhow::Result<(Connection, bool)> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let conn = Connection::open(db_path(workspace))?;
    init_schema(&conn)?;

    let seeded = if seed_demo {
        cards::seed_demo(&conn)?.inserted > 0
    } else {
        false
    };
    info!(workspace = %workspace.display(), seeded, "workspace opened");
    Ok((conn, seeded))
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cards(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            edition TEXT NOT NULL DEFAULT '',
            collector_number TEXT,
            rarity TEXT NOT NULL DEFAULT '',
            price_eur REAL NOT NULL DEFAULT 0,
            followed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cards_name_edition ON cards(name, edition)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scry_sets(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            released_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scry_cards(
            id TEXT PRIMARY KEY,
            oracle_id TEXT,
            name TEXT NOT NULL,
            set_code TEXT,
            set_name TEXT,
            collector_number TEXT,
            released_at TEXT,
            rarity TEXT,
            lang TEXT,
            usd REAL,
            usd_foil REAL,
            eur REAL,
            eur_foil REAL,
            image_small TEXT,
            image_normal TEXT,
            type_line TEXT,
            oracle_text TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scry_cards_name ON scry_cards(name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scry_cards_set ON scry_cards(set_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS collection(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            card_id INTEGER UNIQUE,
            scry_id TEXT,
            name TEXT,
            set_name TEXT,
            rarity TEXT,
            collector_number TEXT,
            qty INTEGER NOT NULL DEFAULT 1,
            paid_eur REAL,
            last_eur REAL,
            condition TEXT,
            comment TEXT,
            acquired_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(card_id) REFERENCES cards(id)
        )",
        [],
    )?;
    // Older workspaces may predate the detail columns. Only add what is safe
    // to add; anything else is handled by the schema-adaptive paths.
    ensure_collection_detail_columns(conn)?;
    if schema::has_column(conn, schema::COLLECTION, "scry_id") {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_collection_scry ON collection(scry_id)",
            [],
        )?;
    }

    Ok(())
}

fn ensure_collection_detail_columns(conn: &Connection) -> anyhow::Result<()> {
    for (column, ddl) in [
        ("condition", "ALTER TABLE collection ADD COLUMN condition TEXT"),
        ("comment", "ALTER TABLE collection ADD COLUMN comment TEXT"),
        ("updated_at", "ALTER TABLE collection ADD COLUMN updated_at TEXT"),
    ] {
        if !schema::has_column(conn, schema::COLLECTION, column) {
            conn.execute(ddl, [])
                .with_context(|| format!("failed to add collection.{column}"))?;
        }
    }
    Ok(())
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
