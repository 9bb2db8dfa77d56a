use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DB_FILE: &str = "trades.sqlite3";

/// Columns every trade row has. Field columns are added next to these as new
/// labels show up.
pub const FIXED_COLUMNS: [&str; 7] = [
    "id",
    "source",
    "source_name",
    "suggestion",
    "comment",
    "saved_at",
    "field_order",
];

// Names SQLite treats specially, on top of the fixed columns.
const RESERVED_NAMES: [&str; 3] = ["rowid", "oid", "_rowid_"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldColumn {
    pub label: String,
    pub column: String,
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;

    // Field columns are appended with ALTER TABLE and declared without a
    // type, so SQLite keeps text as text and numbers as numbers.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS trades(
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_name TEXT,
            suggestion TEXT,
            comment TEXT,
            saved_at TEXT NOT NULL,
            field_order TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trades_saved_at ON trades(saved_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trade_columns(
            label TEXT PRIMARY KEY,
            column_name TEXT NOT NULL UNIQUE,
            added_at TEXT NOT NULL
        )",
        [],
    )?;

    ensure_trades_field_order(&conn)?;
    repair_field_columns(&conn)?;

    Ok(conn)
}

fn ensure_trades_field_order(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "trades", "field_order")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE trades ADD COLUMN field_order TEXT NOT NULL DEFAULT '[]'",
        [],
    )?;
    Ok(())
}

// A restored backup can carry column registrations whose table column went
// missing; re-add them so reads never hit "no such column".
fn repair_field_columns(conn: &Connection) -> anyhow::Result<()> {
    for fc in field_columns(conn)? {
        if !table_has_column(conn, "trades", &fc.column)? {
            conn.execute(&add_column_sql(&fc.column), [])?;
        }
    }
    Ok(())
}

/// Registered field columns in the order they were first added.
pub fn field_columns(conn: &Connection) -> rusqlite::Result<Vec<FieldColumn>> {
    let mut stmt = conn.prepare("SELECT label, column_name FROM trade_columns ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(FieldColumn {
                label: row.get(0)?,
                column: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Column holding `label`, adding and registering it on first use.
/// Returns the column name and whether it was created by this call.
pub fn ensure_field_column(
    conn: &Connection,
    label: &str,
    now: &str,
) -> rusqlite::Result<(String, bool)> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT column_name FROM trade_columns WHERE label = ?",
            [label],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(column) = existing {
        return Ok((column, false));
    }

    let taken: HashSet<String> = field_columns(conn)?
        .into_iter()
        .map(|fc| fc.column)
        .collect();
    let column = column_name_for(label, &taken);

    conn.execute(&add_column_sql(&column), [])?;
    conn.execute(
        "INSERT INTO trade_columns(label, column_name, added_at) VALUES(?, ?, ?)",
        (label, &column, now),
    )?;
    Ok((column, true))
}

fn add_column_sql(column: &str) -> String {
    format!("ALTER TABLE trades ADD COLUMN \"{}\"", column)
}

/// snake_case column name for a free-form label, unique against `taken`,
/// the fixed columns and SQLite's rowid aliases.
///
/// "Est regulatory fees" -> est_regulatory_fees, "qtyPrice" -> qty_price,
/// "Quantity + Price" -> quantity_price.
pub fn column_name_for(label: &str, taken: &HashSet<String>) -> String {
    let mut base = String::new();
    let mut prev_lower = false;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower {
                base.push('_');
            }
            base.push(ch.to_ascii_lowercase());
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        } else {
            if !base.ends_with('_') && !base.is_empty() {
                base.push('_');
            }
            prev_lower = false;
        }
    }
    let mut base = base.trim_end_matches('_').to_string();
    if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
        base = format!("field_{base}").trim_end_matches('_').to_string();
    }

    let is_free = |name: &str| {
        !taken.contains(name) && !FIXED_COLUMNS.contains(&name) && !RESERVED_NAMES.contains(&name)
    };
    if is_free(&base) {
        return base;
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{base}_{n}");
        if is_free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
