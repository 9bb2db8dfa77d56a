use crate::db;
use crate::fields::{FieldValue, TradeFields};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open journal database: {0}")]
    Open(String),
    #[error("journal storage unavailable: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored field order is corrupt: {0}")]
    FieldOrder(#[from] serde_json::Error),
}

impl StorageError {
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Open(_) => "db_open_failed",
            StorageError::Sqlite(_) | StorageError::FieldOrder(_) => "storage_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSource {
    Text,
    Json,
    #[default]
    Manual,
}

impl TradeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeSource::Text => "text",
            TradeSource::Json => "json",
            TradeSource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<TradeSource> {
        match s {
            "text" => Some(TradeSource::Text),
            "json" => Some(TradeSource::Json),
            "manual" => Some(TradeSource::Manual),
            _ => None,
        }
    }
}

/// A trade as the user is about to save it.
#[derive(Debug, Clone, Default)]
pub struct TradeDraft {
    pub fields: TradeFields,
    pub suggestion: Option<String>,
    pub comment: Option<String>,
    pub source: TradeSource,
    pub source_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedTrade {
    pub id: String,
    pub fields: TradeFields,
    pub suggestion: Option<String>,
    pub comment: Option<String>,
    pub source: TradeSource,
    pub source_name: Option<String>,
    pub saved_at: String,
}

/// Append-only journal of saved trades. One handle per open workspace.
pub struct TradeStore {
    conn: Connection,
}

impl TradeStore {
    pub fn open(workspace: &Path) -> Result<Self, StorageError> {
        let conn = db::open_db(workspace).map_err(|e| StorageError::Open(format!("{e:#}")))?;
        info!(workspace = %workspace.display(), "journal database opened");
        Ok(Self { conn })
    }

    pub fn append(&self, draft: &TradeDraft) -> Result<SavedTrade, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let saved_at = next_saved_at(&tx)?;

        let mut columns: Vec<String> = Vec::with_capacity(db::FIXED_COLUMNS.len() + draft.fields.len());
        let mut values: Vec<Value> = Vec::with_capacity(columns.capacity());
        let id = Uuid::new_v4().to_string();
        let order: Vec<&str> = draft.fields.iter().map(|(k, _)| k).collect();

        columns.extend(db::FIXED_COLUMNS.iter().map(|c| c.to_string()));
        values.push(Value::Text(id.clone()));
        values.push(Value::Text(draft.source.as_str().to_string()));
        values.push(opt_text(&draft.source_name));
        values.push(opt_text(&draft.suggestion));
        values.push(opt_text(&draft.comment));
        values.push(Value::Text(saved_at.clone()));
        values.push(Value::Text(serde_json::to_string(&order)?));

        for (label, value) in draft.fields.iter() {
            let (column, created) = db::ensure_field_column(&tx, label, &saved_at)?;
            if created {
                info!(label, column = %column, "journal column added");
            }
            columns.push(column);
            values.push(to_sql(value));
        }

        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO trades({}) VALUES({})",
            quoted.join(", "),
            placeholders
        );
        tx.execute(&sql, params_from_iter(values.iter()))?;
        tx.commit()?;

        debug!(id = %id, fields = draft.fields.len(), saved_at = %saved_at, "trade appended");
        Ok(SavedTrade {
            id,
            fields: draft.fields.clone(),
            suggestion: draft.suggestion.clone(),
            comment: draft.comment.clone(),
            source: draft.source,
            source_name: draft.source_name.clone(),
            saved_at,
        })
    }

    /// Every saved trade, newest `saved_at` first.
    pub fn list_all(&self) -> Result<Vec<SavedTrade>, StorageError> {
        let field_cols = db::field_columns(&self.conn)?;
        let mut select: Vec<String> = db::FIXED_COLUMNS.iter().map(|c| format!("\"{c}\"")).collect();
        select.extend(field_cols.iter().map(|fc| format!("\"{}\"", fc.column)));
        let sql = format!(
            "SELECT {} FROM trades ORDER BY saved_at DESC, rowid DESC",
            select.join(", ")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let fixed = db::FIXED_COLUMNS.len();
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            let order_text: String = row.get(6)?;
            let order: Vec<String> = serde_json::from_str(&order_text)?;

            let mut by_label: HashMap<&str, FieldValue> = HashMap::new();
            for (i, fc) in field_cols.iter().enumerate() {
                if let Some(v) = from_sql(row.get::<_, Value>(fixed + i)?) {
                    by_label.insert(fc.label.as_str(), v);
                }
            }

            let mut fields = TradeFields::new();
            for label in &order {
                if let Some(v) = by_label.remove(label.as_str()) {
                    fields.insert(label.clone(), v);
                }
            }
            // Columns filled outside field_order (older rows) go last.
            for fc in &field_cols {
                if let Some(v) = by_label.remove(fc.label.as_str()) {
                    fields.insert(fc.label.clone(), v);
                }
            }

            let source: String = row.get(1)?;
            out.push(SavedTrade {
                id: row.get(0)?,
                source: TradeSource::parse(&source).unwrap_or_default(),
                source_name: row.get(2)?,
                suggestion: row.get(3)?,
                comment: row.get(4)?,
                saved_at: row.get(5)?,
                fields,
            });
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))?)
    }
}

fn opt_text(v: &Option<String>) -> Value {
    match v {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

fn to_sql(v: &FieldValue) -> Value {
    match v {
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
    }
}

fn from_sql(v: Value) -> Option<FieldValue> {
    match v {
        Value::Null => None,
        Value::Integer(i) => Some(FieldValue::Number(i.into())),
        Value::Real(f) => serde_json::Number::from_f64(f).map(FieldValue::Number),
        Value::Text(s) => Some(FieldValue::Text(s)),
        Value::Blob(b) => Some(FieldValue::Text(String::from_utf8_lossy(&b).to_string())),
    }
}

/// Now, or one microsecond past the newest stored timestamp when the clock
/// has not moved past it. Keeps the latest append first in `list_all`.
fn next_saved_at(conn: &Connection) -> rusqlite::Result<String> {
    let now = Utc::now();
    let latest: Option<String> =
        conn.query_row("SELECT MAX(saved_at) FROM trades", [], |r| r.get(0))?;
    let latest = latest
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc));
    let ts = match latest {
        Some(prev) if prev >= now => prev + Duration::microseconds(1),
        _ => now,
    };
    Ok(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}
