use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::{self, FieldColumn, DB_FILE};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/trades.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "tradejournal-workspace-v1";
pub const PLAIN_SQLITE_FORMAT: &str = "sqlite3";

/// `manifest.json` of a journal bundle. It describes the database it ships
/// with, and import refuses a database that disagrees with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    app_version: String,
    exported_at: String,
    source_workspace: String,
    db_sha256: String,
    trade_count: i64,
    columns: Vec<FieldColumn>,
}

#[derive(Debug, Clone)]
struct JournalShape {
    trade_count: i64,
    columns: Vec<FieldColumn>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub trade_count: i64,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub trade_count: i64,
    pub column_count: usize,
}

/// Writes the journal of `workspace_path` to a zip bundle at `out_path`.
/// The database is copied with `VACUUM INTO`, so an open store handle does
/// not need to be closed first.
pub fn export_journal_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = db::db_path(workspace_path);
    if !db_path.is_file() {
        bail!("journal database not found: {}", db_path.to_string_lossy());
    }
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let snapshot = out_path.with_extension("snapshot.sqlite3");
    let _ = std::fs::remove_file(&snapshot);
    {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
        let target = snapshot.to_string_lossy().to_string();
        conn.execute("VACUUM INTO ?1", [&target])
            .context("failed to snapshot journal database")?;
    }

    let written = write_bundle(workspace_path, &snapshot, out_path);
    let _ = std::fs::remove_file(&snapshot);
    written
}

fn write_bundle(
    workspace_path: &Path,
    snapshot: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let shape = inspect_journal(snapshot)?;
    let db_bytes = std::fs::read(snapshot).context("failed to read journal snapshot")?;
    let db_sha256 = sha256_hex(&db_bytes);

    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        source_workspace: workspace_path.to_string_lossy().to_string(),
        db_sha256: db_sha256.clone(),
        trade_count: shape.trade_count,
        columns: shape.columns,
    };
    let manifest_bytes =
        serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;

    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create bundle {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let entries = [(MANIFEST_ENTRY, manifest_bytes), (DB_ENTRY, db_bytes)];
    for (name, body) in &entries {
        zip.start_file(*name, opts)
            .with_context(|| format!("failed to add {name} to bundle"))?;
        zip.write_all(body)
            .with_context(|| format!("failed to write {name}"))?;
    }
    zip.finish().context("failed to finalize bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: entries.len(),
        trade_count: shape.trade_count,
        db_sha256,
    })
}

/// Replaces the journal of `workspace_path` with the one in `in_path`, which
/// is either a bundle or a bare journal database. Nothing is replaced unless
/// the incoming database checks out. The caller must drop any open store of
/// the workspace first.
pub fn import_journal_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!("failed to create workspace {}", workspace_path.to_string_lossy())
    })?;

    let staged = workspace_path.join(format!("{DB_FILE}.importing"));
    let _ = std::fs::remove_file(&staged);
    let (format, shape) = match stage_import(in_path, &staged) {
        Ok(v) => v,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }
    };

    let dst = db::db_path(workspace_path);
    if dst.exists() {
        std::fs::remove_file(&dst)
            .with_context(|| format!("failed to remove {}", dst.to_string_lossy()))?;
    }
    std::fs::rename(&staged, &dst)
        .with_context(|| format!("failed to move restored journal to {}", dst.to_string_lossy()))?;

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
        trade_count: shape.trade_count,
        column_count: shape.columns.len(),
    })
}

fn stage_import(in_path: &Path, staged: &Path) -> anyhow::Result<(&'static str, JournalShape)> {
    if !is_zip_file(in_path)? {
        std::fs::copy(in_path, staged)
            .with_context(|| format!("failed to copy {}", in_path.to_string_lossy()))?;
        return Ok((PLAIN_SQLITE_FORMAT, inspect_journal(staged)?));
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let manifest: Manifest = serde_json::from_reader(
        archive
            .by_name(MANIFEST_ENTRY)
            .context("bundle missing manifest.json")?,
    )
    .context("manifest.json does not describe a trade journal")?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .with_context(|| format!("bundle missing {DB_ENTRY}"))?
        .read_to_end(&mut db_bytes)
        .context("failed to extract journal database")?;
    let actual = sha256_hex(&db_bytes);
    if !actual.eq_ignore_ascii_case(&manifest.db_sha256) {
        bail!(
            "database checksum mismatch: manifest {}, bundle {}",
            manifest.db_sha256,
            actual
        );
    }

    std::fs::write(staged, &db_bytes)
        .with_context(|| format!("failed to write {}", staged.to_string_lossy()))?;
    let shape = inspect_journal(staged)?;
    if shape.trade_count != manifest.trade_count {
        bail!(
            "bundle holds {} trade(s) but its manifest lists {}",
            shape.trade_count,
            manifest.trade_count
        );
    }
    if shape.columns != manifest.columns {
        bail!("field columns in the bundle do not match its manifest");
    }
    Ok((BUNDLE_FORMAT_V1, shape))
}

/// Trade count and field-column registry of a journal database. Fails for
/// anything that is not one.
fn inspect_journal(path: &Path) -> anyhow::Result<JournalShape> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    for table in ["trades", "trade_columns"] {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |r| r.get(0),
            )
            .optional()
            .context("not a SQLite database")?;
        if found.is_none() {
            bail!("not a trade journal: table {table} is missing");
        }
    }
    let columns = db::field_columns(&conn)?;
    let trade_count = conn.query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))?;
    Ok(JournalShape {
        trade_count,
        columns,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    Ok(read == 4 && sig == *b"PK\x03\x04")
}
