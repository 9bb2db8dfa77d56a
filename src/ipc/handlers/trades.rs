use crate::blocks;
use crate::fields::{TradeFields, HEADER_KEY};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{file_label, param_str, require_store, trades_json, warnings_json};
use crate::ipc::types::{AppState, Request};
use crate::json_import;
use crate::store::{TradeDraft, TradeSource};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

struct Source {
    text: String,
    name: Option<String>,
}

/// Upload contents come either as a file path or as inline text.
fn read_source(req: &Request) -> Result<Source, serde_json::Value> {
    let name = param_str(req, "name").map(str::to_string);
    if let Some(path) = param_str(req, "path") {
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(err(
                &req.id,
                "not_found",
                "file not found",
                Some(json!({ "path": path.to_string_lossy() })),
            ));
        }
        let bytes = std::fs::read(&path).map_err(|e| {
            err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": path.to_string_lossy() })),
            )
        })?;
        return Ok(Source {
            text: String::from_utf8_lossy(&bytes).to_string(),
            name: name.or_else(|| Some(file_label(&path))),
        });
    }
    match req.params.get("text").and_then(|v| v.as_str()) {
        Some(text) => Ok(Source {
            text: text.to_string(),
            name,
        }),
        None => Err(err(&req.id, "bad_params", "missing path or text", None)),
    }
}

fn handle_trades_parse_text(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let src = match read_source(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let parsed = blocks::parse_trade_text(&src.text);
    if !parsed.warnings.is_empty() {
        info!(
            name = src.name.as_deref().unwrap_or("-"),
            dropped = parsed.warnings.len(),
            "trade text parsed with dropped lines"
        );
    }
    ok(
        &req.id,
        json!({
            "name": src.name,
            "trades": trades_json(&parsed.trades),
            "warnings": warnings_json(&parsed.warnings),
        }),
    )
}

fn handle_trades_parse_json(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let src = match read_source(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match json_import::parse_trade_json(&src.text) {
        Ok(parsed) => ok(
            &req.id,
            json!({
                "name": src.name,
                "trades": trades_json(&parsed.trades),
                "warnings": warnings_json(&parsed.warnings),
            }),
        ),
        Err(e) => err(
            &req.id,
            e.code(),
            format!("could not parse {} as JSON: {e}", src.name.as_deref().unwrap_or("input")),
            Some(json!({ "name": src.name })),
        ),
    }
}

/// One uploaded file of a batch. Failures stay local to the file.
fn import_one(path: &Path) -> serde_json::Value {
    let name = file_label(path);
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let outcome = match ext.as_str() {
        "json" => json_import::parse_trade_json_file(path)
            .map(|p| (p.trades, p.warnings))
            .map_err(|e| (e.code(), e.to_string())),
        "txt" => blocks::parse_trade_file(path)
            .map(|p| (p.trades, p.warnings))
            .map_err(|e| ("io_failed", format!("{e:#}"))),
        _ => Err((
            "unsupported_file",
            "only .json and .txt trade files are accepted".to_string(),
        )),
    };

    match outcome {
        Ok((trades, warnings)) => json!({
            "name": name,
            "path": path.to_string_lossy(),
            "kind": ext,
            "ok": true,
            "trades": trades_json(&trades),
            "warnings": warnings_json(&warnings),
        }),
        Err((code, message)) => {
            warn!(file = %name, code, error = %message, "trade file skipped");
            json!({
                "name": name,
                "path": path.to_string_lossy(),
                "kind": ext,
                "ok": false,
                "trades": [],
                "warnings": [],
                "error": { "code": code, "message": message },
            })
        }
    }
}

fn handle_trades_import_files(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(paths) = req.params.get("paths").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing paths", None);
    };

    let mut files = Vec::with_capacity(paths.len());
    for p in paths {
        let Some(p) = p.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "paths must be non-empty strings", None);
        };
        files.push(import_one(Path::new(p)));
    }

    let trade_count: usize = files
        .iter()
        .filter_map(|f| f.get("trades").and_then(|t| t.as_array()).map(|a| a.len()))
        .sum();
    let failed = files
        .iter()
        .filter(|f| f.get("ok").and_then(|v| v.as_bool()) == Some(false))
        .count();
    info!(files = files.len(), trades = trade_count, failed, "trade files imported");

    ok(
        &req.id,
        json!({ "files": files, "tradeCount": trade_count, "failedFiles": failed }),
    )
}

fn handle_trades_convert_text(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = param_str(req, "path").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing path", None);
    };
    let out = param_str(req, "outPath").map(PathBuf::from);

    match blocks::convert_text_file(&path, out.as_deref()) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": summary.out_path.to_string_lossy(),
                "tradeCount": summary.trade_count,
                "warnings": warnings_json(&summary.warnings),
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:#}"),
            Some(json!({ "path": path.to_string_lossy() })),
        ),
    }
}

fn fields_param(req: &Request, key: &str) -> Result<Option<TradeFields>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value::<TradeFields>(v.clone())
            .map(Some)
            .map_err(|e| err(&req.id, "bad_params", format!("{key}: {e}"), None)),
    }
}

// Annotation text is stored as typed; blank means absent.
fn note_param(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn handle_trades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match require_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let fields = match fields_param(req, "fields") {
        Ok(Some(f)) => f,
        Ok(None) => return err(&req.id, "bad_params", "missing fields", None),
        Err(resp) => return resp,
    };
    let fields = match fields_param(req, "edits") {
        Ok(Some(edits)) => fields.merged(&edits),
        Ok(None) => fields,
        Err(resp) => return resp,
    };

    let source = match param_str(req, "source") {
        None => TradeSource::Manual,
        Some(s) => match TradeSource::parse(s) {
            Some(v) => v,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "source must be one of: text, json, manual",
                    Some(json!({ "source": s })),
                )
            }
        },
    };

    let draft = TradeDraft {
        fields,
        suggestion: note_param(req, "suggestion"),
        comment: note_param(req, "comment"),
        source,
        source_name: param_str(req, "sourceName").map(str::to_string),
    };

    match store.append(&draft) {
        Ok(saved) => {
            info!(
                id = %saved.id,
                header = saved.fields.get_text(HEADER_KEY).unwrap_or("-"),
                source = saved.source.as_str(),
                fields = saved.fields.len(),
                "trade saved"
            );
            ok(&req.id, json!(saved))
        }
        Err(e) => {
            warn!(error = %e, "trade save failed");
            fail(&req.id, &e)
        }
    }
}

fn handle_trades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return ok(&req.id, json!({ "trades": [] }));
    };
    match store.list_all() {
        Ok(trades) => ok(&req.id, json!({ "trades": trades })),
        Err(e) => {
            warn!(error = %e, "trade list failed");
            fail(&req.id, &e)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "trades.parseText" => Some(handle_trades_parse_text(state, req)),
        "trades.parseJson" => Some(handle_trades_parse_json(state, req)),
        "trades.importFiles" => Some(handle_trades_import_files(state, req)),
        "trades.convertText" => Some(handle_trades_convert_text(state, req)),
        "trades.save" => Some(handle_trades_save(state, req)),
        "trades.list" => Some(handle_trades_list(state, req)),
        _ => None,
    }
}
