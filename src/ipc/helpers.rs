use crate::blocks::ParseWarning;
use crate::fields::TradeFields;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::TradeStore;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Trimmed, non-empty string param.
pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn require_store<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a TradeStore, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// `params.workspacePath`, falling back to the selected workspace.
pub fn workspace_param(state: &AppState, req: &Request) -> Option<PathBuf> {
    param_str(req, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
}

pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Parsed trades as the UI renders them: the fields plus the expected labels
/// each one lacks.
pub fn trades_json(trades: &[TradeFields]) -> serde_json::Value {
    json!(trades
        .iter()
        .map(|t| json!({ "fields": t, "missing": t.missing_expected() }))
        .collect::<Vec<_>>())
}

pub fn warnings_json(warnings: &[ParseWarning]) -> serde_json::Value {
    json!(warnings)
}
