use crate::db;
use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::parse_params;
use crate::ipc::types::{AppState, HandlerResult, Reply, Request};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(Reply::new(
        "SmartQ API is running",
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "tokensConfigured": state.config.jwt_secret.is_some() && state.config.jwt_refresh_secret.is_some(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkspaceSelect {
    path: String,
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let input: WorkspaceSelect = parse_params(req)?;
    if input.path.trim().is_empty() {
        return Err(AppError::invalid_input("path must not be empty"));
    }
    let path = PathBuf::from(input.path);
    let conn = db::open_db(&path)?;
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    info!(workspace = %path.display(), "workspace opened");
    Ok(Reply::new(
        "workspace opened",
        json!({ "workspacePath": path.to_string_lossy() }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
