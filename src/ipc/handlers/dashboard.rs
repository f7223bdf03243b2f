use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{authenticate, db_conn, parse_params, Empty};
use crate::ipc::types::{AppState, HandlerResult, Reply, Request};
use crate::policy::{self, Role};
use crate::store;
use serde_json::json;

fn handle_overview(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    policy::require_role(&principal, &[Role::Admin])?;
    let conn = db_conn(state)?;
    Ok(Reply::new("dashboard overview", json!(store::totals(conn)?)))
}

fn handle_school_stats(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    policy::require_role(&principal, &[Role::Manager])?;
    let conn = db_conn(state)?;
    let school = store::school_by_manager(conn, principal.user_id)?
        .ok_or_else(|| AppError::not_found("no school is linked to this manager"))?;
    Ok(Reply::new(
        "school statistics",
        json!(store::school_stats(conn, &school)?),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.overview" => handle_overview(state, req),
        "dashboard.schoolStats" => handle_school_stats(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
