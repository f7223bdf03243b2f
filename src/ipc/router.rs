use std::time::Instant;

use super::handlers;
use super::types::{AppState, Request};
use crate::error::AppError;
use crate::ipc::error::err;
use tracing::info;

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[Handler] = &[
    handlers::core::try_handle,
    handlers::auth::try_handle,
    handlers::schools::try_handle,
    handlers::teachers::try_handle,
    handlers::students::try_handle,
    handlers::parents::try_handle,
    handlers::dashboard::try_handle,
];

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    for handler in HANDLERS {
        if let Some(resp) = handler(state, req) {
            return resp;
        }
    }
    err(
        &req.id,
        &AppError::not_found(format!("unknown method: {}", req.method)),
    )
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let started = Instant::now();
    let resp = dispatch(state, &req);
    info!(
        method = %req.method,
        status = resp.get("status").and_then(|s| s.as_u64()).unwrap_or(0),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    resp
}
