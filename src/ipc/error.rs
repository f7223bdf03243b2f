use crate::error::AppError;
use crate::ipc::types::{HandlerResult, Request};
use serde_json::json;
use tracing::{error, warn};

pub fn ok(id: &str, message: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "success": true,
        "status": 200,
        "message": message,
        "data": data,
    })
}

pub fn err(id: &str, e: &AppError) -> serde_json::Value {
    match e {
        AppError::Fault(inner) => error!(request_id = id, error = ?inner, "request failed"),
        AppError::Unauthenticated(_) | AppError::InvalidCredential(_) => {
            warn!(request_id = id, reason = %e, "credential rejected")
        }
        _ => {}
    }
    json!({
        "id": id,
        "success": false,
        "status": e.status(),
        "code": e.code(),
        "message": e.public_message(),
        "data": null,
    })
}

pub fn respond(req: &Request, result: HandlerResult) -> serde_json::Value {
    match result {
        Ok(reply) => ok(&req.id, &reply.message, reply.data),
        Err(e) => err(&req.id, &e),
    }
}
