use crate::auth::{self, Registration};
use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{authenticate, db_conn, parse_params, required_text, token_keys, Empty};
use crate::ipc::types::{AppState, HandlerResult, Reply, Request};
use crate::policy::Role;
use crate::store;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterInput {
    name: String,
    email: String,
    password: String,
    role: String,
}

fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = required_text("email", raw)?.to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::invalid_input("email is not valid")),
    }
}

fn handle_register(state: &mut AppState, req: &Request) -> HandlerResult {
    let input: RegisterInput = parse_params(req)?;
    let name = required_text("name", &input.name)?;
    let email = normalize_email(&input.email)?;
    if input.password.is_empty() {
        return Err(AppError::invalid_input("password must not be empty"));
    }
    let role = Role::parse(&input.role)
        .ok_or_else(|| AppError::invalid_input(format!("unknown role '{}'", input.role)))?;

    // Anonymous registration is allowed; a supplied token must still be valid.
    let caller = match req.authorization.as_deref() {
        Some(_) => Some(authenticate(state, req)?),
        None => None,
    };
    let conn = db_conn(state)?;
    let user = auth::register(
        conn,
        caller.as_ref(),
        Registration {
            name: &name,
            email: &email,
            password: &input.password,
            role,
        },
    )?;
    Ok(Reply::new("user created", json!(user)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoginInput {
    email: String,
    password: String,
}

fn handle_login(state: &mut AppState, req: &Request) -> HandlerResult {
    let input: LoginInput = parse_params(req)?;
    let email = normalize_email(&input.email)?;
    if input.password.is_empty() {
        return Err(AppError::invalid_input("password must not be empty"));
    }
    let keys = token_keys(state)?;
    let conn = db_conn(state)?;
    let session = auth::login(conn, &keys, &email, &input.password)?;
    Ok(Reply::new(
        "login successful",
        json!({
            "accessToken": session.access_token,
            "refreshToken": session.refresh_token,
            "user": session.user,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RefreshInput {
    refresh_token: String,
}

fn handle_refresh(state: &mut AppState, req: &Request) -> HandlerResult {
    let input: RefreshInput = parse_params(req)?;
    let token = required_text("refreshToken", &input.refresh_token)?;
    let keys = token_keys(state)?;
    let conn = db_conn(state)?;
    let access = auth::refresh(conn, &keys, &token)?;
    Ok(Reply::new("token refreshed", json!({ "accessToken": access })))
}

fn handle_me(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    let conn = db_conn(state)?;
    let user = store::user_by_id(conn, principal.user_id)?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Reply::new("current user", json!(user)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ChangePasswordInput {
    old_password: String,
    new_password: String,
}

fn handle_change_password(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: ChangePasswordInput = parse_params(req)?;
    if input.old_password.is_empty() || input.new_password.is_empty() {
        return Err(AppError::invalid_input(
            "oldPassword and newPassword are required",
        ));
    }
    let conn = db_conn(state)?;
    auth::change_password(conn, &principal, &input.old_password, &input.new_password)?;
    Ok(Reply::new("password changed", serde_json::Value::Null))
}

// Tokens are stateless; the client drops its session context.
fn handle_logout(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    tracing::info!(user_id = principal.user_id, "logout");
    Ok(Reply::new("logged out", serde_json::Value::Null))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.register" => handle_register(state, req),
        "auth.login" => handle_login(state, req),
        "auth.refresh" => handle_refresh(state, req),
        "auth.me" => handle_me(state, req),
        "auth.changePassword" => handle_change_password(state, req),
        "auth.logout" => handle_logout(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
