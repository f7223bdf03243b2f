//! Identity: bearer token verification plus the credential lifecycle
//! (registration, login, refresh, password change).

pub mod password;
pub mod token;

pub use token::{TokenKeys, TokenKind};

use crate::error::{AppError, AppResult};
use crate::policy::Role;
use crate::store::{self, NewUser, UserRow};
use rusqlite::Connection;
use tracing::{info, warn};

/// The authenticated actor a request runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    /// Kept as the raw claim; the policy decides what it is worth.
    pub role: String,
}

/// Accepts `Bearer <token>` or a bare token.
pub fn bearer_token(credential: Option<&str>) -> AppResult<&str> {
    let raw = credential
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthenticated("missing bearer token"))?;
    let token = match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return Err(AppError::unauthenticated("unsupported authorization scheme")),
        None => raw,
    };
    if token.is_empty() {
        return Err(AppError::unauthenticated("missing bearer token"));
    }
    Ok(token)
}

pub fn resolve(keys: &TokenKeys, credential: Option<&str>) -> AppResult<Principal> {
    let token = bearer_token(credential)?;
    let claims = keys.verify(TokenKind::Access, token)?;
    let role = claims
        .role
        .ok_or_else(|| AppError::unauthenticated("access token carries no role"))?;
    Ok(Principal {
        user_id: claims.id,
        role,
    })
}

#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserRow,
}

pub fn login(conn: &Connection, keys: &TokenKeys, email: &str, secret: &str) -> AppResult<Session> {
    let user = store::user_by_email(conn, email)?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    if !password::verify_password(secret, &user.password_hash) {
        warn!(user_id = user.id, "login rejected: wrong password");
        return Err(AppError::InvalidCredential("invalid password".into()));
    }
    let access_token = keys.mint(TokenKind::Access, user.id, Some(&user.role))?;
    let refresh_token = keys.mint(TokenKind::Refresh, user.id, None)?;
    info!(user_id = user.id, role = %user.role, "login succeeded");
    Ok(Session {
        access_token,
        refresh_token,
        user,
    })
}

/// New access token from a refresh token. The role is re-read from the user
/// row, never carried over from the old token.
pub fn refresh(conn: &Connection, keys: &TokenKeys, refresh_token: &str) -> AppResult<String> {
    let claims = keys.verify(TokenKind::Refresh, refresh_token.trim())?;
    let user = store::user_by_id(conn, claims.id)?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    let token = keys.mint(TokenKind::Access, user.id, Some(&user.role))?;
    info!(user_id = user.id, "access token refreshed");
    Ok(token)
}

pub fn change_password(
    conn: &Connection,
    principal: &Principal,
    old_secret: &str,
    new_secret: &str,
) -> AppResult<()> {
    let user = store::user_by_id(conn, principal.user_id)?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    if !password::verify_password(old_secret, &user.password_hash) {
        warn!(user_id = user.id, "password change rejected: old password mismatch");
        return Err(AppError::InvalidCredential("old password is incorrect".into()));
    }
    store::set_password_hash(conn, user.id, &password::hash_password(new_secret)?)?;
    info!(user_id = user.id, "password changed");
    Ok(())
}

pub struct Registration<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub role: Role,
}

/// Admin accounts can only be created by an admin, except for the very first
/// account in an empty workspace.
pub fn register(
    conn: &Connection,
    caller: Option<&Principal>,
    reg: Registration<'_>,
) -> AppResult<UserRow> {
    if reg.role == Role::Admin {
        let caller_is_admin = caller.is_some_and(|p| Role::parse(&p.role) == Some(Role::Admin));
        if !caller_is_admin && store::count_users(conn)? > 0 {
            return Err(AppError::forbidden("only an admin may register another admin"));
        }
    }
    if store::user_by_email(conn, reg.email)?.is_some() {
        return Err(AppError::conflict("a user with this email already exists"));
    }
    let id = store::insert_user(
        conn,
        &NewUser {
            name: reg.name.to_string(),
            email: reg.email.to_string(),
            password_hash: password::hash_password(reg.password)?,
            role: reg.role.as_str().to_string(),
        },
    )?;
    let user = store::user_by_id(conn, id)?
        .ok_or_else(|| AppError::Fault(anyhow::anyhow!("user {id} vanished after insert")))?;
    info!(user_id = user.id, role = %user.role, "user registered");
    Ok(user)
}
