use crate::auth::{self, Principal, TokenKeys};
use crate::error::{AppError, AppResult};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Filter, Linkage, Resource, Role, Subject};
use crate::store::{self, ParentRow};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Empty {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdInput {
    pub id: i64,
}

pub fn db_conn(state: &AppState) -> AppResult<&Connection> {
    state.db.as_ref().ok_or(AppError::NoWorkspace)
}

pub fn token_keys(state: &AppState) -> AppResult<TokenKeys> {
    TokenKeys::from_config(&state.config)
}

pub fn authenticate(state: &AppState, req: &Request) -> AppResult<Principal> {
    let keys = token_keys(state)?;
    auth::resolve(&keys, req.authorization.as_deref())
}

/// Deserializes `params` into the operation's input struct. Absent params
/// count as an empty object.
pub fn parse_params<T: DeserializeOwned>(req: &Request) -> AppResult<T> {
    let raw = if req.params.is_null() {
        serde_json::json!({})
    } else {
        req.params.clone()
    };
    serde_json::from_value(raw).map_err(|e| AppError::invalid_input(format!("invalid params: {e}")))
}

pub fn required_text(field: &str, value: &str) -> AppResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::invalid_input(format!("{field} must not be empty")));
    }
    Ok(v.to_string())
}

pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A user referenced as the login of a new linking row must exist, carry the
/// matching role and not be linked to another row already.
pub fn check_user_link(conn: &Connection, user_id: i64, role: Role) -> AppResult<()> {
    let user = store::user_by_id(conn, user_id)?
        .ok_or_else(|| AppError::not_found(format!("user {user_id} not found")))?;
    if user.role != role.as_str() {
        return Err(AppError::invalid_input(format!(
            "user {user_id} does not have role '{}'",
            role.as_str()
        )));
    }
    let linked = match role {
        Role::Teacher => store::teacher_by_user(conn, user_id)?.is_some(),
        Role::Student => store::student_by_user(conn, user_id)?.is_some(),
        Role::Parent => store::parent_by_user(conn, user_id)?.is_some(),
        Role::Admin | Role::Manager => false,
    };
    if linked {
        return Err(AppError::conflict(format!(
            "user {user_id} is already linked to a {}",
            role.as_str()
        )));
    }
    Ok(())
}

/// `{id, name}` of a school when the caller may see it, otherwise null.
pub fn school_brief(
    conn: &Connection,
    principal: &Principal,
    link: &Linkage,
    school_id: i64,
) -> AppResult<serde_json::Value> {
    let Some(filter) = policy::scope_if_readable(principal, Resource::School, link)? else {
        return Ok(serde_json::Value::Null);
    };
    if !filter.matches(&Subject::School { id: school_id }) {
        return Ok(serde_json::Value::Null);
    }
    Ok(match store::school_by_id(conn, school_id)? {
        Some(s) => json!({ "id": s.id, "name": s.name }),
        None => serde_json::Value::Null,
    })
}

/// The parent row if it falls inside `parent_scope`.
pub fn visible_parent(
    conn: &Connection,
    parent_scope: Option<&Filter>,
    parent_id: i64,
) -> AppResult<Option<ParentRow>> {
    let Some(filter) = parent_scope else {
        return Ok(None);
    };
    let Some(parent) = store::parent_by_id(conn, parent_id)? else {
        return Ok(None);
    };
    let kids = store::parent_student_facts(conn, parent.id)?;
    let subject = Subject::Parent {
        id: parent.id,
        students: &kids,
    };
    Ok(filter.matches(&subject).then_some(parent))
}

/// Students inside the caller's scope, narrowed by `within`, each with its
/// parent embedded when the caller may see that parent too.
pub fn scoped_students(
    conn: &Connection,
    principal: &Principal,
    link: &Linkage,
    within: store::Within,
) -> AppResult<Vec<serde_json::Value>> {
    let Some(filter) = policy::scope_if_readable(principal, Resource::Student, link)? else {
        return Ok(Vec::new());
    };
    let parent_scope = policy::scope_if_readable(principal, Resource::Parent, link)?;
    let mut out = Vec::new();
    for s in store::list_students(conn, &filter, within)? {
        let parent = match s.parent_id {
            Some(pid) => visible_parent(conn, parent_scope.as_ref(), pid)?,
            None => None,
        };
        let mut v = json!(s);
        v["parent"] = json!(parent);
        out.push(v);
    }
    Ok(out)
}
