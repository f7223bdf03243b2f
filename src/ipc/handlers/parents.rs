use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    authenticate, check_user_link, db_conn, optional_text, parse_params, required_text,
    scoped_students, Empty, IdInput,
};
use crate::ipc::types::{AppState, HandlerResult, Reply, Request};
use crate::policy::{self, Mutation, Resource, Role, Subject};
use crate::store::{self, NewParent, ParentRow, Within};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

fn load_parent(conn: &Connection, id: i64) -> AppResult<ParentRow> {
    store::parent_by_id(conn, id)?.ok_or_else(|| AppError::not_found("parent not found"))
}

fn handle_parents_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;
    let filter = policy::scope(&principal, Resource::Parent, &link)?;
    let parents = store::list_parents(conn, &filter)?;
    Ok(Reply::new("parents listed", json!(parents)))
}

fn handle_parents_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: IdInput = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;

    let parent = load_parent(conn, input.id)?;
    let kids = store::parent_student_facts(conn, parent.id)?;
    policy::can_access(
        &principal,
        Resource::Parent,
        &link,
        &Subject::Parent {
            id: parent.id,
            students: &kids,
        },
    )?;
    let mut v = json!(parent);
    v["students"] = json!(scoped_students(
        conn,
        &principal,
        &link,
        Within::Parent(parent.id)
    )?);
    Ok(Reply::new("parent details", v))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateParent {
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    user_id: Option<i64>,
}

fn handle_parents_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: CreateParent = parse_params(req)?;
    let name = required_text("name", &input.name)?;
    policy::can_mutate(&principal, Resource::Parent, Mutation::Create)?;

    let conn = db_conn(state)?;
    if let Some(uid) = input.user_id {
        check_user_link(conn, uid, Role::Parent)?;
    }
    let id = store::insert_parent(
        conn,
        &NewParent {
            user_id: input.user_id,
            name,
            email: optional_text(input.email),
            phone: optional_text(input.phone),
        },
    )?;
    info!(parent_id = id, by = principal.user_id, "parent created");
    Ok(Reply::new("parent created", json!(load_parent(conn, id)?)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateParent {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

fn handle_parents_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: UpdateParent = parse_params(req)?;
    let name = input
        .name
        .as_deref()
        .map(|v| required_text("name", v))
        .transpose()?;
    policy::can_mutate(&principal, Resource::Parent, Mutation::Update)?;

    let conn = db_conn(state)?;
    let mut parent = load_parent(conn, input.id)?;
    if let Some(n) = name {
        parent.name = n;
    }
    if input.email.is_some() {
        parent.email = optional_text(input.email);
    }
    if input.phone.is_some() {
        parent.phone = optional_text(input.phone);
    }
    store::update_parent(conn, &parent)?;
    info!(parent_id = parent.id, by = principal.user_id, "parent updated");
    Ok(Reply::new("parent updated", json!(parent)))
}

fn handle_parents_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: IdInput = parse_params(req)?;
    policy::can_mutate(&principal, Resource::Parent, Mutation::Delete)?;
    Err(AppError::forbidden("parents cannot be deleted"))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "parents.list" => handle_parents_list(state, req),
        "parents.get" => handle_parents_get(state, req),
        "parents.create" => handle_parents_create(state, req),
        "parents.update" => handle_parents_update(state, req),
        "parents.delete" => handle_parents_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
