use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    authenticate, db_conn, parse_params, required_text, scoped_students, Empty, IdInput,
};
use crate::ipc::types::{AppState, HandlerResult, Reply, Request};
use crate::policy::{self, Mutation, Resource, Subject};
use crate::store::{self, SchoolRow, Within};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

fn with_manager(conn: &Connection, school: &SchoolRow) -> AppResult<serde_json::Value> {
    let manager = match school.manager_id {
        Some(id) => store::user_by_id(conn, id)?,
        None => None,
    };
    let mut v = json!(school);
    v["manager"] = json!(manager);
    Ok(v)
}

fn handle_schools_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;
    let filter = policy::scope(&principal, Resource::School, &link)?;

    let mut schools = Vec::new();
    for s in store::list_schools(conn, &filter)? {
        schools.push(with_manager(conn, &s)?);
    }
    Ok(Reply::new("schools listed", json!(schools)))
}

fn handle_schools_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: IdInput = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;

    let school = store::school_by_id(conn, input.id)?
        .ok_or_else(|| AppError::not_found("school not found"))?;
    policy::can_access(&principal, Resource::School, &link, &Subject::School { id: school.id })?;

    let teachers = match policy::scope_if_readable(&principal, Resource::Teacher, &link)? {
        Some(f) => store::list_teachers(conn, &f, Some(school.id))?,
        None => Vec::new(),
    };
    let students = scoped_students(conn, &principal, &link, Within::School(school.id))?;

    let mut v = with_manager(conn, &school)?;
    v["teachers"] = json!(teachers);
    v["students"] = json!(students);
    Ok(Reply::new("school details", v))
}

/// The manager must be a user with role "manager" who does not already run
/// another school.
fn check_manager(conn: &Connection, manager_id: i64, school_id: Option<i64>) -> AppResult<()> {
    let user = store::user_by_id(conn, manager_id)?
        .ok_or_else(|| AppError::not_found(format!("user {manager_id} not found")))?;
    if user.role != "manager" {
        return Err(AppError::invalid_input(format!(
            "user {manager_id} is not a manager"
        )));
    }
    if let Some(current) = store::school_by_manager(conn, manager_id)? {
        if Some(current.id) != school_id {
            return Err(AppError::conflict(format!(
                "user {manager_id} already manages school {}",
                current.id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateSchool {
    name: String,
    #[serde(default)]
    manager_id: Option<i64>,
}

fn handle_schools_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: CreateSchool = parse_params(req)?;
    let name = required_text("name", &input.name)?;
    policy::can_mutate(&principal, Resource::School, Mutation::Create)?;

    let conn = db_conn(state)?;
    if let Some(mid) = input.manager_id {
        check_manager(conn, mid, None)?;
    }
    let id = store::insert_school(conn, &name, input.manager_id)?;
    let school = load_school(conn, id)?;
    info!(school_id = id, by = principal.user_id, "school created");
    Ok(Reply::new("school created", with_manager(conn, &school)?))
}

fn load_school(conn: &Connection, id: i64) -> AppResult<SchoolRow> {
    store::school_by_id(conn, id)?.ok_or_else(|| AppError::not_found("school not found"))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct UpdateSchool {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    manager_id: Option<i64>,
}

fn handle_schools_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: UpdateSchool = parse_params(req)?;
    let name = input
        .name
        .as_deref()
        .map(|n| required_text("name", n))
        .transpose()?;
    policy::can_mutate(&principal, Resource::School, Mutation::Update)?;

    let conn = db_conn(state)?;
    let mut school = load_school(conn, input.id)?;
    if let Some(n) = name {
        school.name = n;
    }
    if let Some(mid) = input.manager_id {
        check_manager(conn, mid, Some(school.id))?;
        school.manager_id = Some(mid);
    }
    store::update_school(conn, &school)?;
    info!(school_id = school.id, by = principal.user_id, "school updated");
    Ok(Reply::new("school updated", with_manager(conn, &school)?))
}

fn handle_schools_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: IdInput = parse_params(req)?;
    policy::can_mutate(&principal, Resource::School, Mutation::Delete)?;

    let conn = db_conn(state)?;
    let school = load_school(conn, input.id)?;
    let (teachers, students) = store::school_member_counts(conn, school.id)?;
    if teachers > 0 || students > 0 {
        return Err(AppError::conflict(format!(
            "school still has {teachers} teacher(s) and {students} student(s)"
        )));
    }
    store::delete_school(conn, school.id)?;
    info!(school_id = school.id, by = principal.user_id, "school deleted");
    Ok(Reply::new("school deleted", serde_json::Value::Null))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schools.list" => handle_schools_list(state, req),
        "schools.get" => handle_schools_get(state, req),
        "schools.create" => handle_schools_create(state, req),
        "schools.update" => handle_schools_update(state, req),
        "schools.delete" => handle_schools_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
