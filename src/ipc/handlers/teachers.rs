use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    authenticate, check_user_link, db_conn, parse_params, required_text, school_brief, Empty,
    IdInput,
};
use crate::ipc::types::{AppState, HandlerResult, Reply, Request};
use crate::policy::{self, Mutation, Resource, Role, Subject};
use crate::store::{self, NewTeacher, TeacherRow};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

fn load_teacher(conn: &Connection, id: i64) -> AppResult<TeacherRow> {
    store::teacher_by_id(conn, id)?.ok_or_else(|| AppError::not_found("teacher not found"))
}

fn require_school(conn: &Connection, school_id: i64) -> AppResult<()> {
    match store::school_by_id(conn, school_id)? {
        Some(_) => Ok(()),
        None => Err(AppError::not_found(format!("school {school_id} not found"))),
    }
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;
    let filter = policy::scope(&principal, Resource::Teacher, &link)?;
    let teachers = store::list_teachers(conn, &filter, None)?;
    Ok(Reply::new("teachers listed", json!(teachers)))
}

fn handle_teachers_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: IdInput = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;

    let teacher = load_teacher(conn, input.id)?;
    policy::can_access(
        &principal,
        Resource::Teacher,
        &link,
        &Subject::Teacher {
            id: teacher.id,
            school_id: teacher.school_id,
        },
    )?;
    let mut v = json!(teacher);
    v["school"] = school_brief(conn, &principal, &link, teacher.school_id)?;
    Ok(Reply::new("teacher details", v))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateTeacher {
    name: String,
    school_id: i64,
    class_name: String,
    #[serde(default)]
    user_id: Option<i64>,
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: CreateTeacher = parse_params(req)?;
    let name = required_text("name", &input.name)?;
    let class_name = required_text("className", &input.class_name)?;
    policy::can_mutate(&principal, Resource::Teacher, Mutation::Create)?;

    let conn = db_conn(state)?;
    require_school(conn, input.school_id)?;
    if let Some(uid) = input.user_id {
        check_user_link(conn, uid, Role::Teacher)?;
    }
    let id = store::insert_teacher(
        conn,
        &NewTeacher {
            user_id: input.user_id,
            school_id: input.school_id,
            name,
            class_name,
        },
    )?;
    info!(teacher_id = id, by = principal.user_id, "teacher created");
    Ok(Reply::new("teacher created", json!(load_teacher(conn, id)?)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct UpdateTeacher {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    school_id: Option<i64>,
    #[serde(default)]
    class_name: Option<String>,
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: UpdateTeacher = parse_params(req)?;
    let name = input
        .name
        .as_deref()
        .map(|v| required_text("name", v))
        .transpose()?;
    let class_name = input
        .class_name
        .as_deref()
        .map(|v| required_text("className", v))
        .transpose()?;
    policy::can_mutate(&principal, Resource::Teacher, Mutation::Update)?;

    let conn = db_conn(state)?;
    let mut teacher = load_teacher(conn, input.id)?;
    if let Some(sid) = input.school_id {
        require_school(conn, sid)?;
        teacher.school_id = sid;
    }
    if let Some(n) = name {
        teacher.name = n;
    }
    if let Some(c) = class_name {
        teacher.class_name = c;
    }
    store::update_teacher(conn, &teacher)?;
    info!(teacher_id = teacher.id, by = principal.user_id, "teacher updated");
    Ok(Reply::new("teacher updated", json!(teacher)))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: IdInput = parse_params(req)?;
    policy::can_mutate(&principal, Resource::Teacher, Mutation::Delete)?;

    let conn = db_conn(state)?;
    let teacher = load_teacher(conn, input.id)?;
    store::delete_teacher(conn, teacher.id)?;
    info!(teacher_id = teacher.id, by = principal.user_id, "teacher deleted");
    Ok(Reply::new("teacher deleted", serde_json::Value::Null))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => handle_teachers_list(state, req),
        "teachers.get" => handle_teachers_get(state, req),
        "teachers.create" => handle_teachers_create(state, req),
        "teachers.update" => handle_teachers_update(state, req),
        "teachers.delete" => handle_teachers_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
