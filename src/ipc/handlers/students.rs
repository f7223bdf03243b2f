use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    authenticate, check_user_link, db_conn, optional_text, parse_params, required_text,
    school_brief, scoped_students, visible_parent, Empty, IdInput,
};
use crate::ipc::types::{AppState, HandlerResult, Reply, Request};
use crate::policy::{self, Mutation, Resource, Role, Subject};
use crate::store::{self, NewStudent, StudentRow, Within};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

fn load_student(conn: &Connection, id: i64) -> AppResult<StudentRow> {
    store::student_by_id(conn, id)?.ok_or_else(|| AppError::not_found("student not found"))
}

fn check_refs(conn: &Connection, school_id: Option<i64>, parent_id: Option<i64>) -> AppResult<()> {
    if let Some(sid) = school_id {
        if store::school_by_id(conn, sid)?.is_none() {
            return Err(AppError::not_found(format!("school {sid} not found")));
        }
    }
    if let Some(pid) = parent_id {
        if store::parent_by_id(conn, pid)?.is_none() {
            return Err(AppError::not_found(format!("parent {pid} not found")));
        }
    }
    Ok(())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: Empty = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;
    // Unreadable cells surface as Forbidden, not as an empty list.
    policy::scope(&principal, Resource::Student, &link)?;
    let students = scoped_students(conn, &principal, &link, Within::Anywhere)?;
    Ok(Reply::new("students listed", json!(students)))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: IdInput = parse_params(req)?;
    let conn = db_conn(state)?;
    let link = store::load_linkage(conn, &principal)?;

    let student = load_student(conn, input.id)?;
    let facts = student.facts();
    policy::can_access(&principal, Resource::Student, &link, &Subject::Student(&facts))?;

    let parent_scope = policy::scope_if_readable(&principal, Resource::Parent, &link)?;
    let parent = match student.parent_id {
        Some(pid) => visible_parent(conn, parent_scope.as_ref(), pid)?,
        None => None,
    };
    let mut v = json!(student);
    v["school"] = school_brief(conn, &principal, &link, student.school_id)?;
    v["parent"] = json!(parent);
    Ok(Reply::new("student details", v))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateStudent {
    name: String,
    grade: String,
    #[serde(default)]
    section: Option<String>,
    school_id: i64,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    user_id: Option<i64>,
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: CreateStudent = parse_params(req)?;
    let name = required_text("name", &input.name)?;
    let grade = required_text("grade", &input.grade)?;
    policy::can_mutate(&principal, Resource::Student, Mutation::Create)?;

    let conn = db_conn(state)?;
    check_refs(conn, Some(input.school_id), input.parent_id)?;
    if let Some(uid) = input.user_id {
        check_user_link(conn, uid, Role::Student)?;
    }
    let id = store::insert_student(
        conn,
        &NewStudent {
            user_id: input.user_id,
            school_id: input.school_id,
            parent_id: input.parent_id,
            name,
            grade,
            section: optional_text(input.section),
        },
    )?;
    info!(student_id = id, by = principal.user_id, "student created");
    Ok(Reply::new("student created", json!(load_student(conn, id)?)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct UpdateStudent {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    school_id: Option<i64>,
    #[serde(default)]
    parent_id: Option<i64>,
}

fn handle_students_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let input: UpdateStudent = parse_params(req)?;
    let name = input
        .name
        .as_deref()
        .map(|v| required_text("name", v))
        .transpose()?;
    let grade = input
        .grade
        .as_deref()
        .map(|v| required_text("grade", v))
        .transpose()?;
    policy::can_mutate(&principal, Resource::Student, Mutation::Update)?;

    let conn = db_conn(state)?;
    let mut student = load_student(conn, input.id)?;
    check_refs(conn, input.school_id, input.parent_id)?;
    if let Some(n) = name {
        student.name = n;
    }
    if let Some(g) = grade {
        student.grade = g;
    }
    if input.section.is_some() {
        student.section = optional_text(input.section);
    }
    if let Some(sid) = input.school_id {
        student.school_id = sid;
    }
    if let Some(pid) = input.parent_id {
        student.parent_id = Some(pid);
    }
    store::update_student(conn, &student)?;
    info!(student_id = student.id, by = principal.user_id, "student updated");
    Ok(Reply::new("student updated", json!(student)))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = authenticate(state, req)?;
    let _: IdInput = parse_params(req)?;
    policy::can_mutate(&principal, Resource::Student, Mutation::Delete)?;
    Err(AppError::forbidden("students cannot be deleted"))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.get" => handle_students_get(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
