//! Row types and queries. Collection queries take a policy `Filter` and
//! render it into the WHERE clause, so the database only ever returns rows
//! the caller may see.

use crate::auth::Principal;
use crate::policy::{Filter, Linkage, ParentLink, Role, StudentFacts, StudentLink, TeacherLink};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeSet;

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn in_list(column: &str, ids: &BTreeSet<i64>) -> (String, Vec<Value>) {
    if ids.is_empty() {
        return ("0 = 1".to_string(), Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    (
        format!("{column} IN ({placeholders})"),
        ids.iter().map(|id| Value::Integer(*id)).collect(),
    )
}

/// SQL rendering of a policy filter for the table aliased as `alias`.
pub fn filter_sql(filter: &Filter, alias: &str) -> (String, Vec<Value>) {
    match filter {
        Filter::All => ("1 = 1".to_string(), Vec::new()),
        Filter::Ids(ids) => in_list(&format!("{alias}.id"), ids),
        Filter::SchoolIn(ids) => in_list(&format!("{alias}.school_id"), ids),
        Filter::SchoolClass { school_id, grade } => (
            format!("({alias}.school_id = ? AND {alias}.grade = ?)"),
            vec![Value::Integer(*school_id), Value::Text(grade.clone())],
        ),
        Filter::ChildOf(parent_id) => (
            format!("{alias}.parent_id = ?"),
            vec![Value::Integer(*parent_id)],
        ),
        Filter::HasStudent(inner) => {
            let (inner_sql, params) = filter_sql(inner, "hs");
            (
                format!(
                    "EXISTS (SELECT 1 FROM students hs WHERE hs.parent_id = {alias}.id AND {inner_sql})"
                ),
                params,
            )
        }
    }
}

fn query_rows<T, F>(conn: &Connection, sql: &str, params: Vec<Value>, map: F) -> anyhow::Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count(conn: &Connection, sql: &str, params: Vec<Value>) -> anyhow::Result<i64> {
    Ok(conn.query_row(sql, params_from_iter(params), |r| r.get(0))?)
}

// ---- users ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
}

const USER_COLS: &str = "id, name, email, role, created_at, updated_at, password_hash";

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        password_hash: row.get(6)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

pub fn insert_user(conn: &Connection, u: &NewUser) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO users(name, email, password_hash, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (&u.name, &u.email, &u.password_hash, &u.role, now_rfc3339()),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn user_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLS} FROM users WHERE id = ?");
    Ok(conn.query_row(&sql, [id], map_user).optional()?)
}

pub fn user_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLS} FROM users WHERE email = ?");
    Ok(conn.query_row(&sql, [email], map_user).optional()?)
}

pub fn set_password_hash(conn: &Connection, id: i64, hash: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?",
        (hash, now_rfc3339(), id),
    )?;
    Ok(())
}

pub fn count_users(conn: &Connection) -> anyhow::Result<i64> {
    count(conn, "SELECT COUNT(*) FROM users", Vec::new())
}

// ---- schools ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRow {
    pub id: i64,
    pub name: String,
    pub manager_id: Option<i64>,
    pub created_at: String,
}

const SCHOOL_COLS: &str = "s.id, s.name, s.manager_id, s.created_at";

fn map_school(row: &Row<'_>) -> rusqlite::Result<SchoolRow> {
    Ok(SchoolRow {
        id: row.get(0)?,
        name: row.get(1)?,
        manager_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn list_schools(conn: &Connection, filter: &Filter) -> anyhow::Result<Vec<SchoolRow>> {
    let (clause, params) = filter_sql(filter, "s");
    let sql = format!("SELECT {SCHOOL_COLS} FROM schools s WHERE {clause} ORDER BY s.id");
    query_rows(conn, &sql, params, map_school)
}

pub fn school_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<SchoolRow>> {
    let sql = format!("SELECT {SCHOOL_COLS} FROM schools s WHERE s.id = ?");
    Ok(conn.query_row(&sql, [id], map_school).optional()?)
}

pub fn school_by_manager(conn: &Connection, manager_id: i64) -> anyhow::Result<Option<SchoolRow>> {
    let sql = format!("SELECT {SCHOOL_COLS} FROM schools s WHERE s.manager_id = ?");
    Ok(conn.query_row(&sql, [manager_id], map_school).optional()?)
}

pub fn insert_school(conn: &Connection, name: &str, manager_id: Option<i64>) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO schools(name, manager_id, created_at) VALUES(?, ?, ?)",
        (name, manager_id, now_rfc3339()),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_school(conn: &Connection, s: &SchoolRow) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE schools SET name = ?, manager_id = ? WHERE id = ?",
        (&s.name, s.manager_id, s.id),
    )?;
    Ok(())
}

pub fn delete_school(conn: &Connection, id: i64) -> anyhow::Result<()> {
    conn.execute("DELETE FROM schools WHERE id = ?", [id])?;
    Ok(())
}

/// (teachers, students) still attached to a school.
pub fn school_member_counts(conn: &Connection, id: i64) -> anyhow::Result<(i64, i64)> {
    let teachers = count(
        conn,
        "SELECT COUNT(*) FROM teachers WHERE school_id = ?",
        vec![Value::Integer(id)],
    )?;
    let students = count(
        conn,
        "SELECT COUNT(*) FROM students WHERE school_id = ?",
        vec![Value::Integer(id)],
    )?;
    Ok((teachers, students))
}

// ---- teachers ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub school_id: i64,
    pub name: String,
    pub class_name: String,
    pub created_at: String,
}

const TEACHER_COLS: &str = "t.id, t.user_id, t.school_id, t.name, t.class_name, t.created_at";

fn map_teacher(row: &Row<'_>) -> rusqlite::Result<TeacherRow> {
    Ok(TeacherRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        school_id: row.get(2)?,
        name: row.get(3)?,
        class_name: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewTeacher {
    pub user_id: Option<i64>,
    pub school_id: i64,
    pub name: String,
    pub class_name: String,
}

pub fn list_teachers(
    conn: &Connection,
    filter: &Filter,
    school_id: Option<i64>,
) -> anyhow::Result<Vec<TeacherRow>> {
    let (clause, mut params) = filter_sql(filter, "t");
    let mut sql = format!("SELECT {TEACHER_COLS} FROM teachers t WHERE {clause}");
    if let Some(sid) = school_id {
        sql.push_str(" AND t.school_id = ?");
        params.push(Value::Integer(sid));
    }
    sql.push_str(" ORDER BY t.id");
    query_rows(conn, &sql, params, map_teacher)
}

pub fn teacher_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<TeacherRow>> {
    let sql = format!("SELECT {TEACHER_COLS} FROM teachers t WHERE t.id = ?");
    Ok(conn.query_row(&sql, [id], map_teacher).optional()?)
}

pub fn teacher_by_user(conn: &Connection, user_id: i64) -> anyhow::Result<Option<TeacherRow>> {
    let sql = format!("SELECT {TEACHER_COLS} FROM teachers t WHERE t.user_id = ?");
    Ok(conn.query_row(&sql, [user_id], map_teacher).optional()?)
}

pub fn insert_teacher(conn: &Connection, t: &NewTeacher) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO teachers(user_id, school_id, name, class_name, created_at) VALUES(?, ?, ?, ?, ?)",
        (t.user_id, t.school_id, &t.name, &t.class_name, now_rfc3339()),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_teacher(conn: &Connection, t: &TeacherRow) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE teachers SET school_id = ?, name = ?, class_name = ? WHERE id = ?",
        (t.school_id, &t.name, &t.class_name, t.id),
    )?;
    Ok(())
}

pub fn delete_teacher(conn: &Connection, id: i64) -> anyhow::Result<()> {
    conn.execute("DELETE FROM teachers WHERE id = ?", [id])?;
    Ok(())
}

// ---- students ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub school_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub grade: String,
    pub section: Option<String>,
    pub created_at: String,
}

impl StudentRow {
    pub fn facts(&self) -> StudentFacts {
        StudentFacts {
            id: self.id,
            school_id: self.school_id,
            grade: self.grade.clone(),
            parent_id: self.parent_id,
        }
    }
}

const STUDENT_COLS: &str =
    "st.id, st.user_id, st.school_id, st.parent_id, st.name, st.grade, st.section, st.created_at";

fn map_student(row: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        school_id: row.get(2)?,
        parent_id: row.get(3)?,
        name: row.get(4)?,
        grade: row.get(5)?,
        section: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub user_id: Option<i64>,
    pub school_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub grade: String,
    pub section: Option<String>,
}

/// Extra narrowing for student lists embedded in another item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Within {
    Anywhere,
    School(i64),
    Parent(i64),
}

pub fn list_students(
    conn: &Connection,
    filter: &Filter,
    within: Within,
) -> anyhow::Result<Vec<StudentRow>> {
    let (clause, mut params) = filter_sql(filter, "st");
    let mut sql = format!("SELECT {STUDENT_COLS} FROM students st WHERE {clause}");
    match within {
        Within::Anywhere => {}
        Within::School(id) => {
            sql.push_str(" AND st.school_id = ?");
            params.push(Value::Integer(id));
        }
        Within::Parent(id) => {
            sql.push_str(" AND st.parent_id = ?");
            params.push(Value::Integer(id));
        }
    }
    sql.push_str(" ORDER BY st.id");
    query_rows(conn, &sql, params, map_student)
}

pub fn student_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<StudentRow>> {
    let sql = format!("SELECT {STUDENT_COLS} FROM students st WHERE st.id = ?");
    Ok(conn.query_row(&sql, [id], map_student).optional()?)
}

pub fn student_by_user(conn: &Connection, user_id: i64) -> anyhow::Result<Option<StudentRow>> {
    let sql = format!("SELECT {STUDENT_COLS} FROM students st WHERE st.user_id = ?");
    Ok(conn.query_row(&sql, [user_id], map_student).optional()?)
}

pub fn insert_student(conn: &Connection, s: &NewStudent) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO students(user_id, school_id, parent_id, name, grade, section, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            s.user_id,
            s.school_id,
            s.parent_id,
            &s.name,
            &s.grade,
            &s.section,
            now_rfc3339(),
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_student(conn: &Connection, s: &StudentRow) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE students SET school_id = ?, parent_id = ?, name = ?, grade = ?, section = ? WHERE id = ?",
        (s.school_id, s.parent_id, &s.name, &s.grade, &s.section, s.id),
    )?;
    Ok(())
}

// ---- parents ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: String,
}

const PARENT_COLS: &str = "p.id, p.user_id, p.name, p.email, p.phone, p.created_at";

fn map_parent(row: &Row<'_>) -> rusqlite::Result<ParentRow> {
    Ok(ParentRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewParent {
    pub user_id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub fn list_parents(conn: &Connection, filter: &Filter) -> anyhow::Result<Vec<ParentRow>> {
    let (clause, params) = filter_sql(filter, "p");
    let sql = format!("SELECT {PARENT_COLS} FROM parents p WHERE {clause} ORDER BY p.id");
    query_rows(conn, &sql, params, map_parent)
}

pub fn parent_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<ParentRow>> {
    let sql = format!("SELECT {PARENT_COLS} FROM parents p WHERE p.id = ?");
    Ok(conn.query_row(&sql, [id], map_parent).optional()?)
}

pub fn parent_by_user(conn: &Connection, user_id: i64) -> anyhow::Result<Option<ParentRow>> {
    let sql = format!("SELECT {PARENT_COLS} FROM parents p WHERE p.user_id = ?");
    Ok(conn.query_row(&sql, [user_id], map_parent).optional()?)
}

pub fn insert_parent(conn: &Connection, p: &NewParent) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO parents(user_id, name, email, phone, created_at) VALUES(?, ?, ?, ?, ?)",
        (p.user_id, &p.name, &p.email, &p.phone, now_rfc3339()),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_parent(conn: &Connection, p: &ParentRow) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE parents SET name = ?, email = ?, phone = ? WHERE id = ?",
        (&p.name, &p.email, &p.phone, p.id),
    )?;
    Ok(())
}

/// Facts of every student of a parent, unfiltered. Feeds the policy check on
/// the parent itself.
pub fn parent_student_facts(conn: &Connection, parent_id: i64) -> anyhow::Result<Vec<StudentFacts>> {
    let rows = list_students(conn, &Filter::All, Within::Parent(parent_id))?;
    Ok(rows.iter().map(StudentRow::facts).collect())
}

// ---- linkage ----

fn id_set(conn: &Connection, sql: &str, id: i64) -> anyhow::Result<BTreeSet<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([id], |r| r.get::<_, i64>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}

/// Loads the relationship facts the policy needs for this principal. A
/// missing linking row is not an error.
pub fn load_linkage(conn: &Connection, principal: &Principal) -> anyhow::Result<Linkage> {
    let mut link = Linkage::default();
    let uid = principal.user_id;
    match Role::parse(&principal.role) {
        Some(Role::Manager) => {
            link.managed_schools = id_set(conn, "SELECT id FROM schools WHERE manager_id = ?", uid)?;
        }
        Some(Role::Teacher) => {
            link.teacher = teacher_by_user(conn, uid)?.map(|t| TeacherLink {
                teacher_id: t.id,
                school_id: t.school_id,
                class_name: t.class_name,
            });
        }
        Some(Role::Parent) => {
            if let Some(p) = parent_by_user(conn, uid)? {
                let school_ids = id_set(
                    conn,
                    "SELECT DISTINCT school_id FROM students WHERE parent_id = ?",
                    p.id,
                )?;
                link.parent = Some(ParentLink {
                    parent_id: p.id,
                    school_ids,
                });
            }
        }
        Some(Role::Student) => {
            link.student = student_by_user(conn, uid)?.map(|s| StudentLink {
                student_id: s.id,
                school_id: s.school_id,
            });
        }
        Some(Role::Admin) | None => {}
    }
    Ok(link)
}

// ---- dashboard aggregates ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_schools: i64,
    pub total_teachers: i64,
    pub total_students: i64,
    pub total_parents: i64,
}

pub fn totals(conn: &Connection) -> anyhow::Result<Totals> {
    Ok(Totals {
        total_schools: count(conn, "SELECT COUNT(*) FROM schools", Vec::new())?,
        total_teachers: count(conn, "SELECT COUNT(*) FROM teachers", Vec::new())?,
        total_students: count(conn, "SELECT COUNT(*) FROM students", Vec::new())?,
        total_parents: count(conn, "SELECT COUNT(*) FROM parents", Vec::new())?,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolStats {
    pub school: String,
    pub teachers: i64,
    pub students: i64,
    pub parents: i64,
}

pub fn school_stats(conn: &Connection, school: &SchoolRow) -> anyhow::Result<SchoolStats> {
    let (teachers, students) = school_member_counts(conn, school.id)?;
    let parents = count(
        conn,
        "SELECT COUNT(*) FROM parents p
         WHERE EXISTS (SELECT 1 FROM students st WHERE st.parent_id = p.id AND st.school_id = ?)",
        vec![Value::Integer(school.id)],
    )?;
    Ok(SchoolStats {
        school: school.name.clone(),
        teachers,
        students,
        parents,
    })
}
