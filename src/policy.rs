//! Role-scoped visibility rules.
//!
//! Everything here is a pure function of the principal, the linkage facts
//! loaded for that principal, and (for single items) the facts of the item
//! itself. Nothing touches the store.

use crate::auth::Principal;
use crate::error::{AppError, AppResult};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Admin,
    Manager,
    Teacher,
    Parent,
    Student,
}

impl Role {
    /// Exact, case-sensitive match. "Admin" is not a role.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "teacher" => Some(Role::Teacher),
            "parent" => Some(Role::Parent),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Student => "student",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    School,
    Teacher,
    Student,
    Parent,
}

impl Resource {
    pub fn plural(self) -> &'static str {
        match self {
            Resource::School => "schools",
            Resource::Teacher => "teachers",
            Resource::Student => "students",
            Resource::Parent => "parents",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Delete,
}

impl Mutation {
    fn verb(self) -> &'static str {
        match self {
            Mutation::Create => "create",
            Mutation::Update => "update",
            Mutation::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherLink {
    pub teacher_id: i64,
    pub school_id: i64,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub parent_id: i64,
    /// Schools of all of this parent's students.
    pub school_ids: BTreeSet<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentLink {
    pub student_id: i64,
    pub school_id: i64,
}

/// Relationship facts for one principal. Only the field matching the
/// principal's role is ever populated; a missing linking row leaves it empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Linkage {
    pub managed_schools: BTreeSet<i64>,
    pub teacher: Option<TeacherLink>,
    pub parent: Option<ParentLink>,
    pub student: Option<StudentLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentFacts {
    pub id: i64,
    pub school_id: i64,
    pub grade: String,
    pub parent_id: Option<i64>,
}

/// The parts of an item the rules look at.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    School { id: i64 },
    Teacher { id: i64, school_id: i64 },
    Student(&'a StudentFacts),
    Parent { id: i64, students: &'a [StudentFacts] },
}

impl Subject<'_> {
    fn id(&self) -> i64 {
        match self {
            Subject::School { id } => *id,
            Subject::Teacher { id, .. } => *id,
            Subject::Student(s) => s.id,
            Subject::Parent { id, .. } => *id,
        }
    }

    fn school_id(&self) -> Option<i64> {
        match self {
            Subject::Teacher { school_id, .. } => Some(*school_id),
            Subject::Student(s) => Some(s.school_id),
            Subject::School { .. } | Subject::Parent { .. } => None,
        }
    }
}

/// A visibility predicate over one resource type. The store renders the same
/// predicate as SQL for list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Ids(BTreeSet<i64>),
    SchoolIn(BTreeSet<i64>),
    SchoolClass { school_id: i64, grade: String },
    ChildOf(i64),
    HasStudent(Box<Filter>),
}

impl Filter {
    pub fn none() -> Self {
        Filter::Ids(BTreeSet::new())
    }

    fn only(id: i64) -> Self {
        Filter::Ids(BTreeSet::from([id]))
    }

    pub fn matches(&self, subject: &Subject<'_>) -> bool {
        match self {
            Filter::All => true,
            Filter::Ids(ids) => ids.contains(&subject.id()),
            Filter::SchoolIn(ids) => subject.school_id().is_some_and(|s| ids.contains(&s)),
            Filter::SchoolClass { school_id, grade } => match subject {
                Subject::Student(s) => s.school_id == *school_id && s.grade == *grade,
                _ => false,
            },
            Filter::ChildOf(parent_id) => match subject {
                Subject::Student(s) => s.parent_id == Some(*parent_id),
                _ => false,
            },
            Filter::HasStudent(inner) => match subject {
                Subject::Parent { students, .. } => students
                    .iter()
                    .any(|s| inner.matches(&Subject::Student(s))),
                _ => false,
            },
        }
    }
}

pub fn role_of(principal: &Principal) -> AppResult<Role> {
    Role::parse(&principal.role)
        .ok_or_else(|| AppError::forbidden(format!("unknown role '{}'", principal.role)))
}

/// Roles with no read access at all to a resource, independent of linkage.
fn read_denied(role: Role, resource: Resource) -> bool {
    matches!(
        (role, resource),
        (Role::Parent, Resource::Teacher)
            | (Role::Student, Resource::Teacher)
            | (Role::Student, Resource::Parent)
    )
}

/// The subset of `resource` that `principal` may read.
pub fn scope(principal: &Principal, resource: Resource, link: &Linkage) -> AppResult<Filter> {
    let role = role_of(principal)?;
    if read_denied(role, resource) {
        return Err(AppError::forbidden(format!(
            "role '{}' may not read {}",
            role.as_str(),
            resource.plural()
        )));
    }

    let filter = match role {
        Role::Admin => Filter::All,
        Role::Manager => {
            let schools = link.managed_schools.clone();
            match resource {
                Resource::School => Filter::Ids(schools),
                Resource::Teacher | Resource::Student => Filter::SchoolIn(schools),
                Resource::Parent => Filter::HasStudent(Box::new(Filter::SchoolIn(schools))),
            }
        }
        Role::Teacher => match &link.teacher {
            None => Filter::none(),
            Some(t) => {
                let class = Filter::SchoolClass {
                    school_id: t.school_id,
                    grade: t.class_name.clone(),
                };
                match resource {
                    Resource::School => Filter::only(t.school_id),
                    Resource::Teacher => Filter::only(t.teacher_id),
                    Resource::Student => class,
                    Resource::Parent => Filter::HasStudent(Box::new(class)),
                }
            }
        },
        Role::Parent => match &link.parent {
            None => Filter::none(),
            Some(p) => match resource {
                Resource::School => Filter::Ids(p.school_ids.clone()),
                Resource::Student => Filter::ChildOf(p.parent_id),
                _ => Filter::only(p.parent_id),
            },
        },
        Role::Student => match &link.student {
            None => Filter::none(),
            Some(s) => match resource {
                Resource::School => Filter::only(s.school_id),
                _ => Filter::only(s.student_id),
            },
        },
    };
    Ok(filter)
}

/// Single-item check, derived from `scope`.
pub fn can_access(
    principal: &Principal,
    resource: Resource,
    link: &Linkage,
    subject: &Subject<'_>,
) -> AppResult<()> {
    if scope(principal, resource, link)?.matches(subject) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "not permitted to access this item in {}",
            resource.plural()
        )))
    }
}

/// Like `scope`, but a role with no read access yields `None` instead of an
/// error. Used when embedding related items in another item's payload.
pub fn scope_if_readable(
    principal: &Principal,
    resource: Resource,
    link: &Linkage,
) -> AppResult<Option<Filter>> {
    match scope(principal, resource, link) {
        Ok(f) => Ok(Some(f)),
        Err(AppError::Forbidden(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn mutation_allow_list(resource: Resource, op: Mutation) -> &'static [Role] {
    match (resource, op) {
        (Resource::Student | Resource::Parent, Mutation::Delete) => &[],
        _ => &[Role::Admin],
    }
}

/// Mutation rights are a fixed allow-list and never follow read scope.
pub fn can_mutate(principal: &Principal, resource: Resource, op: Mutation) -> AppResult<()> {
    let role = role_of(principal)?;
    if mutation_allow_list(resource, op).contains(&role) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "role '{}' may not {} {}",
            role.as_str(),
            op.verb(),
            resource.plural()
        )))
    }
}

pub fn require_role(principal: &Principal, allowed: &[Role]) -> AppResult<Role> {
    let role = role_of(principal)?;
    if allowed.contains(&role) {
        Ok(role)
    } else {
        Err(AppError::forbidden("not permitted for this role"))
    }
}
