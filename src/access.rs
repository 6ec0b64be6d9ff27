//! Role-based access decisions.
//!
//! [`authorize`] is a pure function of the caller context and the requested
//! resource/action. It either denies, or returns the [`Scope`] the caller's
//! query has to be narrowed to before it reaches the store.

use crate::store::Filter;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Faculty,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Faculty => "faculty",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "faculty" => Ok(Role::Faculty),
            "student" => Ok(Role::Student),
            _ => Err(AccessError::Unauthorized),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Department,
    StudentProfile,
    FacultyProfile,
    Subject,
    Mark,
    Attendance,
    Fee,
    Workspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Publish,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Access denied")]
    Forbidden,
    #[error("You are not assigned to this subject")]
    NotAssigned,
    #[error("record not found")]
    ProfileNotFound,
}

/// Who is asking. Built once per request from the session.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
    /// Student or faculty row linked to the user. Always `None` for admins.
    pub profile_id: Option<String>,
    /// Subjects a faculty member is assigned to. Empty for other roles.
    pub assigned_subjects: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Target<'a> {
    pub subject_id: Option<&'a str>,
    pub student_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Unrestricted,
    /// Rows belonging to one student (marks narrowed to published when set).
    OwnRecords {
        student_id: String,
        published_only: bool,
    },
    /// The caller's own faculty row.
    OwnFacultyProfile { faculty_id: String },
    AssignedSubjects(BTreeSet<String>),
}

impl Scope {
    /// Adds the scope's row conditions to `filter`.
    ///
    /// Student-profile and subject listings key on `id`; every other resource
    /// keys on `student_id` / `subject_id`.
    pub fn narrow(&self, resource: Resource, filter: Filter) -> Filter {
        match self {
            Scope::Unrestricted => filter,
            Scope::OwnRecords {
                student_id,
                published_only,
            } => {
                let column = match resource {
                    Resource::StudentProfile => "id",
                    _ => "student_id",
                };
                let f = filter.eq(column, student_id.as_str());
                if *published_only && resource == Resource::Mark {
                    f.eq("published", true)
                } else {
                    f
                }
            }
            Scope::OwnFacultyProfile { faculty_id } => filter.eq("id", faculty_id.as_str()),
            // Student rows carry no subject column; faculty student listings
            // are resolved to explicit ids before they reach the store.
            Scope::AssignedSubjects(_) if resource == Resource::StudentProfile => {
                filter.is_in("id", Vec::<&str>::new())
            }
            Scope::AssignedSubjects(ids) => {
                let column = match resource {
                    Resource::Subject => "id",
                    _ => "subject_id",
                };
                filter.is_in(column, ids.iter().map(|s| s.as_str()))
            }
        }
    }
}

pub fn authorize(
    caller: &Caller,
    resource: Resource,
    action: Action,
    target: Target<'_>,
) -> Result<Scope, AccessError> {
    match caller.role {
        Role::Admin => Ok(Scope::Unrestricted),
        Role::Student => authorize_student(caller, resource, action, target),
        Role::Faculty => authorize_faculty(caller, resource, action, target),
    }
}

fn authorize_student(
    caller: &Caller,
    resource: Resource,
    action: Action,
    target: Target<'_>,
) -> Result<Scope, AccessError> {
    if action != Action::Read {
        return Err(AccessError::Forbidden);
    }
    match resource {
        Resource::Department | Resource::Subject => Ok(Scope::Unrestricted),
        Resource::StudentProfile | Resource::Mark | Resource::Attendance | Resource::Fee => {
            let Some(own) = caller.profile_id.as_deref() else {
                return Err(AccessError::ProfileNotFound);
            };
            if let Some(requested) = target.student_id {
                if requested != own {
                    return Err(AccessError::Forbidden);
                }
            }
            Ok(Scope::OwnRecords {
                student_id: own.to_string(),
                published_only: true,
            })
        }
        Resource::FacultyProfile | Resource::Workspace => Err(AccessError::Forbidden),
    }
}

fn authorize_faculty(
    caller: &Caller,
    resource: Resource,
    action: Action,
    target: Target<'_>,
) -> Result<Scope, AccessError> {
    match resource {
        Resource::Department if action == Action::Read => Ok(Scope::Unrestricted),
        Resource::FacultyProfile if action == Action::Read => {
            let Some(own) = caller.profile_id.as_deref() else {
                return Err(AccessError::ProfileNotFound);
            };
            Ok(Scope::OwnFacultyProfile {
                faculty_id: own.to_string(),
            })
        }
        Resource::Subject if action == Action::Read => assigned_scope(caller, target),
        Resource::StudentProfile if action == Action::Read => assigned_scope(caller, target),
        Resource::Mark | Resource::Attendance
            if matches!(action, Action::Read | Action::Create | Action::Update) =>
        {
            assigned_scope(caller, target)
        }
        _ => Err(AccessError::Forbidden),
    }
}

fn assigned_scope(caller: &Caller, target: Target<'_>) -> Result<Scope, AccessError> {
    if caller.profile_id.is_none() {
        return Err(AccessError::ProfileNotFound);
    }
    if let Some(subject_id) = target.subject_id {
        if !caller.assigned_subjects.contains(subject_id) {
            return Err(AccessError::NotAssigned);
        }
        let mut only = BTreeSet::new();
        only.insert(subject_id.to_string());
        return Ok(Scope::AssignedSubjects(only));
    }
    Ok(Scope::AssignedSubjects(caller.assigned_subjects.clone()))
}
