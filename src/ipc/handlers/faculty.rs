use crate::access::{AccessError, Action, Resource, Role, Target};
use crate::account::{self, NewAccount, NewFaculty, ProfileSpec};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::departments::department_param;
use crate::ipc::helpers::{authed, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, FacultyAssignment, FacultyProfile, Subject, User};
use crate::store::{fetch, fetch_one, to_row, Filter, Store};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

fn faculty_json(p: &FacultyProfile, user: Option<&User>, subjects: &[&str]) -> serde_json::Value {
    let mut v = json!(p);
    v["email"] = json!(user.map(|u| u.email.as_str()));
    v["full_name"] = json!(user.map(|u| u.full_name.as_str()));
    v["subject_ids"] = json!(subjects);
    v
}

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.authorize(Resource::FacultyProfile, Action::Create, Target::default())?;
    let new = NewAccount {
        email: model::validate_email(params.get("email"))?,
        password: params
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("missing password"))?
            .to_string(),
        full_name: model::required_str(params.get("fullName"), "fullName")?,
        profile: ProfileSpec::Faculty(NewFaculty {
            employee_id: model::required_str(params.get("employeeId"), "employeeId")?,
            department_id: department_param(ctx, params)?,
            designation: model::optional_str(params.get("designation")),
        }),
    };
    let created = account::create_account(&ctx.idp, &ctx.store, &new)?;
    let profile_id = created.profile_id.unwrap_or_default();
    let profile: FacultyProfile =
        fetch_one(&ctx.store, "faculty", &Filter::new().eq("id", profile_id.as_str()))?;
    Ok(json!({ "faculty": faculty_json(&profile, Some(&created.user), &[]) }))
}

fn list(ctx: &Ctx<'_>, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = ctx.authorize(Resource::FacultyProfile, Action::Read, Target::default())?;
    let filter = scope.narrow(Resource::FacultyProfile, Filter::new().order_by("employee_id"));
    let profiles: Vec<FacultyProfile> = fetch(&ctx.store, "faculty", &filter)?;
    if profiles.is_empty() {
        return Ok(json!({ "faculty": [] }));
    }

    let users: Vec<User> = fetch(
        &ctx.store,
        "users",
        &Filter::new().is_in("id", profiles.iter().map(|p| p.user_id.as_str())),
    )?;
    let users: HashMap<&str, &User> = users.iter().map(|u| (u.id.as_str(), u)).collect();
    let assignments: Vec<FacultyAssignment> = fetch(
        &ctx.store,
        "faculty_subjects",
        &Filter::new()
            .is_in("faculty_id", profiles.iter().map(|p| p.id.as_str()))
            .order_by("subject_id"),
    )?;
    let mut by_faculty: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for a in &assignments {
        by_faculty
            .entry(a.faculty_id.as_str())
            .or_default()
            .push(a.subject_id.as_str());
    }

    let faculty: Vec<serde_json::Value> = profiles
        .iter()
        .map(|p| {
            faculty_json(
                p,
                users.get(p.user_id.as_str()).copied(),
                by_faculty.get(p.id.as_str()).map(|v| v.as_slice()).unwrap_or(&[]),
            )
        })
        .collect();
    Ok(json!({ "faculty": faculty }))
}

fn assignment_params(params: &serde_json::Value) -> Result<FacultyAssignment, HandlerErr> {
    Ok(FacultyAssignment {
        faculty_id: model::required_str(params.get("facultyId"), "facultyId")?,
        subject_id: model::required_str(params.get("subjectId"), "subjectId")?,
    })
}

fn assign_subject(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.authorize(Resource::FacultyProfile, Action::Update, Target::default())?;
    let a = assignment_params(params)?;
    ctx.store.insert("faculty_subjects", to_row(&a)?)?;
    log::info!("subject {} assigned to faculty {}", a.subject_id, a.faculty_id);
    Ok(json!({ "assignment": a }))
}

fn unassign_subject(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.authorize(Resource::FacultyProfile, Action::Update, Target::default())?;
    let a = assignment_params(params)?;
    let removed = ctx.store.delete(
        "faculty_subjects",
        &Filter::new()
            .eq("faculty_id", a.faculty_id.as_str())
            .eq("subject_id", a.subject_id.as_str()),
    )?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    }
    log::info!("subject {} unassigned from faculty {}", a.subject_id, a.faculty_id);
    Ok(json!({ "ok": true }))
}

fn my_subjects(ctx: &Ctx<'_>, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    if ctx.caller.role != Role::Faculty {
        return Err(AccessError::Forbidden.into());
    }
    let scope = ctx.authorize(Resource::Subject, Action::Read, Target::default())?;
    let filter = scope.narrow(Resource::Subject, Filter::new().order_by("code"));
    let subjects: Vec<Subject> = fetch(&ctx.store, "subjects", &filter)?;
    Ok(json!({ "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.create" => Some(authed(state, req, create)),
        "faculty.list" => Some(authed(state, req, list)),
        "faculty.assignSubject" => Some(authed(state, req, assign_subject)),
        "faculty.unassignSubject" => Some(authed(state, req, unassign_subject)),
        "faculty.mySubjects" => Some(authed(state, req, my_subjects)),
        _ => None,
    }
}
