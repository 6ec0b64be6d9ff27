use crate::access::{AccessError, Action, Resource, Scope, Target};
use crate::account::{self, NewAccount, NewStudent, ProfileSpec};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::departments::{department_id_for_code, department_param};
use crate::ipc::helpers::{authed, subjects_by_id, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, AttendanceRecord, MarkRecord, StudentProfile, User};
use crate::roster;
use crate::store::{fetch, fetch_one, Filter, Row, Store};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

fn student_json(p: &StudentProfile, user: Option<&User>) -> serde_json::Value {
    let mut v = json!(p);
    v["email"] = json!(user.map(|u| u.email.as_str()));
    v["full_name"] = json!(user.map(|u| u.full_name.as_str()));
    v
}

fn optional_year(v: Option<&serde_json::Value>) -> Result<Option<i64>, HandlerErr> {
    match v {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => Ok(Some(model::parse_admission_year(Some(v))?)),
    }
}

/// Students a faculty member teaches: the department/semester cohort of each
/// assigned subject, plus anyone already holding marks or attendance in one.
fn cohort_of(ctx: &Ctx<'_>, subject_ids: &BTreeSet<String>) -> Result<BTreeSet<String>, HandlerErr> {
    let mut out = BTreeSet::new();
    if subject_ids.is_empty() {
        return Ok(out);
    }
    let subjects = subjects_by_id(&ctx.store, subject_ids.iter().map(|s| s.as_str()))?;
    for s in subjects.values() {
        let (Some(dept), Some(sem)) = (&s.department_id, s.semester) else {
            continue;
        };
        let filter = Filter::new()
            .eq("department_id", dept.as_str())
            .eq("current_semester", sem);
        let members: Vec<StudentProfile> = fetch(&ctx.store, "students", &filter)?;
        out.extend(members.into_iter().map(|p| p.id));
    }
    let by_subject = Filter::new().is_in("subject_id", subject_ids.iter().map(|s| s.as_str()));
    let marks: Vec<MarkRecord> = fetch(&ctx.store, "marks", &by_subject)?;
    out.extend(marks.into_iter().map(|m| m.student_id));
    let attendance: Vec<AttendanceRecord> = fetch(&ctx.store, "attendance", &by_subject)?;
    out.extend(attendance.into_iter().map(|a| a.student_id));
    Ok(out)
}

/// `None` means every student is visible.
fn visible_students(ctx: &Ctx<'_>, scope: &Scope) -> Result<Option<BTreeSet<String>>, HandlerErr> {
    match scope {
        Scope::Unrestricted => Ok(None),
        Scope::OwnRecords { student_id, .. } => Ok(Some([student_id.clone()].into_iter().collect())),
        Scope::AssignedSubjects(ids) => cohort_of(ctx, ids).map(Some),
        Scope::OwnFacultyProfile { .. } => Ok(Some(BTreeSet::new())),
    }
}

fn users_by_id(ctx: &Ctx<'_>, profiles: &[StudentProfile]) -> Result<HashMap<String, User>, HandlerErr> {
    if profiles.is_empty() {
        return Ok(HashMap::new());
    }
    let filter = Filter::new().is_in("id", profiles.iter().map(|p| p.user_id.as_str()));
    let users: Vec<User> = fetch(&ctx.store, "users", &filter)?;
    Ok(users.into_iter().map(|u| (u.id.clone(), u)).collect())
}

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.authorize(Resource::StudentProfile, Action::Create, Target::default())?;
    let new = NewAccount {
        email: model::validate_email(params.get("email"))?,
        password: params
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("missing password"))?
            .to_string(),
        full_name: model::required_str(params.get("fullName"), "fullName")?,
        profile: ProfileSpec::Student(NewStudent {
            roll_number: model::required_str(params.get("rollNumber"), "rollNumber")?,
            department_id: department_param(ctx, params)?,
            current_semester: model::parse_optional_semester(
                params.get("currentSemester"),
                ctx.cfg.max_semester,
            )?,
            admission_year: optional_year(params.get("admissionYear"))?,
        }),
    };
    let created = account::create_account(&ctx.idp, &ctx.store, &new)?;
    let profile_id = created.profile_id.unwrap_or_default();
    let profile: StudentProfile =
        fetch_one(&ctx.store, "students", &Filter::new().eq("id", profile_id.as_str()))?;
    Ok(json!({ "student": student_json(&profile, Some(&created.user)) }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = ctx.authorize(Resource::StudentProfile, Action::Read, Target::default())?;
    let mut filter = Filter::new().order_by("roll_number");
    if let Some(dept) = department_param(ctx, params)? {
        filter = filter.eq("department_id", dept);
    }
    if let Some(sem) = model::parse_optional_semester(params.get("semester"), ctx.cfg.max_semester)? {
        filter = filter.eq("current_semester", sem);
    }
    if let Some(ids) = visible_students(ctx, &scope)? {
        filter = filter.is_in("id", ids);
    }

    let profiles: Vec<StudentProfile> = fetch(&ctx.store, "students", &filter)?;
    let users = users_by_id(ctx, &profiles)?;
    let students: Vec<serde_json::Value> = profiles
        .iter()
        .map(|p| student_json(p, users.get(&p.user_id)))
        .collect();
    Ok(json!({ "students": students }))
}

fn get(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = ctx.student_param(params)?;
    let scope = ctx.authorize(
        Resource::StudentProfile,
        Action::Read,
        Target {
            student_id: Some(&student_id),
            ..Default::default()
        },
    )?;
    if let Some(ids) = visible_students(ctx, &scope)? {
        if !ids.contains(&student_id) {
            log::warn!(
                "{} asked for student {} outside their scope",
                ctx.caller.user_id,
                student_id
            );
            return Err(AccessError::Forbidden.into());
        }
    }
    let profile: StudentProfile =
        fetch_one(&ctx.store, "students", &Filter::new().eq("id", student_id.as_str()))?;
    let users = users_by_id(ctx, std::slice::from_ref(&profile))?;
    Ok(json!({ "student": student_json(&profile, users.get(&profile.user_id)) }))
}

fn update(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = model::required_str(params.get("studentId"), "studentId")?;
    ctx.authorize(
        Resource::StudentProfile,
        Action::Update,
        Target {
            student_id: Some(&student_id),
            ..Default::default()
        },
    )?;
    let by_id = Filter::new().eq("id", student_id.as_str());
    let profile: StudentProfile = fetch_one(&ctx.store, "students", &by_id)?;

    let mut patch = Row::new();
    if let Some(roll) = model::optional_str(params.get("rollNumber")) {
        patch.insert("roll_number".into(), json!(roll));
    }
    if params.get("departmentId").is_some() || params.get("departmentCode").is_some() {
        patch.insert("department_id".into(), json!(department_param(ctx, params)?));
    }
    if params.get("currentSemester").is_some() {
        let sem = model::parse_optional_semester(params.get("currentSemester"), ctx.cfg.max_semester)?;
        patch.insert("current_semester".into(), json!(sem));
    }
    if params.get("admissionYear").is_some() {
        patch.insert(
            "admission_year".into(),
            json!(optional_year(params.get("admissionYear"))?),
        );
    }
    let full_name = model::optional_str(params.get("fullName"));
    if patch.is_empty() && full_name.is_none() {
        return Err(HandlerErr::bad_params("nothing to update"));
    }

    if !patch.is_empty() {
        ctx.store.update("students", &by_id, patch)?;
    }
    if let Some(name) = full_name {
        let mut user_patch = Row::new();
        user_patch.insert("full_name".into(), json!(name));
        ctx.store.update(
            "users",
            &Filter::new().eq("id", profile.user_id.as_str()),
            user_patch,
        )?;
    }
    log::info!("student {} updated", student_id);
    get(ctx, &json!({ "studentId": student_id }))
}

fn delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = model::required_str(params.get("studentId"), "studentId")?;
    ctx.authorize(
        Resource::StudentProfile,
        Action::Delete,
        Target {
            student_id: Some(&student_id),
            ..Default::default()
        },
    )?;
    let profile: StudentProfile =
        fetch_one(&ctx.store, "students", &Filter::new().eq("id", student_id.as_str()))?;
    account::remove_account(&ctx.idp, &ctx.store, &profile.user_id)?;
    log::info!("student {} removed with account {}", student_id, profile.user_id);
    Ok(json!({ "ok": true, "studentId": student_id }))
}

fn import_csv(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.authorize(Resource::StudentProfile, Action::Create, Target::default())?;
    let Some(text) = params.get("csv").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing csv"));
    };
    let entries = roster::parse_roster(text.as_bytes(), ctx.cfg.max_semester)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let max = ctx.cfg.bulk_max_entries;
    if entries.len() > max {
        return Ok(json!({
            "ok": true,
            "created": 0,
            "rejected": entries.len(),
            "limitExceeded": true,
            "errors": [{
                "line": -1,
                "code": "too_many_entries",
                "message": format!("roster exceeds max entries: {} > {}", entries.len(), max),
            }]
        }));
    }

    let mut created: Vec<serde_json::Value> = Vec::new();
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                errors.push(json!({ "line": e.line, "code": "bad_params", "message": e.message }));
                continue;
            }
        };
        let department_id = match &entry.department_code {
            Some(code) => match department_id_for_code(ctx, code) {
                Ok(id) => Some(id),
                Err(e) => {
                    errors.push(json!({ "line": entry.line, "code": e.code, "message": e.message }));
                    continue;
                }
            },
            None => None,
        };
        let new = NewAccount {
            email: entry.email.clone(),
            password: entry.password.clone(),
            full_name: entry.full_name.clone(),
            profile: ProfileSpec::Student(NewStudent {
                roll_number: entry.roll_number.clone(),
                department_id,
                current_semester: entry.current_semester,
                admission_year: entry.admission_year,
            }),
        };
        match account::create_account(&ctx.idp, &ctx.store, &new) {
            Ok(c) => created.push(json!({
                "line": entry.line,
                "studentId": c.profile_id,
                "email": c.user.email,
            })),
            Err(e) => {
                let e = HandlerErr::from(e);
                errors.push(json!({ "line": entry.line, "code": e.code, "message": e.message }));
            }
        }
    }

    log::info!(
        "roster import: {} created, {} rejected",
        created.len(),
        errors.len()
    );
    let mut result = json!({ "ok": true, "created": created.len(), "students": created });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = json!(errors);
    }
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(authed(state, req, create)),
        "students.list" => Some(authed(state, req, list)),
        "students.get" => Some(authed(state, req, get)),
        "students.update" => Some(authed(state, req, update)),
        "students.delete" => Some(authed(state, req, delete)),
        "students.importCsv" => Some(authed(state, req, import_csv)),
        _ => None,
    }
}
