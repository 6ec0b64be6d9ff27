use crate::access::{Action, Resource, Target};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::departments::department_param;
use crate::ipc::helpers::{authed, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Subject};
use crate::store::{fetch, fetch_one, to_row, Filter, Row, Store};
use serde_json::json;
use uuid::Uuid;

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.authorize(Resource::Subject, Action::Create, Target::default())?;
    let subject = Subject {
        id: Uuid::new_v4().to_string(),
        code: model::required_str(params.get("code"), "code")?.to_ascii_uppercase(),
        name: model::required_str(params.get("name"), "name")?,
        department_id: department_param(ctx, params)?,
        semester: Some(model::parse_semester(params.get("semester"), ctx.cfg.max_semester)?),
        credits: Some(model::parse_credits(params.get("credits"))?),
    };
    ctx.store.insert("subjects", to_row(&subject)?)?;
    log::info!("subject {} created", subject.code);
    Ok(json!({ "subject": subject }))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = ctx.authorize(Resource::Subject, Action::Read, Target::default())?;
    let mut filter = Filter::new().order_by("semester").order_by("code");
    if let Some(dept) = department_param(ctx, params)? {
        filter = filter.eq("department_id", dept);
    }
    if let Some(sem) = model::parse_optional_semester(params.get("semester"), ctx.cfg.max_semester)? {
        filter = filter.eq("semester", sem);
    }
    let subjects: Vec<Subject> = fetch(&ctx.store, "subjects", &scope.narrow(Resource::Subject, filter))?;
    Ok(json!({ "subjects": subjects }))
}

fn update(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = model::required_str(params.get("subjectId"), "subjectId")?;
    ctx.authorize(
        Resource::Subject,
        Action::Update,
        Target {
            subject_id: Some(&subject_id),
            ..Default::default()
        },
    )?;

    let mut patch = Row::new();
    if let Some(code) = model::optional_str(params.get("code")) {
        patch.insert("code".into(), json!(code.to_ascii_uppercase()));
    }
    if let Some(name) = model::optional_str(params.get("name")) {
        patch.insert("name".into(), json!(name));
    }
    if params.get("departmentId").is_some() || params.get("departmentCode").is_some() {
        patch.insert("department_id".into(), json!(department_param(ctx, params)?));
    }
    if params.get("semester").is_some() {
        let sem = model::parse_semester(params.get("semester"), ctx.cfg.max_semester)?;
        patch.insert("semester".into(), json!(sem));
    }
    if params.get("credits").is_some() {
        patch.insert("credits".into(), json!(model::parse_credits(params.get("credits"))?));
    }
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("nothing to update"));
    }

    let by_id = Filter::new().eq("id", subject_id.as_str());
    ctx.store.update("subjects", &by_id, patch)?;
    let subject: Subject = fetch_one(&ctx.store, "subjects", &by_id)?;
    Ok(json!({ "subject": subject }))
}

fn delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = model::required_str(params.get("subjectId"), "subjectId")?;
    ctx.authorize(
        Resource::Subject,
        Action::Delete,
        Target {
            subject_id: Some(&subject_id),
            ..Default::default()
        },
    )?;
    let removed = ctx
        .store
        .delete("subjects", &Filter::new().eq("id", subject_id.as_str()))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    log::info!("subject {} deleted with its marks and attendance", subject_id);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(authed(state, req, create)),
        "subjects.list" => Some(authed(state, req, list)),
        "subjects.update" => Some(authed(state, req, update)),
        "subjects.delete" => Some(authed(state, req, delete)),
        _ => None,
    }
}
