use crate::access::{Action, Resource, Target};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Department};
use crate::store::{fetch, fetch_one, to_row, Filter, Store, StoreError};
use serde_json::json;
use uuid::Uuid;

fn create(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.authorize(Resource::Department, Action::Create, Target::default())?;
    let dept = Department {
        id: Uuid::new_v4().to_string(),
        code: model::required_str(params.get("code"), "code")?.to_ascii_uppercase(),
        name: model::required_str(params.get("name"), "name")?,
    };
    ctx.store.insert("departments", to_row(&dept)?)?;
    log::info!("department {} created", dept.code);
    Ok(json!({ "department": dept }))
}

fn list(ctx: &Ctx<'_>, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = ctx.authorize(Resource::Department, Action::Read, Target::default())?;
    let filter = scope.narrow(Resource::Department, Filter::new().order_by("code"));
    let departments: Vec<Department> = fetch(&ctx.store, "departments", &filter)?;
    Ok(json!({ "departments": departments }))
}

/// Accepts `departmentId`, or `departmentCode` resolved to its id.
pub fn department_param(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<Option<String>, HandlerErr> {
    if let Some(id) = model::optional_str(params.get("departmentId")) {
        return Ok(Some(id));
    }
    match model::optional_str(params.get("departmentCode")) {
        Some(code) => Ok(Some(department_id_for_code(ctx, &code)?)),
        None => Ok(None),
    }
}

pub fn department_id_for_code(ctx: &Ctx<'_>, code: &str) -> Result<String, HandlerErr> {
    let filter = Filter::new().eq("code", code.trim().to_ascii_uppercase());
    match fetch_one::<Department>(&ctx.store, "departments", &filter) {
        Ok(d) => Ok(d.id),
        Err(StoreError::NotFound { .. }) => Err(HandlerErr::bad_params(format!(
            "unknown department code {}",
            code
        ))
        .with_details(json!({ "field": "departmentCode" }))),
        Err(e) => Err(e.into()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.create" => Some(authed(state, req, create)),
        "departments.list" => Some(authed(state, req, list)),
        _ => None,
    }
}
