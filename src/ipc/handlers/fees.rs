use crate::access::{Action, Resource, Target};
use crate::calc;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, FeeRecord, StudentProfile, ValidationError};
use crate::store::{fetch, fetch_one, fetch_optional, Filter, Row, Store};
use serde_json::json;
use uuid::Uuid;

const COMPONENTS: &[(&str, &str)] = &[
    ("tuitionFee", "tuition_fee"),
    ("labFee", "lab_fee"),
    ("otherFee", "other_fee"),
    ("amountPaid", "amount_paid"),
];

fn due_date_param(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    match params.get("dueDate") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => Ok(Some(
            model::parse_date(Some(v))?.format("%Y-%m-%d").to_string(),
        )),
    }
}

/// Fee row for one student and semester; `feeId` wins when given.
fn fee_key(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<Filter, HandlerErr> {
    if let Some(fee_id) = model::optional_str(params.get("feeId")) {
        return Ok(Filter::new().eq("id", fee_id));
    }
    let student_id = model::required_str(params.get("studentId"), "studentId")?;
    let semester = model::parse_semester(params.get("semester"), ctx.cfg.max_semester)?;
    Ok(Filter::new()
        .eq("student_id", student_id)
        .eq("semester", semester))
}

fn upsert(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = model::required_str(params.get("studentId"), "studentId")?;
    let semester = model::parse_semester(params.get("semester"), ctx.cfg.max_semester)?;
    let key = Filter::new()
        .eq("student_id", student_id.as_str())
        .eq("semester", semester);
    let existing: Option<FeeRecord> = fetch_optional(&ctx.store, "fees", &key)?;
    ctx.authorize(
        Resource::Fee,
        if existing.is_some() {
            Action::Update
        } else {
            Action::Create
        },
        Target {
            student_id: Some(&student_id),
            ..Default::default()
        },
    )?;

    let mut row = Row::new();
    for (param, column) in COMPONENTS {
        // On update only the components sent are touched.
        if existing.is_some() && params.get(*param).is_none() {
            continue;
        }
        row.insert(
            column.to_string(),
            json!(model::parse_amount_or_zero(params.get(*param), column)?),
        );
    }
    if params.get("dueDate").is_some() || existing.is_none() {
        row.insert("due_date".into(), json!(due_date_param(params)?));
    }

    match existing {
        Some(_) if row.is_empty() => return Err(HandlerErr::bad_params("nothing to update")),
        Some(_) => {
            ctx.store.update("fees", &key, row)?;
        }
        None => {
            row.insert("id".into(), json!(Uuid::new_v4().to_string()));
            row.insert("student_id".into(), json!(student_id));
            row.insert("semester".into(), json!(semester));
            ctx.store.insert("fees", row)?;
        }
    }
    let fee: FeeRecord = fetch_one(&ctx.store, "fees", &key)?;
    log::info!("fee for student {} semester {} saved", student_id, semester);
    Ok(json!({ "fee": calc::fee_view(&fee) }))
}

fn record_payment(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = fee_key(ctx, params)?;
    let amount = model::parse_amount(params.get("amount"), "amount")?;
    if amount <= 0.0 {
        return Err(ValidationError::new("amount", "amount must be > 0").into());
    }
    let fee: FeeRecord = fetch_one(&ctx.store, "fees", &key)?;
    ctx.authorize(
        Resource::Fee,
        Action::Update,
        Target {
            student_id: Some(&fee.student_id),
            ..Default::default()
        },
    )?;

    let by_id = Filter::new().eq("id", fee.id.as_str());
    let mut patch = Row::new();
    patch.insert(
        "amount_paid".into(),
        json!(calc::round_2(fee.amount_paid + amount)),
    );
    ctx.store.update("fees", &by_id, patch)?;
    let fee: FeeRecord = fetch_one(&ctx.store, "fees", &by_id)?;
    log::info!(
        "payment of {} recorded for student {} semester {}",
        amount,
        fee.student_id,
        fee.semester
    );
    Ok(json!({ "fee": calc::fee_view(&fee) }))
}

fn summary(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = ctx.student_param(params)?;
    let scope = ctx.authorize(
        Resource::Fee,
        Action::Read,
        Target {
            student_id: Some(&student_id),
            ..Default::default()
        },
    )?;
    let profile: StudentProfile =
        fetch_one(&ctx.store, "students", &Filter::new().eq("id", student_id.as_str()))?;
    let filter = scope.narrow(
        Resource::Fee,
        Filter::new()
            .eq("student_id", profile.id.as_str())
            .order_by("semester"),
    );
    let fees: Vec<FeeRecord> = fetch(&ctx.store, "fees", &filter)?;
    let mut result = json!(calc::fee_summary(&fees));
    result["student_id"] = json!(profile.id);
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.upsert" => Some(authed(state, req, upsert)),
        "fees.recordPayment" => Some(authed(state, req, record_payment)),
        "fees.summary" => Some(authed(state, req, summary)),
        _ => None,
    }
}
