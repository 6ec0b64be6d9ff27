use crate::access::{Action, Resource, Target};
use crate::calc::{self, AttendanceRow};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, bulk_entries, bulk_result, subjects_by_id, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, AttendanceRecord, AttendanceStatus, StudentProfile};
use crate::store::{fetch, fetch_one, fetch_optional, Filter, Row, Store};
use serde_json::json;
use uuid::Uuid;

fn write_status(
    ctx: &Ctx<'_>,
    student_id: &str,
    subject_id: &str,
    date: &str,
    status: AttendanceStatus,
) -> Result<AttendanceRecord, HandlerErr> {
    let key = Filter::new()
        .eq("student_id", student_id)
        .eq("subject_id", subject_id)
        .eq("date", date);
    let existing: Option<AttendanceRecord> = fetch_optional(&ctx.store, "attendance", &key)?;
    ctx.authorize(
        Resource::Attendance,
        if existing.is_some() {
            Action::Update
        } else {
            Action::Create
        },
        Target {
            subject_id: Some(subject_id),
            student_id: Some(student_id),
        },
    )?;

    let mut row = Row::new();
    row.insert("status".into(), json!(status.as_str()));
    row.insert("marked_by".into(), json!(ctx.caller.user_id));
    if existing.is_some() {
        ctx.store.update("attendance", &key, row)?;
    } else {
        row.insert("id".into(), json!(Uuid::new_v4().to_string()));
        row.insert("student_id".into(), json!(student_id));
        row.insert("subject_id".into(), json!(subject_id));
        row.insert("date".into(), json!(date));
        ctx.store.insert("attendance", row)?;
    }
    Ok(fetch_one(&ctx.store, "attendance", &key)?)
}

fn date_param(params: &serde_json::Value) -> Result<String, HandlerErr> {
    Ok(model::parse_date(params.get("date"))?
        .format("%Y-%m-%d")
        .to_string())
}

fn mark(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = model::required_str(params.get("studentId"), "studentId")?;
    let subject_id = model::required_str(params.get("subjectId"), "subjectId")?;
    let date = date_param(params)?;
    let status = model::parse_status(params.get("status"))?;
    let record = write_status(ctx, &student_id, &subject_id, &date, status)?;
    Ok(json!({ "attendance": record }))
}

fn sheet_entry(entry: &serde_json::Value) -> Result<(String, AttendanceStatus), HandlerErr> {
    let student_id = model::required_str(entry.get("studentId"), "studentId")?;
    Ok((student_id, model::parse_status(entry.get("status"))?))
}

fn bulk_mark(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = model::required_str(params.get("subjectId"), "subjectId")?;
    let date = date_param(params)?;
    // One subject per sheet; a faculty outside it is refused before any row.
    ctx.authorize(
        Resource::Attendance,
        Action::Create,
        Target {
            subject_id: Some(&subject_id),
            ..Default::default()
        },
    )?;
    let entries = match bulk_entries(params, ctx.cfg.bulk_max_entries)? {
        Ok(entries) => entries,
        Err(rejection) => return Ok(rejection),
    };

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let outcome = sheet_entry(entry).and_then(|(student_id, status)| {
            write_status(ctx, &student_id, &subject_id, &date, status)
        });
        match outcome {
            Ok(_) => updated += 1,
            Err(e) => errors.push(e.entry(i)),
        }
    }
    log::info!(
        "attendance for {} on {}: {} marked, {} rejected",
        subject_id,
        date,
        updated,
        errors.len()
    );
    Ok(bulk_result(updated, errors))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = model::optional_str(params.get("studentId"));
    let subject_id = model::optional_str(params.get("subjectId"));
    let scope = ctx.authorize(
        Resource::Attendance,
        Action::Read,
        Target {
            subject_id: subject_id.as_deref(),
            student_id: student_id.as_deref(),
        },
    )?;

    let mut filter = Filter::new().order_by("date").order_by("subject_id");
    if let Some(s) = &student_id {
        filter = filter.eq("student_id", s.as_str());
    }
    if let Some(s) = &subject_id {
        filter = filter.eq("subject_id", s.as_str());
    }
    if params.get("date").is_some() {
        filter = filter.eq("date", date_param(params)?);
    }
    let records: Vec<AttendanceRecord> =
        fetch(&ctx.store, "attendance", &scope.narrow(Resource::Attendance, filter))?;
    Ok(json!({ "attendance": records }))
}

fn summary(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = ctx.student_param(params)?;
    let scope = ctx.authorize(
        Resource::Attendance,
        Action::Read,
        Target {
            student_id: Some(&student_id),
            ..Default::default()
        },
    )?;
    let profile: StudentProfile =
        fetch_one(&ctx.store, "students", &Filter::new().eq("id", student_id.as_str()))?;

    let filter = scope.narrow(
        Resource::Attendance,
        Filter::new().eq("student_id", profile.id.as_str()),
    );
    let records: Vec<AttendanceRecord> = fetch(&ctx.store, "attendance", &filter)?;
    let subjects = subjects_by_id(
        &ctx.store,
        records.iter().filter_map(|r| r.subject_id.as_deref()),
    )?;
    let rows: Vec<AttendanceRow> = records
        .iter()
        .filter_map(|r| AttendanceRow::join(r, &subjects))
        .collect();
    Ok(json!({
        "student_id": profile.id,
        "subjects": calc::attendance_summary(&rows),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(authed(state, req, mark)),
        "attendance.bulkMark" => Some(authed(state, req, bulk_mark)),
        "attendance.list" => Some(authed(state, req, list)),
        "attendance.summary" => Some(authed(state, req, summary)),
        _ => None,
    }
}
