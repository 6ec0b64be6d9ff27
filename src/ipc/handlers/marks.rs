use crate::access::{Action, Resource, Role, Scope, Target};
use crate::calc::{self, MarkRow, Visibility};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, bool_param, bulk_entries, bulk_result, subjects_by_id, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, ExamType, MarkRecord, StudentProfile};
use crate::store::{fetch, fetch_one, fetch_optional, Filter, Row, Store, StoreError};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use uuid::Uuid;

struct MarkInput {
    student_id: String,
    subject_id: String,
    exam_type: ExamType,
    marks_obtained: f64,
    max_marks: f64,
}

fn parse_mark(v: &serde_json::Value, default_subject: Option<&str>) -> Result<MarkInput, HandlerErr> {
    let subject_id = match model::optional_str(v.get("subjectId")) {
        Some(s) => s,
        None => default_subject
            .map(|s| s.to_string())
            .ok_or_else(|| HandlerErr::bad_params("missing subjectId"))?,
    };
    let marks_obtained = model::parse_number(v.get("marksObtained"), "marksObtained")?;
    let max_marks = model::parse_number(v.get("maxMarks"), "maxMarks")?;
    model::validate_marks(marks_obtained, max_marks)?;
    Ok(MarkInput {
        student_id: model::required_str(v.get("studentId"), "studentId")?,
        subject_id,
        exam_type: model::parse_exam_type(v.get("examType"))?,
        marks_obtained,
        max_marks,
    })
}

fn write_mark(ctx: &Ctx<'_>, input: &MarkInput) -> Result<MarkRecord, HandlerErr> {
    let key = Filter::new()
        .eq("student_id", input.student_id.as_str())
        .eq("subject_id", input.subject_id.as_str())
        .eq("exam_type", input.exam_type.as_str());
    let existing: Option<MarkRecord> = fetch_optional(&ctx.store, "marks", &key)?;
    let action = if existing.is_some() {
        Action::Update
    } else {
        Action::Create
    };
    ctx.authorize(
        Resource::Mark,
        action,
        Target {
            subject_id: Some(&input.subject_id),
            student_id: Some(&input.student_id),
        },
    )?;

    let mut row = Row::new();
    row.insert("marks_obtained".into(), json!(input.marks_obtained));
    row.insert("max_marks".into(), json!(input.max_marks));
    row.insert(
        "updated_at".into(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    if existing.is_some() {
        // Only admins publish, so an edit by anyone else goes back to draft.
        if ctx.caller.role != Role::Admin {
            row.insert("published".into(), json!(false));
        }
        ctx.store.update("marks", &key, row)?;
    } else {
        row.insert("id".into(), json!(Uuid::new_v4().to_string()));
        row.insert("student_id".into(), json!(input.student_id));
        row.insert("subject_id".into(), json!(input.subject_id));
        row.insert("exam_type".into(), json!(input.exam_type.as_str()));
        row.insert("published".into(), json!(false));
        ctx.store.insert("marks", row)?;
    }
    log::trace!(
        "mark {}/{}/{} written by {}",
        input.student_id,
        input.subject_id,
        input.exam_type,
        ctx.caller.user_id
    );
    Ok(fetch_one(&ctx.store, "marks", &key)?)
}

fn upsert(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input = parse_mark(params, None)?;
    let mark = write_mark(ctx, &input)?;
    Ok(json!({ "mark": mark }))
}

fn bulk_upsert(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let entries = match bulk_entries(params, ctx.cfg.bulk_max_entries)? {
        Ok(entries) => entries,
        Err(rejection) => return Ok(rejection),
    };
    let default_subject = model::optional_str(params.get("subjectId"));

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if !entry.is_object() {
            errors.push(HandlerErr::bad_params(format!("entry at index {} must be an object", i)).entry(i));
            continue;
        }
        let outcome = parse_mark(entry, default_subject.as_deref()).and_then(|m| write_mark(ctx, &m));
        match outcome {
            Ok(_) => updated += 1,
            Err(e) => errors.push(e.entry(i)),
        }
    }
    Ok(bulk_result(updated, errors))
}

fn list(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = model::optional_str(params.get("studentId"));
    let subject_id = model::optional_str(params.get("subjectId"));
    let scope = ctx.authorize(
        Resource::Mark,
        Action::Read,
        Target {
            subject_id: subject_id.as_deref(),
            student_id: student_id.as_deref(),
        },
    )?;

    let mut filter = Filter::new().order_by("subject_id").order_by("exam_type");
    if let Some(s) = &student_id {
        filter = filter.eq("student_id", s.as_str());
    }
    if let Some(s) = &subject_id {
        filter = filter.eq("subject_id", s.as_str());
    }
    if params.get("examType").is_some() {
        filter = filter.eq("exam_type", model::parse_exam_type(params.get("examType"))?.as_str());
    }
    let marks: Vec<MarkRecord> = fetch(&ctx.store, "marks", &scope.narrow(Resource::Mark, filter))?;
    Ok(json!({ "marks": marks }))
}

fn delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mark_id = model::required_str(params.get("markId"), "markId")?;
    let by_id = Filter::new().eq("id", mark_id.as_str());
    let mark: MarkRecord = fetch_one(&ctx.store, "marks", &by_id)?;
    ctx.authorize(
        Resource::Mark,
        Action::Delete,
        Target {
            subject_id: mark.subject_id.as_deref(),
            student_id: Some(&mark.student_id),
        },
    )?;
    ctx.store.delete("marks", &by_id)?;
    Ok(json!({ "ok": true }))
}

fn publish(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = model::required_str(params.get("subjectId"), "subjectId")?;
    let student_id = model::optional_str(params.get("studentId"));
    ctx.authorize(
        Resource::Mark,
        Action::Publish,
        Target {
            subject_id: Some(&subject_id),
            student_id: student_id.as_deref(),
        },
    )?;
    let published = bool_param(params, "published", true)?;

    let mut filter = Filter::new().eq("subject_id", subject_id.as_str());
    if let Some(s) = &student_id {
        filter = filter.eq("student_id", s.as_str());
    }
    if params.get("examType").is_some() {
        filter = filter.eq("exam_type", model::parse_exam_type(params.get("examType"))?.as_str());
    }
    let mut patch = Row::new();
    patch.insert("published".into(), json!(published));
    let updated = match ctx.store.update("marks", &filter, patch) {
        Ok(rows) => rows.len(),
        Err(StoreError::NotFound { .. }) => 0,
        Err(e) => return Err(e.into()),
    };
    log::info!(
        "{} marks in subject {} set published={}",
        updated,
        subject_id,
        published
    );
    Ok(json!({ "updated": updated, "published": published }))
}

/// Marks for one student, joined with their subjects, as visible to the caller.
fn student_rows(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<(StudentProfile, Vec<MarkRow>, Visibility), HandlerErr> {
    let student_id = ctx.student_param(params)?;
    let scope = ctx.authorize(
        Resource::Mark,
        Action::Read,
        Target {
            student_id: Some(&student_id),
            ..Default::default()
        },
    )?;
    // Aggregates cover published marks; staff may opt into drafts.
    let visibility = match scope {
        Scope::OwnRecords {
            published_only: true,
            ..
        } => Visibility::PublishedOnly,
        _ if bool_param(params, "includeDrafts", false)? => Visibility::All,
        _ => Visibility::PublishedOnly,
    };

    let profile: StudentProfile =
        fetch_one(&ctx.store, "students", &Filter::new().eq("id", student_id.as_str()))?;
    let filter = scope.narrow(
        Resource::Mark,
        Filter::new().eq("student_id", student_id.as_str()),
    );
    let marks: Vec<MarkRecord> = fetch(&ctx.store, "marks", &filter)?;
    let subjects = subjects_by_id(&ctx.store, marks.iter().filter_map(|m| m.subject_id.as_deref()))?;
    let rows = marks
        .iter()
        .filter_map(|m| MarkRow::join(m, &subjects))
        .collect();
    Ok((profile, rows, visibility))
}

fn cgpa(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (profile, rows, visibility) = student_rows(ctx, params)?;
    let mut result = json!(calc::cgpa_summary(&rows, visibility));
    result["student_id"] = json!(profile.id);
    Ok(result)
}

fn semester_summary(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (profile, rows, visibility) = student_rows(ctx, params)?;
    let mut result = json!(calc::semester_summary(&rows, visibility, profile.current_semester));
    result["student_id"] = json!(profile.id);
    Ok(result)
}

fn breakdown(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (profile, rows, visibility) = student_rows(ctx, params)?;
    Ok(json!({
        "student_id": profile.id,
        "subjects": calc::subject_breakdown(&rows, visibility),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.upsert" => Some(authed(state, req, upsert)),
        "marks.bulkUpsert" => Some(authed(state, req, bulk_upsert)),
        "marks.list" => Some(authed(state, req, list)),
        "marks.delete" => Some(authed(state, req, delete)),
        "marks.publish" => Some(authed(state, req, publish)),
        "marks.cgpa" => Some(authed(state, req, cgpa)),
        "marks.semesterSummary" => Some(authed(state, req, semester_summary)),
        "marks.breakdown" => Some(authed(state, req, breakdown)),
        _ => None,
    }
}
