use crate::access::{self, AccessError, Action, Caller, Resource, Role, Scope, Target};
use crate::config::Cfg;
use crate::identity::{IdentityProvider, SqliteIdentity};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{FacultyAssignment, FacultyProfile, StudentProfile, Subject, User};
use crate::store::{fetch, fetch_optional, Filter, SqliteStore, Store};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

/// Everything an authenticated handler needs for one request.
pub struct Ctx<'a> {
    pub store: SqliteStore<'a>,
    pub idp: SqliteIdentity<'a>,
    pub cfg: &'a Cfg,
    pub caller: Caller,
    pub token: String,
}

pub type Handler = fn(&Ctx<'_>, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

impl Ctx<'_> {
    pub fn authorize(
        &self,
        resource: Resource,
        action: Action,
        target: Target<'_>,
    ) -> Result<Scope, HandlerErr> {
        access::authorize(&self.caller, resource, action, target).map_err(|e| {
            log::warn!(
                "{} {} denied {:?} on {:?}: {}",
                self.caller.role,
                self.caller.user_id,
                action,
                resource,
                e
            );
            HandlerErr::from(e)
        })
    }

    /// The student a per-student read is about. Students default to their own
    /// profile; everyone else must name one.
    pub fn student_param(&self, params: &serde_json::Value) -> Result<String, HandlerErr> {
        if let Some(id) = params.get("studentId").and_then(|v| v.as_str()) {
            return Ok(id.to_string());
        }
        match (self.caller.role, &self.caller.profile_id) {
            (Role::Student, Some(own)) => Ok(own.clone()),
            (Role::Student, None) => Err(AccessError::ProfileNotFound.into()),
            _ => Err(HandlerErr::bad_params("missing studentId")),
        }
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn resolve_caller(
    store: &dyn Store,
    idp: &dyn IdentityProvider,
    token: Option<&str>,
) -> Result<Caller, HandlerErr> {
    let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(AccessError::Unauthorized.into());
    };
    let user_id = idp.resolve_session(token)?;
    let user: Option<User> = fetch_optional(store, "users", &Filter::new().eq("id", user_id.as_str()))?;
    let Some(user) = user else {
        log::warn!("session for {} has no user row", user_id);
        return Err(AccessError::Unauthorized.into());
    };
    let role: Role = user.role.parse().map_err(|e: AccessError| {
        log::warn!("user {} has unknown role {:?}", user.id, user.role);
        HandlerErr::from(e)
    })?;

    let by_user = Filter::new().eq("user_id", user.id.as_str());
    let (profile_id, assigned_subjects) = match role {
        Role::Admin => (None, BTreeSet::new()),
        Role::Student => {
            let p: Option<StudentProfile> = fetch_optional(store, "students", &by_user)?;
            (p.map(|p| p.id), BTreeSet::new())
        }
        Role::Faculty => match fetch_optional::<FacultyProfile>(store, "faculty", &by_user)? {
            Some(p) => {
                let assignments: Vec<FacultyAssignment> = fetch(
                    store,
                    "faculty_subjects",
                    &Filter::new().eq("faculty_id", p.id.as_str()),
                )?;
                (
                    Some(p.id),
                    assignments.into_iter().map(|a| a.subject_id).collect(),
                )
            }
            None => (None, BTreeSet::new()),
        },
    };

    Ok(Caller {
        user_id: user.id,
        role,
        profile_id,
        assigned_subjects,
    })
}

fn run_authed(
    state: &AppState,
    req: &Request,
    handler: Handler,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let store = SqliteStore::new(conn);
    let idp = SqliteIdentity::new(conn, state.cfg.session_ttl_hours);
    let caller = resolve_caller(&store, &idp, req.token.as_deref())?;
    log::trace!("{} by {} ({})", req.method, caller.user_id, caller.role);
    let ctx = Ctx {
        store,
        idp,
        cfg: &state.cfg,
        caller,
        token: req.token.clone().unwrap_or_default(),
    };
    handler(&ctx, &req.params)
}

/// Resolves the session and runs `handler`, turning its outcome into a
/// response line.
pub fn authed(state: &AppState, req: &Request, handler: Handler) -> serde_json::Value {
    match run_authed(state, req, handler) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn subjects_by_id<'i, I>(store: &dyn Store, ids: I) -> Result<HashMap<String, Subject>, HandlerErr>
where
    I: IntoIterator<Item = &'i str>,
{
    let ids: BTreeSet<&str> = ids.into_iter().collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let subjects: Vec<Subject> = fetch(store, "subjects", &Filter::new().is_in("id", ids))?;
    Ok(subjects.into_iter().map(|s| (s.id.clone(), s)).collect())
}

/// Entries of a bulk payload, or the whole-payload rejection result when the
/// payload is over the configured limit.
pub fn bulk_entries<'p>(
    params: &'p serde_json::Value,
    max: usize,
) -> Result<Result<&'p Vec<serde_json::Value>, serde_json::Value>, HandlerErr> {
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries[]"));
    };
    if entries.len() > max {
        let rejected = entries.len();
        log::warn!("bulk payload of {} entries exceeds limit {}", rejected, max);
        return Ok(Err(json!({
            "ok": true,
            "updated": 0,
            "rejected": rejected,
            "limitExceeded": true,
            "errors": [{
                "index": -1,
                "code": "too_many_entries",
                "message": format!("bulk payload exceeds max entries: {} > {}", rejected, max),
            }]
        })));
    }
    Ok(Ok(entries))
}

pub fn bulk_result(updated: usize, errors: Vec<serde_json::Value>) -> serde_json::Value {
    let mut result = json!({ "ok": true, "updated": updated });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = json!(errors);
    }
    result
}

/// Optional boolean parameter; absent or null yields `default`.
pub fn bool_param(params: &serde_json::Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}
