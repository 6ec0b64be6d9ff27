use crate::identity::{IdentityProvider, SqliteIdentity};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{authed, require_db, resolve_caller, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, User};
use crate::store::{fetch_one, Filter, SqliteStore};
use serde_json::json;

fn caller_json(user: &User, profile_id: Option<&str>, subjects: Vec<&str>) -> serde_json::Value {
    json!({
        "user": {
            "id": user.id,
            "email": user.email,
            "fullName": user.full_name,
            "role": user.role,
        },
        "profileId": profile_id,
        "assignedSubjects": subjects,
    })
}

fn login(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let email = model::required_str(params.get("email"), "email")?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;

    let store = SqliteStore::new(conn);
    let idp = SqliteIdentity::new(conn, state.cfg.session_ttl_hours);
    let session = idp.authenticate(&email, password).map_err(|e| {
        log::warn!("login failed for {}: {}", email, e);
        HandlerErr::from(e)
    })?;
    let caller = match resolve_caller(&store, &idp, Some(&session.token)) {
        Ok(c) => c,
        Err(e) => {
            // Identity without a usable user row; do not leave the session behind.
            let _ = idp.revoke_session(&session.token);
            return Err(e);
        }
    };
    let user: User = fetch_one(&store, "users", &Filter::new().eq("id", caller.user_id.as_str()))?;
    log::info!("{} ({}) logged in as {}", user.email, session.subject_id, caller.role);

    let mut result = caller_json(
        &user,
        caller.profile_id.as_deref(),
        caller.assigned_subjects.iter().map(|s| s.as_str()).collect(),
    );
    result["token"] = json!(session.token);
    result["expiresAt"] = json!(session.expires_at);
    Ok(result)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    match login(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn logout(ctx: &Ctx<'_>, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    ctx.idp.revoke_session(&ctx.token)?;
    log::info!("user {} logged out", ctx.caller.user_id);
    Ok(json!({ "ok": true }))
}

fn me(ctx: &Ctx<'_>, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user: User = fetch_one(
        &ctx.store,
        "users",
        &Filter::new().eq("id", ctx.caller.user_id.as_str()),
    )?;
    Ok(caller_json(
        &user,
        ctx.caller.profile_id.as_deref(),
        ctx.caller.assigned_subjects.iter().map(|s| s.as_str()).collect(),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(authed(state, req, logout)),
        "auth.me" => Some(authed(state, req, me)),
        _ => None,
    }
}
