use crate::access::{self, Action, Resource, Target};
use crate::account;
use crate::backup;
use crate::db;
use crate::identity::SqliteIdentity;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{require_db, resolve_caller};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Bundles move the whole workspace, so both directions are admin-only.
fn require_admin(state: &AppState, req: &Request, action: Action) -> Result<PathBuf, HandlerErr> {
    let conn = require_db(state)?;
    let store = SqliteStore::new(conn);
    let idp = SqliteIdentity::new(conn, state.cfg.session_ttl_hours);
    let caller = resolve_caller(&store, &idp, req.token.as_deref())?;
    access::authorize(&caller, Resource::Workspace, action, Target::default()).map_err(|e| {
        log::warn!("{} {} denied {}: {}", caller.role, caller.user_id, req.method, e);
        HandlerErr::from(e)
    })?;
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn path_param(req: &Request, key: &str) -> Result<PathBuf, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn io_failed(e: anyhow::Error) -> HandlerErr {
    log::error!("{:#}", e);
    HandlerErr::new("io_failed", format!("{:#}", e))
}

fn export_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let workspace = require_admin(state, req, Action::Read)?;
    let out_path = path_param(req, "outPath")?;
    let summary = backup::export_workspace_bundle(&workspace, &out_path).map_err(io_failed)?;
    Ok(json!({
        "ok": true,
        "bundleFormat": summary.bundle_format,
        "dbSha256": summary.db_sha256,
        "dbBytes": summary.db_bytes,
        "outPath": out_path.to_string_lossy(),
    }))
}

fn reopen(state: &mut AppState, workspace: &Path) -> Result<(), HandlerErr> {
    let conn = db::open_db(workspace).map_err(|e| {
        log::error!("reopening workspace {} failed: {:#}", workspace.display(), e);
        HandlerErr::new("db_failed", "failed to open workspace database")
    })?;
    {
        let store = SqliteStore::new(&conn);
        let idp = SqliteIdentity::new(&conn, state.cfg.session_ttl_hours);
        account::ensure_default_admin(&idp, &store, &state.cfg).map_err(|e| {
            log::error!("ensuring default admin failed: {:#}", e);
            HandlerErr::new("db_failed", "failed to prepare workspace")
        })?;
    }
    state.db = Some(conn);
    Ok(())
}

fn import_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let workspace = require_admin(state, req, Action::Update)?;
    let in_path = path_param(req, "inPath")?;

    // The database file is replaced underneath us; close it first.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    reopen(state, &workspace)?;
    let summary = imported.map_err(io_failed)?;

    log::info!("workspace {} restored from {}", workspace.display(), in_path.display());
    Ok(json!({
        "ok": true,
        "bundleFormat": summary.bundle_format,
        "exportedAt": summary.exported_at,
        "dbSha256": summary.db_sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "backup.exportBundle" => export_bundle(state, req),
        "backup.importBundle" => import_bundle(state, req),
        _ => return None,
    };
    Some(match outcome {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
