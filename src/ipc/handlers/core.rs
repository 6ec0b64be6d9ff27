use crate::account;
use crate::config::Cfg;
use crate::db;
use crate::identity::SqliteIdentity;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let cfg = match Cfg::for_workspace(&path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{:#}", e);
            return err(&req.id, "bad_params", format!("{:#}", e), None);
        }
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("opening workspace {} failed: {:#}", path.display(), e);
            return err(&req.id, "db_failed", "failed to open workspace database", None);
        }
    };

    {
        let store = SqliteStore::new(&conn);
        let idp = SqliteIdentity::new(&conn, cfg.session_ttl_hours);
        if let Err(e) = account::ensure_default_admin(&idp, &store, &cfg) {
            log::error!("ensuring default admin failed: {:#}", e);
            return err(&req.id, "db_failed", "failed to prepare workspace", None);
        }
    }

    log::info!("workspace selected: {}", path.display());
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.cfg = cfg;
    ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
