use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Cfg;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Session token from `auth.login`. Absent for `health`,
    /// `workspace.select` and `auth.login`.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub cfg: Cfg,
}
