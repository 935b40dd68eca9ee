use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;

use super::error::err;

/// One request line: `{"id", "method", "params"}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// The selected workspace directory and its open registry database.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    /// The registry database, or the `no_workspace` reply for request `id`.
    pub fn db_or_reply(&self, id: &str) -> Result<&Connection, Value> {
        self.db
            .as_ref()
            .ok_or_else(|| err(id, "no_workspace", "select a workspace first", None))
    }
}
