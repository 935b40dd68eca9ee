use crate::auth::{self, Role};
use crate::config;
use crate::db;
use crate::demo;
use crate::ipc::error::{err, ok, respond, HandlerErr};
use crate::ipc::params::{actor, get_bool, get_opt_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Opens (creating if needed) the workspace database and makes it current.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), "workspace opened");
    Ok(())
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

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn param_or_env(params: &serde_json::Value, key: &str, var: &str) -> Option<String> {
    get_opt_str(params, key).or_else(|| {
        std::env::var(var)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn first_run(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(username) = param_or_env(params, "username", "SCHOOLD_ADMIN_USERNAME") else {
        return Err(HandlerErr::bad_params(
            "missing username (or SCHOOLD_ADMIN_USERNAME)",
        ));
    };
    let Some(password) = param_or_env(params, "password", "SCHOOLD_ADMIN_PASSWORD") else {
        return Err(HandlerErr::bad_params(
            "missing password (or SCHOOLD_ADMIN_PASSWORD)",
        ));
    };
    let email = param_or_env(params, "email", "SCHOOLD_ADMIN_EMAIL").unwrap_or_default();
    let min_len = config::min_password_length(conn)?;

    let created = auth::first_run(conn, &username, &password, &email, min_len)?;
    if created {
        tracing::info!(username = %username, "bootstrap admin created");
    }
    Ok(json!({ "created": created, "username": username }))
}

fn handle_first_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.db_or_reply(&req.id) {
        Ok(conn) => conn,
        Err(reply) => return reply,
    };
    respond(&req.id, first_run(conn, &req.params))
}

fn demo_seed(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let reset = get_bool(params, "reset", false)?;
    // An unconfigured workspace may be seeded by anyone; after that only Admins.
    if reset || auth::admin_exists(conn)? {
        auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    }
    Ok(json!(demo::seed_demo(conn, reset)?))
}

fn handle_demo_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.db_or_reply(&req.id) {
        Ok(conn) => conn,
        Err(reply) => return reply,
    };
    respond(&req.id, demo_seed(conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "setup.firstRun" => Some(handle_first_run(state, req)),
        "setup.demoSeed" => Some(handle_demo_seed(state, req)),
        _ => None,
    }
}
