use crate::auth::{self, Role};
use crate::config::{self, SetupSection};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::actor;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

fn setup_get(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(
            section.name().to_string(),
            config::load_section(conn, section)?,
        );
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    match config::update_section(conn, section, patch_obj)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?
    {
        Ok(current) => {
            tracing::info!(section = section.name(), "setup updated");
            let mut out = json!({ "ok": true });
            out[section.name()] = current;
            Ok(out)
        }
        Err(msg) => Err(HandlerErr::bad_params(msg)),
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match state.db_or_reply(&req.id) {
        Ok(conn) => conn,
        Err(reply) => return reply,
    };
    respond(&req.id, setup_get(conn))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match state.db_or_reply(&req.id) {
        Ok(conn) => conn,
        Err(reply) => return reply,
    };
    respond(&req.id, setup_update(conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
