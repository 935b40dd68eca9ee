use crate::auth::{self, NewAccount, Role};
use crate::config;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{actor, get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn login(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let Some(password) = params.get("password").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing password"));
    };
    let who = auth::login(conn, &username, password)?;
    Ok(json!({
        "accountId": who.account_id,
        "username": who.username,
        "role": who.role,
    }))
}

fn create_staff(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let role_raw = get_required_str(params, "role")?;
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::bad_params("role must be Admin or Teacher"));
    };
    let username = get_required_str(params, "username")?;
    let Some(password) = params.get("password").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing password"));
    };
    let first_name = get_opt_str(params, "firstName").unwrap_or_default();
    let last_name = get_opt_str(params, "lastName").unwrap_or_default();
    let email = get_opt_str(params, "email").unwrap_or_default();
    let min_len = config::min_password_length(conn)?;

    let account_id = auth::create_staff(
        conn,
        &NewAccount {
            username: &username,
            password,
            first_name: &first_name,
            last_name: &last_name,
            email: &email,
        },
        role,
        min_len,
    )?;
    Ok(json!({ "accountId": account_id, "username": username, "role": role }))
}

fn handle_login(state: &mut AppState, req: &Request) -> Value {
    let conn = match state.db_or_reply(&req.id) {
        Ok(conn) => conn,
        Err(reply) => return reply,
    };
    respond(&req.id, login(conn, &req.params))
}

fn handle_create_staff(state: &mut AppState, req: &Request) -> Value {
    let conn = match state.db_or_reply(&req.id) {
        Ok(conn) => conn,
        Err(reply) => return reply,
    };
    respond(&req.id, create_staff(conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "accounts.createStaff" => Some(handle_create_staff(state, req)),
        _ => None,
    }
}
