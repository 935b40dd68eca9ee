use crate::auth::{self, Role};
use crate::catalog;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{actor, get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn seed(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let summary = catalog::seed(conn)?;
    Ok(json!(summary))
}

fn classes_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let classes = catalog::list_classrooms(conn)?
        .into_iter()
        .map(|(c, count)| {
            json!({
                "id": c.id,
                "grade": c.grade,
                "section": c.section,
                "label": c.label(),
                "studentCount": count,
            })
        })
        .collect::<Vec<_>>();
    Ok(json!({ "classes": classes }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let grade = get_required_str(params, "grade")?;
    let section = get_opt_str(params, "section");
    let classroom = catalog::create_classroom(conn, &grade, section.as_deref())?;
    tracing::info!(classroom = %classroom.label(), "classroom created");
    Ok(json!({ "classId": classroom.id, "label": classroom.label() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "catalog.seed" | "classes.list" | "classes.create" | "subjects.list" | "streams.list" => {
            let conn = match state.db_or_reply(&req.id) {
                Ok(conn) => conn,
                Err(reply) => return Some(reply),
            };
            match req.method.as_str() {
                "catalog.seed" => seed(conn, &req.params),
                "classes.list" => classes_list(conn),
                "classes.create" => classes_create(conn, &req.params),
                "subjects.list" => catalog::list_subjects(conn)
                    .map(|s| json!({ "subjects": s }))
                    .map_err(HandlerErr::from),
                _ => catalog::list_streams(conn)
                    .map(|s| json!({ "streams": s }))
                    .map_err(HandlerErr::from),
            }
        }
        _ => return None,
    };
    Some(respond(&req.id, result))
}
