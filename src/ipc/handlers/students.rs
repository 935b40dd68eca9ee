use crate::auth::{self, Role};
use crate::catalog;
use crate::config::StudentSettings;
use crate::export;
use crate::import::{self, TableFormat};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{actor, get_bool, get_opt_str, get_required_str, get_str_list, str_list};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, RequestedIds};
use crate::roster;
use crate::students::{self, Category, Gender, ProfileFields, StudentFilter, StudentProfile};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

fn text(key: &str, v: &Value) -> Result<String, HandlerErr> {
    match v {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

fn opt_text(key: &str, v: &Value) -> Result<Option<String>, HandlerErr> {
    Ok(Some(text(key, v)?).filter(|s| !s.is_empty()))
}

fn parsed<T>(
    key: &str,
    v: &Value,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, HandlerErr> {
    match opt_text(key, v)? {
        None => Ok(None),
        Some(s) => parse(&s)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("invalid {}: {}", key, s))),
    }
}

fn number_or_text<T>(
    key: &str,
    v: &Value,
    from_number: impl Fn(&serde_json::Number) -> Option<T>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, HandlerErr> {
    match v {
        Value::Number(n) => from_number(n)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("invalid {}: {}", key, n))),
        _ => parsed(key, v, parse),
    }
}

/// Applies form fields onto `fields`. With `reject_unknown`, keys outside
/// the profile form are an error.
fn apply_profile_patch(
    fields: &mut ProfileFields,
    patch: &Map<String, Value>,
    reject_unknown: bool,
) -> Result<(), HandlerErr> {
    for (k, v) in patch {
        match k.as_str() {
            "firstName" => fields.first_name = text(k, v)?,
            "lastName" => fields.last_name = text(k, v)?,
            "email" => fields.email = Some(text(k, v)?),
            "fatherName" => fields.father_name = text(k, v)?,
            "motherName" => fields.mother_name = text(k, v)?,
            "dob" => fields.dob = parsed(k, v, roster::parse_date)?,
            "mobileNo" => {
                fields.mobile_no = number_or_text(k, v, |n| n.as_i64(), roster::parse_mobile)?
            }
            "category" => fields.category = parsed(k, v, Category::parse)?,
            "gender" => fields.gender = parsed(k, v, Gender::parse)?,
            "currentAddress" => fields.current_address = text(k, v)?,
            "permanentAddress" => fields.permanent_address = text(k, v)?,
            "weight" => {
                fields.weight = number_or_text(
                    k,
                    v,
                    |n| n.as_f64().filter(|w| *w >= 0.0),
                    roster::parse_decimal,
                )?
            }
            "height" => {
                fields.height = number_or_text(
                    k,
                    v,
                    |n| n.as_f64().filter(|h| *h >= 0.0),
                    roster::parse_decimal,
                )?
            }
            "stream" => fields.stream = opt_text(k, v)?,
            "subjects" => fields.subjects = Some(str_list(k, v)?),
            "classroomId" => {}
            _ if reject_unknown => {
                return Err(HandlerErr::bad_params(format!("unknown student field: {}", k)))
            }
            _ => {}
        }
    }
    if fields.first_name.is_empty() {
        return Err(HandlerErr::bad_params("firstName must not be empty"));
    }
    if fields.last_name.is_empty() {
        return Err(HandlerErr::bad_params("lastName must not be empty"));
    }
    Ok(())
}

fn fields_of(p: &StudentProfile) -> ProfileFields {
    ProfileFields {
        first_name: p.first_name.clone(),
        last_name: p.last_name.clone(),
        email: Some(p.email.clone()),
        father_name: p.father_name.clone(),
        mother_name: p.mother_name.clone(),
        dob: p.dob,
        mobile_no: p.mobile_no,
        category: p.category,
        gender: p.gender,
        current_address: p.current_address.clone(),
        permanent_address: p.permanent_address.clone(),
        weight: p.weight,
        height: p.height,
        stream: p.stream.clone(),
        subjects: Some(p.subjects.clone()),
    }
}

fn filter_from(params: &Value) -> Result<StudentFilter, HandlerErr> {
    let mut classroom_ids = get_str_list(params, "classroomIds")?;
    if let Some(one) = get_opt_str(params, "classroomId") {
        classroom_ids.push(one);
    }
    Ok(StudentFilter {
        classroom_ids,
        search: get_opt_str(params, "search"),
    })
}

fn format_param(params: &Value, default: &str) -> Result<TableFormat, HandlerErr> {
    let raw = get_opt_str(params, "format").unwrap_or_else(|| default.to_string());
    TableFormat::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unsupported format: {}", raw)))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin, Role::Teacher])?;
    let profiles = students::list_profiles(conn, &filter_from(params)?)?;
    Ok(json!({ "students": profiles }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let who = auth::require_role(
        conn,
        actor(params).as_deref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let student_id = get_required_str(params, "studentId")?;
    let profile = students::get_profile(conn, &student_id)?;
    if !students::can_view(&who, &profile) {
        return Err(HandlerErr::new("forbidden", "students may only view their own profile"));
    }
    Ok(json!({ "student": profile }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let classroom = catalog::get_classroom(conn, &get_required_str(params, "classroomId")?)?;
    let Some(obj) = params.as_object() else {
        return Err(HandlerErr::bad_params("params must be an object"));
    };
    let mut fields = ProfileFields::default();
    apply_profile_patch(&mut fields, obj, false)?;
    let requested = RequestedIds {
        admission_no: get_opt_str(params, "admissionNo"),
        roll_no: get_opt_str(params, "rollNo"),
        username: get_opt_str(params, "username"),
    };
    let settings = StudentSettings::load(conn)?;
    let mut rng = rand::thread_rng();
    let issued =
        reconcile::create_student(conn, &mut rng, &settings, &classroom, &requested, &fields)?;
    tracing::info!(
        student_id = %issued.student_id,
        username = %issued.username,
        classroom = %classroom.label(),
        "student created"
    );
    Ok(json!({ "student": issued }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let current = students::get_profile(conn, &student_id)?;
    let classroom_id = match patch.get("classroomId") {
        Some(v) => opt_text("classroomId", v)?.unwrap_or_else(|| current.classroom_id.clone()),
        None => current.classroom_id.clone(),
    };
    let classroom = catalog::get_classroom(conn, &classroom_id)?;
    let mut fields = fields_of(&current);
    apply_profile_patch(&mut fields, patch, true)?;
    reconcile::update_student(conn, &student_id, &classroom, &fields)?;
    Ok(json!({ "student": students::get_profile(conn, &student_id)? }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let student_id = get_required_str(params, "studentId")?;
    let username = students::delete_student(conn, &student_id)?;
    Ok(json!({ "deleted": true, "username": username }))
}

fn students_import(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let classroom = catalog::get_classroom(conn, &get_required_str(params, "classroomId")?)?;
    let in_path = PathBuf::from(get_required_str(params, "inPath")?);
    let format = get_opt_str(params, "format");
    let overwrite = get_bool(params, "overwriteExisting", false)?;
    let settings = StudentSettings::load(conn)?;
    let mut rng = rand::thread_rng();
    let summary = import::import_file(
        conn,
        &mut rng,
        &settings,
        &classroom,
        &in_path,
        format.as_deref(),
        overwrite,
    )?;
    Ok(json!(summary))
}

fn students_export(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let settings = StudentSettings::load(conn)?;
    let format = format_param(params, &settings.default_export_format)?;
    let profiles = students::list_profiles(conn, &filter_from(params)?)?;
    let summary = export::export_profiles(&profiles, format, &out_path)?;
    Ok(json!(summary))
}

fn students_import_template(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    auth::require_role(conn, actor(params).as_deref(), &[Role::Admin])?;
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let settings = StudentSettings::load(conn)?;
    let format = format_param(params, &settings.default_export_format)?;
    let summary = export::write_template(format, &out_path)?;
    Ok(json!(summary))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str()
    {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.import" => students_import,
        "students.export" => students_export,
        "students.importTemplate" => students_import_template,
        _ => return None,
    };
    let conn = match state.db_or_reply(&req.id) {
        Ok(conn) => conn,
        Err(reply) => return Some(reply),
    };
    Some(respond(&req.id, handler(conn, &req.params)))
}
