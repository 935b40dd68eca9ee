//! Student profile persistence: queries, edits and deletion.

use crate::auth;
use crate::catalog;
use crate::error::{RegistryError, RegistryResult};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    General,
    Obc,
    Sc,
    St,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::General => "GENERAL",
            Category::Obc => "OBC",
            Category::Sc => "SC",
            Category::St => "ST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GENERAL" | "GEN" => Some(Category::General),
            "OBC" => Some(Category::Obc),
            "SC" => Some(Category::Sc),
            "ST" => Some(Category::St),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MALE" | "M" => Some(Gender::Male),
            "FEMALE" | "F" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Editable profile data shared by the add form, the edit form and bulk import.
///
/// `email`, `stream` and `subjects` are `None` when the source did not
/// provide them; an update then leaves the stored value alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileFields {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub father_name: String,
    pub mother_name: String,
    pub dob: Option<NaiveDate>,
    pub mobile_no: Option<i64>,
    pub category: Option<Category>,
    pub gender: Option<Gender>,
    pub current_address: String,
    pub permanent_address: String,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub stream: Option<String>,
    pub subjects: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub account_id: String,
    pub sr_no: i64,
    pub roll_no: String,
    pub admission_no: Option<String>,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub father_name: String,
    pub mother_name: String,
    pub dob: Option<NaiveDate>,
    pub mobile_no: Option<i64>,
    pub category: Option<Category>,
    pub gender: Option<Gender>,
    pub current_address: String,
    pub permanent_address: String,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub classroom_id: String,
    pub classroom: String,
    pub stream: Option<String>,
    pub subjects: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct StudentFilter {
    pub classroom_ids: Vec<String>,
    pub search: Option<String>,
}

const PROFILE_SELECT: &str = "SELECT s.id, s.account_id, s.sr_no, s.roll_no, s.admission_no,
        a.username, a.first_name, a.last_name, a.email,
        s.father_name, s.mother_name, s.dob, s.mobile_no, s.category, s.gender,
        s.current_address, s.permanent_address, s.weight, s.height,
        s.classroom_id, c.grade, c.section, st.name
     FROM students s
     JOIN accounts a ON a.id = s.account_id
     JOIN classrooms c ON c.id = s.classroom_id
     LEFT JOIN streams st ON st.id = s.stream_id";

fn profile_from_row(r: &Row<'_>) -> rusqlite::Result<StudentProfile> {
    let dob: Option<String> = r.get(11)?;
    let category: Option<String> = r.get(13)?;
    let gender: Option<String> = r.get(14)?;
    let classroom = catalog::Classroom {
        id: r.get(19)?,
        grade: r.get(20)?,
        section: r.get(21)?,
    };
    Ok(StudentProfile {
        id: r.get(0)?,
        account_id: r.get(1)?,
        sr_no: r.get(2)?,
        roll_no: r.get(3)?,
        admission_no: r.get(4)?,
        username: r.get(5)?,
        first_name: r.get(6)?,
        last_name: r.get(7)?,
        email: r.get(8)?,
        father_name: r.get(9)?,
        mother_name: r.get(10)?,
        dob: dob.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        mobile_no: r.get(12)?,
        category: category.as_deref().and_then(Category::parse),
        gender: gender.as_deref().and_then(Gender::parse),
        current_address: r.get(15)?,
        permanent_address: r.get(16)?,
        weight: r.get(17)?,
        height: r.get(18)?,
        classroom: classroom.label(),
        classroom_id: classroom.id,
        stream: r.get(22)?,
        subjects: Vec::new(),
    })
}

fn subject_names(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT sub.name FROM student_subjects ss
         JOIN subjects sub ON sub.id = ss.subject_id
         WHERE ss.student_id = ?
         ORDER BY sub.name",
    )?;
    let names = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn list_profiles(conn: &Connection, filter: &StudentFilter) -> RegistryResult<Vec<StudentProfile>> {
    let mut sql = format!("{PROFILE_SELECT} WHERE 1 = 1");
    let mut binds: Vec<SqlValue> = Vec::new();
    if !filter.classroom_ids.is_empty() {
        let marks = vec!["?"; filter.classroom_ids.len()].join(", ");
        sql.push_str(&format!(" AND s.classroom_id IN ({marks})"));
        binds.extend(filter.classroom_ids.iter().cloned().map(SqlValue::Text));
    }
    if let Some(q) = filter.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        sql.push_str(
            " AND (lower(a.first_name) LIKE ? ESCAPE '\\' OR lower(a.last_name) LIKE ? ESCAPE '\\'
                   OR lower(a.username) LIKE ? ESCAPE '\\')",
        );
        let pattern = format!("%{}%", like_literal(&q.to_lowercase()));
        for _ in 0..3 {
            binds.push(SqlValue::Text(pattern.clone()));
        }
    }
    sql.push_str(" ORDER BY c.rowid, s.roll_no, s.sr_no");

    let mut stmt = conn.prepare(&sql)?;
    let mut profiles = stmt
        .query_map(params_from_iter(binds), profile_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for p in &mut profiles {
        p.subjects = subject_names(conn, &p.id)?;
    }
    Ok(profiles)
}

/// Escapes `LIKE` wildcards so the text matches literally under `ESCAPE '\'`.
fn like_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn get_profile(conn: &Connection, student_id: &str) -> RegistryResult<StudentProfile> {
    let sql = format!("{PROFILE_SELECT} WHERE s.id = ?");
    let profile = conn
        .query_row(&sql, [student_id], profile_from_row)
        .optional()?;
    let Some(mut profile) = profile else {
        return Err(RegistryError::NotFound {
            entity: "student",
            id: student_id.to_string(),
        });
    };
    profile.subjects = subject_names(conn, &profile.id)?;
    Ok(profile)
}

pub fn find_id_by_admission_no(conn: &Connection, admission_no: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM students WHERE admission_no = ?",
        [admission_no],
        |r| r.get(0),
    )
    .optional()
}

pub fn admission_no_exists(conn: &Connection, admission_no: &str) -> rusqlite::Result<bool> {
    Ok(find_id_by_admission_no(conn, admission_no)?.is_some())
}

pub fn count_in_classroom(conn: &Connection, classroom_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM students WHERE classroom_id = ?",
        [classroom_id],
        |r| r.get(0),
    )
}

pub fn roll_no_exists(conn: &Connection, classroom_id: &str, roll_no: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE classroom_id = ? AND roll_no = ?",
            (classroom_id, roll_no),
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

pub fn next_sr_no(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(sr_no), 0) + 1 FROM students", [], |r| r.get(0))
}

fn resolve_stream(conn: &Connection, name: Option<&str>) -> RegistryResult<Option<String>> {
    match name.map(str::trim).filter(|s| !s.is_empty()) {
        Some(n) => catalog::find_stream_id(conn, n),
        None => Ok(None),
    }
}

/// Replaces the subject links with the names that resolve; unknown names are dropped.
pub fn replace_subjects(conn: &Connection, student_id: &str, names: &[String]) -> RegistryResult<()> {
    conn.execute("DELETE FROM student_subjects WHERE student_id = ?", [student_id])?;
    for name in names {
        match catalog::find_subject_id(conn, name)? {
            Some(subject_id) => {
                conn.execute(
                    "INSERT OR IGNORE INTO student_subjects(student_id, subject_id) VALUES(?, ?)",
                    (student_id, &subject_id),
                )?;
            }
            None => tracing::debug!(subject = %name, "unknown subject ignored"),
        }
    }
    Ok(())
}

pub fn insert_profile(
    conn: &Connection,
    student_id: &str,
    account_id: &str,
    classroom_id: &str,
    roll_no: &str,
    admission_no: Option<&str>,
    fields: &ProfileFields,
) -> RegistryResult<()> {
    let stream_id = resolve_stream(conn, fields.stream.as_deref())?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, account_id, sr_no, roll_no, admission_no, father_name, mother_name,
                              dob, mobile_no, category, gender, current_address, permanent_address,
                              weight, height, classroom_id, stream_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter([
            SqlValue::Text(student_id.to_string()),
            SqlValue::Text(account_id.to_string()),
            SqlValue::Integer(next_sr_no(conn)?),
            SqlValue::Text(roll_no.to_string()),
            opt_text(admission_no),
            SqlValue::Text(fields.father_name.clone()),
            SqlValue::Text(fields.mother_name.clone()),
            opt_text(fields.dob.map(|d| d.format("%Y-%m-%d").to_string()).as_deref()),
            fields.mobile_no.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            opt_text(fields.category.map(Category::as_str)),
            opt_text(fields.gender.map(Gender::as_str)),
            SqlValue::Text(fields.current_address.clone()),
            SqlValue::Text(fields.permanent_address.clone()),
            fields.weight.map(SqlValue::Real).unwrap_or(SqlValue::Null),
            fields.height.map(SqlValue::Real).unwrap_or(SqlValue::Null),
            SqlValue::Text(classroom_id.to_string()),
            opt_text(stream_id.as_deref()),
            SqlValue::Text(now.clone()),
            SqlValue::Text(now),
        ]),
    )?;
    Ok(())
}

fn opt_text(s: Option<&str>) -> SqlValue {
    match s {
        Some(v) => SqlValue::Text(v.to_string()),
        None => SqlValue::Null,
    }
}

/// Overwrites profile and account data in place; identifiers are left untouched.
pub fn overwrite_profile(
    conn: &Connection,
    student_id: &str,
    classroom_id: &str,
    fields: &ProfileFields,
) -> RegistryResult<()> {
    let account_id: String = conn
        .query_row(
            "SELECT account_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| RegistryError::NotFound {
            entity: "student",
            id: student_id.to_string(),
        })?;

    conn.execute(
        "UPDATE accounts SET first_name = ?, last_name = ? WHERE id = ?",
        (&fields.first_name, &fields.last_name, &account_id),
    )?;
    if let Some(email) = &fields.email {
        conn.execute("UPDATE accounts SET email = ? WHERE id = ?", (email, &account_id))?;
    }

    let stream_id = resolve_stream(conn, fields.stream.as_deref())?;
    conn.execute(
        "UPDATE students
         SET father_name = ?, mother_name = ?, dob = ?, mobile_no = ?, category = ?, gender = ?,
             current_address = ?, permanent_address = ?, weight = ?, height = ?,
             classroom_id = ?, stream_id = ?, updated_at = ?
         WHERE id = ?",
        params_from_iter([
            SqlValue::Text(fields.father_name.clone()),
            SqlValue::Text(fields.mother_name.clone()),
            opt_text(fields.dob.map(|d| d.format("%Y-%m-%d").to_string()).as_deref()),
            fields.mobile_no.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            opt_text(fields.category.map(Category::as_str)),
            opt_text(fields.gender.map(Gender::as_str)),
            SqlValue::Text(fields.current_address.clone()),
            SqlValue::Text(fields.permanent_address.clone()),
            fields.weight.map(SqlValue::Real).unwrap_or(SqlValue::Null),
            fields.height.map(SqlValue::Real).unwrap_or(SqlValue::Null),
            SqlValue::Text(classroom_id.to_string()),
            opt_text(stream_id.as_deref()),
            SqlValue::Text(chrono::Utc::now().to_rfc3339()),
            SqlValue::Text(student_id.to_string()),
        ]),
    )?;
    if let Some(subjects) = &fields.subjects {
        replace_subjects(conn, student_id, subjects)?;
    }
    Ok(())
}

/// Deletes the account backing the profile; the profile and its subject links cascade.
pub fn delete_student(conn: &Connection, student_id: &str) -> RegistryResult<String> {
    let profile = get_profile(conn, student_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM accounts WHERE id = ?", [&profile.account_id])?;
    tx.commit()?;
    tracing::info!(student_id, username = %profile.username, "student deleted");
    Ok(profile.username)
}

/// Guard used by `students.get`: staff see everyone, students only themselves.
pub fn can_view(actor: &auth::Actor, profile: &StudentProfile) -> bool {
    actor.role != auth::Role::Student || actor.account_id == profile.account_id
}
