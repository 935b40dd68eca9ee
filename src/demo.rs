//! Demo workspace: one account per role, a classroom and a student profile.
//!
//! Safe to run repeatedly; existing accounts and the demo profile are left
//! as they are.

use crate::auth::{self, NewAccount, Role};
use crate::catalog;
use crate::error::RegistryResult;
use crate::students::{self, Category, Gender, ProfileFields};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

pub const DEMO_PASSWORD: &str = "demo1234";
pub const DEMO_ADMISSION_NO: &str = "DEM0001";

const DEMO_ACCOUNTS: [(&str, &str, &str, Role); 3] = [
    ("demo_admin", "Admin", "admin@example.com", Role::Admin),
    ("demo_teacher", "Teacher", "teacher@example.com", Role::Teacher),
    ("demo_student", "Student", "student@example.com", Role::Student),
];

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoSummary {
    pub accounts_created: usize,
    pub student_created: bool,
    pub classroom_id: String,
    pub students_removed: usize,
}

fn account_id(conn: &Connection, username: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM accounts WHERE username = ?",
        [username],
        |r| r.get(0),
    )
    .optional()
}

fn demo_profile() -> ProfileFields {
    ProfileFields {
        first_name: "Demo".into(),
        last_name: "Student".into(),
        email: None,
        father_name: "Demo Father".into(),
        mother_name: "Demo Mother".into(),
        dob: NaiveDate::from_ymd_opt(2008, 1, 15),
        mobile_no: Some(8_888_888_888),
        category: Some(Category::General),
        gender: Some(Gender::Male),
        current_address: "123 Demo Street".into(),
        permanent_address: "123 Demo Street".into(),
        weight: None,
        height: None,
        stream: None,
        subjects: None,
    }
}

/// Removes every student profile (with its account) and every classroom.
fn reset(conn: &Connection) -> RegistryResult<usize> {
    let removed = conn.execute(
        "DELETE FROM accounts WHERE id IN (SELECT account_id FROM students)",
        [],
    )?;
    conn.execute("DELETE FROM classrooms", [])?;
    Ok(removed)
}

pub fn seed_demo(conn: &Connection, reset_first: bool) -> RegistryResult<DemoSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = DemoSummary::default();
    if reset_first {
        summary.students_removed = reset(&tx)?;
    }

    let mut student_account = None;
    for (username, last_name, email, role) in DEMO_ACCOUNTS {
        let id = match account_id(&tx, username)? {
            Some(id) => id,
            None => {
                summary.accounts_created += 1;
                auth::insert_account(
                    &tx,
                    &NewAccount {
                        username,
                        password: DEMO_PASSWORD,
                        first_name: "Demo",
                        last_name,
                        email,
                    },
                    role,
                )?
            }
        };
        if role == Role::Student {
            student_account = Some(id);
        }
    }

    let classroom = catalog::ensure_classroom(&tx, "1st", Some("A"))?;
    if let Some(account_id) = student_account {
        let has_profile: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM students WHERE account_id = ?",
                [&account_id],
                |r| r.get(0),
            )
            .optional()?;
        if has_profile.is_none() && !students::admission_no_exists(&tx, DEMO_ADMISSION_NO)? {
            let start = students::count_in_classroom(&tx, &classroom.id)? as u32 + 1;
            let (roll_no, _) = classroom.free_roll_number(start, |r| {
                students::roll_no_exists(&tx, &classroom.id, r).unwrap_or(false)
            });
            students::insert_profile(
                &tx,
                &Uuid::new_v4().to_string(),
                &account_id,
                &classroom.id,
                &roll_no,
                Some(DEMO_ADMISSION_NO),
                &demo_profile(),
            )?;
            summary.student_created = true;
        }
    }
    summary.classroom_id = classroom.id;
    tx.commit()?;

    tracing::info!(
        accounts = summary.accounts_created,
        student = summary.student_created,
        removed = summary.students_removed,
        "demo data ready"
    );
    Ok(summary)
}
