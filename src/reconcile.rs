//! Create-or-update for a single candidate student.
//!
//! Identifiers are generated against live queries, then the insert runs in
//! its own transaction. The unique constraints have the last word: when one
//! fires on a generated identifier, that identifier is regenerated and the
//! insert retried, up to the configured retry budget.

use crate::auth::{self, NewAccount, Role};
use crate::catalog::Classroom;
use crate::config::StudentSettings;
use crate::error::{RegistryError, RegistryResult};
use crate::ids;
use crate::roster::CandidateRecord;
use crate::students::{self, ProfileFields};
use chrono::Datelike;
use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

/// Plaintext credentials and identifiers handed out for a new student.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issued {
    pub student_id: String,
    pub username: String,
    pub password: String,
    pub admission_no: String,
    pub roll_no: String,
    pub username_fallback: bool,
    pub password_fallback: bool,
}

#[derive(Clone, Debug)]
pub enum RowOutcome {
    Created(Issued),
    Updated { student_id: String },
    Skipped(String),
}

/// Identifiers requested by the caller. `None` means generate.
#[derive(Clone, Debug, Default)]
pub struct RequestedIds {
    pub admission_no: Option<String>,
    pub roll_no: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Clash {
    Username,
    AdmissionNo,
    RollNo,
}

fn clash_of(e: &RegistryError) -> Option<Clash> {
    let RegistryError::Db(rusqlite::Error::SqliteFailure(failure, Some(msg))) = e else {
        return None;
    };
    if failure.code != rusqlite::ErrorCode::ConstraintViolation {
        return None;
    }
    if msg.contains("accounts.username") {
        Some(Clash::Username)
    } else if msg.contains("students.admission_no") {
        Some(Clash::AdmissionNo)
    } else if msg.contains("students.roll_no") {
        Some(Clash::RollNo)
    } else {
        None
    }
}

struct Draft {
    creds: ids::Credentials,
    admission_no: String,
    roll_no: String,
}

fn insert_draft(
    conn: &Connection,
    classroom: &Classroom,
    draft: &Draft,
    fields: &ProfileFields,
) -> RegistryResult<String> {
    let tx = conn.unchecked_transaction()?;
    let account_id = auth::insert_account(
        &tx,
        &NewAccount {
            username: &draft.creds.username,
            password: &draft.creds.password,
            first_name: &fields.first_name,
            last_name: &fields.last_name,
            email: fields.email.as_deref().unwrap_or(""),
        },
        Role::Student,
    )?;
    let student_id = Uuid::new_v4().to_string();
    students::insert_profile(
        &tx,
        &student_id,
        &account_id,
        &classroom.id,
        &draft.roll_no,
        Some(&draft.admission_no),
        fields,
    )?;
    if let Some(subjects) = &fields.subjects {
        students::replace_subjects(&tx, &student_id, subjects)?;
    }
    tx.commit()?;
    Ok(student_id)
}

/// Creates the account and profile, generating whatever was not requested.
pub fn create_student<R: Rng + ?Sized>(
    conn: &Connection,
    rng: &mut R,
    settings: &StudentSettings,
    classroom: &Classroom,
    requested: &RequestedIds,
    fields: &ProfileFields,
) -> RegistryResult<Issued> {
    if fields.first_name.trim().is_empty() {
        return Err(RegistryError::Validation("First name is required".into()));
    }
    if fields.last_name.trim().is_empty() {
        return Err(RegistryError::Validation("Last name is required".into()));
    }
    if let Some(adm) = &requested.admission_no {
        if students::admission_no_exists(conn, adm)? {
            return Err(RegistryError::AlreadyExists(adm.clone()));
        }
    }

    let attempts = settings.generator_attempts;
    let this_year = chrono::Local::now().year();
    let birth_year = fields.dob.map(|d| d.year()).unwrap_or(this_year);
    // Lookup failures count as free; the unique constraint still decides.
    let username_taken = |u: &str| auth::username_exists(conn, u).unwrap_or(false);
    let admission_taken = |a: &str| students::admission_no_exists(conn, a).unwrap_or(false);
    let roll_taken = |r: &str| students::roll_no_exists(conn, &classroom.id, r).unwrap_or(false);

    let generated = |rng: &mut R| {
        ids::generate_credentials(
            rng,
            &fields.first_name,
            &fields.last_name,
            birth_year,
            attempts,
            username_taken,
        )
    };
    let creds = match requested.username.as_deref() {
        Some(u) if !auth::username_exists(conn, u)? => {
            let (password, password_fallback) = ids::generate_password(
                rng,
                u,
                &fields.first_name,
                &fields.last_name,
                birth_year,
                attempts,
            );
            ids::Credentials {
                username: u.to_string(),
                password,
                username_fallback: false,
                password_fallback,
            }
        }
        Some(u) => {
            tracing::debug!(username = u, "requested username taken, generating one");
            generated(&mut *rng)
        }
        None => generated(&mut *rng),
    };
    let admission_no = match &requested.admission_no {
        Some(a) => a.clone(),
        None => ids::generate_admission_number(
            rng,
            &settings.institution_code,
            &classroom.grade,
            this_year,
            attempts,
            admission_taken,
        ),
    };
    let start = students::count_in_classroom(conn, &classroom.id)? as u32 + 1;
    let (roll_no, mut sequence) = match &requested.roll_no {
        Some(r) => (r.clone(), start),
        None => classroom.free_roll_number(start, roll_taken),
    };

    let mut draft = Draft {
        creds,
        admission_no,
        roll_no,
    };

    let mut retries_left = settings.conflict_retries;
    loop {
        let err = match insert_draft(conn, classroom, &draft, fields) {
            Ok(student_id) => {
                return Ok(Issued {
                    student_id,
                    username: draft.creds.username,
                    password: draft.creds.password,
                    admission_no: draft.admission_no,
                    roll_no: draft.roll_no,
                    username_fallback: draft.creds.username_fallback,
                    password_fallback: draft.creds.password_fallback,
                });
            }
            Err(e) => e,
        };
        let Some(clash) = clash_of(&err) else {
            return Err(err);
        };
        match clash {
            Clash::AdmissionNo if requested.admission_no.is_some() => {
                return Err(RegistryError::AlreadyExists(draft.admission_no));
            }
            Clash::RollNo if requested.roll_no.is_some() => {
                return Err(RegistryError::Conflict(format!(
                    "Roll number {} already exists in {}",
                    draft.roll_no,
                    classroom.label()
                )));
            }
            _ if retries_left == 0 => {
                return Err(RegistryError::Conflict(format!(
                    "identifiers still conflicting after {} retries",
                    settings.conflict_retries
                )));
            }
            _ => {}
        }
        retries_left -= 1;
        tracing::warn!(?clash, retries_left, "unique constraint hit, regenerating identifier");
        match clash {
            Clash::Username => draft.creds = generated(&mut *rng),
            Clash::AdmissionNo => {
                draft.admission_no = ids::generate_admission_number(
                    rng,
                    &settings.institution_code,
                    &classroom.grade,
                    this_year,
                    attempts,
                    admission_taken,
                );
            }
            Clash::RollNo => {
                (draft.roll_no, sequence) =
                    classroom.free_roll_number(sequence.saturating_add(1), roll_taken);
            }
        }
    }
}

/// Overwrites an existing student and moves them into `classroom`.
pub fn update_student(
    conn: &Connection,
    student_id: &str,
    classroom: &Classroom,
    fields: &ProfileFields,
) -> RegistryResult<()> {
    let tx = conn.unchecked_transaction()?;
    students::overwrite_profile(&tx, student_id, &classroom.id, fields).map_err(|e| {
        match clash_of(&e) {
            Some(Clash::RollNo) => RegistryError::Conflict(format!(
                "the student's roll number is already used in {}",
                classroom.label()
            )),
            _ => e,
        }
    })?;
    tx.commit()?;
    Ok(())
}

/// Decides create, update or skip for one import row.
pub fn reconcile_row<R: Rng + ?Sized>(
    conn: &Connection,
    rng: &mut R,
    settings: &StudentSettings,
    classroom: &Classroom,
    candidate: CandidateRecord,
    overwrite_existing: bool,
) -> RegistryResult<RowOutcome> {
    if let Some(adm) = candidate.lookup_key() {
        if let Some(student_id) = students::find_id_by_admission_no(conn, adm)? {
            if !overwrite_existing {
                return Ok(RowOutcome::Skipped(
                    RegistryError::AlreadyExists(adm.to_string()).to_string(),
                ));
            }
            update_student(conn, &student_id, classroom, &candidate.fields)?;
            return Ok(RowOutcome::Updated { student_id });
        }
    }
    let requested = RequestedIds {
        admission_no: candidate.admission_no,
        roll_no: candidate.roll_no,
        username: candidate.username,
    };
    let issued = create_student(conn, rng, settings, classroom, &requested, &candidate.fields)?;
    Ok(RowOutcome::Created(issued))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog, db};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn workspace_with_class(name: &str) -> (Connection, Classroom) {
        let dir = std::env::temp_dir().join(format!("{name}-{}", Uuid::new_v4()));
        let conn = db::open_db(&dir).expect("open workspace");
        let classroom = catalog::create_classroom(&conn, "10th", Some("A")).expect("classroom");
        (conn, classroom)
    }

    fn fields(first: &str, last: &str) -> ProfileFields {
        ProfileFields {
            first_name: first.into(),
            last_name: last.into(),
            ..ProfileFields::default()
        }
    }

    // Stands in for a writer that claims `roll_no` between the check and the insert.
    fn claim_roll_elsewhere(conn: &Connection, roll_no: &str) {
        conn.execute_batch(&format!(
            "CREATE TRIGGER claim_roll BEFORE INSERT ON students WHEN NEW.roll_no = '{roll_no}'
             BEGIN
                 SELECT RAISE(ABORT, 'UNIQUE constraint failed: students.classroom_id, students.roll_no');
             END;"
        ))
        .expect("create trigger");
    }

    #[test]
    fn roll_numbers_skip_gaps_left_by_deletions() {
        let (conn, classroom) = workspace_with_class("schoold-reconcile-gaps");
        let mut rng = StdRng::seed_from_u64(11);
        let settings = StudentSettings::default();
        let mut created = Vec::new();
        for i in 0..8 {
            let issued = create_student(
                &conn,
                &mut rng,
                &settings,
                &classroom,
                &RequestedIds::default(),
                &fields("Asha", &format!("Khan{i}")),
            )
            .expect("create");
            created.push(issued.student_id);
        }
        for id in &created[..4] {
            students::delete_student(&conn, id).expect("delete");
        }

        let issued = create_student(
            &conn,
            &mut rng,
            &settings,
            &classroom,
            &RequestedIds::default(),
            &fields("Ravi", "Verma"),
        )
        .expect("create after deletions");
        assert_eq!(issued.roll_no, "10A009");
    }

    #[test]
    fn roll_clash_at_insert_takes_the_next_number() {
        let (conn, classroom) = workspace_with_class("schoold-reconcile-roll-race");
        claim_roll_elsewhere(&conn, "10A001");
        let mut rng = StdRng::seed_from_u64(12);
        let issued = create_student(
            &conn,
            &mut rng,
            &StudentSettings::default(),
            &classroom,
            &RequestedIds::default(),
            &fields("Meera", "Iyer"),
        )
        .expect("retry succeeds");
        assert_eq!(issued.roll_no, "10A002");
        assert_eq!(students::count_in_classroom(&conn, &classroom.id).expect("count"), 1);
    }

    #[test]
    fn username_clash_at_insert_regenerates_credentials() {
        let (conn, classroom) = workspace_with_class("schoold-reconcile-user-race");
        let mut rng = StdRng::seed_from_u64(13);
        let first_pick = ids::generate_credentials(&mut rng.clone(), "Kiran", "Das", 2024, 10, |_| false);
        conn.execute_batch(&format!(
            "CREATE TRIGGER claim_username BEFORE INSERT ON accounts WHEN NEW.username = '{}'
             BEGIN
                 SELECT RAISE(ABORT, 'UNIQUE constraint failed: accounts.username');
             END;",
            first_pick.username
        ))
        .expect("create trigger");

        let issued = create_student(
            &conn,
            &mut rng,
            &StudentSettings::default(),
            &classroom,
            &RequestedIds::default(),
            &fields("Kiran", "Das"),
        )
        .expect("retry succeeds");
        assert_ne!(issued.username, first_pick.username);
        assert!(issued.username.starts_with("kira"));
        assert!(auth::username_exists(&conn, &issued.username).expect("lookup"));
        assert!(!auth::username_exists(&conn, &first_pick.username).expect("lookup"));
    }

    #[test]
    fn exhausted_retries_report_a_conflict_and_leave_nothing_behind() {
        let (conn, classroom) = workspace_with_class("schoold-reconcile-exhausted");
        conn.execute_batch(
            "CREATE TRIGGER claim_every_roll BEFORE INSERT ON students
             BEGIN
                 SELECT RAISE(ABORT, 'UNIQUE constraint failed: students.classroom_id, students.roll_no');
             END;",
        )
        .expect("create trigger");
        let mut rng = StdRng::seed_from_u64(14);
        let err = create_student(
            &conn,
            &mut rng,
            &StudentSettings::default(),
            &classroom,
            &RequestedIds::default(),
            &fields("Zoya", "Ali"),
        )
        .expect_err("every roll number is claimed");
        assert_eq!(err.code(), "conflict");
        let accounts: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))
            .expect("count accounts");
        assert_eq!(accounts, 0);
    }

    fn unique_failure(msg: &str) -> RegistryError {
        RegistryError::Db(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code: 2067,
            },
            Some(msg.to_string()),
        ))
    }

    #[test]
    fn constraint_messages_name_the_identifier() {
        assert_eq!(
            clash_of(&unique_failure("UNIQUE constraint failed: accounts.username")),
            Some(Clash::Username)
        );
        assert_eq!(
            clash_of(&unique_failure("UNIQUE constraint failed: students.admission_no")),
            Some(Clash::AdmissionNo)
        );
        assert_eq!(
            clash_of(&unique_failure(
                "UNIQUE constraint failed: students.classroom_id, students.roll_no"
            )),
            Some(Clash::RollNo)
        );
        assert_eq!(
            clash_of(&unique_failure("UNIQUE constraint failed: students.account_id")),
            None
        );
        assert_eq!(clash_of(&RegistryError::Unauthorized), None);
    }
}
