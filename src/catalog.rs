//! Classrooms, subjects and streams, plus the idempotent starter seed.

use crate::error::{RegistryError, RegistryResult};
use crate::ids;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub grade: String,
    pub section: Option<String>,
}

impl Classroom {
    pub fn label(&self) -> String {
        match self.section.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(section) => format!("{} {}", self.grade, section),
            None => self.grade.clone(),
        }
    }

    /// Next roll number at or after `start` not yet used in this classroom.
    pub fn free_roll_number<F>(&self, start: u32, roll_taken: F) -> (String, u32)
    where
        F: FnMut(&str) -> bool,
    {
        ids::next_free_roll_number(&self.grade, self.section.as_deref(), start, roll_taken)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: String,
    pub name: String,
    pub description: String,
}

const SEED_GRADES: [&str; 15] = [
    "Nursery", "LKG", "UKG", "1st", "2nd", "3rd", "4th", "5th", "6th", "7th", "8th", "9th",
    "10th", "11th", "12th",
];

const SEED_STREAMS: [(&str, &str); 4] = [
    ("SCIENCE", "Science Stream"),
    ("COMMERCE", "Commerce Stream"),
    ("ARTS", "Arts/Humanities Stream"),
    ("MATHS", "Mathematics Stream"),
];

const SEED_SUBJECTS: [(&str, &str); 9] = [
    ("HINDI", "HIN"),
    ("ENGLISH", "ENG"),
    ("MATHS", "MAT"),
    ("SCIENCE", "SCI"),
    ("EVS", "EVS"),
    ("SOCIAL SCIENCE", "SOC"),
    ("SANSKRIT", "SAN"),
    ("SBC", "SBC"),
    ("COMPUTER", "COM"),
];

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSummary {
    pub classrooms_created: usize,
    pub streams_created: usize,
    pub subjects_created: usize,
}

fn normalize_section(section: Option<&str>) -> Option<String> {
    section
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_classroom(conn: &Connection, id: &str) -> RegistryResult<Classroom> {
    conn.query_row(
        "SELECT id, grade, section FROM classrooms WHERE id = ?",
        [id],
        |r| {
            Ok(Classroom {
                id: r.get(0)?,
                grade: r.get(1)?,
                section: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| RegistryError::NotFound {
        entity: "classroom",
        id: id.to_string(),
    })
}

fn find_classroom(
    conn: &Connection,
    grade: &str,
    section: Option<&str>,
) -> RegistryResult<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM classrooms WHERE grade = ? AND COALESCE(section, '') = ?",
            (grade, section.unwrap_or("")),
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn create_classroom(
    conn: &Connection,
    grade: &str,
    section: Option<&str>,
) -> RegistryResult<Classroom> {
    let grade = grade.trim();
    if grade.is_empty() {
        return Err(RegistryError::Validation("grade must not be empty".into()));
    }
    let section = normalize_section(section);
    if find_classroom(conn, grade, section.as_deref())?.is_some() {
        return Err(RegistryError::Conflict(format!(
            "classroom {} {} already exists",
            grade,
            section.as_deref().unwrap_or("")
        )));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, grade, section) VALUES(?, ?, ?)",
        (&id, grade, &section),
    )?;
    Ok(Classroom {
        id,
        grade: grade.to_string(),
        section,
    })
}

/// Returns the classroom for `grade`/`section`, creating it when missing.
pub fn ensure_classroom(
    conn: &Connection,
    grade: &str,
    section: Option<&str>,
) -> RegistryResult<Classroom> {
    let section = normalize_section(section);
    match find_classroom(conn, grade.trim(), section.as_deref())? {
        Some(id) => get_classroom(conn, &id),
        None => create_classroom(conn, grade, section.as_deref()),
    }
}

/// Classrooms with their current student counts, ordered by insertion.
pub fn list_classrooms(conn: &Connection) -> RegistryResult<Vec<(Classroom, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.grade, c.section,
                (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id)
         FROM classrooms c
         ORDER BY c.rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                Classroom {
                    id: r.get(0)?,
                    grade: r.get(1)?,
                    section: r.get(2)?,
                },
                r.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_subjects(conn: &Connection) -> RegistryResult<Vec<Subject>> {
    let mut stmt =
        conn.prepare("SELECT id, name, code FROM subjects WHERE is_active = 1 ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_streams(conn: &Connection) -> RegistryResult<Vec<Stream>> {
    let mut stmt = conn
        .prepare("SELECT id, name, description FROM streams WHERE is_active = 1 ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Stream {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_subject_id(conn: &Connection, name: &str) -> RegistryResult<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM subjects WHERE lower(name) = lower(?)",
            [name.trim()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn find_stream_id(conn: &Connection, name: &str) -> RegistryResult<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM streams WHERE lower(name) = lower(?)",
            [name.trim()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Creates the standard grades, streams and subjects that are missing.
pub fn seed(conn: &Connection) -> RegistryResult<SeedSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = SeedSummary::default();

    for grade in SEED_GRADES {
        if find_classroom(&tx, grade, None)?.is_none() {
            tx.execute(
                "INSERT INTO classrooms(id, grade, section) VALUES(?, ?, NULL)",
                (Uuid::new_v4().to_string(), grade),
            )?;
            summary.classrooms_created += 1;
        }
    }
    for (name, description) in SEED_STREAMS {
        summary.streams_created += tx.execute(
            "INSERT OR IGNORE INTO streams(id, name, description) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), name, description),
        )?;
    }
    for (name, code) in SEED_SUBJECTS {
        summary.subjects_created += tx.execute(
            "INSERT OR IGNORE INTO subjects(id, name, code) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), name, code),
        )?;
    }

    tx.commit()?;
    tracing::info!(
        classrooms = summary.classrooms_created,
        streams = summary.streams_created,
        subjects = summary.subjects_created,
        "catalog seeded"
    );
    Ok(summary)
}
