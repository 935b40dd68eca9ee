//! Accounts, Argon2id password hashing and role resolution.
//!
//! Roles come from group membership: `Admin` wins over `Teacher`, and any
//! other signed-in account is treated as a `Student`.

use crate::db::{GROUP_ADMIN, GROUP_STUDENT, GROUP_TEACHER};
use crate::error::{RegistryError, RegistryResult};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn group(self) -> &'static str {
        match self {
            Role::Admin => GROUP_ADMIN,
            Role::Teacher => GROUP_TEACHER,
            Role::Student => GROUP_STUDENT,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Actor {
    pub account_id: String,
    pub username: String,
    pub role: Role,
}

pub struct NewAccount<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn username_exists(conn: &Connection, username: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE username = ?",
            [username],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Inserts the account row and its group link. Runs inside the caller's transaction.
pub fn insert_account(
    conn: &Connection,
    account: &NewAccount<'_>,
    role: Role,
) -> RegistryResult<String> {
    let id = Uuid::new_v4().to_string();
    let hash = hash_password(account.password)?;
    conn.execute(
        "INSERT INTO accounts(id, username, password_hash, first_name, last_name, email, date_joined)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            account.username,
            &hash,
            account.first_name,
            account.last_name,
            account.email,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    conn.execute(
        "INSERT INTO account_groups(account_id, group_name) VALUES(?, ?)",
        (&id, role.group()),
    )?;
    Ok(id)
}

fn role_of(conn: &Connection, account_id: &str) -> rusqlite::Result<Role> {
    let mut stmt = conn.prepare("SELECT group_name FROM account_groups WHERE account_id = ?")?;
    let groups = stmt
        .query_map([account_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let role = if groups.iter().any(|g| g == GROUP_ADMIN) {
        Role::Admin
    } else if groups.iter().any(|g| g == GROUP_TEACHER) {
        Role::Teacher
    } else {
        Role::Student
    };
    Ok(role)
}

pub fn resolve_actor(conn: &Connection, username: &str) -> RegistryResult<Actor> {
    let account_id: Option<String> = conn
        .query_row(
            "SELECT id FROM accounts WHERE username = ?",
            [username],
            |r| r.get(0),
        )
        .optional()?;
    let Some(account_id) = account_id else {
        return Err(RegistryError::Unauthorized);
    };
    let role = role_of(conn, &account_id)?;
    Ok(Actor {
        account_id,
        username: username.to_string(),
        role,
    })
}

/// Resolves `username` and checks that its role is one of `allowed`.
pub fn require_role(
    conn: &Connection,
    username: Option<&str>,
    allowed: &[Role],
) -> RegistryResult<Actor> {
    let Some(username) = username.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(RegistryError::Unauthorized);
    };
    let actor = resolve_actor(conn, username)?;
    if !allowed.contains(&actor.role) {
        return Err(RegistryError::Forbidden(format!(
            "{:?} accounts may not perform this action",
            actor.role
        )));
    }
    Ok(actor)
}

pub fn login(conn: &Connection, username: &str, password: &str) -> RegistryResult<Actor> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM accounts WHERE username = ?",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((account_id, hash)) = row else {
        return Err(RegistryError::Unauthorized);
    };
    if !verify_password(password, &hash)? {
        return Err(RegistryError::Unauthorized);
    }
    let role = role_of(conn, &account_id)?;
    Ok(Actor {
        account_id,
        username: username.to_string(),
        role,
    })
}

pub fn validate_password_strength(password: &str, min_length: usize) -> RegistryResult<()> {
    if password.chars().count() < min_length {
        return Err(RegistryError::Validation(format!(
            "password must be at least {min_length} characters long"
        )));
    }
    Ok(())
}

/// Creates an Admin or Teacher account.
pub fn create_staff(
    conn: &Connection,
    account: &NewAccount<'_>,
    role: Role,
    min_password_length: usize,
) -> RegistryResult<String> {
    if role == Role::Student {
        return Err(RegistryError::Validation(
            "student accounts are created with their profile".into(),
        ));
    }
    if account.username.trim().is_empty() {
        return Err(RegistryError::Validation("username must not be empty".into()));
    }
    validate_password_strength(account.password, min_password_length)?;
    if username_exists(conn, account.username)? {
        return Err(RegistryError::Conflict(format!(
            "username {} is already taken",
            account.username
        )));
    }
    let tx = conn.unchecked_transaction()?;
    let id = insert_account(&tx, account, role)?;
    tx.commit()?;
    tracing::info!(username = account.username, role = ?role, "staff account created");
    Ok(id)
}

pub fn admin_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM account_groups WHERE group_name = ? LIMIT 1",
            [GROUP_ADMIN],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Creates the bootstrap Admin while the workspace has none.
///
/// Returns `true` when it was created now. Once any Admin exists this does
/// nothing, whatever username is passed.
pub fn first_run(
    conn: &Connection,
    username: &str,
    password: &str,
    email: &str,
    min_password_length: usize,
) -> RegistryResult<bool> {
    if admin_exists(conn)? {
        return Ok(false);
    }
    create_staff(
        conn,
        &NewAccount {
            username,
            password,
            first_name: "",
            last_name: "",
            email,
        },
        Role::Admin,
        min_password_length,
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("rahu2008XYZ").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("rahu2008XYZ", &hash).expect("verify"));
        assert!(!verify_password("rahu2008XYA", &hash).expect("verify"));
    }

    #[test]
    fn password_strength_counts_characters() {
        assert!(validate_password_strength("short", 8).is_err());
        assert!(validate_password_strength("long enough", 8).is_ok());
    }

    #[test]
    fn role_names_parse_case_insensitively() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse(" teacher "), Some(Role::Teacher));
        assert_eq!(Role::parse("parent"), None);
    }
}
