//! Credential and institutional identifier generation.
//!
//! Every generator takes its random source and the uniqueness check as
//! arguments, so the caller decides what "already taken" means (a live
//! query, a set in a test) and the database unique constraints stay the
//! final arbiter. Generators never fail: when the attempt budget runs out
//! they fall back to a value that is not re-checked.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_INSTITUTION_CODE: &str = "HBR";
pub const DEFAULT_ATTEMPTS: usize = 10;

const USERNAME_DIGITS: usize = 4;
const PASSWORD_SUFFIX_LEN: usize = 3;
const PASSWORD_FALLBACK_SUFFIX: &str = "XYZ";
const ADMISSION_DIGITS: usize = 4;
const NO_SECTION_CODE: &str = "00";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// The username was produced without a uniqueness check.
    pub username_fallback: bool,
    /// The password ends in the fixed fallback suffix and may resemble the username.
    pub password_fallback: bool,
}

fn random_digits<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn random_alphanumeric<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

/// Lowercase 4-character login prefix taken from the first name.
pub fn username_base(first_name: &str) -> String {
    let base: String = first_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(4)
        .collect();
    if base.is_empty() {
        "user".to_string()
    } else {
        base
    }
}

pub fn password_base(first_name: &str, last_name: &str, birth_year: i32) -> String {
    let prefix: String = first_name
        .chars()
        .chain(last_name.chars())
        .filter(|c| !c.is_whitespace())
        .take(4)
        .collect::<String>()
        .to_lowercase();
    format!("{prefix}{birth_year}")
}

/// True when `password` contains the whole username or any 3-character run of it.
pub fn resembles_username(username: &str, password: &str) -> bool {
    if password.contains(username) {
        return true;
    }
    let chars: Vec<char> = username.chars().collect();
    chars
        .windows(3)
        .any(|w| password.contains(w.iter().collect::<String>().as_str()))
}

/// Returns the username and whether the unchecked fallback was used.
pub fn generate_username<R, F>(
    rng: &mut R,
    first_name: &str,
    attempts: usize,
    mut username_taken: F,
) -> (String, bool)
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> bool,
{
    let base = username_base(first_name);
    for _ in 0..attempts {
        let candidate = format!("{}{}", base, random_digits(rng, USERNAME_DIGITS));
        if !username_taken(&candidate) {
            return (candidate, false);
        }
    }
    tracing::warn!(base = %base, "username attempts exhausted, using unchecked fallback");
    (format!("{}{}", base, rng.gen_range(1000..=9999)), true)
}

/// Returns the password and whether the fixed fallback suffix was used.
pub fn generate_password<R>(
    rng: &mut R,
    username: &str,
    first_name: &str,
    last_name: &str,
    birth_year: i32,
    attempts: usize,
) -> (String, bool)
where
    R: Rng + ?Sized,
{
    let base = password_base(first_name, last_name, birth_year);
    // A base that already resembles the username cannot be rescued by the suffix.
    if !resembles_username(username, &base) {
        for _ in 0..attempts {
            let candidate = format!("{}{}", base, random_alphanumeric(rng, PASSWORD_SUFFIX_LEN));
            if !resembles_username(username, &candidate) {
                return (candidate, false);
            }
        }
    }
    (format!("{base}{PASSWORD_FALLBACK_SUFFIX}"), true)
}

pub fn generate_credentials<R, F>(
    rng: &mut R,
    first_name: &str,
    last_name: &str,
    birth_year: i32,
    attempts: usize,
    username_taken: F,
) -> Credentials
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> bool,
{
    let (username, username_fallback) = generate_username(rng, first_name, attempts, username_taken);
    let (password, password_fallback) =
        generate_password(rng, &username, first_name, last_name, birth_year, attempts);
    Credentials {
        username,
        password,
        username_fallback,
        password_fallback,
    }
}

/// Numeric part of a grade label, zero-padded to two digits (`10th` -> `10`, `Nursery` -> `00`).
pub fn grade_code(grade: &str) -> String {
    let digits: String = grade.chars().filter(|c| c.is_ascii_digit()).collect();
    let n: u64 = digits.parse().unwrap_or(0);
    format!("{:02}", n)
}

pub fn admission_prefix(institution_code: &str, grade: &str, year: i32) -> String {
    format!(
        "{}{:02}{}",
        institution_code,
        year.rem_euclid(100),
        grade_code(grade)
    )
}

pub fn generate_admission_number<R, F>(
    rng: &mut R,
    institution_code: &str,
    grade: &str,
    year: i32,
    attempts: usize,
    mut admission_taken: F,
) -> String
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> bool,
{
    let prefix = admission_prefix(institution_code, grade, year);
    for _ in 0..attempts {
        let candidate = format!("{}{}", prefix, random_digits(rng, ADMISSION_DIGITS));
        if !admission_taken(&candidate) {
            return candidate;
        }
    }
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    tracing::warn!(prefix = %prefix, "admission number attempts exhausted, using time suffix");
    format!("{}{:04}", prefix, secs % 10_000)
}

/// Grade code + first two section letters (or `00`) + 3-digit sequence.
///
/// No uniqueness check; the caller owns the sequence.
pub fn generate_roll_number(grade: &str, section: Option<&str>, sequence: u32) -> String {
    let section_code = match section.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.to_uppercase().chars().take(2).collect::<String>(),
        None => NO_SECTION_CODE.to_string(),
    };
    format!("{}{}{:03}", grade_code(grade), section_code, sequence)
}

/// First roll number from `start` onwards that `roll_taken` reports free,
/// with the sequence it was built from.
pub fn next_free_roll_number<F>(
    grade: &str,
    section: Option<&str>,
    start: u32,
    mut roll_taken: F,
) -> (String, u32)
where
    F: FnMut(&str) -> bool,
{
    let mut sequence = start.max(1);
    loop {
        let candidate = generate_roll_number(grade, section, sequence);
        if sequence == u32::MAX || !roll_taken(&candidate) {
            return (candidate, sequence);
        }
        sequence += 1;
    }
}
