//! Column table, cell parsers and delimited-text IO for student rosters.
//!
//! A roster is a header row followed by data rows of loosely typed text.
//! `COLUMNS` is the single source of truth for both directions: import
//! matches file headers against it, export writes its headers in order.

use crate::error::{RegistryError, RegistryResult, RowError};
use crate::students::{Category, Gender, ProfileFields};
use chrono::{Duration, NaiveDate};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    AdmissionNo,
    RollNo,
    FirstName,
    LastName,
    Username,
    Email,
    FatherName,
    MotherName,
    DateOfBirth,
    MobileNo,
    Category,
    Gender,
    Classroom,
    Stream,
    Subjects,
    CurrentAddress,
    PermanentAddress,
    Weight,
    Height,
}

/// How a cell is turned into a value. Every parser except `Required`
/// yields "absent" instead of failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parser {
    Required,
    Text,
    Date,
    Mobile,
    Category,
    Gender,
    Decimal,
    List,
    /// Read but not used; the batch target decides.
    Ignored,
}

#[derive(Clone, Copy, Debug)]
pub struct ColumnSpec {
    pub header: &'static str,
    pub field: Field,
    pub parser: Parser,
    pub aliases: &'static [&'static str],
}

const fn col(
    header: &'static str,
    field: Field,
    parser: Parser,
    aliases: &'static [&'static str],
) -> ColumnSpec {
    ColumnSpec {
        header,
        field,
        parser,
        aliases,
    }
}

pub const COLUMNS: [ColumnSpec; 19] = [
    col("Admission No", Field::AdmissionNo, Parser::Text, &["admission", "admissionnumber"]),
    col("Roll No", Field::RollNo, Parser::Text, &["roll", "rollnumber"]),
    col("First Name", Field::FirstName, Parser::Required, &["firstname"]),
    col("Last Name", Field::LastName, Parser::Required, &["lastname", "surname"]),
    col("Username", Field::Username, Parser::Text, &["user"]),
    col("Email", Field::Email, Parser::Text, &["emailaddress"]),
    col("Father Name", Field::FatherName, Parser::Text, &["fathersname"]),
    col("Mother Name", Field::MotherName, Parser::Text, &["mothersname"]),
    col("Date of Birth", Field::DateOfBirth, Parser::Date, &["dob", "birthdate"]),
    col("Mobile No", Field::MobileNo, Parser::Mobile, &["mobile", "phone", "mobilenumber"]),
    col("Category", Field::Category, Parser::Category, &[]),
    col("Gender", Field::Gender, Parser::Gender, &["sex"]),
    col("Classroom", Field::Classroom, Parser::Ignored, &["class"]),
    col("Stream", Field::Stream, Parser::Text, &[]),
    col("Subjects", Field::Subjects, Parser::List, &[]),
    col("Current Address", Field::CurrentAddress, Parser::Text, &["address"]),
    col("Permanent Address", Field::PermanentAddress, Parser::Text, &[]),
    col("Weight", Field::Weight, Parser::Decimal, &[]),
    col("Height", Field::Height, Parser::Decimal, &[]),
];

pub fn export_header() -> Vec<&'static str> {
    COLUMNS.iter().map(|c| c.header).collect()
}

/// Lowercased header with everything but letters and digits removed.
pub fn normalize_header(s: &str) -> String {
    s.trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn spec_for_header(header: &str) -> Option<&'static ColumnSpec> {
    let key = normalize_header(header);
    if key.is_empty() {
        return None;
    }
    COLUMNS
        .iter()
        .find(|c| normalize_header(c.header) == key || c.aliases.contains(&key.as_str()))
}

/// In-memory table: one header row and its data rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Column positions resolved from a file header. The first matching column wins.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    slots: Vec<(usize, &'static ColumnSpec)>,
}

impl HeaderMap {
    pub fn from_header(header: &[String]) -> Self {
        let mut slots: Vec<(usize, &'static ColumnSpec)> = Vec::new();
        for (idx, h) in header.iter().enumerate() {
            if let Some(spec) = spec_for_header(h) {
                if !slots.iter().any(|(_, s)| s.field == spec.field) {
                    slots.push((idx, spec));
                }
            }
        }
        Self { slots }
    }

    pub fn has(&self, field: Field) -> bool {
        self.slots.iter().any(|(_, s)| s.field == field)
    }

    pub fn recognised(&self) -> usize {
        self.slots.len()
    }
}

/// One validated row, ready for reconciliation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateRecord {
    pub admission_no: Option<String>,
    pub roll_no: Option<String>,
    pub username: Option<String>,
    pub fields: ProfileFields,
}

impl CandidateRecord {
    /// The admission number, which is how rows find existing students.
    pub fn lookup_key(&self) -> Option<&str> {
        self.admission_no.as_deref()
    }
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn non_empty(raw: &str) -> Option<String> {
    let t = raw.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// Accepts ISO dates, day-first dates, an ISO datetime prefix and
/// spreadsheet serial day numbers.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return Some(d);
        }
    }
    if t.len() > 10 && t.is_char_boundary(10) {
        if let Ok(d) = NaiveDate::parse_from_str(&t[..10], "%Y-%m-%d") {
            return Some(d);
        }
    }
    let serial: f64 = t.parse().ok()?;
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

pub fn parse_mobile(raw: &str) -> Option<i64> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '+' | '-' | '(' | ')'))
        .collect();
    if digits.is_empty() {
        return None;
    }
    if digits.len() <= 15 && digits.chars().all(|c| c.is_ascii_digit()) {
        return digits.parse().ok();
    }
    // Spreadsheets sometimes hand numbers back as `9876543210.0` or `9.87654321E9`.
    let n: f64 = digits.parse().ok()?;
    (n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n < 1e15).then_some(n as i64)
}

pub fn parse_decimal(raw: &str) -> Option<f64> {
    let n: f64 = raw.trim().parse().ok()?;
    (n.is_finite() && n >= 0.0).then_some(n)
}

pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(|c| c == ',' || c == ';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Maps one data row onto a candidate record.
pub fn map_row(map: &HeaderMap, row: &[String]) -> Result<CandidateRecord, RowError> {
    let mut rec = CandidateRecord::default();
    for (idx, spec) in &map.slots {
        let raw = row.get(*idx).map(String::as_str).unwrap_or("");
        let f = &mut rec.fields;
        match (spec.parser, spec.field) {
            (Parser::Ignored, _) => {}
            (Parser::Required, Field::FirstName) => f.first_name = raw.trim().to_string(),
            (Parser::Required, Field::LastName) => f.last_name = raw.trim().to_string(),
            (_, Field::AdmissionNo) => rec.admission_no = non_empty(raw),
            (_, Field::RollNo) => rec.roll_no = non_empty(raw),
            (_, Field::Username) => rec.username = non_empty(raw),
            (_, Field::Email) => f.email = non_empty(raw),
            (_, Field::FatherName) => f.father_name = raw.trim().to_string(),
            (_, Field::MotherName) => f.mother_name = raw.trim().to_string(),
            (_, Field::DateOfBirth) => f.dob = parse_date(raw),
            (_, Field::MobileNo) => f.mobile_no = parse_mobile(raw),
            (_, Field::Category) => f.category = Category::parse(raw),
            (_, Field::Gender) => f.gender = Gender::parse(raw),
            (_, Field::Stream) => f.stream = non_empty(raw),
            (_, Field::Subjects) => f.subjects = Some(parse_list(raw)),
            (_, Field::CurrentAddress) => f.current_address = raw.trim().to_string(),
            (_, Field::PermanentAddress) => f.permanent_address = raw.trim().to_string(),
            (_, Field::Weight) => f.weight = parse_decimal(raw),
            (_, Field::Height) => f.height = parse_decimal(raw),
            (_, Field::FirstName | Field::LastName | Field::Classroom) => {}
        }
    }
    if rec.fields.first_name.is_empty() {
        return Err(RowError::MissingField("First name"));
    }
    if rec.fields.last_name.is_empty() {
        return Err(RowError::MissingField("Last name"));
    }
    Ok(rec)
}

pub fn read_csv(bytes: &[u8]) -> RegistryResult<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    let header = reader
        .headers()
        .map_err(|e| RegistryError::Format(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| RegistryError::Format(e.to_string()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { header, rows })
}

pub fn write_csv(table: &Table) -> RegistryResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let write_err = |e: csv::Error| RegistryError::Format(e.to_string());
    writer.write_record(&table.header).map_err(write_err)?;
    for row in &table.rows {
        writer.write_record(row).map_err(write_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| RegistryError::Format(e.to_string()))
}
