//! Student export and the blank import template.

use crate::error::{RegistryError, RegistryResult};
use crate::import::TableFormat;
use crate::roster::{self, Table};
use crate::students::{Category, Gender, StudentProfile};
use crate::xlsx;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

const SHEET_NAME: &str = "Students";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub rows_exported: usize,
    pub format: &'static str,
    pub bytes: usize,
    pub sha256: String,
    pub out_path: String,
}

/// Shortest text that parses back to `n`: `151.5`, `40`, `38.1234`.
pub fn format_decimal(n: f64) -> String {
    n.to_string()
}

/// One export row, in `roster::COLUMNS` order.
pub fn profile_row(p: &StudentProfile) -> Vec<String> {
    vec![
        p.admission_no.clone().unwrap_or_default(),
        p.roll_no.clone(),
        p.first_name.clone(),
        p.last_name.clone(),
        p.username.clone(),
        p.email.clone(),
        p.father_name.clone(),
        p.mother_name.clone(),
        p.dob.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
        p.mobile_no.map(|m| m.to_string()).unwrap_or_default(),
        p.category.map(Category::as_str).unwrap_or_default().to_string(),
        p.gender.map(Gender::as_str).unwrap_or_default().to_string(),
        p.classroom.clone(),
        p.stream.clone().unwrap_or_default(),
        p.subjects.join(", "),
        p.current_address.clone(),
        p.permanent_address.clone(),
        p.weight.map(format_decimal).unwrap_or_default(),
        p.height.map(format_decimal).unwrap_or_default(),
    ]
}

fn header_row() -> Vec<String> {
    roster::export_header().into_iter().map(str::to_string).collect()
}

fn encode(format: TableFormat, table: &Table) -> RegistryResult<Vec<u8>> {
    match format {
        TableFormat::Csv => roster::write_csv(table),
        TableFormat::Xlsx => {
            let mut rows = Vec::with_capacity(table.rows.len() + 1);
            rows.push(table.header.clone());
            rows.extend(table.rows.iter().cloned());
            xlsx::write_workbook(SHEET_NAME, &rows)
                .map_err(|e| RegistryError::Format(format!("{e:#}")))
        }
    }
}

fn write_out(
    out_path: &Path,
    format: TableFormat,
    table: &Table,
) -> RegistryResult<ExportSummary> {
    let bytes = encode(format, table)?;
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out_path, &bytes)?;
    Ok(ExportSummary {
        rows_exported: table.rows.len(),
        format: format.as_str(),
        bytes: bytes.len(),
        sha256: format!("{:x}", Sha256::digest(&bytes)),
        out_path: out_path.to_string_lossy().into_owned(),
    })
}

pub fn export_profiles(
    profiles: &[StudentProfile],
    format: TableFormat,
    out_path: &Path,
) -> RegistryResult<ExportSummary> {
    let table = Table {
        header: header_row(),
        rows: profiles.iter().map(profile_row).collect(),
    };
    let summary = write_out(out_path, format, &table)?;
    tracing::info!(
        rows = summary.rows_exported,
        format = summary.format,
        path = %summary.out_path,
        "students exported"
    );
    Ok(summary)
}

/// Header plus two illustrative rows showing the accepted cell shapes.
pub fn write_template(format: TableFormat, out_path: &Path) -> RegistryResult<ExportSummary> {
    let sample = |cells: [&str; 19]| cells.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let table = Table {
        header: header_row(),
        rows: vec![
            sample([
                "", "", "Asha", "Khan", "", "asha@example.com", "Imran Khan", "Sara Khan",
                "2010-04-23", "9876543210", "GENERAL", "FEMALE", "", "SCIENCE",
                "ENGLISH, MATHS", "12 Lake Road", "12 Lake Road", "38.5", "142",
            ]),
            sample([
                "", "", "Ravi", "Verma", "", "", "Mohan Verma", "", "23/04/2010", "", "OBC",
                "MALE", "", "", "", "", "", "", "",
            ]),
        ],
    };
    write_out(out_path, format, &table)
}
