//! Bulk student import: read the file, fold each row into an outcome,
//! reduce the outcomes into a summary.

use crate::catalog::Classroom;
use crate::config::StudentSettings;
use crate::error::{RegistryError, RegistryResult};
use crate::reconcile::{self, Issued, RowOutcome};
use crate::roster::{self, Field, HeaderMap, Table};
use crate::xlsx;
use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Xlsx,
}

impl TableFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "excel" | "spreadsheet" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }

    /// Explicit choice first, then the file extension, then the content.
    pub fn detect(explicit: Option<&str>, path: &Path, bytes: &[u8]) -> RegistryResult<Self> {
        if let Some(name) = explicit {
            return Self::parse(name)
                .ok_or_else(|| RegistryError::Format(format!("unknown format {name}")));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") | Some("txt") => Ok(Self::Csv),
            Some("xlsx") => Ok(Self::Xlsx),
            Some("xls") => Err(RegistryError::Format(
                "legacy .xls workbooks are not supported; save as .xlsx".into(),
            )),
            _ if xlsx::looks_like_zip(bytes) => Ok(Self::Xlsx),
            _ => Ok(Self::Csv),
        }
    }
}

pub fn read_table(format: TableFormat, bytes: &[u8]) -> RegistryResult<Table> {
    match format {
        TableFormat::Csv => roster::read_csv(bytes),
        TableFormat::Xlsx => {
            let mut rows = xlsx::read_first_sheet(bytes)
                .map_err(|e| RegistryError::Format(format!("{e:#}")))?
                .into_iter();
            let header = rows.next().unwrap_or_default();
            Ok(Table {
                header,
                rows: rows.collect(),
            })
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowReport {
    pub row: usize,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported_count: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub suppressed_errors: usize,
    pub message: String,
    pub rows: Vec<RowReport>,
    pub credentials: Vec<Issued>,
}

/// Pure reduction of `(row number, outcome)` pairs.
pub fn summarize(outcomes: Vec<(usize, RowOutcome)>, error_preview_limit: usize) -> ImportSummary {
    let mut created = 0;
    let mut updated = 0;
    let mut skipped = 0;
    let mut all_errors = Vec::new();
    let mut rows = Vec::with_capacity(outcomes.len());
    let mut credentials = Vec::new();

    for (row, outcome) in outcomes {
        match outcome {
            RowOutcome::Created(issued) => {
                created += 1;
                rows.push(RowReport {
                    row,
                    status: "created",
                    student_id: Some(issued.student_id.clone()),
                    reason: None,
                });
                credentials.push(issued);
            }
            RowOutcome::Updated { student_id } => {
                updated += 1;
                rows.push(RowReport {
                    row,
                    status: "updated",
                    student_id: Some(student_id),
                    reason: None,
                });
            }
            RowOutcome::Skipped(reason) => {
                skipped += 1;
                all_errors.push(format!("Row {row}: {reason}"));
                rows.push(RowReport {
                    row,
                    status: "skipped",
                    student_id: None,
                    reason: Some(reason),
                });
            }
        }
    }

    let imported_count = created + updated;
    let suppressed_errors = all_errors.len().saturating_sub(error_preview_limit);
    all_errors.truncate(error_preview_limit);
    let mut message = format!("Successfully imported {imported_count} students.");
    if skipped > 0 {
        message.push_str(&format!(" {skipped} rows were skipped."));
    }
    ImportSummary {
        imported_count,
        created,
        updated,
        skipped,
        errors: all_errors,
        suppressed_errors,
        message,
        rows,
        credentials,
    }
}

/// Runs every data row through validation and reconciliation. Row failures
/// become `Skipped`; only whole-file problems are returned as errors.
pub fn import_table<R: Rng + ?Sized>(
    conn: &Connection,
    rng: &mut R,
    settings: &StudentSettings,
    classroom: &Classroom,
    table: &Table,
    overwrite_existing: bool,
) -> RegistryResult<ImportSummary> {
    let map = HeaderMap::from_header(&table.header);
    if map.recognised() == 0 {
        return Err(RegistryError::Format(
            "no recognised columns in the header row".into(),
        ));
    }
    if !map.has(Field::Subjects) {
        tracing::debug!("no Subjects column; subject links of updated students are kept");
    }

    let mut outcomes = Vec::with_capacity(table.rows.len());
    for (idx, row) in table.rows.iter().enumerate() {
        if roster::is_blank_row(row) {
            continue;
        }
        let row_no = idx + 1;
        let outcome = match roster::map_row(&map, row) {
            Ok(candidate) => reconcile::reconcile_row(
                conn,
                rng,
                settings,
                classroom,
                candidate,
                overwrite_existing,
            )
            .unwrap_or_else(|e| RowOutcome::Skipped(e.to_string())),
            Err(e) => RowOutcome::Skipped(e.to_string()),
        };
        match &outcome {
            RowOutcome::Skipped(reason) => tracing::warn!(row = row_no, %reason, "row skipped"),
            RowOutcome::Created(issued) => {
                tracing::debug!(row = row_no, username = %issued.username, "row created")
            }
            RowOutcome::Updated { student_id } => {
                tracing::debug!(row = row_no, %student_id, "row updated")
            }
        }
        outcomes.push((row_no, outcome));
    }

    let summary = summarize(outcomes, settings.error_preview_limit);
    tracing::info!(
        classroom = %classroom.label(),
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        "student import finished"
    );
    Ok(summary)
}

pub fn import_file<R: Rng + ?Sized>(
    conn: &Connection,
    rng: &mut R,
    settings: &StudentSettings,
    classroom: &Classroom,
    path: &Path,
    format: Option<&str>,
    overwrite_existing: bool,
) -> RegistryResult<ImportSummary> {
    let bytes = std::fs::read(path).map_err(|e| {
        RegistryError::Format(format!("failed to read {}: {e}", path.to_string_lossy()))
    })?;
    let format = TableFormat::detect(format, path, &bytes)?;
    let table = read_table(format, &bytes)?;
    import_table(conn, rng, settings, classroom, &table, overwrite_existing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(id: &str) -> Issued {
        Issued {
            student_id: id.to_string(),
            username: format!("user{id}"),
            password: "pw".into(),
            admission_no: format!("HBR2410{id:0>4}"),
            roll_no: "10A001".into(),
            username_fallback: false,
            password_fallback: true,
        }
    }

    #[test]
    fn summary_counts_and_formats_errors() {
        let outcomes = vec![
            (1, RowOutcome::Created(issued("1"))),
            (2, RowOutcome::Skipped("Last name is required".into())),
            (3, RowOutcome::Updated { student_id: "s3".into() }),
            (4, RowOutcome::Created(issued("4"))),
        ];
        let s = summarize(outcomes, 10);
        assert_eq!(s.created, 2);
        assert_eq!(s.updated, 1);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.imported_count, 3);
        assert_eq!(s.errors, vec!["Row 2: Last name is required".to_string()]);
        assert_eq!(s.suppressed_errors, 0);
        assert_eq!(s.credentials.len(), 2);
        assert_eq!(s.rows[2].status, "updated");
        assert_eq!(
            s.message,
            "Successfully imported 3 students. 1 rows were skipped."
        );
    }

    #[test]
    fn error_preview_is_truncated() {
        let outcomes = (1..=25)
            .map(|n| (n, RowOutcome::Skipped("bad".into())))
            .collect();
        let s = summarize(outcomes, 10);
        assert_eq!(s.errors.len(), 10);
        assert_eq!(s.errors[9], "Row 10: bad");
        assert_eq!(s.suppressed_errors, 15);
        assert_eq!(s.imported_count, 0);
        assert_eq!(s.rows.len(), 25);
    }

    #[test]
    fn format_detection_order() {
        let zip = b"PK\x03\x04rest";
        assert_eq!(
            TableFormat::detect(Some("Excel"), Path::new("a.csv"), b"").ok(),
            Some(TableFormat::Xlsx)
        );
        assert_eq!(
            TableFormat::detect(None, Path::new("a.CSV"), zip).ok(),
            Some(TableFormat::Csv)
        );
        assert_eq!(
            TableFormat::detect(None, Path::new("upload"), zip).ok(),
            Some(TableFormat::Xlsx)
        );
        assert_eq!(
            TableFormat::detect(None, Path::new("upload"), b"First Name").ok(),
            Some(TableFormat::Csv)
        );
        assert!(TableFormat::detect(None, Path::new("old.xls"), b"").is_err());
        assert!(TableFormat::detect(Some("pdf"), Path::new("a"), b"").is_err());
    }
}
