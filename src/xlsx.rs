//! Minimal single-sheet workbook codec (Office Open XML spreadsheet).
//!
//! Writes every cell as an inline string so identifiers keep their leading
//! zeros. Reads the first sheet of any workbook, resolving shared strings
//! and inline strings; numeric cells come back as their stored text.

use anyhow::{anyhow, Context};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const DEFAULT_SHEET_ENTRY: &str = "xl/worksheets/sheet1.xml";
/// Sheet limits of the format; references past them are rejected.
const MAX_COLUMNS: usize = 16_384;
const MAX_ROWS: usize = 1_048_576;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

pub fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
}

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn column_letters(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Zero-based column index from a cell reference such as `AB12`.
fn column_index(cell_ref: &str) -> anyhow::Result<Option<usize>> {
    let mut n = 0usize;
    for c in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .filter(|n| *n <= MAX_COLUMNS)
            .ok_or_else(|| anyhow!("cell reference {cell_ref} is out of range"))?;
    }
    Ok(n.checked_sub(1))
}

fn xml_text(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();
    escape(cleaned.as_str()).into_owned()
}

fn sheet_xml(rows: &[Vec<String>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            xml.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_letters(c),
                r + 1,
                xml_text(value)
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

pub fn write_workbook(sheet_name: &str, rows: &[Vec<String>]) -> anyhow::Result<Vec<u8>> {
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        xml_text(sheet_name)
    );
    let entries: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        (DEFAULT_SHEET_ENTRY, sheet_xml(rows)),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in entries {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start entry {name}"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write entry {name}"))?;
    }
    let cursor = zip.finish().context("failed to finish workbook")?;
    Ok(cursor.into_inner())
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> anyhow::Result<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to open entry {name}")),
    };
    let mut s = String::new();
    file.read_to_string(&mut s)
        .with_context(|| format!("failed to read entry {name}"))?;
    Ok(Some(s))
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> anyhow::Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Worksheet entry of the first sheet, following workbook relationships.
fn first_sheet_entry(archive: &mut ZipArchive<Cursor<&[u8]>>) -> anyhow::Result<String> {
    let Some(workbook) = read_entry(archive, "xl/workbook.xml")? else {
        return Err(anyhow!("workbook.xml missing"));
    };
    let mut rel_id = None;
    let mut reader = Reader::from_str(&workbook);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                rel_id = attr_value(&e, b"id")?;
                break;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    let (Some(rel_id), Some(rels)) = (rel_id, read_entry(archive, "xl/_rels/workbook.xml.rels")?)
    else {
        return Ok(DEFAULT_SHEET_ENTRY.to_string());
    };

    let mut reader = Reader::from_str(&rels);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr_value(&e, b"Id")?.as_deref() == Some(rel_id.as_str()) {
                    if let Some(target) = attr_value(&e, b"Target")? {
                        return Ok(match target.strip_prefix('/') {
                            Some(abs) => abs.to_string(),
                            None => format!("xl/{target}"),
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(DEFAULT_SHEET_ENTRY.to_string())
}

fn shared_strings(xml: &str) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut reader = Reader::from_str(xml);
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Text(t) if in_text && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => out.push(current.take().unwrap_or_default()),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: Option<String>,
    value: String,
}

fn resolve_cell(cell: PendingCell, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => cell.value,
    }
}

fn sheet_rows(xml: &str, shared: &[String]) -> anyhow::Result<Vec<Vec<String>>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = Reader::from_str(xml);
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<PendingCell> = None;
    let mut capture = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    // Sparse sheets omit empty rows; keep row positions stable.
                    if let Some(r) = attr_value(&e, b"r")?.and_then(|r| r.parse::<usize>().ok()) {
                        if r > MAX_ROWS {
                            return Err(anyhow!("row number {r} is out of range"));
                        }
                        while rows.len() + 1 < r {
                            rows.push(Vec::new());
                        }
                    }
                    row = Some(Vec::new());
                }
                b"c" => {
                    let next = row.as_ref().map(Vec::len).unwrap_or(0);
                    let column = match attr_value(&e, b"r")? {
                        Some(cell_ref) => column_index(&cell_ref)?,
                        None => None,
                    };
                    if next >= MAX_COLUMNS && column.is_none() {
                        return Err(anyhow!("row has more than {MAX_COLUMNS} cells"));
                    }
                    cell = Some(PendingCell {
                        column: column.unwrap_or(next),
                        kind: attr_value(&e, b"t")?,
                        value: String::new(),
                    });
                }
                b"v" | b"t" => capture = cell.is_some(),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                if rows.len() >= MAX_ROWS {
                    return Err(anyhow!("sheet has more than {MAX_ROWS} rows"));
                }
                rows.push(Vec::new());
            }
            Event::Text(t) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let (Some(done), Some(r)) = (cell.take(), row.as_mut()) {
                        let column = done.column;
                        let text = resolve_cell(done, shared);
                        if r.len() <= column {
                            r.resize(column + 1, String::new());
                        }
                        r[column] = text;
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        if rows.len() >= MAX_ROWS {
                            return Err(anyhow!("sheet has more than {MAX_ROWS} rows"));
                        }
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

/// All rows of the first sheet, header included.
pub fn read_first_sheet(bytes: &[u8]) -> anyhow::Result<Vec<Vec<String>>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("not a workbook archive")?;
    let entry = first_sheet_entry(&mut archive)?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => shared_strings(&xml)?,
        None => Vec::new(),
    };
    let Some(sheet) = read_entry(&mut archive, &entry)? else {
        return Err(anyhow!("worksheet {entry} missing"));
    };
    sheet_rows(&sheet, &shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(18), "S");
        assert_eq!(column_index("AA7").expect("AA7"), Some(26));
        assert_eq!(column_index("s1").expect("s1"), Some(18));
        assert_eq!(column_index("XFD1").expect("XFD1"), Some(MAX_COLUMNS - 1));
        assert_eq!(column_index("12").expect("12"), None);
        assert!(column_index("XFE1").is_err());
        assert!(column_index("ZZZZZZZZZZZZZZZ1").is_err());
    }

    #[test]
    fn shared_strings_and_sparse_cells() {
        let shared = shared_strings(
            r#"<sst><si><t>First Name</t></si><si><r><t>Ash</t></r><r><t>a</t></r></si><si/></sst>"#,
        )
        .expect("sst");
        assert_eq!(shared, vec!["First Name", "Asha", ""]);

        let rows = sheet_rows(
            r#"<worksheet><sheetData>
                <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="inlineStr"><is><t>Height</t></is></c></row>
                <row r="3"><c r="A3" t="s"><v>1</v></c><c r="C3"><v>151.5</v></c></row>
            </sheetData></worksheet>"#,
            &shared,
        )
        .expect("sheet");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["First Name", "", "Height"]);
        assert!(rows[1].is_empty());
        assert_eq!(rows[2], vec!["Asha", "", "151.5"]);
    }
}
