use crate::db;
use crate::ids;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Students,
    Security,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Students, SetupSection::Security];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "students" => Some(Self::Students),
            "security" => Some(Self::Security),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Security => "security",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Students => "setup.students",
            Self::Security => "setup.security",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Students => json!({
            "institutionCode": ids::DEFAULT_INSTITUTION_CODE,
            "generatorAttempts": ids::DEFAULT_ATTEMPTS,
            "conflictRetries": 3,
            "errorPreviewLimit": 10,
            "defaultExportFormat": "csv"
        }),
        SetupSection::Security => json!({
            "minPasswordLength": 8
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Students => match k.as_str() {
                "institutionCode" => {
                    let code = parse_string_max(v, k, 8)?.to_ascii_uppercase();
                    if code.len() < 2 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                        return Err("institutionCode must be 2-8 letters or digits".into());
                    }
                    obj.insert(k.clone(), Value::String(code));
                }
                "generatorAttempts" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                "conflictRetries" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 10)?));
                }
                "errorPreviewLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "defaultExportFormat" => {
                    let f = parse_string_max(v, k, 8)?.to_ascii_lowercase();
                    if f != "csv" && f != "xlsx" {
                        return Err("defaultExportFormat must be one of: csv, xlsx".into());
                    }
                    obj.insert(k.clone(), Value::String(f));
                }
                _ => return Err(format!("unknown students field: {}", k)),
            },
            SetupSection::Security => match k.as_str() {
                "minPasswordLength" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 4, 64)?));
                }
                _ => return Err(format!("unknown security field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values must not block the workspace.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

/// Typed view of the `students` section used by the import/export pipeline.
#[derive(Clone, Debug)]
pub struct StudentSettings {
    pub institution_code: String,
    pub generator_attempts: usize,
    pub conflict_retries: usize,
    pub error_preview_limit: usize,
    pub default_export_format: String,
}

impl StudentSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let v = load_section(conn, SetupSection::Students)?;
        Ok(Self::from_value(&v))
    }

    fn from_value(v: &Value) -> Self {
        let usize_field = |key: &str, default: usize| {
            v.get(key)
                .and_then(|n| n.as_u64())
                .map(|n| n as usize)
                .unwrap_or(default)
        };
        Self {
            institution_code: v
                .get("institutionCode")
                .and_then(|s| s.as_str())
                .unwrap_or(ids::DEFAULT_INSTITUTION_CODE)
                .to_string(),
            generator_attempts: usize_field("generatorAttempts", ids::DEFAULT_ATTEMPTS),
            conflict_retries: usize_field("conflictRetries", 3),
            error_preview_limit: usize_field("errorPreviewLimit", 10),
            default_export_format: v
                .get("defaultExportFormat")
                .and_then(|s| s.as_str())
                .unwrap_or("csv")
                .to_string(),
        }
    }
}

impl Default for StudentSettings {
    fn default() -> Self {
        Self::from_value(&default_section(SetupSection::Students))
    }
}

pub fn min_password_length(conn: &Connection) -> anyhow::Result<usize> {
    let v = load_section(conn, SetupSection::Security)?;
    Ok(v.get("minPasswordLength")
        .and_then(|n| n.as_u64())
        .map(|n| n as usize)
        .unwrap_or(8))
}
