//! Domain error taxonomy shared by the registry modules.
//!
//! Row-level problems are recovered inside an import batch; the rest are
//! mapped onto protocol error codes by the IPC layer.

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("{0} is required")]
    MissingField(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Student with admission number {0} already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Row(#[from] RowError),

    #[error("unsupported or unreadable file: {0}")]
    Format(String),

    #[error("not signed in")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists(_) | Self::Conflict(_) => "conflict",
            Self::Validation(_) | Self::Row(_) => "bad_params",
            Self::Format(_) => "parse_failed",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Db(_) => "db_query_failed",
            Self::Hash(_) => "internal",
            Self::Io(_) => "write_failed",
        }
    }
}

impl From<argon2::password_hash::Error> for RegistryError {
    fn from(e: argon2::password_hash::Error) -> Self {
        Self::Hash(e.to_string())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
