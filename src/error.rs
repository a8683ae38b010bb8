use rusqlite::ffi;
use rusqlite::ErrorCode;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("external card is unusable: {0}")]
    Identity(String),
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{0} not found")]
    NotFound(String),
    /// Unique-key rejection on insert. The upsert engine consumes this one
    /// itself; it only escapes when no merge key was available.
    #[error("unique constraint rejected insert into {table}")]
    Conflict {
        table: &'static str,
        source: rusqlite::Error,
    },
    #[error("unsupported schema: {0}")]
    Schema(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Stable code used in the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity_error",
            Self::Validation { .. } => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "db_conflict",
            Self::Schema(_) => "schema_unsupported",
            Self::Storage(_) => "db_query_failed",
        }
    }

    /// Classify an insert failure: unique/primary-key violations become
    /// `Conflict`, everything else stays a storage error.
    pub fn from_insert(table: &'static str, e: rusqlite::Error) -> Self {
        if is_unique_violation(&e) {
            Self::Conflict { table, source: e }
        } else {
            Self::Storage(e)
        }
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}
