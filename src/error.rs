use thiserror::Error;

/// Coarse failure domain, used by callers that decide whether to degrade
/// to local data or surface the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Remote,
    PolicyDenied,
    RelationMissing,
    NotFound,
    OperationFailed,
    Auth,
    Validation,
    Transport,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Backend error: {message}")]
    Remote {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("Denied by row-level security policy: {0}")]
    PolicyDenied(String),

    #[error("Relation does not exist: {0}")]
    RelationMissing(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Local storage operation failed: {0}")]
    OperationFailed(String),

    #[error("Email address has not been confirmed")]
    EmailNotConfirmed,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

const UNIQUE_VIOLATION: &str = "23505";
const INSUFFICIENT_PRIVILEGE: &str = "42501";
const UNDEFINED_TABLE: &str = "42P01";
const PGRST_NO_ROWS: &str = "PGRST116";
const PGRST_TABLE_MISSING: &str = "PGRST205";

impl AppError {
    /// Build an error from a backend failure, recognizing policy denials and
    /// missing relations by code or message content.
    pub fn from_remote(status: Option<u16>, code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let code_is = |c: &str| code.as_deref() == Some(c);

        if message.contains("row-level security policy") || code_is(INSUFFICIENT_PRIVILEGE) {
            return AppError::PolicyDenied(message);
        }
        if code_is(UNDEFINED_TABLE)
            || code_is(PGRST_TABLE_MISSING)
            || (message.contains("relation") && message.contains("does not exist"))
        {
            return AppError::RelationMissing(message);
        }
        if code_is(PGRST_NO_ROWS) {
            return AppError::NotFound(message);
        }

        AppError::Remote {
            status,
            code,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Remote { .. } => ErrorKind::Remote,
            AppError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            AppError::RelationMissing(_) => ErrorKind::RelationMissing,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::OperationFailed(_) | AppError::Database(_) | AppError::Sqlite(_) => {
                ErrorKind::OperationFailed
            }
            AppError::EmailNotConfirmed | AppError::NotAuthenticated => ErrorKind::Auth,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Http(_) => ErrorKind::Transport,
            AppError::Config(_)
            | AppError::Json(_)
            | AppError::Io(_)
            | AppError::TomlDe(_)
            | AppError::Url(_)
            | AppError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Backend error code, when the failure came from the backend.
    pub fn code(&self) -> Option<&str> {
        match self {
            AppError::Remote { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Remote { status, .. } => *status,
            AppError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION)
    }
}
