// Error normalization
// Maps backend-specific server codes onto a small stable taxonomy

use crate::db::connection::ConnectionError;
use crate::db::traits::BackendError;
use crate::db::translate::TranslateError;
use thiserror::Error;

/// Symbolic code carried by duplicate-entry errors
pub const DUPLICATE_ENTRY_CODE: &str = "ER_DUP_ENTRY";

/// Normalized meaning of a backend error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unique constraint or unique index violated
    UniqueViolation,
    /// Caller lacks permission for the statement (e.g. CREATE DATABASE)
    PermissionDenied,
}

/// SQL Server error numbers. Supporting another engine means adding its codes here.
pub const CODE_TABLE: &[(u32, ErrorKind)] = &[
    // Violation of PRIMARY KEY / UNIQUE constraint
    (2627, ErrorKind::UniqueViolation),
    // Cannot insert duplicate key row in object with unique index
    (2601, ErrorKind::UniqueViolation),
    // CREATE DATABASE permission denied in database 'master'
    (262, ErrorKind::PermissionDenied),
];

pub fn classify(code: u32) -> Option<ErrorKind> {
    CODE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, kind)| *kind)
}

/// Errors surfaced by [`crate::db::QueryAdapter`]
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Placeholder mismatch: statement has {placeholders} placeholder(s), {params} parameter(s) supplied")]
    PlaceholderMismatch { placeholders: usize, params: usize },

    #[error("Duplicate entry (server error {code}): {message}")]
    DuplicateEntry { code: u32, message: String },

    #[error("{}", backend_message(.code, .message))]
    Backend { code: Option<u32>, message: String },

    #[error("Statement timed out after {0} ms")]
    Timeout(u64),
}

fn backend_message(code: &Option<u32>, message: &str) -> String {
    match code {
        Some(code) => format!("Backend error {}: {}", code, message),
        None => format!("Backend error: {}", message),
    }
}

impl AdapterError {
    /// Stable symbolic code for callers mapping errors onto responses
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Connection(_) => "ER_CONNECTION",
            AdapterError::PlaceholderMismatch { .. } => "ER_PLACEHOLDER_MISMATCH",
            AdapterError::DuplicateEntry { .. } => DUPLICATE_ENTRY_CODE,
            AdapterError::Backend { .. } => "ER_BACKEND",
            AdapterError::Timeout(_) => "ER_TIMEOUT",
        }
    }

    /// Server error number, when the backend reported one
    pub fn server_code(&self) -> Option<u32> {
        match self {
            AdapterError::DuplicateEntry { code, .. } => Some(*code),
            AdapterError::Backend { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_duplicate_entry(&self) -> bool {
        matches!(self, AdapterError::DuplicateEntry { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        self.server_code().and_then(classify) == Some(ErrorKind::PermissionDenied)
    }
}

impl From<TranslateError> for AdapterError {
    fn from(err: TranslateError) -> Self {
        match err {
            TranslateError::PlaceholderMismatch { placeholders, params } => {
                AdapterError::PlaceholderMismatch { placeholders, params }
            }
        }
    }
}

impl From<BackendError> for AdapterError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Connection(e) => AdapterError::Connection(e),
            BackendError::Server { code, message } => match classify(code) {
                Some(ErrorKind::UniqueViolation) => AdapterError::DuplicateEntry { code, message },
                _ => AdapterError::Backend {
                    code: Some(code),
                    message,
                },
            },
            BackendError::Driver(message) => AdapterError::Backend {
                code: None,
                message,
            },
        }
    }
}
