use rusqlite::ErrorCode;
use thiserror::Error;

use crate::password::PasswordError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("{message}")]
    NotFound {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("storage error: {0}")]
    Storage(rusqlite::Error),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound {
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "bad_params",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::NoWorkspace => "no_workspace",
            ServiceError::Storage(_) => "db_error",
            ServiceError::Password(_) => "password_failed",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Validation { .. } | ServiceError::NoWorkspace => 400,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound { .. } => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Storage(_) | ServiceError::Password(_) => 500,
        }
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            ServiceError::Validation { details, .. } | ServiceError::NotFound { details, .. } => {
                details.as_ref()
            }
            _ => None,
        }
    }
}

// Constraint violations that slip past the workflow checks (e.g. two writers racing on
// the same classroom name) still surface as the matching domain error.
impl From<rusqlite::Error> for ServiceError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, _) = e {
            if failure.code == ErrorCode::ConstraintViolation {
                match failure.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        return ServiceError::conflict("record already exists");
                    }
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        return ServiceError::not_found("referenced record not found");
                    }
                    _ => {}
                }
            }
        }
        ServiceError::Storage(e)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
