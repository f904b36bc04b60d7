use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure categories surfaced by the native database layer.
///
/// The typed helpers never invent their own codes: everything they return is
/// either raised by the active adaptor or produced while translating typed
/// values to native ones (`InvalidArgument` on the way in, `DataLoss` on the
/// way out).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbErrorCode {
    InvalidArgument,
    MissingProjectId,
    Internal,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    FailedPrecondition,
    DataLoss,
}

impl DbErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbErrorCode::InvalidArgument => "firestore/invalid-argument",
            DbErrorCode::MissingProjectId => "firestore/missing-project-id",
            DbErrorCode::Internal => "firestore/internal",
            DbErrorCode::NotFound => "firestore/not-found",
            DbErrorCode::AlreadyExists => "firestore/already-exists",
            DbErrorCode::PermissionDenied => "firestore/permission-denied",
            DbErrorCode::Unauthenticated => "firestore/unauthenticated",
            DbErrorCode::Unavailable => "firestore/unavailable",
            DbErrorCode::DeadlineExceeded => "firestore/deadline-exceeded",
            DbErrorCode::ResourceExhausted => "firestore/resource-exhausted",
            DbErrorCode::Aborted => "firestore/aborted",
            DbErrorCode::FailedPrecondition => "firestore/failed-precondition",
            DbErrorCode::DataLoss => "firestore/data-loss",
        }
    }

    /// Errors the HTTP datastore treats as transient.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            DbErrorCode::Internal
                | DbErrorCode::Unavailable
                | DbErrorCode::DeadlineExceeded
                | DbErrorCode::ResourceExhausted
                | DbErrorCode::Unauthenticated
        )
    }
}

#[derive(Clone, Debug)]
pub struct DbError {
    pub code: DbErrorCode,
    message: String,
}

impl DbError {
    pub fn new(code: DbErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for DbError {}

pub type DbResult<T> = Result<T, DbError>;

pub fn invalid_argument(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::InvalidArgument, message)
}

pub fn missing_project_id() -> DbError {
    DbError::new(
        DbErrorCode::MissingProjectId,
        "Adaptor options must include a project_id (set GCLOUD_PROJECT or FIREBASE_CONFIG)",
    )
}

pub fn internal_error(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::Internal, message)
}

pub fn not_found(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::NotFound, message)
}

pub fn already_exists(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::AlreadyExists, message)
}

pub fn permission_denied(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::PermissionDenied, message)
}

pub fn unauthenticated(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::Unauthenticated, message)
}

pub fn unavailable(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::Unavailable, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::DeadlineExceeded, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::ResourceExhausted, message)
}

pub fn aborted(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::Aborted, message)
}

pub fn failed_precondition(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::FailedPrecondition, message)
}

pub fn data_loss(message: impl Into<String>) -> DbError {
    DbError::new(DbErrorCode::DataLoss, message)
}
