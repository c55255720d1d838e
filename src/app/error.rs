use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure kinds of the stream and document services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("upstream failure: {0:#}")]
    Upstream(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

/// True when `err` is a unique violation of the named constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    err.as_database_error()
        .filter(|db_err| db_err.code().as_deref() == Some("23505"))
        .and_then(|db_err| db_err.constraint())
        .is_some_and(|name| name == constraint)
}
