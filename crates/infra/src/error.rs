//! Service-boundary error.

use thiserror::Error;

use stockroute_core::DomainError;

use crate::store::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// What a service operation hands back to the route layer.
///
/// Everything the caller can act on is a [`DomainError`]; `Store` is reserved
/// for backend failures the caller cannot fix.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store failure: {0}")]
    Store(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Domain(e) => e.is_retryable(),
            ServiceError::Store(_) => false,
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Store(_) => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency { expected, actual } => ServiceError::Domain(
                DomainError::concurrent(format!(
                    "record changed since it was read (expected {expected:?}, found revision {actual})"
                )),
            ),
            StoreError::NotFound => ServiceError::Domain(DomainError::not_found()),
            StoreError::AlreadyExists => {
                ServiceError::Domain(DomainError::invariant("record already exists"))
            }
            StoreError::Rejected(e) => ServiceError::Domain(e),
            StoreError::Unavailable(msg) => ServiceError::Store(msg),
        }
    }
}
