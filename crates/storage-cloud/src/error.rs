//! Error types for the cloud adapters.
//!
//! Service clients report failures as a [`ServiceError`] carrying the HTTP
//! status and, for table services, the service error code. Adapters turn
//! these into [`AdapterError`]s; connection setup failures are
//! [`CloudStorageError`]s, which convert into
//! [`StorageError`](fleetsim_storage::StorageError).

use fleetsim_storage::{AdapterError, ConfigError, StorageError};
use thiserror::Error;

/// Result type alias for cloud adapter setup.
pub type Result<T> = std::result::Result<T, CloudStorageError>;

/// Result type alias for service client calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Table service code for an insert that collided with an existing entity.
pub const CODE_ENTITY_ALREADY_EXISTS: &str = "EntityAlreadyExists";

/// Table service code for a failed `If-Match` precondition.
pub const CODE_UPDATE_CONDITION_NOT_SATISFIED: &str = "UpdateConditionNotSatisfied";

/// Table service code for a missing entity.
pub const CODE_RESOURCE_NOT_FOUND: &str = "ResourceNotFound";

/// A failed call to a document or table service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service returned {status}{}: {message}", code_suffix(.code))]
pub struct ServiceError {
    /// HTTP status code.
    pub status: u16,
    /// Service-specific error code, when the service sends one.
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl ServiceError {
    /// Creates an error with a status and message.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, code: None, message: message.into() }
    }

    /// Attaches a service error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// 409.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    /// 412.
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(412, message)
    }

    /// 429.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(429, message)
    }

    /// Returns `true` for throttling, timeouts and server errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 408 | 429) || (500..600).contains(&self.status)
    }

    fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// Classifies the failure for the engine.
    ///
    /// | Status / code | Adapter error |
    /// |---------------|---------------|
    /// | 404, `ResourceNotFound` | [`AdapterError::NotFound`] |
    /// | 409, `EntityAlreadyExists` | [`AdapterError::AlreadyExists`] |
    /// | 412, `UpdateConditionNotSatisfied` | [`AdapterError::PreconditionFailed`] |
    /// | 408, 429, 5xx | transient [`AdapterError::Backend`] |
    /// | anything else | [`AdapterError::Backend`] |
    #[must_use]
    pub fn into_adapter_error(self) -> AdapterError {
        if self.has_code(CODE_UPDATE_CONDITION_NOT_SATISFIED) || self.status == 412 {
            return AdapterError::PreconditionFailed;
        }
        if self.has_code(CODE_ENTITY_ALREADY_EXISTS) || self.status == 409 {
            return AdapterError::AlreadyExists;
        }
        if self.has_code(CODE_RESOURCE_NOT_FOUND) || self.status == 404 {
            return AdapterError::NotFound;
        }

        let transient = self.is_transient();
        AdapterError::backend_with_source(self.message.clone(), transient, self)
    }
}

impl From<ServiceError> for AdapterError {
    fn from(err: ServiceError) -> Self {
        err.into_adapter_error()
    }
}

/// Errors raised while connecting a cloud adapter.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CloudStorageError {
    /// The connection string is malformed.
    #[error("Malformed connection string: {reason}")]
    ConnectionString {
        /// What is wrong with it.
        reason: String,
    },

    /// A setting required by the backend is absent.
    #[error("Connection string is missing {key}")]
    MissingSetting {
        /// The setting name as it appears in the connection string.
        key: &'static str,
    },

    /// The service client could not be constructed.
    #[error("Failed to build service client: {0}")]
    Client(String),

    /// The service rejected a setup call.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

impl From<CloudStorageError> for StorageError {
    fn from(err: CloudStorageError) -> Self {
        match err {
            CloudStorageError::ConnectionString { reason } => {
                StorageError::Config(ConfigError::Invalid { field: "connection_string", reason })
            },
            CloudStorageError::MissingSetting { key } => StorageError::Config(ConfigError::Invalid {
                field: "connection_string",
                reason: format!("missing {key}"),
            }),
            CloudStorageError::Client(message) => StorageError::external(message),
            CloudStorageError::Service(source) => StorageError::ExternalDependency {
                message: source.message.clone(),
                transient: source.is_transient(),
                source: Some(std::sync::Arc::new(source)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::not_found(ServiceError::not_found("gone"), "NotFound")]
    #[case::conflict(ServiceError::conflict("dup"), "AlreadyExists")]
    #[case::precondition(ServiceError::precondition_failed("etag"), "PreconditionFailed")]
    #[case::table_conflict_code(
        ServiceError::new(400, "dup").with_code(CODE_ENTITY_ALREADY_EXISTS),
        "AlreadyExists"
    )]
    #[case::table_condition_code(
        ServiceError::new(400, "etag").with_code(CODE_UPDATE_CONDITION_NOT_SATISFIED),
        "PreconditionFailed"
    )]
    fn status_mapping(#[case] err: ServiceError, #[case] expected: &str) {
        let mapped = match err.into_adapter_error() {
            AdapterError::NotFound => "NotFound",
            AdapterError::AlreadyExists => "AlreadyExists",
            AdapterError::PreconditionFailed => "PreconditionFailed",
            _ => "Backend",
        };
        assert_eq!(mapped, expected);
    }

    #[rstest]
    #[case(408, true)]
    #[case(429, true)]
    #[case(500, true)]
    #[case(503, true)]
    #[case(400, false)]
    #[case(401, false)]
    #[case(403, false)]
    fn transient_statuses(#[case] status: u16, #[case] transient: bool) {
        let err = ServiceError::new(status, "boom").into_adapter_error();
        assert!(
            matches!(err, AdapterError::Backend { transient: t, .. } if t == transient),
            "status {status}: {err:?}"
        );
    }

    #[test]
    fn connection_string_errors_are_config_errors() {
        let err: StorageError = CloudStorageError::MissingSetting { key: "AccountKey" }.into();
        assert!(err.is_structural());
        assert!(err.to_string().contains("AccountKey"));
    }

    #[test]
    fn service_setup_error_keeps_transient_flag() {
        let err: StorageError = CloudStorageError::from(ServiceError::throttled("slow down")).into();
        assert!(err.is_transient());
    }

    #[test]
    fn display_includes_code() {
        let err = ServiceError::new(400, "bad").with_code("InvalidInput");
        assert_eq!(err.to_string(), "service returned 400 (InvalidInput): bad");
        assert_eq!(ServiceError::not_found("x").to_string(), "service returned 404: x");
    }
}
