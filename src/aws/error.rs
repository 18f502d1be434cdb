//! AWS error classification
//!
//! Typed faults for the RDS and Secrets Manager operations cavalier drives,
//! classified from the SDK error `.code()` via `ProvideErrorMetadata`
//! instead of string matching on Debug output. The orchestrator's
//! tolerate-vs-propagate decisions branch on these variants.

use aws_sdk_rds::error::ProvideErrorMetadata;
use thiserror::Error;

/// Fault categories the orchestrator branches on
#[derive(Debug, Error)]
pub enum AwsError {
    /// The DB instance does not exist (tolerated during terminate)
    #[error("DB instance not found: {0}")]
    InstanceNotFound(String),

    /// The DB snapshot does not exist (tolerated during snapshot cleanup)
    #[error("DB snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// The secret does not exist (tolerated during secret deletion)
    #[error("secret not found: {0}")]
    SecretNotFound(String),

    /// The DB instance cannot accept the operation in its current state
    /// (tolerated during delete as "already transitioning to deleted")
    #[error("DB instance in an invalid state: {0}")]
    InvalidInstanceState(String),

    /// The resource already exists (triggers the secret reuse path)
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Expired or otherwise unusable credentials; never retried
    #[error("AWS credentials expired: {0}")]
    CredentialsExpired(String),

    /// Rate limit exceeded (retryable while waiting)
    #[error("AWS rate limit exceeded: {0}")]
    Throttled(String),

    /// Any other AWS SDK error, with its code when one was present
    #[error("AWS error: {message}")]
    Other {
        code: Option<String>,
        message: String,
    },
}

const INSTANCE_NOT_FOUND_CODES: &[&str] = &["DBInstanceNotFound", "DBInstanceNotFoundFault"];

const SNAPSHOT_NOT_FOUND_CODES: &[&str] = &["DBSnapshotNotFound", "DBSnapshotNotFoundFault"];

const SECRET_NOT_FOUND_CODES: &[&str] = &["ResourceNotFoundException"];

const INVALID_STATE_CODES: &[&str] = &["InvalidDBInstanceState", "InvalidDBInstanceStateFault"];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "ResourceExistsException",
    "DBSnapshotAlreadyExists",
    "DBInstanceAlreadyExists",
];

const EXPIRED_CREDENTIAL_CODES: &[&str] = &[
    "ExpiredToken",
    "ExpiredTokenException",
    "RequestExpired",
    "TokenRefreshRequired",
];

const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

impl AwsError {
    /// Classify an AWS SDK error by its error code.
    pub fn from_sdk<E>(err: E) -> Self
    where
        E: ProvideErrorMetadata + std::fmt::Display,
    {
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());

        classify(err.code(), message)
    }

    pub fn is_instance_not_found(&self) -> bool {
        matches!(self, AwsError::InstanceNotFound(_))
    }

    pub fn is_snapshot_not_found(&self) -> bool {
        matches!(self, AwsError::SnapshotNotFound(_))
    }

    pub fn is_secret_not_found(&self) -> bool {
        matches!(self, AwsError::SecretNotFound(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, AwsError::InvalidInstanceState(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists(_))
    }

    pub fn is_credentials_expired(&self) -> bool {
        matches!(self, AwsError::CredentialsExpired(_))
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, AwsError::Throttled(_))
    }
}

/// Classify an error code and message into an [`AwsError`].
pub fn classify(code: Option<&str>, message: String) -> AwsError {
    match code {
        Some(c) if INSTANCE_NOT_FOUND_CODES.contains(&c) => AwsError::InstanceNotFound(message),
        Some(c) if SNAPSHOT_NOT_FOUND_CODES.contains(&c) => AwsError::SnapshotNotFound(message),
        Some(c) if SECRET_NOT_FOUND_CODES.contains(&c) => AwsError::SecretNotFound(message),
        Some(c) if INVALID_STATE_CODES.contains(&c) => AwsError::InvalidInstanceState(message),
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists(message),
        Some(c) if EXPIRED_CREDENTIAL_CODES.contains(&c) => AwsError::CredentialsExpired(message),
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled(message),
        _ => AwsError::Other {
            code: code.map(str::to_string),
            message,
        },
    }
}

/// Find the classified [`AwsError`] in an `anyhow` error chain, if any.
///
/// The service adapters always attach one before adding context, so any
/// fault that originated in AWS is recoverable here.
pub fn find(err: &anyhow::Error) -> Option<&AwsError> {
    err.chain().find_map(|cause| cause.downcast_ref::<AwsError>())
}
