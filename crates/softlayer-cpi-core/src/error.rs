//! Error types for SoftLayer CPI operations.
//!
//! This module provides the error hierarchy shared by the client and CPI crates. Remote
//! SoftLayer exceptions are classified once into an [`ExceptionKind`] where the HTTP response
//! is decoded, so callers match on kinds instead of re-parsing messages. Errors are finally
//! rendered as the CPI error object BOSH expects.

use serde::Serialize;
use thiserror::Error;

/// Exception code returned when a SoftLayer object does not exist.
pub const OBJECT_NOT_FOUND_EXCEPTION: &str = "SoftLayer_Exception_ObjectNotFound";

/// Exception code returned while a storage operation blocks the volume.
pub const BLOCKING_OPERATION_IN_PROGRESS_EXCEPTION: &str =
    "SoftLayer_Exception_Network_Storage_BlockingOperationInProgress";

/// Exception code returned by storage access control changes.
pub const GROUP_ACCESS_CONTROL_EXCEPTION: &str =
    "SoftLayer_Exception_Network_Storage_Group_AccessControlError";

/// Generic public exception code.
pub const PUBLIC_EXCEPTION: &str = "SoftLayer_Exception_Public";

/// Classification of a SoftLayer API exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExceptionKind {
    /// The addressed object does not exist.
    ObjectNotFound,
    /// Another storage operation is running; retry later.
    BlockingOperationInProgress,
    /// The volume cannot be mounted yet; retry later.
    NotReadyForMount,
    /// The SSH key being registered already exists on the account.
    SshKeyAlreadyExists,
    /// The upgrade order asks for prices the guest already has.
    CurrentPriceProvided,
    /// Any other exception.
    Other,
}

impl ExceptionKind {
    /// Classify an exception from its code and message.
    #[must_use]
    pub fn classify(code: &str, message: &str) -> Self {
        match code {
            OBJECT_NOT_FOUND_EXCEPTION => Self::ObjectNotFound,
            BLOCKING_OPERATION_IN_PROGRESS_EXCEPTION => Self::BlockingOperationInProgress,
            GROUP_ACCESS_CONTROL_EXCEPTION if message.contains("not yet ready for mount") => {
                Self::NotReadyForMount
            }
            PUBLIC_EXCEPTION if message.contains("SSH key already exists") => {
                Self::SshKeyAlreadyExists
            }
            _ if message.contains("A current price was provided for the upgrade order") => {
                Self::CurrentPriceProvided
            }
            _ => Self::Other,
        }
    }

    /// Whether the exception describes a transient storage state.
    #[must_use]
    pub const fn is_transient_storage_state(self) -> bool {
        matches!(self, Self::BlockingOperationInProgress | Self::NotReadyForMount)
    }
}

/// Main error type for CPI operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Remote service is unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// SoftLayer API returned an exception
    #[error("SoftLayer API error {code}: {message}")]
    Api {
        /// Classified kind
        kind: ExceptionKind,
        /// Raw exception code
        code: String,
        /// Exception message
        message: String,
    },

    /// Failed to parse a response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Bounded wait exceeded
    #[error("Time Out: {0}")]
    Timeout(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// VM does not exist
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// Disk does not exist
    #[error("Disk not found: {0}")]
    DiskNotFound(String),

    /// Invalid network configuration
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Operation not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Creating a VM failed
    #[error("VM creation failed: {message}")]
    VmCreationFailed {
        /// Failure description
        message: String,
        /// Whether retrying the whole create may succeed
        retryable: bool,
    },

    /// A command executed on the guest failed
    #[error("Guest command failed: {0}")]
    GuestCommand(String),

    /// External service error
    #[error("External service error: {service}: {message}")]
    ExternalServiceError {
        /// Service name that failed
        service: String,
        /// Error message
        message: String,
    },

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// An error wrapped with the operation that produced it
    #[error("{context}: {source}")]
    Context {
        /// Which entity and operation failed
        context: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

/// Specialized result type for CPI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// CPI error object serialized into the `error` field of a response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CpiError {
    /// BOSH error class
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Whether BOSH may retry the call
    pub ok_to_retry: bool,
}

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Api { .. } => "API_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::HttpError(_) => "HTTP_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::VmNotFound(_) => "VM_NOT_FOUND",
            Self::DiskNotFound(_) => "DISK_NOT_FOUND",
            Self::InvalidNetwork(_) => "INVALID_NETWORK",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::NotSupported(_) => "NOT_SUPPORTED",
            Self::VmCreationFailed { .. } => "VM_CREATION_FAILED",
            Self::GuestCommand(_) => "GUEST_COMMAND",
            Self::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Context { source, .. } => source.error_code(),
        }
    }

    /// Wrap this error with the operation that produced it.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error below any context wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The classified SoftLayer exception, if this error is one.
    #[must_use]
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match self.root() {
            Self::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the error means the addressed object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            Self::NotFound(_)
                | Self::VmNotFound(_)
                | Self::DiskNotFound(_)
                | Self::Api {
                    kind: ExceptionKind::ObjectNotFound,
                    ..
                }
        )
    }

    /// Whether the error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout(_))
    }

    /// Whether a single query failing this way is worth repeating.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Self::ServiceUnavailable(_) | Self::HttpError(_) | Self::Timeout(_)
        )
    }

    /// BOSH error class for this error.
    #[must_use]
    pub fn cpi_error_type(&self) -> &'static str {
        match self.root() {
            Self::NotSupported(_) => "Bosh::Clouds::NotSupported",
            Self::VmCreationFailed { .. } => "Bosh::Clouds::VMCreationFailed",
            Self::VmNotFound(_) => "Bosh::Clouds::VMNotFound",
            _ => "Bosh::Clouds::CloudError",
        }
    }

    /// Whether BOSH may retry the failed call.
    #[must_use]
    pub fn ok_to_retry(&self) -> bool {
        matches!(self.root(), Self::VmCreationFailed { retryable: true, .. })
    }

    /// Converts the error into a [`CpiError`].
    #[must_use]
    pub fn into_cpi_error(self) -> CpiError {
        CpiError {
            error_type: self.cpi_error_type().to_string(),
            ok_to_retry: self.ok_to_retry(),
            message: self.to_string(),
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub fn should_log(&self) -> bool {
        matches!(
            self.root(),
            Self::ConfigError(_) | Self::ExternalServiceError { .. }
        )
    }
}

/// Adds operation context to fallible results.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a fixed context.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`Error::Context`].
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error, if any, with a lazily built context.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`Error::Context`].
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| err.context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| err.context(f()))
    }
}

// Conversions from external error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ServiceUnavailable(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("Invalid URL: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
