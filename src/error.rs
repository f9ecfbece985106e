//! Crate-wide error types, the normalized API error contract, and `Result` aliases.

// crates.io
use serde::{Deserialize, Serialize};

/// Library-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Result type returned by every client verb.
pub type ApiResult<T> = std::result::Result<T, NormalizedError>;

/// Error code used when neither the server nor the transport supplied one.
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR";
/// Error code attached to failures raised inside the client itself.
pub const CLIENT_ERROR_CODE: &str = "CLIENT_ERROR";
/// Message attached to normalized errors lacking a server-provided message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Error.unknown";

/// Unified error type for client internals (configuration, storage, encoding).
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	InvalidHeaderName(#[from] http::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[cfg(feature = "redis")]
	#[error(transparent)]
	Redis(#[from] redis::RedisError),

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Credential storage error: {0}")]
	Credentials(String),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}

/// The single error record every client operation may fail with.
///
/// Serialized in the wire shape servers use for their own error bodies
/// (`{ "code", "httpCode", "message", "error", "uuid" }`), so callers can forward it as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code} ({http_code}): {message}")]
pub struct NormalizedError {
	/// Machine-readable error code.
	pub code: String,
	/// HTTP status associated with the failure (synthetic for transport failures).
	pub http_code: u16,
	/// Human-readable message or message key.
	pub message: String,
	/// Always `true`; kept for wire compatibility.
	pub error: bool,
	/// Server-assigned error identifier, when present.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub uuid: Option<String>,
}
impl NormalizedError {
	/// Build a normalized error; `error` is always set.
	pub fn new(code: impl Into<String>, http_code: u16, message: impl Into<String>) -> Self {
		Self { code: code.into(), http_code, message: message.into(), error: true, uuid: None }
	}

	/// Attach a server-assigned identifier.
	pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
		self.uuid = Some(uuid.into());

		self
	}

	/// Whether the failure ends the session without recovery.
	pub fn is_unauthorized(&self) -> bool {
		self.http_code == 401
	}

	/// Whether the failure asks for an access-token refresh.
	pub fn needs_refresh(&self) -> bool {
		self.http_code == 406
	}

	/// Whether the failure is a classified transport timeout.
	pub fn is_timeout(&self) -> bool {
		self.http_code == 408
	}
}
impl From<Error> for NormalizedError {
	fn from(value: Error) -> Self {
		Self::new(CLIENT_ERROR_CODE, 400, value.to_string())
	}
}
