//! Failure classification into the [`NormalizedError`] contract.
//!
//! Every failure the transport can produce is first captured as a [`RawFailure`] and then
//! funnelled through [`classify`], so layers above the client only ever branch on one shape.

// crates.io
use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	error::{DEFAULT_ERROR_MESSAGE, UNKNOWN_ERROR_CODE},
};

/// Transport code reported for requests aborted by the timeout.
pub const TIMEOUT_CODE: &str = "ECONNABORTED";
/// Transport code reported when the connection could not be established.
pub const CONNECT_CODE: &str = "ECONNREFUSED";

/// Failure captured before classification.
#[derive(Clone, Debug)]
pub enum RawFailure {
	/// No response was received.
	Transport(TransportFailure),
	/// A non-2xx response was received.
	Http(HttpFailure),
}

/// Network-level failure without any response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportFailure {
	/// Transport error code, when one could be derived.
	pub code: Option<String>,
	/// Whether the request was aborted by a timeout.
	pub timed_out: bool,
	/// Diagnostic message from the transport.
	pub message: String,
}
impl TransportFailure {
	/// Capture a reqwest error.
	pub fn from_reqwest(err: &reqwest::Error) -> Self {
		let timed_out = err.is_timeout();
		let code = if timed_out {
			Some(TIMEOUT_CODE.to_owned())
		} else if err.is_connect() {
			Some(CONNECT_CODE.to_owned())
		} else {
			None
		};

		Self { code, timed_out, message: err.to_string() }
	}
}

/// Response received with a non-success status.
#[derive(Clone, Debug)]
pub struct HttpFailure {
	/// Response status.
	pub status: StatusCode,
	/// Status text (reason phrase).
	pub status_text: Option<String>,
	/// Response body as received.
	pub body: FailureBody,
}
impl HttpFailure {
	/// Build a failure using the canonical reason phrase as status text.
	pub fn new(status: StatusCode, body: FailureBody) -> Self {
		Self { status, status_text: status.canonical_reason().map(str::to_owned), body }
	}
}

/// Body of a failed response.
#[derive(Clone, Debug)]
pub enum FailureBody {
	/// No body.
	Empty,
	/// Raw bytes together with the declared content type.
	Binary {
		/// Raw payload.
		bytes: Vec<u8>,
		/// Declared `Content-Type`, if any.
		content_type: Option<String>,
	},
}
impl FailureBody {
	/// Wrap raw response bytes; an empty payload becomes [`FailureBody::Empty`].
	pub fn from_bytes(bytes: Vec<u8>, content_type: Option<String>) -> Self {
		if bytes.is_empty() { Self::Empty } else { Self::Binary { bytes, content_type } }
	}
}

/// Error shape produced by the API server itself.
///
/// Decoding is strict: both `code` and `message` must be present, be strings, and be non-empty.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerError {
	code: String,
	message: String,
	#[serde(default)]
	uuid: Option<String>,
}
impl ServerError {
	fn decode(value: &Value) -> Option<Self> {
		let decoded = Self::deserialize(value).ok()?;

		(!decoded.code.is_empty() && !decoded.message.is_empty()).then_some(decoded)
	}

	fn into_normalized(self, status: StatusCode) -> NormalizedError {
		NormalizedError {
			code: self.code,
			http_code: status.as_u16(),
			message: self.message,
			error: true,
			uuid: self.uuid,
		}
	}
}

/// Convert any failure into the normalized error shape.
pub fn classify(failure: &RawFailure) -> NormalizedError {
	match failure {
		RawFailure::Transport(transport) => classify_transport(transport),
		RawFailure::Http(http) => classify_http(http),
	}
}

fn classify_transport(failure: &TransportFailure) -> NormalizedError {
	let code = failure.code.clone().unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_owned());
	let http_code = if failure.timed_out { 408 } else { 400 };

	tracing::debug!(code = %code, http_code, message = %failure.message, "transport failure");

	NormalizedError::new(code, http_code, DEFAULT_ERROR_MESSAGE)
}

fn classify_http(failure: &HttpFailure) -> NormalizedError {
	let status = failure.status;
	let code = failure
		.status_text
		.as_deref()
		.filter(|text| !text.is_empty())
		.unwrap_or(UNKNOWN_ERROR_CODE)
		.to_owned();
	let payload = match &failure.body {
		FailureBody::Empty => None,
		FailureBody::Binary { bytes, content_type } if declares_json(content_type.as_deref()) =>
			match decode_json(bytes) {
				Ok(value) => Some(value),
				Err(message) => {
					tracing::debug!(status = %status, %message, "undecodable json error body");

					return NormalizedError::new(code, status.as_u16(), message);
				},
			},
		FailureBody::Binary { .. } => None,
	};

	match payload.as_ref().and_then(ServerError::decode) {
		Some(server) => server.into_normalized(status),
		None => NormalizedError::new(code, status.as_u16(), DEFAULT_ERROR_MESSAGE),
	}
}

fn declares_json(content_type: Option<&str>) -> bool {
	content_type.map(|value| value.to_ascii_lowercase().contains("json")).unwrap_or(false)
}

fn decode_json(bytes: &[u8]) -> std::result::Result<Value, String> {
	let text = std::str::from_utf8(bytes).map_err(|err| err.to_string())?;

	serde_json::from_str(text).map_err(|err| err.to_string())
}
