//! reqwest integration: dispatch a [`RequestDescriptor`] and capture the outcome.

// crates.io
use http::{HeaderMap, header::CONTENT_TYPE};
use reqwest::{Client, redirect::Policy};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	http::{
		classify::{FailureBody, HttpFailure, RawFailure, TransportFailure},
		request::RequestDescriptor,
	},
};

/// Maximum redirect depth followed by the default transport.
pub const MAX_REDIRECTS: usize = 10;

/// Build the default reqwest client used when none is injected.
pub fn default_client() -> Result<Client> {
	Client::builder()
		.redirect(Policy::limited(MAX_REDIRECTS))
		.user_agent(format!("resilient-rest/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(Duration::from_secs(10))
		.build()
		.map_err(Error::from)
}

/// Send the request and decode the success body; non-2xx responses and transport errors become
/// a [`RawFailure`].
pub async fn dispatch(
	client: &Client,
	descriptor: &RequestDescriptor,
) -> std::result::Result<Value, RawFailure> {
	let mut builder = client
		.request(descriptor.method.as_http(), descriptor.url.clone())
		.headers(descriptor.headers.clone())
		.timeout(descriptor.timeout);

	if let Some(body) = &descriptor.body {
		builder = builder.json(body);
	}

	let start = Instant::now();
	let response = builder.send().await.map_err(transport_failure)?;
	let status = response.status();
	let content_type = content_type(response.headers());
	let bytes = response.bytes().await.map_err(transport_failure)?;

	tracing::debug!(
		method = %descriptor.method,
		url = %descriptor.url,
		status = %status,
		elapsed = ?start.elapsed(),
		"request dispatched"
	);

	if !status.is_success() {
		return Err(RawFailure::Http(HttpFailure::new(
			status,
			FailureBody::from_bytes(bytes.to_vec(), content_type),
		)));
	}

	Ok(decode_body(&bytes))
}

/// Decode a success body: JSON when it parses, plain text otherwise, `null` when empty.
pub fn decode_body(bytes: &[u8]) -> Value {
	if bytes.is_empty() {
		return Value::Null;
	}

	serde_json::from_slice(bytes)
		.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn content_type(headers: &HeaderMap) -> Option<String> {
	headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).map(|s| s.to_string())
}

fn transport_failure(err: reqwest::Error) -> RawFailure {
	RawFailure::Transport(TransportFailure::from_reqwest(&err))
}
