//! Request descriptors and per-call configuration.

// std
use std::{
	collections::BTreeMap,
	fmt::{Display, Formatter, Result as FmtResult},
};
// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method,
	header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
// self
use crate::{_prelude::*, cache::policy::CachePolicy};

/// HTTP verbs exposed by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
	/// `GET`.
	Get,
	/// `POST`.
	Post,
	/// `PUT`.
	Put,
	/// `DELETE`.
	Delete,
}
impl RequestMethod {
	/// Canonical upper-case verb.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
		}
	}

	/// Equivalent [`http::Method`].
	pub fn as_http(&self) -> Method {
		match self {
			Self::Get => Method::GET,
			Self::Post => Method::POST,
			Self::Put => Method::PUT,
			Self::Delete => Method::DELETE,
		}
	}
}
impl Display for RequestMethod {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Caller-supplied options for a single request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
	/// Extra headers merged over the defaults; `Authorization` is always recomputed.
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	/// Cache policy; requests without one never touch the cache.
	#[serde(default)]
	pub cache: Option<CachePolicy>,
	/// Per-request timeout overriding the client default.
	#[serde(default, with = "crate::optional_duration_ms", skip_serializing_if = "Option::is_none")]
	pub timeout: Option<Duration>,
}
impl RequestConfig {
	/// Empty configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Add or replace a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Opt the request into caching under the given policy.
	pub fn with_cache(mut self, policy: CachePolicy) -> Self {
		self.cache = Some(policy);

		self
	}

	/// Override the client-wide timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}
}

/// Fully resolved outgoing request, built fresh for every call.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// HTTP verb.
	pub method: RequestMethod,
	/// Absolute request URL.
	pub url: Url,
	/// Optional JSON body.
	pub body: Option<Value>,
	/// Final header set, including `Authorization` when a session exists.
	pub headers: HeaderMap,
	/// Cache policy copied from the caller configuration.
	pub cache: Option<CachePolicy>,
	/// Effective timeout.
	pub timeout: Duration,
}
impl RequestDescriptor {
	/// Merge the base address, caller configuration, and bearer token into a descriptor.
	pub fn build(
		base_url: &Url,
		default_timeout: Duration,
		method: RequestMethod,
		path: &str,
		body: Option<Value>,
		config: &RequestConfig,
		access_token: Option<&str>,
	) -> Result<Self> {
		let url = resolve_url(base_url, path)?;
		let mut headers = HeaderMap::with_capacity(config.headers.len() + 2);

		for (name, value) in &config.headers {
			let name = HeaderName::from_bytes(name.as_bytes())?;

			if name == AUTHORIZATION {
				continue;
			}

			headers.insert(name, HeaderValue::from_str(value)?);
		}

		if let Some(token) = access_token.filter(|token| !token.is_empty()) {
			let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;

			value.set_sensitive(true);
			headers.insert(AUTHORIZATION, value);
		}
		if body.is_some() && !headers.contains_key(CONTENT_TYPE) {
			headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		}

		Ok(Self {
			method,
			url,
			body,
			headers,
			cache: config.cache.clone(),
			timeout: config.timeout.unwrap_or(default_timeout),
		})
	}

	/// Whether the request carries a bearer token.
	pub fn is_authenticated(&self) -> bool {
		self.headers.contains_key(AUTHORIZATION)
	}
}

/// Resolve a request path against the base address.
///
/// Absolute URLs pass through untouched; relative paths are appended to the base with exactly
/// one separating slash, so base paths such as `/api/v1` are preserved.
pub fn resolve_url(base_url: &Url, path: &str) -> Result<Url> {
	if let Ok(absolute) = Url::parse(path)
		&& matches!(absolute.scheme(), "http" | "https")
	{
		return Ok(absolute);
	}
	if path.is_empty() {
		return Ok(base_url.clone());
	}

	let joined =
		format!("{}/{}", base_url.as_str().trim_end_matches('/'), path.trim_start_matches('/'));

	Ok(Url::parse(&joined)?)
}
