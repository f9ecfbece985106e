//! Cache keys and stored response entries.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use base64::prelude::*;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;
// self
use crate::{_prelude::*, http::request::RequestMethod};

/// Deterministic cache key derived from method, URL, and the cache-relevant header subset.
///
/// Keys are URL-safe base64 SHA-256 digests so every backend can use them verbatim as file
/// names or Redis keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);
impl CacheKey {
	/// Derive the key for a request.
	pub fn derive(
		method: RequestMethod,
		url: &Url,
		headers: &HeaderMap,
		key_headers: &[String],
	) -> Self {
		let mut names: Vec<String> =
			key_headers.iter().map(|name| name.trim().to_ascii_lowercase()).collect();

		names.sort_unstable();
		names.dedup();

		let mut hasher = Sha256::new();

		hasher.update(method.as_str().as_bytes());
		hasher.update(b"\n");
		hasher.update(url.as_str().as_bytes());

		for name in names {
			let values = headers
				.get_all(name.as_str())
				.iter()
				.map(|value| value.as_bytes())
				.collect::<Vec<_>>()
				.join(&b","[..]);

			hasher.update(b"\n");
			hasher.update(name.as_bytes());
			hasher.update(b":");
			hasher.update(&values);
		}

		Self(BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize()))
	}

	/// Key as string.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Response body stored under a [`CacheKey`].
///
/// Entries are immutable once written; a newer response for the same key supersedes them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
	/// Key the entry is stored under.
	pub key: CacheKey,
	/// Response body.
	pub body: Value,
	/// Wall-clock time of the write.
	pub stored_at: DateTime<Utc>,
	/// Freshness window granted at write time.
	#[serde(with = "crate::duration_ms")]
	pub max_age: Duration,
}
impl CacheEntry {
	/// Create an entry stored now.
	pub fn new(key: CacheKey, body: Value, max_age: Duration) -> Self {
		Self::stored_at(key, body, max_age, Utc::now())
	}

	/// Create an entry with an explicit write time.
	pub fn stored_at(
		key: CacheKey,
		body: Value,
		max_age: Duration,
		stored_at: DateTime<Utc>,
	) -> Self {
		Self { key, body, stored_at, max_age }
	}

	/// Whether the entry is still valid at `now` (`now - stored_at <= max_age`).
	pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
		let max_age = TimeDelta::from_std(self.max_age).unwrap_or(TimeDelta::MAX);

		now.signed_duration_since(self.stored_at) <= max_age
	}

	/// Instant after which the entry is stale.
	pub fn expires_at(&self) -> Option<DateTime<Utc>> {
		let max_age = TimeDelta::from_std(self.max_age).ok()?;

		self.stored_at.checked_add_signed(max_age)
	}
}
