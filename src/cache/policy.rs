//! Cache policies and the eligibility decision applied to every request.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	cache::entry::CacheKey,
	http::request::{RequestDescriptor, RequestMethod},
};

/// Freshness window for data that changes often.
pub const FREQUENTLY_CHANGED_MAX_AGE: Duration = Duration::from_secs(60);
/// Freshness window for data that rarely changes.
pub const INFREQUENTLY_CHANGED_MAX_AGE: Duration = Duration::from_secs(60 * 60);
/// Namespace prefix applied to persisted cache keys.
pub const DEFAULT_CACHE_PREFIX: &str = "sp";

/// Per-request cache configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
	/// How long a stored response stays fresh.
	#[serde(with = "crate::duration_ms")]
	pub max_age: Duration,
	/// Additional exclusion rules.
	#[serde(default)]
	pub exclude: CacheExclude,
	/// Request headers whose values take part in the cache key.
	#[serde(default = "default_key_headers")]
	pub key_headers: Vec<String>,
}
impl CachePolicy {
	/// Policy with the given freshness window and default exclusions.
	pub fn with_max_age(max_age: Duration) -> Self {
		Self { max_age, exclude: CacheExclude::default(), key_headers: default_key_headers() }
	}

	/// One-minute tier for frequently changing resources.
	pub fn frequently_changed() -> Self {
		Self::with_max_age(FREQUENTLY_CHANGED_MAX_AGE)
	}

	/// One-hour tier for rarely changing resources.
	pub fn infrequently_changed() -> Self {
		Self::with_max_age(INFREQUENTLY_CHANGED_MAX_AGE)
	}

	/// Replace the exclusion rules.
	pub fn exclude(mut self, exclude: CacheExclude) -> Self {
		self.exclude = exclude;

		self
	}
}

/// Rules removing otherwise cacheable requests from the cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheExclude {
	/// Skip URLs carrying a query string.
	#[serde(default = "default_true")]
	pub query: bool,
	/// Verbs never cached.
	#[serde(default = "default_excluded_methods")]
	pub methods: Vec<RequestMethod>,
	/// Path prefixes never cached.
	#[serde(default)]
	pub paths: Vec<String>,
}
impl Default for CacheExclude {
	fn default() -> Self {
		Self { query: true, methods: default_excluded_methods(), paths: Vec::new() }
	}
}

/// Why a request bypasses the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BypassReason {
	/// The caller attached no cache policy.
	NoPolicy,
	/// The verb is excluded.
	Method,
	/// The URL has a query string and query URLs are excluded.
	Query,
	/// The path matches an excluded prefix.
	Path,
}

/// Outcome of evaluating a request against its policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheDecision {
	/// Neither read nor write the cache.
	Bypass(BypassReason),
	/// Serve from the cache when fresh; store the network response otherwise.
	Eligible {
		/// Key under which the response is stored.
		key: CacheKey,
		/// Freshness window applied on write.
		max_age: Duration,
	},
}
impl CacheDecision {
	/// Whether the cache participates in this request.
	pub fn is_eligible(&self) -> bool {
		matches!(self, Self::Eligible { .. })
	}
}

/// Decide cache participation for a request.
pub fn evaluate(descriptor: &RequestDescriptor) -> CacheDecision {
	let Some(policy) = &descriptor.cache else {
		return CacheDecision::Bypass(BypassReason::NoPolicy);
	};
	let exclude = &policy.exclude;

	if exclude.methods.contains(&descriptor.method) {
		return CacheDecision::Bypass(BypassReason::Method);
	}
	if exclude.query && descriptor.url.query().is_some() {
		return CacheDecision::Bypass(BypassReason::Query);
	}

	let path = descriptor.url.path();

	if exclude.paths.iter().any(|prefix| path.starts_with(prefix.as_str())) {
		return CacheDecision::Bypass(BypassReason::Path);
	}

	let key = CacheKey::derive(
		descriptor.method,
		&descriptor.url,
		&descriptor.headers,
		&policy.key_headers,
	);

	tracing::trace!(key = %key, max_age = ?policy.max_age, "request is cache eligible");

	CacheDecision::Eligible { key, max_age: policy.max_age }
}

fn default_true() -> bool {
	true
}

fn default_excluded_methods() -> Vec<RequestMethod> {
	vec![RequestMethod::Post, RequestMethod::Put, RequestMethod::Delete]
}

fn default_key_headers() -> Vec<String> {
	vec!["accept".into()]
}
