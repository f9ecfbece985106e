//! Async caching REST client with bearer sessions, normalized errors, and single-flight token
//! refresh, built as the one gateway an application routes its API traffic through.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod http;
pub mod metrics;
pub mod session;

mod client;
mod error;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{ApiResult, Error, NormalizedError, Result};
}

pub use crate::{
	cache::policy::{CacheExclude, CachePolicy},
	client::{ClientConfig, RestClient, RestClientBuilder},
	error::{ApiResult, Error, NormalizedError, Result},
	http::request::{RequestConfig, RequestMethod},
	metrics::install_default_exporter,
	session::{
		credentials::{CookieJar, CredentialProvider, CredentialStore, Environment, SessionToken},
		navigator::Navigator,
		refresh::RefreshPhase,
	},
};

/// Serde helpers encoding [`std::time::Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
	// std
	use std::time::Duration;
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

/// [`duration_ms`] for optional durations; `None` maps to `null`.
pub(crate) mod optional_duration_ms {
	// std
	use std::time::Duration;
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match value {
			Some(duration) => super::duration_ms::serialize(duration, serializer),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
	}
}
