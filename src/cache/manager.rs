//! Cache manager wiring policy decisions to a storage backend.

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::CacheEntry,
		policy::CacheDecision,
		store::CacheStore,
	},
	metrics::ClientMetrics,
};

/// Result of consulting the cache before dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheLookup {
	/// The request does not participate in caching.
	Bypass,
	/// A fresh entry was found.
	Hit(Value),
	/// No usable entry; the network must be consulted.
	Miss,
}

/// Reads, lazily evicts, and writes cache entries on behalf of the request pipeline.
///
/// Storage failures never fail a request: they are logged and treated as misses.
#[derive(Clone, Debug)]
pub struct CacheManager {
	store: Arc<dyn CacheStore>,
	metrics: Arc<ClientMetrics>,
}
impl CacheManager {
	/// Build a manager on top of `store`.
	pub fn new(store: Arc<dyn CacheStore>, metrics: Arc<ClientMetrics>) -> Self {
		Self { store, metrics }
	}

	/// Underlying store.
	pub fn store(&self) -> &Arc<dyn CacheStore> {
		&self.store
	}

	/// Look up a fresh entry for an eligible request, evicting it when expired.
	pub async fn lookup(&self, decision: &CacheDecision) -> CacheLookup {
		let CacheDecision::Eligible { key, .. } = decision else {
			return CacheLookup::Bypass;
		};
		let entry = match self.store.get(key).await {
			Ok(entry) => entry,
			Err(err) => {
				tracing::warn!(error = %err, key = %key, "cache read failed; treating as miss");

				None
			},
		};

		match entry {
			Some(entry) if entry.is_fresh(Utc::now()) => {
				tracing::debug!(key = %key, "cache hit");
				self.metrics.record_cache_hit();

				CacheLookup::Hit(entry.body)
			},
			Some(_) => {
				tracing::debug!(key = %key, "cache entry expired; evicting");

				if let Err(err) = self.store.remove(key).await {
					tracing::warn!(error = %err, key = %key, "failed to evict expired cache entry");
				}

				self.metrics.record_cache_miss();

				CacheLookup::Miss
			},
			None => {
				self.metrics.record_cache_miss();

				CacheLookup::Miss
			},
		}
	}

	/// Store a fresh response body for an eligible request.
	pub async fn store_response(&self, decision: &CacheDecision, body: &Value) {
		let CacheDecision::Eligible { key, max_age } = decision else {
			return;
		};
		let entry = CacheEntry::new(key.clone(), body.clone(), *max_age);

		if let Err(err) = self.store.set(entry).await {
			tracing::warn!(error = %err, key = %key, "cache write failed");
		}
	}
}
