//! Storage backends for cached responses.
//!
//! All backends namespace their keys with a prefix (`sp` by default) so several clients can
//! share one store without colliding.

// std
use std::{
	collections::HashMap,
	io::ErrorKind,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use async_trait::async_trait;
use tokio::{fs, sync::RwLock};
// self
use crate::{
	_prelude::*,
	cache::{
		entry::{CacheEntry, CacheKey},
		policy::DEFAULT_CACHE_PREFIX,
	},
};

/// Persistent key/value store holding cached response entries.
///
/// Expired entries are returned as-is; eviction is the caller's decision.
#[async_trait]
pub trait CacheStore: std::fmt::Debug + Send + Sync {
	/// Read the entry stored under `key`.
	async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

	/// Store `entry`, replacing any previous entry under the same key.
	async fn set(&self, entry: CacheEntry) -> Result<()>;

	/// Remove the entry stored under `key`, if any.
	async fn remove(&self, key: &CacheKey) -> Result<()>;
}

/// Process-local store; contents are lost when the process exits.
#[derive(Debug)]
pub struct MemoryStore {
	prefix: Arc<str>,
	entries: RwLock<HashMap<String, CacheEntry>>,
}
impl MemoryStore {
	/// Create an empty store with the default prefix.
	pub fn new() -> Self {
		Self::with_prefix(DEFAULT_CACHE_PREFIX)
	}

	/// Create an empty store with a custom prefix.
	pub fn with_prefix(prefix: impl AsRef<str>) -> Self {
		Self { prefix: Arc::from(prefix.as_ref()), entries: RwLock::new(HashMap::new()) }
	}

	/// Number of stored entries, fresh or not.
	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	/// Whether the store holds no entries.
	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}

	fn namespaced(&self, key: &CacheKey) -> String {
		format!("{}:{key}", self.prefix)
	}
}
impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}
#[async_trait]
impl CacheStore for MemoryStore {
	async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
		Ok(self.entries.read().await.get(&self.namespaced(key)).cloned())
	}

	async fn set(&self, entry: CacheEntry) -> Result<()> {
		let key = self.namespaced(&entry.key);

		self.entries.write().await.insert(key, entry);

		Ok(())
	}

	async fn remove(&self, key: &CacheKey) -> Result<()> {
		self.entries.write().await.remove(&self.namespaced(key));

		Ok(())
	}
}

/// Directory-backed store that survives process restarts.
///
/// Each entry is one JSON document under `<root>/<prefix>/`. Writes go through a temporary
/// file and a rename, so readers never observe a partially written entry.
#[derive(Debug)]
pub struct FileStore {
	dir: PathBuf,
	staging_seq: AtomicU64,
}
impl FileStore {
	/// Open (and create when missing) a store under `root` with the default prefix.
	pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
		Self::open_with_prefix(root, DEFAULT_CACHE_PREFIX).await
	}

	/// Open a store under `root` namespaced by `prefix`.
	pub async fn open_with_prefix(root: impl Into<PathBuf>, prefix: &str) -> Result<Self> {
		if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
			return Err(Error::Validation {
				field: "cache_prefix",
				reason: "May only contain ASCII letters, numbers, and '-'.".into(),
			});
		}

		let dir = root.into().join(prefix);

		fs::create_dir_all(&dir).await?;

		Ok(Self { dir, staging_seq: AtomicU64::new(0) })
	}

	fn path(&self, key: &CacheKey) -> PathBuf {
		self.dir.join(format!("{key}.json"))
	}
}
#[async_trait]
impl CacheStore for FileStore {
	async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
		let raw = match fs::read(self.path(key)).await {
			Ok(raw) => raw,
			Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err.into()),
		};
		let entry: CacheEntry = serde_json::from_slice(&raw)?;

		if entry.key != *key {
			return Err(Error::Cache(format!("Entry file for '{key}' holds key '{}'.", entry.key)));
		}

		Ok(Some(entry))
	}

	async fn set(&self, entry: CacheEntry) -> Result<()> {
		let path = self.path(&entry.key);
		let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
		let staging = path.with_extension(format!("{seq}.tmp"));
		let payload = serde_json::to_vec(&entry)?;

		fs::write(&staging, payload).await?;
		fs::rename(&staging, &path).await?;

		Ok(())
	}

	async fn remove(&self, key: &CacheKey) -> Result<()> {
		match fs::remove_file(self.path(key)).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err.into()),
		}
	}
}

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

#[cfg(feature = "redis")]
mod redis_store {
	// crates.io
	use async_trait::async_trait;
	use redis::AsyncCommands;
	// self
	use super::CacheStore;
	use crate::{
		_prelude::*,
		cache::{
			entry::{CacheEntry, CacheKey},
			policy::DEFAULT_CACHE_PREFIX,
		},
	};

	/// Redis-backed store; entries expire server-side once their freshness window ends.
	#[derive(Clone, Debug)]
	pub struct RedisStore {
		client: redis::Client,
		namespace: Arc<str>,
	}
	impl RedisStore {
		/// Create a store using the default prefix.
		pub fn new(client: redis::Client) -> Self {
			Self { client, namespace: Arc::from(DEFAULT_CACHE_PREFIX) }
		}

		/// Adjust the key namespace.
		pub fn with_namespace(mut self, namespace: impl AsRef<str>) -> Self {
			self.namespace = Arc::from(namespace.as_ref());

			self
		}

		fn key(&self, key: &CacheKey) -> String {
			format!("{}:{key}", self.namespace)
		}
	}
	#[async_trait]
	impl CacheStore for RedisStore {
		async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
			let mut conn = self.client.get_multiplexed_async_connection().await?;
			let value: Option<String> = conn.get(self.key(key)).await?;

			match value {
				Some(json) => Ok(Some(serde_json::from_str(&json)?)),
				None => Ok(None),
			}
		}

		async fn set(&self, entry: CacheEntry) -> Result<()> {
			let mut conn = self.client.get_multiplexed_async_connection().await?;
			let payload = serde_json::to_string(&entry)?;
			let ttl_secs = entry.max_age.as_secs().max(1);

			conn.set_ex::<_, _, ()>(self.key(&entry.key), payload, ttl_secs).await?;

			Ok(())
		}

		async fn remove(&self, key: &CacheKey) -> Result<()> {
			let mut conn = self.client.get_multiplexed_async_connection().await?;

			conn.del::<_, ()>(self.key(key)).await?;

			Ok(())
		}
	}
}
