//! Integration tests for opt-in response caching.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use resilient_rest::{
	CachePolicy, RequestConfig, RestClient, Result, cache::store::MemoryStore,
};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

fn client(server: &MockServer, store: Arc<MemoryStore>) -> Result<RestClient> {
	RestClient::builder().base_url(server.uri()).cache_store(store).build()
}

async fn mount_companies(server: &MockServer, expected_calls: u64) {
	Mock::given(method("GET"))
		.and(path("/companies"))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(json!([{ "id": 1, "name": "Acme" }])),
		)
		.expect(expected_calls)
		.mount(server)
		.await;
}

#[tokio::test]
async fn requests_without_policy_never_touch_the_cache() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let store = Arc::new(MemoryStore::new());
	let client = client(&server, store.clone())?;

	mount_companies(&server, 2).await;

	let first: Value = client.get("/companies", None).await.expect("first");
	let second: Value = client.get("/companies", None).await.expect("second");

	assert_eq!(first, second);
	assert!(store.is_empty().await);

	let metrics = client.metrics().snapshot();

	assert_eq!(metrics.requests, 2);
	assert_eq!(metrics.dispatches, 2);
	assert_eq!(metrics.cache_hits + metrics.cache_misses, 0);

	Ok(())
}

#[tokio::test]
async fn fresh_entries_short_circuit_the_network() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let store = Arc::new(MemoryStore::new());
	let client = client(&server, store.clone())?;
	let config: RequestConfig =
		serde_json::from_value(json!({ "cache": { "maxAge": 60_000 } })).expect("config");

	mount_companies(&server, 1).await;

	let first: Value = client.get("/companies", Some(config.clone())).await.expect("first");
	let second: Value = client.get("/companies", Some(config)).await.expect("second");

	assert_eq!(first, json!([{ "id": 1, "name": "Acme" }]));
	assert_eq!(first, second);
	assert_eq!(store.len().await, 1);

	let metrics = client.metrics().snapshot();

	assert_eq!(metrics.cache_misses, 1);
	assert_eq!(metrics.cache_hits, 1);
	assert_eq!(metrics.dispatches, 1);

	Ok(())
}

#[tokio::test]
async fn expired_entries_are_fetched_again() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let store = Arc::new(MemoryStore::new());
	let client = client(&server, store)?;
	let policy = CachePolicy::with_max_age(Duration::from_millis(50));
	let config = RequestConfig::new().with_cache(policy);

	mount_companies(&server, 2).await;

	let _: Value = client.get("/companies", Some(config.clone())).await.expect("first");

	tokio::time::sleep(Duration::from_millis(120)).await;

	let _: Value = client.get("/companies", Some(config)).await.expect("second");

	Ok(())
}

#[tokio::test]
async fn default_exclusions_skip_queries_and_writes() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let store = Arc::new(MemoryStore::new());
	let client = client(&server, store.clone())?;
	let config = RequestConfig::new().with_cache(CachePolicy::frequently_changed());

	mount_companies(&server, 2).await;

	Mock::given(method("POST"))
		.and(path("/companies"))
		.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 2 })))
		.expect(2)
		.mount(&server)
		.await;

	for _ in 0..2 {
		let _: Value =
			client.get("/companies?limit=5", Some(config.clone())).await.expect("query get");
		let created: Value = client
			.post("/companies", Some(&json!({ "name": "Initech" })), Some(config.clone()))
			.await
			.expect("post");

		assert_eq!(created, json!({ "id": 2 }));
	}

	assert!(store.is_empty().await);

	Ok(())
}
