//! Integration tests for session termination and single-flight token refresh.

// std
use std::{
	sync::{Arc, Mutex},
	time::Duration,
};
// crates.io
use resilient_rest::{Navigator, RefreshPhase, RestClient, Result, SessionToken};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_json, header, method, path},
};

const REFRESH_PATH: &str = "/auth/token/refresh";

type Visits = Arc<Mutex<Vec<String>>>;

fn recording_navigator() -> (Arc<dyn Navigator>, Visits) {
	let visits = Visits::default();
	let sink = visits.clone();
	let navigator: Arc<dyn Navigator> =
		Arc::new(move |path: &str| sink.lock().expect("lock").push(path.to_owned()));

	(navigator, visits)
}

async fn signed_in_client(
	server: &MockServer,
	refresh_path: Option<&str>,
	refresh_token: Option<&str>,
) -> Result<(RestClient, Visits)> {
	let (navigator, visits) = recording_navigator();
	let client = RestClient::builder()
		.base_url(server.uri())
		.refresh_path(refresh_path.map(str::to_owned))
		.navigator(navigator)
		.build()?;

	client
		.credentials()
		.store_session(&SessionToken::new("stale", refresh_token.map(str::to_owned)))
		.await?;

	Ok((client, visits))
}

fn server_error(status: u16, code: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(status).set_body_json(json!({ "code": code, "message": message }))
}

async fn mount_expired_token(server: &MockServer) {
	mount_expired_token_at(server, "/companies", Duration::ZERO).await;
}

async fn mount_expired_token_at(server: &MockServer, route: &str, delay: Duration) {
	Mock::given(method("GET"))
		.and(path(route))
		.and(header("authorization", "Bearer stale"))
		.respond_with(server_error(406, "TOKEN_EXPIRED", "Auth.tokenExpired").set_delay(delay))
		.mount(server)
		.await;
}

#[tokio::test]
async fn unauthorized_clears_tokens_and_redirects() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, Some(REFRESH_PATH), Some("refresh-1")).await?;

	Mock::given(method("GET"))
		.and(path("/profile"))
		.respond_with(server_error(401, "UNAUTHORIZED", "Auth.unauthorized"))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(REFRESH_PATH))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let error = client.get::<Value>("/profile", None).await.expect_err("401 must reject");

	assert_eq!(error.code, "UNAUTHORIZED");
	assert_eq!(error.http_code, 401);
	assert!(error.error);
	assert_eq!(client.credentials().session().await?, None);
	assert_eq!(*visits.lock().expect("lock"), vec!["/".to_owned()]);
	assert_eq!(client.metrics().snapshot().session_terminations, 1);

	Ok(())
}

#[tokio::test]
async fn concurrent_expired_tokens_share_one_refresh() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, Some(REFRESH_PATH), Some("refresh-1")).await?;

	mount_expired_token(&server).await;

	Mock::given(method("GET"))
		.and(path("/companies"))
		.and(header("authorization", "Bearer fresh"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
		.expect(5)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(REFRESH_PATH))
		.and(body_json(json!({ "refreshToken": "refresh-1" })))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(json!({
					"data": { "accessToken": "fresh", "refreshToken": "refresh-2" }
				}))
				.set_delay(Duration::from_millis(200)),
		)
		.expect(1)
		.mount(&server)
		.await;

	let handles: Vec<_> = (0..5)
		.map(|_| {
			let client = client.clone();

			tokio::spawn(async move { client.get::<Value>("/companies", None).await })
		})
		.collect();

	for handle in handles {
		assert_eq!(handle.await.expect("join").expect("replayed"), json!([{ "id": 1 }]));
	}

	let session = client.credentials().session().await?.expect("session kept");

	assert_eq!(session, SessionToken::new("fresh", Some("refresh-2".into())));
	assert_eq!(client.refresh_phase(), RefreshPhase::Idle);
	assert!(visits.lock().expect("lock").is_empty());

	let metrics = client.metrics().snapshot();

	assert_eq!(metrics.refresh_successes, 1);
	assert_eq!(metrics.failures, 0);

	Ok(())
}

#[tokio::test]
async fn failed_refresh_terminates_the_session() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, Some(REFRESH_PATH), Some("refresh-1")).await?;

	mount_expired_token(&server).await;

	Mock::given(method("POST"))
		.and(path(REFRESH_PATH))
		.respond_with(server_error(401, "REFRESH_EXPIRED", "Auth.refreshExpired"))
		.expect(1)
		.mount(&server)
		.await;

	let error = client.get::<Value>("/companies", None).await.expect_err("refresh must fail");

	assert_eq!(error.code, "REFRESH_EXPIRED");
	assert_eq!(error.http_code, 401);
	assert_eq!(client.credentials().session().await?, None);
	assert_eq!(*visits.lock().expect("lock"), vec!["/".to_owned()]);
	assert_eq!(client.refresh_phase(), RefreshPhase::Idle);
	assert_eq!(client.metrics().snapshot().refresh_errors, 1);

	Ok(())
}

#[tokio::test]
async fn late_expiry_after_failed_refresh_does_not_end_the_session_twice() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, Some(REFRESH_PATH), Some("refresh-1")).await?;

	mount_expired_token_at(&server, "/fast", Duration::ZERO).await;
	mount_expired_token_at(&server, "/slow", Duration::from_millis(400)).await;

	Mock::given(method("POST"))
		.and(path(REFRESH_PATH))
		.respond_with(server_error(401, "REFRESH_EXPIRED", "Auth.refreshExpired"))
		.expect(1)
		.mount(&server)
		.await;

	let (fast, slow) =
		tokio::join!(client.get::<Value>("/fast", None), client.get::<Value>("/slow", None));

	assert_eq!(fast.expect_err("refresh must fail").code, "REFRESH_EXPIRED");

	let slow = slow.expect_err("ended session must reject");

	assert_eq!(slow.code, "TOKEN_EXPIRED");
	assert_eq!(slow.http_code, 406);
	assert_eq!(*visits.lock().expect("lock"), vec!["/".to_owned()]);

	let metrics = client.metrics().snapshot();

	assert_eq!(metrics.refresh_errors, 1);
	assert_eq!(metrics.session_terminations, 1);

	Ok(())
}

#[tokio::test]
async fn late_expiry_after_rotation_replays_without_refreshing() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, Some(REFRESH_PATH), Some("refresh-1")).await?;

	mount_expired_token_at(&server, "/fast", Duration::ZERO).await;
	mount_expired_token_at(&server, "/slow", Duration::from_millis(400)).await;

	for route in ["/fast", "/slow"] {
		Mock::given(method("GET"))
			.and(path(route))
			.and(header("authorization", "Bearer fresh"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "route": route })))
			.expect(1)
			.mount(&server)
			.await;
	}

	Mock::given(method("POST"))
		.and(path(REFRESH_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "fresh" })))
		.expect(1)
		.mount(&server)
		.await;

	let (fast, slow) =
		tokio::join!(client.get::<Value>("/fast", None), client.get::<Value>("/slow", None));

	assert_eq!(fast.expect("fast replay"), json!({ "route": "/fast" }));
	assert_eq!(slow.expect("slow replay"), json!({ "route": "/slow" }));
	assert!(visits.lock().expect("lock").is_empty());

	let metrics = client.metrics().snapshot();

	assert_eq!(metrics.refresh_successes, 1);
	assert_eq!(metrics.failures, 0);

	Ok(())
}

#[tokio::test]
async fn disabled_refresh_ends_the_session_on_406() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, None, Some("refresh-1")).await?;

	mount_expired_token(&server).await;

	Mock::given(method("POST"))
		.and(path(REFRESH_PATH))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let error = client.get::<Value>("/companies", None).await.expect_err("406 must reject");

	assert_eq!(error.code, "TOKEN_EXPIRED");
	assert_eq!(error.http_code, 406);
	assert_eq!(client.credentials().session().await?, None);
	assert_eq!(*visits.lock().expect("lock"), vec!["/".to_owned()]);

	Ok(())
}

#[tokio::test]
async fn missing_refresh_token_ends_the_session() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, Some(REFRESH_PATH), None).await?;

	mount_expired_token(&server).await;

	let error = client.get::<Value>("/companies", None).await.expect_err("406 must reject");

	assert!(error.needs_refresh());
	assert_eq!(client.credentials().access_token().await?, None);
	assert_eq!(visits.lock().expect("lock").len(), 1);

	Ok(())
}

#[tokio::test]
async fn replays_are_not_refreshed_twice() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (client, visits) = signed_in_client(&server, Some(REFRESH_PATH), Some("refresh-1")).await?;

	mount_expired_token(&server).await;

	Mock::given(method("GET"))
		.and(path("/companies"))
		.and(header("authorization", "Bearer fresh"))
		.respond_with(server_error(406, "TOKEN_EXPIRED", "Auth.tokenExpired"))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(REFRESH_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "fresh" })))
		.expect(1)
		.mount(&server)
		.await;

	let error = client.get::<Value>("/companies", None).await.expect_err("replay 406 must reject");

	assert_eq!(error.http_code, 406);
	assert_eq!(
		client.credentials().session().await?,
		Some(SessionToken::new("fresh", Some("refresh-1".into())))
	);
	assert!(visits.lock().expect("lock").is_empty());

	Ok(())
}
