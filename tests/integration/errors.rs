//! Integration tests for failure normalization.

// std
use std::time::Duration;
// crates.io
use resilient_rest::{NormalizedError, RequestConfig, RestClient, Result};
use serde::Deserialize;
use serde_json::Value;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

#[tokio::test]
async fn binary_json_error_bodies_pass_through() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let client = RestClient::builder().base_url(server.uri()).build()?;

	Mock::given(method("PUT"))
		.and(path("/companies/1"))
		.respond_with(ResponseTemplate::new(422).set_body_raw(
			br#"{"code":"COMPANY_INVALID","message":"Company.invalid","uuid":"err-7"}"#.to_vec(),
			"application/json; charset=utf-8",
		))
		.expect(1)
		.mount(&server)
		.await;

	let error = client
		.put::<_, Value>("/companies/1", Some(&serde_json::json!({ "name": "" })), None)
		.await
		.expect_err("422 must reject");

	assert_eq!(
		error,
		NormalizedError::new("COMPANY_INVALID", 422, "Company.invalid").with_uuid("err-7")
	);

	Ok(())
}

#[tokio::test]
async fn unrecognized_error_bodies_fall_back_to_status_text() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let client = RestClient::builder().base_url(server.uri()).build()?;

	Mock::given(method("DELETE"))
		.and(path("/companies/1"))
		.respond_with(ResponseTemplate::new(500).set_body_raw("<html>oops</html>", "text/html"))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/broken"))
		.respond_with(ResponseTemplate::new(502).set_body_raw("{not json", "application/json"))
		.mount(&server)
		.await;

	let error = client.delete::<Value>("/companies/1", None).await.expect_err("500 must reject");

	assert_eq!(error, NormalizedError::new("Internal Server Error", 500, "Error.unknown"));

	let error = client.get::<Value>("/broken", None).await.expect_err("502 must reject");

	assert_eq!(error.code, "Bad Gateway");
	assert_eq!(error.http_code, 502);
	assert_ne!(error.message, "Error.unknown");

	assert_eq!(client.metrics().snapshot().failures, 2);

	Ok(())
}

#[tokio::test]
async fn timeouts_become_408() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let client = RestClient::builder().base_url(server.uri()).build()?;

	Mock::given(method("GET"))
		.and(path("/slow"))
		.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
		.mount(&server)
		.await;

	let config = RequestConfig::new().with_timeout(Duration::from_millis(50));
	let error = client.get::<Value>("/slow", Some(config)).await.expect_err("must time out");

	assert_eq!(error.http_code, 408);
	assert_eq!(error.code, "ECONNABORTED");
	assert!(error.is_timeout());

	Ok(())
}

#[tokio::test]
async fn unreachable_servers_become_400() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let address = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;
	let client = RestClient::builder().base_url(format!("http://{address}")).build()?;
	let error = client.get::<Value>("/companies", None).await.expect_err("must fail");

	assert_eq!(error.http_code, 400);
	assert!(error.error);

	Ok(())
}

#[tokio::test]
async fn typed_responses_decode_or_report_client_errors() -> Result<()> {
	#[derive(Debug, Deserialize, PartialEq)]
	struct Company {
		id: u64,
		name: String,
	}

	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let client = RestClient::builder().base_url(server.uri()).build()?;

	Mock::given(method("GET"))
		.and(path("/companies/1"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(serde_json::json!({ "id": 1, "name": "Acme" })),
		)
		.mount(&server)
		.await;

	let company: Company = client.get("/companies/1", None).await.expect("company");

	assert_eq!(company, Company { id: 1, name: "Acme".into() });

	let error = client.get::<Vec<Company>>("/companies/1", None).await.expect_err("shape mismatch");

	assert_eq!(error.code, "CLIENT_ERROR");
	assert_eq!(error.http_code, 400);

	Ok(())
}
