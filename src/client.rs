//! Client configuration, builder, and the request pipeline.
//!
//! Every request flows through [`RestClient::execute`]: the descriptor is built with a freshly
//! read bearer token, the cache is consulted, the request is dispatched, and failures are
//! classified before the session branch (401 terminates, 406 refreshes and replays) runs.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		manager::{CacheLookup, CacheManager},
		policy::{self, DEFAULT_CACHE_PREFIX},
		store::{CacheStore, MemoryStore},
	},
	error::CLIENT_ERROR_CODE,
	http::{
		classify,
		client::{self as transport, default_client},
		request::{RequestConfig, RequestDescriptor, RequestMethod},
	},
	metrics::{ClientMetrics, SessionEnd},
	session::{
		credentials::{
			CookieAttributes, CookieJar, CredentialProvider, Environment, REFRESH_TOKEN_NAME,
		},
		navigator::{LogNavigator, Navigator},
		refresh::{RefreshCoordinator, RefreshOutcome, RefreshPhase},
	},
};

/// Default API base address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Default redirect target after the session ends.
pub const DEFAULT_PATH: &str = "/";
/// Default endpoint exchanging a refresh token for a new access token.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/token/refresh";

/// Client-wide configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
	/// Base address relative request paths are joined to.
	pub base_url: String,
	/// Request timeout applied when a request does not override it.
	#[serde(with = "crate::duration_ms")]
	pub timeout: Duration,
	/// Path the navigator is sent to when the session ends.
	pub default_path: String,
	/// Token refresh endpoint; `None` ends the session on 406 without refreshing.
	pub refresh_path: Option<String>,
	/// Namespace of the default in-memory cache store.
	pub cache_prefix: String,
	/// Deployment environment selecting cookie security attributes.
	pub environment: Environment,
	/// Cookie domain overriding the environment default.
	pub cookie_domain: Option<String>,
}
impl ClientConfig {
	/// Validate the configuration.
	pub fn validate(&self) -> Result<()> {
		self.parsed_base_url()?;

		if self.timeout.is_zero() {
			return Err(Error::Validation {
				field: "timeout",
				reason: "Must be greater than zero.".into(),
			});
		}
		if !self.default_path.starts_with('/') {
			return Err(Error::Validation {
				field: "default_path",
				reason: "Must start with '/'.".into(),
			});
		}
		if self.refresh_path.as_deref().is_some_and(|path| path.trim().is_empty()) {
			return Err(Error::Validation {
				field: "refresh_path",
				reason: "Must not be empty; use null to disable refreshing.".into(),
			});
		}
		if self.cache_prefix.is_empty()
			|| !self.cache_prefix.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
		{
			return Err(Error::Validation {
				field: "cache_prefix",
				reason: "May only contain ASCII letters, numbers, and '-'.".into(),
			});
		}
		if self.cookie_domain.as_deref().is_some_and(str::is_empty) {
			return Err(Error::Validation {
				field: "cookie_domain",
				reason: "Must not be empty.".into(),
			});
		}

		Ok(())
	}

	/// Parse the base address, requiring an absolute http(s) URL.
	pub fn parsed_base_url(&self) -> Result<Url> {
		let url = Url::parse(&self.base_url).map_err(|err| Error::Validation {
			field: "base_url",
			reason: format!("Invalid URL: {err}."),
		})?;

		if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
			return Err(Error::Validation {
				field: "base_url",
				reason: "Must be an absolute http or https address.".into(),
			});
		}

		Ok(url)
	}

	/// Cookie attributes for the configured environment and domain override.
	pub fn cookie_attributes(&self) -> CookieAttributes {
		let attributes = CookieAttributes::for_environment(self.environment);

		match &self.cookie_domain {
			Some(domain) => attributes.with_domain(domain),
			None => attributes,
		}
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			base_url: DEFAULT_BASE_URL.into(),
			timeout: DEFAULT_TIMEOUT,
			default_path: DEFAULT_PATH.into(),
			refresh_path: Some(DEFAULT_REFRESH_PATH.into()),
			cache_prefix: DEFAULT_CACHE_PREFIX.into(),
			environment: Environment::default(),
			cookie_domain: None,
		}
	}
}

/// Builder for [`RestClient`].
#[derive(Default)]
pub struct RestClientBuilder {
	config: ClientConfig,
	cache_store: Option<Arc<dyn CacheStore>>,
	credentials: Option<CredentialProvider>,
	navigator: Option<Arc<dyn Navigator>>,
	http_client: Option<reqwest::Client>,
}
impl RestClientBuilder {
	/// Create a builder with default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the whole configuration.
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;

		self
	}

	/// Set the base address.
	pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
		self.config.base_url = base_url.into();

		self
	}

	/// Set the default request timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout;

		self
	}

	/// Set the redirect target used when the session ends.
	pub fn default_path(mut self, path: impl Into<String>) -> Self {
		self.config.default_path = path.into();

		self
	}

	/// Set or disable the token refresh endpoint.
	pub fn refresh_path(mut self, path: Option<String>) -> Self {
		self.config.refresh_path = path;

		self
	}

	/// Select the deployment environment.
	pub fn environment(mut self, environment: Environment) -> Self {
		self.config.environment = environment;

		self
	}

	/// Use a custom cache backend instead of the in-memory store.
	pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
		self.cache_store = Some(store);

		self
	}

	/// Use a custom credential provider instead of an in-memory cookie jar.
	pub fn credentials(mut self, credentials: CredentialProvider) -> Self {
		self.credentials = Some(credentials);

		self
	}

	/// Inject the navigation capability invoked when the session ends.
	pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
		self.navigator = Some(navigator);

		self
	}

	/// Inject a preconfigured reqwest client.
	pub fn http_client(mut self, client: reqwest::Client) -> Self {
		self.http_client = Some(client);

		self
	}

	/// Validate the configuration and construct a [`RestClient`].
	pub fn build(self) -> Result<RestClient> {
		let config = self.config;

		config.validate()?;

		let base_url = config.parsed_base_url()?;
		let metrics = ClientMetrics::new();
		let store = self
			.cache_store
			.unwrap_or_else(|| Arc::new(MemoryStore::with_prefix(&config.cache_prefix)));
		let credentials = match self.credentials {
			Some(credentials) => credentials,
			None => {
				let jar = CookieJar::in_memory(config.cookie_attributes());

				CredentialProvider::new(Arc::new(jar))
			},
		};
		let http = match self.http_client {
			Some(client) => client,
			None => default_client()?,
		};

		Ok(RestClient {
			inner: Arc::new(ClientInner {
				cache: CacheManager::new(store, metrics.clone()),
				credentials,
				navigator: self.navigator.unwrap_or_else(|| Arc::new(LogNavigator)),
				refresh: RefreshCoordinator::new(),
				base_url,
				http,
				metrics,
				config,
			}),
		})
	}
}
impl Debug for RestClientBuilder {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RestClientBuilder")
			.field("config", &self.config)
			.field("cache_store", &self.cache_store)
			.field("credentials", &self.credentials)
			.field("navigator", &self.navigator.as_ref().map(|_| "<navigator>"))
			.finish_non_exhaustive()
	}
}

struct ClientInner {
	config: ClientConfig,
	base_url: Url,
	http: reqwest::Client,
	cache: CacheManager,
	credentials: CredentialProvider,
	navigator: Arc<dyn Navigator>,
	refresh: RefreshCoordinator,
	metrics: Arc<ClientMetrics>,
}

/// Shared REST client; cheap to clone, all clones share cache, session, and refresh state.
#[derive(Clone)]
pub struct RestClient {
	inner: Arc<ClientInner>,
}
impl RestClient {
	/// Build a client from a configuration with default collaborators.
	pub fn new(config: ClientConfig) -> Result<Self> {
		Self::builder().config(config).build()
	}

	/// Create a [`RestClientBuilder`].
	pub fn builder() -> RestClientBuilder {
		RestClientBuilder::new()
	}

	/// Active configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Session token storage.
	pub fn credentials(&self) -> &CredentialProvider {
		&self.inner.credentials
	}

	/// Cache manager.
	pub fn cache(&self) -> &CacheManager {
		&self.inner.cache
	}

	/// Per-client metrics accumulator.
	pub fn metrics(&self) -> &Arc<ClientMetrics> {
		&self.inner.metrics
	}

	/// Whether a token refresh is currently in flight.
	pub fn refresh_phase(&self) -> RefreshPhase {
		self.inner.refresh.phase()
	}

	/// `GET` a resource.
	pub async fn get<T>(&self, url: &str, config: Option<RequestConfig>) -> ApiResult<T>
	where
		T: DeserializeOwned,
	{
		self.request(RequestMethod::Get, url, None, config).await
	}

	/// `POST` an optional JSON body.
	pub async fn post<B, T>(
		&self,
		url: &str,
		body: Option<&B>,
		config: Option<RequestConfig>,
	) -> ApiResult<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.request(RequestMethod::Post, url, encode_body(body)?, config).await
	}

	/// `PUT` an optional JSON body.
	pub async fn put<B, T>(
		&self,
		url: &str,
		body: Option<&B>,
		config: Option<RequestConfig>,
	) -> ApiResult<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.request(RequestMethod::Put, url, encode_body(body)?, config).await
	}

	/// `DELETE` a resource.
	pub async fn delete<T>(&self, url: &str, config: Option<RequestConfig>) -> ApiResult<T>
	where
		T: DeserializeOwned,
	{
		self.request(RequestMethod::Delete, url, None, config).await
	}

	/// Run one request through the pipeline and return the raw response body.
	///
	/// Success bodies are returned unmodified (JSON, text as a string, empty as `null`). Every
	/// failure is a [`NormalizedError`].
	#[tracing::instrument(skip(self, method, body, config), fields(method = %method))]
	pub async fn execute(
		&self,
		method: RequestMethod,
		url: &str,
		body: Option<Value>,
		config: Option<RequestConfig>,
	) -> ApiResult<Value> {
		let config = config.unwrap_or_default();

		self.inner.metrics.record_request(method);

		let result = self.execute_with_session(method, url, body.as_ref(), &config).await;

		if let Err(error) = &result {
			tracing::debug!(code = %error.code, http_code = error.http_code, "request rejected");

			self.inner.metrics.record_failure(error.http_code);
		}

		result
	}

	async fn request<T>(
		&self,
		method: RequestMethod,
		url: &str,
		body: Option<Value>,
		config: Option<RequestConfig>,
	) -> ApiResult<T>
	where
		T: DeserializeOwned,
	{
		let value = self.execute(method, url, body, config).await?;

		serde_json::from_value(value).map_err(|err| NormalizedError::from(Error::from(err)))
	}

	async fn execute_with_session(
		&self,
		method: RequestMethod,
		url: &str,
		body: Option<&Value>,
		config: &RequestConfig,
	) -> ApiResult<Value> {
		let sent_with = self.inner.credentials.access_token().await?;

		match self.send(method, url, body, config, sent_with.as_deref()).await {
			Err(error) if error.is_unauthorized() => {
				self.terminate_session(SessionEnd::Unauthorized).await;

				Err(error)
			},
			Err(error) if error.needs_refresh() =>
				self.refresh_and_replay(method, url, body, config, sent_with, error).await,
			result => result,
		}
	}

	async fn refresh_and_replay(
		&self,
		method: RequestMethod,
		url: &str,
		body: Option<&Value>,
		config: &RequestConfig,
		sent_with: Option<String>,
		trigger: NormalizedError,
	) -> ApiResult<Value> {
		let access_token = match self.inner.credentials.access_token().await? {
			Some(current) if sent_with.as_deref() != Some(current.as_str()) => {
				tracing::debug!("access token rotated since dispatch; replaying without refresh");

				current
			},
			None if sent_with.is_some() => {
				tracing::debug!("session ended while the request was in flight");

				return Err(trigger);
			},
			_ => match self.inner.refresh.run(|| self.refresh_session(trigger)).await {
				RefreshOutcome::Refreshed { access_token } => access_token,
				RefreshOutcome::Failed(error) => return Err(error),
			},
		};

		tracing::debug!("replaying request with refreshed session");

		match self.send(method, url, body, config, Some(&access_token)).await {
			Err(error) if error.is_unauthorized() => {
				self.terminate_session(SessionEnd::Unauthorized).await;

				Err(error)
			},
			result => result,
		}
	}

	/// Build, consult the cache, dispatch, and store; no session handling.
	async fn send(
		&self,
		method: RequestMethod,
		url: &str,
		body: Option<&Value>,
		config: &RequestConfig,
		access_token: Option<&str>,
	) -> ApiResult<Value> {
		let descriptor = RequestDescriptor::build(
			&self.inner.base_url,
			self.inner.config.timeout,
			method,
			url,
			body.cloned(),
			config,
			access_token,
		)?;
		let decision = policy::evaluate(&descriptor);

		if let CacheLookup::Hit(body) = self.inner.cache.lookup(&decision).await {
			return Ok(body);
		}

		let start = Instant::now();
		let outcome = transport::dispatch(&self.inner.http, &descriptor).await;

		self.inner.metrics.record_dispatch(method, start.elapsed());

		let body = outcome.map_err(|failure| classify::classify(&failure))?;

		self.inner.cache.store_response(&decision, &body).await;

		Ok(body)
	}

	/// Leader-side refresh: exchange the refresh token, persist the new pair, or end the
	/// session on any failure.
	async fn refresh_session(&self, trigger: NormalizedError) -> RefreshOutcome {
		let start = Instant::now();

		match self.exchange_refresh_token(trigger).await {
			Ok(access_token) => {
				tracing::info!(elapsed = ?start.elapsed(), "session refreshed");

				self.inner.metrics.record_refresh_success(start.elapsed());

				RefreshOutcome::Refreshed { access_token }
			},
			Err(error) => {
				tracing::warn!(
					code = %error.code,
					http_code = error.http_code,
					"session refresh failed"
				);

				self.inner.metrics.record_refresh_error();
				self.terminate_session(SessionEnd::RefreshFailed).await;

				RefreshOutcome::Failed(error)
			},
		}
	}

	async fn exchange_refresh_token(&self, trigger: NormalizedError) -> ApiResult<String> {
		let Some(refresh_path) = &self.inner.config.refresh_path else {
			tracing::debug!("token refresh disabled");

			return Err(trigger);
		};
		let Some(refresh_token) = self.inner.credentials.refresh_token().await? else {
			tracing::debug!("no refresh token stored");

			return Err(trigger);
		};
		let descriptor = RequestDescriptor::build(
			&self.inner.base_url,
			self.inner.config.timeout,
			RequestMethod::Post,
			refresh_path,
			Some(serde_json::json!({ (REFRESH_TOKEN_NAME): refresh_token })),
			&RequestConfig::default(),
			None,
		)?;
		let start = Instant::now();
		let outcome = transport::dispatch(&self.inner.http, &descriptor).await;

		self.inner.metrics.record_dispatch(RequestMethod::Post, start.elapsed());

		let body = outcome.map_err(|failure| classify::classify(&failure))?;
		let tokens = TokenResponse::parse(body).ok_or_else(|| {
			NormalizedError::new(
				CLIENT_ERROR_CODE,
				400,
				"Refresh response carried no access token.",
			)
		})?;

		self.inner.credentials.set_access_token(&tokens.access_token).await?;

		if let Some(refresh_token) = tokens.refresh_token.filter(|token| !token.is_empty()) {
			self.inner.credentials.set_refresh_token(&refresh_token).await?;
		}

		Ok(tokens.access_token)
	}

	async fn terminate_session(&self, reason: SessionEnd) {
		tracing::warn!(
			reason = reason.as_str(),
			redirect = %self.inner.config.default_path,
			"terminating session"
		);

		if let Err(err) = self.inner.credentials.clear().await {
			tracing::warn!(error = %err, "failed to clear session tokens");
		}

		self.inner.metrics.record_session_end(reason);
		self.inner.navigator.redirect(&self.inner.config.default_path);
	}
}
impl Debug for RestClient {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RestClient")
			.field("config", &self.inner.config)
			.field("cache", &self.inner.cache)
			.field("credentials", &self.inner.credentials)
			.field("refresh", &self.inner.refresh)
			.finish_non_exhaustive()
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenResponse {
	Bare(TokenPair),
	Wrapped { data: TokenPair },
}
impl TokenResponse {
	fn parse(body: Value) -> Option<TokenPair> {
		let pair = match serde_json::from_value(body).ok()? {
			Self::Bare(pair) | Self::Wrapped { data: pair } => pair,
		};

		(!pair.access_token.is_empty()).then_some(pair)
	}
}

fn encode_body<B>(body: Option<&B>) -> ApiResult<Option<Value>>
where
	B: ?Sized + Serialize,
{
	body.map(serde_json::to_value).transpose().map_err(|err| Error::from(err).into())
}
