//! Session token storage backed by a cookie jar with environment-dependent security attributes.

// std
use std::{
	collections::BTreeMap,
	io::ErrorKind,
	path::PathBuf,
};
// crates.io
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};
// self
use crate::_prelude::*;

/// Cookie name holding the access token.
pub const ACCESS_TOKEN_NAME: &str = "accessToken";
/// Cookie name holding the refresh token.
pub const REFRESH_TOKEN_NAME: &str = "refreshToken";

/// Deployment environment, supplied explicitly at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
	/// Local development; cookies carry no extra security attributes.
	#[default]
	Development,
	/// Shared test deployment; cookies are scoped to the `.test` domain and marked secure.
	Test,
	/// Production; cookies are secure and same-site strict.
	Production,
}

/// `SameSite` cookie attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
	/// `SameSite=Strict`.
	Strict,
	/// `SameSite=Lax`.
	Lax,
	/// `SameSite=None`.
	None,
}
impl SameSite {
	fn as_str(&self) -> &'static str {
		match self {
			Self::Strict => "Strict",
			Self::Lax => "Lax",
			Self::None => "None",
		}
	}
}

/// Security attributes applied to every session cookie written by a [`CookieJar`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieAttributes {
	/// `Domain` attribute.
	#[serde(default)]
	pub domain: Option<String>,
	/// `Path` attribute.
	pub path: String,
	/// `Secure` flag.
	#[serde(default)]
	pub secure: bool,
	/// `HttpOnly` flag.
	#[serde(default)]
	pub http_only: bool,
	/// `SameSite` attribute.
	#[serde(default)]
	pub same_site: Option<SameSite>,
	/// Lifetime in milliseconds; `None` produces session cookies.
	#[serde(default, with = "crate::optional_duration_ms", skip_serializing_if = "Option::is_none")]
	pub max_age: Option<Duration>,
}
impl CookieAttributes {
	/// Attributes prescribed for an environment.
	pub fn for_environment(environment: Environment) -> Self {
		let mut attributes = Self::default();

		match environment {
			Environment::Development => {},
			Environment::Test => {
				attributes.domain = Some(".test".into());
				attributes.secure = true;
			},
			Environment::Production => {
				attributes.secure = true;
				attributes.same_site = Some(SameSite::Strict);
			},
		}

		attributes
	}

	/// Override the cookie domain.
	pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
		self.domain = Some(domain.into());

		self
	}

	/// Render a `Set-Cookie` style line for `name=value`, stamping `Expires` from `now`.
	pub fn render(&self, name: &str, value: &str, now: SystemTime) -> String {
		let mut line = format!("{name}={value}; Path={}", self.path);

		if let Some(domain) = &self.domain {
			line.push_str("; Domain=");
			line.push_str(domain);
		}
		if let Some(max_age) = self.max_age {
			line.push_str("; Expires=");
			line.push_str(&httpdate::fmt_http_date(now + max_age));
		}
		if self.secure {
			line.push_str("; Secure");
		}
		if self.http_only {
			line.push_str("; HttpOnly");
		}
		if let Some(same_site) = self.same_site {
			line.push_str("; SameSite=");
			line.push_str(same_site.as_str());
		}

		line
	}
}
impl Default for CookieAttributes {
	fn default() -> Self {
		Self {
			domain: None,
			path: "/".into(),
			secure: false,
			http_only: false,
			same_site: None,
			max_age: None,
		}
	}
}

/// Access/refresh token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
	/// Bearer token attached to every request.
	pub access_token: String,
	/// Token exchanged for a new access token on 406.
	pub refresh_token: Option<String>,
}
impl SessionToken {
	/// Build a token pair.
	pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
		Self { access_token: access_token.into(), refresh_token }
	}
}
impl std::fmt::Debug for SessionToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionToken")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Durable name/value storage for session tokens.
///
/// Writes are idempotent: replacing a value is safe from any call site.
#[async_trait]
pub trait CredentialStore: std::fmt::Debug + Send + Sync {
	/// Read a value.
	async fn get(&self, name: &str) -> Result<Option<String>>;

	/// Write a value.
	async fn set(&self, name: &str, value: &str) -> Result<()>;

	/// Delete a value; deleting a missing value succeeds.
	async fn remove(&self, name: &str) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct StoredCookie {
	value: String,
	expires: Option<SystemTime>,
}
impl StoredCookie {
	fn is_live(&self, now: SystemTime) -> bool {
		self.expires.map(|expires| expires > now).unwrap_or(true)
	}
}

/// Cookie-backed [`CredentialStore`].
///
/// An optional backing file makes the jar durable: cookies are persisted as `Set-Cookie`
/// style lines carrying the jar's attributes, and expired cookies are dropped on load.
#[derive(Debug)]
pub struct CookieJar {
	attributes: CookieAttributes,
	cookies: RwLock<BTreeMap<String, StoredCookie>>,
	path: Option<PathBuf>,
}
impl CookieJar {
	/// Jar living only in memory.
	pub fn in_memory(attributes: CookieAttributes) -> Self {
		Self { attributes, cookies: RwLock::new(BTreeMap::new()), path: None }
	}

	/// Jar persisted to `path`, loading any live cookies already stored there.
	pub async fn persistent(
		path: impl Into<PathBuf>,
		attributes: CookieAttributes,
	) -> Result<Self> {
		let path = path.into();
		let cookies = match fs::read_to_string(&path).await {
			Ok(raw) => parse_jar(&raw, SystemTime::now()),
			Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
			Err(err) => return Err(err.into()),
		};

		tracing::debug!(path = %path.display(), cookies = cookies.len(), "cookie jar loaded");

		Ok(Self { attributes, cookies: RwLock::new(cookies), path: Some(path) })
	}

	/// Attributes stamped on written cookies.
	pub fn attributes(&self) -> &CookieAttributes {
		&self.attributes
	}

	async fn persist(&self, cookies: &BTreeMap<String, StoredCookie>) -> Result<()> {
		let Some(path) = &self.path else {
			return Ok(());
		};
		let mut raw = String::new();

		for (name, cookie) in cookies {
			let mut attributes = self.attributes.clone();

			attributes.max_age = None;

			raw.push_str(&attributes.render(name, &cookie.value, SystemTime::now()));

			if let Some(expires) = cookie.expires {
				raw.push_str("; Expires=");
				raw.push_str(&httpdate::fmt_http_date(expires));
			}

			raw.push('\n');
		}

		let staging = path.with_extension("tmp");

		fs::write(&staging, raw).await?;
		fs::rename(&staging, path).await?;

		Ok(())
	}
}
#[async_trait]
impl CredentialStore for CookieJar {
	async fn get(&self, name: &str) -> Result<Option<String>> {
		let cookies = self.cookies.read().await;

		Ok(cookies
			.get(name)
			.filter(|cookie| cookie.is_live(SystemTime::now()))
			.map(|cookie| cookie.value.clone()))
	}

	async fn set(&self, name: &str, value: &str) -> Result<()> {
		if name.is_empty() || name.contains(['=', ';']) || value.contains([';', '\n', '\r']) {
			return Err(Error::Credentials(format!(
				"Cookie '{name}' has an invalid name or value."
			)));
		}

		let mut cookies = self.cookies.write().await;
		let expires = self.attributes.max_age.map(|max_age| SystemTime::now() + max_age);

		cookies.insert(name.to_owned(), StoredCookie { value: value.to_owned(), expires });

		self.persist(&cookies).await
	}

	async fn remove(&self, name: &str) -> Result<()> {
		let mut cookies = self.cookies.write().await;

		if cookies.remove(name).is_some() {
			self.persist(&cookies).await?;
		}

		Ok(())
	}
}

/// Session-level view over the cookie jar and an optional legacy fallback store.
///
/// Reads only consult the cookie jar; clearing wipes both so stale tokens cannot resurface.
#[derive(Clone, Debug)]
pub struct CredentialProvider {
	cookies: Arc<dyn CredentialStore>,
	fallback: Option<Arc<dyn CredentialStore>>,
}
impl CredentialProvider {
	/// Provider over a cookie store.
	pub fn new(cookies: Arc<dyn CredentialStore>) -> Self {
		Self { cookies, fallback: None }
	}

	/// In-memory cookie jar with the attributes prescribed for `environment`.
	pub fn for_environment(environment: Environment) -> Self {
		Self::new(Arc::new(CookieJar::in_memory(CookieAttributes::for_environment(environment))))
	}

	/// Attach a legacy store that is cleared together with the cookies.
	pub fn with_fallback(mut self, fallback: Arc<dyn CredentialStore>) -> Self {
		self.fallback = Some(fallback);

		self
	}

	/// Current access token.
	pub async fn access_token(&self) -> Result<Option<String>> {
		Ok(self.cookies.get(ACCESS_TOKEN_NAME).await?.filter(|token| !token.is_empty()))
	}

	/// Current refresh token.
	pub async fn refresh_token(&self) -> Result<Option<String>> {
		Ok(self.cookies.get(REFRESH_TOKEN_NAME).await?.filter(|token| !token.is_empty()))
	}

	/// Current token pair, when an access token exists.
	pub async fn session(&self) -> Result<Option<SessionToken>> {
		let Some(access_token) = self.access_token().await? else {
			return Ok(None);
		};

		Ok(Some(SessionToken { access_token, refresh_token: self.refresh_token().await? }))
	}

	/// `Authorization` header value for the current session.
	pub async fn authorization_header(&self) -> Result<Option<String>> {
		Ok(self.access_token().await?.map(|token| format!("Bearer {token}")))
	}

	/// Persist a token pair, e.g. after login.
	pub async fn store_session(&self, token: &SessionToken) -> Result<()> {
		self.cookies.set(ACCESS_TOKEN_NAME, &token.access_token).await?;

		match &token.refresh_token {
			Some(refresh_token) => self.cookies.set(REFRESH_TOKEN_NAME, refresh_token).await,
			None => self.cookies.remove(REFRESH_TOKEN_NAME).await,
		}
	}

	/// Replace the access token, keeping the refresh token.
	pub async fn set_access_token(&self, token: &str) -> Result<()> {
		self.cookies.set(ACCESS_TOKEN_NAME, token).await
	}

	/// Replace the refresh token.
	pub async fn set_refresh_token(&self, token: &str) -> Result<()> {
		self.cookies.set(REFRESH_TOKEN_NAME, token).await
	}

	/// Remove both tokens from the cookie jar and the fallback store.
	///
	/// Every removal is attempted; the first failure is returned.
	pub async fn clear(&self) -> Result<()> {
		let mut first_error = None;
		let stores = std::iter::once(&self.cookies).chain(self.fallback.as_ref());

		for store in stores {
			for name in [ACCESS_TOKEN_NAME, REFRESH_TOKEN_NAME] {
				if let Err(err) = store.remove(name).await {
					tracing::warn!(error = %err, cookie = name, "failed to remove session token");

					first_error.get_or_insert(err);
				}
			}
		}

		first_error.map_or(Ok(()), Err)
	}
}

fn parse_jar(raw: &str, now: SystemTime) -> BTreeMap<String, StoredCookie> {
	let mut cookies = BTreeMap::new();

	for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
		let mut parts = line.split(';').map(str::trim);
		let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
			continue;
		};
		let expires = parts
			.filter_map(|attribute| attribute.split_once('='))
			.find(|(key, _)| key.eq_ignore_ascii_case("expires"))
			.and_then(|(_, date)| httpdate::parse_http_date(date).ok());
		let cookie = StoredCookie { value: value.to_owned(), expires };

		if cookie.is_live(now) {
			cookies.insert(name.to_owned(), cookie);
		}
	}

	cookies
}
