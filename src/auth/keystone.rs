//! Identity v3 password/token authentication.
//!
//! [`AuthOptions`] validates the credential combination the identity service accepts and renders
//! the `{"auth": {...}}` request body. [`KeystoneAuthenticator`] posts it to
//! `<identity>/auth/tokens` and turns the response into a [`Credential`]: the token travels in
//! the `X-Subject-Token` header while the expiry and service catalog live in the `token` body
//! envelope.

// crates.io
use http::{
	Method,
	header::{ACCEPT, CONTENT_TYPE, USER_AGENT},
};
use serde_json::{Map, Value, json};
// self
use crate::{
	_prelude::*,
	auth::{AuthFuture, Authenticator, Credential, ServiceCatalog},
	client::{self, DEFAULT_USER_AGENT, JSON_MEDIA_TYPE},
	context::Context,
	error::{ConfigError, DecodeError},
	http::{HttpTransport, execute_within},
	params::BodyBuilder,
	result,
	util::normalize_url,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Credentials and scope for an identity v3 token request.
///
/// Password authentication needs either a user id, or a user name plus exactly one of domain id
/// and domain name. Token authentication needs a token id and no user or domain fields. Empty
/// strings count as unset.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
	/// Identity service base URL, e.g. `https://keystone.example.com:5000/v3`.
	pub identity_endpoint: String,
	/// User name (requires a user domain).
	pub username: Option<String>,
	/// User id.
	pub user_id: Option<String>,
	/// Password for the password method.
	pub password: Option<String>,
	/// User domain id.
	pub domain_id: Option<String>,
	/// User domain name.
	pub domain_name: Option<String>,
	/// Existing token for the token method.
	pub token_id: Option<String>,
	/// Optional project or domain scope.
	pub scope: Option<AuthScope>,
}
impl AuthOptions {
	/// Creates options for `identity_endpoint` with no credentials.
	pub fn new(identity_endpoint: impl Into<String>) -> Self {
		Self { identity_endpoint: identity_endpoint.into(), ..Default::default() }
	}

	/// Authenticates as `user_id` with `password`.
	pub fn with_user_id(mut self, user_id: impl Into<String>, password: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self.password = Some(password.into());

		self
	}

	/// Authenticates as `username` in the domain named `domain_name` with `password`.
	pub fn with_username(
		mut self,
		username: impl Into<String>,
		domain_name: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		self.username = Some(username.into());
		self.domain_name = Some(domain_name.into());
		self.password = Some(password.into());

		self
	}

	/// Authenticates with an existing token.
	pub fn with_token(mut self, token_id: impl Into<String>) -> Self {
		self.token_id = Some(token_id.into());

		self
	}

	/// Requests a scoped token.
	pub fn with_scope(mut self, scope: AuthScope) -> Self {
		self.scope = Some(scope);

		self
	}

	fn identity(&self) -> Result<Value> {
		let username = set(&self.username);
		let user_id = set(&self.user_id);
		let domain_id = set(&self.domain_id);
		let domain_name = set(&self.domain_name);

		let Some(password) = set(&self.password) else {
			let Some(token_id) = set(&self.token_id) else {
				return Err(invalid("a password or a token id is required"));
			};

			if username.is_some() {
				return Err(invalid("a username cannot be combined with token authentication"));
			}
			if user_id.is_some() {
				return Err(invalid("a user id cannot be combined with token authentication"));
			}
			if domain_id.is_some() {
				return Err(invalid("a domain id cannot be combined with token authentication"));
			}
			if domain_name.is_some() {
				return Err(invalid("a domain name cannot be combined with token authentication"));
			}

			return Ok(json!({ "methods": ["token"], "token": { "id": token_id } }));
		};
		let user = match (username, user_id) {
			(Some(name), None) => {
				let domain = match (domain_id, domain_name) {
					(Some(id), None) => json!({ "id": id }),
					(None, Some(name)) => json!({ "name": name }),
					_ => return Err(invalid("exactly one of domain id and domain name is required")),
				};

				json!({ "name": name, "password": password, "domain": domain })
			},
			(None, Some(id)) => {
				if domain_id.is_some() {
					return Err(invalid("a domain id cannot be combined with a user id"));
				}
				if domain_name.is_some() {
					return Err(invalid("a domain name cannot be combined with a user id"));
				}

				json!({ "id": id, "password": password })
			},
			_ => return Err(invalid("exactly one of username and user id is required")),
		};

		Ok(json!({ "methods": ["password"], "password": { "user": user } }))
	}
}
impl BodyBuilder for AuthOptions {
	fn to_body(&self) -> Result<Map<String, Value>> {
		let mut auth = Map::from_iter([("identity".to_owned(), self.identity()?)]);

		if let Some(scope) = &self.scope {
			auth.insert("scope".into(), scope.to_value()?);
		}

		Ok(Map::from_iter([("auth".to_owned(), Value::Object(auth))]))
	}
}
impl Debug for AuthOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthOptions")
			.field("identity_endpoint", &self.identity_endpoint)
			.field("username", &self.username)
			.field("user_id", &self.user_id)
			.field("password_set", &self.password.is_some())
			.field("domain_id", &self.domain_id)
			.field("domain_name", &self.domain_name)
			.field("token_set", &self.token_id.is_some())
			.field("scope", &self.scope)
			.finish()
	}
}

/// Project or domain scope for a token request.
///
/// Valid combinations: project name plus exactly one of domain id and domain name, a project id
/// alone, or a domain id alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthScope {
	/// Project id.
	pub project_id: Option<String>,
	/// Project name (requires a domain).
	pub project_name: Option<String>,
	/// Domain id.
	pub domain_id: Option<String>,
	/// Domain name.
	pub domain_name: Option<String>,
}
impl AuthScope {
	/// Scopes to a project by id.
	pub fn project_id(id: impl Into<String>) -> Self {
		Self { project_id: Some(id.into()), ..Default::default() }
	}

	/// Scopes to a project by name within the domain named `domain_name`.
	pub fn project_name(name: impl Into<String>, domain_name: impl Into<String>) -> Self {
		Self {
			project_name: Some(name.into()),
			domain_name: Some(domain_name.into()),
			..Default::default()
		}
	}

	/// Scopes to a domain by id.
	pub fn domain_id(id: impl Into<String>) -> Self {
		Self { domain_id: Some(id.into()), ..Default::default() }
	}

	fn to_value(&self) -> Result<Value> {
		let project_id = set(&self.project_id);
		let domain_id = set(&self.domain_id);
		let domain_name = set(&self.domain_name);

		if let Some(name) = set(&self.project_name) {
			if project_id.is_some() {
				return Err(invalid("a scope takes a project id or a project name, not both"));
			}

			let domain = match (domain_id, domain_name) {
				(Some(id), None) => json!({ "id": id }),
				(None, Some(name)) => json!({ "name": name }),
				_ =>
					return Err(invalid(
						"a project name scope needs exactly one of domain id and domain name",
					)),
			};

			return Ok(json!({ "project": { "name": name, "domain": domain } }));
		}
		if let Some(id) = project_id {
			if domain_id.is_some() || domain_name.is_some() {
				return Err(invalid("a project id scope cannot carry a domain"));
			}

			return Ok(json!({ "project": { "id": id } }));
		}
		if let Some(id) = domain_id {
			if domain_name.is_some() {
				return Err(invalid("a scope takes a domain id or a domain name, not both"));
			}

			return Ok(json!({ "domain": { "id": id } }));
		}
		if domain_name.is_some() {
			return Err(invalid("a domain name scope must be paired with a project name"));
		}

		Err(invalid("a scope must name a project or a domain"))
	}
}

/// Identity v3 authenticator that reuses the caller's transport.
pub struct KeystoneAuthenticator<C>
where
	C: ?Sized + HttpTransport,
{
	http_client: Arc<C>,
	options: AuthOptions,
	tokens_url: Url,
	user_agent: String,
}
impl<C> KeystoneAuthenticator<C>
where
	C: ?Sized + HttpTransport,
{
	/// Validates `options` and prepares the token endpoint.
	pub fn with_http_client(http_client: impl Into<Arc<C>>, options: AuthOptions) -> Result<Self> {
		options.to_body()?;

		let base = normalize_url(&options.identity_endpoint);
		let tokens_url = Url::parse(&base)
			.and_then(|base| base.join("auth/tokens"))
			.map_err(|source| ConfigError::invalid_url(base, source))?;

		Ok(Self {
			http_client: http_client.into(),
			options,
			tokens_url,
			user_agent: DEFAULT_USER_AGENT.into(),
		})
	}

	/// Overrides the `User-Agent` sent to the identity service.
	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = user_agent.into();

		self
	}

	/// Returns the token endpoint.
	pub fn tokens_url(&self) -> &Url {
		&self.tokens_url
	}

	async fn issue(&self, ctx: &Context) -> Result<Credential> {
		let body = serde_json::to_vec(&self.options.to_body()?).map_err(ConfigError::from)?;
		let request = http::Request::builder()
			.method(Method::POST)
			.uri(self.tokens_url.as_str())
			.header(ACCEPT, JSON_MEDIA_TYPE)
			.header(CONTENT_TYPE, JSON_MEDIA_TYPE)
			.header(USER_AGENT, self.user_agent.as_str())
			.body(body)
			.map_err(ConfigError::from)?;
		let response = execute_within(self.http_client.as_ref(), ctx, request).await?;
		let response = client::check_status(
			&Method::POST,
			self.tokens_url.as_str(),
			response,
			&client::DEFAULT_OK_CODES,
		)?;
		let token = response
			.headers()
			.get(SUBJECT_TOKEN_HEADER)
			.and_then(|value| value.to_str().ok())
			.filter(|value| !value.is_empty())
			.ok_or_else(|| DecodeError::MissingKey { key: SUBJECT_TOKEN_HEADER.into() })?
			.to_owned();
		let issued = result::extract_into::<IssuedToken>(response.body(), Some("token"))?;
		let mut credential = Credential::new(token).with_catalog(issued.catalog);

		if let Some(expires_at) = issued.expires_at {
			credential = credential.with_expires_at(expires_at);
		}

		Ok(credential)
	}
}
#[cfg(feature = "reqwest")]
impl KeystoneAuthenticator<ReqwestHttpClient> {
	/// Creates an authenticator with its own reqwest transport.
	pub fn new(options: AuthOptions) -> Result<Self> {
		Self::with_http_client(ReqwestHttpClient::default(), options)
	}
}
impl<C> Authenticator for KeystoneAuthenticator<C>
where
	C: ?Sized + HttpTransport,
{
	fn authenticate<'a>(&'a self, ctx: &'a Context) -> AuthFuture<'a> {
		Box::pin(self.issue(ctx))
	}
}
impl<C> Debug for KeystoneAuthenticator<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeystoneAuthenticator")
			.field("tokens_url", &self.tokens_url.as_str())
			.field("options", &self.options)
			.finish()
	}
}

#[derive(Deserialize)]
struct IssuedToken {
	#[serde(default, with = "time::serde::rfc3339::option")]
	expires_at: Option<OffsetDateTime>,
	#[serde(default)]
	catalog: ServiceCatalog,
}

fn set(value: &Option<String>) -> Option<&str> {
	value.as_deref().filter(|value| !value.is_empty())
}

fn invalid(reason: &'static str) -> Error {
	ConfigError::InvalidAuthOptions { reason }.into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn body(options: &AuthOptions) -> Value {
		Value::Object(options.to_body().expect("Options should produce a body."))
	}

	fn reason(options: &AuthOptions) -> &'static str {
		match options.to_body() {
			Err(Error::Config(ConfigError::InvalidAuthOptions { reason })) => reason,
			other => panic!("Expected invalid options, got {other:?}."),
		}
	}

	#[test]
	fn password_bodies_follow_the_user_form() {
		let options = AuthOptions::new("https://id.example.com/v3").with_user_id("u-1", "pw");

		assert_eq!(
			body(&options),
			json!({ "auth": { "identity": {
				"methods": ["password"],
				"password": { "user": { "id": "u-1", "password": "pw" } }
			} } })
		);

		let options = AuthOptions::new("https://id.example.com/v3")
			.with_username("alice", "Default", "pw")
			.with_scope(AuthScope::project_name("demo", "Default"));

		assert_eq!(
			body(&options),
			json!({ "auth": {
				"identity": {
					"methods": ["password"],
					"password": { "user": { "name": "alice", "password": "pw", "domain": { "name": "Default" } } }
				},
				"scope": { "project": { "name": "demo", "domain": { "name": "Default" } } }
			} })
		);
	}

	#[test]
	fn token_bodies_reject_user_fields() {
		let options = AuthOptions::new("https://id.example.com/v3").with_token("t-1");

		assert_eq!(
			body(&options),
			json!({ "auth": { "identity": { "methods": ["token"], "token": { "id": "t-1" } } } })
		);

		let mut options = options;

		options.username = Some("alice".into());

		assert_eq!(reason(&options), "a username cannot be combined with token authentication");
	}

	#[test]
	fn invalid_combinations_are_rejected() {
		let base = AuthOptions::new("https://id.example.com/v3");

		assert_eq!(reason(&base), "a password or a token id is required");

		let mut options = base.clone().with_user_id("u-1", "pw");

		options.domain_name = Some("Default".into());

		assert_eq!(reason(&options), "a domain name cannot be combined with a user id");

		let mut options = base.clone().with_username("alice", "Default", "pw");

		options.domain_id = Some("default".into());

		assert_eq!(reason(&options), "exactly one of domain id and domain name is required");

		let options = base.clone().with_user_id("u-1", "pw").with_scope(AuthScope {
			project_id: Some("p-1".into()),
			domain_id: Some("d-1".into()),
			..Default::default()
		});

		assert_eq!(reason(&options), "a project id scope cannot carry a domain");

		let options = base.with_user_id("u-1", "pw").with_scope(AuthScope::default());

		assert_eq!(reason(&options), "a scope must name a project or a domain");
	}

	#[test]
	fn debug_output_hides_secrets() {
		let options = AuthOptions::new("https://id.example.com/v3").with_user_id("u-1", "hunter2");

		assert!(!format!("{options:?}").contains("hunter2"));
	}

	#[test]
	fn tokens_url_is_joined_under_the_identity_root() {
		struct Unused;
		impl HttpTransport for Unused {
			type TransportError = std::io::Error;

			fn execute(
				&self,
				_request: crate::http::HttpRequest,
			) -> crate::http::TransportFuture<'_, Self::TransportError> {
				Box::pin(std::future::pending::<Result<crate::http::HttpResponse, std::io::Error>>())
			}
		}

		let authenticator = KeystoneAuthenticator::<Unused>::with_http_client(
			Unused,
			AuthOptions::new("https://id.example.com:5000/v3").with_token("t-1"),
		)
		.expect("Token options should be accepted.");

		assert_eq!(authenticator.tokens_url().as_str(), "https://id.example.com:5000/v3/auth/tokens");
	}
}
