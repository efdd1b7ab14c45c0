//! Authenticated request execution.
//!
//! [`ProviderClient`] owns the transport, the shared [`TokenAuthority`], and the client
//! configuration. Every call goes through [`ProviderClient::request`], which scopes the caller's
//! context with the client context and the configured timeout, attaches the current token, and
//! recovers from exactly one `401` by forcing a refresh and resending. [`ServiceClient`] binds a
//! provider client to one service endpoint and adds verb helpers and pager constructors.

// std
use std::time::Duration as StdDuration;
// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{ACCEPT, CONTENT_TYPE, USER_AGENT},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{
		AuthOptions, Authenticator, Credential, EndpointOpts, KeystoneAuthenticator, TokenAuthority,
	},
	context::{self, CancelHandle, Context},
	error::{
		AuthenticationError, ConfigError, HttpStatusError, StatusKind, UnexpectedStatusError,
	},
	http::{HttpRequest, HttpResponse, HttpTransport, execute_within},
	obs::{self, OpKind, OpOutcome, OpSpan},
	pagination::{PageCursor, Pager},
	params::{BodyBuilder, QueryBuilder},
	result,
	util::normalize_url,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Status codes accepted when a request does not override them.
pub const DEFAULT_OK_CODES: [u16; 4] = [200, 201, 202, 204];
/// `User-Agent` sent after any configured prefixes.
pub const DEFAULT_USER_AGENT: &str = concat!("openstack-core/", env!("CARGO_PKG_VERSION"));
/// Media type used for request and response bodies.
pub const JSON_MEDIA_TYPE: &str = "application/json";
/// Header carrying the identity token on API calls.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[cfg(feature = "reqwest")]
/// Provider client specialized for the crate's default reqwest transport.
pub type ReqwestProviderClient = ProviderClient<ReqwestHttpClient>;

/// Client-wide settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Product tokens placed in front of the default `User-Agent`, in order.
	pub user_agent_prefixes: Vec<String>,
	/// Upper bound for one logical request, including its reauthentication retry.
	pub request_timeout: Option<StdDuration>,
	/// Credentials expiring within this window are refreshed before use.
	pub expiry_leeway: StdDuration,
}
impl ClientConfig {
	/// Prepends a product token to the `User-Agent`.
	pub fn with_user_agent_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.user_agent_prefixes.push(prefix.into());

		self
	}

	/// Bounds every request by `timeout`.
	pub fn with_request_timeout(mut self, timeout: StdDuration) -> Self {
		self.request_timeout = Some(timeout);

		self
	}

	/// Refreshes credentials `leeway` before their reported expiry.
	pub fn with_expiry_leeway(mut self, leeway: StdDuration) -> Self {
		self.expiry_leeway = leeway;

		self
	}

	/// Renders the full `User-Agent` value.
	pub fn user_agent(&self) -> String {
		self.user_agent_prefixes
			.iter()
			.map(String::as_str)
			.chain([DEFAULT_USER_AGENT])
			.collect::<Vec<_>>()
			.join(" ")
	}

	fn leeway(&self) -> Duration {
		Duration::saturating_seconds_f64(self.expiry_leeway.as_secs_f64())
	}
}

/// Per-request options.
#[derive(Clone, Debug, Default)]
pub struct RequestOpts {
	/// JSON body to send.
	pub json: Option<Value>,
	/// Accepted status codes; [`DEFAULT_OK_CODES`] when absent.
	pub ok_codes: Option<Vec<u16>>,
	/// Extra headers, applied after the standard ones.
	pub headers: HeaderMap,
}
impl RequestOpts {
	/// Creates empty options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sends `json` as the request body.
	pub fn with_json(mut self, json: Value) -> Self {
		self.json = Some(json);

		self
	}

	/// Sends the body produced by `builder`.
	pub fn with_body(self, builder: &(impl ?Sized + BodyBuilder)) -> Result<Self> {
		Ok(self.with_json(Value::Object(builder.to_body()?)))
	}

	/// Accepts exactly `codes`.
	pub fn with_ok_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
		self.ok_codes = Some(codes.into());

		self
	}

	/// Adds a header.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.append(name, value);

		self
	}

	fn ok_codes(&self) -> &[u16] {
		self.ok_codes.as_deref().unwrap_or(&DEFAULT_OK_CODES)
	}
}

/// Buffered response of an accepted request.
#[derive(Clone, Debug)]
pub struct Response {
	status: StatusCode,
	headers: HeaderMap,
	body: Vec<u8>,
}
impl Response {
	/// Returns the status code.
	pub fn status(&self) -> StatusCode {
		self.status
	}

	/// Returns the response headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Returns a header as text, if present and valid.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).and_then(|value| value.to_str().ok())
	}

	/// Returns the raw body.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Consumes the response, returning the raw body.
	pub fn into_body(self) -> Vec<u8> {
		self.body
	}

	/// Decodes the body, optionally descending into `label`.
	pub fn extract_into<T>(&self, label: Option<&str>) -> Result<T>
	where
		T: DeserializeOwned,
	{
		result::extract_into(&self.body, label)
	}
}
impl From<HttpResponse> for Response {
	fn from(response: HttpResponse) -> Self {
		let (parts, body) = response.into_parts();

		Self { status: parts.status, headers: parts.headers, body }
	}
}

/// Authenticated client shared by every service client of one cloud.
pub struct ProviderClient<C>
where
	C: ?Sized + HttpTransport,
{
	http_client: Arc<C>,
	authority: Arc<TokenAuthority>,
	config: Arc<ClientConfig>,
	context: Context,
}
impl<C> ProviderClient<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a client around an existing transport and authenticator.
	pub fn with_http_client(
		http_client: impl Into<Arc<C>>,
		authenticator: Arc<dyn Authenticator>,
		config: ClientConfig,
	) -> Self {
		let authority =
			Arc::new(TokenAuthority::new(authenticator).with_expiry_leeway(config.leeway()));

		Self::with_authority(http_client, authority, config)
	}

	/// Creates a client sharing an existing authority.
	pub fn with_authority(
		http_client: impl Into<Arc<C>>,
		authority: Arc<TokenAuthority>,
		config: ClientConfig,
	) -> Self {
		Self {
			http_client: http_client.into(),
			authority,
			config: Arc::new(config),
			context: Context::background(),
		}
	}

	/// Creates a client that authenticates against an identity v3 service with `options`,
	/// sharing one transport between identity and API calls.
	pub fn keystone(
		http_client: impl Into<Arc<C>>,
		options: AuthOptions,
		config: ClientConfig,
	) -> Result<Self> {
		let http_client = http_client.into();
		let authenticator =
			KeystoneAuthenticator::<C>::with_http_client(http_client.clone(), options)?
				.with_user_agent(config.user_agent());

		Ok(Self::with_http_client(http_client, Arc::new(authenticator), config))
	}

	/// Installs a client-scope context; every request ends when it or the caller's context ends.
	pub fn with_context(mut self, ctx: Context) -> Self {
		self.context = ctx;

		self
	}

	/// Returns the token authority.
	pub fn authority(&self) -> &Arc<TokenAuthority> {
		&self.authority
	}

	/// Returns the configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Authenticates now instead of on the first request.
	pub async fn authenticate(&self, ctx: &Context) -> Result<Arc<Credential>> {
		let scope = self.scope(ctx);

		self.authority.ensure_valid(&scope.ctx).await
	}

	/// Resolves `opts` in the current credential's catalog and binds a service client to it.
	pub async fn service_client(
		&self,
		ctx: &Context,
		opts: &EndpointOpts,
	) -> Result<ServiceClient<C>> {
		let endpoint = self.authenticate(ctx).await?.endpoint(opts)?;

		Ok(ServiceClient::new(self.clone(), endpoint))
	}

	/// Sends one authenticated request.
	///
	/// A `401` triggers exactly one forced refresh and resend; a second `401` is returned as
	/// [`Error::Authentication`]. Any other status outside the accepted set becomes
	/// [`Error::Http`] or [`Error::UnexpectedStatus`] carrying the raw body.
	pub async fn request(
		&self,
		ctx: &Context,
		method: Method,
		url: &str,
		opts: RequestOpts,
	) -> Result<Response> {
		const KIND: OpKind = OpKind::Request;

		let span = OpSpan::new(KIND, "request");

		span.record_target(url);
		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.execute(ctx, &method, url, &opts, &span)).await;

		span.record_status(&result, |response| response.status().as_u16());

		obs::record_op_outcome(KIND, OpOutcome::of(&result));

		result
	}

	async fn execute(
		&self,
		ctx: &Context,
		method: &Method,
		url: &str,
		opts: &RequestOpts,
		span: &OpSpan,
	) -> Result<Response> {
		let scope = self.scope(ctx);
		let body =
			opts.json.as_ref().map(serde_json::to_vec).transpose().map_err(ConfigError::from)?;
		let credential = self.authority.ensure_valid(&scope.ctx).await?;
		let response = self.send(&scope.ctx, method, url, opts, body.clone(), &credential).await?;

		if response.status() != StatusCode::UNAUTHORIZED {
			return check_status(method, url, response, opts.ok_codes()).map(Response::from);
		}

		span.event("token rejected, reauthenticating");

		let credential = self.authority.reauthenticate(&scope.ctx, &credential).await?;
		let response = self.send(&scope.ctx, method, url, opts, body, &credential).await?;

		if response.status() == StatusCode::UNAUTHORIZED {
			let rejected = check_status(method, url, response, &[])
				.err()
				.unwrap_or_else(|| unauthorized(method, url));

			return Err(AuthenticationError::with_source(
				"Request was rejected again after reauthentication",
				rejected,
			)
			.into());
		}

		check_status(method, url, response, opts.ok_codes()).map(Response::from)
	}

	fn scope(&self, ctx: &Context) -> RequestScope {
		let (merged, release) = context::merge(ctx, &self.context);
		let mut handles = vec![release];
		let ctx = match self.config.request_timeout {
			Some(timeout) => {
				let (deadline, cancel) = Context::with_timeout(&Context::background(), timeout);
				let (scoped, release) = context::merge(&merged, &deadline);

				handles.push(cancel);
				handles.push(release);

				scoped
			},
			None => merged,
		};

		RequestScope { ctx, _handles: handles }
	}

	async fn send(
		&self,
		ctx: &Context,
		method: &Method,
		url: &str,
		opts: &RequestOpts,
		body: Option<Vec<u8>>,
		credential: &Credential,
	) -> Result<HttpResponse> {
		let request = self.build_request(method, url, opts, body, credential)?;

		execute_within(self.http_client.as_ref(), ctx, request).await
	}

	fn build_request(
		&self,
		method: &Method,
		url: &str,
		opts: &RequestOpts,
		body: Option<Vec<u8>>,
		credential: &Credential,
	) -> Result<HttpRequest> {
		let mut builder = http::Request::builder()
			.method(method.clone())
			.uri(url)
			.header(ACCEPT, JSON_MEDIA_TYPE)
			.header(USER_AGENT, self.config.user_agent())
			.header(AUTH_TOKEN_HEADER, credential.token().expose());

		if body.is_some() {
			builder = builder.header(CONTENT_TYPE, JSON_MEDIA_TYPE);
		}
		if let Some(headers) = builder.headers_mut() {
			for (name, value) in &opts.headers {
				headers.insert(name, value.clone());
			}
		}

		builder.body(body.unwrap_or_default()).map_err(|e| ConfigError::from(e).into())
	}
}
#[cfg(feature = "reqwest")]
impl ProviderClient<ReqwestHttpClient> {
	/// Creates a client with its own reqwest transport.
	pub fn new(authenticator: Arc<dyn Authenticator>, config: ClientConfig) -> Self {
		Self::with_http_client(ReqwestHttpClient::default(), authenticator, config)
	}
}
impl<C> Clone for ProviderClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self {
			http_client: self.http_client.clone(),
			authority: self.authority.clone(),
			config: self.config.clone(),
			context: self.context.clone(),
		}
	}
}
impl<C> Debug for ProviderClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderClient")
			.field("authority", &self.authority)
			.field("config", &self.config)
			.finish()
	}
}

/// Provider client bound to one service endpoint.
pub struct ServiceClient<C>
where
	C: ?Sized + HttpTransport,
{
	provider: ProviderClient<C>,
	endpoint: Url,
}
impl<C> ServiceClient<C>
where
	C: ?Sized + HttpTransport,
{
	/// Binds `provider` to `endpoint`; a trailing slash is added when missing.
	pub fn new(provider: ProviderClient<C>, endpoint: Url) -> Self {
		let endpoint = if endpoint.path().ends_with('/') {
			endpoint
		} else {
			let normalized = normalize_url(endpoint.as_str());

			Url::parse(&normalized).unwrap_or(endpoint)
		};

		Self { provider, endpoint }
	}

	/// Returns the provider client.
	pub fn provider(&self) -> &ProviderClient<C> {
		&self.provider
	}

	/// Returns the endpoint base URL.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	/// Joins `parts` under the endpoint.
	pub fn service_url(&self, parts: &[&str]) -> String {
		format!("{}{}", self.endpoint, parts.join("/"))
	}

	/// Joins `parts` under the endpoint and appends the query built by `query`.
	pub fn service_url_with_query(
		&self,
		parts: &[&str],
		query: &(impl ?Sized + QueryBuilder),
	) -> Result<String> {
		Ok(format!("{}{}", self.service_url(parts), query.to_query()?))
	}

	/// Sends a request through the provider client.
	pub async fn request(
		&self,
		ctx: &Context,
		method: Method,
		url: &str,
		opts: RequestOpts,
	) -> Result<Response> {
		self.provider.request(ctx, method, url, opts).await
	}

	/// Sends a `GET`.
	pub async fn get(&self, ctx: &Context, url: &str, opts: RequestOpts) -> Result<Response> {
		self.request(ctx, Method::GET, url, opts).await
	}

	/// Sends a `POST`.
	pub async fn post(&self, ctx: &Context, url: &str, opts: RequestOpts) -> Result<Response> {
		self.request(ctx, Method::POST, url, opts).await
	}

	/// Sends a `PUT`.
	pub async fn put(&self, ctx: &Context, url: &str, opts: RequestOpts) -> Result<Response> {
		self.request(ctx, Method::PUT, url, opts).await
	}

	/// Sends a `PATCH`.
	pub async fn patch(&self, ctx: &Context, url: &str, opts: RequestOpts) -> Result<Response> {
		self.request(ctx, Method::PATCH, url, opts).await
	}

	/// Sends a `DELETE`.
	pub async fn delete(&self, ctx: &Context, url: &str, opts: RequestOpts) -> Result<Response> {
		self.request(ctx, Method::DELETE, url, opts).await
	}

	/// Creates a pager starting at `cursor` whose items live under `items_key`.
	pub fn pager(&self, cursor: PageCursor, items_key: impl Into<String>) -> Pager<C> {
		Pager::new(self.provider.clone(), cursor, items_key)
	}
}
impl<C> Clone for ServiceClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self { provider: self.provider.clone(), endpoint: self.endpoint.clone() }
	}
}
impl<C> Debug for ServiceClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceClient").field("endpoint", &self.endpoint.as_str()).finish()
	}
}

/// Accepts `response` if its status is in `ok_codes`, otherwise maps it to a status error.
pub fn check_status(
	method: &Method,
	url: &str,
	response: HttpResponse,
	ok_codes: &[u16],
) -> Result<HttpResponse> {
	let status = response.status().as_u16();

	if ok_codes.contains(&status) {
		return Ok(response);
	}

	let body = response.into_body();
	let method = method.to_string();
	let url = url.to_owned();
	let expected = ok_codes.to_vec();

	Err(match StatusKind::from_status(status) {
		Some(kind) => HttpStatusError { kind, method, url, expected, body }.into(),
		None => UnexpectedStatusError { status, method, url, expected, body }.into(),
	})
}

fn unauthorized(method: &Method, url: &str) -> Error {
	HttpStatusError {
		kind: StatusKind::Unauthorized,
		method: method.to_string(),
		url: url.to_owned(),
		expected: Vec::new(),
		body: Vec::new(),
	}
	.into()
}

struct RequestScope {
	ctx: Context,
	_handles: Vec<CancelHandle>,
}
