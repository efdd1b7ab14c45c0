//! Request-execution core for OpenStack-style REST SDKs: single-flight token refresh, one-shot
//! `401` recovery, merged cancellation contexts, and three-style pagination in one crate.
//!
//! Per-service wrappers build on [`client::ServiceClient`] and hand the core opaque query strings
//! and request bodies through [`params`]; they get back raw pages and decode them with
//! [`result`].

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod client;
pub mod context;
pub mod error;
pub mod http;
pub mod obs;
pub mod pagination;
pub mod params;
pub mod result;
pub mod util;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// self
	use crate::{
		auth::{AuthFuture, Authenticator, Credential},
		client::{AUTH_TOKEN_HEADER, ClientConfig, ProviderClient, ReqwestProviderClient},
		context::Context,
		error::AuthenticationError,
		http::{HttpRequest, HttpResponse, HttpTransport, ReqwestHttpClient, TransportFuture},
	};

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs a [`ReqwestProviderClient`] backed by the test transport and `authenticator`.
	pub fn build_reqwest_test_client(
		authenticator: Arc<dyn Authenticator>,
		config: ClientConfig,
	) -> ReqwestProviderClient {
		ReqwestProviderClient::with_http_client(test_reqwest_http_client(), authenticator, config)
	}

	/// Constructs a [`ProviderClient`] answering from `transport`'s route table.
	pub fn build_routed_test_client(
		transport: Arc<RoutedTransport>,
		authenticator: Arc<dyn Authenticator>,
	) -> ProviderClient<RoutedTransport> {
		ProviderClient::with_http_client(transport, authenticator, ClientConfig::default())
	}

	/// Error returned by [`RoutedTransport`] for URLs without a route.
	#[derive(Debug, ThisError)]
	#[error("No route for {0}.")]
	pub struct RouteMissing(pub String);

	/// In-process transport that answers from a fixed route table keyed by full URL and records
	/// every request it sees.
	#[derive(Debug, Default)]
	pub struct RoutedTransport {
		routes: Mutex<HashMap<String, (u16, String)>>,
		seen: Mutex<Vec<(String, Option<String>)>>,
	}
	impl RoutedTransport {
		/// Creates an empty route table.
		pub fn new() -> Self {
			Self::default()
		}

		/// Answers `url` with `status` and `body`.
		pub fn route(self, url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
			self.routes.lock().insert(url.into(), (status, body.into()));

			self
		}

		/// Returns the requested URLs in order.
		pub fn urls(&self) -> Vec<String> {
			self.seen.lock().iter().map(|(url, _)| url.clone()).collect()
		}

		/// Returns the `X-Auth-Token` sent with each request, in order.
		pub fn tokens(&self) -> Vec<Option<String>> {
			self.seen.lock().iter().map(|(_, token)| token.clone()).collect()
		}
	}
	impl HttpTransport for RoutedTransport {
		type TransportError = RouteMissing;

		fn execute(&self, request: HttpRequest) -> TransportFuture<'_, Self::TransportError> {
			let url = request.uri().to_string();
			let token = request
				.headers()
				.get(AUTH_TOKEN_HEADER)
				.and_then(|value| value.to_str().ok())
				.map(str::to_owned);

			self.seen.lock().push((url.clone(), token));

			let route = self.routes.lock().get(&url).cloned();

			Box::pin(async move {
				let (status, body) = route.ok_or(RouteMissing(url))?;
				let mut response = HttpResponse::new(body.into_bytes());

				*response.status_mut() =
					::http::StatusCode::from_u16(status).expect("Route status should be valid.");

				Ok::<_, RouteMissing>(response)
			})
		}
	}

	/// Authenticator that issues `token-1`, `token-2`, ... and counts its network calls.
	#[derive(Debug, Default)]
	pub struct ScriptedAuthenticator {
		calls: AtomicUsize,
		delay: Option<StdDuration>,
		failure: Option<AuthenticationError>,
	}
	impl ScriptedAuthenticator {
		/// Creates an authenticator that succeeds immediately.
		pub fn new() -> Self {
			Self::default()
		}

		/// Sleeps for `delay` inside every call so concurrent callers overlap.
		pub fn with_delay(mut self, delay: StdDuration) -> Self {
			self.delay = Some(delay);

			self
		}

		/// Fails every call with `failure`.
		pub fn failing(mut self, failure: AuthenticationError) -> Self {
			self.failure = Some(failure);

			self
		}

		/// Returns how many authentication calls were made.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl Authenticator for ScriptedAuthenticator {
		fn authenticate<'a>(&'a self, _ctx: &'a Context) -> AuthFuture<'a> {
			Box::pin(async move {
				let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

				if let Some(delay) = self.delay {
					tokio::time::sleep(delay).await;
				}
				if let Some(failure) = &self.failure {
					return Err(Error::from(failure.clone()));
				}

				Ok(Credential::new(format!("token-{n}")))
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use ::http as http_types;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
