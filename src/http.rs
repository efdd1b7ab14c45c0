//! Transport primitives for authenticated API calls.
//!
//! The module exposes [`HttpTransport`], the crate's only dependency on an HTTP stack, plus the
//! reqwest-backed [`ReqwestHttpClient`] used by default. Requests and responses travel as
//! [`http`] types with fully buffered bodies so the executor can inspect status codes and hand
//! raw bodies to error values and page decoders.

// std
use std::ops::Deref;
// self
use crate::{_prelude::*, context::Context, error::TransportError};

/// Buffered outbound request.
pub type HttpRequest = http::Request<Vec<u8>>;
/// Buffered inbound response.
pub type HttpResponse = http::Response<Vec<u8>>;
/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a, E> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, E>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of executing API calls.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by the provider
/// client, every service client derived from it, and the authenticator. The future returned by
/// [`HttpTransport::execute`] must own whatever it needs so it can be raced against a
/// [`Context`] and dropped mid-flight when that context completes.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Sends `request` and buffers the full response.
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_, Self::TransportError>;
}

/// Sends `request` through `client`, aborting promptly once `ctx` completes.
pub(crate) async fn execute_within<C>(
	client: &C,
	ctx: &Context,
	request: HttpRequest,
) -> Result<HttpResponse>
where
	C: ?Sized + HttpTransport,
{
	ctx.check()?;

	let url = request.uri().to_string();

	tokio::select! {
		biased;

		err = ctx.done() => Err(Error::Cancelled(err)),
		response = client.execute(request) =>
			response.map_err(|e| TransportError::network(url, e).into()),
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestHttpClient {
	type TransportError = ReqwestError;

	fn execute(&self, request: HttpRequest) -> TransportFuture<'_, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let response = client.execute(request.try_into()?).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new = HttpResponse::new(response.bytes().await?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok::<_, ReqwestError>(response_new)
		})
	}
}
#[cfg(feature = "reqwest")]
impl Debug for ReqwestHttpClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestHttpClient(..)")
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// self
	use super::*;

	#[derive(Debug, ThisError)]
	#[error("Connection refused.")]
	struct Refused;

	struct Stalled;
	impl HttpTransport for Stalled {
		type TransportError = Refused;

		fn execute(&self, _request: HttpRequest) -> TransportFuture<'_, Self::TransportError> {
			Box::pin(std::future::pending::<Result<HttpResponse, Refused>>())
		}
	}

	struct Failing;
	impl HttpTransport for Failing {
		type TransportError = Refused;

		fn execute(&self, _request: HttpRequest) -> TransportFuture<'_, Self::TransportError> {
			Box::pin(async { Err::<HttpResponse, _>(Refused) })
		}
	}

	fn request() -> HttpRequest {
		http::Request::builder()
			.uri("https://compute.example.com/v2.1/servers")
			.body(Vec::new())
			.expect("Static request should build.")
	}

	#[tokio::test]
	async fn cancellation_aborts_in_flight_calls() {
		let (ctx, _cancel) =
			Context::with_timeout(&Context::background(), StdDuration::from_millis(10));
		let err = execute_within(&Stalled, &ctx, request())
			.await
			.expect_err("Stalled transport must be abandoned when the context completes.");

		assert!(matches!(err, Error::Cancelled(crate::context::ContextError::DeadlineExceeded)));
	}

	#[tokio::test]
	async fn transport_failures_carry_the_url() {
		let err = execute_within(&Failing, &Context::background(), request())
			.await
			.expect_err("Failing transport should surface an error.");

		match err {
			Error::Transport(TransportError::Network { url, .. }) =>
				assert_eq!(url, "https://compute.example.com/v2.1/servers"),
			other => panic!("Unexpected error variant: {other:?}."),
		}
	}
}
