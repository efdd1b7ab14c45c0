//! Crate-level error types shared by authentication, request execution, and pagination.

// self
use crate::{_prelude::*, context::ContextError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// A credential could not be established, or the server kept rejecting it.
	#[error(transparent)]
	Authentication(#[from] AuthenticationError),
	/// Structured 4xx/5xx response from the known status table.
	#[error(transparent)]
	Http(#[from] HttpStatusError),
	/// Non-OK status outside the known status table.
	#[error(transparent)]
	UnexpectedStatus(#[from] UnexpectedStatusError),
	/// Malformed body, broken pagination envelope, or invalid union-typed field.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// The governing context completed before the operation finished.
	#[error("Operation was cancelled: {0}.")]
	Cancelled(#[from] ContextError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Local configuration or input problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
impl Error {
	/// Returns the HTTP status associated with the error, when one is known.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Authentication(err) => err.status,
			Self::Http(err) => Some(err.kind.status()),
			Self::UnexpectedStatus(err) => Some(err.status),
			_ => None,
		}
	}

	/// Returns the raw response body carried by status errors.
	pub fn body(&self) -> Option<&[u8]> {
		match self {
			Self::Http(err) => Some(&err.body),
			Self::UnexpectedStatus(err) => Some(&err.body),
			_ => None,
		}
	}
}

/// Authentication failure shared verbatim by every caller that joined the same refresh round.
#[derive(Clone, Debug, ThisError)]
#[error("{message}")]
pub struct AuthenticationError {
	/// Human-readable summary.
	pub message: String,
	/// HTTP status that caused the failure, when one is known.
	pub status: Option<u16>,
	/// Underlying cause, shared between waiters.
	#[source]
	pub source: Option<Arc<Error>>,
}
impl AuthenticationError {
	/// Builds an error without an underlying cause.
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into(), status: None, source: None }
	}

	/// Wraps `source` behind a summary message.
	pub fn with_source(message: impl Into<String>, source: Error) -> Self {
		Self { message: message.into(), status: source.status(), source: Some(Arc::new(source)) }
	}
}

/// Named error kinds for the known 4xx/5xx statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusKind {
	/// 400.
	BadRequest,
	/// 401.
	Unauthorized,
	/// 403.
	Forbidden,
	/// 404.
	NotFound,
	/// 405.
	MethodNotAllowed,
	/// 408.
	RequestTimeout,
	/// 409.
	Conflict,
	/// 429.
	TooManyRequests,
	/// 500.
	InternalServerError,
	/// 503.
	ServiceUnavailable,
}
impl StatusKind {
	/// Maps a status code onto the known table.
	pub const fn from_status(status: u16) -> Option<Self> {
		Some(match status {
			400 => Self::BadRequest,
			401 => Self::Unauthorized,
			403 => Self::Forbidden,
			404 => Self::NotFound,
			405 => Self::MethodNotAllowed,
			408 => Self::RequestTimeout,
			409 => Self::Conflict,
			429 => Self::TooManyRequests,
			500 => Self::InternalServerError,
			503 => Self::ServiceUnavailable,
			_ => return None,
		})
	}

	/// Status code this kind represents.
	pub const fn status(self) -> u16 {
		match self {
			Self::BadRequest => 400,
			Self::Unauthorized => 401,
			Self::Forbidden => 403,
			Self::NotFound => 404,
			Self::MethodNotAllowed => 405,
			Self::RequestTimeout => 408,
			Self::Conflict => 409,
			Self::TooManyRequests => 429,
			Self::InternalServerError => 500,
			Self::ServiceUnavailable => 503,
		}
	}

	/// Short description used in error messages.
	pub const fn description(self) -> &'static str {
		match self {
			Self::BadRequest =>
				"Invalid request due to incorrect syntax or missing required parameters",
			Self::Unauthorized => "Authentication failed",
			Self::Forbidden => "Request forbidden",
			Self::NotFound => "Resource not found",
			Self::MethodNotAllowed => "Method not allowed",
			Self::RequestTimeout => "The server timed out waiting for the request",
			Self::Conflict => "Request conflicts with the current resource state",
			Self::TooManyRequests => "Too many requests have been sent in a given amount of time",
			Self::InternalServerError => "Internal server error",
			Self::ServiceUnavailable => "The service is temporarily unable to handle the request",
		}
	}
}
impl Display for StatusKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.description())
	}
}

/// Structured 4xx/5xx failure carrying the raw response body.
#[derive(Clone, Debug, ThisError)]
#[error("{kind} (HTTP {status}) when accessing [{method} {url}].", status = .kind.status())]
pub struct HttpStatusError {
	/// Named kind for the returned status.
	pub kind: StatusKind,
	/// Request method.
	pub method: String,
	/// Request URL.
	pub url: String,
	/// Status codes the caller accepted.
	pub expected: Vec<u16>,
	/// Raw response body.
	pub body: Vec<u8>,
}

/// Non-OK status outside the known table.
#[derive(Clone, Debug, ThisError)]
#[error("Expected HTTP response code {expected:?} when accessing [{method} {url}], but got {status} instead.")]
pub struct UnexpectedStatusError {
	/// Returned status code.
	pub status: u16,
	/// Request method.
	pub method: String,
	/// Request URL.
	pub url: String,
	/// Status codes the caller accepted.
	pub expected: Vec<u16>,
	/// Raw response body.
	pub body: Vec<u8>,
}

/// Decode failures for bodies, envelopes, and union-typed fields.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// JSON could not be decoded into the requested shape.
	#[error("Response body could not be decoded at `{path}`.", path = .source.path())]
	Json {
		/// Structured parsing failure, including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Expected envelope key is absent.
	#[error("Response body is missing the `{key}` key.")]
	MissingKey {
		/// Missing key.
		key: String,
	},
	/// Envelope has the wrong shape for the requested operation.
	#[error("Response envelope is invalid: {reason}.")]
	InvalidEnvelope {
		/// What was wrong with the envelope.
		reason: String,
	},
	/// A pagination cursor pointed back at a page that was already fetched.
	#[error("Pagination cursor revisits an already fetched page: {url}.")]
	PaginationLoop {
		/// Repeated page URL.
		url: String,
	},
}
impl From<serde_path_to_error::Error<serde_json::Error>> for DecodeError {
	fn from(source: serde_path_to_error::Error<serde_json::Error>) -> Self {
		Self::Json { source }
	}
}
impl From<serde_path_to_error::Error<serde_json::Error>> for Error {
	fn from(source: serde_path_to_error::Error<serde_json::Error>) -> Self {
		DecodeError::from(source).into()
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {url}.")]
	Network {
		/// Request URL.
		url: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(url: impl Into<String>, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { url: url.into(), source: Box::new(src) }
	}
}

/// Configuration and input validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] http::Error),
	/// A URL could not be parsed or joined.
	#[error("URL `{url}` is invalid.")]
	InvalidUrl {
		/// Offending input.
		url: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	InvalidBody(#[from] serde_json::Error),
	/// Options struct could not be turned into query parameters or a body.
	#[error("Options could not be built: {reason}.")]
	InvalidOptions {
		/// Why the options were rejected.
		reason: String,
	},
	/// Authentication options are incomplete or contradictory.
	#[error("Authentication options are invalid: {reason}.")]
	InvalidAuthOptions {
		/// Validation rule that failed.
		reason: &'static str,
	},
	/// No catalog endpoint matched the requested service.
	#[error("No suitable endpoint could be found in the service catalog for `{service_type}`.")]
	EndpointNotFound {
		/// Requested service type.
		service_type: String,
	},
	/// Several catalog endpoints matched the requested service.
	#[error("Found {count} endpoints matching `{service_type}`; narrow the region or name.")]
	MultipleEndpoints {
		/// Requested service type.
		service_type: String,
		/// Number of candidate endpoints.
		count: usize,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	pub(crate) fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
		Self::InvalidUrl { url: url.into(), source }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}
