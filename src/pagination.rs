//! Sequential, cancelable traversal of multi-page list responses.
//!
//! A [`Pager`] walks one of three succession styles, selected by the initial [`PageCursor`]:
//!
//! - [`PageCursor::Single`] fetches one page and stops.
//! - [`PageCursor::LinkedNext`] follows the `next` reference found in each body: `links.next`, a
//!   `rel = "next"` entry of any `<name>_links` array, or a top-level `next` string (relative
//!   references resolve against the page URL).
//! - [`PageCursor::Marker`] reissues the original request with an updated `marker` query
//!   parameter, taken from the page by the configured [`MarkerSource`].
//!
//! Pages are fetched strictly one after another. A page is never requested twice within one
//! traversal; a successor URL that was already fetched fails with
//! [`DecodeError::PaginationLoop`]. The first fetch or decode failure ends the traversal.

// std
use std::{collections::HashSet, ops::ControlFlow};
// crates.io
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	client::{ProviderClient, RequestOpts},
	context::{Context, ContextError},
	error::{ConfigError, DecodeError},
	http::HttpTransport,
	obs::{self, OpKind, OpOutcome, OpSpan},
	result,
};

/// Query parameter carrying the marker.
pub const MARKER_PARAM: &str = "marker";
/// Query parameter carrying the page size.
pub const LIMIT_PARAM: &str = "limit";

/// Callback driving [`MarkerSource::Custom`].
pub type MarkerFn = Arc<dyn Fn(&Page) -> Result<Option<String>> + Send + Sync>;

/// Position of a traversal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageCursor {
	/// One page, no successor.
	Single {
		/// Page URL.
		url: String,
	},
	/// Successor URLs are read from each page body.
	LinkedNext {
		/// URL of the page to fetch.
		url: String,
	},
	/// Successors reissue `url` with an updated marker.
	Marker {
		/// Original request URL; other query parameters are preserved.
		url: String,
		/// Marker to send, `None` for the first page.
		marker: Option<String>,
		/// Requested page size, if any.
		limit: Option<usize>,
	},
}
impl PageCursor {
	/// Single-page cursor.
	pub fn single(url: impl Into<String>) -> Self {
		Self::Single { url: url.into() }
	}

	/// Linked-style cursor starting at `url`.
	pub fn linked(url: impl Into<String>) -> Self {
		Self::LinkedNext { url: url.into() }
	}

	/// Marker-style cursor starting at `url`.
	///
	/// When `limit` is `None` an existing `limit` query parameter in `url` is used instead.
	pub fn marker(url: impl Into<String>, limit: Option<usize>) -> Self {
		let url = url.into();
		let limit = limit.or_else(|| {
			Url::parse(&url).ok().and_then(|parsed| {
				parsed
					.query_pairs()
					.find(|(key, _)| key == LIMIT_PARAM)
					.and_then(|(_, value)| value.parse().ok())
			})
		});

		Self::Marker { url, marker: None, limit }
	}

	/// Returns the URL this cursor fetches.
	pub fn fetch_url(&self) -> Result<String> {
		match self {
			Self::Single { url } | Self::LinkedNext { url } => Ok(url.clone()),
			Self::Marker { url, marker, limit } => {
				let mut parsed =
					Url::parse(url).map_err(|source| ConfigError::invalid_url(url.as_str(), source))?;
				let kept = parsed
					.query_pairs()
					.filter(|(key, _)| {
						key != MARKER_PARAM && !(key == LIMIT_PARAM && limit.is_some())
					})
					.map(|(key, value)| (key.into_owned(), value.into_owned()))
					.collect::<Vec<_>>();

				{
					let mut query = parsed.query_pairs_mut();

					query.clear().extend_pairs(kept);

					if let Some(limit) = limit {
						query.append_pair(LIMIT_PARAM, &limit.to_string());
					}
					if let Some(marker) = marker {
						query.append_pair(MARKER_PARAM, marker);
					}
				}

				if parsed.query().is_some_and(str::is_empty) {
					parsed.set_query(None);
				}

				Ok(parsed.into())
			},
		}
	}
}

/// Where marker-style traversals find the next marker.
#[derive(Clone)]
pub enum MarkerSource {
	/// Field of the last item; an empty or short page ends the traversal.
	LastItemField(String),
	/// Top-level body field; its absence ends the traversal, page size is not consulted.
	EnvelopeField(String),
	/// Caller-supplied extraction; `None` ends the traversal.
	Custom(MarkerFn),
}
impl Default for MarkerSource {
	fn default() -> Self {
		Self::LastItemField("id".into())
	}
}
impl Debug for MarkerSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::LastItemField(field) => f.debug_tuple("LastItemField").field(field).finish(),
			Self::EnvelopeField(field) => f.debug_tuple("EnvelopeField").field(field).finish(),
			Self::Custom(_) => f.write_str("Custom(..)"),
		}
	}
}

/// Traversal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageState {
	/// Waiting to fetch the page at the cursor.
	Ready(PageCursor),
	/// A fetch is in progress.
	Fetching,
	/// No more pages.
	Done,
	/// A fetch or decode failed; the error went to the caller that observed it.
	Errored,
}

/// One decoded page.
#[derive(Clone, Debug)]
pub struct Page {
	url: String,
	status: StatusCode,
	headers: HeaderMap,
	body: Vec<u8>,
	value: Value,
	items_key: Option<String>,
	next: Option<PageCursor>,
}
impl Page {
	/// Returns the URL the page was fetched from.
	pub fn url(&self) -> &str {
		&self.url
	}

	/// Returns the response status.
	pub fn status(&self) -> StatusCode {
		self.status
	}

	/// Returns the response headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Returns the raw body.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Returns the parsed body.
	pub fn json(&self) -> &Value {
		&self.value
	}

	/// Returns the page's items.
	pub fn items(&self) -> &[Value] {
		items_of(&self.value, self.items_key.as_deref()).map(Vec::as_slice).unwrap_or_default()
	}

	/// Returns the number of items.
	pub fn len(&self) -> usize {
		self.items().len()
	}

	/// Returns `true` if the page carries no items.
	pub fn is_empty(&self) -> bool {
		self.items().is_empty()
	}

	/// Returns the cursor of the following page, `None` when this page is the last.
	pub fn next_cursor(&self) -> Option<&PageCursor> {
		self.next.as_ref()
	}

	/// Decodes the whole body, optionally descending into `label`.
	pub fn extract_into<T>(&self, label: Option<&str>) -> Result<T>
	where
		T: DeserializeOwned,
	{
		result::extract_value(self.value.clone(), label)
	}

	/// Decodes the items into `T`.
	pub fn extract_items<T>(&self) -> Result<Vec<T>>
	where
		T: DeserializeOwned,
	{
		result::extract_value(Value::Array(self.items().to_vec()), None)
	}
}

/// Every page of a traversal combined into one envelope.
#[derive(Clone, Debug)]
pub struct AllPages {
	value: Value,
	items_key: Option<String>,
	pages: usize,
}
impl AllPages {
	/// Returns the combined envelope: `{<items_key>: [...]}` or a bare array.
	pub fn json(&self) -> &Value {
		&self.value
	}

	/// Returns every item in fetch order.
	pub fn items(&self) -> &[Value] {
		items_of(&self.value, self.items_key.as_deref()).map(Vec::as_slice).unwrap_or_default()
	}

	/// Returns how many pages were fetched.
	pub fn page_count(&self) -> usize {
		self.pages
	}

	/// Decodes the combined envelope, optionally descending into `label`.
	pub fn extract_into<T>(&self, label: Option<&str>) -> Result<T>
	where
		T: DeserializeOwned,
	{
		result::extract_value(self.value.clone(), label)
	}

	/// Decodes every item into `T`.
	pub fn extract_items<T>(&self) -> Result<Vec<T>>
	where
		T: DeserializeOwned,
	{
		result::extract_value(Value::Array(self.items().to_vec()), None)
	}
}

/// Sequential page fetcher.
pub struct Pager<C>
where
	C: ?Sized + HttpTransport,
{
	client: ProviderClient<C>,
	state: PageState,
	items_key: Option<String>,
	marker_source: MarkerSource,
	opts: RequestOpts,
	visited: HashSet<String>,
}
impl<C> Pager<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a pager whose items live under the top-level `items_key`.
	///
	/// An empty key means the body itself is the item array.
	pub fn new(client: ProviderClient<C>, cursor: PageCursor, items_key: impl Into<String>) -> Self {
		let items_key = Some(items_key.into()).filter(|key| !key.is_empty());

		Self {
			client,
			state: PageState::Ready(cursor),
			items_key,
			marker_source: MarkerSource::default(),
			opts: RequestOpts::new().with_ok_codes([200]),
			visited: HashSet::new(),
		}
	}

	/// Selects where marker-style traversals read the next marker.
	pub fn with_marker_source(mut self, source: MarkerSource) -> Self {
		self.marker_source = source;

		self
	}

	/// Replaces the options sent with every page request.
	pub fn with_request_opts(mut self, opts: RequestOpts) -> Self {
		self.opts = opts;

		self
	}

	/// Returns the traversal state.
	pub fn state(&self) -> &PageState {
		&self.state
	}

	/// Fetches the next page, or returns `None` once the traversal is over.
	pub async fn next_page(&mut self, ctx: &Context) -> Result<Option<Page>> {
		let cursor = match std::mem::replace(&mut self.state, PageState::Fetching) {
			PageState::Ready(cursor) => cursor,
			PageState::Fetching => {
				self.state = PageState::Errored;

				return Err(Error::Cancelled(ContextError::Canceled));
			},
			terminal => {
				self.state = terminal;

				return Ok(None);
			},
		};

		match self.fetch(ctx, &cursor).await {
			Ok(page) => {
				self.state = match &page.next {
					Some(next) => PageState::Ready(next.clone()),
					None => PageState::Done,
				};

				Ok(Some(page))
			},
			Err(e) => {
				self.state = PageState::Errored;

				Err(e)
			},
		}
	}

	/// Delivers every page to `f` in order until the traversal ends or `f` breaks.
	///
	/// The successor page is only requested after `f` returns for the current one.
	pub async fn each_page<F>(&mut self, ctx: &Context, mut f: F) -> Result<()>
	where
		F: FnMut(&Page) -> Result<ControlFlow<()>>,
	{
		const KIND: OpKind = OpKind::Paginate;

		let span = OpSpan::new(KIND, "each_page");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				while let Some(page) = self.next_page(ctx).await? {
					if f(&page)?.is_break() {
						self.state = PageState::Done;

						break;
					}
				}

				Ok::<_, Error>(())
			})
			.await;

		obs::record_op_outcome(KIND, OpOutcome::of(&result));

		result
	}

	/// Collects every remaining page into one envelope.
	///
	/// Memory grows with the result set; use it only for bounded listings.
	pub async fn all_pages(&mut self, ctx: &Context) -> Result<AllPages> {
		let mut items = Vec::new();
		let mut pages = 0;

		self.each_page(ctx, |page| {
			items.extend_from_slice(page.items());
			pages += 1;

			Ok(ControlFlow::Continue(()))
		})
		.await?;

		let value = match &self.items_key {
			Some(key) => Value::Object(Map::from_iter([(key.clone(), Value::Array(items))])),
			None => Value::Array(items),
		};

		Ok(AllPages { value, items_key: self.items_key.clone(), pages })
	}

	async fn fetch(&mut self, ctx: &Context, cursor: &PageCursor) -> Result<Page> {
		ctx.check()?;

		let url = cursor.fetch_url()?;

		if !self.visited.insert(url.clone()) {
			return Err(DecodeError::PaginationLoop { url }.into());
		}

		let response = self.client.request(ctx, Method::GET, &url, self.opts.clone()).await?;
		let value = result::extract_into::<Value>(response.body(), None)?;

		items_of(&value, self.items_key.as_deref())?;

		let mut page = Page {
			url,
			status: response.status(),
			headers: response.headers().clone(),
			body: response.into_body(),
			value,
			items_key: self.items_key.clone(),
			next: None,
		};

		page.next = self.successor(cursor, &page)?;

		Ok(page)
	}

	fn successor(&self, cursor: &PageCursor, page: &Page) -> Result<Option<PageCursor>> {
		match cursor {
			PageCursor::Single { .. } => Ok(None),
			PageCursor::LinkedNext { .. } => Ok(next_link(&page.value)
				.map(|next| resolve(&page.url, next))
				.transpose()?
				.map(|url| PageCursor::LinkedNext { url })),
			PageCursor::Marker { url, limit, .. } => {
				let marker = match &self.marker_source {
					MarkerSource::LastItemField(field) => last_item_marker(page, field, *limit)?,
					MarkerSource::EnvelopeField(field) => page
						.value
						.get(field)
						.and_then(marker_text)
						.filter(|marker| !marker.is_empty()),
					MarkerSource::Custom(f) => (**f)(page)?,
				};

				Ok(marker.map(|marker| PageCursor::Marker {
					url: url.clone(),
					marker: Some(marker),
					limit: *limit,
				}))
			},
		}
	}
}
impl<C> Debug for Pager<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Pager")
			.field("state", &self.state)
			.field("items_key", &self.items_key)
			.field("marker_source", &self.marker_source)
			.finish()
	}
}

fn items_of<'a>(value: &'a Value, items_key: Option<&str>) -> Result<&'a Vec<Value>> {
	let items = match items_key {
		None => value,
		Some(key) => value.get(key).ok_or_else(|| DecodeError::MissingKey { key: key.to_owned() })?,
	};

	items.as_array().ok_or_else(|| {
		DecodeError::InvalidEnvelope {
			reason: match items_key {
				Some(key) => format!("`{key}` is not an array"),
				None => "page body is not an array".into(),
			},
		}
		.into()
	})
}

fn last_item_marker(page: &Page, field: &str, limit: Option<usize>) -> Result<Option<String>> {
	let items = page.items();
	let Some(last) = items.last() else {
		return Ok(None);
	};

	if limit.is_some_and(|limit| items.len() < limit) {
		return Ok(None);
	}

	last.get(field)
		.and_then(marker_text)
		.map(Some)
		.ok_or_else(|| DecodeError::MissingKey { key: field.to_owned() }.into())
}

fn marker_text(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

fn next_link(value: &Value) -> Option<&str> {
	if let Some(next) = value.get("links").and_then(|links| links.get("next")).and_then(Value::as_str)
	{
		return Some(next).filter(|next| !next.is_empty());
	}

	let envelope = value.as_object()?;

	for (key, links) in envelope {
		if !key.ends_with("_links") {
			continue;
		}

		let next = links.as_array().into_iter().flatten().find_map(|link| {
			(link.get("rel").and_then(Value::as_str) == Some("next"))
				.then(|| link.get("href").and_then(Value::as_str))
				.flatten()
		});

		if next.is_some() {
			return next.filter(|next| !next.is_empty());
		}
	}

	envelope.get("next").and_then(Value::as_str).filter(|next| !next.is_empty())
}

fn resolve(base: &str, next: &str) -> Result<String> {
	Url::parse(base)
		.and_then(|base| base.join(next))
		.map(String::from)
		.map_err(|source| ConfigError::invalid_url(next, source).into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn marker_urls_replace_existing_parameters() {
		let cursor = PageCursor::Marker {
			url: "https://x/v2/servers?name=web&marker=old&limit=50".into(),
			marker: Some("s-9".into()),
			limit: Some(2),
		};

		assert_eq!(
			cursor.fetch_url().expect("Marker URL should build."),
			"https://x/v2/servers?name=web&limit=2&marker=s-9"
		);

		let cursor = PageCursor::marker("https://x/v2/servers?limit=3", None);

		assert_eq!(
			cursor,
			PageCursor::Marker { url: "https://x/v2/servers?limit=3".into(), marker: None, limit: Some(3) }
		);
		assert_eq!(cursor.fetch_url().expect("First page URL."), "https://x/v2/servers?limit=3");

		let cursor = PageCursor::marker("https://x/v2/servers", None);

		assert_eq!(cursor.fetch_url().expect("Bare URL."), "https://x/v2/servers");
	}

	#[test]
	fn next_links_are_found_in_every_envelope_style() {
		let keystone = serde_json::json!({ "users": [], "links": { "next": "https://x/v3/users?page=2", "self": "" } });
		let neutron = serde_json::json!({
			"networks": [],
			"networks_links": [{ "rel": "previous", "href": "p" }, { "rel": "next", "href": "https://x/n?marker=1" }]
		});
		let glance = serde_json::json!({ "images": [], "next": "/v2/images?marker=i-3" });
		let last = serde_json::json!({ "users": [], "links": { "next": null } });

		assert_eq!(next_link(&keystone), Some("https://x/v3/users?page=2"));
		assert_eq!(next_link(&neutron), Some("https://x/n?marker=1"));
		assert_eq!(next_link(&glance), Some("/v2/images?marker=i-3"));
		assert_eq!(next_link(&last), None);
		assert_eq!(
			resolve("https://img.example.com/v2/images", "/v2/images?marker=i-3")
				.expect("Relative links should resolve."),
			"https://img.example.com/v2/images?marker=i-3"
		);
	}

	#[test]
	fn items_require_an_array_under_the_key() {
		let value = serde_json::json!({ "servers": {} });

		assert!(matches!(
			items_of(&value, Some("servers")),
			Err(Error::Decode(DecodeError::InvalidEnvelope { .. }))
		));
		assert!(matches!(
			items_of(&value, Some("ports")),
			Err(Error::Decode(DecodeError::MissingKey { .. }))
		));
		assert_eq!(items_of(&serde_json::json!([1, 2]), None).map(Vec::len).ok(), Some(2));
	}
}
