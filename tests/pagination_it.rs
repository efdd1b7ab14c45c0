#![cfg(all(feature = "reqwest", feature = "test"))]

// std
use std::ops::ControlFlow;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use openstack_core::{
	_preludet::*,
	client::ClientConfig,
	context::{Context, ContextError},
	error::DecodeError,
	pagination::{MarkerSource, Page, PageCursor, PageState, Pager},
};

const SERVERS: &str = "http://compute.test/v2.1/servers";

fn pager(transport: &Arc<RoutedTransport>, cursor: PageCursor) -> Pager<RoutedTransport> {
	let client = build_routed_test_client(transport.clone(), Arc::new(ScriptedAuthenticator::new()));

	Pager::new(client, cursor, "servers")
}

#[tokio::test]
async fn envelope_markers_continue_past_empty_pages() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(
				format!("{SERVERS}?limit=3"),
				200,
				r#"{"servers":[{"id":"a"},{"id":"b"},{"id":"c"}],"next_marker":"c"}"#,
			)
			.route(format!("{SERVERS}?limit=3&marker=c"), 200, r#"{"servers":[],"next_marker":"m2"}"#)
			.route(format!("{SERVERS}?limit=3&marker=m2"), 200, r#"{"servers":[{"id":"d"},{"id":"e"}]}"#),
	);
	let all = pager(&transport, PageCursor::marker(format!("{SERVERS}?limit=3"), None))
		.with_marker_source(MarkerSource::EnvelopeField("next_marker".into()))
		.all_pages(&Context::background())
		.await
		.expect("Marker traversal should succeed.");
	let ids = all
		.items()
		.iter()
		.map(|item| item["id"].as_str().expect("Item id should be a string."))
		.collect::<Vec<_>>();

	assert_eq!(ids, ["a", "b", "c", "d", "e"]);
	assert_eq!(all.page_count(), 3);
	assert_eq!(all.json()["servers"].as_array().map(Vec::len), Some(5));
	assert_eq!(transport.urls().len(), 3);
}

#[tokio::test]
async fn last_item_markers_stop_on_a_short_page() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(
				format!("{SERVERS}?status=ACTIVE&limit=2"),
				200,
				r#"{"servers":[{"id":"a"},{"id":"b"}]}"#,
			)
			.route(
				format!("{SERVERS}?status=ACTIVE&limit=2&marker=b"),
				200,
				r#"{"servers":[{"id":"c"}]}"#,
			),
	);
	let mut pager = pager(&transport, PageCursor::marker(format!("{SERVERS}?status=ACTIVE"), Some(2)));
	let ctx = Context::background();
	let first = pager.next_page(&ctx).await.expect("First page should load.").expect("Page expected.");

	assert_eq!(first.len(), 2);
	assert!(matches!(pager.state(), PageState::Ready(_)));

	let second = pager.next_page(&ctx).await.expect("Second page should load.").expect("Page expected.");

	assert_eq!(second.len(), 1);
	assert_eq!(pager.state(), &PageState::Done);
	assert!(pager.next_page(&ctx).await.expect("Done pager should not fail.").is_none());
	assert_eq!(transport.urls().len(), 2);
}

#[tokio::test]
async fn breaking_out_of_the_callback_stops_fetching() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(format!("{SERVERS}?limit=1"), 200, r#"{"servers":[{"id":"a"}]}"#)
			.route(format!("{SERVERS}?limit=1&marker=a"), 200, r#"{"servers":[{"id":"b"}]}"#),
	);
	let mut pager = pager(&transport, PageCursor::marker(SERVERS, Some(1)));
	let mut seen = 0;

	pager
		.each_page(&Context::background(), |page| {
			seen += page.len();

			Ok(ControlFlow::Break(()))
		})
		.await
		.expect("Early stop should not be an error.");

	assert_eq!(seen, 1);
	assert_eq!(transport.urls(), [format!("{SERVERS}?limit=1")]);
	assert_eq!(pager.state(), &PageState::Done);
}

#[tokio::test]
async fn failed_fetch_leaves_the_pager_errored() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(format!("{SERVERS}?limit=1"), 200, r#"{"servers":[{"id":"a"}]}"#)
			.route(format!("{SERVERS}?limit=1&marker=a"), 500, "boom"),
	);
	let mut pager = pager(&transport, PageCursor::marker(SERVERS, Some(1)));
	let mut pages = 0;
	let err = pager
		.each_page(&Context::background(), |_| {
			pages += 1;

			Ok(ControlFlow::Continue(()))
		})
		.await
		.expect_err("Server error should end the traversal.");

	assert_eq!(pages, 1);
	assert_eq!(err.status(), Some(500));
	assert_eq!(pager.state(), &PageState::Errored);
	assert!(pager.next_page(&Context::background()).await.expect("Errored pager is over.").is_none());
}

#[tokio::test]
async fn single_cursors_ignore_next_links() {
	let transport = Arc::new(RoutedTransport::new().route(
		SERVERS,
		200,
		r#"{"servers":[{"id":"a"}],"next":"/v2.1/servers?marker=a"}"#,
	));
	let mut pager = pager(&transport, PageCursor::single(SERVERS));
	let all = pager.all_pages(&Context::background()).await.expect("Single page should load.");

	assert_eq!(all.page_count(), 1);
	assert_eq!(all.items().len(), 1);
	assert_eq!(transport.urls(), [SERVERS.to_owned()]);
	assert_eq!(pager.state(), &PageState::Done);
}

#[tokio::test]
async fn custom_marker_sources_drive_the_traversal() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(SERVERS, 200, r#"{"servers":[{"id":"a"}],"cursor":{"after":"z"}}"#)
			.route(format!("{SERVERS}?marker=z"), 200, r#"{"servers":[{"id":"b"}],"cursor":{}}"#),
	);
	let source = MarkerSource::Custom(Arc::new(|page: &Page| -> Result<Option<String>> {
		Ok(page.json()["cursor"]["after"].as_str().map(str::to_owned))
	}));
	let all = pager(&transport, PageCursor::marker(SERVERS, None))
		.with_marker_source(source)
		.all_pages(&Context::background())
		.await
		.expect("Custom markers should be followed.");

	assert_eq!(all.items().len(), 2);
	assert_eq!(transport.urls(), [SERVERS.to_owned(), format!("{SERVERS}?marker=z")]);
}

#[tokio::test]
async fn empty_pages_end_default_marker_traversals() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(SERVERS, 200, r#"{"servers":[{"id":"a"}]}"#)
			.route(format!("{SERVERS}?marker=a"), 200, r#"{"servers":[]}"#),
	);
	let mut pager = pager(&transport, PageCursor::marker(SERVERS, None));
	let all = pager
		.all_pages(&Context::background())
		.await
		.expect("An empty page is a normal end of the listing.");

	assert_eq!(all.items().len(), 1);
	assert_eq!(all.page_count(), 2);
	assert_eq!(pager.state(), &PageState::Done);
}

#[tokio::test]
async fn linked_cursors_that_loop_are_rejected() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(
				"http://image.test/v2/images",
				200,
				r#"{"images":[{"id":"a"}],"next":"/v2/images?marker=a"}"#,
			)
			.route(
				"http://image.test/v2/images?marker=a",
				200,
				r#"{"images":[{"id":"b"}],"next":"/v2/images"}"#,
			),
	);
	let client = build_routed_test_client(transport.clone(), Arc::new(ScriptedAuthenticator::new()));
	let err = Pager::new(client, PageCursor::linked("http://image.test/v2/images"), "images")
		.all_pages(&Context::background())
		.await
		.expect_err("A cursor pointing back must be rejected.");

	assert!(matches!(
		err,
		Error::Decode(DecodeError::PaginationLoop { ref url }) if url == "http://image.test/v2/images"
	));
	assert_eq!(transport.urls().len(), 2);
}

#[tokio::test]
async fn cancelled_contexts_stop_before_the_next_fetch() {
	let transport = Arc::new(
		RoutedTransport::new()
			.route(format!("{SERVERS}?limit=1"), 200, r#"{"servers":[{"id":"a"}]}"#)
			.route(format!("{SERVERS}?limit=1&marker=a"), 200, r#"{"servers":[{"id":"b"}]}"#),
	);
	let (ctx, cancel) = Context::with_cancel(&Context::background());
	let mut pager = pager(&transport, PageCursor::marker(SERVERS, Some(1)));
	let err = pager
		.each_page(&ctx, |_| {
			cancel.cancel();

			Ok(ControlFlow::Continue(()))
		})
		.await
		.expect_err("Cancellation between pages should surface.");

	assert!(matches!(err, Error::Cancelled(ContextError::Canceled)));
	assert_eq!(transport.urls().len(), 1);
	assert_eq!(pager.state(), &PageState::Errored);
}

#[tokio::test]
async fn linked_pages_follow_next_links_over_http() {
	let server = MockServer::start_async().await;
	let first = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2.0/networks");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"networks": [{ "id": "n-1" }],
				"networks_links": [{ "rel": "next", "href": "/v2.0/networks/page-2" }],
			}));
		})
		.await;
	let second = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2.0/networks/page-2");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"networks": [{ "id": "n-2" }],
				"networks_links": [{ "rel": "previous", "href": "/v2.0/networks" }],
			}));
		})
		.await;
	let client =
		build_reqwest_test_client(Arc::new(ScriptedAuthenticator::new()), ClientConfig::default());
	let all = Pager::new(client, PageCursor::linked(server.url("/v2.0/networks")), "networks")
		.all_pages(&Context::background())
		.await
		.expect("Linked traversal should succeed.");

	assert_eq!(all.page_count(), 2);
	assert_eq!(all.json(), &json!({ "networks": [{ "id": "n-1" }, { "id": "n-2" }] }));

	first.assert_calls_async(1).await;
	second.assert_calls_async(1).await;
}
