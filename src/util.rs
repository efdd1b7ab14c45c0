//! Small helpers shared by service wrappers.

// std
use std::time::Duration as StdDuration;
// self
use crate::{_prelude::*, context::Context};

/// Appends a trailing `/` to base URLs that lack one so relative joins keep the last segment.
pub fn normalize_url(url: &str) -> String {
	if url.ends_with('/') { url.to_owned() } else { format!("{url}/") }
}

/// Polls `predicate` every `interval` until it reports `true`.
///
/// The predicate runs immediately, then once per interval. Predicate errors are returned as is;
/// a completed `ctx` yields [`Error::Cancelled`].
pub async fn wait_for<F, Fut>(ctx: &Context, interval: StdDuration, mut predicate: F) -> Result<()>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<bool>>,
{
	loop {
		ctx.check()?;

		if predicate().await? {
			return Ok(());
		}

		tokio::select! {
			biased;

			err = ctx.done() => return Err(Error::Cancelled(err)),
			_ = tokio::time::sleep(interval) => (),
		}
	}
}
