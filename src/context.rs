//! Cancellation and deadline scopes for requests, refresh rounds, and page traversals.
//!
//! A [`Context`] is a cheap, clonable handle that eventually becomes *done* with a
//! [`ContextError`]. Derived scopes ([`Context::with_cancel`], [`Context::with_deadline`],
//! [`merge`]) return a [`CancelHandle`]; cancelling or dropping the handle releases the scope and
//! stops any watcher task that was spawned for it.
//!
//! Watcher tasks are spawned on the ambient Tokio runtime whenever a derived scope has a parent
//! that can complete or a deadline to enforce, so those constructors must run inside a runtime.

// std
use std::{
	any::{Any, TypeId},
	time::{Duration as StdDuration, Instant},
};
// crates.io
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Reason a [`Context`] completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ThisError)]
pub enum ContextError {
	/// The scope (or one of its ancestors) was cancelled explicitly.
	#[error("context canceled")]
	Canceled,
	/// A deadline attached to the scope (or one of its ancestors) passed.
	#[error("context deadline exceeded")]
	DeadlineExceeded,
}

#[derive(Clone)]
struct Signal(Arc<watch::Sender<Option<ContextError>>>);
impl Signal {
	fn new() -> Self {
		let (tx, _) = watch::channel(None);

		Self(Arc::new(tx))
	}

	/// Records `err` unless the signal already fired; returns whether this call fired it.
	fn fire(&self, err: ContextError) -> bool {
		self.0.send_if_modified(|slot| {
			if slot.is_none() {
				*slot = Some(err);

				true
			} else {
				false
			}
		})
	}

	fn err(&self) -> Option<ContextError> {
		*self.0.borrow()
	}

	async fn fired(&self) -> ContextError {
		let mut rx = self.0.subscribe();

		match rx.wait_for(Option::is_some).await {
			Ok(value) => (*value).unwrap_or(ContextError::Canceled),
			// The sender lives as long as `self`, so the channel cannot close underneath us.
			Err(_) => ContextError::Canceled,
		}
	}
}

struct Node {
	signal: Option<Signal>,
	deadline: Option<Instant>,
	value: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
	// Value lookup order.
	parents: Vec<Context>,
}

/// Cancellation scope with an optional deadline and typed values.
#[derive(Clone)]
pub struct Context(Arc<Node>);
impl Context {
	/// Root scope that never completes and carries no deadline or values.
	pub fn background() -> Self {
		Self(Arc::new(Node { signal: None, deadline: None, value: None, parents: Vec::new() }))
	}

	/// Derives a scope that completes when `parent` does or when the handle is cancelled.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime while `parent` can still complete.
	pub fn with_cancel(parent: &Context) -> (Context, CancelHandle) {
		let signal = Signal::new();
		let ctx = Self(Arc::new(Node {
			signal: Some(signal.clone()),
			deadline: parent.deadline(),
			value: None,
			parents: vec![parent.clone()],
		}));

		if let Some(err) = parent.err() {
			signal.fire(err);
		} else if parent.0.signal.is_some() {
			let parent = parent.clone();
			let watched = signal.clone();

			tokio::spawn(async move {
				tokio::select! {
					err = parent.done() => {
						watched.fire(err);
					},
					_ = watched.fired() => {},
				}
			});
		}

		(ctx, CancelHandle { signal })
	}

	/// Derives a scope that completes at `deadline` at the latest.
	///
	/// The effective deadline is the earlier of `deadline` and the parent's own deadline.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime and the deadline lies in the future.
	pub fn with_deadline(parent: &Context, deadline: Instant) -> (Context, CancelHandle) {
		let signal = Signal::new();
		let effective = earliest(parent.deadline(), Some(deadline));
		let ctx = Self(Arc::new(Node {
			signal: Some(signal.clone()),
			deadline: effective,
			value: None,
			parents: vec![parent.clone()],
		}));

		if let Some(err) = parent.err() {
			signal.fire(err);
		} else if deadline <= Instant::now() {
			signal.fire(ContextError::DeadlineExceeded);
		} else {
			let parent = parent.clone();
			let watched = signal.clone();

			tokio::spawn(async move {
				tokio::select! {
					err = parent.done() => {
						watched.fire(err);
					},
					_ = tokio::time::sleep_until(deadline.into()) => {
						watched.fire(ContextError::DeadlineExceeded);
					},
					_ = watched.fired() => {},
				}
			});
		}

		(ctx, CancelHandle { signal })
	}

	/// Derives a scope that completes after `timeout` at the latest.
	///
	/// # Panics
	///
	/// Same conditions as [`Context::with_deadline`].
	pub fn with_timeout(parent: &Context, timeout: StdDuration) -> (Context, CancelHandle) {
		Self::with_deadline(parent, Instant::now() + timeout)
	}

	/// Derives a scope carrying `value`, shadowing any value of the same type further up.
	pub fn with_value<T>(parent: &Context, value: T) -> Context
	where
		T: 'static + Send + Sync,
	{
		Self(Arc::new(Node {
			signal: parent.0.signal.clone(),
			deadline: parent.deadline(),
			value: Some((TypeId::of::<T>(), Arc::new(value))),
			parents: vec![parent.clone()],
		}))
	}

	/// Returns the completion reason, or `None` while the scope is still live.
	pub fn err(&self) -> Option<ContextError> {
		self.0.signal.as_ref().and_then(Signal::err)
	}

	/// Returns `true` once the scope has completed.
	pub fn is_done(&self) -> bool {
		self.err().is_some()
	}

	/// Waits until the scope completes and returns the reason.
	///
	/// Never resolves for [`Context::background`].
	pub async fn done(&self) -> ContextError {
		match self.0.signal.as_ref() {
			Some(signal) => signal.fired().await,
			None => std::future::pending().await,
		}
	}

	/// Returns the deadline after which the scope completes, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.0.deadline
	}

	/// Looks up the nearest value of type `T`.
	pub fn value<T>(&self) -> Option<Arc<T>>
	where
		T: 'static + Send + Sync,
	{
		if let Some((id, value)) = self.0.value.as_ref()
			&& *id == TypeId::of::<T>()
		{
			return value.clone().downcast::<T>().ok();
		}

		self.0.parents.iter().find_map(Context::value::<T>)
	}

	/// Returns an error if the scope already completed.
	pub(crate) fn check(&self) -> Result<()> {
		match self.err() {
			Some(err) => Err(Error::Cancelled(err)),
			None => Ok(()),
		}
	}
}
impl Default for Context {
	fn default() -> Self {
		Self::background()
	}
}
impl Debug for Context {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Context")
			.field("deadline", &self.deadline())
			.field("err", &self.err())
			.finish()
	}
}

/// Releases a derived [`Context`]; cancelling is idempotent and also happens on drop.
pub struct CancelHandle {
	signal: Signal,
}
impl CancelHandle {
	/// Completes the associated scope with [`ContextError::Canceled`] unless it already completed.
	pub fn cancel(&self) {
		self.signal.fire(ContextError::Canceled);
	}
}
impl Drop for CancelHandle {
	fn drop(&mut self) {
		self.cancel();
	}
}
impl Debug for CancelHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CancelHandle").field("err", &self.signal.err()).finish()
	}
}

/// Combines two independent scopes into one.
///
/// The merged scope completes the moment either parent completes and reports that parent's
/// error; its deadline is the earlier of the two; value lookups consult `a` before `b`. A single
/// watcher task waits on both parents and on the returned handle, fires the merged signal once,
/// and exits. Releasing the handle before either parent completes still stops the watcher.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime while either parent can still complete.
pub fn merge(a: &Context, b: &Context) -> (Context, CancelHandle) {
	let signal = Signal::new();
	let ctx = Context(Arc::new(Node {
		signal: Some(signal.clone()),
		deadline: earliest(a.deadline(), b.deadline()),
		value: None,
		parents: vec![a.clone(), b.clone()],
	}));

	if let Some(err) = a.err().or_else(|| b.err()) {
		signal.fire(err);
	} else if a.0.signal.is_some() || b.0.signal.is_some() {
		let (a, b) = (a.clone(), b.clone());
		let watched = signal.clone();

		tokio::spawn(async move {
			tokio::select! {
				err = a.done() => {
					watched.fire(err);
				},
				err = b.done() => {
					watched.fire(err);
				},
				_ = watched.fired() => {},
			}
		});
	}

	(ctx, CancelHandle { signal })
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
	match (a, b) {
		(Some(a), Some(b)) => Some(a.min(b)),
		(a, b) => a.or(b),
	}
}
