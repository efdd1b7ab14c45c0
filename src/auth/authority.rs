//! Single-flight credential ownership.
//!
//! [`TokenAuthority`] owns the current [`Credential`] and coordinates re-authentication so that at
//! most one network call is in flight per authority. The first caller that finds the credential
//! missing or stale opens a refresh round, releases the state guard, and runs the
//! [`Authenticator`] without holding any lock. Callers that arrive while the round is open wait on
//! the round's outcome cell and receive the same credential or the same failure. The guard is only
//! held to inspect the state, open a round, and swap the credential when the round completes.

mod metrics;

pub use metrics::AuthMetrics;

// crates.io
use async_lock::OnceCell;
// self
use crate::{
	_prelude::*,
	auth::Credential,
	context::Context,
	error::AuthenticationError,
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// Boxed future returned by [`Authenticator::authenticate`].
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

type RoundOutcome = Result<Arc<Credential>, AuthenticationError>;

/// Performs one authentication network call.
///
/// Implementations do not need any coordination of their own: the authority guarantees a single
/// in-flight call per refresh round.
pub trait Authenticator
where
	Self: 'static + Send + Sync,
{
	/// Obtains a brand new credential.
	fn authenticate<'a>(&'a self, ctx: &'a Context) -> AuthFuture<'a>;
}

/// Owner of the shared credential and its refresh rounds.
pub struct TokenAuthority {
	authenticator: Arc<dyn Authenticator>,
	state: Mutex<AuthState>,
	expiry_leeway: Duration,
	metrics: Arc<AuthMetrics>,
}
impl TokenAuthority {
	/// Creates an authority that has not authenticated yet.
	pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
		Self {
			authenticator,
			state: Default::default(),
			expiry_leeway: Duration::ZERO,
			metrics: Default::default(),
		}
	}

	/// Treats credentials expiring within `leeway` as already stale.
	pub fn with_expiry_leeway(mut self, leeway: Duration) -> Self {
		self.expiry_leeway = leeway;

		self
	}

	/// Shares an externally owned metrics sink.
	pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Returns the authentication counters.
	pub fn metrics(&self) -> &Arc<AuthMetrics> {
		&self.metrics
	}

	/// Returns the current credential without validating it.
	pub fn current(&self) -> Option<Arc<Credential>> {
		self.state.lock().credential.clone()
	}

	/// Installs a credential obtained elsewhere, e.g. a token reused from a previous session.
	pub fn set_credential(&self, credential: Credential) -> Arc<Credential> {
		let credential = Arc::new(credential);

		self.state.lock().credential = Some(credential.clone());

		credential
	}

	/// Forgets the current credential so the next caller authenticates again.
	pub fn invalidate(&self) {
		self.state.lock().credential = None;
	}

	/// Returns the current credential if it is believed valid, otherwise joins or starts a
	/// refresh round and returns its outcome.
	pub async fn ensure_valid(&self, ctx: &Context) -> Result<Arc<Credential>> {
		let turn = {
			let mut state = self.state.lock();

			if let Some(credential) = &state.credential
				&& self.is_fresh(credential)
			{
				return Ok(credential.clone());
			}

			state.turn()
		};

		self.take_turn(ctx, turn).await
	}

	/// Forces a refresh after a server rejected `rejected`.
	///
	/// If another caller already replaced the rejected credential with a fresh one, that
	/// credential is returned without a network call. Otherwise the rejected credential is
	/// dropped and the caller joins or starts a refresh round.
	pub async fn reauthenticate(
		&self,
		ctx: &Context,
		rejected: &Arc<Credential>,
	) -> Result<Arc<Credential>> {
		let turn = {
			let mut state = self.state.lock();

			match &state.credential {
				Some(credential) if Arc::ptr_eq(credential, rejected) => state.credential = None,
				Some(credential) if self.is_fresh(credential) => return Ok(credential.clone()),
				_ => (),
			}

			state.turn()
		};

		self.take_turn(ctx, turn).await
	}

	fn is_fresh(&self, credential: &Credential) -> bool {
		// A leeway reaching past the representable range makes every expiring credential stale.
		match OffsetDateTime::now_utc().checked_add(self.expiry_leeway) {
			Some(instant) => credential.is_valid_at(instant),
			None => credential.expires_at().is_none(),
		}
	}

	async fn take_turn(&self, ctx: &Context, mut turn: Turn) -> Result<Arc<Credential>> {
		loop {
			let round = match turn {
				Turn::Lead(round) => return self.lead(ctx, round).await,
				Turn::Join(round) => round,
			};

			self.metrics.record_join();

			let outcome = tokio::select! {
				biased;

				outcome = round.outcome.wait() => outcome.clone(),
				err = ctx.done() => return Err(Error::Cancelled(err)),
			};

			match outcome {
				// The leader's scope ended, not ours: take another turn.
				Err(err) if leader_cancelled(&err) && ctx.err().is_none() => {
					let mut state = self.state.lock();

					if let Some(credential) = &state.credential
						&& self.is_fresh(credential)
					{
						return Ok(credential.clone());
					}

					turn = state.turn();
				},
				outcome => return outcome.map_err(Error::from),
			}
		}
	}

	async fn lead(&self, ctx: &Context, round: Arc<RefreshRound>) -> Result<Arc<Credential>> {
		const KIND: OpKind = OpKind::Authenticate;

		let span = OpSpan::new(KIND, "lead_round");
		let guard = RoundGuard { authority: self, round: Some(round) };

		obs::record_op_outcome(KIND, OpOutcome::Attempt);
		self.metrics.record_round();

		let outcome = span
			.instrument(async {
				tokio::select! {
					biased;

					err = ctx.done() => Err(Error::Cancelled(err)),
					credential = self.authenticator.authenticate(ctx) => credential,
				}
			})
			.await
			.map(Arc::new)
			.map_err(|err| match err {
				Error::Authentication(err) => err,
				other => AuthenticationError::with_source("Authentication failed", other),
			});

		obs::record_op_outcome(KIND, OpOutcome::of(&outcome));

		match (guard.finish(outcome), ctx.err()) {
			(Err(_), Some(err)) => Err(Error::Cancelled(err)),
			(outcome, _) => outcome.map_err(Error::from),
		}
	}
}
impl Debug for TokenAuthority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("TokenAuthority")
			.field("credential", &state.credential)
			.field("refreshing", &state.round.is_some())
			.field("expiry_leeway", &self.expiry_leeway)
			.finish()
	}
}

#[derive(Default)]
struct AuthState {
	credential: Option<Arc<Credential>>,
	round: Option<Arc<RefreshRound>>,
}
impl AuthState {
	fn turn(&mut self) -> Turn {
		match &self.round {
			Some(round) => Turn::Join(round.clone()),
			None => {
				let round = Arc::new(RefreshRound::default());

				self.round = Some(round.clone());

				Turn::Lead(round)
			},
		}
	}
}

#[derive(Default)]
struct RefreshRound {
	outcome: OnceCell<RoundOutcome>,
}

enum Turn {
	Lead(Arc<RefreshRound>),
	Join(Arc<RefreshRound>),
}

/// Closes a round exactly once, even if the leading future is dropped mid-call.
struct RoundGuard<'a> {
	authority: &'a TokenAuthority,
	round: Option<Arc<RefreshRound>>,
}
impl RoundGuard<'_> {
	fn finish(mut self, outcome: RoundOutcome) -> RoundOutcome {
		if let Some(round) = self.round.take() {
			self.publish(&round, outcome.clone());
		}

		outcome
	}

	fn publish(&self, round: &Arc<RefreshRound>, outcome: RoundOutcome) {
		{
			let mut state = self.authority.state.lock();

			if let Ok(credential) = &outcome {
				state.credential = Some(credential.clone());
			}
			if state.round.as_ref().is_some_and(|current| Arc::ptr_eq(current, round)) {
				state.round = None;
			}
		}

		match &outcome {
			Ok(_) => self.authority.metrics.record_success(),
			Err(_) => self.authority.metrics.record_failure(),
		}

		let _ = round.outcome.set_blocking(outcome);
	}
}
impl Drop for RoundGuard<'_> {
	fn drop(&mut self) {
		if let Some(round) = self.round.take() {
			self.publish(
				&round,
				Err(AuthenticationError::new("Authentication round was abandoned before completing")),
			);
		}
	}
}

fn leader_cancelled(err: &AuthenticationError) -> bool {
	matches!(err.source.as_deref(), Some(Error::Cancelled(_)))
}
