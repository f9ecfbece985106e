//! Single-flight coordination of session refreshes.
//!
//! The coordinator owns the only refresh handle of a client. The first caller observing the
//! idle state becomes the leader and performs the refresh; every caller arriving while it is in
//! flight subscribes to the same outcome. The handle is cleared in the same critical section
//! that publishes the outcome, so it is never left settled-but-present.

// std
use std::{
	future::Future,
	sync::{
		Mutex, MutexGuard, PoisonError,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use tokio::sync::watch;
// self
use crate::{_prelude::*, error::DEFAULT_ERROR_MESSAGE};

/// Error code reported to waiters when the leader was dropped before settling.
pub const REFRESH_ABANDONED_CODE: &str = "REFRESH_ABANDONED";

type Slot = Option<watch::Receiver<Option<RefreshOutcome>>>;

/// Shared result of one refresh operation.
#[derive(Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// A new access token was obtained and persisted.
	Refreshed {
		/// The new access token.
		access_token: String,
	},
	/// The refresh failed; the session has been terminated.
	Failed(NormalizedError),
}
impl std::fmt::Debug for RefreshOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Refreshed { .. } => f.write_str("Refreshed"),
			Self::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
		}
	}
}

/// Observable coordinator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPhase {
	/// No refresh in flight.
	Idle,
	/// A refresh is in flight; new 406 handlers wait for it.
	Refreshing,
}

/// Guarantees at most one refresh in flight per client.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
	slot: Mutex<Slot>,
	flights: AtomicU64,
}
impl RefreshCoordinator {
	/// Create an idle coordinator.
	pub fn new() -> Self {
		Self::default()
	}

	/// Current phase.
	pub fn phase(&self) -> RefreshPhase {
		if self.lock().is_some() { RefreshPhase::Refreshing } else { RefreshPhase::Idle }
	}

	/// Number of refresh operations started so far.
	pub fn flights(&self) -> u64 {
		self.flights.load(Ordering::Relaxed)
	}

	/// Run `refresh` unless one is already in flight, and return the shared outcome.
	///
	/// Only the leader invokes `refresh`; followers never do.
	pub async fn run<F, Fut>(&self, refresh: F) -> RefreshOutcome
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = RefreshOutcome>,
	{
		match self.join() {
			Role::Leader(lease) => {
				tracing::debug!(flight = self.flights(), "leading session refresh");

				let outcome = refresh().await;

				lease.settle(outcome.clone());

				outcome
			},
			Role::Follower(mut receiver) => {
				tracing::debug!("awaiting in-flight session refresh");

				receiver
					.wait_for(Option::is_some)
					.await
					.ok()
					.and_then(|settled| settled.clone())
					.unwrap_or_else(|| RefreshOutcome::Failed(abandoned()))
			},
		}
	}

	fn join(&self) -> Role<'_> {
		let mut slot = self.lock();

		if let Some(receiver) = slot.as_ref() {
			return Role::Follower(receiver.clone());
		}

		let (sender, receiver) = watch::channel(None);

		*slot = Some(receiver);
		self.flights.fetch_add(1, Ordering::Relaxed);

		Role::Leader(RefreshLease { coordinator: self, sender: Some(sender) })
	}

	fn lock(&self) -> MutexGuard<'_, Slot> {
		self.slot.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

enum Role<'a> {
	Leader(RefreshLease<'a>),
	Follower(watch::Receiver<Option<RefreshOutcome>>),
}

struct RefreshLease<'a> {
	coordinator: &'a RefreshCoordinator,
	sender: Option<watch::Sender<Option<RefreshOutcome>>>,
}
impl RefreshLease<'_> {
	fn settle(mut self, outcome: RefreshOutcome) {
		let mut slot = self.coordinator.lock();

		if let Some(sender) = self.sender.take() {
			sender.send_replace(Some(outcome));
		}

		*slot = None;
	}
}
impl Drop for RefreshLease<'_> {
	fn drop(&mut self) {
		if self.sender.is_some() {
			tracing::warn!("session refresh dropped before settling");

			*self.coordinator.lock() = None;
			self.sender = None;
		}
	}
}

fn abandoned() -> NormalizedError {
	NormalizedError::new(REFRESH_ABANDONED_CODE, 406, DEFAULT_ERROR_MESSAGE)
}
