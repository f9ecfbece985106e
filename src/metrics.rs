//! Metrics helpers and per-client telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::{_prelude::*, http::request::RequestMethod};

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "rest_client_requests_total";
const METRIC_DISPATCH_DURATION: &str = "rest_client_dispatch_duration_seconds";
const METRIC_FAILURES_TOTAL: &str = "rest_client_failures_total";
const METRIC_CACHE_HITS_TOTAL: &str = "rest_client_cache_hits_total";
const METRIC_CACHE_MISSES_TOTAL: &str = "rest_client_cache_misses_total";
const METRIC_REFRESH_TOTAL: &str = "rest_client_refresh_total";
const METRIC_REFRESH_DURATION: &str = "rest_client_refresh_duration_seconds";
const METRIC_SESSION_TERMINATIONS: &str = "rest_client_session_terminations_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Why a session was terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
	/// The server answered 401.
	Unauthorized,
	/// A token refresh failed or was not possible.
	RefreshFailed,
}
impl SessionEnd {
	/// Label value.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Unauthorized => "unauthorized",
			Self::RefreshFailed => "refresh_failed",
		}
	}
}

/// Thread-safe metrics accumulator for one client instance.
#[derive(Debug, Default)]
pub struct ClientMetrics {
	requests: AtomicU64,
	dispatches: AtomicU64,
	failures: AtomicU64,
	cache_hits: AtomicU64,
	cache_misses: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	session_terminations: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl ClientMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a caller-issued request (replays are not counted).
	pub fn record_request(&self, method: RequestMethod) {
		self.requests.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REQUESTS_TOTAL, method_labels(method).iter()).increment(1);
	}

	/// Record a network dispatch and its latency.
	pub fn record_dispatch(&self, method: RequestMethod, duration: Duration) {
		self.dispatches.fetch_add(1, Ordering::Relaxed);

		metrics::histogram!(METRIC_DISPATCH_DURATION, method_labels(method).iter())
			.record(duration.as_secs_f64());
	}

	/// Record a failure returned to the caller.
	pub fn record_failure(&self, http_code: u16) {
		self.failures.fetch_add(1, Ordering::Relaxed);

		let mut labels = LabelSet::new();

		labels.push(Label::new("http_code", http_code.to_string()));

		metrics::counter!(METRIC_FAILURES_TOTAL, labels.iter()).increment(1);
	}

	/// Record a fresh cache hit.
	pub fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_CACHE_HITS_TOTAL).increment(1);
	}

	/// Record a cache miss for an eligible request.
	pub fn record_cache_miss(&self) {
		self.cache_misses.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_CACHE_MISSES_TOTAL).increment(1);
	}

	/// Record a successful token refresh and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);

		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels("success").iter()).increment(1);
		metrics::histogram!(METRIC_REFRESH_DURATION).record(duration.as_secs_f64());
	}

	/// Record a failed token refresh.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels("error").iter()).increment(1);
	}

	/// Record a session termination.
	pub fn record_session_end(&self, reason: SessionEnd) {
		self.session_terminations.fetch_add(1, Ordering::Relaxed);

		let mut labels = LabelSet::new();

		labels.push(Label::new("reason", reason.as_str()));

		metrics::counter!(METRIC_SESSION_TERMINATIONS, labels.iter()).increment(1);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> ClientMetricsSnapshot {
		ClientMetricsSnapshot {
			requests: self.requests.load(Ordering::Relaxed),
			dispatches: self.dispatches.load(Ordering::Relaxed),
			failures: self.failures.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			cache_misses: self.cache_misses.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			session_terminations: self.session_terminations.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-client counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
	/// Requests issued by callers.
	pub requests: u64,
	/// Network dispatches, including replays but excluding cache hits.
	pub dispatches: u64,
	/// Failures returned to callers.
	pub failures: u64,
	/// Fresh cache hits.
	pub cache_hits: u64,
	/// Cache misses for eligible requests.
	pub cache_misses: u64,
	/// Successful token refreshes.
	pub refresh_successes: u64,
	/// Failed token refreshes.
	pub refresh_errors: u64,
	/// Sessions terminated with a redirect.
	pub session_terminations: u64,
	/// Microsecond latency of the most recent refresh.
	pub last_refresh_micros: Option<u64>,
}
impl ClientMetricsSnapshot {
	/// Ratio of cache hits over eligible lookups.
	pub fn hit_rate(&self) -> f64 {
		let lookups = self.cache_hits + self.cache_misses;

		if lookups == 0 { 0.0 } else { self.cache_hits as f64 / lookups as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
/// Without the `prometheus` feature this is a no-op.
pub fn install_default_exporter() -> Result<()> {
	#[cfg(feature = "prometheus")]
	{
		if PROMETHEUS_HANDLE.get().is_some() {
			return Ok(());
		}

		let handle = PrometheusBuilder::new()
			.install_recorder()
			.map_err(|err| Error::Metrics(err.to_string()))?;
		let _ = PROMETHEUS_HANDLE.set(handle);
	}

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

fn method_labels(method: RequestMethod) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("method", method.as_str()));

	labels
}

fn status_labels(status: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("status", status));

	labels
}
