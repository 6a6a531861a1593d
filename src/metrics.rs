//! Metrics helpers and per-resolver telemetry bookkeeping.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use smallvec::SmallVec;
// self
use crate::{_prelude::*, error::RejectReason};

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_LOOKUPS_TOTAL: &str = "jwks_gate_keyset_lookups_total";
const METRIC_FETCH_TOTAL: &str = "jwks_gate_fetch_total";
const METRIC_REFILL_SHARED_TOTAL: &str = "jwks_gate_refill_shared_failures_total";
const METRIC_FETCH_DURATION: &str = "jwks_gate_fetch_duration_seconds";
const METRIC_VERIFICATIONS_TOTAL: &str = "jwks_gate_verifications_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// How a key set lookup was answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupOutcome {
	/// Served from a key set within its TTL.
	Fresh,
	/// Served from a key set fetched for this lookup.
	Fetched,
	/// Served from an expired key set after a failed refill.
	Stale,
	/// No key set could be produced.
	Unavailable,
}
impl LookupOutcome {
	/// Label value used for the `outcome` label.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Fresh => "fresh",
			Self::Fetched => "fetched",
			Self::Stale => "stale",
			Self::Unavailable => "unavailable",
		}
	}
}

/// Per-verifier counters covering key set lookups, refills, and verification results.
#[derive(Debug, Default)]
pub struct VerifierMetrics {
	fresh_hits: AtomicU64,
	fetched: AtomicU64,
	stale_serves: AtomicU64,
	unavailable: AtomicU64,
	fetch_successes: AtomicU64,
	fetch_errors: AtomicU64,
	shared_refill_failures: AtomicU64,
	last_fetch_micros: AtomicU64,
	accepted: AtomicU64,
	rejected: AtomicU64,
	key_rejections: AtomicU64,
}
impl VerifierMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record how a key set lookup was answered.
	pub fn record_lookup(&self, outcome: LookupOutcome) {
		let counter = match outcome {
			LookupOutcome::Fresh => &self.fresh_hits,
			LookupOutcome::Fetched => &self.fetched,
			LookupOutcome::Stale => &self.stale_serves,
			LookupOutcome::Unavailable => &self.unavailable,
		};

		counter.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a successful fetch and its latency.
	pub fn record_fetch_success(&self, duration: Duration) {
		self.fetch_successes.fetch_add(1, Ordering::Relaxed);
		self.last_fetch_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a failed fetch.
	pub fn record_fetch_error(&self) {
		self.fetch_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a lookup that reused another task's failed refill instead of fetching.
	pub fn record_shared_refill_failure(&self) {
		self.shared_refill_failures.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a verification result; `reason` is `None` for an accepted token.
	pub fn record_verification(&self, reason: Option<&RejectReason>) {
		match reason {
			None => {
				self.accepted.fetch_add(1, Ordering::Relaxed);
			},
			Some(reason) => {
				self.rejected.fetch_add(1, Ordering::Relaxed);

				if matches!(reason, RejectReason::KeyResolution(_)) {
					self.key_rejections.fetch_add(1, Ordering::Relaxed);
				}
			},
		}
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> VerifierMetricsSnapshot {
		let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
		let fresh_hits = load(&self.fresh_hits);
		let fetched = load(&self.fetched);
		let stale_serves = load(&self.stale_serves);
		let unavailable = load(&self.unavailable);

		VerifierMetricsSnapshot {
			lookups: fresh_hits + fetched + stale_serves + unavailable,
			fresh_hits,
			fetched,
			stale_serves,
			unavailable,
			fetch_successes: load(&self.fetch_successes),
			fetch_errors: load(&self.fetch_errors),
			shared_refill_failures: load(&self.shared_refill_failures),
			last_fetch_micros: Some(load(&self.last_fetch_micros)).filter(|micros| *micros > 0),
			accepted: load(&self.accepted),
			rejected: load(&self.rejected),
			key_rejections: load(&self.key_rejections),
		}
	}
}

/// Read-only snapshot of [`VerifierMetrics`].
#[derive(Clone, Debug, Serialize)]
pub struct VerifierMetricsSnapshot {
	/// Key set lookups of any outcome.
	pub lookups: u64,
	/// Lookups served from a key set within its TTL.
	pub fresh_hits: u64,
	/// Lookups that fetched a new key set.
	pub fetched: u64,
	/// Lookups served from an expired key set.
	pub stale_serves: u64,
	/// Lookups that produced no key set.
	pub unavailable: u64,
	/// Successful fetches.
	pub fetch_successes: u64,
	/// Failed fetches.
	pub fetch_errors: u64,
	/// Lookups that reused a concurrent failed refill.
	pub shared_refill_failures: u64,
	/// Microsecond latency of the most recent fetch.
	pub last_fetch_micros: Option<u64>,
	/// Tokens that verified.
	pub accepted: u64,
	/// Tokens that were rejected, for any reason.
	pub rejected: u64,
	/// Rejections caused by key resolution rather than the token itself.
	pub key_rejections: u64,
}
impl VerifierMetricsSnapshot {
	/// Share of lookups served from a fresh key set.
	pub fn hit_rate(&self) -> f64 {
		ratio(self.fresh_hits, self.lookups)
	}

	/// Share of lookups served from an expired key set.
	pub fn stale_ratio(&self) -> f64 {
		ratio(self.stale_serves, self.lookups)
	}

	/// Share of verifications that were rejected.
	pub fn rejection_rate(&self) -> f64 {
		ratio(self.rejected, self.accepted + self.rejected)
	}
}

fn ratio(part: u64, total: u64) -> f64 {
	if total == 0 { 0.0 } else { part as f64 / total as f64 }
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record how a key set lookup was answered.
pub fn record_lookup(realm: &str, outcome: LookupOutcome) {
	metrics::counter!(METRIC_LOOKUPS_TOTAL, labels(realm, "outcome", outcome.as_str()).iter())
		.increment(1);
}

/// Record a successful fetch along with its latency.
pub fn record_fetch_success(realm: &str, duration: Duration) {
	metrics::counter!(METRIC_FETCH_TOTAL, labels(realm, "status", "success").iter()).increment(1);
	metrics::histogram!(METRIC_FETCH_DURATION, base_labels(realm).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed fetch.
pub fn record_fetch_error(realm: &str) {
	metrics::counter!(METRIC_FETCH_TOTAL, labels(realm, "status", "error").iter()).increment(1);
}

/// Record a lookup that reused a concurrent failed refill.
pub fn record_shared_refill_failure(realm: &str) {
	metrics::counter!(METRIC_REFILL_SHARED_TOTAL, base_labels(realm).iter()).increment(1);
}

/// Record a verification outcome; `reason` is `None` for valid tokens.
pub fn record_verification(realm: &str, reason: Option<&'static str>) {
	let mut set = labels(realm, "result", if reason.is_some() { "invalid" } else { "valid" });

	if let Some(reason) = reason {
		set.push(Label::new("reason", reason));
	}

	metrics::counter!(METRIC_VERIFICATIONS_TOTAL, set.iter()).increment(1);
}

fn base_labels(realm: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(3);

	labels.push(Label::new("realm", realm.to_owned()));

	labels
}

fn labels(realm: &str, key: &'static str, value: &'static str) -> LabelSet {
	let mut labels = base_labels(realm);

	labels.push(Label::new(key, value));

	labels
}
