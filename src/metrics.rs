//! Per-credential prewarm telemetry and the Prometheus exporter.
//!
//! [`PrewarmMetrics`] is an explicit registry: it owns one pair of gauges per credential and
//! is handed to the scheduler, so nothing here relies on process-wide state besides the
//! recorder the gauges were registered with.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
	net::SocketAddr,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use metrics::{Gauge, Label};
use metrics_exporter_prometheus::PrometheusBuilder;
use smallvec::SmallVec;
// self
use crate::{_prelude::*, credential::CredentialId};

type LabelSet = SmallVec<[Label; 2]>;

/// UNIX timestamp of the last successful prewarm of a credential.
pub const METRIC_LAST_RUN_SECS: &str = "swift_s3_cache_prewarm_last_run_secs";
/// Duration of the last successful prewarm of a credential.
pub const METRIC_DURATION_SECS: &str = "swift_s3_cache_prewarm_duration_secs";

const UNSET: u64 = u64::MAX;

/// Point-in-time view of one credential's telemetry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrewarmSnapshot {
	/// Last successful prewarm in seconds since the epoch; `Some(0.0)` until one succeeds.
	pub last_run_secs: Option<f64>,
	/// Duration of the last successful prewarm in seconds.
	pub duration_secs: Option<f64>,
}

/// Registry of per-credential prewarm gauges.
#[derive(Debug)]
pub struct PrewarmMetrics {
	credentials: HashMap<CredentialId, CredentialGauges>,
}
impl PrewarmMetrics {
	/// Register gauges for every credential with the current recorder.
	pub fn new<'a, I>(credentials: I) -> Arc<Self>
	where
		I: IntoIterator<Item = &'a CredentialId>,
	{
		let credentials = credentials
			.into_iter()
			.map(|credential| (credential.clone(), CredentialGauges::register(credential)))
			.collect();

		Arc::new(Self { credentials })
	}

	/// Reset every last-run timestamp to zero so that credentials which never succeed are
	/// still visible.
	pub fn mark_pending(&self) {
		for gauges in self.credentials.values() {
			gauges.last_run.set(0.0);
			gauges.last_run_bits.store(0f64.to_bits(), Ordering::Relaxed);
		}
	}

	/// Record a successful prewarm that finished at `finished_at` after `elapsed`.
	pub fn record_success(
		&self,
		credential: &CredentialId,
		finished_at: DateTime<Utc>,
		elapsed: Duration,
	) {
		let Some(gauges) = self.credentials.get(credential) else {
			tracing::debug!(credential = %credential, "no gauges registered for credential");

			return;
		};
		let timestamp = finished_at.timestamp() as f64;
		let duration = elapsed.as_secs_f64();

		gauges.last_run.set(timestamp);
		gauges.duration.set(duration);
		gauges.last_run_bits.store(timestamp.to_bits(), Ordering::Relaxed);
		gauges.duration_bits.store(duration.to_bits(), Ordering::Relaxed);
	}

	/// Values last written for a credential; `None` for unknown credentials.
	pub fn snapshot(&self, credential: &CredentialId) -> Option<PrewarmSnapshot> {
		self.credentials.get(credential).map(|gauges| PrewarmSnapshot {
			last_run_secs: load(&gauges.last_run_bits),
			duration_secs: load(&gauges.duration_bits),
		})
	}
}

struct CredentialGauges {
	last_run: Gauge,
	duration: Gauge,
	last_run_bits: AtomicU64,
	duration_bits: AtomicU64,
}
impl CredentialGauges {
	fn register(credential: &CredentialId) -> Self {
		let labels = credential_labels(credential);

		Self {
			last_run: metrics::gauge!(METRIC_LAST_RUN_SECS, labels.iter()),
			duration: metrics::gauge!(METRIC_DURATION_SECS, labels.iter()),
			last_run_bits: AtomicU64::new(UNSET),
			duration_bits: AtomicU64::new(UNSET),
		}
	}
}

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
///
/// Must run inside a tokio runtime and before [`PrewarmMetrics::new`], otherwise the gauges
/// are registered with the no-op recorder.
pub fn install_exporter(listen: SocketAddr) -> Result<()> {
	PrometheusBuilder::new()
		.with_http_listener(listen)
		.install()
		.map_err(|err| Error::Metrics(err.to_string()))?;

	metrics::describe_gauge!(
		METRIC_LAST_RUN_SECS,
		"UNIX timestamp in seconds of last successful cache prewarm for a particular S3 credential."
	);
	metrics::describe_gauge!(
		METRIC_DURATION_SECS,
		"Duration in seconds of last successful cache prewarm for a particular S3 credential."
	);

	tracing::info!(listen = %listen, "serving Prometheus metrics");

	Ok(())
}

impl Debug for CredentialGauges {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("CredentialGauges")
			.field("last_run_secs", &load(&self.last_run_bits))
			.field("duration_secs", &load(&self.duration_bits))
			.finish_non_exhaustive()
	}
}

fn credential_labels(credential: &CredentialId) -> LabelSet {
	credential.as_labels().into_iter().map(|(key, value)| Label::new(key, value)).collect()
}

fn load(bits: &AtomicU64) -> Option<f64> {
	match bits.load(Ordering::Relaxed) {
		UNSET => None,
		value => Some(f64::from_bits(value)),
	}
}
