//! Periodic prewarm passes over every managed credential.

// crates.io
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	cache::CacheBackend,
	config::PrewarmConfig,
	credential::CredentialId,
	metrics::PrewarmMetrics,
	provider::IdentityProvider,
	reconcile::{Outcome, Reconciler},
};

/// Tally of outcomes from a single pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
	/// Credentials whose payload was written.
	pub written: usize,
	/// Credentials that were skipped.
	pub skipped: usize,
	/// Credentials that failed.
	pub failed: usize,
}

/// Drives the [`Reconciler`] over all credentials once per cycle until cancelled.
#[derive(Debug)]
pub struct Scheduler<P, B> {
	reconciler: Reconciler<P, B>,
	metrics: Arc<PrewarmMetrics>,
	credentials: Vec<CredentialId>,
	conservative: bool,
	cycle: Duration,
}
impl<P, B> Scheduler<P, B>
where
	P: IdentityProvider,
	B: CacheBackend,
{
	/// Create a scheduler for the credentials and policy in a validated `config`.
	pub fn new(
		reconciler: Reconciler<P, B>,
		config: &PrewarmConfig,
		metrics: Arc<PrewarmMetrics>,
	) -> Self {
		Self {
			reconciler,
			metrics,
			credentials: config.credentials.clone(),
			conservative: config.conservative,
			cycle: config.cycle_length(),
		}
	}

	/// Reconciler used for each credential.
	pub fn reconciler(&self) -> &Reconciler<P, B> {
		&self.reconciler
	}

	/// Telemetry registry updated after each successful write.
	pub fn metrics(&self) -> &Arc<PrewarmMetrics> {
		&self.metrics
	}

	/// Interval between passes.
	pub fn cycle(&self) -> Duration {
		self.cycle
	}

	/// Run passes until `cancel` fires.
	///
	/// Timestamps are reset to zero first and the first pass starts immediately. Cancellation
	/// is only observed between passes.
	pub async fn run(&self, cancel: CancellationToken) {
		self.metrics.mark_pending();

		tracing::info!(
			credentials = self.credentials.len(),
			cycle_secs = self.cycle.as_secs_f64(),
			conservative = self.conservative,
			"starting prewarm loop"
		);

		self.run_pass().await;

		let mut ticker = time::interval_at(Instant::now() + self.cycle, self.cycle);

		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					tracing::info!("prewarm loop cancelled");

					break;
				},
				_ = ticker.tick() => {
					self.run_pass().await;
				},
			}
		}
	}

	/// Reconcile every credential once, in order.
	pub async fn run_pass(&self) -> PassReport {
		let mut report = PassReport::default();

		for credential in &self.credentials {
			let started = Instant::now();

			match self.reconciler.reconcile(credential, self.conservative).await {
				Outcome::Written => {
					let elapsed = started.elapsed();

					self.metrics.record_success(credential, Utc::now(), elapsed);
					tracing::info!(
						credential = %credential,
						elapsed_ms = elapsed.as_millis() as u64,
						"prewarmed credential"
					);

					report.written += 1;
				},
				Outcome::Skipped(reason) => {
					tracing::info!(credential = %credential, %reason, "skipped credential");

					report.skipped += 1;
				},
				Outcome::Failed(err) => {
					tracing::warn!(credential = %credential, error = %err, "prewarm failed");

					report.failed += 1;
				},
			}
		}

		tracing::debug!(
			written = report.written,
			skipped = report.skipped,
			failed = report.failed,
			"prewarm pass finished"
		);

		report
	}
}
