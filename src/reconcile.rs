//! Per-credential fetch, compare, and write.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// self
use crate::{
	_prelude::*,
	cache::{CacheBackend, CacheClient},
	credential::CredentialId,
	payload::CredentialPayload,
	provider::{self, IdentityProvider, ProviderLookup},
};

/// Why a credential was left alone during a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
	/// Keystone does not know the credential.
	NotFound,
	/// Keystone rejected a login with the credential.
	AuthorizationFailed,
	/// Conservative mode found a cached payload that disagrees with Keystone.
	CacheConflict,
}
impl Display for SkipReason {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(match self {
			Self::NotFound => "not found in Keystone",
			Self::AuthorizationFailed => "authorization failed",
			Self::CacheConflict => "payload in cache does not match our expectation",
		})
	}
}

/// Result of reconciling one credential.
#[derive(Debug)]
pub enum Outcome {
	/// The fetched payload was written with the configured TTL.
	Written,
	/// Nothing was written.
	Skipped(SkipReason),
	/// Keystone or the cache failed; nothing was written.
	Failed(Error),
}
impl Outcome {
	/// Whether the payload reached the cache.
	pub fn is_written(&self) -> bool {
		matches!(self, Self::Written)
	}
}

/// Brings one cache entry in line with Keystone.
#[derive(Debug)]
pub struct Reconciler<P, B> {
	provider: P,
	cache: CacheClient<B>,
	ttl: Duration,
}
impl<P, B> Reconciler<P, B>
where
	P: IdentityProvider,
	B: CacheBackend,
{
	/// Create a reconciler writing entries that expire after `ttl`.
	pub fn new(provider: P, cache: CacheClient<B>, ttl: Duration) -> Self {
		Self { provider, cache, ttl }
	}

	/// Identity provider used for lookups.
	pub fn provider(&self) -> &P {
		&self.provider
	}

	/// Cache client used for reads and writes.
	pub fn cache(&self) -> &CacheClient<B> {
		&self.cache
	}

	/// TTL applied to written entries.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Fetch the credential's payload and write it to the cache.
	///
	/// In conservative mode an existing entry that differs from the fetched payload (other
	/// than in role order) is left untouched. A missing entry is always written.
	#[tracing::instrument(skip(self), fields(credential = %credential))]
	pub async fn reconcile(&self, credential: &CredentialId, conservative: bool) -> Outcome {
		let payload = match provider::fetch(&self.provider, credential).await {
			Ok(ProviderLookup::Found(payload)) => payload,
			Ok(ProviderLookup::NotFound) => return Outcome::Skipped(SkipReason::NotFound),
			Ok(ProviderLookup::AuthRejected) =>
				return Outcome::Skipped(SkipReason::AuthorizationFailed),
			Err(err) => return Outcome::Failed(err),
		};

		if conservative {
			match self.conflicts(credential, &payload).await {
				Ok(false) => {},
				Ok(true) => return Outcome::Skipped(SkipReason::CacheConflict),
				Err(err) => return Outcome::Failed(err),
			}
		}

		match self.cache.set(credential, &payload, self.ttl).await {
			Ok(()) => {
				tracing::debug!(ttl_secs = self.ttl.as_secs(), "payload written");

				Outcome::Written
			},
			Err(err) => Outcome::Failed(err),
		}
	}

	async fn conflicts(
		&self,
		credential: &CredentialId,
		fetched: &CredentialPayload,
	) -> Result<bool> {
		let Some(cached) = self.cache.get(credential).await? else {
			tracing::debug!("no cached payload; first population");

			return Ok(false);
		};

		Ok(!cached.is_equivalent(fetched))
	}
}
