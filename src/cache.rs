//! Cache access for credential payloads.
//!
//! [`CacheBackend`] is the raw key/value seam (memcached in production, an in-process map in
//! tests); [`CacheClient`] layers key derivation and payload encoding on top of it.

pub mod memcached;
pub mod memory;

// std
use std::future::Future;
// self
use crate::{_prelude::*, credential::CredentialId, payload::CredentialPayload};

/// Flag value the Swift memcache ring uses to mark JSON-encoded values.
pub const SWIFT_JSON_FLAG: u32 = 2;
/// Longest TTL memcached treats as relative; larger values are read as UNIX timestamps.
pub const MAX_RELATIVE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Raw value stored under a cache key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheItem {
	/// Encoded payload bytes.
	pub value: Vec<u8>,
	/// Opaque type tag stored alongside the bytes.
	pub flags: u32,
}

/// Key/value store holding encoded payloads.
pub trait CacheBackend: Send + Sync {
	/// Read the item stored under `key`; `Ok(None)` on a cache miss.
	fn get(&self, key: &str) -> impl Future<Output = Result<Option<CacheItem>>> + Send;

	/// Store `item` under `key` unconditionally, expiring after `ttl`.
	fn set(&self, key: &str, item: CacheItem, ttl: Duration)
	-> impl Future<Output = Result<()>> + Send;
}

/// Reads and writes [`CredentialPayload`]s keyed by [`CredentialId::cache_key`].
#[derive(Clone, Debug)]
pub struct CacheClient<B> {
	backend: B,
}
impl<B> CacheClient<B>
where
	B: CacheBackend,
{
	/// Wrap a backend.
	pub fn new(backend: B) -> Self {
		Self { backend }
	}

	/// Access the underlying backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Fetch the cached payload for a credential.
	///
	/// A miss is `Ok(None)`; an entry that does not decode is [`Error::CorruptEntry`].
	pub async fn get(&self, credential: &CredentialId) -> Result<Option<CredentialPayload>> {
		let key = credential.cache_key();
		let Some(item) = self.backend.get(&key).await? else {
			return Ok(None);
		};
		let payload = serde_json::from_slice(&item.value)
			.map_err(|err| Error::CorruptEntry { key, reason: err.to_string() })?;

		Ok(Some(payload))
	}

	/// Write the payload for a credential, replacing whatever is cached.
	pub async fn set(
		&self,
		credential: &CredentialId,
		payload: &CredentialPayload,
		ttl: Duration,
	) -> Result<()> {
		let item = CacheItem { value: serde_json::to_vec(payload)?, flags: SWIFT_JSON_FLAG };

		self.backend.set(&credential.cache_key(), item, ttl).await
	}
}
