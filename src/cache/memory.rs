//! In-process cache backend.
//!
//! Behaves like a single memcached server: unconditional overwrite, relative expiry. Every
//! write is recorded with its TTL so callers can inspect exactly what would have been sent.

// std
use std::{
	collections::HashMap,
	sync::{
		Mutex, MutexGuard, PoisonError,
		atomic::{AtomicUsize, Ordering},
	},
};
// self
use crate::{
	_prelude::*,
	cache::{CacheBackend, CacheItem},
};

/// Entry held by [`MemoryBackend`].
#[derive(Clone, Debug)]
pub struct StoredEntry {
	/// Stored bytes and flags.
	pub item: CacheItem,
	/// TTL requested by the writer.
	pub ttl: Duration,
	/// When the entry was written.
	pub stored_at: Instant,
}
impl StoredEntry {
	/// Whether the entry has outlived its TTL.
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.stored_at + self.ttl
	}
}

/// Shared in-memory map; clones observe the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
	entries: Arc<Mutex<HashMap<String, StoredEntry>>>,
	writes: Arc<AtomicUsize>,
}
impl MemoryBackend {
	/// Create an empty backend.
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed an entry without counting it as a write.
	pub fn insert(&self, key: &str, item: CacheItem, ttl: Duration) {
		let entry = StoredEntry { item, ttl, stored_at: Instant::now() };

		self.lock().insert(key.to_owned(), entry);
	}

	/// Inspect the live entry under `key`.
	pub fn entry(&self, key: &str) -> Option<StoredEntry> {
		let now = Instant::now();

		self.lock().get(key).filter(|entry| !entry.is_expired(now)).cloned()
	}

	/// Number of [`CacheBackend::set`] calls observed.
	pub fn writes(&self) -> usize {
		self.writes.load(Ordering::Relaxed)
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredEntry>> {
		self.entries.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
impl CacheBackend for MemoryBackend {
	async fn get(&self, key: &str) -> Result<Option<CacheItem>> {
		let now = Instant::now();
		let mut entries = self.lock();

		match entries.get(key) {
			Some(entry) if entry.is_expired(now) => {
				entries.remove(key);

				Ok(None)
			},
			Some(entry) => Ok(Some(entry.item.clone())),
			None => Ok(None),
		}
	}

	async fn set(&self, key: &str, item: CacheItem, ttl: Duration) -> Result<()> {
		self.writes.fetch_add(1, Ordering::Relaxed);
		self.insert(key, item, ttl);

		Ok(())
	}
}
