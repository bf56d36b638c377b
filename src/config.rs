//! Prewarm configuration and validation.

// std
use std::{collections::HashSet, net::SocketAddr};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, cache::MAX_RELATIVE_TTL, credential::CredentialId};

/// Default cache entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
/// Number of prewarm cycles that fit into one TTL window.
pub const CYCLES_PER_TTL: u32 = 5;
/// Shortest accepted TTL (one-second cycles).
pub const MIN_TTL: Duration = Duration::from_secs(CYCLES_PER_TTL as u64);
/// Default memcached endpoint.
pub const DEFAULT_SERVER: &str = "localhost:11211";
/// Default Prometheus listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Everything the `prewarm` loop needs besides the Keystone connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrewarmConfig {
	/// Credentials to keep prewarmed.
	pub credentials: Vec<CredentialId>,
	/// Memcached `host:port` endpoints.
	#[serde(default = "default_servers")]
	pub servers: Vec<String>,
	/// Expiry of cache entries; prewarming happens every `ttl / 5`.
	#[serde(with = "humantime_serde", default = "default_ttl")]
	pub ttl: Duration,
	/// Leave cache entries alone when they conflict with Keystone.
	#[serde(default)]
	pub conservative: bool,
	/// Listen address for the Prometheus scrape endpoint.
	#[serde(default = "default_listen")]
	pub listen: SocketAddr,
	/// Per-operation memcached timeout.
	#[serde(with = "humantime_serde", default = "default_cache_timeout")]
	pub cache_timeout: Duration,
}
impl PrewarmConfig {
	/// Configuration with defaults for everything but the credentials.
	pub fn new(credentials: Vec<CredentialId>) -> Self {
		Self {
			credentials,
			servers: default_servers(),
			ttl: DEFAULT_TTL,
			conservative: false,
			listen: default_listen(),
			cache_timeout: default_cache_timeout(),
		}
	}

	/// Interval between two prewarm passes.
	pub fn cycle_length(&self) -> Duration {
		self.ttl / CYCLES_PER_TTL
	}

	/// Validate invariants for the prewarm loop.
	pub fn validate(&self) -> Result<()> {
		if self.credentials.is_empty() {
			return Err(Error::Validation {
				field: "credentials",
				reason: "At least one credential is required.".into(),
			});
		}

		let mut access_keys = HashSet::with_capacity(self.credentials.len());

		for credential in &self.credentials {
			if !access_keys.insert(credential.access_key()) {
				return Err(Error::Validation {
					field: "credentials",
					reason: format!(
						"Access key '{}' is listed more than once; entries would share a cache key.",
						credential.access_key()
					),
				});
			}
		}

		if self.servers.iter().all(|server| server.trim().is_empty()) {
			return Err(Error::Validation {
				field: "servers",
				reason: "At least one memcached server is required.".into(),
			});
		}
		if self.ttl < MIN_TTL {
			return Err(Error::Validation {
				field: "ttl",
				reason: format!("Must be at least {MIN_TTL:?}."),
			});
		}
		if self.ttl > MAX_RELATIVE_TTL {
			return Err(Error::Validation {
				field: "ttl",
				reason: format!("Must not exceed {MAX_RELATIVE_TTL:?}."),
			});
		}
		if self.cache_timeout.is_zero() {
			return Err(Error::Validation {
				field: "cache_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}

fn default_servers() -> Vec<String> {
	vec![DEFAULT_SERVER.into()]
}

fn default_ttl() -> Duration {
	DEFAULT_TTL
}

fn default_listen() -> SocketAddr {
	SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cache_timeout() -> Duration {
	crate::cache::memcached::DEFAULT_TIMEOUT
}
