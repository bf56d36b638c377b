//! Cache prewarmer for the Swift s3token middleware: keeps EC2 credential payloads from
//! Keystone warm in memcached, so request authorization never waits on Keystone.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod credential;
pub mod metrics;
pub mod payload;
pub mod provider;
pub mod reconcile;
pub mod scheduler;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
// Binary-only crates.
use clap as _;
use humantime as _;
use tracing_subscriber as _;

pub use crate::{
	cache::{CacheBackend, CacheClient, CacheItem},
	config::PrewarmConfig,
	credential::CredentialId,
	error::{Error, Result},
	metrics::{PrewarmMetrics, PrewarmSnapshot, install_exporter},
	payload::CredentialPayload,
	provider::{IdentityProvider, ProviderLookup},
	reconcile::{Outcome, Reconciler, SkipReason},
	scheduler::{PassReport, Scheduler},
};
