//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the cache prewarmer.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Corrupt cache entry under key '{key}': {reason}")]
	CorruptEntry { key: String, reason: String },
	#[error("Cannot parse userid:accesskey pair: {0:?}")]
	InvalidCredential(String),
	#[error("Keystone returned HTTP status {status} from {url}: {body:?}")]
	Keystone { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("Memcached error: {0}")]
	Memcached(String),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
