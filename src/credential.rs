//! EC2 credential identities managed by the prewarmer.

// std
use std::{
	collections::BTreeMap,
	fmt::{Display, Formatter, Result as FmtResult},
	str::FromStr,
};
// crates.io
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Namespace prefix the Swift s3token middleware uses for its memcached keys.
pub const CACHE_KEY_NAMESPACE: &str = "s3secret/";

/// Identifies one EC2 credential by its owning user and its access key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialId {
	user_id: String,
	access_key: String,
}
impl CredentialId {
	/// Parse a `userid:accesskey` pair, trimming whitespace around both fields.
	pub fn parse(raw: &str) -> Result<Self> {
		let mut fields = raw.split(':');
		let (Some(user_id), Some(access_key), None) = (fields.next(), fields.next(), fields.next())
		else {
			return Err(Error::InvalidCredential(raw.into()));
		};
		let user_id = user_id.trim();
		let access_key = access_key.trim();

		if user_id.is_empty() || access_key.is_empty() {
			return Err(Error::InvalidCredential(raw.into()));
		}

		Ok(Self { user_id: user_id.into(), access_key: access_key.into() })
	}

	/// Parse every argument, failing on the first malformed pair.
	pub fn parse_all<I, S>(args: I) -> Result<Vec<Self>>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		args.into_iter().map(|arg| Self::parse(arg.as_ref())).collect()
	}

	/// Keystone user that owns the credential.
	pub fn user_id(&self) -> &str {
		&self.user_id
	}

	/// EC2 access key of the credential.
	pub fn access_key(&self) -> &str {
		&self.access_key
	}

	/// Memcached key under which the payload for this credential is stored.
	///
	/// Only the access key contributes, so the key stays stable if the owner is re-specified
	/// and across process restarts.
	pub fn cache_key(&self) -> String {
		let digest = Md5::digest(format!("{CACHE_KEY_NAMESPACE}{}", self.access_key));

		hex::encode(digest)
	}

	/// Telemetry labels identifying this credential, verbatim.
	pub fn as_labels(&self) -> BTreeMap<&'static str, String> {
		BTreeMap::from([("userid", self.user_id.clone()), ("accesskey", self.access_key.clone())])
	}
}
impl Display for CredentialId {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(f, "{}:{}", self.user_id, self.access_key)
	}
}
impl FromStr for CredentialId {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::parse(s)
	}
}
impl TryFrom<String> for CredentialId {
	type Error = Error;

	fn try_from(value: String) -> Result<Self> {
		Self::parse(&value)
	}
}
impl From<CredentialId> for String {
	fn from(value: CredentialId) -> Self {
		value.to_string()
	}
}
