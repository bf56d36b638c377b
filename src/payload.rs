//! Credential payloads as stored in memcached for the Swift s3token middleware.
//!
//! The stored representation is a JSON array `[headers, project, secret]`. Equality between
//! two payloads is domain aware: the role list in [`ROLES_HEADER`] is a set whose order
//! Keystone does not guarantee, so [`payloads_equal`] compares that one header
//! order-insensitively and everything else exactly.

// std
use std::collections::{BTreeMap, HashMap};
// crates.io
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Header carrying the comma-separated role list.
pub const ROLES_HEADER: &str = "X-Roles";

/// Keystone domain reference embedded in users and projects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Domain {
	/// Domain ID.
	pub id: String,
	/// Domain name.
	pub name: String,
}

/// Keystone project the credential is scoped to.
///
/// Field order matches the serialization the s3token middleware has always been fed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
	/// Owning domain.
	pub domain: Domain,
	/// Project ID.
	pub id: String,
	/// Project name.
	pub name: String,
}

/// Payload written into memcached for a single EC2 credential.
#[derive(Clone, Debug, Default)]
pub struct CredentialPayload {
	/// Identity headers injected into authorized requests.
	pub headers: BTreeMap<String, String>,
	/// Project the credential is scoped to.
	pub project: Project,
	/// EC2 secret used by the middleware to verify request signatures.
	pub secret: String,
}
impl CredentialPayload {
	/// Compare against another payload, ignoring the order of roles in [`ROLES_HEADER`].
	pub fn is_equivalent(&self, other: &Self) -> bool {
		payloads_equal(self, other, ROLES_HEADER)
	}
}
impl Serialize for CredentialPayload {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		(&self.headers, &self.project, &self.secret).serialize(serializer)
	}
}
impl<'de> Deserialize<'de> for CredentialPayload {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let (headers, project, secret) =
			<(BTreeMap<String, String>, Project, String)>::deserialize(deserializer)?;

		Ok(Self { headers, project, secret })
	}
}

/// Compare two payloads exactly, except that the header named `unordered_header` is treated
/// as a comma-separated set.
///
/// Both header maps must have the same keys; a missing or extra header is a difference.
pub fn payloads_equal(
	lhs: &CredentialPayload,
	rhs: &CredentialPayload,
	unordered_header: &str,
) -> bool {
	if lhs.project != rhs.project || lhs.secret != rhs.secret {
		return false;
	}
	if lhs.headers.len() != rhs.headers.len() {
		return false;
	}

	lhs.headers.iter().all(|(name, value)| match rhs.headers.get(name) {
		None => false,
		Some(other) if name == unordered_header =>
			sort_comma_separated_like(other, value) == sort_comma_separated_like(value, value),
		Some(other) => other == value,
	})
}

/// Reorder the fields of `input` to follow their order in `reference`.
///
/// Fields are ranked by their first position in `reference`; fields that do not occur there
/// go last. Equal ranks fall back to lexical order, so the result is deterministic for
/// duplicates and unknown fields alike. When `input` holds the same multiset of fields as
/// `reference`, the result is exactly `reference`.
pub fn sort_comma_separated_like(input: &str, reference: &str) -> String {
	let mut index = HashMap::new();

	for (position, field) in reference.split(',').enumerate() {
		index.entry(field).or_insert(position);
	}

	let mut fields = input.split(',').collect::<Vec<_>>();

	fields.sort_by(|a, b| {
		let rank_a = index.get(a).copied().unwrap_or(usize::MAX);
		let rank_b = index.get(b).copied().unwrap_or(usize::MAX);

		rank_a.cmp(&rank_b).then_with(|| a.cmp(b))
	});

	fields.join(",")
}
