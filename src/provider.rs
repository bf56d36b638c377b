//! Identity provider seam and payload assembly.
//!
//! [`IdentityProvider`] exposes the two Keystone operations the prewarmer needs; [`fetch`]
//! chains them and maps the recognised non-existence signals onto [`ProviderLookup`].

pub mod keystone;
pub mod signature;

// std
use std::{collections::BTreeMap, future::Future};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	credential::CredentialId,
	payload::{CredentialPayload, Domain, Project, ROLES_HEADER},
};

/// Role assignment returned with an authorization context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
	/// Role ID.
	pub id: String,
	/// Role name.
	pub name: String,
}

/// User the credential belongs to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
	/// Owning domain.
	pub domain: Domain,
	/// User ID.
	pub id: String,
	/// User name.
	pub name: String,
}

/// Authorization data obtained by logging in with an EC2 credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthContext {
	/// Roles in provider-returned order.
	pub roles: Vec<Role>,
	/// User the credential belongs to.
	pub user: User,
	/// Project the credential is scoped to.
	pub project: Project,
}

/// Result of asking the provider for a credential's payload.
#[derive(Clone, Debug)]
pub enum ProviderLookup {
	/// The credential exists and authorized successfully.
	Found(CredentialPayload),
	/// The provider does not know the credential.
	NotFound,
	/// The provider rejected a login with the credential.
	AuthRejected,
}

/// Source of authoritative credential data.
///
/// Both operations report the recognised non-existence conditions as `Ok(None)`; every other
/// failure is an `Err`.
pub trait IdentityProvider: Send + Sync {
	/// Look up the EC2 secret for a credential; `Ok(None)` when the provider has no such
	/// credential.
	fn credential_secret(
		&self,
		credential: &CredentialId,
	) -> impl Future<Output = Result<Option<String>>> + Send;

	/// Log in with an access key and secret; `Ok(None)` when the provider rejects the login.
	fn authorize(
		&self,
		access_key: &str,
		secret: &str,
	) -> impl Future<Output = Result<Option<AuthContext>>> + Send;
}

/// Fetch the payload for a credential from the provider.
pub async fn fetch<P>(provider: &P, credential: &CredentialId) -> Result<ProviderLookup>
where
	P: IdentityProvider,
{
	let Some(secret) = provider.credential_secret(credential).await? else {
		tracing::info!(credential = %credential, "credential not found in Keystone");

		return Ok(ProviderLookup::NotFound);
	};
	let Some(context) = provider.authorize(credential.access_key(), &secret).await? else {
		tracing::info!(credential = %credential, "authorization with credential failed");

		return Ok(ProviderLookup::AuthRejected);
	};

	Ok(ProviderLookup::Found(build_payload(context, secret)))
}

/// Assemble the payload the s3token middleware expects from an authorization context.
pub fn build_payload(context: AuthContext, secret: String) -> CredentialPayload {
	let AuthContext { roles, user, project } = context;
	let roles = roles.into_iter().map(|role| role.name).collect::<Vec<_>>().join(",");
	let headers = BTreeMap::from([
		("X-Identity-Status", "Confirmed".to_owned()),
		(ROLES_HEADER, roles),
		("X-User-Id", user.id),
		("X-User-Name", user.name),
		("X-User-Domain-Id", user.domain.id),
		("X-User-Domain-Name", user.domain.name),
		("X-Tenant-Id", project.id.clone()),
		("X-Tenant-Name", project.name.clone()),
		("X-Project-Id", project.id.clone()),
		("X-Project-Name", project.name.clone()),
		("X-Project-Domain-Id", project.domain.id.clone()),
		("X-Project-Domain-Name", project.domain.name.clone()),
	])
	.into_iter()
	.map(|(name, value)| (name.to_owned(), value))
	.collect();

	CredentialPayload { headers, project, secret }
}
