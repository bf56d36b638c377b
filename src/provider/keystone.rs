//! Keystone v3 client implementing [`IdentityProvider`].
//!
//! The client password-authenticates once at startup, picks the identity endpoint from the
//! service catalog, and re-authenticates transparently when the service token expires.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use http::StatusCode;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use url::Url;
// self
use crate::{
	_prelude::*,
	credential::CredentialId,
	provider::{AuthContext, IdentityProvider, signature},
};

/// Header carrying the service token on requests and responses.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
/// Header in which Keystone returns a freshly issued token.
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Connection settings, usually taken from the standard `OS_*` environment variables.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeystoneSettings {
	/// Keystone v3 URL used for password authentication.
	pub auth_url: Url,
	/// Service user name.
	pub username: String,
	/// Service user password.
	pub password: String,
	/// Domain of the service user.
	#[serde(default = "default_domain")]
	pub user_domain_name: String,
	/// Project to scope the service token to.
	pub project_name: String,
	/// Domain of the scope project.
	#[serde(default = "default_domain")]
	pub project_domain_name: String,
	/// Catalog interface to select the identity endpoint from.
	#[serde(default = "default_interface")]
	pub interface: String,
	/// Catalog region to select the identity endpoint from, if any.
	#[serde(default)]
	pub region_name: Option<String>,
	/// Skip TLS certificate verification; only meant for debugging behind a proxy.
	#[serde(default)]
	pub insecure: bool,
}
impl KeystoneSettings {
	/// Settings with default domains and the public interface.
	pub fn new(
		auth_url: impl AsRef<str>,
		username: impl Into<String>,
		password: impl Into<String>,
		project_name: impl Into<String>,
	) -> Result<Self> {
		Ok(Self {
			auth_url: Url::parse(auth_url.as_ref())?,
			username: username.into(),
			password: password.into(),
			user_domain_name: default_domain(),
			project_name: project_name.into(),
			project_domain_name: default_domain(),
			interface: default_interface(),
			region_name: None,
			insecure: false,
		})
	}

	/// Validate the settings before any request is made.
	pub fn validate(&self) -> Result<()> {
		if !matches!(self.auth_url.scheme(), "http" | "https") {
			return Err(Error::Validation {
				field: "auth_url",
				reason: "Must be an http or https URL.".into(),
			});
		}

		for (field, value) in [
			("username", &self.username),
			("password", &self.password),
			("user_domain_name", &self.user_domain_name),
			("project_name", &self.project_name),
			("project_domain_name", &self.project_domain_name),
			("interface", &self.interface),
		] {
			if value.trim().is_empty() {
				return Err(Error::Validation { field, reason: "Must not be empty.".into() });
			}
		}

		Ok(())
	}
}
impl Debug for KeystoneSettings {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("KeystoneSettings")
			.field("auth_url", &self.auth_url.as_str())
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("user_domain_name", &self.user_domain_name)
			.field("project_name", &self.project_name)
			.field("project_domain_name", &self.project_domain_name)
			.field("interface", &self.interface)
			.field("region_name", &self.region_name)
			.field("insecure", &self.insecure)
			.finish()
	}
}

/// Authenticated Keystone v3 client.
pub struct KeystoneClient {
	client: Client,
	settings: KeystoneSettings,
	endpoint: Url,
	token: RwLock<String>,
}
impl KeystoneClient {
	/// Build an HTTP client for the settings and authenticate.
	pub async fn connect(settings: KeystoneSettings) -> Result<Self> {
		let mut builder = Client::builder()
			.user_agent(format!("s3-cache-prewarmer/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.timeout(Duration::from_secs(30));

		if settings.insecure {
			tracing::warn!("TLS certificate verification is disabled for Keystone requests");

			builder = builder.danger_accept_invalid_certs(true);
		}

		Self::with_client(settings, builder.build()?).await
	}

	/// Authenticate using the supplied HTTP client (primarily for tests).
	pub async fn with_client(settings: KeystoneSettings, client: Client) -> Result<Self> {
		settings.validate()?;

		let (token, catalog) = authenticate(&client, &settings).await?;
		let endpoint = match select_endpoint(
			&catalog,
			&settings.interface,
			settings.region_name.as_deref(),
		)? {
			Some(endpoint) => endpoint,
			None => {
				tracing::debug!("no identity endpoint in catalog; using auth_url");

				settings.auth_url.clone()
			},
		};

		tracing::info!(endpoint = %endpoint, "connected to Keystone");

		Ok(Self { client, settings, endpoint, token: RwLock::new(token) })
	}

	/// Identity endpoint selected from the catalog.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	async fn reauthenticate(&self) -> Result<()> {
		let (token, _) = authenticate(&self.client, &self.settings).await?;

		*self.token.write().await = token;

		tracing::debug!("renewed Keystone service token");

		Ok(())
	}
}
impl Debug for KeystoneClient {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("KeystoneClient")
			.field("settings", &self.settings)
			.field("endpoint", &self.endpoint.as_str())
			.finish_non_exhaustive()
	}
}
impl IdentityProvider for KeystoneClient {
	async fn credential_secret(&self, credential: &CredentialId) -> Result<Option<String>> {
		let url = join_segments(
			&self.endpoint,
			&["users", credential.user_id(), "credentials", "OS-EC2", credential.access_key()],
		)?;
		let mut renewed = false;

		loop {
			let token = self.token.read().await.clone();
			let response =
				self.client.get(url.clone()).header(AUTH_TOKEN_HEADER, token).send().await?;

			match response.status() {
				StatusCode::NOT_FOUND => return Ok(None),
				StatusCode::UNAUTHORIZED if !renewed => {
					renewed = true;

					self.reauthenticate().await?;
				},
				status if status.is_success() => {
					let envelope = response.json::<CredentialEnvelope>().await?;

					return Ok(Some(envelope.credential.secret));
				},
				_ => return Err(status_error(url, response).await),
			}
		}
	}

	async fn authorize(&self, access_key: &str, secret: &str) -> Result<Option<AuthContext>> {
		let signed = signature::sign_v2(access_key, secret)?;
		let url = join_segments(&self.endpoint, &["ec2tokens"])?;
		let body = json!({
			"credentials": {
				"access": access_key,
				"host": signed.host,
				"verb": signed.verb,
				"path": signed.path,
				"params": signed.params,
				"headers": {},
				"signature": signed.signature,
			}
		});
		let response = self.client.post(url.clone()).json(&body).send().await?;

		match response.status() {
			StatusCode::UNAUTHORIZED => Ok(None),
			status if status.is_success() => {
				let envelope = response.json::<TokenEnvelope<AuthContext>>().await?;

				Ok(Some(envelope.token))
			},
			_ => Err(status_error(url, response).await),
		}
	}
}

#[derive(Debug, Deserialize)]
struct CredentialEnvelope {
	credential: Ec2Credential,
}

#[derive(Debug, Deserialize)]
struct Ec2Credential {
	secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope<T> {
	token: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceToken {
	catalog: Vec<CatalogService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogService {
	#[serde(rename = "type")]
	kind: String,
	endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogEndpoint {
	interface: String,
	region: Option<String>,
	region_id: Option<String>,
	url: String,
}

async fn authenticate(
	client: &Client,
	settings: &KeystoneSettings,
) -> Result<(String, Vec<CatalogService>)> {
	let url = join_segments(&settings.auth_url, &["auth", "tokens"])?;
	let body = json!({
		"auth": {
			"identity": {
				"methods": ["password"],
				"password": {
					"user": {
						"name": settings.username,
						"password": settings.password,
						"domain": { "name": settings.user_domain_name },
					}
				}
			},
			"scope": {
				"project": {
					"name": settings.project_name,
					"domain": { "name": settings.project_domain_name },
				}
			}
		}
	});
	let response = client.post(url.clone()).json(&body).send().await?;

	if !response.status().is_success() {
		return Err(status_error(url, response).await);
	}

	let token = response
		.headers()
		.get(SUBJECT_TOKEN_HEADER)
		.and_then(|value| value.to_str().ok())
		.map(ToOwned::to_owned)
		.ok_or_else(|| Error::Validation {
			field: "X-Subject-Token",
			reason: "Keystone did not return a token.".into(),
		})?;
	let envelope = response.json::<TokenEnvelope<ServiceToken>>().await?;

	Ok((token, envelope.token.catalog))
}

fn select_endpoint(
	catalog: &[CatalogService],
	interface: &str,
	region: Option<&str>,
) -> Result<Option<Url>> {
	let endpoint = catalog
		.iter()
		.filter(|service| service.kind == "identity")
		.flat_map(|service| service.endpoints.iter())
		.find(|endpoint| {
			endpoint.interface == interface
				&& region.is_none_or(|region| {
					endpoint.region_id.as_deref() == Some(region)
						|| endpoint.region.as_deref() == Some(region)
				})
		});

	match endpoint {
		Some(endpoint) => Ok(Some(Url::parse(&endpoint.url)?)),
		None => Ok(None),
	}
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url> {
	let mut url = base.clone();

	url.path_segments_mut()
		.map_err(|_| Error::Validation {
			field: "endpoint",
			reason: "Must be a hierarchical URL.".into(),
		})?
		.pop_if_empty()
		.extend(segments);

	Ok(url)
}

async fn status_error(url: Url, response: Response) -> Error {
	let status = response.status();
	let body = response.text().await.ok();

	Error::Keystone { status, url, body }
}

fn default_domain() -> String {
	"Default".into()
}

fn default_interface() -> String {
	"public".into()
}
