//! Integration tests for Keystone lookups against a mock identity service.

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use s3_cache_prewarmer::{
	CredentialId, Error, ProviderLookup, Result,
	provider::{
		fetch,
		keystone::{KeystoneClient, KeystoneSettings, SUBJECT_TOKEN_HEADER},
	},
};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{body_partial_json, header, method, path},
};

const ALICE_SIGNATURE: &str = "FmlPaoihknNos6sMhf16LIEr8gEMXxODedgLRyFpUtY=";
const CAROL_SIGNATURE: &str = "o4so4qch4UgAdKykIwFc0rkL5ZOquQGW7G7jMSUe1a8=";

fn settings(server: &MockServer) -> KeystoneSettings {
	KeystoneSettings::new(format!("{}/v3", server.uri()), "prewarmer", "hunter2", "service")
		.expect("settings")
}

fn cred(raw: &str) -> CredentialId {
	CredentialId::parse(raw).expect("valid pair")
}

fn service_token(identity_url: &str) -> Value {
	json!({
		"token": {
			"expires_at": "2030-01-01T00:00:00.000000Z",
			"catalog": [
				{ "type": "identity", "endpoints": [
					{ "interface": "admin", "region_id": "RegionOne", "url": "http://unused.invalid/v3" },
					{ "interface": "public", "region_id": "RegionOne", "url": identity_url }
				]}
			]
		}
	})
}

fn token_response(token: &str, identity_url: &str) -> ResponseTemplate {
	ResponseTemplate::new(201)
		.insert_header(SUBJECT_TOKEN_HEADER, token)
		.set_body_json(service_token(identity_url))
}

fn ec2_credential(secret: &str) -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(json!({
		"credential": { "access": "ignored", "secret": secret, "user_id": "ignored" }
	}))
}

fn alice_token() -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(json!({
		"token": {
			"methods": ["ec2credential"],
			"roles": [
				{ "id": "r-member", "name": "member" },
				{ "id": "r-admin", "name": "admin" }
			],
			"user": {
				"domain": { "id": "default", "name": "Default" },
				"id": "alice-id",
				"name": "alice"
			},
			"project": {
				"domain": { "id": "d-1", "name": "Customers" },
				"id": "p-1",
				"name": "alice-project"
			}
		}
	}))
}

async fn mount_identity(server: &MockServer) {
	let identity = format!("{}/identity/v3", server.uri());

	Mock::given(method("POST"))
		.and(path("/v3/auth/tokens"))
		.and(body_partial_json(json!({
			"auth": { "identity": { "password": { "user": { "name": "prewarmer" } } } }
		})))
		.respond_with(token_response("token-1", &identity))
		.expect(1)
		.mount(server)
		.await;
	Mock::given(method("GET"))
		.and(path("/identity/v3/users/alice/credentials/OS-EC2/AK1"))
		.and(header("X-Auth-Token", "token-1"))
		.respond_with(ec2_credential("s1"))
		.mount(server)
		.await;
	Mock::given(method("GET"))
		.and(path("/identity/v3/users/bob/credentials/OS-EC2/AK2"))
		.respond_with(ResponseTemplate::new(404))
		.mount(server)
		.await;
	Mock::given(method("GET"))
		.and(path("/identity/v3/users/carol/credentials/OS-EC2/AK3"))
		.respond_with(ec2_credential("s3"))
		.mount(server)
		.await;
	Mock::given(method("GET"))
		.and(path("/identity/v3/users/dave/credentials/OS-EC2/AK4"))
		.respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
		.mount(server)
		.await;
	Mock::given(method("POST"))
		.and(path("/identity/v3/ec2tokens"))
		.and(body_partial_json(json!({
			"credentials": { "access": "AK1", "signature": ALICE_SIGNATURE }
		})))
		.respond_with(alice_token())
		.mount(server)
		.await;
	Mock::given(method("POST"))
		.and(path("/identity/v3/ec2tokens"))
		.and(body_partial_json(json!({
			"credentials": { "access": "AK3", "signature": CAROL_SIGNATURE }
		})))
		.respond_with(ResponseTemplate::new(401))
		.mount(server)
		.await;
}

#[tokio::test]
async fn builds_payload_from_catalog_endpoint() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_identity(&server).await;

	let client = KeystoneClient::connect(settings(&server)).await?;

	assert_eq!(client.endpoint().as_str(), format!("{}/identity/v3", server.uri()));

	let ProviderLookup::Found(payload) = fetch(&client, &cred("alice:AK1")).await? else {
		panic!("alice should be found");
	};

	assert_eq!(payload.secret, "s1");
	assert_eq!(payload.headers["X-Identity-Status"], "Confirmed");
	assert_eq!(payload.headers["X-Roles"], "member,admin");
	assert_eq!(payload.headers["X-User-Id"], "alice-id");
	assert_eq!(payload.headers["X-User-Name"], "alice");
	assert_eq!(payload.headers["X-User-Domain-Id"], "default");
	assert_eq!(payload.headers["X-Tenant-Id"], "p-1");
	assert_eq!(payload.headers["X-Project-Name"], "alice-project");
	assert_eq!(payload.headers["X-Project-Domain-Name"], "Customers");
	assert_eq!(payload.project.id, "p-1");
	assert_eq!(payload.project.domain.id, "d-1");

	let encoded = serde_json::to_value(&payload)?;

	assert_eq!(encoded[1]["name"], "alice-project");
	assert_eq!(encoded[2], "s1");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn maps_missing_and_rejected_credentials_to_absent() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_identity(&server).await;

	let client = KeystoneClient::connect(settings(&server)).await?;

	assert!(matches!(fetch(&client, &cred("bob:AK2")).await?, ProviderLookup::NotFound));
	assert!(matches!(fetch(&client, &cred("carol:AK3")).await?, ProviderLookup::AuthRejected));

	Ok(())
}

#[tokio::test]
async fn surfaces_unexpected_statuses() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_identity(&server).await;

	let client = KeystoneClient::connect(settings(&server)).await?;
	let err = fetch(&client, &cred("dave:AK4")).await.expect_err("500 is not an absent signal");

	match err {
		Error::Keystone { status, url, body } => {
			assert_eq!(status.as_u16(), 500);
			assert!(url.path().ends_with("/users/dave/credentials/OS-EC2/AK4"));
			assert_eq!(body.as_deref(), Some("database unavailable"));
		},
		other => panic!("unexpected error: {other:?}"),
	}

	Ok(())
}

#[tokio::test]
async fn reauthenticates_once_when_the_service_token_expires() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let issued = Arc::new(AtomicUsize::new(0));
	let identity = format!("{}/v3", server.uri());

	Mock::given(method("POST"))
		.and(path("/v3/auth/tokens"))
		.respond_with({
			let issued = issued.clone();

			move |_: &Request| {
				let n = issued.fetch_add(1, Ordering::SeqCst) + 1;

				token_response(&format!("token-{n}"), &identity)
			}
		})
		.expect(2)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/v3/users/alice/credentials/OS-EC2/AK1"))
		.and(header("X-Auth-Token", "token-1"))
		.respond_with(ResponseTemplate::new(401))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/v3/users/alice/credentials/OS-EC2/AK1"))
		.and(header("X-Auth-Token", "token-2"))
		.respond_with(ec2_credential("s1"))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/v3/ec2tokens"))
		.respond_with(alice_token())
		.mount(&server)
		.await;

	let client = KeystoneClient::connect(settings(&server)).await?;

	assert!(matches!(fetch(&client, &cred("alice:AK1")).await?, ProviderLookup::Found(_)));
	assert_eq!(issued.load(Ordering::SeqCst), 2);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn falls_back_to_auth_url_without_catalog_match() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/v3/auth/tokens"))
		.respond_with(
			ResponseTemplate::new(201)
				.insert_header(SUBJECT_TOKEN_HEADER, "token-1")
				.set_body_json(json!({ "token": { "catalog": [] } })),
		)
		.mount(&server)
		.await;

	let client = KeystoneClient::connect(settings(&server)).await?;

	assert_eq!(client.endpoint().as_str(), format!("{}/v3", server.uri()));

	Ok(())
}

#[tokio::test]
async fn rejected_service_login_fails_startup() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/v3/auth/tokens"))
		.respond_with(ResponseTemplate::new(401))
		.mount(&server)
		.await;

	assert!(matches!(
		KeystoneClient::connect(settings(&server)).await,
		Err(Error::Keystone { status, .. }) if status.as_u16() == 401
	));
}
