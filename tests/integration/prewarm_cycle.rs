//! End-to-end prewarm passes against a mock Keystone and an in-memory cache.

// std
use std::{borrow::Borrow, time::Duration};
// crates.io
use chrono::Utc;
use metrics_util::{
	CompositeKey, MetricKind,
	debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};
use s3_cache_prewarmer::{
	CacheClient, CacheItem, CredentialId, CredentialPayload, PassReport, PrewarmConfig,
	PrewarmMetrics, Reconciler, Result, Scheduler,
	cache::{SWIFT_JSON_FLAG, memory::MemoryBackend},
	metrics::METRIC_LAST_RUN_SECS,
	provider::keystone::{KeystoneClient, KeystoneSettings, SUBJECT_TOKEN_HEADER},
};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

type TestScheduler = Scheduler<KeystoneClient, MemoryBackend>;

async fn keystone() -> MockServer {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/v3/auth/tokens"))
		.respond_with(
			ResponseTemplate::new(201)
				.insert_header(SUBJECT_TOKEN_HEADER, "service-token")
				.set_body_json(json!({ "token": { "catalog": [] } })),
		)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/v3/users/alice/credentials/OS-EC2/AK1"))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(json!({ "credential": { "secret": "s1" } })),
		)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/v3/users/bob/credentials/OS-EC2/AK2"))
		.respond_with(ResponseTemplate::new(404))
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/v3/ec2tokens"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"token": {
				"roles": [{ "id": "r1", "name": "member" }, { "id": "r2", "name": "reader" }],
				"user": {
					"domain": { "id": "default", "name": "Default" },
					"id": "alice-id",
					"name": "alice"
				},
				"project": {
					"domain": { "id": "default", "name": "Default" },
					"id": "p-1",
					"name": "alice-project"
				}
			}
		})))
		.mount(&server)
		.await;

	server
}

async fn setup(
	server: &MockServer,
	conservative: bool,
) -> Result<(TestScheduler, MemoryBackend, Snapshotter)> {
	let mut config = PrewarmConfig::new(CredentialId::parse_all(["alice:AK1", "bob:AK2"])?);

	config.ttl = Duration::from_secs(300);
	config.conservative = conservative;
	config.validate()?;

	let settings =
		KeystoneSettings::new(format!("{}/v3", server.uri()), "prewarmer", "hunter2", "service")?;
	let provider = KeystoneClient::connect(settings).await?;
	let backend = MemoryBackend::new();
	let recorder = DebuggingRecorder::new();
	let snapshotter = recorder.snapshotter();
	let metrics =
		metrics::with_local_recorder(&recorder, || PrewarmMetrics::new(&config.credentials));
	let reconciler = Reconciler::new(provider, CacheClient::new(backend.clone()), config.ttl);

	Ok((Scheduler::new(reconciler, &config, metrics), backend, snapshotter))
}

fn capture(snapshotter: &Snapshotter) -> Vec<(CompositeKey, DebugValue)> {
	snapshotter
		.snapshot()
		.into_vec()
		.into_iter()
		.map(|(key, _, _, value)| (key, value))
		.collect()
}

fn exported_last_run(snapshot: &[(CompositeKey, DebugValue)], user_id: &str) -> Option<f64> {
	snapshot.iter().find_map(|(key, value)| {
		let matches = key.kind() == MetricKind::Gauge
			&& Borrow::<str>::borrow(key.key().name()) == METRIC_LAST_RUN_SECS
			&& key.key().labels().any(|label| label.key() == "userid" && label.value() == user_id);

		match value {
			DebugValue::Gauge(value) if matches => Some(value.into_inner()),
			_ => None,
		}
	})
}

#[tokio::test]
async fn one_pass_warms_known_credentials_only() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = keystone().await;
	let (scheduler, backend, snapshotter) = setup(&server, false).await?;
	let alice = CredentialId::parse("alice:AK1")?;
	let bob = CredentialId::parse("bob:AK2")?;

	assert_eq!(scheduler.cycle(), Duration::from_secs(60));

	scheduler.metrics().mark_pending();

	let started = Utc::now().timestamp() as f64;
	let report = scheduler.run_pass().await;
	let finished = Utc::now().timestamp() as f64;

	assert_eq!(report, PassReport { written: 1, skipped: 1, failed: 0 });

	let entry = backend.entry(&alice.cache_key()).expect("alice is cached");
	let payload: CredentialPayload = serde_json::from_slice(&entry.item.value)?;

	assert_eq!(alice.cache_key(), "571a51a459acffa1084d8ba4c1542a7f");
	assert_eq!(entry.ttl, Duration::from_secs(300));
	assert_eq!(entry.item.flags, SWIFT_JSON_FLAG);
	assert_eq!(payload.secret, "s1");
	assert_eq!(payload.headers["X-Roles"], "member,reader");
	assert!(backend.entry(&bob.cache_key()).is_none());

	let snapshot = capture(&snapshotter);
	let alice_last_run = exported_last_run(&snapshot, "alice").expect("alice gauge");

	assert!(started <= alice_last_run && alice_last_run <= finished);
	assert!(alice_last_run > 0.0);
	assert_eq!(exported_last_run(&snapshot, "bob"), Some(0.0));
	assert_eq!(
		scheduler.metrics().snapshot(&bob).map(|snapshot| snapshot.last_run_secs),
		Some(Some(0.0))
	);

	Ok(())
}

#[tokio::test]
async fn conservative_pass_keeps_conflicting_entries() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = keystone().await;
	let (scheduler, backend, _) = setup(&server, true).await?;
	let alice = CredentialId::parse("alice:AK1")?;
	let foreign = br#"[{"X-Roles":"admin"},{"domain":{"id":"","name":""},"id":"","name":""},"other"]"#;

	backend.insert(
		&alice.cache_key(),
		CacheItem { value: foreign.to_vec(), flags: SWIFT_JSON_FLAG },
		Duration::from_secs(300),
	);
	scheduler.metrics().mark_pending();

	let report = scheduler.run_pass().await;

	assert_eq!(report, PassReport { written: 0, skipped: 2, failed: 0 });
	assert_eq!(backend.writes(), 0);
	assert_eq!(backend.entry(&alice.cache_key()).expect("still cached").item.value, foreign);
	assert_eq!(
		scheduler.metrics().snapshot(&alice).and_then(|snapshot| snapshot.last_run_secs),
		Some(0.0)
	);

	Ok(())
}

#[tokio::test]
async fn conservative_pass_refreshes_reordered_roles() -> Result<()> {
	let server = keystone().await;
	let (scheduler, backend, _) = setup(&server, true).await?;
	let alice = CredentialId::parse("alice:AK1")?;

	scheduler.run_pass().await;

	let entry = backend.entry(&alice.cache_key()).expect("alice is cached");
	let mut payload: CredentialPayload = serde_json::from_slice(&entry.item.value)?;

	payload.headers.insert("X-Roles".into(), "reader,member".into());
	backend.insert(
		&alice.cache_key(),
		CacheItem { value: serde_json::to_vec(&payload)?, flags: SWIFT_JSON_FLAG },
		Duration::from_secs(30),
	);

	let report = scheduler.run_pass().await;

	assert_eq!(report.written, 1);
	assert_eq!(backend.writes(), 2);
	assert_eq!(
		backend.entry(&alice.cache_key()).expect("refreshed").ttl,
		Duration::from_secs(300)
	);

	Ok(())
}
