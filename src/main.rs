//! Command-line entry point: prewarm loop plus read-only diagnostics for Keystone and
//! memcached.

// std
use std::{env, io, net::SocketAddr, process::ExitCode, time::Duration};
// crates.io
use clap::{Args, Parser, Subcommand};
use s3_cache_prewarmer::{
	CacheClient, CredentialId, Error, PrewarmConfig, PrewarmMetrics, ProviderLookup, Reconciler,
	Result, Scheduler,
	cache::memcached::MemcachedBackend,
	config::{DEFAULT_LISTEN, DEFAULT_SERVER},
	install_exporter,
	payload::CredentialPayload,
	provider::{
		self,
		keystone::{KeystoneClient, KeystoneSettings},
	},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Keep Swift s3token credential payloads prewarmed in memcached.
#[derive(Debug, Parser)]
#[command(name = "s3-cache-prewarmer", version, about, long_about = None)]
struct Cli {
	#[command(flatten)]
	keystone: KeystoneArgs,
	/// Memcached servers as `host:port`, comma separated.
	#[arg(short, long, global = true, value_delimiter = ',', default_value = DEFAULT_SERVER)]
	servers: Vec<String>,
	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Keep the given credentials prewarmed until interrupted.
	Prewarm(PrewarmArgs),
	/// Print the payloads Keystone produces for the given credentials.
	CheckKeystone(CredentialArgs),
	/// Print the payloads memcached holds for the given credentials.
	CheckMemcached(CredentialArgs),
}

#[derive(Debug, Args)]
struct CredentialArgs {
	/// Credentials as `userid:accesskey`.
	#[arg(value_name = "USERID:ACCESSKEY", required = true)]
	credentials: Vec<String>,
}
impl CredentialArgs {
	fn parse(&self) -> Result<Vec<CredentialId>> {
		CredentialId::parse_all(&self.credentials)
	}
}

#[derive(Debug, Args)]
struct PrewarmArgs {
	#[command(flatten)]
	credentials: CredentialArgs,
	/// Leave cache entries alone when they conflict with Keystone.
	#[arg(long)]
	conservative: bool,
	/// Expiry of cache entries (`90s`, `10m`, `1m30s`, `1h`); entries are refreshed five times
	/// per expiry.
	#[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
	expiry: Duration,
	/// Listen address for the Prometheus metrics endpoint.
	#[arg(long, default_value = DEFAULT_LISTEN)]
	listen: SocketAddr,
}

#[derive(Debug, Args)]
struct KeystoneArgs {
	/// Keystone v3 URL.
	#[arg(long = "os-auth-url", env = "OS_AUTH_URL", global = true)]
	auth_url: Option<String>,
	/// Service user name.
	#[arg(long = "os-username", env = "OS_USERNAME", global = true)]
	username: Option<String>,
	/// Service user password.
	#[arg(long = "os-password", env = "OS_PASSWORD", global = true, hide_env_values = true)]
	password: Option<String>,
	/// Domain of the service user.
	#[arg(
		long = "os-user-domain-name",
		env = "OS_USER_DOMAIN_NAME",
		global = true,
		default_value = "Default"
	)]
	user_domain_name: String,
	/// Project to scope the service token to.
	#[arg(long = "os-project-name", env = "OS_PROJECT_NAME", global = true)]
	project_name: Option<String>,
	/// Domain of the scope project.
	#[arg(
		long = "os-project-domain-name",
		env = "OS_PROJECT_DOMAIN_NAME",
		global = true,
		default_value = "Default"
	)]
	project_domain_name: String,
	/// Catalog interface of the identity endpoint.
	#[arg(long = "os-interface", env = "OS_INTERFACE", global = true, default_value = "public")]
	interface: String,
	/// Catalog region of the identity endpoint.
	#[arg(long = "os-region-name", env = "OS_REGION_NAME", global = true)]
	region_name: Option<String>,
}
impl KeystoneArgs {
	fn settings(&self) -> Result<KeystoneSettings> {
		let mut settings = KeystoneSettings::new(
			required(&self.auth_url, "OS_AUTH_URL")?,
			required(&self.username, "OS_USERNAME")?,
			required(&self.password, "OS_PASSWORD")?,
			required(&self.project_name, "OS_PROJECT_NAME")?,
		)?;

		settings.user_domain_name = self.user_domain_name.clone();
		settings.project_domain_name = self.project_domain_name.clone();
		settings.interface = self.interface.clone();
		settings.region_name = self.region_name.clone();
		// An intercepting debug proxy presents its own certificate.
		settings.insecure = env::var("HTTPS_PROXY").is_ok_and(|proxy| !proxy.is_empty());

		Ok(settings)
	}
}

#[tokio::main]
async fn main() -> ExitCode {
	init_tracing();

	let cli = Cli::parse();

	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			tracing::error!(error = %err, "exiting");

			ExitCode::FAILURE
		},
	}
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
	let Cli { keystone, servers, command } = cli;

	match command {
		Command::Prewarm(args) => prewarm(&keystone, servers, args).await,
		Command::CheckKeystone(args) => check_keystone(&keystone, &args).await,
		Command::CheckMemcached(args) => check_memcached(&servers, &args).await,
	}
}

async fn prewarm(keystone: &KeystoneArgs, servers: Vec<String>, args: PrewarmArgs) -> Result<()> {
	let mut config = PrewarmConfig::new(args.credentials.parse()?);

	config.servers = servers;
	config.ttl = args.expiry;
	config.conservative = args.conservative;
	config.listen = args.listen;
	config.validate()?;

	let provider = KeystoneClient::connect(keystone.settings()?).await?;
	let backend = MemcachedBackend::new(&config.servers)?.with_timeout(config.cache_timeout);

	install_exporter(config.listen)?;

	let metrics = PrewarmMetrics::new(&config.credentials);
	let reconciler = Reconciler::new(provider, CacheClient::new(backend), config.ttl);
	let scheduler = Scheduler::new(reconciler, &config, metrics);
	let cancel = CancellationToken::new();

	tokio::spawn({
		let cancel = cancel.clone();

		async move {
			match tokio::signal::ctrl_c().await {
				Ok(()) => {
					tracing::info!("interrupted; stopping after the current pass");

					cancel.cancel();
				},
				Err(err) => tracing::warn!(error = %err, "cannot listen for Ctrl-C"),
			}
		}
	});

	scheduler.run(cancel).await;

	Ok(())
}

async fn check_keystone(keystone: &KeystoneArgs, args: &CredentialArgs) -> Result<()> {
	let credentials = args.parse()?;
	let client = KeystoneClient::connect(keystone.settings()?).await?;

	for credential in &credentials {
		let payload = match provider::fetch(&client, credential).await? {
			ProviderLookup::Found(payload) => Some(payload),
			ProviderLookup::NotFound | ProviderLookup::AuthRejected => None,
		};

		print_payload(credential, payload.as_ref())?;
	}

	Ok(())
}

async fn check_memcached(servers: &[String], args: &CredentialArgs) -> Result<()> {
	let credentials = args.parse()?;
	let cache = CacheClient::new(MemcachedBackend::new(servers)?);

	for credential in &credentials {
		print_payload(credential, cache.get(credential).await?.as_ref())?;
	}

	Ok(())
}

fn print_payload(credential: &CredentialId, payload: Option<&CredentialPayload>) -> Result<()> {
	let rendered = serde_json::to_string_pretty(&serde_json::json!({
		"credential": credential,
		"cache_key": credential.cache_key(),
		"payload": payload,
	}))?;

	println!("{rendered}");

	Ok(())
}

fn required<'a>(value: &'a Option<String>, variable: &'static str) -> Result<&'a str> {
	value.as_deref().ok_or_else(|| Error::Validation {
		field: variable,
		reason: format!("Set {variable} or pass the matching --os-* option."),
	})
}
