//! Memcached backend speaking the text protocol over tokio TCP.
//!
//! Keys are routed to one server by a stable hash, so prewarmer instances sharing a server
//! list agree on placement with each other. Readers hashing keys differently only find every
//! entry when a single server is configured. Each server keeps at most one pooled connection;
//! a connection that saw any error is dropped and redialled lazily.

// std
use std::future::Future;
// crates.io
use sha2::{Digest, Sha256};
use tokio::{
	io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
	net::TcpStream,
	sync::Mutex,
	time,
};
// self
use crate::{
	_prelude::*,
	cache::{CacheBackend, CacheItem, MAX_RELATIVE_TTL},
};

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest key memcached accepts.
pub const MAX_KEY_LENGTH: usize = 250;
/// Largest value accepted in a reply, memcached's default item size limit.
pub const MAX_VALUE_LENGTH: usize = 1024 * 1024;

type Connection = BufReader<TcpStream>;

/// Memcached client over one or more servers.
#[derive(Debug)]
pub struct MemcachedBackend {
	servers: Vec<Server>,
	timeout: Duration,
}
impl MemcachedBackend {
	/// Create a client for the given `host:port` endpoints. No connection is opened yet.
	pub fn new<I, S>(servers: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let servers = servers
			.into_iter()
			.map(Into::into)
			.map(|address: String| address.trim().to_owned())
			.filter(|address| !address.is_empty())
			.map(Server::new)
			.collect::<Vec<_>>();

		if servers.is_empty() {
			return Err(Error::Validation {
				field: "servers",
				reason: "At least one memcached server is required.".into(),
			});
		}

		Ok(Self { servers, timeout: DEFAULT_TIMEOUT })
	}

	/// Override the per-operation timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	fn server_for(&self, key: &str) -> &Server {
		let digest = Sha256::digest(key.as_bytes());
		let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

		&self.servers[hash as usize % self.servers.len()]
	}
}
impl CacheBackend for MemcachedBackend {
	async fn get(&self, key: &str) -> Result<Option<CacheItem>> {
		validate_key(key)?;

		self.server_for(key).get(key, self.timeout).await
	}

	async fn set(&self, key: &str, item: CacheItem, ttl: Duration) -> Result<()> {
		validate_key(key)?;

		if ttl > MAX_RELATIVE_TTL {
			return Err(Error::Validation {
				field: "ttl",
				reason: format!("Must not exceed {MAX_RELATIVE_TTL:?}."),
			});
		}

		self.server_for(key).set(key, &item, ttl.as_secs(), self.timeout).await
	}
}

#[derive(Debug)]
struct Server {
	address: String,
	connection: Mutex<Option<Connection>>,
}
impl Server {
	fn new(address: String) -> Self {
		Self { address, connection: Mutex::new(None) }
	}

	async fn get(&self, key: &str, timeout: Duration) -> Result<Option<CacheItem>> {
		let mut slot = self.connection.lock().await;
		let mut conn = self.checkout(slot.take(), timeout).await?;
		let result = self.within(timeout, "get", read_item(&mut conn, key)).await;

		if result.is_ok() {
			*slot = Some(conn);
		}

		result
	}

	async fn set(
		&self,
		key: &str,
		item: &CacheItem,
		exptime: u64,
		timeout: Duration,
	) -> Result<()> {
		let mut slot = self.connection.lock().await;
		let mut conn = self.checkout(slot.take(), timeout).await?;
		let result = self.within(timeout, "set", store_item(&mut conn, key, item, exptime)).await;

		if result.is_ok() {
			*slot = Some(conn);
		}

		result
	}

	async fn checkout(&self, pooled: Option<Connection>, timeout: Duration) -> Result<Connection> {
		if let Some(conn) = pooled {
			return Ok(conn);
		}

		let connect = async { TcpStream::connect(self.address.as_str()).await.map_err(Error::from) };
		let stream = self.within(timeout, "connect", connect).await?;

		stream.set_nodelay(true)?;

		tracing::debug!(server = %self.address, "connected to memcached");

		Ok(BufReader::new(stream))
	}

	async fn within<T, F>(&self, timeout: Duration, op: &str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		time::timeout(timeout, fut).await.map_err(|_| {
			Error::Memcached(format!("{op} on {} timed out after {timeout:?}", self.address))
		})?
	}
}

async fn read_item(conn: &mut Connection, key: &str) -> Result<Option<CacheItem>> {
	conn.get_mut().write_all(format!("get {key}\r\n").as_bytes()).await?;

	let line = read_line(conn).await?;

	if line == "END" {
		return Ok(None);
	}

	let header = line.strip_prefix("VALUE ").ok_or_else(|| unexpected_reply(&line))?;
	let mut fields = header.split(' ');
	let (Some(_), Some(flags), Some(len)) = (fields.next(), fields.next(), fields.next()) else {
		return Err(unexpected_reply(&line));
	};
	let flags = flags.parse::<u32>().map_err(|_| unexpected_reply(&line))?;
	let len = len.parse::<usize>().map_err(|_| unexpected_reply(&line))?;

	if len > MAX_VALUE_LENGTH {
		return Err(Error::Memcached(format!(
			"Value of {len} bytes exceeds the {MAX_VALUE_LENGTH} byte item limit."
		)));
	}

	let block = len.checked_add(2).ok_or_else(|| unexpected_reply(&line))?;
	let mut value = vec![0; block];

	conn.read_exact(&mut value).await?;

	if !value.ends_with(b"\r\n") {
		return Err(Error::Memcached("Value block is not terminated by CRLF.".into()));
	}

	value.truncate(len);

	let trailer = read_line(conn).await?;

	if trailer != "END" {
		return Err(unexpected_reply(&trailer));
	}

	Ok(Some(CacheItem { value, flags }))
}

async fn store_item(
	conn: &mut Connection,
	key: &str,
	item: &CacheItem,
	exptime: u64,
) -> Result<()> {
	let mut command =
		format!("set {key} {} {exptime} {}\r\n", item.flags, item.value.len()).into_bytes();

	command.extend_from_slice(&item.value);
	command.extend_from_slice(b"\r\n");
	conn.get_mut().write_all(&command).await?;

	let line = read_line(conn).await?;

	if line == "STORED" { Ok(()) } else { Err(unexpected_reply(&line)) }
}

async fn read_line(conn: &mut Connection) -> Result<String> {
	let mut line = String::new();

	if conn.read_line(&mut line).await? == 0 {
		return Err(Error::Memcached("Connection closed by server.".into()));
	}

	Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn unexpected_reply(line: &str) -> Error {
	Error::Memcached(format!("Unexpected reply: {line:?}"))
}

fn validate_key(key: &str) -> Result<()> {
	if key.is_empty() || key.len() > MAX_KEY_LENGTH {
		return Err(Error::Validation {
			field: "key",
			reason: format!("Must be between 1 and {MAX_KEY_LENGTH} bytes."),
		});
	}
	if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
		return Err(Error::Validation {
			field: "key",
			reason: "Must not contain whitespace or control characters.".into(),
		});
	}

	Ok(())
}
