//! EC2 signature version 2, as validated by Keystone's `ec2tokens` endpoint.

// std
use std::collections::BTreeMap;
// crates.io
use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
// self
use crate::_prelude::*;

type HmacSha256 = Hmac<Sha256>;

/// Signature method advertised in the signed parameters.
pub const SIGNATURE_METHOD: &str = "HmacSHA256";
/// Signature version advertised in the signed parameters.
pub const SIGNATURE_VERSION: &str = "2";

/// A request description signed with an EC2 secret.
#[derive(Clone, Debug)]
pub struct SignedRequest {
	/// HTTP verb of the signed request.
	pub verb: &'static str,
	/// Host of the signed request.
	pub host: String,
	/// Path of the signed request.
	pub path: String,
	/// Signed query parameters, including the signature metadata.
	pub params: BTreeMap<String, String>,
	/// Base64 HMAC-SHA256 signature.
	pub signature: String,
}

/// Sign an empty `GET /` request for `access_key`, which is all Keystone needs to prove
/// possession of the secret.
pub fn sign_v2(access_key: &str, secret: &str) -> Result<SignedRequest> {
	let params = BTreeMap::from([
		("AWSAccessKeyId".to_owned(), access_key.to_owned()),
		("SignatureMethod".to_owned(), SIGNATURE_METHOD.to_owned()),
		("SignatureVersion".to_owned(), SIGNATURE_VERSION.to_owned()),
	]);
	let (verb, host, path) = ("GET", String::new(), "/".to_owned());
	let string_to_sign = format!("{verb}\n{host}\n{path}\n{}", canonical_query(&params));
	let signature = hmac_base64(secret, &string_to_sign)?;

	Ok(SignedRequest { verb, host, path, params, signature })
}

/// Query string with keys in byte order and RFC 3986 encoding.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
	params
		.iter()
		.map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
		.collect::<Vec<_>>()
		.join("&")
}

fn hmac_base64(secret: &str, message: &str) -> Result<String> {
	let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|err| {
		Error::Validation { field: "secret", reason: format!("Unusable HMAC key: {err}.") }
	})?;

	mac.update(message.as_bytes());

	Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}
