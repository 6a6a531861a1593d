//! Key set documents and the cached snapshot that carries their freshness window.

// crates.io
use jsonwebtoken::{DecodingKey, jwk::Jwk};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
// self
use crate::{_prelude::*, error::ResolveError};

/// JWKS document as published by the identity provider.
///
/// Entries are kept as raw JSON objects and only interpreted when a token selects them, so an
/// entry using an unsupported key type does not invalidate the rest of the document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JwksDocument {
	/// Key entries in document order.
	#[serde(default)]
	pub keys: Vec<JwkEntry>,
}
impl JwksDocument {
	/// First entry whose `kid` equals the supplied identifier.
	pub fn find(&self, kid: &str) -> Option<&JwkEntry> {
		self.keys.iter().find(|entry| entry.kid() == Some(kid))
	}

	/// Number of entries in the document.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Whether the document carries no entries.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}
}

/// A single JWKS entry, preserved verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwkEntry(Map<String, Value>);
impl JwkEntry {
	/// Key identifier, when the entry carries a string `kid`.
	pub fn kid(&self) -> Option<&str> {
		self.0.get("kid").and_then(Value::as_str)
	}

	/// Raw JSON members of the entry.
	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}

	/// Build a verification key from the entry's key material.
	pub fn decoding_key(&self) -> std::result::Result<DecodingKey, ResolveError> {
		let jwk: Jwk = serde_json::from_value(Value::Object(self.0.clone()))
			.map_err(|err| ResolveError::KeyConstructionFailed(err.to_string()))?;

		DecodingKey::from_jwk(&jwk)
			.map_err(|err| ResolveError::KeyConstructionFailed(err.to_string()))
	}
}
impl From<Map<String, Value>> for JwkEntry {
	fn from(raw: Map<String, Value>) -> Self {
		Self(raw)
	}
}

/// Key set snapshot stored in the cache.
#[derive(Clone, Debug)]
pub struct CachedKeySet {
	/// Document retained for key lookup.
	pub document: Arc<JwksDocument>,
	/// Monotonic deadline after which the snapshot is a logical miss.
	pub expires_at: Instant,
	/// Wall-clock time the snapshot was written.
	pub fetched_at: DateTime<Utc>,
	/// Wall-clock rendering of `expires_at`.
	pub expires_at_utc: DateTime<Utc>,
}
impl CachedKeySet {
	/// Stamp a document written at `now` with the given TTL.
	pub fn new(document: Arc<JwksDocument>, now: Instant, ttl: Duration) -> Self {
		let fetched_at = Utc::now();
		let expires_at_utc = TimeDelta::from_std(ttl)
			.ok()
			.and_then(|delta| fetched_at.checked_add_signed(delta))
			.unwrap_or(DateTime::<Utc>::MAX_UTC);

		Self { document, expires_at: now + ttl, fetched_at, expires_at_utc }
	}

	/// Whether the snapshot is past its freshness window at `now`.
	pub fn is_expired(&self, now: Instant) -> bool {
		now > self.expires_at
	}
}
