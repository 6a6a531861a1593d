//! Thread-safe key set cache with a fixed time-to-live.

// crates.io
use tokio::sync::RwLock;
// self
use crate::{
	_prelude::*,
	cache::state::{CachedKeySet, JwksDocument},
};

/// Default time-to-live applied to cached key sets.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Holds the most recently fetched key set and its expiry.
///
/// The document and its deadline live behind one lock and are replaced together, so readers
/// always observe a complete snapshot. An expired snapshot stays retained for stale fallback
/// until it is overwritten or [`KeySetCache::clear`] is called.
#[derive(Debug)]
pub struct KeySetCache {
	ttl: Duration,
	slot: RwLock<Option<CachedKeySet>>,
}
impl KeySetCache {
	/// Create an empty cache with the given TTL.
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, slot: RwLock::new(None) }
	}

	/// Configured time-to-live.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Fresh key set, if one is cached and not yet expired.
	pub async fn get(&self) -> Option<CachedKeySet> {
		self.get_at(Instant::now()).await
	}

	/// Fresh key set as observed at `now`.
	pub async fn get_at(&self, now: Instant) -> Option<CachedKeySet> {
		let slot = self.slot.read().await;

		match slot.as_ref() {
			Some(cached) if !cached.is_expired(now) => Some(cached.clone()),
			Some(_) => {
				tracing::debug!("jwks cache expired");

				None
			},
			None => None,
		}
	}

	/// Retained key set regardless of expiry.
	pub async fn last_known(&self) -> Option<CachedKeySet> {
		self.slot.read().await.clone()
	}

	/// Store a key set, overwriting any previous value.
	pub async fn set(&self, document: Arc<JwksDocument>) -> CachedKeySet {
		self.set_at(document, Instant::now()).await
	}

	/// Store a key set as written at `now`.
	pub async fn set_at(&self, document: Arc<JwksDocument>, now: Instant) -> CachedKeySet {
		let cached = CachedKeySet::new(document, now, self.ttl);

		*self.slot.write().await = Some(cached.clone());

		tracing::debug!(
			expires_at = %cached.expires_at_utc,
			keys = cached.document.len(),
			"jwks cache set"
		);

		cached
	}

	/// Drop the cached key set, including the retained fallback.
	pub async fn clear(&self) {
		*self.slot.write().await = None;

		tracing::debug!("jwks cache cleared");
	}
}
impl Default for KeySetCache {
	fn default() -> Self {
		Self::new(DEFAULT_CACHE_TTL)
	}
}
