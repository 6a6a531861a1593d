//! Maps a token's `kid` to a verification key.
//!
//! Resolution prefers the configured static key, then the cached key set, then a single
//! on-demand fetch. When that fetch fails the last known key set is served instead, so an
//! identity provider outage only hurts once the resolver has never seen a key set.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{JwksDocument, KeySetCache},
	config::VerifierConfig,
	error::ResolveError,
	http::client::{build_client, fetch_jwks},
	metrics::{self, LookupOutcome, VerifierMetrics, VerifierMetricsSnapshot},
};

/// Where a resolved key came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
	/// Configured static public key.
	Static,
	/// Fresh cached key set.
	Cached,
	/// Key set fetched for this request.
	Fetched,
	/// Expired key set served after a failed fetch.
	Stale,
}

/// Verification key selected for a token.
#[derive(Clone)]
pub struct ResolvedKey {
	/// Key to verify the signature with.
	pub key: DecodingKey,
	/// `kid` the key was matched on; `None` for the static key.
	pub kid: Option<String>,
	/// Origin of the key.
	pub source: KeySource,
}
impl Debug for ResolvedKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("ResolvedKey")
			.field("kid", &self.kid)
			.field("source", &self.source)
			.finish_non_exhaustive()
	}
}

/// Coarse state of the resolver's key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySetState {
	/// A static key is configured; the cache is unused.
	Static,
	/// No key set has been fetched yet.
	Empty,
	/// The cached key set is within its TTL.
	Fresh,
	/// The cached key set has expired and is only kept as a fallback.
	Stale,
}

/// Serializable status snapshot for health and diagnostics endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct KeySetStatus {
	/// Current state.
	pub state: KeySetState,
	/// Configured JWKS endpoint.
	pub jwks_url: Option<Url>,
	/// Number of entries in the cached key set.
	pub key_count: usize,
	/// Wall-clock time the cached key set was stored.
	pub fetched_at: Option<DateTime<Utc>>,
	/// Wall-clock expiry of the cached key set.
	pub expires_at: Option<DateTime<Utc>>,
	/// Share of lookups served from a fresh key set.
	pub hit_rate: f64,
	/// Share of lookups served from an expired key set.
	pub stale_ratio: f64,
	/// Share of verifications that were rejected.
	pub rejection_rate: f64,
	/// Raw counters.
	pub metrics: VerifierMetricsSnapshot,
}

/// Resolves verification keys for incoming tokens.
///
/// Owns its [`KeySetCache`]; share the resolver through an `Arc` rather than building one per
/// request.
pub struct KeyResolver {
	jwks_url: Option<Url>,
	static_key: Option<DecodingKey>,
	client: Client,
	cache: Arc<KeySetCache>,
	// Error of the latest refill attempt, `None` after a success.
	refill: Mutex<Option<String>>,
	refill_attempts: AtomicU64,
	fetch_timeout: Duration,
	max_response_bytes: u64,
	realm: Arc<str>,
	metrics: Arc<VerifierMetrics>,
}
impl KeyResolver {
	/// Build a resolver with the default HTTP client.
	pub fn new(config: &VerifierConfig) -> Result<Self> {
		Self::with_client(config, build_client(config)?)
	}

	/// Build a resolver using the supplied HTTP client.
	pub fn with_client(config: &VerifierConfig, client: Client) -> Result<Self> {
		config.validate()?;

		let static_key = config
			.public_key_pem
			.as_deref()
			.map(|pem| DecodingKey::from_rsa_pem(pem.as_bytes()))
			.transpose()?;

		if static_key.is_some() {
			tracing::info!(realm = %config.realm, "using static public key; jwks disabled");
		}

		Ok(Self {
			jwks_url: config.jwks_url.clone(),
			static_key,
			client,
			cache: Arc::new(KeySetCache::new(config.cache_ttl)),
			refill: Mutex::new(None),
			refill_attempts: AtomicU64::new(0),
			fetch_timeout: config.fetch_timeout,
			max_response_bytes: config.max_response_bytes,
			realm: Arc::from(config.realm.as_str()),
			metrics: VerifierMetrics::new(),
		})
	}

	/// Key set cache owned by this resolver.
	pub fn cache(&self) -> &Arc<KeySetCache> {
		&self.cache
	}

	/// Counters shared by this resolver and the verifier built on it.
	pub fn metrics(&self) -> Arc<VerifierMetrics> {
		self.metrics.clone()
	}

	/// Drop the cached key set so the next resolution fetches a fresh one.
	pub async fn clear_cache(&self) {
		self.cache.clear().await;
	}

	/// Select the verification key for `token`.
	#[tracing::instrument(skip_all, fields(realm = %self.realm))]
	pub async fn resolve(&self, token: &str) -> std::result::Result<ResolvedKey, ResolveError> {
		if let Some(key) = &self.static_key {
			return Ok(ResolvedKey { key: key.clone(), kid: None, source: KeySource::Static });
		}

		let header = jsonwebtoken::decode_header(token)
			.map_err(|err| ResolveError::MalformedHeader(err.to_string()))?;
		let kid = header.kid.ok_or(ResolveError::NoKeyId)?;
		let (document, source) = self.active_document().await?;
		let Some(entry) = document.find(&kid) else {
			tracing::debug!(kid = %kid, keys = document.len(), "no matching kid");

			return Err(ResolveError::UnknownKeyId(kid));
		};
		let key = entry.decoding_key()?;

		tracing::debug!(kid = %kid, ?source, "resolved key");

		Ok(ResolvedKey { key, kid: Some(kid), source })
	}

	/// Capture the current key material state.
	pub async fn status(&self) -> KeySetStatus {
		let metrics = self.metrics.snapshot();
		let cached = self.cache.last_known().await;
		let state = match (&self.static_key, &cached) {
			(Some(_), _) => KeySetState::Static,
			(None, None) => KeySetState::Empty,
			(None, Some(cached)) if cached.is_expired(Instant::now()) => KeySetState::Stale,
			(None, Some(_)) => KeySetState::Fresh,
		};

		KeySetStatus {
			state,
			jwks_url: self.jwks_url.clone(),
			key_count: cached.as_ref().map_or(0, |cached| cached.document.len()),
			fetched_at: cached.as_ref().map(|cached| cached.fetched_at),
			expires_at: cached.as_ref().map(|cached| cached.expires_at_utc),
			hit_rate: metrics.hit_rate(),
			stale_ratio: metrics.stale_ratio(),
			rejection_rate: metrics.rejection_rate(),
			metrics,
		}
	}

	async fn active_document(
		&self,
	) -> std::result::Result<(Arc<JwksDocument>, KeySource), ResolveError> {
		if let Some(cached) = self.cache.get().await {
			self.observe_lookup(LookupOutcome::Fresh);

			return Ok((cached.document, KeySource::Cached));
		}

		let observed = self.refill_attempts.load(Ordering::Acquire);
		let mut last_failure = self.refill.lock().await;

		// Another task may have refilled while this one waited.
		if let Some(cached) = self.cache.get().await {
			self.observe_lookup(LookupOutcome::Fresh);

			return Ok((cached.document, KeySource::Cached));
		}
		// A refill that failed while this task waited is reused, not repeated.
		if self.refill_attempts.load(Ordering::Acquire) != observed
			&& let Some(failure) = last_failure.as_deref()
		{
			tracing::debug!(error = %failure, "reusing failed jwks refill");
			metrics::record_shared_refill_failure(&self.realm);

			self.metrics.record_shared_refill_failure();

			return self.fall_back(failure).await;
		}

		let Some(url) = &self.jwks_url else {
			self.observe_lookup(LookupOutcome::Unavailable);

			return Err(ResolveError::Unavailable("no JWKS endpoint configured".into()));
		};
		let outcome = self.fetch_and_store(url).await;

		self.refill_attempts.fetch_add(1, Ordering::Release);

		match outcome {
			Ok(document) => {
				*last_failure = None;

				self.observe_lookup(LookupOutcome::Fetched);

				Ok((document, KeySource::Fetched))
			},
			Err(err) => {
				let failure: &str = last_failure.insert(err.to_string());

				tracing::warn!(error = %failure, "jwks fetch failed");

				self.fall_back(failure).await
			},
		}
	}

	async fn fall_back(
		&self,
		failure: &str,
	) -> std::result::Result<(Arc<JwksDocument>, KeySource), ResolveError> {
		match self.cache.last_known().await {
			Some(stale) => {
				tracing::warn!("serving stale key set");

				self.observe_lookup(LookupOutcome::Stale);

				Ok((stale.document, KeySource::Stale))
			},
			None => {
				tracing::error!(error = %failure, "no cached key set to fall back to");

				self.observe_lookup(LookupOutcome::Unavailable);

				Err(ResolveError::Unavailable(failure.to_owned()))
			},
		}
	}

	async fn fetch_and_store(&self, url: &Url) -> Result<Arc<JwksDocument>> {
		match fetch_jwks(&self.client, url, self.fetch_timeout, self.max_response_bytes).await {
			Ok(fetch) => {
				self.observe_fetch_success(fetch.elapsed);
				self.cache.set(fetch.document.clone()).await;

				Ok(fetch.document)
			},
			Err(err) => {
				self.observe_fetch_error();

				Err(err)
			},
		}
	}

	fn observe_lookup(&self, outcome: LookupOutcome) {
		metrics::record_lookup(&self.realm, outcome);

		self.metrics.record_lookup(outcome);
	}

	fn observe_fetch_success(&self, duration: Duration) {
		metrics::record_fetch_success(&self.realm, duration);

		self.metrics.record_fetch_success(duration);
	}

	fn observe_fetch_error(&self) {
		metrics::record_fetch_error(&self.realm);

		self.metrics.record_fetch_error();
	}
}
impl Debug for KeyResolver {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("KeyResolver")
			.field("jwks_url", &self.jwks_url)
			.field("static_key", &self.static_key.is_some())
			.field("cache", &self.cache)
			.field("fetch_timeout", &self.fetch_timeout)
			.field("realm", &self.realm)
			.finish_non_exhaustive()
	}
}
