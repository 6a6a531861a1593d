//! Verifier configuration and validation.
//!
//! Configuration is read once at start-up, either programmatically or from environment-style
//! variables, and is immutable afterwards.

// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, cache::DEFAULT_CACHE_TTL};

/// Environment variable holding the expected token issuer.
pub const ENV_ISSUER: &str = "AUTH_ISSUER";
/// Environment variable overriding the JWKS endpoint.
pub const ENV_JWKS_URL: &str = "AUTH_JWKS_URL";
/// Environment variable holding the expected audience.
pub const ENV_AUDIENCE: &str = "AUTH_AUDIENCE";
/// Environment variable holding a static RSA public key (PEM).
pub const ENV_PUBLIC_KEY: &str = "AUTH_PUBLIC_KEY";
/// Environment variable holding the key set cache TTL in seconds.
pub const ENV_CACHE_TTL_SECONDS: &str = "AUTH_JWKS_CACHE_TTL_SECONDS";
/// Environment variable holding the JWKS fetch timeout in seconds.
pub const ENV_FETCH_TIMEOUT_SECONDS: &str = "AUTH_JWKS_FETCH_TIMEOUT_SECONDS";
/// Environment variable holding the expiry leeway in seconds.
pub const ENV_LEEWAY_SECONDS: &str = "AUTH_LEEWAY_SECONDS";
/// Environment variable holding the `WWW-Authenticate` realm.
pub const ENV_REALM: &str = "AUTH_REALM";
/// Environment variable holding comma-separated public path prefixes.
pub const ENV_PUBLIC_PATHS: &str = "AUTH_PUBLIC_PATHS";

/// Default JWKS fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default size guard for JWKS responses (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Default realm advertised in `WWW-Authenticate` challenges.
pub const DEFAULT_REALM: &str = "api";
/// Path prefixes the request gate skips by default.
pub const DEFAULT_PUBLIC_PATHS: [&str; 4] = ["/health/", "/ready/", "/admin/", "/api/"];

const WELL_KNOWN_JWKS: &str = "/.well-known/jwks.json";

/// Settings shared by the resolver, verifier, and request adapters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifierConfig {
	/// Expected `iss` claim; empty disables the issuer check.
	#[serde(default)]
	pub issuer: String,
	/// JWKS endpoint; derived from the issuer when omitted.
	#[serde(default)]
	pub jwks_url: Option<Url>,
	/// Expected `aud` claim; empty disables the audience check.
	#[serde(default)]
	pub audience: String,
	/// Static RSA public key (PEM) that replaces JWKS resolution entirely.
	#[serde(default)]
	pub public_key_pem: Option<String>,
	/// Time-to-live of a fetched key set.
	#[serde(default = "default_cache_ttl")]
	pub cache_ttl: Duration,
	/// Timeout for the single JWKS fetch attempt.
	#[serde(default = "default_fetch_timeout")]
	pub fetch_timeout: Duration,
	/// Maximum size accepted for JWKS payloads in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Tolerance applied to `exp` checks.
	#[serde(default)]
	pub leeway: Duration,
	/// Service name advertised in the `WWW-Authenticate` challenge.
	#[serde(default = "default_realm")]
	pub realm: String,
	/// Path prefixes exempted from the request gate.
	#[serde(default = "default_public_paths")]
	pub public_paths: Vec<String>,
}
impl VerifierConfig {
	/// Configuration for an issuer, with the JWKS endpoint at its well-known location.
	pub fn new(issuer: impl Into<String>) -> Result<Self> {
		let issuer = issuer.into();
		let jwks_url = derive_jwks_url(&issuer)?;

		Ok(Self {
			issuer,
			jwks_url,
			audience: String::new(),
			public_key_pem: None,
			cache_ttl: DEFAULT_CACHE_TTL,
			fetch_timeout: DEFAULT_FETCH_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			leeway: Duration::ZERO,
			realm: DEFAULT_REALM.into(),
			public_paths: default_public_paths(),
		})
	}

	/// Load configuration from process environment variables.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Load configuration through an arbitrary variable lookup.
	///
	/// Blank values are treated as unset.
	pub fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let mut config = Self::new(var(ENV_ISSUER).unwrap_or_default())?;

		if let Some(url) = var(ENV_JWKS_URL) {
			config.jwks_url = Some(Url::parse(&url)?);
		}
		if let Some(audience) = var(ENV_AUDIENCE) {
			config.audience = audience;
		}
		if let Some(pem) = var(ENV_PUBLIC_KEY) {
			config.public_key_pem = Some(pem);
		}
		if let Some(secs) = var(ENV_CACHE_TTL_SECONDS) {
			config.cache_ttl = parse_seconds("cache_ttl", &secs)?;
		}
		if let Some(secs) = var(ENV_FETCH_TIMEOUT_SECONDS) {
			config.fetch_timeout = parse_seconds("fetch_timeout", &secs)?;
		}
		if let Some(secs) = var(ENV_LEEWAY_SECONDS) {
			config.leeway = parse_seconds("leeway", &secs)?;
		}
		if let Some(realm) = var(ENV_REALM) {
			config.realm = realm;
		}
		if let Some(paths) = lookup(ENV_PUBLIC_PATHS) {
			config.public_paths = paths
				.split(',')
				.map(str::trim)
				.filter(|path| !path.is_empty())
				.map(str::to_owned)
				.collect();
		}

		config.validate()?;

		Ok(config)
	}

	/// Set the expected audience.
	pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
		self.audience = audience.into();

		self
	}

	/// Point key resolution at an explicit JWKS endpoint.
	pub fn with_jwks_url(mut self, url: impl AsRef<str>) -> Result<Self> {
		self.jwks_url = Some(Url::parse(url.as_ref())?);

		Ok(self)
	}

	/// Use a static RSA public key instead of the JWKS endpoint.
	pub fn with_public_key_pem(mut self, pem: impl Into<String>) -> Self {
		self.public_key_pem = Some(pem.into());

		self
	}

	/// Override the key set cache TTL.
	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.cache_ttl = ttl;

		self
	}

	/// Override the JWKS fetch timeout.
	pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
		self.fetch_timeout = timeout;

		self
	}

	/// Override the `WWW-Authenticate` realm.
	pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
		self.realm = realm.into();

		self
	}

	/// Replace the request gate's public path prefixes.
	pub fn with_public_paths<I, S>(mut self, paths: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.public_paths = paths.into_iter().map(Into::into).collect();

		self
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.public_key_pem.is_none() && self.jwks_url.is_none() {
			return Err(Error::Validation {
				field: "jwks_url",
				reason: "Required when no static public key is configured.".into(),
			});
		}
		if let Some(url) = &self.jwks_url
			&& url.host_str().is_none()
		{
			return Err(Error::Validation {
				field: "jwks_url",
				reason: "Must include a host component.".into(),
			});
		}
		if self.cache_ttl < Duration::from_secs(1) {
			return Err(Error::Validation {
				field: "cache_ttl",
				reason: "Must be at least 1 second.".into(),
			});
		}
		if self.fetch_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "fetch_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.realm.is_empty() || self.realm.contains(['"', '\\']) || !self.realm.is_ascii() {
			return Err(Error::Validation {
				field: "realm",
				reason: "Must be non-empty ASCII without quotes or backslashes.".into(),
			});
		}
		if let Some(path) = self.public_paths.iter().find(|path| !path.starts_with('/')) {
			return Err(Error::Validation {
				field: "public_paths",
				reason: format!("Prefix '{path}' must start with '/'."),
			});
		}

		Ok(())
	}
}

fn derive_jwks_url(issuer: &str) -> Result<Option<Url>> {
	let issuer = issuer.trim_end_matches('/');

	if issuer.is_empty() {
		return Ok(None);
	}

	Ok(Some(Url::parse(&format!("{issuer}{WELL_KNOWN_JWKS}"))?))
}

fn parse_seconds(field: &'static str, raw: &str) -> Result<Duration> {
	raw.parse::<u64>().map(Duration::from_secs).map_err(|err| Error::Validation {
		field,
		reason: format!("Expected a whole number of seconds, got '{raw}': {err}."),
	})
}

fn default_cache_ttl() -> Duration {
	DEFAULT_CACHE_TTL
}

fn default_fetch_timeout() -> Duration {
	DEFAULT_FETCH_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}

fn default_realm() -> String {
	DEFAULT_REALM.into()
}

fn default_public_paths() -> Vec<String> {
	DEFAULT_PUBLIC_PATHS.iter().map(|path| (*path).to_owned()).collect()
}
