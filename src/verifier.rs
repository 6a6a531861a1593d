//! RS256 token verification against resolved keys.
//!
//! Verification checks, in order: a token is present, a key resolves for it, the signature
//! matches under RS256, `exp` lies in the future, and `iss`/`aud` match the configured
//! expectations when those are non-empty. Every failure is a typed [`RejectReason`]; nothing on
//! this path panics or propagates as an infrastructure error.

// crates.io
use jsonwebtoken::{
	Algorithm, Validation,
	errors::{Error as JwtError, ErrorKind},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*, config::VerifierConfig, error::RejectReason, metrics, principal::Principal,
	resolver::KeyResolver,
};

/// Verified claim set, preserved verbatim.
///
/// Named claims have typed accessors; any other claim stays reachable through
/// [`TokenClaims::get`] and [`TokenClaims::as_map`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenClaims(Map<String, Value>);
impl TokenClaims {
	/// Subject identifier (`sub`).
	pub fn subject(&self) -> Option<&str> {
		self.str_claim("sub")
	}

	/// Email claim.
	pub fn email(&self) -> Option<&str> {
		self.str_claim("email")
	}

	/// Role claim.
	pub fn role(&self) -> Option<&str> {
		self.str_claim("role")
	}

	/// Issuer (`iss`).
	pub fn issuer(&self) -> Option<&str> {
		self.str_claim("iss")
	}

	/// Audience values; `aud` may be a single string or an array.
	pub fn audience(&self) -> Vec<&str> {
		match self.0.get("aud") {
			Some(Value::String(aud)) => vec![aud.as_str()],
			Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
			_ => Vec::new(),
		}
	}

	/// Issued-at instant (`iat`).
	pub fn issued_at(&self) -> Option<DateTime<Utc>> {
		self.time_claim("iat")
	}

	/// Expiry instant (`exp`).
	pub fn expires_at(&self) -> Option<DateTime<Utc>> {
		self.time_claim("exp")
	}

	/// Any claim by name.
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	/// The full claim map.
	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}

	/// Consume into the full claim map.
	pub fn into_map(self) -> Map<String, Value> {
		self.0
	}

	fn str_claim(&self, name: &str) -> Option<&str> {
		self.0.get(name).and_then(Value::as_str)
	}

	fn time_claim(&self, name: &str) -> Option<DateTime<Utc>> {
		let value = self.0.get(name)?;
		let secs = value.as_i64().or_else(|| value.as_f64().map(|secs| secs as i64))?;

		DateTime::from_timestamp(secs, 0)
	}
}
impl From<Map<String, Value>> for TokenClaims {
	fn from(claims: Map<String, Value>) -> Self {
		Self(claims)
	}
}

/// Result of verifying one token.
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationOutcome {
	/// Signature and claims checked out.
	Valid(TokenClaims),
	/// Verification failed for the given reason.
	Invalid(RejectReason),
}
impl VerificationOutcome {
	/// Whether the token verified.
	pub fn is_valid(&self) -> bool {
		matches!(self, Self::Valid(_))
	}

	/// Failure reason, if any.
	pub fn reason(&self) -> Option<&RejectReason> {
		match self {
			Self::Valid(_) => None,
			Self::Invalid(reason) => Some(reason),
		}
	}

	/// Convert into a `Result`.
	pub fn into_result(self) -> std::result::Result<TokenClaims, RejectReason> {
		match self {
			Self::Valid(claims) => Ok(claims),
			Self::Invalid(reason) => Err(reason),
		}
	}

	/// Convert into a principal on success.
	pub fn into_principal(self) -> std::result::Result<Principal, RejectReason> {
		self.into_result().map(Principal::from_claims)
	}
}

/// Verifies bearer tokens issued by the configured identity provider.
#[derive(Debug)]
pub struct TokenVerifier {
	resolver: Arc<KeyResolver>,
	validation: Validation,
	realm: Arc<str>,
}
impl TokenVerifier {
	/// Build a verifier together with its resolver and key set cache.
	pub fn from_config(config: &VerifierConfig) -> Result<Self> {
		let resolver = KeyResolver::new(config)?;

		Ok(Self::new(config, Arc::new(resolver)))
	}

	/// Build a verifier over an existing resolver.
	pub fn new(config: &VerifierConfig, resolver: Arc<KeyResolver>) -> Self {
		let realm = Arc::from(config.realm.as_str());

		Self { resolver, validation: build_validation(config), realm }
	}

	/// Key resolver used by this verifier.
	pub fn resolver(&self) -> &Arc<KeyResolver> {
		&self.resolver
	}

	/// Realm advertised in challenges and used as the metrics label.
	pub fn realm(&self) -> &str {
		&self.realm
	}

	/// Verify a token and return the claims or the reason it was rejected.
	#[tracing::instrument(skip_all, fields(realm = %self.realm))]
	pub async fn verify(&self, token: &str) -> VerificationOutcome {
		let outcome = self.verify_inner(token.trim()).await;

		match &outcome {
			VerificationOutcome::Valid(claims) => {
				tracing::debug!(sub = claims.subject().unwrap_or_default(), "token verified");
				metrics::record_verification(&self.realm, None);

				self.resolver.metrics().record_verification(None);
			},
			VerificationOutcome::Invalid(reason) => {
				tracing::debug!(reason = reason.code(), detail = %reason, "token rejected");
				metrics::record_verification(&self.realm, Some(reason.code()));

				self.resolver.metrics().record_verification(Some(reason));
			},
		}

		outcome
	}

	async fn verify_inner(&self, token: &str) -> VerificationOutcome {
		if token.is_empty() {
			return VerificationOutcome::Invalid(RejectReason::NoToken);
		}

		let resolved = match self.resolver.resolve(token).await {
			Ok(resolved) => resolved,
			Err(err) => return VerificationOutcome::Invalid(err.into()),
		};

		match jsonwebtoken::decode::<TokenClaims>(token, &resolved.key, &self.validation) {
			Ok(data) => VerificationOutcome::Valid(data.claims),
			Err(err) => VerificationOutcome::Invalid(classify(err)),
		}
	}
}

fn build_validation(config: &VerifierConfig) -> Validation {
	let mut validation = Validation::new(Algorithm::RS256);

	validation.leeway = config.leeway.as_secs();
	validation.validate_exp = true;

	if config.issuer.is_empty() {
		validation.iss = None;
	} else {
		validation.set_issuer(&[config.issuer.as_str()]);
	}
	if config.audience.is_empty() {
		validation.validate_aud = false;
	} else {
		validation.set_audience(&[config.audience.as_str()]);
	}

	validation
}

fn classify(err: JwtError) -> RejectReason {
	match err.kind() {
		ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => RejectReason::BadSignature,
		ErrorKind::ExpiredSignature => RejectReason::Expired,
		ErrorKind::InvalidIssuer
		| ErrorKind::InvalidAudience
		| ErrorKind::InvalidSubject
		| ErrorKind::ImmatureSignature
		| ErrorKind::MissingRequiredClaim(_) => RejectReason::BadClaims(err.to_string()),
		_ => RejectReason::MalformedToken(err.to_string()),
	}
}
