//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure error: configuration, HTTP plumbing, and JWKS retrieval.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("JWKS fetch from {url} failed: {source}")]
	JwksFetchFailed {
		url: url::Url,
		#[source]
		source: reqwest::Error,
	},
	#[error("Malformed JWKS document: {0}")]
	MalformedJwks(#[source] serde_json::Error),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}

/// Why a verification key could not be resolved for a token.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
	#[error("Token header has no 'kid'")]
	NoKeyId,
	#[error("Token header could not be decoded: {0}")]
	MalformedHeader(String),
	#[error("No matching key found for kid: {0}")]
	UnknownKeyId(String),
	#[error("Failed to construct key: {0}")]
	KeyConstructionFailed(String),
	#[error("JWKS unavailable and no cached key set exists: {0}")]
	Unavailable(String),
}
impl ResolveError {
	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::NoKeyId => "no_key_id",
			Self::MalformedHeader(_) => "malformed_token",
			Self::UnknownKeyId(_) => "unknown_key_id",
			Self::KeyConstructionFailed(_) => "key_construction_failed",
			Self::Unavailable(_) => "jwks_unavailable",
		}
	}
}

/// Reason attached to an `Invalid` verification outcome or an authentication rejection.
///
/// `Display` carries the diagnostic detail for logs; [`RejectReason::public_message`] is the
/// text suitable for callers.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
	#[error("No token provided")]
	NoToken,
	#[error("Malformed Authorization header")]
	MalformedAuthorizationHeader,
	#[error("Invalid token: {0}")]
	MalformedToken(String),
	#[error("Could not find public key for token: {0}")]
	KeyResolution(#[from] ResolveError),
	#[error("Signature verification failed")]
	BadSignature,
	#[error("Token has expired")]
	Expired,
	#[error("Invalid claims: {0}")]
	BadClaims(String),
}
impl RejectReason {
	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::NoToken => "no_token",
			Self::MalformedAuthorizationHeader => "malformed_authorization_header",
			Self::MalformedToken(_) => "malformed_token",
			Self::KeyResolution(err) => err.code(),
			Self::BadSignature => "bad_signature",
			Self::Expired => "expired",
			Self::BadClaims(_) => "bad_claims",
		}
	}

	/// Message safe to return to the caller; omits key identifiers and upstream details.
	pub fn public_message(&self) -> &'static str {
		match self {
			Self::NoToken => "No token provided",
			Self::MalformedAuthorizationHeader => "Malformed Authorization header",
			Self::MalformedToken(_) | Self::BadSignature => "Invalid token",
			Self::KeyResolution(_) => "Could not find public key for token",
			Self::Expired => "Token has expired",
			Self::BadClaims(_) => "Invalid claims",
		}
	}
}
