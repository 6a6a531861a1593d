//! Fail-closed bearer authentication for API routes.

// crates.io
use axum::{
	Json,
	extract::{Request, State},
	middleware::Next,
	response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderValue, StatusCode, header::WWW_AUTHENTICATE};
use serde::Serialize;
// self
use crate::{
	_prelude::*,
	config::VerifierConfig,
	error::RejectReason,
	middleware::{BearerToken, bearer_token},
	principal::Principal,
	verifier::TokenVerifier,
};

const AUTHENTICATION_REQUIRED: &str = "Authentication required";

/// Outcome of a successful authentication.
#[derive(Clone, Debug, PartialEq)]
pub struct Authenticated {
	/// Identity built from the verified claims.
	pub principal: Principal,
	/// Token the identity was verified from.
	pub token: BearerToken,
}

/// Authentication rejection, rendered as a `401 Unauthorized` response.
///
/// The response body only carries the reason code and its public message; the diagnostic
/// detail stays in the logs.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{}", describe(.reason))]
pub struct Unauthorized {
	/// Why authentication failed; `None` when no identity was established at all.
	pub reason: Option<RejectReason>,
	/// Value of the `WWW-Authenticate` header.
	pub challenge: Option<Arc<str>>,
}
impl Unauthorized {
	/// Rejection for a request that never established an identity.
	pub fn authentication_required() -> Self {
		Self { reason: None, challenge: None }
	}

	/// Attach a `WWW-Authenticate` challenge.
	pub fn with_challenge(mut self, challenge: Arc<str>) -> Self {
		self.challenge = Some(challenge);

		self
	}

	/// Machine-readable reason code.
	pub fn code(&self) -> &'static str {
		self.reason.as_ref().map_or("authentication_required", RejectReason::code)
	}

	/// Message shown to the caller.
	pub fn detail(&self) -> &'static str {
		self.reason.as_ref().map_or(AUTHENTICATION_REQUIRED, RejectReason::public_message)
	}
}
impl From<RejectReason> for Unauthorized {
	fn from(reason: RejectReason) -> Self {
		Self { reason: Some(reason), challenge: None }
	}
}
impl IntoResponse for Unauthorized {
	fn into_response(self) -> Response {
		let body = ErrorBody { error: "Unauthorized", code: self.code(), detail: self.detail() };
		let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();

		if let Some(challenge) = &self.challenge
			&& let Ok(value) = HeaderValue::from_str(challenge)
		{
			response.headers_mut().insert(WWW_AUTHENTICATE, value);
		}

		response
	}
}

fn describe(reason: &Option<RejectReason>) -> String {
	reason.as_ref().map_or_else(|| AUTHENTICATION_REQUIRED.to_owned(), ToString::to_string)
}

#[derive(Serialize)]
struct ErrorBody {
	error: &'static str,
	code: &'static str,
	detail: &'static str,
}

/// Verifies bearer tokens for routes that must be authenticated.
#[derive(Clone, Debug)]
pub struct BearerAuthenticator {
	verifier: Arc<TokenVerifier>,
	challenge: Arc<str>,
}
impl BearerAuthenticator {
	/// Wrap a verifier; the challenge realm is taken from it.
	pub fn new(verifier: Arc<TokenVerifier>) -> Self {
		let challenge = Arc::from(format!("Bearer realm=\"{}\"", verifier.realm()));

		Self { verifier, challenge }
	}

	/// Build the verifier stack from configuration.
	pub fn from_config(config: &VerifierConfig) -> Result<Self> {
		Ok(Self::new(Arc::new(TokenVerifier::from_config(config)?)))
	}

	/// Underlying verifier.
	pub fn verifier(&self) -> &Arc<TokenVerifier> {
		&self.verifier
	}

	/// `WWW-Authenticate` value sent with rejections.
	pub fn challenge(&self) -> &str {
		&self.challenge
	}

	/// Authenticate a request from its headers.
	///
	/// `Ok(None)` means no bearer token was offered and authentication was not attempted.
	pub async fn authenticate(
		&self,
		headers: &HeaderMap,
	) -> std::result::Result<Option<Authenticated>, Unauthorized> {
		let token = match bearer_token(headers) {
			Ok(Some(token)) => token,
			Ok(None) => return Ok(None),
			Err(reason) => return Err(self.reject(reason)),
		};

		match self.verifier.verify(token).await.into_result() {
			Ok(claims) => Ok(Some(Authenticated {
				principal: Principal::from_claims(claims),
				token: BearerToken(token.to_owned()),
			})),
			Err(reason) => Err(self.reject(reason)),
		}
	}

	/// Rejection for `reason` carrying this authenticator's challenge.
	pub fn reject(&self, reason: RejectReason) -> Unauthorized {
		Unauthorized::from(reason).with_challenge(self.challenge.clone())
	}
}

/// Middleware that rejects any request without a valid bearer token.
///
/// Use with [`axum::middleware::from_fn_with_state`]. On success the [`Principal`] and the
/// [`BearerToken`] are inserted into the request extensions.
#[tracing::instrument(
	skip_all,
	name = "jwks_gate.require_bearer",
	fields(path = %req.uri().path())
)]
pub async fn require_bearer(
	State(authenticator): State<BearerAuthenticator>,
	mut req: Request,
	next: Next,
) -> std::result::Result<Response, Unauthorized> {
	let Authenticated { principal, token } = authenticator
		.authenticate(req.headers())
		.await?
		.ok_or_else(|| authenticator.reject(RejectReason::NoToken))?;

	tracing::debug!(principal = %principal, "request authenticated");

	req.extensions_mut().insert(principal);
	req.extensions_mut().insert(token);

	Ok(next.run(req).await)
}
