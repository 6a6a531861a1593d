//! Fail-open, path-aware authentication for routes that decide their own policy.
//!
//! The gate never blocks a request. It records a [`GateOutcome`] in the request extensions, plus
//! the [`Principal`] when one was established, and handlers that need an identity opt in through
//! [`require_principal`] or the [`Principal`] extractor.

// crates.io
use axum::{
	extract::{FromRequestParts, Request, State},
	middleware::Next,
	response::Response,
};
use http::{Extensions, HeaderMap, request::Parts};
// self
use crate::{
	_prelude::*,
	config::VerifierConfig,
	error::RejectReason,
	middleware::{adapter::Unauthorized, bearer_token},
	principal::Principal,
	verifier::TokenVerifier,
};

/// What the gate concluded for one request.
#[derive(Clone, Debug, PartialEq)]
pub enum GateOutcome {
	/// Path is public; verification was skipped.
	Exempt,
	/// No bearer token was offered.
	Anonymous,
	/// A valid token was offered.
	Authenticated(Principal),
	/// A token was offered but failed verification.
	Rejected(RejectReason),
}
impl GateOutcome {
	/// Principal, when authenticated.
	pub fn principal(&self) -> Option<&Principal> {
		match self {
			Self::Authenticated(principal) => Some(principal),
			_ => None,
		}
	}

	/// Rejection reason, when a token failed verification.
	pub fn reason(&self) -> Option<&RejectReason> {
		match self {
			Self::Rejected(reason) => Some(reason),
			_ => None,
		}
	}
}

/// Verifies bearer tokens on every non-public path without ever blocking.
#[derive(Clone, Debug)]
pub struct RequestGate {
	verifier: Arc<TokenVerifier>,
	public_paths: Arc<[String]>,
	challenge: Arc<str>,
}
impl RequestGate {
	/// Wrap a verifier with the given public path prefixes.
	pub fn new<I, S>(verifier: Arc<TokenVerifier>, public_paths: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let challenge = Arc::from(format!("Bearer realm=\"{}\"", verifier.realm()));

		let public_paths = public_paths.into_iter().map(Into::into).collect();

		Self { verifier, public_paths, challenge }
	}

	/// Build the verifier stack and public paths from configuration.
	pub fn from_config(config: &VerifierConfig) -> Result<Self> {
		let verifier = Arc::new(TokenVerifier::from_config(config)?);

		Ok(Self::new(verifier, config.public_paths.iter().cloned()))
	}

	/// Underlying verifier.
	pub fn verifier(&self) -> &Arc<TokenVerifier> {
		&self.verifier
	}

	/// Whether `path` falls under a public prefix.
	pub fn is_public(&self, path: &str) -> bool {
		self.public_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
	}

	/// Classify a request by its path and headers.
	pub async fn inspect(&self, path: &str, headers: &HeaderMap) -> GateOutcome {
		if self.is_public(path) {
			return GateOutcome::Exempt;
		}

		let token = match bearer_token(headers) {
			Ok(Some(token)) => token,
			Ok(None) => return GateOutcome::Anonymous,
			Err(reason) => return GateOutcome::Rejected(reason),
		};

		match self.verifier.verify(token).await.into_principal() {
			Ok(principal) => GateOutcome::Authenticated(principal),
			Err(reason) => GateOutcome::Rejected(reason),
		}
	}
}

/// Middleware that records the gate's outcome and always runs the next handler.
#[tracing::instrument(skip_all, name = "jwks_gate.gate", fields(path = %req.uri().path()))]
pub async fn gate(State(gate): State<RequestGate>, mut req: Request, next: Next) -> Response {
	let outcome = gate.inspect(req.uri().path(), req.headers()).await;

	match &outcome {
		GateOutcome::Authenticated(principal) => {
			tracing::debug!(principal = %principal, "request authenticated");

			req.extensions_mut().insert(principal.clone());
		},
		GateOutcome::Rejected(reason) => {
			tracing::debug!(reason = reason.code(), "token rejected; passing through");
		},
		GateOutcome::Exempt | GateOutcome::Anonymous => (),
	}

	req.extensions_mut().insert(outcome);

	next.run(req).await
}

/// Middleware for gated routes that need an identity; layer it inside [`gate`].
pub async fn require_principal(
	State(gate): State<RequestGate>,
	req: Request,
	next: Next,
) -> std::result::Result<Response, Unauthorized> {
	if req.extensions().get::<Principal>().is_none() {
		return Err(missing_principal(req.extensions()).with_challenge(gate.challenge.clone()));
	}

	Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for Principal
where
	S: Send + Sync,
{
	type Rejection = Unauthorized;

	async fn from_request_parts(
		parts: &mut Parts,
		_: &S,
	) -> std::result::Result<Self, Self::Rejection> {
		parts
			.extensions
			.get::<Principal>()
			.cloned()
			.ok_or_else(|| missing_principal(&parts.extensions))
	}
}

fn missing_principal(extensions: &Extensions) -> Unauthorized {
	match extensions.get::<GateOutcome>().and_then(GateOutcome::reason) {
		Some(reason) => Unauthorized::from(reason.clone()),
		None => Unauthorized::authentication_required(),
	}
}
