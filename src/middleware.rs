//! axum integration: a fail-closed adapter for API routes and a fail-open gate for the rest.

pub mod adapter;
pub mod gate;

// crates.io
use http::{HeaderMap, header::AUTHORIZATION};
// self
use crate::error::RejectReason;

/// Raw token of an authenticated request, stored in request extensions next to the
/// [`Principal`](crate::Principal).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BearerToken(pub String);
impl BearerToken {
	/// Token text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

/// Extract the token from a `Bearer` authorization header.
///
/// `Ok(None)` means no authentication was attempted: the header is absent, uses another scheme,
/// or does not split into exactly a scheme and a token.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, RejectReason> {
	let Some(value) = headers.get(AUTHORIZATION) else {
		return Ok(None);
	};
	let value = value.to_str().map_err(|_| RejectReason::MalformedAuthorizationHeader)?;
	let mut parts = value.split_whitespace();

	match (parts.next(), parts.next(), parts.next()) {
		(Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") =>
			Ok(Some(token)),
		_ => Ok(None),
	}
}
