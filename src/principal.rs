//! Verified caller identity.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use serde::Serialize;
use serde_json::{Map, Value};
// self
use crate::verifier::TokenClaims;

/// Role assumed when a verified token carries no `role` claim.
pub const DEFAULT_ROLE: &str = "user";

/// Identity derived from verified token claims.
///
/// Owned by the request that produced it; handlers read it through the accessors and never
/// reach back into the verifier.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Principal {
	id: String,
	email: String,
	role: String,
	claims: TokenClaims,
}
impl Principal {
	/// Build the identity from a verified claim set.
	pub fn from_claims(claims: TokenClaims) -> Self {
		Self {
			id: claims.subject().unwrap_or_default().to_owned(),
			email: claims.email().unwrap_or_default().to_owned(),
			role: claims.role().unwrap_or(DEFAULT_ROLE).to_owned(),
			claims,
		}
	}

	/// Subject identifier (`sub`).
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Email address, empty when the token carries none.
	pub fn email(&self) -> &str {
		&self.email
	}

	/// Role claim, `"user"` when absent.
	pub fn role(&self) -> &str {
		&self.role
	}

	/// Full verified claim set.
	pub fn claims(&self) -> &TokenClaims {
		&self.claims
	}

	/// Raw claim map.
	pub fn raw_claims(&self) -> &Map<String, Value> {
		self.claims.as_map()
	}

	/// Display name: the email when present, otherwise the subject.
	pub fn username(&self) -> &str {
		if self.email.is_empty() { &self.id } else { &self.email }
	}
}
impl Display for Principal {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.username())
	}
}
impl From<TokenClaims> for Principal {
	fn from(claims: TokenClaims) -> Self {
		Self::from_claims(claims)
	}
}
