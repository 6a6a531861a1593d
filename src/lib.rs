//! Bearer token verification for services that trust an external identity provider: RS256 JWTs,
//! a time-bounded JWKS cache with stale fallback, and axum adapters that consume it.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod principal;
pub mod resolver;
pub mod verifier;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
#[cfg(test)] mod test_support;

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{CachedKeySet, JwkEntry, JwksDocument, KeySetCache},
	config::VerifierConfig,
	error::{Error, RejectReason, ResolveError, Result},
	middleware::{
		BearerToken,
		adapter::{Authenticated, BearerAuthenticator, Unauthorized, require_bearer},
		gate::{GateOutcome, RequestGate, gate, require_principal},
	},
	principal::Principal,
	resolver::{KeyResolver, KeySetState, KeySetStatus, KeySource, ResolvedKey},
	verifier::{TokenClaims, TokenVerifier, VerificationOutcome},
};
