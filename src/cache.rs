//! Key set cache and the documents it holds.

pub mod entry;
pub mod state;

pub use self::{
	entry::{DEFAULT_CACHE_TTL, KeySetCache},
	state::{CachedKeySet, JwkEntry, JwksDocument},
};
