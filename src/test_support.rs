// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value, json};
// self
use crate::{
	_prelude::*,
	cache::{JwkEntry, JwksDocument},
	config::VerifierConfig,
};

pub const PRIMARY_PRIVATE_PEM: &str = include_str!("../tests/fixtures/primary.pem");
pub const PRIMARY_PUBLIC_PEM: &str = include_str!("../tests/fixtures/primary.pub.pem");
pub const ROTATED_PRIVATE_PEM: &str = include_str!("../tests/fixtures/rotated.pem");

pub const PRIMARY_MODULUS: &str = "km6bPEmlSuOsfjxcabpBd5-oj66ALkKOrlyeHs6R7VKXoTcyIv7-aHWxQ0wKPqjLgrbibHM3JNGCCRkHyVfJUCYdJsr84HPSslLlKLvUZNA212o9a5qpeodsYZQ314WssP9Zkbp-RftZSSck_mEBfPqjN8k-fjiNHfTrpSfMnMAEqqiBNDdFTo16jLqmoLxY2eme0ovn0eFCWbaKC30A1ZD8D07J7IfVP1lnAgemaXqW5KMI9etRn6kIulJC6dH0TYlQpkNvJff28j-0RxZRJOV7MwudtJkGoXowxitqbsEnBAeORcbo49t3LgBBHeiXFLbk3YA0j0GHt-UwSA6InQ";
pub const ROTATED_MODULUS: &str = "wEdYuYEE0wif0G3pVfLN6hgHZRXx0E7m5UUxodYHxaBH9f5EIqoPr_GcFgDyI_W71RDxZ0S7pYT31vvBK6bA4KlA-4rAwU12el5TSN-TJpPnRuqBJfD9oi8UxruWIS9glgsj9KeUeqf9hEafE-hBXnGryAaN9fmqoUJWE165Q7v0vCRYfp94e72dPX12WFRalSgOJJGDaid_S_T1GKwWQJWIFjfZvwKoivIQFd6dYywihw6Zrfb_XbBSv-s1H41Obao0bO3nivH4iAbw66uRe2jiYHKH01sLR5NGm9N0x0ruRL_BMOFChJXuEtiNzMRLbqFBItN7p3O5PvQ4C7g6Rw";

pub const ISSUER: &str = "https://id.example.com";
pub const AUDIENCE: &str = "reviews.example.com";

pub fn rsa_entry(kid: &str, modulus: &str) -> JwkEntry {
	let Value::Object(raw) =
		json!({ "kty": "RSA", "alg": "RS256", "use": "sig", "kid": kid, "n": modulus, "e": "AQAB" })
	else {
		unreachable!("object literal");
	};

	JwkEntry::from(raw)
}

/// `[k1 → primary, k2 → rotated]`.
pub fn two_key_document() -> Arc<JwksDocument> {
	Arc::new(JwksDocument {
		keys: vec![rsa_entry("k1", PRIMARY_MODULUS), rsa_entry("k2", ROTATED_MODULUS)],
	})
}

/// JWKS-backed configuration whose endpoint is never reachable; tests seed the cache instead.
pub fn jwks_config() -> VerifierConfig {
	VerifierConfig::new(ISSUER)
		.expect("config")
		.with_jwks_url("http://127.0.0.1:9/.well-known/jwks.json")
		.expect("url")
		.with_audience(AUDIENCE)
}

pub fn unix_now() -> i64 {
	Utc::now().timestamp()
}

pub fn claims(exp_offset: i64) -> Map<String, Value> {
	let now = unix_now();
	let Value::Object(claims) = json!({
		"sub": "user-42",
		"email": "reviewer@example.com",
		"role": "editor",
		"iat": now,
		"exp": now + exp_offset,
		"iss": ISSUER,
		"aud": AUDIENCE,
		"org": { "id": 7, "tags": ["a", "b"] },
	}) else {
		unreachable!("object literal");
	};

	claims
}

pub fn sign(kid: Option<&str>, private_pem: &str, claims: &Map<String, Value>) -> String {
	let mut header = Header::new(Algorithm::RS256);

	header.kid = kid.map(str::to_owned);

	let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("private key");

	jsonwebtoken::encode(&header, claims, &key).expect("signed token")
}
