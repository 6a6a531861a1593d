//! HTTP client integration for JWKS retrieval.

// crates.io
use http::header::ACCEPT;
use reqwest::{Client, Response, redirect::Policy};
use url::Url;
// self
use crate::{_prelude::*, cache::JwksDocument, config::VerifierConfig};

/// Maximum redirect depth followed while fetching a key set.
pub const MAX_REDIRECTS: usize = 10;
/// Bytes of an error response body kept for diagnostics.
pub const ERROR_EXCERPT_BYTES: u64 = 512;

/// Outcome of a successful JWKS fetch.
#[derive(Clone, Debug)]
pub struct JwksFetch {
	/// Parsed key set.
	pub document: Arc<JwksDocument>,
	/// Round-trip duration of the exchange.
	pub elapsed: Duration,
}

/// Build the HTTP client used for JWKS retrieval.
pub fn build_client(config: &VerifierConfig) -> Result<Client> {
	let client = Client::builder()
		.redirect(Policy::limited(MAX_REDIRECTS))
		.user_agent(format!("jwks-gate/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(config.fetch_timeout)
		.build()?;

	Ok(client)
}

/// Fetch and decode the key set published at `url`.
///
/// The whole exchange, body included, is bounded by `timeout`. A timeout, a transport error, or
/// a non-success status are all reported as fetch failures; an undecodable body is reported as
/// a malformed document.
#[tracing::instrument(skip_all, fields(url = %url))]
pub async fn fetch_jwks(
	client: &Client,
	url: &Url,
	timeout: Duration,
	max_response_bytes: u64,
) -> Result<JwksFetch> {
	let start = Instant::now();
	let fetch_failed = |source| Error::JwksFetchFailed { url: url.clone(), source };
	let mut response = client
		.get(url.clone())
		.header(ACCEPT, "application/json")
		.timeout(timeout)
		.send()
		.await
		.map_err(fetch_failed)?;
	let status = response.status();

	if !status.is_success() {
		let body = read_capped(&mut response, ERROR_EXCERPT_BYTES)
			.await
			.ok()
			.filter(|excerpt| !excerpt.is_empty())
			.map(|excerpt| String::from_utf8_lossy(&excerpt).into_owned());

		return Err(Error::HttpStatus { status, url: url.clone(), body });
	}
	if let Some(length) = response.content_length()
		&& length > max_response_bytes
	{
		return Err(oversize(length, max_response_bytes));
	}

	let bytes = read_capped(&mut response, max_response_bytes + 1).await.map_err(fetch_failed)?;

	if bytes.len() as u64 > max_response_bytes {
		return Err(oversize(bytes.len() as u64, max_response_bytes));
	}

	let document: JwksDocument = serde_json::from_slice(&bytes).map_err(Error::MalformedJwks)?;
	let elapsed = start.elapsed();

	tracing::info!(keys = document.len(), elapsed = ?elapsed, "fetched jwks");

	Ok(JwksFetch { document: Arc::new(document), elapsed })
}

// Stops reading once `limit` bytes are buffered; the rest of the body is dropped with the
// connection.
async fn read_capped(response: &mut Response, limit: u64) -> reqwest::Result<Vec<u8>> {
	let mut buffer = Vec::new();

	while (buffer.len() as u64) < limit {
		let Some(chunk) = response.chunk().await? else {
			break;
		};

		buffer.extend_from_slice(&chunk);
	}

	buffer.truncate(limit as usize);

	Ok(buffer)
}

fn oversize(size: u64, limit: u64) -> Error {
	Error::Validation {
		field: "max_response_bytes",
		reason: format!(
			"Response size {size} bytes exceeds the configured guard of {limit} bytes."
		),
	}
}
