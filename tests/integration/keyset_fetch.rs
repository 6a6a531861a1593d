//! Key set retrieval, caching, and stale fallback against a live HTTP endpoint.

// std
use std::{sync::atomic::Ordering, time::Duration};
// crates.io
use jwks_gate::{
	Error, KeyResolver, KeySetState, KeySource, RejectReason, ResolveError, Result, TokenVerifier,
	http::client::{ERROR_EXCERPT_BYTES, build_client, fetch_jwks},
};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::*;

#[tokio::test]
async fn fetches_once_and_serves_later_lookups_from_cache() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(jwks_response(&two_key_jwks()))
		.expect(1)
		.mount(&server)
		.await;

	let resolver = KeyResolver::new(&config(&server))?;
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));
	let first = resolver.resolve(&token).await.expect("fetched");
	let second = resolver.resolve(&token).await.expect("cached");

	assert_eq!(first.source, KeySource::Fetched);
	assert_eq!(second.source, KeySource::Cached);
	assert_eq!(second.kid.as_deref(), Some("k1"));

	let status = resolver.status().await;

	assert_eq!(status.state, KeySetState::Fresh);
	assert_eq!(status.key_count, 2);
	assert_eq!(status.metrics.fetch_successes, 1);
	assert!((status.hit_rate - 0.5).abs() < f64::EPSILON);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn verifies_tokens_for_each_key_in_the_fetched_set() -> Result<()> {
	let server = MockServer::start().await;

	mount_sequence(&server, vec![jwks_response(&two_key_jwks())]).await;

	let verifier = TokenVerifier::from_config(&config(&server))?;
	let issuer = server.uri();
	let primary = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&issuer, 600));
	let rotated = sign("k2", ROTATED_PRIVATE_PEM, &claims(&issuer, 600));
	let swapped = sign("k1", ROTATED_PRIVATE_PEM, &claims(&issuer, 600));
	let verified = verifier.verify(&primary).await.into_result().expect("primary");

	assert_eq!(verified.get("scope"), Some(&json!("reviews:read reviews:write")));
	assert!(verifier.verify(&rotated).await.is_valid());
	assert_eq!(verifier.verify(&swapped).await.reason(), Some(&RejectReason::BadSignature));

	Ok(())
}

#[tokio::test]
async fn serves_expired_keys_when_refill_fails() -> Result<()> {
	let server = MockServer::start().await;
	let requests = mount_sequence(
		&server,
		vec![jwks_response(&two_key_jwks()), ResponseTemplate::new(500).set_body_string("down")],
	)
	.await;
	let verifier =
		TokenVerifier::from_config(&config(&server).with_cache_ttl(Duration::from_secs(1)))?;
	let token = sign("k2", ROTATED_PRIVATE_PEM, &claims(&server.uri(), 600));

	assert!(verifier.verify(&token).await.is_valid());

	tokio::time::sleep(Duration::from_millis(1_100)).await;

	let resolved = verifier.resolver().resolve(&token).await.expect("stale fallback");

	assert_eq!(resolved.source, KeySource::Stale);
	assert!(verifier.verify(&token).await.is_valid());
	assert_eq!(requests.load(Ordering::SeqCst), 3);

	let status = verifier.resolver().status().await;

	assert_eq!(status.state, KeySetState::Stale);
	assert_eq!(status.metrics.fetch_errors, 2);
	assert_eq!(status.metrics.stale_serves, 2);
	assert_eq!(status.metrics.accepted, 2);

	Ok(())
}

#[tokio::test]
async fn malformed_document_falls_back_like_a_network_failure() -> Result<()> {
	let server = MockServer::start().await;

	mount_sequence(
		&server,
		vec![
			jwks_response(&two_key_jwks()),
			ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"),
		],
	)
	.await;

	let resolver = KeyResolver::new(&config(&server).with_cache_ttl(Duration::from_secs(1)))?;
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));

	resolver.resolve(&token).await.expect("initial fetch");
	tokio::time::sleep(Duration::from_millis(1_100)).await;

	assert_eq!(resolver.resolve(&token).await.expect("fallback").source, KeySource::Stale);

	Ok(())
}

#[tokio::test]
async fn failures_without_any_cached_set_are_unavailable() -> Result<()> {
	let server = MockServer::start().await;

	mount_sequence(&server, vec![ResponseTemplate::new(503)]).await;

	let verifier = TokenVerifier::from_config(&config(&server))?;
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));

	assert!(matches!(
		verifier.verify(&token).await.reason(),
		Some(RejectReason::KeyResolution(ResolveError::Unavailable(_)))
	));
	assert_eq!(verifier.resolver().status().await.state, KeySetState::Empty);

	Ok(())
}

#[tokio::test]
async fn slow_endpoint_is_cut_off_by_the_fetch_timeout() -> Result<()> {
	let server = MockServer::start().await;

	mount_sequence(
		&server,
		vec![jwks_response(&two_key_jwks()).set_delay(Duration::from_secs(5))],
	)
	.await;

	let resolver =
		KeyResolver::new(&config(&server).with_fetch_timeout(Duration::from_millis(200)))?;
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));
	let started = std::time::Instant::now();

	assert!(matches!(resolver.resolve(&token).await, Err(ResolveError::Unavailable(_))));
	assert!(started.elapsed() < Duration::from_secs(4));

	Ok(())
}

#[tokio::test]
async fn oversize_document_is_rejected() -> Result<()> {
	let server = MockServer::start().await;

	mount_sequence(&server, vec![jwks_response(&two_key_jwks())]).await;

	let mut config = config(&server);

	config.max_response_bytes = 64;

	let resolver = KeyResolver::new(&config)?;
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));

	assert!(matches!(resolver.resolve(&token).await, Err(ResolveError::Unavailable(_))));

	Ok(())
}

#[tokio::test]
async fn error_bodies_are_truncated_to_an_excerpt() -> Result<()> {
	let server = MockServer::start().await;

	let bad_gateway = ResponseTemplate::new(502).set_body_string("x".repeat(64 * 1024));

	mount_sequence(&server, vec![bad_gateway]).await;

	let config = config(&server);
	let url = config.jwks_url.clone().expect("derived jwks url");
	let err = fetch_jwks(&build_client(&config)?, &url, config.fetch_timeout, 1_024)
		.await
		.expect_err("bad gateway");
	let Error::HttpStatus { status, body, .. } = err else {
		panic!("expected an HTTP status error, got {err:?}");
	};

	assert_eq!(status.as_u16(), 502);
	assert_eq!(body.map(|body| body.len() as u64), Some(ERROR_EXCERPT_BYTES));

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_of_misses_triggers_a_single_fetch() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(jwks_response(&two_key_jwks()).set_delay(Duration::from_millis(200)))
		.expect(1)
		.mount(&server)
		.await;

	let verifier = std::sync::Arc::new(TokenVerifier::from_config(&config(&server))?);
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));
	let tasks: Vec<_> = (0..32)
		.map(|_| {
			let verifier = verifier.clone();
			let token = token.clone();

			tokio::spawn(async move { verifier.verify(&token).await.is_valid() })
		})
		.collect();

	for task in tasks {
		assert!(task.await.expect("task"));
	}

	server.verify().await;

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_share_a_failed_refill_instead_of_queueing_fetches() -> Result<()> {
	let server = MockServer::start().await;
	let requests = mount_sequence(
		&server,
		vec![
			jwks_response(&two_key_jwks()),
			jwks_response(&two_key_jwks()).set_delay(Duration::from_secs(30)),
		],
	)
	.await;
	let resolver = std::sync::Arc::new(KeyResolver::new(
		&config(&server)
			.with_cache_ttl(Duration::from_secs(1))
			.with_fetch_timeout(Duration::from_millis(300)),
	)?);
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));

	resolver.resolve(&token).await.expect("initial fetch");
	tokio::time::sleep(Duration::from_millis(1_100)).await;

	let started = std::time::Instant::now();
	let tasks: Vec<_> = (0..10)
		.map(|_| {
			let resolver = resolver.clone();
			let token = token.clone();

			tokio::spawn(async move { resolver.resolve(&token).await.map(|key| key.source) })
		})
		.collect();

	for task in tasks {
		assert_eq!(task.await.expect("task"), Ok(KeySource::Stale));
	}

	assert!(started.elapsed() < Duration::from_millis(1_500));
	assert_eq!(requests.load(Ordering::SeqCst), 2);

	let status = resolver.status().await;

	assert_eq!(status.metrics.fetch_errors, 1);
	assert_eq!(status.metrics.stale_serves, 10);
	assert_eq!(status.metrics.shared_refill_failures, 9);

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_share_unavailability_when_nothing_is_cached() -> Result<()> {
	let server = MockServer::start().await;
	let requests = mount_sequence(
		&server,
		vec![jwks_response(&two_key_jwks()).set_delay(Duration::from_secs(30))],
	)
	.await;
	let resolver = std::sync::Arc::new(KeyResolver::new(
		&config(&server).with_fetch_timeout(Duration::from_millis(300)),
	)?);
	let token = sign("k1", PRIMARY_PRIVATE_PEM, &claims(&server.uri(), 600));
	let started = std::time::Instant::now();
	let tasks: Vec<_> = (0..10)
		.map(|_| {
			let resolver = resolver.clone();
			let token = token.clone();

			tokio::spawn(async move { resolver.resolve(&token).await.map(|key| key.source) })
		})
		.collect();

	for task in tasks {
		assert!(matches!(task.await.expect("task"), Err(ResolveError::Unavailable(_))));
	}

	assert!(started.elapsed() < Duration::from_millis(1_500));
	assert_eq!(requests.load(Ordering::SeqCst), 1);

	Ok(())
}

#[tokio::test]
async fn rotated_key_is_picked_up_after_clearing_the_cache() -> Result<()> {
	let server = MockServer::start().await;

	mount_sequence(
		&server,
		vec![
			jwks_response(&json!({ "keys": [jwk("k1", PRIMARY_MODULUS)] })),
			jwks_response(&two_key_jwks()),
		],
	)
	.await;

	let verifier = TokenVerifier::from_config(&config(&server))?;
	let token = sign("k2", ROTATED_PRIVATE_PEM, &claims(&server.uri(), 600));

	assert_eq!(
		verifier.verify(&token).await.reason(),
		Some(&RejectReason::KeyResolution(ResolveError::UnknownKeyId("k2".into())))
	);

	verifier.resolver().clear_cache().await;

	assert!(verifier.verify(&token).await.is_valid());

	Ok(())
}
