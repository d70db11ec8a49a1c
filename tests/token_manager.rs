mod common;

use std::sync::Arc;
use std::time::Duration;

use common::SentinelMock;
use farmai_diagnostico::{
    fetch::build_http_client,
    token::{SentinelTokenManager, TokenProvider, TokenState},
    DiagnosisError,
};
use tokio_test::{assert_err, assert_ok};

async fn manager(mock: &SentinelMock) -> SentinelTokenManager {
    let cfg = mock.sentinel_config(Duration::from_secs(5));
    SentinelTokenManager::new(build_http_client(cfg.timeout).unwrap(), &cfg)
}

#[tokio::test]
async fn acquire_caches_the_token() {
    let mock = SentinelMock::start().await;
    let tokens = manager(&mock).await;
    assert_eq!(tokens.state().await, TokenState::Unauthenticated);

    let first = assert_ok!(tokens.acquire().await);
    let second = assert_ok!(tokens.acquire().await);

    assert_eq!(first, "token-1");
    assert_eq!(first, second);
    assert_eq!(mock.token_calls(), 1);
    assert_eq!(tokens.state().await, TokenState::Authenticated("token-1".into()));
}

#[tokio::test]
async fn invalidate_forces_a_new_exchange() {
    let mock = SentinelMock::start().await;
    let tokens = manager(&mock).await;

    let first = tokens.acquire().await.unwrap();
    tokens.invalidate(&first).await;
    assert_eq!(tokens.state().await, TokenState::Expired);

    let second = tokens.acquire().await.unwrap();
    assert_eq!(second, "token-2");
    assert_eq!(mock.token_calls(), 2);
}

#[tokio::test]
async fn invalidating_an_old_token_keeps_the_current_one() {
    let mock = SentinelMock::start().await;
    let tokens = manager(&mock).await;

    let first = tokens.acquire().await.unwrap();
    tokens.invalidate(&first).await;
    let second = tokens.acquire().await.unwrap();

    // Una petición rezagada que aún tenía el primer token.
    tokens.invalidate(&first).await;
    assert_eq!(tokens.acquire().await.unwrap(), second);
    assert_eq!(mock.token_calls(), 2);
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
    let mock = SentinelMock::start().await;
    let tokens = Arc::new(manager(&mock).await);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tokens = tokens.clone();
            tokio::spawn(async move { tokens.acquire().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "token-1");
    }
    assert_eq!(mock.token_calls(), 1);
}

#[tokio::test]
async fn rejected_credentials_are_an_authentication_error() {
    let mock = SentinelMock::start().await;
    mock.reject_credentials();
    let tokens = manager(&mock).await;

    let err = assert_err!(tokens.acquire().await);
    assert!(
        matches!(err, DiagnosisError::AuthenticationError { status: 401, .. }),
        "{err:?}"
    );
    assert_eq!(tokens.state().await, TokenState::Unauthenticated);
}
