use super::*;
use crate::clock::{Clock, ManualClock};
use crate::credentials::{NewToken, SqliteTokenStore, TokenRecord, TokenStore};
use crate::error::TokenError;
use crate::oauth::TokenResponse;
use crate::testing::{memory_store, start_time, Behaviour, ScriptedExchange, UnreachableStore};
use chrono::Duration;
use std::sync::Arc;

struct Harness {
    store: Arc<SqliteTokenStore>,
    exchange: Arc<ScriptedExchange>,
    clock: ManualClock,
    manager: Arc<TokenLifecycleManager>,
}

fn harness_with(exchange: ScriptedExchange) -> Harness {
    let store = Arc::new(memory_store());
    let exchange = Arc::new(exchange);
    let clock = ManualClock::new(start_time());
    let manager = Arc::new(TokenLifecycleManager::with_clock(
        store.clone(),
        exchange.clone(),
        LifecyclePolicy::default(),
        Arc::new(clock.clone()),
    ));
    Harness {
        store,
        exchange,
        clock,
        manager,
    }
}

fn harness(behaviour: Behaviour) -> Harness {
    harness_with(ScriptedExchange::new(behaviour))
}

impl Harness {
    /// Stores a token issued `issued_ago` before now, expiring `expires_in`
    /// after now.
    fn seed(&self, refresh_token: Option<&str>, issued_ago: Duration, expires_in: Duration) -> TokenRecord {
        let now = self.clock.now();
        let issued = now - issued_ago;
        self.store
            .save(&NewToken {
                access_token: "access-0".to_string(),
                refresh_token: refresh_token.map(str::to_string),
                expires_at: now + expires_in,
                created_at: issued,
                refresh_issued_at: issued,
            })
            .unwrap()
    }

    fn seed_expired(&self) -> TokenRecord {
        self.seed(Some("refresh-0"), Duration::minutes(40), Duration::minutes(-10))
    }
}

#[tokio::test]
async fn test_valid_token_returned_without_refresh() {
    let h = harness(Behaviour::Rotate);
    let seeded = h.seed(Some("refresh-0"), Duration::zero(), Duration::minutes(30));

    h.clock.advance(Duration::minutes(10));
    let token = h.manager.get_valid_token().await.expect("token should be valid");

    assert_eq!(token.id, seeded.id);
    assert_eq!(h.exchange.calls(), 0);
}

#[tokio::test]
async fn test_expired_token_refreshed_on_demand() {
    let h = harness(Behaviour::Rotate);
    let first = h
        .manager
        .store_authorization(&TokenResponse {
            access_token: "first".to_string(),
            refresh_token: Some("refresh-first".to_string()),
            expires_in: Some(1800),
            ..TokenResponse::default()
        })
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(29));
    assert!(h.manager.is_valid().unwrap());

    h.clock.advance(Duration::minutes(2));
    assert!(!h.manager.is_valid().unwrap());

    let token = h.manager.get_valid_token().await.expect("refresh should succeed");
    assert_ne!(token.id, first.id);
    assert_eq!(token.access_token, "access-1");
    assert_eq!(token.expires_at, h.clock.now() + Duration::seconds(1800));
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.store.count().unwrap(), 2);
}

#[tokio::test]
async fn test_rejected_refresh_appends_nothing() {
    let h = harness(Behaviour::Reject(400));
    let seeded = h.seed_expired();

    assert!(h.manager.refresh().await.is_none());
    assert_eq!(h.store.count().unwrap(), 1);
    assert_eq!(h.manager.current_token().unwrap().map(|t| t.id), Some(seeded.id));

    let err = h.manager.try_refresh().await.unwrap_err();
    assert!(matches!(err, TokenError::ExchangeRejected { status: 400, .. }));
    assert!(err.is_terminal());
}

#[tokio::test]
async fn test_transport_failure_is_retryable() {
    let h = harness(Behaviour::Unreachable);
    h.seed_expired();

    let err = h.manager.try_refresh().await.unwrap_err();
    assert!(matches!(err, TokenError::ExchangeTransport(_)));
    assert!(!err.is_terminal());
    assert_eq!(h.store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_old_refresh_token_short_circuits() {
    let h = harness(Behaviour::Rotate);
    h.seed(Some("refresh-0"), Duration::days(8), Duration::minutes(-10));

    assert!(h.manager.refresh().await.is_none());
    assert_eq!(h.exchange.calls(), 0);
    assert!(h.manager.needs_flow_restart().unwrap());

    let err = h.manager.try_refresh().await.unwrap_err();
    match err {
        TokenError::TokenTooOld { age } => assert_eq!(age, Duration::days(8)),
        other => panic!("expected TokenTooOld, got {:?}", other),
    }
}

#[tokio::test]
async fn test_flow_restart_boundary() {
    let h = harness(Behaviour::Rotate);
    h.seed(
        Some("refresh-0"),
        Duration::days(7) - Duration::seconds(1),
        Duration::minutes(-10),
    );

    assert!(!h.manager.needs_flow_restart().unwrap());

    h.clock.advance(Duration::seconds(1));
    assert!(h.manager.needs_flow_restart().unwrap());

    h.clock.advance(Duration::seconds(1));
    assert!(h.manager.needs_flow_restart().unwrap());
}

#[tokio::test]
async fn test_refresh_just_inside_validity_window() {
    let h = harness(Behaviour::Rotate);
    h.seed(
        Some("refresh-0"),
        Duration::days(7) - Duration::seconds(1),
        Duration::minutes(-10),
    );

    assert!(h.manager.refresh().await.is_some());
    assert_eq!(h.exchange.calls(), 1);
    assert!(!h.manager.needs_flow_restart().unwrap());
}

#[tokio::test]
async fn test_empty_store() {
    let h = harness(Behaviour::Rotate);

    assert!(h.manager.get_valid_token().await.is_none());
    assert!(matches!(h.manager.try_refresh().await, Err(TokenError::NoToken)));
    assert!(!h.manager.is_valid().unwrap());
    assert!(h.manager.needs_flow_restart().unwrap());
    assert_eq!(h.manager.time_until_expiry().unwrap(), None);
    assert_eq!(h.manager.refresh_token_age().unwrap(), None);
    assert_eq!(h.exchange.calls(), 0);
}

#[tokio::test]
async fn test_missing_refresh_token() {
    let h = harness(Behaviour::Rotate);
    h.seed(None, Duration::minutes(40), Duration::minutes(-10));

    assert!(matches!(
        h.manager.try_refresh().await,
        Err(TokenError::NoRefreshToken)
    ));
    assert_eq!(h.exchange.calls(), 0);
}

#[tokio::test]
async fn test_reused_refresh_token_keeps_issuance_time() {
    let h = harness(Behaviour::KeepRefresh);
    let seeded = h.seed(Some("refresh-0"), Duration::zero(), Duration::minutes(30));

    h.clock.advance(Duration::days(3));
    let refreshed = h.manager.refresh().await.expect("refresh should succeed");

    assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-0"));
    assert_eq!(refreshed.refresh_issued_at, seeded.refresh_issued_at);
    assert_eq!(refreshed.created_at, start_time() + Duration::days(3));
    assert_eq!(h.manager.refresh_token_age().unwrap(), Some(Duration::days(3)));

    h.clock.advance(Duration::days(4));
    assert!(h.manager.needs_flow_restart().unwrap());
}

#[tokio::test]
async fn test_rotated_refresh_token_restarts_window() {
    let h = harness(Behaviour::Rotate);
    h.seed(Some("refresh-0"), Duration::zero(), Duration::minutes(30));

    h.clock.advance(Duration::days(3));
    let refreshed = h.manager.refresh().await.expect("refresh should succeed");

    assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(refreshed.refresh_issued_at, h.clock.now());
    assert_eq!(h.manager.refresh_token_age().unwrap(), Some(Duration::zero()));
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_exchange() {
    let h = harness_with(ScriptedExchange::with_delay(
        Behaviour::Rotate,
        std::time::Duration::from_millis(50),
    ));
    h.seed_expired();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.refresh().await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        let token = handle.await.unwrap().expect("every caller gets a token");
        ids.push(token.id);
    }

    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.store.count().unwrap(), 2);
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_concurrent_failed_refreshes_share_one_exchange() {
    let h = harness_with(ScriptedExchange::with_delay(
        Behaviour::Unreachable,
        std::time::Duration::from_millis(50),
    ));
    h.seed_expired();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.try_refresh().await })
        })
        .collect();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TokenError::ExchangeTransport(_)));
    }

    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_on_demand_callers_during_outage() {
    let h = harness_with(ScriptedExchange::with_delay(
        Behaviour::Reject(503),
        std::time::Duration::from_millis(50),
    ));
    h.seed_expired();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.get_valid_token().await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_none());
    }
    assert_eq!(h.exchange.calls(), 1);
}

#[tokio::test]
async fn test_failed_attempt_does_not_stick() {
    let h = harness(Behaviour::Unreachable);
    h.seed_expired();

    assert!(h.manager.refresh().await.is_none());

    h.exchange.set_behaviour(Behaviour::Rotate);
    let token = h.manager.refresh().await.expect("next attempt exchanges again");

    assert_eq!(token.access_token, "access-2");
    assert_eq!(h.exchange.calls(), 2);
}

#[tokio::test]
async fn test_stale_ticket_joins_refresh_committed_after_its_read() {
    let h = harness(Behaviour::Rotate);
    h.seed_expired();

    let ticket = h.manager.refresh_ticket().unwrap();
    let refreshed = h.manager.refresh().await.expect("refresh should succeed");

    let joined = h.manager.refresh_from(ticket).await.expect("joins the newer record");
    assert_eq!(joined.id, refreshed.id);
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.store.count().unwrap(), 2);

    // A caller that saw the refreshed record starts its own attempt
    let fresh = h.manager.refresh_ticket().unwrap();
    let next = h.manager.refresh_from(fresh).await.expect("refresh should succeed");
    assert_ne!(next.id, refreshed.id);
    assert_eq!(h.exchange.calls(), 2);
}

#[tokio::test]
async fn test_stale_ticket_joins_failed_attempt() {
    let h = harness(Behaviour::Reject(400));
    h.seed_expired();

    let ticket = h.manager.refresh_ticket().unwrap();
    assert!(h.manager.refresh().await.is_none());

    h.exchange.set_behaviour(Behaviour::Rotate);
    assert!(h.manager.refresh_from(ticket).await.is_none());
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_authorization_supersedes_waiting_refresh() {
    let h = harness(Behaviour::Rotate);
    h.seed(None, Duration::minutes(40), Duration::minutes(-10));

    let ticket = h.manager.refresh_ticket().unwrap();
    let authorized = h
        .manager
        .authorize("code", "https://127.0.0.1/api/auth/callback")
        .await
        .unwrap();

    let token = h.manager.refresh_from(ticket).await.expect("joins the authorized record");
    assert_eq!(token.id, authorized.record.id);
    assert_eq!(h.exchange.calls(), 1);
}

#[tokio::test]
async fn test_never_returns_expired_token() {
    let offsets = [-3600, -60, -1, 0, 1, 60, 1800];
    let behaviours = [
        Behaviour::Rotate,
        Behaviour::KeepRefresh,
        Behaviour::Reject(401),
        Behaviour::Unreachable,
    ];

    for behaviour in behaviours {
        for offset in offsets {
            let h = harness(behaviour);
            h.seed(Some("refresh-0"), Duration::hours(1), Duration::seconds(offset));

            if let Some(token) = h.manager.get_valid_token().await {
                assert!(
                    token.expires_at > h.clock.now(),
                    "{:?} with offset {} returned an expired token",
                    behaviour,
                    offset
                );
            } else {
                assert!(offset <= 0, "{:?} with offset {} returned none", behaviour, offset);
            }
        }
    }
}

#[tokio::test]
async fn test_store_failures_surface_as_persistence() {
    let clock = ManualClock::new(start_time());
    let manager = TokenLifecycleManager::with_clock(
        Arc::new(UnreachableStore),
        Arc::new(ScriptedExchange::new(Behaviour::Rotate)),
        LifecyclePolicy::default(),
        Arc::new(clock),
    );

    assert!(manager.get_valid_token().await.is_none());
    assert!(manager.refresh().await.is_none());
    assert!(matches!(manager.is_valid(), Err(TokenError::Persistence(_))));
    assert!(matches!(manager.needs_flow_restart(), Err(TokenError::Persistence(_))));
    assert!(matches!(manager.status(), Err(TokenError::Persistence(_))));
}

#[tokio::test]
async fn test_authorize_stores_first_token() {
    let h = harness(Behaviour::Rotate);

    let authorized = h
        .manager
        .authorize("code", "https://127.0.0.1/api/auth/callback")
        .await
        .unwrap();

    assert_eq!(authorized.token_type.as_deref(), Some("Bearer"));
    assert_eq!(authorized.expires_in, Some(1800));
    assert_eq!(authorized.record.refresh_issued_at, h.clock.now());
    assert_eq!(
        h.manager.current_token().unwrap().map(|t| t.id),
        Some(authorized.record.id)
    );
}

#[tokio::test]
async fn test_missing_expires_in_uses_default_lifetime() {
    let h = harness(Behaviour::Rotate);

    let saved = h
        .manager
        .store_authorization(&TokenResponse {
            access_token: "first".to_string(),
            refresh_token: Some("refresh-first".to_string()),
            ..TokenResponse::default()
        })
        .await
        .unwrap();

    assert_eq!(saved.expires_at, h.clock.now() + Duration::minutes(30));
}

#[tokio::test]
async fn test_status_snapshot() {
    let h = harness(Behaviour::Rotate);
    let empty = h.manager.status().unwrap();
    assert!(!empty.has_token);
    assert!(empty.needs_flow_restart);
    assert_eq!(empty.health(), TokenHealth::Expired);

    let seeded = h.seed(Some("refresh-0"), Duration::days(2), Duration::minutes(45));
    let status = h.manager.status().unwrap();

    assert!(status.has_token);
    assert!(status.is_valid);
    assert_eq!(status.token_id, Some(seeded.id));
    assert_eq!(status.time_until_expiry, Some(Duration::minutes(45)));
    assert_eq!(status.refresh_token_age, Some(Duration::days(2)));
    assert_eq!(status.refresh_token_remaining, Some(Duration::days(5)));
    assert!(!status.needs_flow_restart);
    assert_eq!(status.record_count, 1);
    assert_eq!(status.health(), TokenHealth::Healthy);
    assert_eq!(format_span(status.time_until_expiry.unwrap()), "00.00:45:00");
}
