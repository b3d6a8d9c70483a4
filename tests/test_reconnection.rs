//! Automatic reconnection tests
//!
//! Unrequested teardowns must be reported once and followed by backed-off
//! handshakes with the same identity, until success, a fatal refusal,
//! exhaustion or an explicit disconnect.


use brokerlink::client::{ConnectionState, FixedBackoff};
use brokerlink::error::ErrorKind;
use brokerlink::protocol::ConnectReturnCode;
use brokerlink::testing::DialScript;
use brokerlink::transport::TransportError;
use client_test_helpers::{MqttTestHarness, FAST_BACKOFF};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_end_of_stream_reports_once_and_reconnects() {
    // Arrange
    let mut harness = MqttTestHarness::new();
    let mut connection = harness.connected().await;

    // Act: broker drops the connection
    let closed_at = Instant::now();
    connection.close();

    // Assert: one error report, then a prompt reconnect with the same identity
    assert!(harness.handler.wait_for_errors(1).await);
    let (_replacement, connect) = harness
        .broker
        .accept_session()
        .await
        .expect("client should reconnect");
    assert!(closed_at.elapsed() < Duration::from_secs(1));
    assert_eq!(connect.client_id, "test-client");

    assert!(harness.wait_for_connected().await);
    let errors = harness.handler.errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::TransportFailure);
    assert_eq!(harness.client.health_metrics().await.reconnect_count, 1);
    assert_eq!(harness.dialer.dial_count().await, 2);
}

#[tokio::test]
async fn test_read_error_triggers_reconnect() {
    let mut harness = MqttTestHarness::new();
    let connection = harness.connected().await;

    connection.inject_error(TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "reset by peer",
    )));

    assert!(harness.handler.wait_for_errors(1).await);
    assert!(harness.broker.accept_session().await.is_some());
    assert!(harness.wait_for_connected().await);
}

#[tokio::test]
async fn test_publishes_work_after_reconnect() {
    let mut harness = MqttTestHarness::new();
    let mut connection = harness.connected().await;
    connection.close();

    let (mut replacement, _) = harness
        .broker
        .accept_session()
        .await
        .expect("client should reconnect");
    assert!(harness.wait_for_connected().await);

    harness
        .client
        .publish("after/reconnect", "ok", brokerlink::protocol::QoS::AtMostOnce, false)
        .await
        .expect("publish on the new connection");
    assert!(replacement.recv().await.is_some());
}

#[tokio::test]
async fn test_disconnect_during_backoff_cancels_reconnect() {
    let mut harness = MqttTestHarness::with_backoff(FixedBackoff::new(Duration::from_secs(30)));
    let mut connection = harness.connected().await;

    connection.close();
    assert!(harness.handler.wait_for_errors(1).await);
    assert!(matches!(
        harness.client.connection_state(),
        ConnectionState::Reconnecting(_)
    ));

    harness
        .client
        .disconnect()
        .await
        .expect("disconnect should cancel the pending reconnect");

    assert_eq!(harness.client.connection_state(), ConnectionState::Disconnected);
    tokio::time::sleep(FAST_BACKOFF * 5).await;
    assert_eq!(harness.dialer.dial_count().await, 1);
    assert_eq!(harness.handler.errors().await.len(), 1);
}

#[tokio::test]
async fn test_connect_rejected_while_reconnecting() {
    let mut harness = MqttTestHarness::with_backoff(FixedBackoff::new(Duration::from_secs(30)));
    let mut connection = harness.connected().await;

    connection.close();
    assert!(harness.handler.wait_for_errors(1).await);

    assert!(matches!(
        harness.client.connect().await,
        Err(brokerlink::error::ClientError::ConnectInProgress)
    ));
    harness.client.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_max_attempts_exhausted() {
    let mut harness =
        MqttTestHarness::with_backoff(FixedBackoff::new(FAST_BACKOFF).with_max_attempts(2));
    harness
        .dialer
        .script([DialScript::Accept, DialScript::Refuse, DialScript::Refuse])
        .await;
    let mut connection = harness.connected().await;

    connection.close();

    assert!(harness.handler.wait_for_errors(2).await);
    assert!(harness.wait_for_disconnected().await);

    let errors = harness.handler.errors().await;
    assert_eq!(errors[0].kind, ErrorKind::TransportFailure);
    assert_eq!(errors[1].kind, ErrorKind::Usage);
    assert!(errors[1].message.contains("after 2 attempts"));
    assert_eq!(harness.dialer.dial_count().await, 3);
}

#[tokio::test]
async fn test_fatal_refusal_stops_reconnecting() {
    let mut harness = MqttTestHarness::new();
    let mut connection = harness.connected().await;

    connection.close();
    assert!(harness
        .broker
        .refuse(ConnectReturnCode::NotAuthorized)
        .await
        .is_some());

    assert!(harness.handler.wait_for_errors(2).await);
    assert!(harness.wait_for_disconnected().await);
    let errors = harness.handler.errors().await;
    assert_eq!(errors[1].refusal, Some(ConnectReturnCode::NotAuthorized));

    tokio::time::sleep(FAST_BACKOFF * 5).await;
    assert_eq!(harness.dialer.dial_count().await, 2);
}

#[tokio::test]
async fn test_service_unavailable_is_retried() {
    let mut harness = MqttTestHarness::new();
    let mut connection = harness.connected().await;

    connection.close();
    assert!(harness
        .broker
        .refuse(ConnectReturnCode::ServiceUnavailable)
        .await
        .is_some());
    assert!(harness.broker.accept_session().await.is_some());

    assert!(harness.wait_for_connected().await);
    assert_eq!(harness.handler.errors().await.len(), 1);
    assert_eq!(harness.dialer.dial_count().await, 3);
}

#[tokio::test]
async fn test_state_walks_through_reconnecting() {
    let mut harness = MqttTestHarness::with_backoff(FixedBackoff::new(Duration::from_millis(100)));
    let mut connection = harness.connected().await;
    let mut states = harness.client.subscribe_state();

    connection.close();

    states
        .wait_for(|state| *state == ConnectionState::Reconnecting(1))
        .await
        .expect("state channel open");
    assert!(harness.broker.accept_session().await.is_some());
    assert!(harness.wait_for_connected().await);
}
