//! Channel loss, cancellation and malformed payloads.

mod common;

use std::time::Duration;

use common::{client_with_raw_server, connected, drain, settle};
use par_term_settings::{Value, ValueType};
use par_term_settings_bridge::{BridgeError, BridgeEvent, CacheLookup};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const THEME: &str = "/org/par-term/theme";

#[tokio::test]
async fn test_read_in_flight_is_cancelled_when_channel_closes() {
    let (client, mut events, raw) = client_with_raw_server();
    let reader = client.clone();
    let call = tokio::spawn(async move { reader.read(THEME, &ValueType::String, false).await });

    let (r, w) = raw.into_split();
    let mut lines = BufReader::new(r).lines();
    let request = lines.next_line().await.unwrap().expect("request on the wire");
    assert!(request.contains("settings/read"));
    drop(lines);
    drop(w);

    let result = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("read must not hang")
        .unwrap();
    assert!(matches!(result, Err(BridgeError::Cancelled)));
    assert!(!client.is_available());

    settle().await;
    let unavailable = drain(&mut events)
        .into_iter()
        .filter(|e| *e == BridgeEvent::Unavailable)
        .count();
    assert_eq!(unavailable, 1);
}

#[tokio::test]
async fn test_cache_stays_readable_after_channel_loss() {
    let bridge = connected().await;
    let client = bridge.client.clone();
    assert!(client.write(THEME, Some(Value::from("dark"))).await.unwrap());

    bridge.handle.shutdown().await;
    settle().await;

    assert_eq!(
        client.read(THEME, &ValueType::String, false).await.unwrap(),
        Some(Value::from("dark"))
    );
    let err = client.write(THEME, Some(Value::from("light"))).await.unwrap_err();
    assert!(err.is_channel_loss());
}

#[tokio::test]
async fn test_malformed_value_is_a_decode_error_and_not_cached() {
    let (client, _events, raw) = client_with_raw_server();
    let reader = client.clone();
    let call = tokio::spawn(async move { reader.read(THEME, &ValueType::String, false).await });

    let (r, mut w) = raw.into_split();
    let mut lines = BufReader::new(r).lines();
    let request: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let reply = serde_json::json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "result": {"value": "AQID"}
    });
    w.write_all(format!("{reply}\n").as_bytes()).await.unwrap();

    let result = call.await.unwrap();
    assert!(result.unwrap_err().is_decode());
    assert_eq!(client.cache().lookup_value(THEME, &ValueType::String), CacheLookup::Miss);
}

#[tokio::test]
async fn test_value_of_wrong_type_is_rejected() {
    let bridge = connected().await;
    // Stored as a bool, read as a string: the store reports nothing.
    par_term_settings::SettingsStore::write(
        bridge.store.as_ref(),
        THEME,
        Some(Value::Bool(true)),
        None,
    );
    assert_eq!(
        bridge.client.read(THEME, &ValueType::String, false).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_server_releases_subscriptions_when_client_goes_away() {
    let bridge = connected().await;
    bridge.client.subscribe("/org/par-term/").await.unwrap();
    assert_eq!(bridge.store.subscriptions(), vec!["/org/par-term/".to_string()]);

    bridge.client.close().await;
    tokio::time::timeout(Duration::from_secs(2), bridge.handle.closed())
        .await
        .expect("server notices the close");
    settle().await;
    assert!(bridge.store.subscriptions().is_empty());
}

#[tokio::test]
async fn test_calls_after_channel_loss_fail_without_reaching_the_wire() {
    let bridge = connected().await;
    let client = bridge.client.clone();

    bridge.handle.shutdown().await;
    settle().await;
    assert!(!client.is_available());

    let calls = client.remote_calls();
    let err = client.get_writable(THEME).await.unwrap_err();
    assert!(matches!(err, BridgeError::Unavailable));
    assert!(!err.is_retryable());
    assert_eq!(client.remote_calls(), calls);
}
