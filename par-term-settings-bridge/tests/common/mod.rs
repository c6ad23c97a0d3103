//! Shared helpers for the settings bridge integration tests.
//!
//! Include with `mod common;` at the top of a test file. The
//! `#[allow(dead_code)]` suppresses warnings when a file uses only some of
//! the helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use par_term_settings::{KeyfileStore, SchemaSource};
use par_term_settings_bridge::{
    BridgeConfig, BridgeEvent, BridgeServer, BridgedStore, CancellationToken, JsonRpcPeer,
    ServerHandle, connect_stream, export,
};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

/// A main-process store and a preferences-side client connected to it.
pub struct Bridged {
    pub store: Arc<KeyfileStore>,
    pub client: Arc<BridgedStore>,
    pub events: mpsc::UnboundedReceiver<BridgeEvent>,
    pub handle: ServerHandle,
}

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        request_timeout_ms: 2000,
        startup_timeout_ms: 2000,
        ..Default::default()
    }
}

/// Export a server over an in-process socket pair and connect a client.
pub async fn connected() -> Bridged {
    connected_to(Arc::new(KeyfileStore::in_memory())).await
}

pub async fn connected_to(store: Arc<KeyfileStore>) -> Bridged {
    let schemas = Arc::new(SchemaSource::bundled().expect("bundled schemas load"));
    let (server_end, client_end) = UnixStream::pair().expect("socket pair");
    let server = Arc::new(BridgeServer::new(store.clone(), schemas));
    let handle = export(server_end, server).expect("export server");
    let (client, events) = connect_stream(client_end, &test_config())
        .await
        .expect("client connects");
    Bridged {
        store,
        client: Arc::new(client),
        events,
        handle,
    }
}

/// A client whose other end is a raw socket the test drives by hand.
pub fn client_with_raw_server() -> (Arc<BridgedStore>, mpsc::UnboundedReceiver<BridgeEvent>, UnixStream) {
    let (client_end, raw) = UnixStream::pair().expect("socket pair");
    let (reader, writer) = client_end.into_split();
    let mut peer = JsonRpcPeer::new(
        reader,
        writer,
        CancellationToken::new(),
        Some(Duration::from_secs(5)),
    );
    let incoming = peer.take_incoming().expect("fresh peer");
    let (client, events) = BridgedStore::new(Arc::new(peer), incoming);
    (Arc::new(client), events, raw)
}

/// Give notifications in flight a moment to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Drain every event received so far.
pub fn drain(events: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
