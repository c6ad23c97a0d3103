//! Bridge client with a write-through cache.
//!
//! [`BridgedStore`] offers the same operations as a direct store connection
//! but forwards them over the bridge. Reads are answered from the cache when
//! it knows the answer; writes always go to the server and update the cache
//! only once the server confirms them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use par_term_settings::{Permission, Value, ValueType, is_dir};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{CacheLookup, SettingsCache};
use crate::error::BridgeError;
use crate::jsonrpc::{IncomingMessage, JsonRpcPeer, RpcError};
use crate::protocol::{
    ChangedParams, KeyParams, PathParams, ReadParams, ReadUserValueParams, SuccessResult,
    TreeEntry, ValueResult, WireValue, WritableChangedParams, WritableResult, WriteParams,
    WriteTreeParams, method, notification,
};

/// Something the preferences process should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Values changed, locally or in the main process.
    Changed { keys: Vec<String>, paths: Vec<String> },
    /// Writability of a key or directory changed.
    WritableChanged { key: String },
    /// The channel is gone. Sent at most once.
    Unavailable,
}

/// Sends [`BridgeEvent::Unavailable`] the first time it is triggered.
#[derive(Clone)]
struct AvailabilitySignal {
    lost: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl AvailabilitySignal {
    fn trigger(&self) {
        if !self.lost.swap(true, Ordering::SeqCst) {
            log::warn!("Settings bridge unavailable; changes can no longer be saved");
            let _ = self.events.send(BridgeEvent::Unavailable);
        }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

/// A settings store reached through the bridge.
pub struct BridgedStore {
    peer: Arc<JsonRpcPeer>,
    cache: SettingsCache,
    remote_calls: AtomicU64,
    signal: AvailabilitySignal,
    listener: JoinHandle<()>,
}

impl BridgedStore {
    /// Bind a client to an established channel.
    ///
    /// `incoming` is the peer's queue of notifications; the returned receiver
    /// carries [`BridgeEvent`]s for the lifetime of the client.
    pub fn new(
        peer: Arc<JsonRpcPeer>,
        incoming: mpsc::UnboundedReceiver<IncomingMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let cache = SettingsCache::new();
        let signal = AvailabilitySignal {
            lost: Arc::new(AtomicBool::new(false)),
            events,
        };
        let listener = tokio::spawn(listen(
            Arc::downgrade(&peer),
            incoming,
            cache.clone(),
            signal.clone(),
        ));
        let store = Self {
            peer,
            cache,
            remote_calls: AtomicU64::new(0),
            signal,
            listener,
        };
        (store, events_rx)
    }

    /// Number of calls sent to the server so far.
    pub fn remote_calls(&self) -> u64 {
        self.remote_calls.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &SettingsCache {
        &self.cache
    }

    pub fn is_available(&self) -> bool {
        !self.signal.is_lost() && !self.peer.is_closed()
    }

    /// Close the channel; outstanding calls fail with `Cancelled`.
    pub async fn close(&self) {
        self.peer.close().await;
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, BridgeError> {
        if !self.is_available() {
            self.signal.trigger();
            return Err(BridgeError::Unavailable);
        }
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        let params = serde_json::to_value(params)?;
        match self.peer.request(method, Some(params)).await {
            Ok(result) => Ok(serde_json::from_value(result)?),
            Err(e) => {
                if e.is_channel_loss() {
                    self.signal.trigger();
                }
                Err(e)
            }
        }
    }

    fn emit_changed(&self, keys: Vec<String>, paths: Vec<String>) {
        let _ = self.signal.events.send(BridgeEvent::Changed { keys, paths });
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub async fn get_permission(&self, path: &str) -> Result<Permission, BridgeError> {
        self.call(method::GET_PERMISSION, PathParams { path: path.to_string() })
            .await
    }

    pub async fn get_writable(&self, key: &str) -> Result<bool, BridgeError> {
        if let Some(writable) = self.cache.lookup_writable(key) {
            return Ok(writable);
        }
        let generation = self.cache.generation();
        let result: WritableResult = self
            .call(method::GET_WRITABLE, KeyParams { key: key.to_string() })
            .await?;
        self.cache.store_writable_if(key, result.writable, generation);
        Ok(result.writable)
    }

    /// Read `key`. Reads of the default layer bypass the cache.
    pub async fn read(
        &self,
        key: &str,
        expected: &ValueType,
        want_default: bool,
    ) -> Result<Option<Value>, BridgeError> {
        if !want_default && let CacheLookup::Hit(value) = self.cache.lookup_value(key, expected) {
            return Ok(value);
        }
        let params = ReadParams {
            key: key.to_string(),
            expected_type: expected.signature(),
            want_default,
        };
        let generation = self.cache.generation();
        let value = self.fetch_value(method::READ, params, expected).await;
        if want_default {
            return value;
        }
        self.remember(key, value, generation)
    }

    pub async fn read_user_value(
        &self,
        key: &str,
        expected: &ValueType,
    ) -> Result<Option<Value>, BridgeError> {
        if let CacheLookup::Hit(value) = self.cache.lookup_value(key, expected) {
            return Ok(value);
        }
        let params = ReadUserValueParams {
            key: key.to_string(),
            expected_type: expected.signature(),
        };
        let generation = self.cache.generation();
        let value = self.fetch_value(method::READ_USER_VALUE, params, expected).await;
        self.remember(key, value, generation)
    }

    async fn fetch_value<P: Serialize>(
        &self,
        method: &str,
        params: P,
        expected: &ValueType,
    ) -> Result<Option<Value>, BridgeError> {
        let result: ValueResult = self.call(method, params).await?;
        result.value.decode_expecting(expected)
    }

    /// Cache a read answer unless a change arrived while it was in flight.
    fn remember(
        &self,
        key: &str,
        value: Result<Option<Value>, BridgeError>,
        generation: u64,
    ) -> Result<Option<Value>, BridgeError> {
        match &value {
            Ok(v) => {
                if !self.cache.store_value_if(key, v.clone(), generation) {
                    log::debug!("{key} changed while being read; not caching the answer");
                }
            }
            Err(e) => {
                log::debug!("Read of {key} over the bridge failed: {e}");
                self.cache.invalidate_value(key);
            }
        }
        value
    }

    /// Write `value` (or reset with `None`). Returns the server's verdict;
    /// `false` means the key is not writable.
    pub async fn write(&self, key: &str, value: Option<Value>) -> Result<bool, BridgeError> {
        let params = WriteParams {
            key: key.to_string(),
            value: WireValue::encode(value.as_ref())?,
        };
        let generation = self.cache.generation();
        let result: SuccessResult = self.call(method::WRITE, params).await?;
        if result.success {
            self.cache.apply_writes(&[(key.to_string(), value)], generation);
            self.emit_changed(vec![key.to_string()], Vec::new());
        }
        Ok(result.success)
    }

    /// Write several entries below `prefix` at once. An entry whose relative
    /// key ends in `/` with a `None` value erases that directory. Entries
    /// take effect in order, on the server and in the cache alike.
    pub async fn write_tree(
        &self,
        prefix: &str,
        entries: Vec<(String, Option<Value>)>,
    ) -> Result<bool, BridgeError> {
        if !is_dir(prefix) {
            return Err(BridgeError::Protocol(format!(
                "tree prefix '{prefix}' is not a directory"
            )));
        }
        let wire_entries = entries
            .iter()
            .map(|(key, value)| -> Result<TreeEntry, BridgeError> {
                Ok(TreeEntry {
                    key: key.clone(),
                    value: WireValue::encode(value.as_ref())?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let params = WriteTreeParams {
            path_prefix: prefix.to_string(),
            entries: wire_entries,
        };
        let writes: Vec<(String, Option<Value>)> = entries
            .into_iter()
            .map(|(rel, value)| (format!("{prefix}{rel}"), value))
            .collect();
        let generation = self.cache.generation();
        let result: SuccessResult = self.call(method::WRITE_TREE, params).await?;
        if !result.success {
            // The server may have stopped part way; forget what it touched.
            let touched: Vec<_> = writes.into_iter().map(|(path, _)| (path, None)).collect();
            self.cache.apply_writes(&touched, generation);
            return Ok(false);
        }

        self.cache.apply_writes(&writes, generation);
        let (paths, keys): (Vec<String>, Vec<String>) =
            writes.into_iter().map(|(path, _)| path).partition(|path| is_dir(path));
        self.emit_changed(keys, paths);
        Ok(true)
    }

    /// Reset `key`. The local view is invalidated even when the call fails.
    pub async fn reset(&self, key: &str) -> Result<(), BridgeError> {
        let result: Result<serde_json::Value, BridgeError> = self
            .call(method::RESET, KeyParams { key: key.to_string() })
            .await;
        self.cache.invalidate_value(key);
        self.emit_changed(vec![key.to_string()], Vec::new());
        result.map(|_| ())
    }

    pub async fn subscribe(&self, path: &str) -> Result<(), BridgeError> {
        let _: serde_json::Value = self
            .call(method::SUBSCRIBE, PathParams { path: path.to_string() })
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, path: &str) -> Result<(), BridgeError> {
        let _: serde_json::Value = self
            .call(method::UNSUBSCRIBE, PathParams { path: path.to_string() })
            .await?;
        Ok(())
    }

    pub async fn sync(&self) -> Result<(), BridgeError> {
        let _: serde_json::Value = self.call(method::SYNC, serde_json::json!({})).await?;
        Ok(())
    }
}

impl Drop for BridgedStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Apply server notifications to the cache and forward them as events.
async fn listen(
    peer: Weak<JsonRpcPeer>,
    mut incoming: mpsc::UnboundedReceiver<IncomingMessage>,
    cache: SettingsCache,
    signal: AvailabilitySignal,
) {
    while let Some(msg) = incoming.recv().await {
        let Some(method) = msg.method else { continue };

        if let Some(id) = msg.id {
            // The main process has no reason to call us.
            if let Some(peer) = peer.upgrade() {
                let _ = peer.respond(id, Err(RpcError::method_not_found(&method))).await;
            }
            continue;
        }

        let params = msg.params.unwrap_or(serde_json::Value::Null);
        match method.as_str() {
            notification::CHANGED => match serde_json::from_value::<ChangedParams>(params) {
                Ok(ChangedParams { keys, paths }) => {
                    for key in &keys {
                        cache.invalidate_value(key);
                    }
                    for path in &paths {
                        cache.evict_prefix(path);
                    }
                    let _ = signal.events.send(BridgeEvent::Changed { keys, paths });
                }
                Err(e) => log::warn!("Malformed change notification: {e}"),
            },
            notification::WRITABLE_CHANGED => {
                match serde_json::from_value::<WritableChangedParams>(params) {
                    Ok(WritableChangedParams { key }) => {
                        cache.invalidate_writable(&key);
                        let _ = signal.events.send(BridgeEvent::WritableChanged { key });
                    }
                    Err(e) => log::warn!("Malformed writability notification: {e}"),
                }
            }
            other => log::debug!("Ignoring unknown notification {other}"),
        }
    }
    signal.trigger();
}
