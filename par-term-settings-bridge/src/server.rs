//! The bridge server, exported in the main process.
//!
//! Each incoming call is executed synchronously against the settings store
//! and answered before the next one is read, so writes arriving over the
//! bridge are applied in a single total order. Store changes below the
//! paths the peer subscribed to are forwarded as notifications, except for
//! changes the server itself made on the peer's behalf.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use par_term_settings::{OriginTag, SchemaSource, SettingsStore, StoreChange, Value, ValueType, is_dir};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use tokio::sync::{broadcast, mpsc, watch};

use crate::jsonrpc::{DECODE_FAILURE, IncomingMessage, JsonRpcPeer, RpcError, STORE_FAILURE};
use crate::protocol::{
    ChangedParams, HelloParams, HelloResult, KeyParams, OBJECT_PATH, PROTOCOL_VERSION, PathParams,
    ReadParams, ReadUserValueParams, SuccessResult, ValueResult, WireValue, WritableChangedParams,
    WritableResult, WriteParams, WriteTreeParams, method, notification,
};
use crate::tree::apply_write_tree;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// Serves settings calls for one channel.
pub struct BridgeServer {
    store: Arc<dyn SettingsStore>,
    schemas: Arc<SchemaSource>,
    /// Tag attached to every write this server makes.
    origin: OriginTag,
    /// Subscription counts per path, mirrored into the store.
    subscriptions: Mutex<BTreeMap<String, usize>>,
    hello_tx: watch::Sender<bool>,
}

fn parse_params<T: DeserializeOwned>(params: Option<Json>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Json::Null)).map_err(RpcError::invalid_params)
}

fn to_result<T: Serialize>(value: T) -> Result<Json, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(STORE_FAILURE, e.to_string()))
}

fn parse_type(signature: &str) -> Result<ValueType, RpcError> {
    ValueType::parse(signature).map_err(RpcError::invalid_params)
}

fn encode_value(value: Option<&Value>) -> Result<Json, RpcError> {
    let value = WireValue::encode(value).map_err(|e| RpcError::new(DECODE_FAILURE, e.to_string()))?;
    to_result(ValueResult { value })
}

fn decode_value(wire: &WireValue) -> Result<Option<Value>, RpcError> {
    wire.decode()
        .map_err(|e| RpcError::new(DECODE_FAILURE, e.to_string()))
}

impl BridgeServer {
    pub fn new(store: Arc<dyn SettingsStore>, schemas: Arc<SchemaSource>) -> Self {
        let (hello_tx, _) = watch::channel(false);
        Self {
            store,
            schemas,
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed),
            subscriptions: Mutex::new(BTreeMap::new()),
            hello_tx,
        }
    }

    pub fn origin(&self) -> OriginTag {
        self.origin
    }

    /// Paths the peer is currently subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Resolve once the peer has completed the hello exchange.
    pub async fn wait_for_hello(&self) {
        let mut rx = self.hello_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Execute one call.
    pub fn dispatch(&self, method: &str, params: Option<Json>) -> Result<Json, RpcError> {
        match method {
            method::HELLO => {
                let p: HelloParams = parse_params(params)?;
                if p.object_path != OBJECT_PATH {
                    return Err(RpcError::invalid_params(format!(
                        "no object at '{}'",
                        p.object_path
                    )));
                }
                if p.protocol_version != PROTOCOL_VERSION {
                    return Err(RpcError::invalid_params(format!(
                        "unsupported protocol version {}",
                        p.protocol_version
                    )));
                }
                self.hello_tx.send_replace(true);
                log::info!("Settings bridge peer connected");
                to_result(HelloResult {
                    protocol_version: PROTOCOL_VERSION,
                    object_path: OBJECT_PATH.to_string(),
                    server_pid: std::process::id(),
                })
            }
            method::GET_PERMISSION => {
                let p: PathParams = parse_params(params)?;
                to_result(self.store.get_permission(&p.path))
            }
            method::GET_WRITABLE => {
                let p: KeyParams = parse_params(params)?;
                to_result(WritableResult {
                    writable: self.store.get_writable(&p.key),
                })
            }
            method::READ => {
                let p: ReadParams = parse_params(params)?;
                let ty = parse_type(&p.expected_type)?;
                encode_value(self.store.read(&p.key, &ty, p.want_default).as_ref())
            }
            method::READ_USER_VALUE => {
                let p: ReadUserValueParams = parse_params(params)?;
                let ty = parse_type(&p.expected_type)?;
                encode_value(self.store.read_user_value(&p.key, &ty).as_ref())
            }
            method::RESET => {
                let p: KeyParams = parse_params(params)?;
                self.store.reset(&p.key, Some(self.origin));
                Ok(serde_json::json!({}))
            }
            method::SUBSCRIBE => {
                let p: PathParams = parse_params(params)?;
                *self.subscriptions.lock().entry(p.path.clone()).or_insert(0) += 1;
                self.store.subscribe(&p.path);
                Ok(serde_json::json!({}))
            }
            method::UNSUBSCRIBE => {
                let p: PathParams = parse_params(params)?;
                let known = {
                    let mut subs = self.subscriptions.lock();
                    match subs.get_mut(&p.path) {
                        Some(count) => {
                            *count -= 1;
                            if *count == 0 {
                                subs.remove(&p.path);
                            }
                            true
                        }
                        None => false,
                    }
                };
                if known {
                    self.store.unsubscribe(&p.path);
                }
                Ok(serde_json::json!({}))
            }
            method::SYNC => {
                self.store
                    .sync()
                    .map_err(|e| RpcError::new(STORE_FAILURE, e.to_string()))?;
                Ok(serde_json::json!({}))
            }
            method::WRITE => {
                let p: WriteParams = parse_params(params)?;
                let value = decode_value(&p.value)?;
                let success = self.store.write(&p.key, value, Some(self.origin));
                to_result(SuccessResult { success })
            }
            method::WRITE_TREE => {
                let p: WriteTreeParams = parse_params(params)?;
                if !is_dir(&p.path_prefix) {
                    return Err(RpcError::invalid_params(format!(
                        "pathPrefix '{}' is not a directory",
                        p.path_prefix
                    )));
                }
                let mut entries = Vec::with_capacity(p.entries.len());
                for entry in &p.entries {
                    let value = decode_value(&entry.value)?;
                    entries.push((format!("{}{}", p.path_prefix, entry.key), value));
                }
                let success =
                    apply_write_tree(self.store.as_ref(), &self.schemas, entries, Some(self.origin));
                to_result(SuccessResult { success })
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }

    /// Whether a store change should be forwarded to the peer.
    fn wants(&self, change: &StoreChange) -> bool {
        if change.origin() == Some(self.origin) {
            return false;
        }
        let subs = self.subscriptions.lock();
        subs.keys().any(|path| change.touches(path))
    }

    /// Serve calls from `incoming` until the channel closes, forwarding store
    /// changes to `peer` meanwhile.
    ///
    /// On return every subscription the peer left behind has been removed
    /// from the store.
    pub async fn serve(
        self: Arc<Self>,
        peer: Arc<JsonRpcPeer>,
        mut incoming: mpsc::UnboundedReceiver<IncomingMessage>,
    ) {
        let cancel = peer.cancel_token().clone();
        let changes = self.store.changes();
        let forwarder = tokio::spawn(Arc::clone(&self).forward_changes(Arc::clone(&peer), changes));

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = incoming.recv() => msg,
            };
            let Some(msg) = msg else { break };

            match (msg.id, msg.method) {
                (Some(id), Some(method)) => {
                    let result = self.dispatch(&method, msg.params);
                    if let Err(e) = &result {
                        log::debug!("Bridge call {method} failed: {e}");
                    }
                    if let Err(e) = peer.respond(id, result).await {
                        log::warn!("Could not answer bridge call {method}: {e}");
                        break;
                    }
                }
                (None, Some(method)) => {
                    log::debug!("Ignoring notification {method} from preferences process");
                }
                _ => log::warn!("Ignoring malformed message on settings bridge"),
            }
        }

        forwarder.abort();
        self.release_subscriptions();
        log::info!("Settings bridge server stopped");
    }

    fn release_subscriptions(&self) {
        let subs = std::mem::take(&mut *self.subscriptions.lock());
        for (path, count) in subs {
            for _ in 0..count {
                self.store.unsubscribe(&path);
            }
        }
    }

    async fn forward_changes(
        self: Arc<Self>,
        peer: Arc<JsonRpcPeer>,
        mut changes: broadcast::Receiver<StoreChange>,
    ) {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Unknown keys changed; have the peer drop everything it watches.
                    log::warn!("Settings bridge missed {missed} store changes");
                    StoreChange::Changed {
                        keys: Vec::new(),
                        paths: self.subscriptions(),
                        origin: None,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !self.wants(&change) {
                continue;
            }
            let sent = match change {
                StoreChange::Changed { keys, paths, .. } => {
                    let params = serde_json::to_value(ChangedParams { keys, paths });
                    match params {
                        Ok(params) => peer.notify(notification::CHANGED, Some(params)).await,
                        Err(e) => Err(e.into()),
                    }
                }
                StoreChange::WritableChanged { key } => {
                    let params = serde_json::to_value(WritableChangedParams { key });
                    match params {
                        Ok(params) => peer.notify(notification::WRITABLE_CHANGED, Some(params)).await,
                        Err(e) => Err(e.into()),
                    }
                }
            };
            if let Err(e) = sent {
                log::debug!("Stopping change forwarding: {e}");
                break;
            }
        }
    }
}
