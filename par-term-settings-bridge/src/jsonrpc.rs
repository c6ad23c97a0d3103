//! Line-delimited JSON-RPC 2.0 over one end of a local socket.
//!
//! Both sides of the bridge use the same [`JsonRpcPeer`]: it can issue
//! requests and notifications, and it hands every incoming call or
//! notification to whoever takes the incoming queue. Messages that arrive
//! before the queue is consumed stay queued, so a server can be exported
//! after the channel is already open without losing early calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cancel::CancellationToken;
use crate::error::BridgeError;

/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Parameters missing or of the wrong shape.
pub const INVALID_PARAMS: i64 = -32602;
/// The settings store failed to carry out the call.
pub const STORE_FAILURE: i64 = -32000;
/// A value payload could not be decoded.
pub const DECODE_FAILURE: i64 = -32001;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request (or notification when `id` is `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<u64>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {detail}"))
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// A raw incoming JSON-RPC message that can be classified as a response,
/// notification, or an RPC call from the remote side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl IncomingMessage {
    /// A response has no `method`. A `null` result deserializes as `None`,
    /// so the presence of `result` alone cannot be relied on.
    pub fn is_response(&self) -> bool {
        self.method.is_none()
    }

    /// A notification has a `method` but no `id`.
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// An RPC call from the remote side has both `method` and `id`.
    pub fn is_rpc_call(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// Convert into a [`Response`] (only valid when [`Self::is_response`] is true).
    pub fn into_response(self) -> Response {
        Response {
            jsonrpc: self.jsonrpc,
            result: self.result,
            error: self.error,
            id: self.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One end of a JSON-RPC channel.
pub struct JsonRpcPeer {
    /// Writer half, shared by every task that sends.
    writer: Arc<Mutex<BoxedWriter>>,
    /// Monotonically increasing request id counter.
    next_id: AtomicU64,
    /// Pending requests awaiting a response, keyed by request id.
    pending: PendingMap,
    /// Handed out exactly once via `take_incoming()`.
    incoming_rx: Option<mpsc::UnboundedReceiver<IncomingMessage>>,
    cancel: CancellationToken,
    /// `None` waits forever.
    timeout: Option<Duration>,
    reader_task: JoinHandle<()>,
}

impl JsonRpcPeer {
    /// Create a peer over a reader/writer pair.
    ///
    /// Spawns a background task that reads line-delimited JSON, routing
    /// responses to their pending futures and everything else to the queue
    /// returned by [`Self::take_incoming`]. When the reader hits end of file
    /// or an error, `cancel` is triggered so every outstanding call fails
    /// with [`BridgeError::Cancelled`].
    pub fn new<R, W>(reader: R, writer: W, cancel: CancellationToken, timeout: Option<Duration>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<IncomingMessage>();

        let reader_pending = Arc::clone(&pending);
        let reader_cancel = cancel.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();
                let read = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    read = reader.read_line(&mut line) => read,
                };
                match read {
                    Ok(0) => {
                        log::info!("Settings bridge channel closed by peer");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }

                        let msg: IncomingMessage = match serde_json::from_str(trimmed) {
                            Ok(m) => m,
                            Err(e) => {
                                log::error!("Failed to parse JSON-RPC message: {e}");
                                continue;
                            }
                        };

                        if msg.is_response() {
                            if let Some(id) = msg.id {
                                let mut map = reader_pending.lock().await;
                                if let Some(tx) = map.remove(&id) {
                                    let _ = tx.send(msg.into_response());
                                } else {
                                    log::warn!("Received response for unknown request id {id}");
                                }
                            } else {
                                log::error!("Received response without id: {trimmed}");
                            }
                        } else if incoming_tx.send(msg).is_err() {
                            log::debug!("Incoming queue dropped; discarding message");
                        }
                    }
                    Err(e) => {
                        log::error!("Error reading settings bridge channel: {e}");
                        break;
                    }
                }
            }

            // Fail every outstanding call; dropping the senders wakes them.
            reader_cancel.cancel();
            reader_pending.lock().await.clear();
        });

        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            next_id: AtomicU64::new(1),
            pending,
            incoming_rx: Some(incoming_rx),
            cancel,
            timeout,
            reader_task,
        }
    }

    /// Take the receiver for incoming notifications and RPC calls.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<IncomingMessage>> {
        self.incoming_rx.take()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn send_line<T: Serialize>(&self, message: &T) -> Result<(), BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let json = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(format!("{json}\n").as_bytes()).await?;
            writer.flush().await
        };
        write.await.map_err(|e| {
            log::warn!("Write to settings bridge channel failed: {e}");
            BridgeError::Connection(e.to_string())
        })
    }

    /// Send a request and wait for its result.
    ///
    /// Fails with [`BridgeError::Cancelled`] when the channel is torn down
    /// first, and with [`BridgeError::Timeout`] when the configured timeout
    /// elapses.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = Request {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(id),
        };

        let (tx, rx) = oneshot::channel::<Response>();

        // Register the pending request before writing to avoid races.
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send_line(&req).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let wait = async { rx.await.map_err(|_| BridgeError::Cancelled) };
        let timed = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, wait)
                    .await
                    .unwrap_or_else(|_| {
                        Err(BridgeError::Timeout {
                            method: method.to_string(),
                        })
                    }),
                None => wait.await,
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            outcome = timed => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                log::debug!("Bridge call {method} (id {id}) failed: {e}");
                return Err(e);
            }
        };

        if let Some(err) = response.error {
            return Err(BridgeError::Rpc(err));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BridgeError> {
        let req = Request {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: None,
        };
        self.send_line(&req).await
    }

    /// Answer an incoming call.
    pub async fn respond(&self, id: u64, result: Result<Value, RpcError>) -> Result<(), BridgeError> {
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };
        let resp = Response {
            jsonrpc: "2.0".to_string(),
            result,
            error,
            id: Some(id),
        };
        self.send_line(&resp).await
    }

    /// Close the channel: cancel outstanding calls and shut the writer down
    /// so the remote side sees end of file.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            log::debug!("Shutdown of settings bridge writer failed: {e}");
        }
    }
}

impl Drop for JsonRpcPeer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.reader_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
