//! Settings bridge between par-term and its preferences process.
//!
//! The preferences process does not open the settings store itself. It
//! inherits one end of a private socket pair at launch and proxies every
//! settings operation over it to the main process, which executes them
//! against the canonical store.
//!
//! - `jsonrpc` / `protocol`: line-delimited JSON-RPC and the message types
//! - `server`: [`BridgeServer`], run in the main process
//! - `client` / `cache`: [`BridgedStore`], the caching client
//! - `backend` / `settings`: the explicit store handle and schema-bound
//!   [`Settings`] objects built on it
//! - `channel`: socket pair, spawn, handshake and teardown

pub mod backend;
pub mod cache;
pub mod cancel;
pub mod channel;
pub mod client;
pub mod config;
pub mod defaults;
pub mod error;
pub mod jsonrpc;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod tree;

pub use backend::{DirectStore, SettingsBackend};
pub use cache::{CacheEntry, CacheLookup, SettingsCache};
pub use cancel::CancellationToken;
pub use channel::{
    BUS_FD_FLAG, BridgeHost, ChannelState, ServerHandle, connect_inherited, connect_stream, export,
};
pub use client::{BridgeEvent, BridgedStore};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use jsonrpc::{JsonRpcPeer, RpcError};
pub use server::BridgeServer;
pub use settings::Settings;
pub use tree::apply_write_tree;
