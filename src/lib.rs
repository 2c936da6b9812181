//! # Riptide-WS: client-side WebSocket bootstrap engine
//!
//! A protocol engine that establishes HTTP connections, issues
//! request/response exchanges over them, and layers a WebSocket upgrade
//! handshake on top to produce a live, bidirectional message channel —
//! without depending on a full application framework.
//!
//! The crate supplies the orchestration that sits above the wire layers:
//!
//! - [`stream::Stream`]: one request/response exchange on a connection,
//!   protocol-version-agnostic, with its own flow-control window
//! - [`bootstrap::connect`]: drives a single websocket-connect attempt
//!   end-to-end — HTTP connection, GET Upgrade handshake, response capture,
//!   handler handoff — and unifies every failure path into one setup
//!   callback
//!
//! HTTP parsing/serialization, TLS, and socket I/O live behind the
//! [`connection`] traits and are supplied by the embedding transport.
//!
//! ## Example
//!
//! ```ignore
//! use riptide_ws::{bootstrap, handshake, Header, SocketOptions};
//!
//! let key = handshake::generate_key();
//! bootstrap::connect(bootstrap::ClientConnectOptions {
//!     connector,
//!     uri: "ws://example.com/chat".parse()?,
//!     socket: SocketOptions::default(),
//!     tls: None,
//!     handshake_headers: handshake::upgrade_headers("example.com", &key, None),
//!     initial_window_size: 64 * 1024,
//!     on_setup: Box::new(|event| { /* handler or error */ }),
//!     on_shutdown: Some(Box::new(|event| { /* connection is gone */ })),
//!     on_frame_begin: None,
//!     on_frame_payload: None,
//!     on_frame_complete: None,
//! })?;
//! ```

pub mod bootstrap;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod stream;
pub mod websocket;

pub use bootstrap::{
    connect, ClientConnectOptions, OnWebsocketSetup, OnWebsocketShutdown, SetupEvent,
    ShutdownEvent, SWITCHING_PROTOCOLS,
};
pub use connection::{
    Channel, ChannelOps, ClientConnection, HttpConnectOptions, HttpConnector, OnConnectionSetup,
    OnConnectionShutdown, SocketOptions, StreamRequestOptions, TlsOptions,
};
pub use error::{Error, Result};
pub use stream::{Header, OutgoingBody, Stream, StreamCallbacks, StreamDriver};
pub use websocket::{
    FrameCallbacks, FrameHeader, OnFrameBegin, OnFrameComplete, OnFramePayload, OpCode, Role,
    Websocket, WebsocketOptions,
};

/// WebSocket GUID for handshake key derivation
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
