//! Connection collaborator interface
//!
//! The bootstrap consumes HTTP connections through the traits here; it never
//! sees protocol internals. An [`HttpConnector`] turns connect options into a
//! live [`ClientConnection`], reporting the outcome through callbacks, and a
//! connection dispatches request/response exchanges as [`Stream`]s.
//!
//! Callback contract required of implementations:
//! - the setup callback fires at most once, before any other callback, and
//!   never when `connect` itself returned an error;
//! - `Ok(connection)` and the error outcome are mutually exclusive;
//! - the shutdown callback fires exactly once, only after a successful
//!   setup, and only after all in-flight stream callbacks for the
//!   connection have been delivered.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;

use crate::error::{Error, Result};
use crate::stream::{Header, Stream, StreamCallbacks};

/// Reports the outcome of connection establishment.
///
/// `Ok` carries the live connection; `Err` means no connection exists.
pub type OnConnectionSetup = Box<dyn FnOnce(Result<Arc<dyn ClientConnection>>) + Send>;

/// Reports completed connection shutdown, with the error that caused it
/// (if any).
pub type OnConnectionShutdown = Box<dyn FnOnce(Option<Error>) + Send>;

/// Socket-level options passed through to the transport
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Connect timeout in milliseconds, `None` for the transport default
    pub connect_timeout_ms: Option<u64>,
    /// Disable Nagle's algorithm
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive
    pub keep_alive: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            tcp_nodelay: true,
            keep_alive: false,
        }
    }
}

/// TLS options passed through to the transport. Presence alone also drives
/// default-port inference for unrecognized URI schemes.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Server name for SNI; defaults to the connection host when `None`
    pub server_name: Option<String>,
    /// ALPN protocols to offer
    pub alpn_protocols: Vec<String>,
    /// Verify the peer certificate
    pub verify_peer: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            server_name: None,
            alpn_protocols: Vec::new(),
            verify_peer: true,
        }
    }
}

/// Options for establishing one client connection
pub struct HttpConnectOptions {
    /// Destination host name
    pub host: String,
    /// Destination port
    pub port: u16,
    /// Socket-level options
    pub socket: SocketOptions,
    /// TLS options; `None` for plaintext
    pub tls: Option<TlsOptions>,
    /// Initial connection-level receive window in bytes
    pub initial_window_size: usize,
    /// Fires when establishment succeeds or fails
    pub on_setup: OnConnectionSetup,
    /// Fires when the connection has completely shut down
    pub on_shutdown: OnConnectionShutdown,
}

impl fmt::Debug for HttpConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .field("initial_window_size", &self.initial_window_size)
            .finish()
    }
}

/// Establishes client connections over a byte-oriented transport.
///
/// `connect` returns synchronously; the outcome arrives via the callbacks in
/// the options. An `Err` return means no attempt was started and no callback
/// will fire.
pub trait HttpConnector: Send + Sync {
    fn connect(&self, options: HttpConnectOptions) -> Result<()>;
}

/// Options for dispatching one request/response exchange
pub struct StreamRequestOptions {
    /// Request method
    pub method: Method,
    /// Request path and query
    pub path: Bytes,
    /// Request headers, in send order
    pub headers: Vec<Header>,
    /// Callbacks for the exchange
    pub callbacks: StreamCallbacks,
}

/// A live client connection.
///
/// Releasing a connection is expressed by dropping the `Arc`; closing it is
/// a separate, idempotent request that eventually produces the shutdown
/// callback.
pub trait ClientConnection: Send + Sync {
    /// Dispatch a request, producing a [`Stream`] for the exchange.
    ///
    /// Fails without side effects if the connection cannot accept a new
    /// request (e.g. it is closing); no partial stream is left behind.
    fn request(&self, options: StreamRequestOptions) -> Result<Stream>;

    /// The transport channel underlying this connection.
    ///
    /// Fails once the connection is shutting down.
    fn channel(&self) -> Result<Channel>;

    /// Request closure. Idempotent; completion is reported through the
    /// shutdown callback supplied at connect time.
    fn close(&self);
}

/// Operations a transport channel must supply to a protocol handler
/// installed over it
pub trait ChannelOps: Send + Sync {
    /// Whether the channel can still carry data
    fn is_open(&self) -> bool;
    /// Grant the peer `increment` more bytes of receive window
    fn update_window(&self, increment: usize);
    /// Begin channel shutdown
    fn shutdown(&self);
}

/// Opaque handle to a connection's transport channel
#[derive(Clone)]
pub struct Channel {
    ops: Arc<dyn ChannelOps>,
}

impl Channel {
    /// Wrap transport channel operations in a handle
    pub fn new(ops: Arc<dyn ChannelOps>) -> Self {
        Self { ops }
    }

    /// Whether the channel can still carry data
    pub fn is_open(&self) -> bool {
        self.ops.is_open()
    }

    /// Grant the peer `increment` more bytes of receive window
    pub fn update_window(&self, increment: usize) {
        self.ops.update_window(increment);
    }

    /// Begin channel shutdown
    pub fn shutdown(&self) {
        self.ops.shutdown();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("is_open", &self.is_open())
            .finish()
    }
}
