//! WebSocket client bootstrap
//!
//! The bootstrap brings a websocket connection into this world and sees it
//! out again: it requests an HTTP connection, performs the opening handshake
//! (HTTP Upgrade request), creates the websocket message handler, and
//! installs it over the connection's channel. It is responsible for firing
//! the setup and shutdown callbacks — exactly one terminal callback per
//! connect attempt, under every success/failure ordering.
//!
//! Stage progression:
//!
//! ```text
//! connect() ── validate ──> Connecting ──> Handshaking ──> Established
//!                               │               │               │
//!                               │          cancel-on-error      │
//!                               │               ▼               │
//!                               │            Closing            │
//!                               ▼               ▼               ▼
//!                         setup(Err) ──────> Done <── shutdown relay
//! ```
//!
//! Every stage after `connect()` returns is invoked from the connection
//! layer's own callback dispatch, never re-entrantly from within the
//! previous stage.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use http::{Method, Uri};

use crate::connection::{
    ClientConnection, HttpConnectOptions, HttpConnector, SocketOptions, StreamRequestOptions,
    TlsOptions,
};
use crate::error::{Error, Result};
use crate::stream::{Header, Stream, StreamCallbacks};
use crate::websocket::{
    FrameCallbacks, OnFrameBegin, OnFrameComplete, OnFramePayload, Role, Websocket,
    WebsocketOptions,
};

/// Response status that accepts the upgrade (RFC 6455 Section 1.3)
pub const SWITCHING_PROTOCOLS: u16 = 101;

/// Receive window for the handshake HTTP connection; adequate space for
/// response data to trickle in.
const HANDSHAKE_WINDOW_SIZE: usize = 1024;

/// Response pre-reservation estimates. Tuning constants only — the response
/// storage grows dynamically, so these carry no correctness weight.
const EXTRA_RESPONSE_HEADERS_ESTIMATE: usize = 10;
const RESPONSE_HEADER_LENGTH_ESTIMATE: usize = 64;

/// Hard cap on accumulated response-header bytes. Exceeding it aborts the
/// handshake.
pub const MAX_RESPONSE_HEADER_BYTES: usize = 8 * 1024;

static SCHEME_PORTS: [(&str, u16); 4] =
    [("http", 80), ("https", 443), ("ws", 80), ("wss", 443)];

/// Outcome of the setup phase, delivered exactly once.
///
/// `error` is present if and only if `websocket` is absent.
pub struct SetupEvent {
    /// The live message handler; ownership transfers to the caller
    pub websocket: Option<Websocket>,
    /// The failure cause, when no handler was produced
    pub error: Option<Error>,
    /// Response status of the handshake exchange, if one was observed
    pub response_status: Option<u16>,
    /// Response headers captured so far, in input order
    pub response_headers: Vec<Header>,
}

/// Delivered exactly once after a successful setup, when the connection has
/// completely shut down
pub struct ShutdownEvent {
    /// The now-detached message handler
    pub websocket: Websocket,
    /// The error that caused the shutdown, if any
    pub error: Option<Error>,
}

/// Fires exactly once with the setup outcome
pub type OnWebsocketSetup = Box<dyn FnOnce(SetupEvent) + Send>;
/// Fires exactly once after a successful setup, when the connection has
/// shut down
pub type OnWebsocketShutdown = Box<dyn FnOnce(ShutdownEvent) + Send>;

/// Options for a websocket connect attempt
pub struct ClientConnectOptions {
    /// Establishes the underlying HTTP connection
    pub connector: Arc<dyn HttpConnector>,
    /// Destination URI; port is inferred from the scheme when absent
    pub uri: Uri,
    /// Socket-level options passed through to the transport
    pub socket: SocketOptions,
    /// TLS options; also drives default-port inference for unknown schemes
    pub tls: Option<TlsOptions>,
    /// Handshake request headers; required, deep-copied at connect
    pub handshake_headers: Vec<Header>,
    /// Initial receive-window size for the message handler
    pub initial_window_size: usize,
    /// Setup outcome callback (required)
    pub on_setup: OnWebsocketSetup,
    /// Shutdown callback, relevant only after a successful setup
    pub on_shutdown: Option<OnWebsocketShutdown>,
    /// Incoming-frame callbacks: set all three, or none (headers-only mode)
    pub on_frame_begin: Option<OnFrameBegin>,
    pub on_frame_payload: Option<OnFramePayload>,
    pub on_frame_complete: Option<OnFrameComplete>,
}

/// Begin a websocket connect attempt.
///
/// Validates options synchronously and initiates the HTTP connection. An
/// `Err` return means no attempt began and no callback will fire; after an
/// `Ok` return every outcome is reported through the setup callback and —
/// for successful setups — the shutdown callback, exactly once each.
pub fn connect(options: ClientConnectOptions) -> Result<()> {
    let ClientConnectOptions {
        connector,
        uri,
        socket,
        tls,
        handshake_headers,
        initial_window_size,
        on_setup,
        on_shutdown,
        on_frame_begin,
        on_frame_payload,
        on_frame_complete,
    } = options;

    let frame_callbacks = match (on_frame_begin, on_frame_payload, on_frame_complete) {
        (Some(on_begin), Some(on_payload), Some(on_complete)) => Some(FrameCallbacks {
            on_begin,
            on_payload,
            on_complete,
        }),
        (None, None, None) => None,
        _ => {
            tracing::error!(
                "invalid websocket connection options: either all frame callbacks \
                 must be set, or none"
            );
            return Err(Error::InvalidArgument(
                "either all frame callbacks must be set, or none",
            ));
        }
    };

    if handshake_headers.is_empty() {
        tracing::error!("invalid websocket connection options: missing handshake headers");
        return Err(Error::InvalidArgument(
            "handshake headers are required for the websocket client handshake",
        ));
    }

    let host = match uri.host() {
        Some(host) => host.to_owned(),
        None => {
            tracing::error!("invalid websocket connection options: URI has no host");
            return Err(Error::InvalidArgument("websocket URI missing host"));
        }
    };

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let (_, request_path, request_headers) =
        copy_request_data(path.as_bytes(), &handshake_headers);

    let port = infer_port(&uri, tls.as_ref());

    let span_estimate = request_headers.len() + EXTRA_RESPONSE_HEADERS_ESTIMATE;
    let bootstrap = Arc::new(Bootstrap {
        state: Mutex::new(State {
            phase: Phase::Connecting,
            initial_window_size,
            on_setup: Some(on_setup),
            on_shutdown,
            frame_callbacks,
            request_path,
            request_headers,
            response_status: None,
            response_storage: BytesMut::with_capacity(
                span_estimate * RESPONSE_HEADER_LENGTH_ESTIMATE,
            ),
            response_spans: Vec::with_capacity(span_estimate),
            setup_error: None,
            connection: None,
            handshake_stream: None,
            websocket: None,
        }),
    });

    tracing::trace!(uri = %uri, port, "websocket setup begun");

    let setup_bootstrap = bootstrap.clone();
    let shutdown_bootstrap = bootstrap;
    connector.connect(HttpConnectOptions {
        host,
        port,
        socket,
        tls,
        initial_window_size: HANDSHAKE_WINDOW_SIZE,
        on_setup: Box::new(move |result| setup_bootstrap.on_http_setup(result)),
        on_shutdown: Box::new(move |error| shutdown_bootstrap.on_http_shutdown(error)),
    })
}

/// Infer the destination port when the URI does not carry one: match the
/// scheme against the static table, then fall back on TLS presence.
fn infer_port(uri: &Uri, tls: Option<&TlsOptions>) -> u16 {
    if let Some(port) = uri.port_u16() {
        return port;
    }

    if let Some(scheme) = uri.scheme_str() {
        for (candidate, port) in &SCHEME_PORTS {
            if scheme.eq_ignore_ascii_case(candidate) {
                return *port;
            }
        }
    }

    if tls.is_some() {
        443
    } else {
        80
    }
}

/// Deep-copy the request path and headers into one contiguous buffer sized
/// exactly to the sum of the component lengths, and hand back cheap slices
/// of the frozen buffer.
fn copy_request_data(path: &[u8], headers: &[Header]) -> (Bytes, Bytes, Vec<Header>) {
    let mut total = path.len();
    for header in headers {
        total += header.name.len() + header.value.len();
    }

    let mut storage = BytesMut::with_capacity(total);
    storage.extend_from_slice(path);

    let mut spans = Vec::with_capacity(headers.len());
    for header in headers {
        let name_at = storage.len();
        storage.extend_from_slice(&header.name);
        let value_at = storage.len();
        storage.extend_from_slice(&header.value);
        spans.push((name_at, header.name.len(), value_at, header.value.len()));
    }

    // Sized exactly above; a mismatch here would mean the sum was wrong.
    debug_assert_eq!(storage.len(), total);

    let storage = storage.freeze();
    let request_path = storage.slice(0..path.len());
    let request_headers = spans
        .into_iter()
        .map(|(name_at, name_len, value_at, value_len)| Header {
            name: storage.slice(name_at..name_at + name_len),
            value: storage.slice(value_at..value_at + value_len),
        })
        .collect();

    (storage, request_path, request_headers)
}

/// Connect-attempt stage. The terminal dispatch in `on_http_shutdown` keys
/// off whether `Established` was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Handshaking,
    Established,
    Closing,
    Done,
}

/// Span of one copied response header inside the response storage,
/// as (offset, len) pairs. Resolved to slices only after the storage is
/// frozen, because growth may relocate it.
struct HeaderSpan {
    name: (usize, usize),
    value: (usize, usize),
}

struct State {
    phase: Phase,
    initial_window_size: usize,
    on_setup: Option<OnWebsocketSetup>,
    on_shutdown: Option<OnWebsocketShutdown>,
    frame_callbacks: Option<FrameCallbacks>,

    request_path: Bytes,
    request_headers: Vec<Header>,

    response_status: Option<u16>,
    response_storage: BytesMut,
    response_spans: Vec<HeaderSpan>,

    setup_error: Option<Error>,
    connection: Option<Arc<dyn ClientConnection>>,
    handshake_stream: Option<Stream>,
    websocket: Option<Websocket>,
}

impl State {
    fn take_response_headers(&mut self) -> Vec<Header> {
        let storage = std::mem::take(&mut self.response_storage).freeze();
        self.response_spans
            .drain(..)
            .map(|span| Header {
                name: storage.slice(span.name.0..span.name.0 + span.name.1),
                value: storage.slice(span.value.0..span.value.0 + span.value.1),
            })
            .collect()
    }
}

struct Bootstrap {
    state: Mutex<State>,
}

impl Bootstrap {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoked when the HTTP connection has been established (or failed to
    /// be established).
    fn on_http_setup(self: Arc<Self>, result: Result<Arc<dyn ClientConnection>>) {
        let connection = match result {
            Err(error) => {
                tracing::error!(%error, "websocket setup failed to establish HTTP connection");
                let on_setup = {
                    let mut st = self.lock();
                    st.phase = Phase::Done;
                    st.on_setup.take()
                };
                if let Some(on_setup) = on_setup {
                    on_setup(SetupEvent {
                        websocket: None,
                        error: Some(error),
                        response_status: None,
                        response_headers: Vec::new(),
                    });
                }
                return;
            }
            Ok(connection) => connection,
        };

        // A connection exists. From here on, every failure must close it and
        // wait for shutdown before the caller hears about the outcome.
        let request = {
            let mut st = self.lock();
            st.phase = Phase::Handshaking;
            st.connection = Some(connection.clone());

            let headers_bootstrap = self.clone();
            let complete_bootstrap = self.clone();
            StreamRequestOptions {
                method: Method::GET,
                path: st.request_path.clone(),
                headers: st.request_headers.clone(),
                callbacks: StreamCallbacks {
                    on_incoming_headers: Some(Box::new(move |stream, headers| {
                        headers_bootstrap.on_handshake_response_headers(stream, headers);
                    })),
                    on_complete: Some(Box::new(move |stream, error| {
                        complete_bootstrap.on_handshake_complete(stream, error);
                    })),
                    ..Default::default()
                },
            }
        };

        match connection.request(request) {
            Ok(stream) => {
                self.lock().handshake_stream = Some(stream);
                tracing::trace!("HTTP connection established, sending websocket upgrade request");
            }
            Err(error) => {
                tracing::error!(%error, "failed to initiate websocket upgrade request");
                self.cancel_setup(&connection, error);
            }
        }
    }

    /// Deep-copy each delivered response header into the growable response
    /// storage. Destinations are recorded as (offset, len) spans and
    /// resolved only after the storage reaches its final address.
    fn on_handshake_response_headers(&self, stream: &Stream, headers: &[Header]) {
        let mut st = self.lock();
        for header in headers {
            let needed = header.name.len() + header.value.len();
            if st.response_storage.len() + needed > MAX_RESPONSE_HEADER_BYTES {
                drop(st);
                tracing::error!("error while processing handshake response headers");
                if let Some(connection) = stream.connection() {
                    self.cancel_setup(
                        &connection,
                        Error::Capacity("handshake response header section too large"),
                    );
                }
                return;
            }

            let name_at = st.response_storage.len();
            st.response_storage.extend_from_slice(&header.name);
            let value_at = st.response_storage.len();
            st.response_storage.extend_from_slice(&header.value);
            st.response_spans.push(HeaderSpan {
                name: (name_at, header.name.len()),
                value: (value_at, header.value.len()),
            });
        }
    }

    /// Invoked when the handshake exchange completes; the sole successful
    /// exit from the setup phase.
    fn on_handshake_complete(&self, stream: &Stream, error: Option<Error>) {
        // Release our handle in every path; the connection keeps its own
        // until it has finished with the stream.
        let _handshake_stream = self.lock().handshake_stream.take();

        let Some(connection) = stream.connection() else {
            debug_assert!(false, "stream completed without an owning connection");
            return;
        };

        if let Some(error) = error {
            self.cancel_setup(&connection, error);
            return;
        }

        let status = stream.response_status();
        {
            let mut st = self.lock();
            st.response_status = status;
            if st.setup_error.is_some() {
                // Already canceled; the shutdown callback reports the first
                // recorded error.
                return;
            }
        }

        if status != Some(SWITCHING_PROTOCOLS) {
            tracing::error!(
                status = status.unwrap_or(0),
                "server refused websocket upgrade"
            );
            self.cancel_setup(&connection, Error::UpgradeFailure(status.unwrap_or(0)));
            return;
        }

        let channel = match connection.channel() {
            Ok(channel) => channel,
            Err(error) => {
                tracing::error!(%error, "failed to take transport channel for websocket handler");
                self.cancel_setup(&connection, error);
                return;
            }
        };

        let (initial_window_size, frame_callbacks) = {
            let mut st = self.lock();
            (st.initial_window_size, st.frame_callbacks.take())
        };

        let websocket = match Websocket::new(WebsocketOptions {
            channel,
            initial_window_size,
            role: Role::Client,
            frame_callbacks,
        }) {
            Ok(websocket) => websocket,
            Err(error) => {
                tracing::error!(%error, "failed to create websocket handler");
                self.cancel_setup(&connection, error);
                return;
            }
        };

        let (on_setup, response_status, response_headers) = {
            let mut st = self.lock();
            st.websocket = Some(websocket.clone());
            st.phase = Phase::Established;
            let headers = st.take_response_headers();
            (st.on_setup.take(), st.response_status, headers)
        };

        tracing::debug!("websocket client connection established");

        if let Some(on_setup) = on_setup {
            on_setup(SetupEvent {
                websocket: Some(websocket),
                error: None,
                response_status,
                response_headers,
            });
        }
    }

    /// Called if something goes wrong after an HTTP connection exists. The
    /// connection is closed; the terminal callback waits for its shutdown.
    /// Idempotent — only the first error is recorded.
    fn cancel_setup(&self, connection: &Arc<dyn ClientConnection>, error: Error) {
        {
            let mut st = self.lock();
            if st.setup_error.is_some() {
                return;
            }
            tracing::error!(%error, "canceling websocket setup");
            st.setup_error = Some(error);
            st.phase = Phase::Closing;
        }
        connection.close();
    }

    /// Invoked when the HTTP connection has shut down; the single terminal
    /// dispatch point. Never called if the connection failed its setup.
    fn on_http_shutdown(&self, error: Option<Error>) {
        let mut st = self.lock();
        let connection = st.connection.take();
        let stream = st.handshake_stream.take();
        let phase = st.phase;
        st.phase = Phase::Done;

        if phase == Phase::Established {
            let on_shutdown = st.on_shutdown.take();
            let websocket = st.websocket.take();
            drop(st);

            if let (Some(on_shutdown), Some(websocket)) = (on_shutdown, websocket) {
                match &error {
                    Some(error) => {
                        tracing::debug!(%error, "websocket client connection shut down with error")
                    }
                    None => tracing::debug!("websocket client connection shut down"),
                }
                on_shutdown(ShutdownEvent { websocket, error });
            }
        } else {
            let error = error
                .or_else(|| st.setup_error.take())
                .unwrap_or(Error::Unknown);
            let response_status = st.response_status;
            let response_headers = st.take_response_headers();
            let on_setup = st.on_setup.take();
            drop(st);

            tracing::error!(%error, "websocket setup failed");
            if let Some(on_setup) = on_setup {
                on_setup(SetupEvent {
                    websocket: None,
                    error: Some(error),
                    response_status,
                    response_headers,
                });
            }
        }

        drop(stream);
        drop(connection);
    }
}
