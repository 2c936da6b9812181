//! WebSocket message handler
//!
//! The [`Websocket`] object is what a successful bootstrap hands to the
//! caller: a handle over the connection's transport channel, installed in
//! place of the HTTP layer, that relays incoming frame events to the
//! caller's callbacks and lets the caller manage its read window.
//!
//! Frame parsing and serialization happen in the transport; this handler
//! only orchestrates.

use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::Channel;
use crate::error::{Error, Result};

/// WebSocket endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client (must mask frames)
    Client,
    /// Server (must not mask frames)
    Server,
}

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }
}

/// Header of an incoming frame, as observed by the transport
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Payload length
    pub payload_len: u64,
}

/// Fires when a new incoming frame begins. Return `false` to stop reading.
pub type OnFrameBegin = Box<dyn FnMut(&Websocket, &FrameHeader) -> bool + Send>;
/// Fires for each chunk of incoming frame payload. Return `false` to stop
/// reading.
pub type OnFramePayload = Box<dyn FnMut(&Websocket, &[u8]) -> bool + Send>;
/// Fires when an incoming frame ends, with the error that cut it short
/// (if any).
pub type OnFrameComplete = Box<dyn FnMut(&Websocket, Option<Error>) + Send>;

/// The three frame callbacks, registered together or not at all
pub struct FrameCallbacks {
    pub on_begin: OnFrameBegin,
    pub on_payload: OnFramePayload,
    pub on_complete: OnFrameComplete,
}

/// Options for constructing a message handler over a channel
pub struct WebsocketOptions {
    /// The transport channel to install over
    pub channel: Channel,
    /// Initial receive-window size in bytes
    pub initial_window_size: usize,
    /// Endpoint role
    pub role: Role,
    /// Frame callbacks; `None` for headers-only callers
    pub frame_callbacks: Option<FrameCallbacks>,
}

struct WebsocketInner {
    channel: Channel,
    role: Role,
    initial_window_size: usize,
    callbacks: Mutex<Option<FrameCallbacks>>,
}

/// Live WebSocket message handler
///
/// Cloneable handle; ownership transfers to the caller at successful setup,
/// after which the bootstrap only relays the shutdown notification.
#[derive(Clone)]
pub struct Websocket {
    inner: Arc<WebsocketInner>,
}

impl Websocket {
    /// Install a message handler over the given channel.
    ///
    /// Fails if the channel can no longer carry data.
    pub fn new(options: WebsocketOptions) -> Result<Self> {
        if !options.channel.is_open() {
            return Err(Error::InvalidState("transport channel is closed"));
        }

        Ok(Self {
            inner: Arc::new(WebsocketInner {
                channel: options.channel,
                role: options.role,
                initial_window_size: options.initial_window_size,
                callbacks: Mutex::new(options.frame_callbacks),
            }),
        })
    }

    /// Endpoint role
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// The receive-window size the handler was configured with
    pub fn initial_window_size(&self) -> usize {
        self.inner.initial_window_size
    }

    /// Grant the peer `size` more bytes of read window
    pub fn increment_read_window(&self, size: usize) {
        if size > 0 {
            self.inner.channel.update_window(size);
        }
    }

    /// Begin shutting the connection down
    pub fn close(&self) {
        self.inner.channel.shutdown();
    }

    /// Relay an incoming frame header to the caller. Returns `false` when
    /// the caller asked to stop reading. Headers-only callers (no frame
    /// callbacks) always continue.
    pub fn deliver_frame_begin(&self, header: &FrameHeader) -> bool {
        self.with_callbacks(|ws, cbs| (cbs.on_begin)(ws, header))
            .unwrap_or(true)
    }

    /// Relay a chunk of incoming frame payload to the caller
    pub fn deliver_frame_payload(&self, data: &[u8]) -> bool {
        self.with_callbacks(|ws, cbs| (cbs.on_payload)(ws, data))
            .unwrap_or(true)
    }

    /// Relay frame completion to the caller
    pub fn deliver_frame_complete(&self, error: Option<Error>) {
        self.with_callbacks(|ws, cbs| (cbs.on_complete)(ws, error));
    }

    /// Run `f` against the registered callbacks, if any. The callback set is
    /// taken out of its slot for the duration of the call so callbacks may
    /// use the handler freely.
    fn with_callbacks<R>(&self, f: impl FnOnce(&Websocket, &mut FrameCallbacks) -> R) -> Option<R> {
        let taken = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        taken.map(|mut cbs| {
            let result = f(self, &mut cbs);
            *self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(cbs);
            result
        })
    }
}

impl std::fmt::Debug for Websocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Websocket")
            .field("role", &self.inner.role)
            .field("initial_window_size", &self.inner.initial_window_size)
            .finish()
    }
}
