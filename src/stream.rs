//! Request/response stream abstraction
//!
//! A `Stream` represents one outstanding request/response exchange on a
//! connection. Callers interact with it only through the declared callback
//! surface and the two driver operations; protocol-specific behavior is
//! supplied by the connection layer through [`StreamDriver`], fixed at
//! creation.
//!
//! Ownership is shared: the issuing connection keeps a handle until it has
//! delivered the stream-complete callback, and the caller may keep a handle
//! until it is done with the exchange. The driver's `destroy` runs when the
//! last handle drops.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use bytes::{Bytes, BytesMut};
use http::Method;

use crate::connection::ClientConnection;
use crate::error::Error;

/// A single HTTP header as raw bytes, preserving case and input order.
///
/// Name and value are cheap `Bytes` handles, typically slices of a larger
/// backing buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name
    pub name: Bytes,
    /// Header value
    pub value: Bytes,
}

impl Header {
    /// Create a header from anything convertible to `Bytes`
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Header name as UTF-8, if valid
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.name).ok()
    }

    /// Header value as UTF-8, if valid
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Progress of an outgoing body producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingBody {
    /// More body data will follow
    InProgress,
    /// The body is finished
    Done,
}

/// Produces outgoing request body data into the supplied buffer
pub type OutgoingBodyFn = Box<dyn FnMut(&Stream, &mut BytesMut) -> OutgoingBody + Send>;
/// Invoked for each batch of incoming headers
pub type IncomingHeadersFn = Box<dyn FnMut(&Stream, &[Header]) + Send>;
/// Invoked once the incoming header block is done; the flag indicates
/// whether body data is expected to follow
pub type HeaderBlockDoneFn = Box<dyn FnMut(&Stream, bool) + Send>;
/// Invoked for each chunk of incoming body data
pub type IncomingBodyFn = Box<dyn FnMut(&Stream, &[u8]) + Send>;
/// Invoked when the peer finishes sending the request (server side)
pub type RequestEndFn = Box<dyn FnMut(&Stream) + Send>;
/// Invoked exactly once when the exchange completes
pub type StreamCompleteFn = Box<dyn FnOnce(&Stream, Option<Error>) + Send>;

/// The caller-supplied callback set for one exchange
///
/// Every slot is optional; unset slots are skipped at delivery.
#[derive(Default)]
pub struct StreamCallbacks {
    pub outgoing_body: Option<OutgoingBodyFn>,
    pub on_incoming_headers: Option<IncomingHeadersFn>,
    pub on_header_block_done: Option<HeaderBlockDoneFn>,
    pub on_incoming_body: Option<IncomingBodyFn>,
    pub on_request_end: Option<RequestEndFn>,
    pub on_complete: Option<StreamCompleteFn>,
}

/// The two operations a connection-layer implementation must supply for its
/// streams. The driver is fixed at stream creation and never changes.
pub trait StreamDriver: Send + Sync {
    /// Release protocol-level resources held by the stream.
    ///
    /// Runs when the last stream handle drops.
    fn destroy(&self);

    /// Signal readiness to receive `increment` more bytes of response body.
    ///
    /// Safe to invoke at any point after stream creation, zero or more
    /// times.
    fn update_window(&self, increment: usize);
}

/// Response status sentinel meaning "not yet observed"
const STATUS_UNKNOWN: u16 = 0;

struct StreamInner {
    driver: Box<dyn StreamDriver>,
    connection: Weak<dyn ClientConnection>,
    callbacks: Mutex<StreamCallbacks>,
    response_status: AtomicU16,
    incoming_request: Mutex<Option<(Method, Bytes)>>,
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        self.driver.destroy();
    }
}

/// Shared handle to one request/response exchange
///
/// Cloning the handle increments the atomic reference count; the exchange is
/// destroyed when the last handle drops. The issuing connection must keep a
/// handle until it has delivered the stream-complete callback.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl Stream {
    /// Create a stream. Called by connection implementations when a request
    /// is dispatched; the driver carries the protocol-specific behavior.
    pub fn new(
        driver: Box<dyn StreamDriver>,
        connection: Weak<dyn ClientConnection>,
        callbacks: StreamCallbacks,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                driver,
                connection,
                callbacks: Mutex::new(callbacks),
                response_status: AtomicU16::new(STATUS_UNKNOWN),
                incoming_request: Mutex::new(None),
            }),
        }
    }

    /// Grant the peer `increment` more bytes of response-body window.
    ///
    /// Zero-byte increments are ignored.
    pub fn update_window(&self, increment: usize) {
        if increment > 0 {
            self.inner.driver.update_window(increment);
        }
    }

    /// The owning connection, if it is still alive
    pub fn connection(&self) -> Option<Arc<dyn ClientConnection>> {
        self.inner.connection.upgrade()
    }

    /// The incoming response status, once observed
    pub fn response_status(&self) -> Option<u16> {
        match self.inner.response_status.load(Ordering::Acquire) {
            STATUS_UNKNOWN => None,
            status => Some(status),
        }
    }

    /// Record the incoming response status. Called by the connection when
    /// the status line (or HEADERS frame) is observed.
    pub fn record_response_status(&self, status: u16) {
        self.inner.response_status.store(status, Ordering::Release);
    }

    /// The incoming request method and raw URI (server side), once recorded
    pub fn incoming_request(&self) -> Option<(Method, Bytes)> {
        lock(&self.inner.incoming_request).clone()
    }

    /// Record the incoming request line (server side)
    pub fn record_incoming_request(&self, method: Method, uri: Bytes) {
        *lock(&self.inner.incoming_request) = Some((method, uri));
    }

    /// Pump the outgoing body producer, if one is registered
    pub fn deliver_outgoing_body(&self, buf: &mut BytesMut) -> Option<OutgoingBody> {
        let cb = lock(&self.inner.callbacks).outgoing_body.take();
        cb.map(|mut cb| {
            let state = cb(self, buf);
            lock(&self.inner.callbacks).outgoing_body = Some(cb);
            state
        })
    }

    /// Deliver a batch of incoming headers to the registered callback
    pub fn deliver_incoming_headers(&self, headers: &[Header]) {
        // Take the callback out of its slot before invoking so the lock is
        // not held across the call.
        let cb = lock(&self.inner.callbacks).on_incoming_headers.take();
        if let Some(mut cb) = cb {
            cb(self, headers);
            lock(&self.inner.callbacks).on_incoming_headers = Some(cb);
        }
    }

    /// Signal that the incoming header block is done
    pub fn deliver_header_block_done(&self, body_follows: bool) {
        let cb = lock(&self.inner.callbacks).on_header_block_done.take();
        if let Some(mut cb) = cb {
            cb(self, body_follows);
            lock(&self.inner.callbacks).on_header_block_done = Some(cb);
        }
    }

    /// Deliver a chunk of incoming body data
    pub fn deliver_incoming_body(&self, data: &[u8]) {
        let cb = lock(&self.inner.callbacks).on_incoming_body.take();
        if let Some(mut cb) = cb {
            cb(self, data);
            lock(&self.inner.callbacks).on_incoming_body = Some(cb);
        }
    }

    /// Signal that the peer finished sending the request (server side)
    pub fn deliver_request_end(&self) {
        let cb = lock(&self.inner.callbacks).on_request_end.take();
        if let Some(mut cb) = cb {
            cb(self);
            lock(&self.inner.callbacks).on_request_end = Some(cb);
        }
    }

    /// Deliver the stream-complete callback. The callback slot is consumed;
    /// later calls are no-ops.
    pub fn deliver_complete(&self, error: Option<Error>) {
        let cb = lock(&self.inner.callbacks).on_complete.take();
        if let Some(cb) = cb {
            cb(self, error);
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("response_status", &self.response_status())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct TestDriver {
        destroyed: Arc<AtomicBool>,
        window: Arc<AtomicUsize>,
    }

    impl StreamDriver for TestDriver {
        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }

        fn update_window(&self, increment: usize) {
            self.window.fetch_add(increment, Ordering::SeqCst);
        }
    }

    fn test_stream(callbacks: StreamCallbacks) -> (Stream, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let destroyed = Arc::new(AtomicBool::new(false));
        let window = Arc::new(AtomicUsize::new(0));
        let driver = TestDriver {
            destroyed: destroyed.clone(),
            window: window.clone(),
        };
        let stream = Stream::new(Box::new(driver), Weak::<MockConn>::new(), callbacks);
        (stream, destroyed, window)
    }

    struct MockConn;
    impl ClientConnection for MockConn {
        fn request(
            &self,
            _options: crate::connection::StreamRequestOptions,
        ) -> crate::error::Result<Stream> {
            Err(Error::ConnectionClosed)
        }
        fn channel(&self) -> crate::error::Result<crate::connection::Channel> {
            Err(Error::ConnectionClosed)
        }
        fn close(&self) {}
    }

    #[test]
    fn test_destroy_runs_when_last_handle_drops() {
        let (stream, destroyed, _) = test_stream(StreamCallbacks::default());
        let second = stream.clone();
        drop(stream);
        assert!(!destroyed.load(Ordering::SeqCst));
        drop(second);
        assert!(destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_update_window_forwards_nonzero_increments() {
        let (stream, _, window) = test_stream(StreamCallbacks::default());
        stream.update_window(0);
        assert_eq!(window.load(Ordering::SeqCst), 0);
        stream.update_window(100);
        stream.update_window(24);
        assert_eq!(window.load(Ordering::SeqCst), 124);
    }

    #[test]
    fn test_response_status_initially_unknown() {
        let (stream, _, _) = test_stream(StreamCallbacks::default());
        assert_eq!(stream.response_status(), None);
        stream.record_response_status(101);
        assert_eq!(stream.response_status(), Some(101));
    }

    #[test]
    fn test_headers_callback_survives_repeated_delivery() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        let callbacks = StreamCallbacks {
            on_incoming_headers: Some(Box::new(move |_, headers| {
                seen_cb.fetch_add(headers.len(), Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let (stream, _, _) = test_stream(callbacks);
        let batch = [Header::new("upgrade", "websocket")];
        stream.deliver_incoming_headers(&batch);
        stream.deliver_incoming_headers(&batch);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_complete_callback_consumed_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = fired.clone();
        let callbacks = StreamCallbacks {
            on_complete: Some(Box::new(move |_, _| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let (stream, _, _) = test_stream(callbacks);
        stream.deliver_complete(None);
        stream.deliver_complete(Some(Error::ConnectionClosed));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_incoming_request_record() {
        let (stream, _, _) = test_stream(StreamCallbacks::default());
        assert!(stream.incoming_request().is_none());
        stream.record_incoming_request(Method::GET, Bytes::from_static(b"/chat"));
        let (method, uri) = stream.incoming_request().expect("request recorded");
        assert_eq!(method, Method::GET);
        assert_eq!(&uri[..], b"/chat");
    }

    #[test]
    fn test_outgoing_body_pump() {
        let callbacks = StreamCallbacks {
            outgoing_body: Some(Box::new(|_, buf| {
                buf.extend_from_slice(b"chunk");
                OutgoingBody::Done
            })),
            ..Default::default()
        };
        let (stream, _, _) = test_stream(callbacks);
        let mut buf = BytesMut::new();
        assert_eq!(
            stream.deliver_outgoing_body(&mut buf),
            Some(OutgoingBody::Done)
        );
        assert_eq!(&buf[..], b"chunk");

        let (bare, _, _) = test_stream(StreamCallbacks::default());
        assert_eq!(bare.deliver_outgoing_body(&mut buf), None);
    }
}
