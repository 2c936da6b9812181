//! WebSocket opening-handshake helpers
//!
//! Key generation and Sec-WebSocket-Accept computation per RFC 6455, plus
//! construction of the standard upgrade header set. The HTTP wire format
//! itself is produced and parsed by the connection layer; these helpers only
//! build the header list the bootstrap deep-copies into its request buffer.

use base64::Engine;
use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::stream::Header;
use crate::WS_GUID;

/// Generate a random 16-byte Sec-WebSocket-Key, base64-encoded
pub fn generate_key() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let mut bytes = [0u8; 16];
    for byte in &mut bytes {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        *byte = seed as u8;
    }

    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Compute the Sec-WebSocket-Accept value for a key: Base64(SHA-1(key + GUID))
#[inline]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Validate the server's accept key against the key that was sent
pub fn validate_accept_key(sent_key: &str, received_accept: &str) -> bool {
    accept_key(sent_key) == received_accept
}

/// Build the standard upgrade header set for a client handshake.
///
/// Callers with custom handshake requirements may build their own list; the
/// bootstrap only requires that it be non-empty.
pub fn upgrade_headers(host: &str, key: &str, protocol: Option<&str>) -> Vec<Header> {
    let mut headers = vec![
        Header::new(Bytes::from_static(b"Host"), Bytes::from(host.to_owned())),
        Header::new(
            Bytes::from_static(b"Upgrade"),
            Bytes::from_static(b"websocket"),
        ),
        Header::new(
            Bytes::from_static(b"Connection"),
            Bytes::from_static(b"Upgrade"),
        ),
        Header::new(
            Bytes::from_static(b"Sec-WebSocket-Key"),
            Bytes::from(key.to_owned()),
        ),
        Header::new(
            Bytes::from_static(b"Sec-WebSocket-Version"),
            Bytes::from_static(b"13"),
        ),
    ];

    if let Some(proto) = protocol {
        headers.push(Header::new(
            Bytes::from_static(b"Sec-WebSocket-Protocol"),
            Bytes::from(proto.to_owned()),
        ));
    }

    headers
}
