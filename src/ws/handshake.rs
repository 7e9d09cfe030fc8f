//! HTTP upgrade handshake.
//!
//! Reads the HTTP/1.1 request head straight off the socket, decides between
//! a plain liveness request and an upgrade attempt, and renders the three
//! responses the relay ever writes: `101 Switching Protocols`,
//! `429 Too Many Requests` and the `200` liveness reply.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::domain::RoomId;
use crate::error::{HandshakeError, RelayError};

/// Fixed GUID appended to the client key before hashing.
pub const ACCEPT_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Query parameter naming the room to join.
pub const ROOM_PARAM: &str = "room";

/// Body of the plain-HTTP liveness response.
pub const LIVENESS_BODY: &str = "duet-relay online";

/// Response written when the target room is full.
pub const TOO_MANY_REQUESTS: &[u8] =
    b"HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Computes the `Sec-WebSocket-Accept` token for a client key:
/// base64(SHA-1(key + magic)).
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_MAGIC.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Renders the `101 Switching Protocols` response for `key`.
#[must_use]
pub fn switching_protocols(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(key)
    )
}

/// Renders the `200 text/plain` liveness response.
#[must_use]
pub fn liveness_response() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{LIVENESS_BODY}",
        LIVENESS_BODY.len()
    )
}

/// Parsed HTTP request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target, path plus optional query.
    pub target: String,
    /// Header name/value pairs in arrival order.
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses a request head (without the terminating blank line).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::MalformedRequest`] if the head is not UTF-8,
    /// the request line lacks a method or target, or a header line has no
    /// colon.
    pub fn parse(head: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| HandshakeError::MalformedRequest("head is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            return Err(HandshakeError::MalformedRequest(format!(
                "bad request line: {request_line:?}"
            )));
        };

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                return Err(HandshakeError::MalformedRequest(format!(
                    "bad header line: {line:?}"
                )));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            headers,
        })
    }

    /// Returns the first value of header `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if the request asks for a protocol upgrade.
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.header("upgrade").is_some()
    }

    /// Returns the value of query parameter `name`, percent-decoded.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.target.split_once('?')?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Client `Sec-WebSocket-Key`.
    pub key: String,
    /// Room to join: explicit from the query, otherwise freshly generated.
    pub room_id: RoomId,
    /// Whether `room_id` was generated by the server.
    pub generated: bool,
}

impl UpgradeRequest {
    /// Validates an upgrade request head and resolves its target room.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::MissingKey`] if `Sec-WebSocket-Key` is
    /// absent or empty.
    pub fn from_head(head: &RequestHead) -> Result<Self, HandshakeError> {
        let key = head
            .header("sec-websocket-key")
            .filter(|k| !k.is_empty())
            .ok_or(HandshakeError::MissingKey)?
            .to_string();

        let (room_id, generated) = match head.query_param(ROOM_PARAM).filter(|r| !r.is_empty()) {
            Some(room) => (RoomId::from(room), false),
            None => (RoomId::generate(), true),
        };

        Ok(Self {
            key,
            room_id,
            generated,
        })
    }
}

/// Reads from `reader` until a complete request head has arrived.
///
/// Returns the parsed head and any bytes read past it, which belong to the
/// frame stream.
///
/// # Errors
///
/// Returns [`HandshakeError::HeadTooLarge`] if no blank line appears within
/// `max_bytes`, [`HandshakeError::ClosedEarly`] on EOF, a malformed-request
/// error from [`RequestHead::parse`], or a transport error.
pub async fn read_request_head<R>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<(RequestHead, BytesMut), RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let mut searched: usize = 0;
    loop {
        let from = searched.saturating_sub(HEAD_TERMINATOR.len() - 1);
        if let Some(pos) = buf.get(from..).and_then(find_terminator) {
            let head_end = from + pos;
            let mut rest = buf.split_off(head_end + HEAD_TERMINATOR.len());
            buf.truncate(head_end);
            let head = RequestHead::parse(&buf)?;
            rest.reserve(4096);
            return Ok((head, rest));
        }
        searched = buf.len();

        if buf.len() >= max_bytes {
            return Err(HandshakeError::HeadTooLarge { limit: max_bytes }.into());
        }
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(HandshakeError::ClosedEarly.into());
        }
    }
}

/// Position of the blank line ending a request head within `bytes`.
fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const UPGRADE: &str = "GET /?room=abc HTTP/1.1\r\n\
        Host: localhost:8080\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    fn head(text: &str) -> RequestHead {
        let Ok(head) = RequestHead::parse(text.trim_end().as_bytes()) else {
            panic!("failed to parse head");
        };
        head
    }

    #[test]
    fn accept_key_matches_rfc_sample() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn switching_protocols_carries_accept_token() {
        let response = switching_protocols("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.ends_with("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"));
    }

    #[test]
    fn liveness_is_plain_text() {
        let response = liveness_response();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/plain\r\n"));
        assert!(response.ends_with(LIVENESS_BODY));
    }

    #[test]
    fn parses_upgrade_with_explicit_room() {
        let head = head(UPGRADE);
        assert_eq!(head.method, "GET");
        assert!(head.is_upgrade());
        assert_eq!(head.header("SEC-WEBSOCKET-VERSION"), Some("13"));

        let Ok(upgrade) = UpgradeRequest::from_head(&head) else {
            panic!("upgrade rejected");
        };
        assert_eq!(upgrade.room_id, RoomId::from("abc"));
        assert!(!upgrade.generated);
        assert_eq!(upgrade.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn room_param_is_percent_decoded() {
        let head = head("GET /play?mode=x&room=team%20one HTTP/1.1\r\nUpgrade: websocket\r\n");
        assert_eq!(head.query_param(ROOM_PARAM).as_deref(), Some("team one"));
    }

    #[test]
    fn absent_or_empty_room_is_generated() {
        for target in ["/", "/?room=", "/?other=1"] {
            let text = format!(
                "GET {target} HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: k\r\n"
            );
            let Ok(upgrade) = UpgradeRequest::from_head(&head(&text)) else {
                panic!("upgrade rejected for {target}");
            };
            assert!(upgrade.generated);
            assert_eq!(upgrade.room_id.as_str().len(), 6);
        }
    }

    #[test]
    fn missing_key_is_rejected() {
        let head = head("GET /?room=abc HTTP/1.1\r\nUpgrade: websocket\r\n");
        assert!(matches!(
            UpgradeRequest::from_head(&head),
            Err(HandshakeError::MissingKey)
        ));
    }

    #[test]
    fn plain_request_is_not_upgrade() {
        assert!(!head("GET / HTTP/1.1\r\nHost: x\r\n").is_upgrade());
    }

    #[test]
    fn malformed_header_line() {
        assert!(matches!(
            RequestHead::parse(b"GET / HTTP/1.1\r\nno-colon-here"),
            Err(HandshakeError::MalformedRequest(_))
        ));
        assert!(matches!(
            RequestHead::parse(b""),
            Err(HandshakeError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn reads_head_split_across_reads_and_keeps_leftover() {
        let (first, second) = UPGRADE.split_at(30);
        let mut mock = Builder::new()
            .read(first.as_bytes())
            .read(second.as_bytes())
            .read(&[0x81, 0x80])
            .build();

        let Ok((head, mut leftover)) = read_request_head(&mut mock, 8192).await else {
            panic!("head not read");
        };
        assert_eq!(head.target, "/?room=abc");
        if leftover.is_empty() {
            let _ = mock.read_buf(&mut leftover).await;
        }
        assert_eq!(leftover.as_ref(), &[0x81, 0x80]);
    }

    #[tokio::test]
    async fn leftover_in_same_read_is_preserved() {
        let mut bytes = UPGRADE.as_bytes().to_vec();
        bytes.extend_from_slice(&[0x89, 0x00]);
        let mut mock = Builder::new().read(&bytes).build();

        let Ok((_, leftover)) = read_request_head(&mut mock, 8192).await else {
            panic!("head not read");
        };
        assert_eq!(leftover.as_ref(), &[0x89, 0x00]);
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let mut mock = Builder::new().read(&[b'a'; 64]).build();
        let result = read_request_head(&mut mock, 32).await;
        assert!(matches!(
            result,
            Err(RelayError::Handshake(HandshakeError::HeadTooLarge { limit: 32 }))
        ));
    }

    #[tokio::test]
    async fn eof_before_head_is_closed_early() {
        let mut mock = Builder::new().read(b"GET / HTTP/1.1\r\n").build();
        let result = read_request_head(&mut mock, 8192).await;
        assert!(matches!(
            result,
            Err(RelayError::Handshake(HandshakeError::ClosedEarly))
        ));
    }
}
