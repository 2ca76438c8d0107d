//! The HTTP/1.1 Upgrade exchange, [RFC 6455 Section 4.1](https://datatracker.ietf.org/doc/html/rfc6455#section-4.1).
//!
//! [`compose`] builds the request bytes, [`perform`] writes them and reads the response
//! head, and [`verify`] checks that the server agreed to switch protocols.

use std::time::Duration;

use base64::prelude::*;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue};
use nom::{
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{digit1, space0, space1},
    combinator::map_res,
    multi::many0,
    IResult, Parser,
};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::{Result, WebSocketError};

/// GUID appended to the key before hashing, RFC 6455 Section 1.3.
const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest response head accepted before the end of headers is seen.
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// A composed Upgrade request.
#[derive(Debug, Clone)]
pub struct Handshake {
    request: Bytes,
    key: String,
    subprotocols: Vec<String>,
}

impl Handshake {
    /// The raw request bytes.
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// The `Sec-WebSocket-Key` that was sent.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `Sec-WebSocket-Accept` value the server must answer with.
    pub fn expected_accept(&self) -> String {
        accept_key(&self.key)
    }
}

/// Parsed response head of the Upgrade exchange.
#[derive(Debug, Clone, Default)]
pub struct HandshakeResult {
    pub status_code: u16,
    pub reason: String,
    /// Response headers. Names are case-insensitive and repeated headers are all kept.
    pub headers: HeaderMap,
    /// The end of the header section was reached.
    pub is_complete: bool,
    /// The response was not valid HTTP.
    pub parse_failed: bool,
    /// No complete response arrived in time.
    pub timed_out: bool,
}

impl HandshakeResult {
    /// Value of header `name`, with repeated headers joined by `", "`.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }
}

/// Builds the Upgrade request for `url`.
///
/// The key is 16 random bytes, base64 encoded. `Host` carries the port only when the URL
/// names one explicitly.
pub fn compose(
    url: &Url,
    origin: Option<&str>,
    headers: &HeaderMap,
    subprotocols: &[String],
) -> Result<Handshake> {
    let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
    let key = generate_key();

    let mut target = url.path().to_owned();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let mut request = BytesMut::with_capacity(256);
    request.extend_from_slice(b"GET ");
    request.extend_from_slice(target.as_bytes());
    request.extend_from_slice(b" HTTP/1.1\r\n");

    let mut line = |name: &[u8], value: &[u8]| {
        request.extend_from_slice(name);
        request.extend_from_slice(b": ");
        request.extend_from_slice(value);
        request.extend_from_slice(b"\r\n");
    };

    line(b"Host", host.as_bytes());
    line(b"Upgrade", b"websocket");
    line(b"Connection", b"Upgrade");
    for (name, value) in headers {
        line(name.as_str().as_bytes(), value.as_bytes());
    }
    if let Some(origin) = origin {
        line(b"Origin", origin.as_bytes());
    }
    line(b"Sec-WebSocket-Key", key.as_bytes());
    if !subprotocols.is_empty() {
        line(b"Sec-WebSocket-Protocol", subprotocols.join(", ").as_bytes());
    }
    line(b"Sec-WebSocket-Version", b"13");
    request.extend_from_slice(b"\r\n");

    Ok(Handshake {
        request: request.freeze(),
        key,
        subprotocols: subprotocols.to_vec(),
    })
}

/// Computes `Sec-WebSocket-Accept` for `key`: base64(SHA-1(key + GUID)).
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Sends `handshake` and reads the response head, all within `timeout`.
///
/// Returns the parsed response and any bytes the server sent after the head, which belong
/// to the first frames.
pub async fn perform<S>(
    io: &mut S,
    handshake: &Handshake,
    timeout: Duration,
) -> Result<(HandshakeResult, BytesMut)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        io.write_all(handshake.request())
            .await
            .map_err(WebSocketError::HandshakeSendFailed)?;
        io.flush()
            .await
            .map_err(WebSocketError::HandshakeSendFailed)?;
        read_response(io).await
    };

    let (result, leftover) = match tokio::time::timeout(timeout, exchange).await {
        Ok(outcome) => outcome?,
        Err(_) => (
            HandshakeResult {
                timed_out: true,
                ..Default::default()
            },
            BytesMut::new(),
        ),
    };

    #[cfg(feature = "logging")]
    log::debug!(
        "handshake response: status={} complete={} failed={} timed_out={}",
        result.status_code,
        result.is_complete,
        result.parse_failed,
        result.timed_out
    );

    if result.timed_out {
        return Err(WebSocketError::HandshakeTimedOut);
    }
    if result.parse_failed {
        return Err(WebSocketError::HandshakeFailed(
            "malformed HTTP response".into(),
        ));
    }
    if !result.is_complete {
        return Err(WebSocketError::HandshakeFailed(
            "connection closed before the end of the response headers".into(),
        ));
    }

    Ok((result, leftover))
}

/// Reads until the end of the response head or the end of the stream.
async fn read_response<S>(io: &mut S) -> Result<(HandshakeResult, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut parser = ResponseParser::default();
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        let read = io
            .read_buf(&mut buf)
            .await
            .map_err(|err| WebSocketError::HandshakeFailed(err.to_string()))?;
        if read == 0 {
            return Ok((HandshakeResult::default(), BytesMut::new()));
        }

        if let Some(parsed) = parser.feed(&mut buf) {
            return Ok(parsed);
        }
    }
}

/// Incremental response head parser.
#[derive(Default)]
pub struct ResponseParser {
    /// Bytes already scanned for the end of headers.
    scanned: usize,
}

impl ResponseParser {
    /// Looks for a complete head in `buf`.
    ///
    /// On success the head is consumed from `buf` and the remaining bytes are returned with
    /// the result. Returns `None` while more input is needed.
    pub fn feed(&mut self, buf: &mut BytesMut) -> Option<(HandshakeResult, BytesMut)> {
        // resume a few bytes back in case the terminator straddles two reads
        let start = self.scanned.saturating_sub(3);
        let end = buf[start..]
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| start + pos + 4);

        let Some(end) = end else {
            self.scanned = buf.len();
            if buf.len() > MAX_RESPONSE_HEAD {
                let failed = HandshakeResult {
                    parse_failed: true,
                    ..Default::default()
                };
                return Some((failed, BytesMut::new()));
            }
            return None;
        };

        let head = buf.split_to(end);
        let leftover = buf.split();
        Some((parse_head(&head), leftover))
    }
}

/// Parses a complete response head, status line to blank line.
pub fn parse_head(head: &[u8]) -> HandshakeResult {
    let failed = HandshakeResult {
        parse_failed: true,
        ..Default::default()
    };

    let Ok((rest, ((status_code, reason), fields))) = response_head(head) else {
        return failed;
    };
    if !rest.is_empty() {
        return failed;
    }

    let mut headers = HeaderMap::new();
    for (name, value) in fields {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name),
            HeaderValue::from_bytes(value.trim_ascii_end()),
        ) else {
            return failed;
        };
        headers.append(name, value);
    }

    HandshakeResult {
        status_code,
        reason: String::from_utf8_lossy(reason).trim_end().to_owned(),
        headers,
        is_complete: true,
        parse_failed: false,
        timed_out: false,
    }
}

type Head<'a> = ((u16, &'a [u8]), Vec<(&'a [u8], &'a [u8])>);

fn response_head(input: &[u8]) -> IResult<&[u8], Head<'_>> {
    (status_line, many0(header_field), tag("\r\n"))
        .map(|(status, fields, _)| (status, fields))
        .parse(input)
}

/// `HTTP/1.1 101 Switching Protocols\r\n`
fn status_line(input: &[u8]) -> IResult<&[u8], (u16, &[u8])> {
    (
        tag("HTTP/"),
        take_while1(|c: u8| c.is_ascii_digit() || c == b'.'),
        space1,
        map_res(digit1, |digits: &[u8]| {
            std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse::<u16>().ok())
                .ok_or(())
        }),
        space0,
        take_till(|c: u8| c == b'\r' || c == b'\n'),
        tag("\r\n"),
    )
        .map(|(_, _, _, code, _, reason, _)| (code, reason))
        .parse(input)
}

/// `Name: value\r\n`
fn header_field(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    (
        take_while1(is_token),
        tag(":"),
        space0,
        take_till(|c: u8| c == b'\r' || c == b'\n'),
        tag("\r\n"),
    )
        .map(|(name, _, _, value, _)| (name, value))
        .parse(input)
}

fn is_token(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

/// Checks the response against the request it answers.
///
/// Returns the subprotocol selected by the server, if subprotocols were requested.
pub fn verify(result: &HandshakeResult, handshake: &Handshake) -> Result<Option<String>> {
    if result.status_code != 101 {
        return Err(WebSocketError::InvalidStatusCode(result.status_code));
    }

    let contains_token = |name: HeaderName, token: &str| {
        result
            .header(name)
            .map(|value| {
                value
                    .split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
            .unwrap_or(false)
    };

    if !contains_token(header::UPGRADE, "websocket") {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }
    if !contains_token(header::CONNECTION, "upgrade") {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    let accept = result.header(header::SEC_WEBSOCKET_ACCEPT);
    if accept.as_deref().map(str::trim) != Some(handshake.expected_accept().as_str()) {
        return Err(WebSocketError::InvalidSecWebSocketAccept);
    }

    if handshake.subprotocols.is_empty() {
        return Ok(None);
    }

    let offered = result
        .header(header::SEC_WEBSOCKET_PROTOCOL)
        .ok_or(WebSocketError::SubprotocolNegotiationFailed)?;
    let offered: Vec<&str> = offered.split(',').map(str::trim).collect();
    if offered.iter().any(|name| name.is_empty()) {
        return Err(WebSocketError::SubprotocolNegotiationFailed);
    }

    offered
        .into_iter()
        .find(|name| handshake.subprotocols.iter().any(|requested| requested == name))
        .map(|name| Some(name.to_owned()))
        .ok_or(WebSocketError::SubprotocolNegotiationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_text(handshake: &Handshake) -> String {
        String::from_utf8(handshake.request().to_vec()).unwrap()
    }

    fn response(handshake: &Handshake, extra: &str) -> HandshakeResult {
        let head = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n{extra}\r\n",
            handshake.expected_accept()
        );
        parse_head(head.as_bytes())
    }

    #[test]
    fn test_compose_with_subprotocols() {
        let url: Url = "ws://example.com/chat".parse().unwrap();
        let protocols = vec!["chat".to_owned(), "super".to_owned()];
        let handshake = compose(&url, None, &HeaderMap::new(), &protocols).unwrap();
        let text = request_text(&handshake);

        assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(text.contains("\r\nSec-WebSocket-Protocol: chat, super\r\n"));
        assert!(text.ends_with("Sec-WebSocket-Version: 13\r\n\r\n"));

        let key = text
            .lines()
            .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap();
        assert_eq!(key.len(), 24);
        assert_eq!(key, handshake.key());
        assert_eq!(BASE64_STANDARD.decode(key).unwrap().len(), 16);
    }

    #[test]
    fn test_compose_line_order() {
        let url: Url = "wss://example.com:9001/a/b?x=1&y=2".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        let handshake = compose(&url, Some("https://example.com"), &headers, &[]).unwrap();
        let text = request_text(&handshake);
        let lines: Vec<&str> = text.split("\r\n").collect();

        assert_eq!(lines[0], "GET /a/b?x=1&y=2 HTTP/1.1");
        assert_eq!(lines[1], "Host: example.com:9001");
        assert_eq!(lines[2], "Upgrade: websocket");
        assert_eq!(lines[3], "Connection: Upgrade");
        assert_eq!(lines[4], "authorization: Bearer t");
        assert_eq!(lines[5], "Origin: https://example.com");
        assert!(lines[6].starts_with("Sec-WebSocket-Key: "));
        assert_eq!(lines[7], "Sec-WebSocket-Version: 13");
        assert_eq!(&lines[8..], &["", ""]);
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_compose_default_port_and_root_path() {
        let url: Url = "ws://example.com".parse().unwrap();
        let handshake = compose(&url, None, &HeaderMap::new(), &[]).unwrap();
        let text = request_text(&handshake);
        assert!(text.starts_with("GET / HTTP/1.1\r\nHost: example.com\r\n"));
    }

    #[test]
    fn test_keys_are_fresh() {
        let url: Url = "ws://example.com".parse().unwrap();
        let a = compose(&url, None, &HeaderMap::new(), &[]).unwrap();
        let b = compose(&url, None, &HeaderMap::new(), &[]).unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_accept_key_rfc_example() {
        // RFC 6455 section 1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_head() {
        let result = parse_head(
            b"HTTP/1.1 101 Switching Protocols\r\nupgrade: websocket\r\nX-A: 1\r\nx-a: 2 \r\n\r\n",
        );
        assert!(result.is_complete);
        assert!(!result.parse_failed);
        assert_eq!(result.status_code, 101);
        assert_eq!(result.reason, "Switching Protocols");
        assert_eq!(result.header("Upgrade").as_deref(), Some("websocket"));
        assert_eq!(result.header("x-a").as_deref(), Some("1, 2"));
        assert_eq!(result.header("missing"), None);
    }

    #[test]
    fn test_parse_head_malformed() {
        assert!(parse_head(b"HTTP/1.1 abc Nope\r\n\r\n").parse_failed);
        assert!(parse_head(b"garbage\r\n\r\n").parse_failed);
        assert!(parse_head(b"HTTP/1.1 101 OK\r\nbad header\r\n\r\n").parse_failed);
    }

    #[test]
    fn test_parser_incremental_with_leftover() {
        let input = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x02hi";
        let mut parser = ResponseParser::default();
        let mut buf = BytesMut::new();

        let mut parsed = None;
        for byte in input.iter() {
            buf.extend_from_slice(&[*byte]);
            if let Some(result) = parser.feed(&mut buf) {
                parsed = Some(result);
                break;
            }
        }

        let (result, leftover) = parsed.unwrap();
        assert_eq!(result.status_code, 101);
        assert!(leftover.is_empty());

        let mut buf = BytesMut::from(&input[..]);
        let (_, leftover) = ResponseParser::default().feed(&mut buf).unwrap();
        assert_eq!(&leftover[..], b"\x81\x02hi");
    }

    #[test]
    fn test_parser_rejects_oversized_head() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 101 OK\r\n"[..]);
        buf.extend_from_slice(&vec![b'a'; MAX_RESPONSE_HEAD]);
        let (result, _) = ResponseParser::default().feed(&mut buf).unwrap();
        assert!(result.parse_failed);
    }

    #[test]
    fn test_verify_accepts_valid_response() {
        let url: Url = "ws://example.com/".parse().unwrap();
        let handshake = compose(&url, None, &HeaderMap::new(), &[]).unwrap();
        assert_eq!(verify(&response(&handshake, ""), &handshake).unwrap(), None);
    }

    #[test]
    fn test_verify_status_and_headers() {
        let url: Url = "ws://example.com/".parse().unwrap();
        let handshake = compose(&url, None, &HeaderMap::new(), &[]).unwrap();

        let result = parse_head(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        assert!(matches!(
            verify(&result, &handshake),
            Err(WebSocketError::InvalidStatusCode(200))
        ));

        let result = parse_head(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\n\r\n");
        assert!(matches!(
            verify(&result, &handshake),
            Err(WebSocketError::InvalidUpgradeHeader)
        ));

        let result = parse_head(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n");
        assert!(matches!(
            verify(&result, &handshake),
            Err(WebSocketError::InvalidConnectionHeader)
        ));

        let result = parse_head(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Accept: nope\r\n\r\n",
        );
        assert!(matches!(
            verify(&result, &handshake),
            Err(WebSocketError::InvalidSecWebSocketAccept)
        ));
    }

    #[test]
    fn test_verify_subprotocols() {
        let url: Url = "ws://example.com/".parse().unwrap();
        let protocols = vec!["chat".to_owned(), "super".to_owned()];
        let handshake = compose(&url, None, &HeaderMap::new(), &protocols).unwrap();

        let result = response(&handshake, "Sec-WebSocket-Protocol: super\r\n");
        assert_eq!(
            verify(&result, &handshake).unwrap().as_deref(),
            Some("super")
        );

        for extra in [
            "",
            "Sec-WebSocket-Protocol: other\r\n",
            "Sec-WebSocket-Protocol: chat, \r\n",
        ] {
            let result = response(&handshake, extra);
            assert!(
                matches!(
                    verify(&result, &handshake),
                    Err(WebSocketError::SubprotocolNegotiationFailed)
                ),
                "{extra:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_perform_reads_response() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let url: Url = "ws://example.com/".parse().unwrap();
        let handshake = compose(&url, None, &HeaderMap::new(), &[]).unwrap();
        let accept = handshake.expected_accept();
        let request_len = handshake.request().len();

        let (mut client, mut server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut request = vec![0u8; request_len];
            server.read_exact(&mut request).await.unwrap();
            let mut reply = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
            )
            .into_bytes();
            // an empty ping right behind the head
            reply.extend_from_slice(b"\x89\x00");
            server.write_all(&reply).await.unwrap();
            server
        });

        let (result, leftover) = perform(&mut client, &handshake, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status_code, 101);
        assert!(verify(&result, &handshake).is_ok());
        // the early ping may or may not have arrived in the same read
        assert!(leftover.is_empty() || &leftover[..] == b"\x89\x00");
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_perform_eof_fails() {
        let url: Url = "ws://example.com/".parse().unwrap();
        let handshake = compose(&url, None, &HeaderMap::new(), &[]).unwrap();

        let (mut client, server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut server = server;
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await;
        });

        let err = perform(&mut client, &handshake, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, WebSocketError::HandshakeFailed(_)));
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_perform_times_out() {
        let url: Url = "ws://example.com/".parse().unwrap();
        let handshake = compose(&url, None, &HeaderMap::new(), &[]).unwrap();

        let (mut client, _server) = tokio::io::duplex(4096);
        let err = perform(&mut client, &handshake, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, WebSocketError::HandshakeTimedOut));
    }
}
