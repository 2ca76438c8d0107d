use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::{frame::MAX_CONTROL_PAYLOAD, tls::TlsOptions, Result, WebSocketError};

use super::{MAX_PAYLOAD_READ, MAX_READ_BUFFER};

/// Configuration options for a WebSocket connection.
///
/// `Options` governs payload limits, timeouts, keep-alive pings and the extra data sent
/// with the Upgrade request. Every setter consumes and returns the value, so options are
/// built by chaining:
///
/// ```
/// use std::time::Duration;
/// use wsclient::Options;
///
/// let options = Options::default()
///     .with_subprotocol("chat")
///     .with_client_ping(Duration::from_secs(20))
///     .with_close_timeout(Duration::from_secs(2));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Maximum allowed payload size of a single incoming frame, in bytes.
    ///
    /// A larger frame aborts the connection with close code 1009.
    ///
    /// Default: 1 MiB as defined in [`MAX_PAYLOAD_READ`]
    pub max_payload_read: Option<usize>,

    /// Maximum size of a reassembled fragmented message.
    ///
    /// Default: 2 MiB as defined in [`MAX_READ_BUFFER`], or twice the configured
    /// `max_payload_read` value if that is set.
    pub max_read_buffer: Option<usize>,

    /// Validate that text messages contain UTF-8 before emitting them.
    ///
    /// Default: `false`
    pub check_utf8: bool,

    /// Value of the `Origin` request header.
    pub origin: Option<String>,

    /// Extra headers sent with the Upgrade request.
    pub headers: HeaderMap,

    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in order of preference.
    pub subprotocols: Vec<String>,

    /// Send a ping every `client_ping_interval` while connected.
    ///
    /// Default: `false`
    pub client_ping: bool,

    /// Default: 30 seconds
    pub client_ping_interval: Duration,

    /// Payload of the keep-alive pings. Empty when unset.
    pub client_ping_message: Option<Bytes>,

    /// Default: 15 seconds
    pub connect_timeout: Duration,

    /// Bound on the whole Upgrade exchange.
    ///
    /// Default: 30 seconds
    pub handshake_timeout: Duration,

    /// How long a client-initiated close waits for the server's close frame.
    ///
    /// Default: 5 seconds
    pub close_timeout: Duration,

    /// Answer an empty ping with an empty pong. When `false` the pong carries a single
    /// zero byte.
    ///
    /// Default: `true`
    pub exclude_zero_application_data_in_pong: bool,

    /// Used for `wss://` URLs unless the builder was given a connector.
    pub tls: TlsOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload_read: None,
            max_read_buffer: None,
            check_utf8: false,
            origin: None,
            headers: HeaderMap::new(),
            subprotocols: Vec::new(),
            client_ping: false,
            client_ping_interval: Duration::from_secs(30),
            client_ping_message: None,
            connect_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            exclude_zero_application_data_in_pong: true,
            tls: TlsOptions::default(),
        }
    }
}

impl Options {
    /// Sets the `Origin` header of the Upgrade request.
    pub fn with_origin(self, origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..self
        }
    }

    /// Appends a header to the Upgrade request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Appends every header of `headers` to the Upgrade request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        let mut last = None;
        for (name, value) in headers {
            // HeaderMap yields the name only for the first value of each header
            if let Some(name) = name {
                last = Some(name);
            }
            if let Some(name) = &last {
                self.headers.append(name.clone(), value);
            }
        }
        self
    }

    /// Offers a subprotocol to the server.
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Offers several subprotocols, in order of preference.
    pub fn with_subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols
            .extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Enables keep-alive pings sent every `interval` while connected.
    pub fn with_client_ping(self, interval: Duration) -> Self {
        Self {
            client_ping: true,
            client_ping_interval: interval,
            ..self
        }
    }

    /// Sets the payload of keep-alive pings.
    pub fn with_client_ping_message(self, message: impl Into<Bytes>) -> Self {
        Self {
            client_ping_message: Some(message.into()),
            ..self
        }
    }

    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            ..self
        }
    }

    pub fn with_handshake_timeout(self, timeout: Duration) -> Self {
        Self {
            handshake_timeout: timeout,
            ..self
        }
    }

    pub fn with_close_timeout(self, timeout: Duration) -> Self {
        Self {
            close_timeout: timeout,
            ..self
        }
    }

    /// Sets the maximum allowed payload size for incoming frames.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of a reassembled fragmented message.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Enables UTF-8 validation for incoming text messages.
    pub fn with_utf8(self) -> Self {
        Self {
            check_utf8: true,
            ..self
        }
    }

    pub fn with_tls(self, tls: TlsOptions) -> Self {
        Self { tls, ..self }
    }

    pub fn exclude_zero_application_data_in_pong(self, exclude: bool) -> Self {
        Self {
            exclude_zero_application_data_in_pong: exclude,
            ..self
        }
    }

    /// Checks the options for values no connection can work with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(WebSocketError::InvalidOptions("connect timeout is zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(WebSocketError::InvalidOptions("handshake timeout is zero"));
        }
        if self.close_timeout.is_zero() {
            return Err(WebSocketError::InvalidOptions("close timeout is zero"));
        }
        if self.client_ping && self.client_ping_interval.is_zero() {
            return Err(WebSocketError::InvalidOptions("client ping interval is zero"));
        }
        if self
            .client_ping_message
            .as_ref()
            .is_some_and(|message| message.len() > MAX_CONTROL_PAYLOAD)
        {
            return Err(WebSocketError::InvalidOptions(
                "client ping message exceeds 125 bytes",
            ));
        }
        if self.subprotocols.iter().any(|p| p.trim().is_empty()) {
            return Err(WebSocketError::InvalidOptions("blank subprotocol name"));
        }
        if self.max_payload_read == Some(0) || self.max_read_buffer == Some(0) {
            return Err(WebSocketError::InvalidOptions("zero payload limit"));
        }
        Ok(())
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(crate) fn read_buffer_limit(&self) -> usize {
        self.max_read_buffer.unwrap_or_else(|| {
            self.max_payload_read
                .map(|size| size.saturating_mul(2))
                .unwrap_or(MAX_READ_BUFFER)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.payload_limit(), 1024 * 1024);
        assert_eq!(options.read_buffer_limit(), 2 * 1024 * 1024);
        assert_eq!(options.connect_timeout, Duration::from_secs(15));
        assert_eq!(options.handshake_timeout, Duration::from_secs(30));
        assert_eq!(options.close_timeout, Duration::from_secs(5));
        assert_eq!(options.client_ping_interval, Duration::from_secs(30));
        assert!(!options.client_ping);
        assert!(!options.check_utf8);
        assert!(options.exclude_zero_application_data_in_pong);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_read_buffer_follows_payload_limit() {
        let options = Options::default().with_max_payload_read(1000);
        assert_eq!(options.read_buffer_limit(), 2000);

        let options = options.with_max_read_buffer(1500);
        assert_eq!(options.read_buffer_limit(), 1500);
    }

    #[test]
    fn test_builders() {
        let options = Options::default()
            .with_origin("https://example.com")
            .with_header(
                HeaderName::from_static("x-token"),
                HeaderValue::from_static("abc"),
            )
            .with_subprotocols(["chat", "super"])
            .with_client_ping(Duration::from_secs(10))
            .with_client_ping_message("hb")
            .exclude_zero_application_data_in_pong(false)
            .with_utf8();

        assert_eq!(options.origin.as_deref(), Some("https://example.com"));
        assert_eq!(options.headers["x-token"], "abc");
        assert_eq!(options.subprotocols, vec!["chat", "super"]);
        assert!(options.client_ping);
        assert_eq!(options.client_ping_interval, Duration::from_secs(10));
        assert_eq!(options.client_ping_message.as_deref(), Some(&b"hb"[..]));
        assert!(!options.exclude_zero_application_data_in_pong);
        assert!(options.check_utf8);
    }

    #[test]
    fn test_with_headers_keeps_duplicates() {
        let mut extra = HeaderMap::new();
        extra.append("x-a", HeaderValue::from_static("1"));
        extra.append("x-a", HeaderValue::from_static("2"));
        extra.append("x-b", HeaderValue::from_static("3"));

        let options = Options::default().with_headers(extra);
        let values: Vec<_> = options.headers.get_all("x-a").iter().collect();
        assert_eq!(values, vec!["1", "2"]);
        assert_eq!(options.headers["x-b"], "3");
    }

    #[test]
    fn test_validate_rejects() {
        let invalid = [
            Options::default().with_connect_timeout(Duration::ZERO),
            Options::default().with_handshake_timeout(Duration::ZERO),
            Options::default().with_close_timeout(Duration::ZERO),
            Options::default().with_client_ping(Duration::ZERO),
            Options::default().with_client_ping_message(vec![0u8; 126]),
            Options::default().with_subprotocol("  "),
            Options::default().with_max_payload_read(0),
        ];
        for options in invalid {
            assert!(matches!(
                options.validate(),
                Err(WebSocketError::InvalidOptions(_))
            ));
        }
    }
}
