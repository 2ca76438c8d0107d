use std::{future::IntoFuture, net::SocketAddr};

use futures::future::BoxFuture;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{tls, Result, WebSocketError};

use super::{driver::Target, Options, WebSocket};

/// Builder for a client connection, returned by [`WebSocket::connect`].
///
/// Awaiting the builder checks the URL and options, starts the connection task and
/// resolves to the [`WebSocket`] right away. Progress of the connection is then reported
/// on the event stream.
///
/// # Example
/// ```no_run
/// use wsclient::{Options, WebSocket};
///
/// async fn connect() -> wsclient::Result<()> {
///     let ws = WebSocket::connect("wss://example.com/socket".parse()?)
///         .with_options(Options::default().with_subprotocol("chat"))
///         .await?;
///     Ok(())
/// }
/// ```
pub struct WebSocketBuilder {
    url: Url,
    tcp_address: Option<SocketAddr>,
    connector: Option<TlsConnector>,
    options: Option<Options>,
    cancel: Option<CancellationToken>,
}

impl WebSocketBuilder {
    pub(super) fn new(url: Url) -> Self {
        Self {
            url,
            tcp_address: None,
            connector: None,
            options: None,
            cancel: None,
        }
    }

    /// Sets a custom TLS connector for `wss://` connections.
    ///
    /// Takes precedence over [`Options::tls`].
    pub fn with_connector(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Connects to `address` instead of resolving the URL host.
    ///
    /// The URL host is still used for the `Host` header and the TLS server name.
    pub fn with_tcp_address(mut self, address: SocketAddr) -> Self {
        self.tcp_address = Some(address);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// Aborts the connection, at any stage, when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    async fn start(self) -> Result<WebSocket> {
        let options = self.options.unwrap_or_default();
        options.validate()?;

        let secure = match self.url.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };
        let host = self
            .url
            .host_str()
            .ok_or(WebSocketError::MissingHost)?
            .to_owned();
        let port = self
            .url
            .port_or_known_default()
            .ok_or(WebSocketError::InvalidHttpScheme)?;

        let connector = match (secure, self.connector) {
            (false, _) => None,
            (true, Some(connector)) => Some(connector),
            (true, None) => Some(tls::connector(&options.tls)?),
        };

        let target = Target {
            host,
            port,
            tcp_address: self.tcp_address,
            connector,
        };

        let (ws, driver) = WebSocket::pair(self.url, options, self.cancel);
        tokio::spawn(driver.connect(target));
        Ok(ws)
    }
}

impl IntoFuture for WebSocketBuilder {
    type Output = Result<WebSocket>;
    type IntoFuture = BoxFuture<'static, Result<WebSocket>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.start())
    }
}
