//! TLS client configuration for `wss://` connections.
//!
//! Certificates are checked against the webpki root store, extended with any roots from
//! [`TlsOptions::root_certificates`]. The outcome of that check can then be overridden,
//! either wholesale through [`TlsOptions::ignore_server_certificate_errors`] or per
//! certificate through a [`CertificateValidation`] callback.

use std::{fmt, sync::Arc};

use tokio_rustls::{
    rustls::{
        self,
        client::{
            danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
            WebPkiServerVerifier,
        },
        crypto::CryptoProvider,
        pki_types::{CertificateDer, ServerName, TrustAnchor, UnixTime},
        CertificateError, DigitallySignedStruct, SignatureScheme,
    },
    TlsConnector,
};

use crate::{Result, WebSocketError};

/// Decides whether a server certificate chain is accepted.
///
/// Receives the end-entity certificate, the intermediates sent by the server and the error
/// produced by the standard verification, if any. Returning `true` accepts the chain.
pub type CertificateValidation = Arc<
    dyn Fn(&CertificateDer<'_>, &[CertificateDer<'_>], Option<&rustls::Error>) -> bool
        + Send
        + Sync,
>;

/// TLS protocol versions that can be enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn supported(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// TLS settings of a connection.
#[derive(Clone, Default)]
pub struct TlsOptions {
    /// Enabled protocol versions. Empty enables TLS 1.2 and 1.3.
    pub versions: Vec<TlsVersion>,
    /// Extra trusted roots, DER encoded.
    pub root_certificates: Vec<CertificateDer<'static>>,
    /// Accept any server certificate. Handshake signatures are still checked.
    pub ignore_server_certificate_errors: bool,
    /// Overrides the verification outcome for each server certificate.
    pub certificate_validation: Option<CertificateValidation>,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("versions", &self.versions)
            .field("root_certificates", &self.root_certificates.len())
            .field(
                "ignore_server_certificate_errors",
                &self.ignore_server_certificate_errors,
            )
            .field(
                "certificate_validation",
                &self.certificate_validation.is_some(),
            )
            .finish()
    }
}

impl TlsOptions {
    #[must_use]
    pub fn with_versions(mut self, versions: impl IntoIterator<Item = TlsVersion>) -> Self {
        self.versions = versions.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_root_certificate(mut self, der: impl Into<CertificateDer<'static>>) -> Self {
        self.root_certificates.push(der.into());
        self
    }

    #[must_use]
    pub fn ignore_server_certificate_errors(mut self) -> Self {
        self.ignore_server_certificate_errors = true;
        self
    }

    #[must_use]
    pub fn with_certificate_validation<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CertificateDer<'_>, &[CertificateDer<'_>], Option<&rustls::Error>) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.certificate_validation = Some(Arc::new(callback));
        self
    }
}

/// Builds a connector from `options`.
///
/// Uses the process-wide crypto provider when one is installed, *ring* otherwise.
pub fn connector(options: &TlsOptions) -> Result<TlsConnector> {
    let provider = CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut roots = webpki_root_store();
    for der in &options.root_certificates {
        roots
            .add(der.clone())
            .map_err(|err| WebSocketError::TlsConfig(err.to_string()))?;
    }

    let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|err| WebSocketError::TlsConfig(err.to_string()))?;

    let verifier = Verifier {
        webpki,
        ignore_errors: options.ignore_server_certificate_errors,
        callback: options.certificate_validation.clone(),
    };

    let versions: Vec<&'static rustls::SupportedProtocolVersion> = if options.versions.is_empty() {
        rustls::ALL_VERSIONS.to_vec()
    } else {
        options.versions.iter().map(|v| v.supported()).collect()
    };

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&versions)
        .map_err(|err| WebSocketError::TlsConfig(err.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}

fn webpki_root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| TrustAnchor {
        subject: ta.subject.clone(),
        subject_public_key_info: ta.subject_public_key_info.clone(),
        name_constraints: ta.name_constraints.clone(),
    }));
    roots
}

/// Parses the host of a URL into a TLS server name.
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    // IPv6 literals come bracketed from the URL
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_owned())
        .map_err(|_| WebSocketError::InvalidDnsName(host.to_owned()))
}

/// Webpki verification with the overrides from [`TlsOptions`].
struct Verifier {
    webpki: Arc<WebPkiServerVerifier>,
    ignore_errors: bool,
    callback: Option<CertificateValidation>,
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("ignore_errors", &self.ignore_errors)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ServerCertVerifier for Verifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let outcome = self.webpki.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );

        if let Some(callback) = &self.callback {
            return if callback(end_entity, intermediates, outcome.as_ref().err()) {
                Ok(ServerCertVerified::assertion())
            } else {
                Err(outcome.err().unwrap_or(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                )))
            };
        }

        match outcome {
            Err(_err) if self.ignore_errors => {
                #[cfg(feature = "logging")]
                log::warn!("ignoring certificate error for {server_name:?}: {_err}");
                Ok(ServerCertVerified::assertion())
            }
            outcome => outcome,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_builds() {
        assert!(connector(&TlsOptions::default()).is_ok());
        assert!(connector(&TlsOptions::default().with_versions([TlsVersion::Tls13])).is_ok());
        assert!(connector(&TlsOptions::default().ignore_server_certificate_errors()).is_ok());
    }

    #[test]
    fn test_invalid_root_rejected() {
        let options = TlsOptions::default().with_root_certificate(vec![1u8, 2, 3]);
        assert!(matches!(
            connector(&options),
            Err(WebSocketError::TlsConfig(_))
        ));
    }

    #[test]
    fn test_server_names() {
        assert!(server_name("example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("[::1]").is_ok());
        assert!(matches!(
            server_name("bad host"),
            Err(WebSocketError::InvalidDnsName(_))
        ));
    }

    #[test]
    fn test_callback_overrides_outcome() {
        let webpki = WebPkiServerVerifier::builder_with_provider(
            Arc::new(webpki_root_store()),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .build()
        .unwrap();
        let cert = CertificateDer::from(vec![0x30, 0x00]);
        let name = ServerName::try_from("example.com").unwrap();

        let accepting = Verifier {
            webpki: webpki.clone(),
            ignore_errors: false,
            callback: TlsOptions::default()
                .with_certificate_validation(|_, _, err| err.is_some())
                .certificate_validation,
        };
        assert!(accepting
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());

        let strict = Verifier {
            webpki: webpki.clone(),
            ignore_errors: false,
            callback: None,
        };
        assert!(strict
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_err());

        let lenient = Verifier {
            webpki,
            ignore_errors: true,
            callback: None,
        };
        assert!(lenient
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
    }
}
