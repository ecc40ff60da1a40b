use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpStream;
use tokio_tungstenite::Connector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::wsrelay::addr::AddrSpec;
use crate::wsrelay::listener::UPGRADE_PATH;
use crate::wsrelay::stream::DuplexStream;

/// Fixed Origin header sent on every WebSocket dial.
pub const WS_ORIGIN: &str = "https://wsf.snows.io/";

/// How a `wss` dial validates the server certificate.
///
/// `TrustAll` accepts any certificate and is the client-mode default so the
/// tunnel works against self-signed endpoints. It offers no protection
/// against an active MITM; call sites can opt into `SystemRoots` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsTrustPolicy {
    TrustAll,
    SystemRoots,
}

/// Establish the peer stream for one accepted connection. A failure here is
/// scoped to that connection only.
pub async fn dial(target: &AddrSpec, trust: TlsTrustPolicy) -> anyhow::Result<DuplexStream> {
    match target.scheme.as_str() {
        "tcp" => {
            let conn = TcpStream::connect(&target.host)
                .await
                .with_context(|| format!("dial tcp {}", target.host))?;
            Ok(DuplexStream::Tcp(conn))
        }
        "ws" | "wss" => dial_ws(target, trust).await,
        other => anyhow::bail!("dial: unsupported scheme {other:?} (expected tcp|ws|wss)"),
    }
}

async fn dial_ws(target: &AddrSpec, trust: TlsTrustPolicy) -> anyhow::Result<DuplexStream> {
    let request = ws_request(target)?;

    let connector = match trust {
        TlsTrustPolicy::TrustAll => {
            Some(Connector::Rustls(Arc::new(danger_tls::trust_all_config())))
        }
        // None lets the library use its native root store.
        TlsTrustPolicy::SystemRoots => None,
    };

    let (ws, _resp) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .with_context(|| format!("dial ws {target}"))?;
    Ok(DuplexStream::Ws(Box::new(ws)))
}

/// Handshake request for a WebSocket target: fixed Origin header, and a bare
/// authority defaults to the relay's upgrade path.
fn ws_request(target: &AddrSpec) -> anyhow::Result<Request> {
    let mut url = target.url().clone();
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(UPGRADE_PATH);
    }

    let mut request = url
        .as_str()
        .into_client_request()
        .with_context(|| format!("dial ws {target}"))?;
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static(WS_ORIGIN));
    Ok(request)
}

mod danger_tls {
    use std::sync::Arc;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};

    pub fn trust_all_config() -> rustls::ClientConfig {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(TrustAllVerifier::new())
            .with_no_client_auth()
    }

    /// Certificate verifier that treats any certificate as valid.
    ///
    /// NOTE: vulnerable to MITM; this backs the explicit
    /// `TlsTrustPolicy::TrustAll` value, never an implicit default.
    #[derive(Debug)]
    struct TrustAllVerifier(Arc<rustls::crypto::CryptoProvider>);

    impl TrustAllVerifier {
        fn new() -> Arc<Self> {
            Arc::new(Self(Arc::new(rustls::crypto::aws_lc_rs::default_provider())))
        }
    }

    impl ServerCertVerifier for TrustAllVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &rustls::DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &rustls::DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
