use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::wsrelay::addr::AddrSpec;
use crate::wsrelay::stream::DuplexStream;

/// Fixed HTTP path the server-mode upgrade endpoint answers on.
pub const UPGRADE_PATH: &str = "/wsforwarding";

/// Raw-socket listener (client, proxy and echo modes).
pub struct SocketListener {
    ln: TcpListener,
    #[cfg(test)]
    accepts_before_failure: std::sync::atomic::AtomicUsize,
}

impl SocketListener {
    pub async fn bind(spec: &AddrSpec) -> anyhow::Result<Self> {
        if spec.scheme != "tcp" {
            anyhow::bail!(
                "listen: unsupported scheme {:?} (expected tcp)",
                spec.scheme
            );
        }
        let ln = TcpListener::bind(&spec.host)
            .await
            .with_context(|| format!("bind tcp {}", spec.host))?;
        Ok(Self {
            ln,
            #[cfg(test)]
            accepts_before_failure: std::sync::atomic::AtomicUsize::new(usize::MAX),
        })
    }

    /// Make `accept` return an error once `n` more accepts have succeeded.
    #[cfg(test)]
    pub fn fail_accepts_after(&self, n: usize) {
        self.accepts_before_failure
            .store(n, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr().ok()
    }

    /// One accepted raw stream. An error here ends the caller's accept loop;
    /// there is no per-error retry.
    pub async fn accept(&self) -> std::io::Result<(DuplexStream, SocketAddr)> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            let left = self.accepts_before_failure.load(Ordering::Relaxed);
            if left == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected accept failure",
                ));
            }
            if left != usize::MAX {
                self.accepts_before_failure.store(left - 1, Ordering::Relaxed);
            }
        }
        let (conn, peer) = self.ln.accept().await?;
        Ok((DuplexStream::Tcp(conn), peer))
    }
}

/// WebSocket upgrade listener (server mode): a plain TCP listener whose
/// accepted connections are promoted to duplex streams by [`upgrade`].
///
/// The listener is owned by its mode controller -- no process-wide routing
/// state, so several server-mode instances can coexist in one process.
pub struct UpgradeListener {
    ln: TcpListener,
}

impl UpgradeListener {
    pub async fn bind(spec: &AddrSpec) -> anyhow::Result<Self> {
        if !spec.is_websocket() {
            anyhow::bail!("listen: unsupported scheme {:?} (expected ws)", spec.scheme);
        }
        let ln = TcpListener::bind(&spec.host)
            .await
            .with_context(|| format!("bind ws {}", spec.host))?;
        Ok(Self { ln })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr().ok()
    }

    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.ln.accept().await
    }
}

/// Server-side WebSocket handshake. Only [`UPGRADE_PATH`] is admitted; any
/// other path is refused during the handshake callback. Failures here are
/// scoped to the one connection and never end the accept loop.
pub async fn upgrade(conn: TcpStream) -> anyhow::Result<DuplexStream> {
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != UPGRADE_PATH {
            let mut resp = ErrorResponse::new(Some("not found".to_string()));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            return Err(resp);
        }
        Ok(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async(MaybeTlsStream::Plain(conn), callback)
        .await
        .context("websocket handshake")?;
    Ok(DuplexStream::Ws(Box::new(ws)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn socket_listener_rejects_ws_scheme() {
        let spec = AddrSpec::parse("ws://127.0.0.1:0").unwrap();
        assert!(SocketListener::bind(&spec).await.is_err());
    }

    #[tokio::test]
    async fn upgrade_listener_rejects_tcp_scheme() {
        let spec = AddrSpec::parse("tcp://127.0.0.1:0").unwrap();
        assert!(UpgradeListener::bind(&spec).await.is_err());
    }

    #[tokio::test]
    async fn upgrade_refuses_unknown_path() {
        let spec = AddrSpec::parse("ws://127.0.0.1:0").unwrap();
        let ln = UpgradeListener::bind(&spec).await.unwrap();
        let port = ln.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (conn, _peer) = ln.accept().await.unwrap();
            upgrade(conn).await
        });

        let res = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/other")).await;
        assert!(res.is_err());
        assert!(server.await.unwrap().is_err());
    }
}
