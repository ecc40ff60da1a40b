use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

use crate::wsrelay::addr::AddrSpec;
use crate::wsrelay::dialer::{self, TlsTrustPolicy};
use crate::wsrelay::listener::{self, SocketListener, UpgradeListener};
use crate::wsrelay::relay;
use crate::wsrelay::stream::DuplexStream;

/// Server mode: WebSocket upgrade listener; each upgraded stream is coupled
/// to a raw-socket dial of the target.
pub struct ServerMode {
    ln: UpgradeListener,
    target: AddrSpec,
}

impl ServerMode {
    pub async fn bind(listen: &str, target: &str) -> anyhow::Result<Self> {
        let listen = AddrSpec::parse(listen)?;
        let target = AddrSpec::parse(target)?;
        let ln = UpgradeListener::bind(&listen).await?;
        tracing::info!(listen = %listen, target = %target, "server: listening");
        Ok(Self { ln, target })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr()
    }

    /// Sequential accept loop. An accept error ends the whole mode; upgrade,
    /// dial and relay failures end only their own connection task.
    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (conn, peer) = self.ln.accept().await.context("server: accept")?;
            let target = self.target.clone();
            tokio::spawn(async move {
                let stream = match listener::upgrade(conn).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        tracing::warn!(client = %peer, err = %err, "server: upgrade failed");
                        return;
                    }
                };
                tracing::info!(client = %peer, target = %target, "server: forwarding");
                relay_to_target(stream, peer, &target, TlsTrustPolicy::SystemRoots, false).await;
            });
        }
    }
}

/// Client mode: raw-socket listener; each accepted stream is carried over a
/// WebSocket dial of the target.
pub struct ClientMode {
    ln: SocketListener,
    target: AddrSpec,
    trust: TlsTrustPolicy,
}

impl ClientMode {
    pub async fn bind(listen: &str, target: &str, trust: TlsTrustPolicy) -> anyhow::Result<Self> {
        let listen = AddrSpec::parse(listen)?;
        let target = AddrSpec::parse(target)?;
        let ln = SocketListener::bind(&listen).await?;
        tracing::info!(listen = %listen, target = %target, trust = ?trust, "client: listening");
        Ok(Self { ln, target, trust })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr()
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.ln.accept().await.context("client: accept")?;
            tracing::info!(client = %peer, "client: accepted");
            let target = self.target.clone();
            let trust = self.trust;
            tokio::spawn(async move {
                tracing::info!(client = %peer, target = %target, "client: forwarding");
                relay_to_target(stream, peer, &target, trust, false).await;
            });
        }
    }
}

/// Proxy mode: raw listener to raw dial, with per-chunk payload logging.
pub struct ProxyMode {
    ln: SocketListener,
    target: AddrSpec,
}

impl ProxyMode {
    pub async fn bind(listen: &str, target: &str) -> anyhow::Result<Self> {
        let listen = AddrSpec::parse(listen)?;
        let target = AddrSpec::parse(target)?;
        let ln = SocketListener::bind(&listen).await?;
        tracing::info!(listen = %listen, target = %target, "proxy: listening");
        Ok(Self { ln, target })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr()
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.ln.accept().await.context("proxy: accept")?;
            tracing::info!(client = %peer, "proxy: accepted");
            let target = self.target.clone();
            tokio::spawn(async move {
                tracing::info!(client = %peer, target = %target, "proxy: forwarding");
                relay_to_target(stream, peer, &target, TlsTrustPolicy::SystemRoots, true).await;
            });
        }
    }
}

/// Diagnostic echo mode: every accepted stream is copied back into itself.
pub struct EchoMode {
    ln: SocketListener,
}

impl EchoMode {
    pub async fn bind(listen: &str) -> anyhow::Result<Self> {
        let listen = AddrSpec::parse(listen)?;
        let ln = SocketListener::bind(&listen).await?;
        tracing::info!(listen = %listen, "echo: listening");
        Ok(Self { ln })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ln.local_addr()
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.ln.accept().await.context("echo: accept")?;
            tokio::spawn(async move {
                let (bytes, cause) = relay::echo(stream).await;
                tracing::debug!(
                    client = %peer,
                    bytes,
                    cause = %cause.map(|e| e.to_string()).unwrap_or_else(|| "eof".to_string()),
                    "echo: stream ended"
                );
            });
        }
    }
}

/// Diagnostic ping mode: dial the remote raw socket, write a line every
/// second and log whatever comes back. Ends on the first write error.
pub async fn run_ping(remote: &str) -> anyhow::Result<()> {
    let remote = AddrSpec::parse(remote)?;
    let stream = dialer::dial(&remote, TlsTrustPolicy::SystemRoots).await?;
    tracing::info!(remote = %remote, peer = ?stream.peer_addr(), "ping: connected");

    let (mut rd, mut wr) = stream.into_split();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            match rd.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tracing::info!(line = %String::from_utf8_lossy(&buf[..n]).trim_end(), "ping: received");
                }
            }
        }
    });

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        wr.write_all(b"sending--->\n").await.context("ping: write")?;
    }
}

/// Shared per-connection tail: dial the peer, couple both streams, log the
/// outcome. Failures here never reach the accept loop.
async fn relay_to_target(
    stream: DuplexStream,
    peer: SocketAddr,
    target: &AddrSpec,
    trust: TlsTrustPolicy,
    log_payload: bool,
) {
    let remote = match dialer::dial(target, trust).await {
        Ok(remote) => remote,
        Err(err) => {
            tracing::warn!(client = %peer, target = %target, err = %err, "dial failed");
            stream.close().await;
            return;
        }
    };

    let outcome = if log_payload {
        relay::relay_logged(stream, remote).await
    } else {
        relay::relay(stream, remote).await
    };
    tracing::info!(
        client = %peer,
        target = %target,
        to_remote = outcome.to_remote,
        from_remote = outcome.from_remote,
        cause = %outcome.cause_label(),
        "forwarding stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn spawn_echo() -> u16 {
        let echo = EchoMode::bind("tcp://127.0.0.1:0").await.unwrap();
        let port = echo.local_addr().unwrap().port();
        tokio::spawn(echo.serve());
        port
    }

    #[tokio::test]
    async fn round_trip_through_both_relay_hops() {
        // tcp client -> client mode -> (websocket) -> server mode -> echo
        let echo_port = spawn_echo().await;

        let server = ServerMode::bind(
            "ws://127.0.0.1:0",
            &format!("tcp://127.0.0.1:{echo_port}"),
        )
        .await
        .unwrap();
        let server_port = server.local_addr().unwrap().port();
        tokio::spawn(server.serve());

        let client = ClientMode::bind(
            "tcp://127.0.0.1:0",
            &format!("ws://127.0.0.1:{server_port}"),
            TlsTrustPolicy::TrustAll,
        )
        .await
        .unwrap();
        let client_port = client.local_addr().unwrap().port();
        tokio::spawn(client.serve());

        let mut conn = TcpStream::connect(("127.0.0.1", client_port)).await.unwrap();
        conn.write_all(b"PING\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = timeout(WAIT, conn.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"PING\n");
    }

    #[tokio::test]
    async fn proxy_dial_failure_does_not_end_the_accept_loop() {
        // Nothing listens on port 1, so every dial fails.
        let proxy = ProxyMode::bind("tcp://127.0.0.1:0", "tcp://127.0.0.1:1")
            .await
            .unwrap();
        let port = proxy.local_addr().unwrap().port();
        tokio::spawn(proxy.serve());

        for _ in 0..2 {
            let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            // The accepted stream is closed promptly after the failed dial.
            let mut buf = [0u8; 8];
            let n = timeout(WAIT, conn.read(&mut buf)).await.unwrap().unwrap();
            assert_eq!(n, 0);
        }
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_interleave() {
        let echo_port = spawn_echo().await;
        let proxy = ProxyMode::bind("tcp://127.0.0.1:0", &format!("tcp://127.0.0.1:{echo_port}"))
            .await
            .unwrap();
        let port = proxy.local_addr().unwrap().port();
        tokio::spawn(proxy.serve());

        let mut a = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut b = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        a.write_all(b"session-a").await.unwrap();
        b.write_all(b"session-b").await.unwrap();

        let mut buf = [0u8; 16];
        let n = timeout(WAIT, a.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"session-a");
        let n = timeout(WAIT, b.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"session-b");
    }

    #[tokio::test]
    async fn eof_with_no_data_tears_the_session_down() {
        let echo_port = spawn_echo().await;
        let proxy = ProxyMode::bind("tcp://127.0.0.1:0", &format!("tcp://127.0.0.1:{echo_port}"))
            .await
            .unwrap();
        let port = proxy.local_addr().unwrap().port();
        tokio::spawn(proxy.serve());

        let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        conn.shutdown().await.unwrap();

        // The peer-side close must come back to us; the relay must not hang.
        let mut buf = [0u8; 8];
        let n = timeout(WAIT, conn.read(&mut buf))
            .await
            .expect("relay hung after EOF")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn accept_failure_ends_the_loop_but_not_open_sessions() {
        let echo = EchoMode::bind("tcp://127.0.0.1:0").await.unwrap();
        echo.ln.fail_accepts_after(1);
        let port = echo.local_addr().unwrap().port();
        let serving = tokio::spawn(echo.serve());

        let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        // The accept after ours fails, which is fatal for the whole mode.
        let served = timeout(WAIT, serving)
            .await
            .expect("accept loop survived a failed accept")
            .unwrap();
        assert!(served.is_err());

        // The already-accepted session keeps running to completion.
        conn.write_all(b"still here\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = timeout(WAIT, conn.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"still here\n");
    }
}
