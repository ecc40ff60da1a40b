use std::io;
use std::net::SocketAddr;

use bytes::{Buf, Bytes};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Both the upgrade and dial paths produce this concrete WebSocket type;
/// plain connections ride in `MaybeTlsStream::Plain`.
pub type WsConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live duplex byte channel: a raw TCP connection or a WebSocket-framed
/// one. The relay engine treats both as an opaque byte pipe.
pub enum DuplexStream {
    Tcp(TcpStream),
    Ws(Box<WsConn>),
}

impl DuplexStream {
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            DuplexStream::Tcp(conn) => conn.peer_addr().ok(),
            DuplexStream::Ws(ws) => match ws.get_ref() {
                MaybeTlsStream::Plain(conn) => conn.peer_addr().ok(),
                MaybeTlsStream::Rustls(tls) => tls.get_ref().0.peer_addr().ok(),
                _ => None,
            },
        }
    }

    /// Split into independently owned halves so the two relay directions can
    /// run concurrently.
    pub fn into_split(self) -> (StreamReader, StreamWriter) {
        match self {
            DuplexStream::Tcp(conn) => {
                let (rd, wr) = conn.into_split();
                (
                    StreamReader::Tcp(rd),
                    StreamWriter::Tcp { wr, closed: false },
                )
            }
            DuplexStream::Ws(ws) => {
                let (tx, rx) = (*ws).split();
                (
                    StreamReader::Ws {
                        rx,
                        pending: Bytes::new(),
                    },
                    StreamWriter::Ws { tx, closed: false },
                )
            }
        }
    }

    /// Close a stream that never entered a relay session (dial-failure path).
    pub async fn close(self) {
        let (_rd, mut wr) = self.into_split();
        let _ = wr.close().await;
    }
}

/// Read half of a [`DuplexStream`].
pub enum StreamReader {
    Tcp(OwnedReadHalf),
    Ws {
        rx: SplitStream<WsConn>,
        /// Payload bytes from the last message that did not fit the caller's
        /// buffer; handed out by subsequent reads.
        pending: Bytes,
    },
}

impl StreamReader {
    /// Read up to `buf.len()` bytes; `Ok(0)` is EOF.
    ///
    /// The WebSocket variant yields the payload bytes of Binary/Text messages
    /// as a continuous stream -- message boundaries are not preserved.
    /// Close frames and clean connection teardown surface as EOF; Ping/Pong
    /// frames are absorbed.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamReader::Tcp(rd) => rd.read(buf).await,
            StreamReader::Ws { rx, pending } => loop {
                if !pending.is_empty() {
                    let n = pending.len().min(buf.len());
                    buf[..n].copy_from_slice(&pending[..n]);
                    pending.advance(n);
                    return Ok(n);
                }
                let payload = match rx.next().await {
                    None => return Ok(0),
                    Some(Ok(Message::Binary(data))) => Bytes::from(data),
                    Some(Ok(Message::Text(text))) => Bytes::from(text.into_bytes()),
                    Some(Ok(Message::Close(_))) => return Ok(0),
                    Some(Ok(_)) => continue,
                    Some(Err(
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                    )) => return Ok(0),
                    Some(Err(err)) => return Err(ws_io_error(err)),
                };
                *pending = payload;
            },
        }
    }
}

/// Write half of a [`DuplexStream`].
pub enum StreamWriter {
    Tcp { wr: OwnedWriteHalf, closed: bool },
    Ws {
        tx: SplitSink<WsConn, Message>,
        closed: bool,
    },
}

impl StreamWriter {
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            StreamWriter::Tcp { wr, .. } => wr.write_all(data).await,
            // One Binary message per write; `send` flushes.
            StreamWriter::Ws { tx, .. } => tx
                .send(Message::Binary(data.to_vec()))
                .await
                .map_err(ws_io_error),
        }
    }

    /// Close the write direction: TCP half-shutdown, or a WebSocket Close
    /// frame. Idempotent -- a second call is a no-op.
    pub async fn close(&mut self) -> io::Result<()> {
        match self {
            StreamWriter::Tcp { wr, closed } => {
                if *closed {
                    return Ok(());
                }
                *closed = true;
                wr.shutdown().await
            }
            StreamWriter::Ws { tx, closed } => {
                if *closed {
                    return Ok(());
                }
                *closed = true;
                match tx.send(Message::Close(None)).await {
                    Ok(())
                    | Err(
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                    ) => Ok(()),
                    Err(err) => Err(ws_io_error(err)),
                }
            }
        }
    }
}

fn ws_io_error(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(err) => err,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::ErrorKind::UnexpectedEof.into()
        }
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
