use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::wsrelay::stream::{DuplexStream, StreamReader, StreamWriter};

/// Per-direction transfer buffer. Nothing is buffered across reads.
const COPY_BUF_BYTES: usize = 64 * 1024;

/// What ended a relay session.
pub struct RelayOutcome {
    /// Bytes copied client -> remote.
    pub to_remote: u64,
    /// Bytes copied remote -> client.
    pub from_remote: u64,
    /// Error from the direction that terminated first; `None` on clean EOF.
    pub cause: Option<io::Error>,
}

impl RelayOutcome {
    /// Short description of the terminating condition, for status lines.
    pub fn cause_label(&self) -> String {
        match &self.cause {
            Some(err) => err.to_string(),
            None => "eof".to_string(),
        }
    }
}

/// Couple two established streams and pump bytes both ways until either
/// direction terminates, then tear both down.
///
/// Each direction runs as its own task; the first to finish decides the
/// outcome and the other is aborted, dropping its halves so the underlying
/// connections close and no blocked read can pin the session.
pub async fn relay(client: DuplexStream, remote: DuplexStream) -> RelayOutcome {
    relay_inner(client, remote, false).await
}

/// Same engine with per-chunk payload logging (proxy mode).
pub async fn relay_logged(client: DuplexStream, remote: DuplexStream) -> RelayOutcome {
    relay_inner(client, remote, true).await
}

async fn relay_inner(
    client: DuplexStream,
    remote: DuplexStream,
    log_payload: bool,
) -> RelayOutcome {
    let (client_rd, client_wr) = client.into_split();
    let (remote_rd, remote_wr) = remote.into_split();

    // Counts live outside the tasks so the aborted direction's total is not
    // lost with its JoinError.
    let to_remote = Arc::new(AtomicU64::new(0));
    let from_remote = Arc::new(AtomicU64::new(0));

    let mut fwd = tokio::spawn(copy_direction(
        "c2r",
        client_rd,
        remote_wr,
        Arc::clone(&to_remote),
        log_payload,
    ));
    let mut rev = tokio::spawn(copy_direction(
        "r2c",
        remote_rd,
        client_wr,
        Arc::clone(&from_remote),
        log_payload,
    ));

    let cause = tokio::select! {
        first = &mut fwd => {
            rev.abort();
            let _ = rev.await;
            first.unwrap_or(None)
        }
        first = &mut rev => {
            fwd.abort();
            let _ = fwd.await;
            first.unwrap_or(None)
        }
    };

    RelayOutcome {
        to_remote: to_remote.load(Ordering::Relaxed),
        from_remote: from_remote.load(Ordering::Relaxed),
        cause,
    }
}

/// Diagnostic echo: copy a stream back into itself until EOF or error.
pub async fn echo(stream: DuplexStream) -> (u64, Option<io::Error>) {
    let (rd, wr) = stream.into_split();
    let echoed = Arc::new(AtomicU64::new(0));
    let cause = copy_direction("echo", rd, wr, Arc::clone(&echoed), false).await;
    (echoed.load(Ordering::Relaxed), cause)
}

/// One copy direction: read a chunk, write it through, repeat until the
/// source reports EOF or either side errors. The destination is closed on
/// the way out so the peer sees the half-close even while the opposite
/// direction is still flowing. Written bytes are published through `copied`
/// after every chunk.
async fn copy_direction(
    direction: &'static str,
    mut rd: StreamReader,
    mut wr: StreamWriter,
    copied: Arc<AtomicU64>,
    log_payload: bool,
) -> Option<io::Error> {
    let mut buf = vec![0u8; COPY_BUF_BYTES];

    let cause = loop {
        let n = match rd.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(err) => break Some(err),
        };
        if log_payload {
            tracing::info!(
                direction,
                bytes = n,
                payload = %String::from_utf8_lossy(&buf[..n]),
                "relay: chunk"
            );
        }
        if let Err(err) = wr.write_all(&buf[..n]).await {
            break Some(err);
        }
        copied.fetch_add(n as u64, Ordering::Relaxed);
    };

    let _ = wr.close().await;
    cause
}
