use clap::{Parser, Subcommand};

use crate::wsrelay::dialer::TlsTrustPolicy;
use crate::wsrelay::{logging, mode};

#[derive(Debug, Parser)]
#[command(
    name = "wsrelay",
    version,
    about = "Bidirectional TCP <-> WebSocket stream relay"
)]
pub struct Cli {
    /// Log level (error|warn|info|debug|trace); RUST_LOG overrides this.
    #[arg(long, env = "WSRELAY_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// WebSocket listener; forwards each upgraded stream to a raw-socket
    /// target.
    #[command(visible_alias = "s")]
    Server { listen: String, target: String },

    /// Raw-socket listener; carries each accepted stream over a WebSocket
    /// dial of the target.
    #[command(visible_alias = "c")]
    Client {
        listen: String,
        target: String,
        /// Verify the server certificate against system roots instead of the
        /// default trust-all policy.
        #[arg(long)]
        verify_tls: bool,
    },

    /// Diagnostic: raw-socket listener that echoes every stream back to
    /// itself.
    #[command(visible_alias = "e")]
    Echo { listen: String },

    /// Diagnostic: dials a remote raw socket, writes a line every second and
    /// logs whatever comes back.
    #[command(visible_alias = "p")]
    Ping { remote: String },

    /// Raw-socket listener forwarding to a raw-socket target, with verbose
    /// per-direction logging.
    Proxy { listen: String, target: String },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let logrt = logging::init(&cli.log_level)?;
    let _logrt_guard = logrt; // keep alive

    tokio::select! {
        res = run_mode(cli.mode) => {
            // Mode-fatal errors are logged; the process still ends normally.
            match res {
                Ok(()) => tracing::info!("stopping"),
                Err(err) => tracing::error!(err = %err, "stopping with error"),
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("stopping on signal");
        }
    }

    Ok(())
}

async fn run_mode(mode: Mode) -> anyhow::Result<()> {
    match mode {
        Mode::Server { listen, target } => {
            mode::ServerMode::bind(&listen, &target).await?.serve().await
        }
        Mode::Client {
            listen,
            target,
            verify_tls,
        } => {
            let trust = if verify_tls {
                TlsTrustPolicy::SystemRoots
            } else {
                TlsTrustPolicy::TrustAll
            };
            mode::ClientMode::bind(&listen, &target, trust)
                .await?
                .serve()
                .await
        }
        Mode::Echo { listen } => mode::EchoMode::bind(&listen).await?.serve().await,
        Mode::Ping { remote } => mode::run_ping(&remote).await,
        Mode::Proxy { listen, target } => {
            mode::ProxyMode::bind(&listen, &target).await?.serve().await
        }
    }
}

async fn shutdown_signal() {
    // Ctrl-C works cross-platform.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_aliases_parse() {
        let cli = Cli::try_parse_from(["wsrelay", "c", "tcp://127.0.0.1:1", "ws://h:2"]).unwrap();
        assert!(matches!(
            cli.mode,
            Mode::Client {
                verify_tls: false,
                ..
            }
        ));

        let cli = Cli::try_parse_from(["wsrelay", "s", "ws://127.0.0.1:1", "tcp://h:2"]).unwrap();
        assert!(matches!(cli.mode, Mode::Server { .. }));
    }

    #[test]
    fn missing_arguments_fail_usage() {
        assert!(Cli::try_parse_from(["wsrelay", "proxy", "tcp://127.0.0.1:1"]).is_err());
        assert!(Cli::try_parse_from(["wsrelay"]).is_err());
    }
}
