//! Serial link monitor daemon.
//!
//! Usage: `serial-linkd [PATH [BAUD]]`. Anything not given on the command
//! line comes from `SERIAL_LINK_*` environment variables or the defaults.
//! Received data is logged as hex at debug level; link status changes are
//! logged by the liveness tracker. If the link goes quiet because the reader
//! hit an error, reading is restarted.

use anyhow::{Context, Result};
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;

use serial_link::tracing::{self, prelude::*};
use serial_link::{Config, LinkEvent, ReaderState, Session};

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let mut config = Config::from_env().context("invalid configuration")?;
    let mut args = std::env::args().skip(1);
    if let Some(path) = args.next() {
        config.port.path = path;
    }
    if let Some(baud) = args.next() {
        config.port.baud_rate = baud
            .parse()
            .with_context(|| format!("invalid baud rate {baud:?}"))?;
    }
    let mode = config.port.port_mode()?;

    let mut session = Session::new(config.session.clone());
    let (link_tx, mut link_rx) = mpsc::unbounded_channel();
    session.set_connection_listener(link_tx);

    if !session
        .open(&config.port.path, config.port.baud_rate, mode)
        .await
    {
        let reason = session.last_error().unwrap_or_default();
        anyhow::bail!("cannot open {}: {}", config.port.path, reason);
    }
    session.reset_receive_time();
    session.start_reading(log_rx).await;
    info!(path = %config.port.path, baud_rate = config.port.baud_rate, "Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            Some(event) = link_rx.recv() => {
                // A quiet link with a dead reader will not recover by itself.
                if event == LinkEvent::Disconnected && session.reader_state() == ReaderState::Stopped {
                    warn!(error = ?session.last_error(), "Reader loop has stopped, restarting it.");
                    session.start_reading(log_rx).await;
                }
            }
        }
    }

    trace!("Shutting down.");
    session.close().await;
    info!("Exiting.");
    Ok(())
}

fn log_rx(data: &[u8]) {
    debug!(len = data.len(), data = %hex::encode(data), "RX");
}
