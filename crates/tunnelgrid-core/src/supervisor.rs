//! Supervisor - periodic liveness checks for one tunnel
//!
//! Ticks at the monitoring interval. Each tick performs a TCP reachability
//! probe against the SSH endpoint and then a keepalive global request with
//! reply required; either failure triggers reconnection. Exits when the
//! runtime's stop signal fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::runtime::TunnelRuntime;

pub(crate) fn spawn(runtime: Arc<TunnelRuntime>, monitoring_interval: Duration) {
    tokio::spawn(async move {
        run(&runtime, monitoring_interval).await;
        runtime.supervisor_exited();
    });
}

async fn run(runtime: &TunnelRuntime, monitoring_interval: Duration) {
    let mut stop_rx = runtime.stop_rx();
    let mut ticker = tokio::time::interval(monitoring_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; the connection
    // was just established, so skip it.
    ticker.tick().await;

    debug!(tunnel = %runtime.key(), "supervisor started");

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        if runtime.is_stopped().await {
            break;
        }
        if !runtime.client_alive().await {
            // No client to probe; the retry loop is already driving attempts.
            continue;
        }

        let server = runtime.server_addr();
        match tokio::time::timeout(monitoring_interval, TcpStream::connect(server)).await {
            Ok(Ok(_probe)) => {}
            Ok(Err(err)) => {
                warn!(tunnel = %runtime.key(), server = %server, error = %err,
                    "SSH endpoint unreachable, attempting reconnection");
                runtime.reconnect().await;
                continue;
            }
            Err(_) => {
                warn!(tunnel = %runtime.key(), server = %server,
                    timeout_secs = monitoring_interval.as_secs(),
                    "SSH reachability probe timed out, attempting reconnection");
                runtime.reconnect().await;
                continue;
            }
        }

        if let Err(err) = runtime.send_keepalive(monitoring_interval).await {
            warn!(tunnel = %runtime.key(), server = %server, error = %err,
                "SSH keepalive failed, attempting reconnection");
            runtime.reconnect().await;
        }
    }

    debug!(tunnel = %runtime.key(), "supervisor exited");
}
