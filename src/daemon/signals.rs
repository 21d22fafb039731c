// src/daemon/signals.rs

//! Unix signal plumbing: SIGHUP triggers a config reload, SIGINT/SIGTERM
//! trigger graceful shutdown, per §4.7.

use crate::core::reload::ShutdownReason;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Waits for either a termination signal (returns the reason) or a
/// reload signal (returns `None`, and the caller should loop back to
/// waiting after handling the reload).
pub enum SignalEvent {
    Shutdown(ShutdownReason),
    Reload,
}

pub async fn wait_for_signal() -> SignalEvent {
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sighup.recv() => {
            info!("received SIGHUP, reloading configuration");
            SignalEvent::Reload
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
            SignalEvent::Shutdown(ShutdownReason::Terminate)
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
            SignalEvent::Shutdown(ShutdownReason::Interrupt)
        }
    }
}
