// src/core/peer.rs

//! Peer-daemon RPC. During the POLLING phase (§4.5 step 3) a daemon
//! must ask every other voter in its cluster "are you reachable, what is
//! your last replayed LSN, and do you see the primary?" — this module is
//! the wire-level client and listener for that exchange.
//!
//! A thin async TCP client wrapping one request/response exchange behind
//! a deadline, paired with an accept loop dispatching one frame at a
//! time. Framed as newline-delimited JSON rather than the DBMS wire
//! protocol, since peer daemons are not speaking to each other as DBMS
//! clients.

use crate::core::types::{Lsn, Node, NodeId};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{info, warn};

#[derive(Debug, Error, Clone)]
pub enum PeerError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("peer request timed out")]
    Timeout,
    #[error("malformed peer response: {0}")]
    Protocol(String),
}

/// What a peer reports about itself when polled during an election.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeerVisibility {
    pub last_replayed_lsn: Option<Lsn>,
    pub timeline_id: Option<u32>,
    pub primary_visible: bool,
}

#[derive(Debug, Serialize, Deserialize)]
enum PeerRequest {
    VisibilityQuery { asking_node_id: NodeId },
}

#[derive(Debug, Serialize, Deserialize)]
enum PeerResponse {
    Visibility(PeerVisibility),
    Error(String),
}

/// The client side of peer polling: one request/response exchange per call,
/// deadline-bound end to end.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn query_visibility(&self, peer: &Node, deadline: Duration) -> Result<PeerVisibility, PeerError>;
}

/// Answers a `VisibilityQuery` with this daemon's own current view. The
/// election engine implements this to expose its locally-observed
/// replication state and primary-visibility verdict to polling peers.
#[async_trait]
pub trait VisibilityOracle: Send + Sync {
    async fn local_visibility(&self) -> PeerVisibility;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TcpPeerClient;

impl TcpPeerClient {
    fn parse_addr(peer: &Node) -> Result<SocketAddr, PeerError> {
        peer.conninfo
            .parse()
            .map_err(|_| PeerError::Unreachable(format!("invalid peer address: {}", peer.conninfo)))
    }
}

#[async_trait]
impl PeerClient for TcpPeerClient {
    async fn query_visibility(&self, peer: &Node, deadline: Duration) -> Result<PeerVisibility, PeerError> {
        let addr = Self::parse_addr(peer)?;
        let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr));
        let stream = connect
            .await
            .map_err(|_| PeerError::Timeout)?
            .map_err(|e| PeerError::Unreachable(e.to_string()))?;

        let mut framed = Framed::new(stream, LinesCodec::new());
        let request = PeerRequest::VisibilityQuery {
            asking_node_id: peer.node_id,
        };
        let line = serde_json::to_string(&request).map_err(|e| PeerError::Protocol(e.to_string()))?;
        framed
            .send(line)
            .await
            .map_err(|e| PeerError::Unreachable(e.to_string()))?;

        let reply = tokio::time::timeout(deadline, framed.next())
            .await
            .map_err(|_| PeerError::Timeout)?
            .ok_or_else(|| PeerError::Unreachable("connection closed before reply".to_string()))?
            .map_err(|e| PeerError::Protocol(e.to_string()))?;

        match serde_json::from_str::<PeerResponse>(&reply) {
            Ok(PeerResponse::Visibility(v)) => Ok(v),
            Ok(PeerResponse::Error(msg)) => Err(PeerError::Protocol(msg)),
            Err(e) => Err(PeerError::Protocol(e.to_string())),
        }
    }
}

/// Accepts inbound peer-polling connections and answers each with the
/// local engine's current visibility, via `VisibilityOracle`.
pub async fn run_peer_listener(port: u16, oracle: Arc<dyn VisibilityOracle>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "peer RPC listener started");

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let oracle = oracle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_peer_connection(socket, oracle).await {
                        warn!(%addr, error = %e, "peer connection closed with error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "failed to accept peer connection"),
        }
    }
}

async fn handle_peer_connection(socket: TcpStream, oracle: Arc<dyn VisibilityOracle>) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new());
    while let Some(line) = framed.next().await {
        let line = line?;
        let response = match serde_json::from_str::<PeerRequest>(&line) {
            Ok(PeerRequest::VisibilityQuery { .. }) => {
                PeerResponse::Visibility(oracle.local_visibility().await)
            }
            Err(e) => PeerResponse::Error(e.to_string()),
        };
        let Ok(encoded) = serde_json::to_string(&response) else {
            continue;
        };
        if framed.send(encoded).await.is_err() {
            break;
        }
    }
    Ok(())
}
