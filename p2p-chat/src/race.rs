//! Connection establishment race.
//!
//! Each peer listens on the rendezvous port and dials the partner on the
//! same port at the same time. Whichever branch produces a TCP stream first
//! claims the shared [`ConnectionSlot`]; the other branch closes anything it
//! establishes afterwards and stops once the slot settles.
//!
//! The two peers do not negotiate which branch won on each side.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio::{
    io,
    net::{TcpListener, TcpSocket, TcpStream},
    select,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::slot::ConnectionSlot;

/// Port both peers listen on and dial.
pub const RENDEZVOUS_PORT: u16 = 5000;
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Ports and timings of a race, before the partner is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceSettings {
    /// Port bound on all interfaces for inbound connections.
    pub listen_port: u16,
    pub partner_port: u16,
    /// Overall time allowed for either branch to win.
    pub deadline: Duration,
    pub attempt_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            listen_port: RENDEZVOUS_PORT,
            partner_port: RENDEZVOUS_PORT,
            deadline: DEFAULT_DEADLINE,
            attempt_timeout: ATTEMPT_TIMEOUT,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

impl RaceSettings {
    pub fn toward(self, partner_host: impl Into<String>) -> RaceConfig {
        RaceConfig {
            listen_port: self.listen_port,
            partner_host: partner_host.into(),
            partner_port: self.partner_port,
            deadline: self.deadline,
            attempt_timeout: self.attempt_timeout,
            retry_backoff: self.retry_backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaceConfig {
    pub listen_port: u16,
    pub partner_host: String,
    pub partner_port: u16,
    pub deadline: Duration,
    pub attempt_timeout: Duration,
    pub retry_backoff: Duration,
}

impl RaceConfig {
    /// Race on the rendezvous port with the default timings.
    pub fn new(partner_host: impl Into<String>) -> Self {
        RaceSettings::default().toward(partner_host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Acceptor,
    Connector,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Acceptor => f.write_str("listener"),
            Branch::Connector => f.write_str("connector"),
        }
    }
}

/// The single connection that won the race.
#[derive(Debug)]
pub struct Established {
    pub stream: TcpStream,
    pub via: Branch,
    pub peer: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceError {
    /// Neither branch connected before the deadline.
    Timeout(Duration),
}

impl fmt::Display for RaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceError::Timeout(deadline) => {
                write!(f, "no connection established within {deadline:?}")
            }
        }
    }
}

impl std::error::Error for RaceError {}

type Slot = Arc<ConnectionSlot<Established>>;

/// Runs the acceptor and connector branches until one wins or the deadline passes.
///
/// A connection that completes after the deadline is closed, never returned.
pub async fn resolve(config: RaceConfig) -> Result<Established, RaceError> {
    let slot: Slot = Arc::new(ConnectionSlot::new());

    tokio::spawn(accept_branch(config.listen_port, Arc::clone(&slot)));
    tokio::spawn(connect_branch(config.clone(), Arc::clone(&slot)));

    if timeout(config.deadline, slot.settled()).await.is_err() {
        if let Some(late) = slot.seal().await {
            debug!(peer = %late.peer, "dropping connection that finished after the deadline");
        }
        warn!(deadline = ?config.deadline, "connection race timed out");
        return Err(RaceError::Timeout(config.deadline));
    }

    // Only the deadline path above seals without a winner.
    slot.take()
        .await
        .ok_or(RaceError::Timeout(config.deadline))
}

fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    socket.listen(1)
}

async fn accept_branch(port: u16, slot: Slot) {
    let listener = match bind_listener(port) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(port, error = ?err, "failed to bind listener; relying on outbound connection");
            return;
        }
    };
    info!(port, "listening for incoming connections");

    loop {
        select! {
            _ = slot.settled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        offer(&slot, Established { stream, via: Branch::Acceptor, peer }).await;
                    }
                    Err(err) => {
                        warn!(error = ?err, "listener failed");
                        break;
                    }
                }
            }
        }
    }
}

async fn connect_branch(config: RaceConfig, slot: Slot) {
    let target = (config.partner_host.as_str(), config.partner_port);
    let mut attempt = 0u32;

    while !slot.is_settled() {
        attempt += 1;
        match timeout(config.attempt_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => match stream.peer_addr() {
                Ok(peer) => {
                    offer(&slot, Established { stream, via: Branch::Connector, peer }).await;
                    break;
                }
                Err(err) => debug!(attempt, error = ?err, "connected stream has no peer address"),
            },
            Ok(Err(err)) => debug!(attempt, error = ?err, "connect attempt failed"),
            Err(_) => debug!(attempt, "connect attempt timed out"),
        }

        select! {
            _ = slot.settled() => break,
            _ = sleep(config.retry_backoff) => {}
        }
    }
}

/// Claims the slot with `candidate` or closes it if another connection already won.
async fn offer(slot: &ConnectionSlot<Established>, candidate: Established) {
    let (via, peer) = (candidate.via, candidate.peer);
    match slot.claim(candidate).await {
        Ok(()) => info!(%peer, branch = %via, "connection established"),
        Err(redundant) => {
            debug!(%peer, branch = %via, "closing redundant connection");
            drop(redundant);
        }
    }
}
