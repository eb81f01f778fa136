//! Background health monitoring of registered peers.
//!
//! Each registered peer gets a dedicated probe connection, separate from
//! the data connection so probes never interleave with correlated replies.
//! The monitor sends `check_connection` on every tick and flips the link
//! state on the answer, logging only on edges. A failed probe drops the
//! probe connection; the next tick reconnects, so a restarted peer flips
//! back to healthy without caller involvement.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use cellbus_core::{encode_frame, try_decode_frame, ControlFrame, Frame, Identity, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Observed state of the link to a registered peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The last probe was answered in time.
    Healthy,
    /// The last probe went unanswered.
    Interrupted,
}

/// Per-link health record. Transitions count state edges only; repeated
/// failed (or successful) probes leave the count unchanged.
pub(crate) struct LinkHealth {
    pub state: LinkState,
    pub transitions: u32,
}

impl LinkHealth {
    pub(crate) fn fresh() -> Self {
        Self {
            state: LinkState::Healthy,
            transitions: 0,
        }
    }
}

/// Hands a freshly registered peer to the monitor.
pub(crate) struct HealthProbe {
    /// Address key as the caller registered it.
    pub address: String,
    /// Resolved `host:port` used for reconnects.
    pub target: String,
    /// Initial probe connection, established during registration.
    pub stream: TcpStream,
}

struct Link {
    target: String,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
}

pub(crate) fn spawn_monitor(
    identity: Identity,
    interval: Duration,
    probe_timeout: Duration,
    states: Rc<RefCell<HashMap<String, LinkHealth>>>,
    mut probe_rx: mpsc::UnboundedReceiver<HealthProbe>,
    shutdown: Shutdown,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_local(async move {
        let mut links: HashMap<String, Link> = HashMap::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                probe = probe_rx.recv() => match probe {
                    Some(probe) => {
                        states.borrow_mut().insert(probe.address.clone(), LinkHealth::fresh());
                        links.insert(probe.address, Link {
                            target: probe.target,
                            stream: Some(probe.stream),
                            buffer: Vec::new(),
                        });
                    }
                    // The endpoint is gone; nothing left to monitor.
                    None => break,
                },
                _ = ticker.tick() => {
                    for (address, link) in links.iter_mut() {
                        let alive = probe_link(&identity, link, probe_timeout).await;
                        let previous = states.borrow().get(address).map(|health| health.state);
                        match (previous, alive) {
                            (Some(LinkState::Healthy), false) => {
                                mark(&states, address, LinkState::Interrupted);
                                warn!(%address, "no connection");
                            }
                            (Some(LinkState::Interrupted), true) => {
                                mark(&states, address, LinkState::Healthy);
                                info!(%address, "connection reestablished");
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    })
}

fn mark(states: &Rc<RefCell<HashMap<String, LinkHealth>>>, address: &str, state: LinkState) {
    if let Some(health) = states.borrow_mut().get_mut(address) {
        health.state = state;
        health.transitions += 1;
    }
}

async fn probe_link(identity: &Identity, link: &mut Link, probe_timeout: Duration) -> bool {
    let alive = tokio::time::timeout(probe_timeout, exchange_probe(identity, link))
        .await
        .unwrap_or(false);
    if !alive {
        link.stream = None;
        link.buffer.clear();
    }
    alive
}

async fn exchange_probe(identity: &Identity, link: &mut Link) -> bool {
    if link.stream.is_none() {
        match TcpStream::connect(&link.target).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                link.stream = Some(stream);
                link.buffer.clear();
            }
            Err(_) => return false,
        }
    }
    let Some(stream) = link.stream.as_mut() else {
        return false;
    };

    let packet = match encode_frame(&Frame::control(
        Some(identity.clone()),
        ControlFrame::HealthCheck,
    )) {
        Ok(packet) => packet,
        Err(error) => {
            warn!(%error, "failed to encode health probe");
            return false;
        }
    };
    if stream.write_all(&packet).await.is_err() {
        return false;
    }

    let mut chunk = [0u8; 256];
    loop {
        loop {
            match try_decode_frame(&link.buffer) {
                Ok(Some((frame, consumed))) => {
                    link.buffer.drain(..consumed);
                    if frame.as_control() == Some(ControlFrame::HealthAlive) {
                        return true;
                    }
                }
                Ok(None) => break,
                Err(_) => return false,
            }
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => link.buffer.extend_from_slice(&chunk[..n]),
        }
    }
}
