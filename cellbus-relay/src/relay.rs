//! Relay core: identity registry and per-connection forwarding.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use cellbus_core::{
    encode_frame, try_decode_frame, ControlFrame, Frame, Identity, Shutdown,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Port the relay binds when `CELLBUS_PORT` is not set.
pub const DEFAULT_PORT: u16 = 5554;

/// Frames queued per connection writer; a full queue means the peer is not
/// reading and further frames to it are dropped.
const FORWARD_QUEUE_DEPTH: usize = 1024;

/// Error type for relay startup.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Binding the relay socket failed.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
}

type ConnectionWriter = mpsc::Sender<Vec<u8>>;

/// Maps learned peer identities to the writer of the connection they last
/// appeared on. A reconnecting peer overwrites its own entry.
#[derive(Default)]
struct Registry {
    writers: HashMap<Identity, ConnectionWriter>,
}

impl Registry {
    fn learn(&mut self, identity: &Identity, writer: &ConnectionWriter) {
        let known = match self.writers.get(identity) {
            Some(current) if current.same_channel(writer) => return,
            Some(_) => true,
            None => false,
        };
        if known {
            debug!(peer = %identity, "peer moved to a new connection");
        } else {
            info!(peer = %identity, "peer registered");
        }
        self.writers.insert(identity.clone(), writer.clone());
    }

    fn writer(&self, identity: &Identity) -> Option<&ConnectionWriter> {
        self.writers.get(identity)
    }

    fn forget_connection(&mut self, writer: &ConnectionWriter) {
        self.writers.retain(|identity, current| {
            let keep = !current.same_channel(writer);
            if !keep {
                info!(peer = %identity, "peer disconnected");
            }
            keep
        });
    }
}

/// A bound relay, ready to run.
pub struct Relay {
    listener: TcpListener,
    local_port: u16,
}

impl Relay {
    /// Bind the relay socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| RelayError::Bind { port, source })?;
        let local_port = listener
            .local_addr()
            .map_err(|source| RelayError::Bind { port, source })?
            .port();
        info!(port = local_port, "relay bound");
        Ok(Self {
            listener,
            local_port,
        })
    }

    /// The port the relay actually bound (useful with port 0).
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Accept and serve connections until `shutdown` is signalled.
    ///
    /// Must run inside a `LocalSet`; each connection is served by a local
    /// task sharing the identity registry.
    pub async fn run(self, shutdown: Shutdown) {
        let registry = Rc::new(RefCell::new(Registry::default()));
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "accepted connection");
                        let _ = stream.set_nodelay(true);
                        tokio::task::spawn_local(serve_connection(
                            stream,
                            registry.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(error) => warn!(%error, "accept failed"),
                },
            }
        }
        info!("relay stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    registry: Rc<RefCell<Registry>>,
    shutdown: Shutdown,
) {
    let (mut read_half, write_half) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(FORWARD_QUEUE_DEPTH);
    let writer = tokio::task::spawn_local(connection_writer(write_half, out_rx));

    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = vec![0u8; 4096];
    'conn: loop {
        let read = tokio::select! {
            _ = shutdown.wait() => break 'conn,
            read = read_half.read(&mut chunk) => read,
        };
        match read {
            Ok(0) => break 'conn,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(error) => {
                debug!(%error, "read failed");
                break 'conn;
            }
        }

        loop {
            match try_decode_frame(&buffer) {
                Ok(None) => break,
                Ok(Some((frame, consumed))) => {
                    buffer.drain(..consumed);
                    handle_frame(frame, &out_tx, &registry);
                }
                Err(error) => {
                    warn!(%error, "malformed frame, dropping connection");
                    break 'conn;
                }
            }
        }
    }

    registry.borrow_mut().forget_connection(&out_tx);
    writer.abort();
}

async fn connection_writer(
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(packet) = out_rx.recv().await {
        if let Err(error) = write_half.write_all(&packet).await {
            debug!(%error, "write failed");
            break;
        }
    }
}

fn handle_frame(frame: Frame, out_tx: &ConnectionWriter, registry: &Rc<RefCell<Registry>>) {
    match frame.as_control() {
        Some(ControlFrame::ConnectionConfirm) => {
            if let Some(sender) = &frame.sender {
                registry.borrow_mut().learn(sender, out_tx);
            }
            send_control(out_tx, ControlFrame::ConnectionConfirmed);
            return;
        }
        // Health probes arrive on dedicated probe connections; answering
        // without learning keeps the peer's data connection as its route.
        Some(ControlFrame::HealthCheck) => {
            send_control(out_tx, ControlFrame::HealthAlive);
            return;
        }
        Some(other) => {
            debug!(control = ?other, "ignoring unexpected control frame");
            return;
        }
        None => {}
    }

    // Data frames also refresh the sender's route, so a peer that
    // reconnects without re-confirming stays reachable.
    if let Some(sender) = &frame.sender {
        registry.borrow_mut().learn(sender, out_tx);
    }

    let Some(destination) = frame.destination else {
        debug!("dropping frame without destination");
        return;
    };
    let Some(sender) = frame.sender else {
        debug!(%destination, "dropping frame without sender");
        return;
    };

    // Forwarded frames carry the original sender so the receiver can
    // answer; the destination has served its purpose.
    let forwarded = Frame {
        sender: Some(sender),
        destination: None,
        request_id: frame.request_id,
        payload: frame.payload,
    };
    let packet = match encode_frame(&forwarded) {
        Ok(packet) => packet,
        Err(error) => {
            warn!(%error, "failed to re-encode frame");
            return;
        }
    };
    let registry = registry.borrow();
    match registry.writer(&destination) {
        Some(writer) => {
            if writer.try_send(packet).is_err() {
                debug!(%destination, "destination stalled or closing, frame dropped");
            }
        }
        // Unknown destinations are dropped without notice; the sender's
        // receive timeout is the failure signal.
        None => debug!(%destination, "no route to destination, frame dropped"),
    }
}

fn send_control(out_tx: &ConnectionWriter, control: ControlFrame) {
    match encode_frame(&Frame::control(None, control)) {
        Ok(packet) => {
            if out_tx.try_send(packet).is_err() {
                debug!(control = ?control, "control reply dropped, connection stalled");
            }
        }
        Err(error) => warn!(%error, "failed to encode control reply"),
    }
}
