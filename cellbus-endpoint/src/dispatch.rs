//! Inbound side of an endpoint: listener loop and per-connection tasks.
//!
//! Every accepted connection gets a reader that feeds decoded frames either
//! to the control logic (answered in place) or to the endpoint's service
//! queue, and a writer draining a bounded channel. The registry maps
//! confirmed peer identities to their writer channels so replies can be
//! steered back to the right connection.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use cellbus_core::{
    encode_frame, try_decode_frame, ControlFrame, Frame, Identity, RequestId, Shutdown,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// An application message delivered to the endpoint's service queue.
#[derive(Debug, Clone)]
pub struct ServiceMessage {
    /// Identity of the peer that sent the message.
    pub sender: Identity,
    /// Correlation id to echo in the reply, if the sender attached one.
    pub request_id: Option<RequestId>,
    /// Opaque payload bytes; decode with the endpoint's codec.
    pub payload: Vec<u8>,
}

pub(crate) type InboundWriter = mpsc::Sender<Vec<u8>>;

/// Maps confirmed peer identities to the writer of the connection they
/// arrived on.
#[derive(Default)]
pub(crate) struct InboundRegistry {
    writers: HashMap<Identity, InboundWriter>,
}

impl InboundRegistry {
    /// Register a peer's writer. Returns `true` if the identity was new.
    fn register(&mut self, identity: Identity, writer: InboundWriter) -> bool {
        self.writers.insert(identity, writer).is_none()
    }

    pub(crate) fn writer(&self, identity: &Identity) -> Option<&InboundWriter> {
        self.writers.get(identity)
    }

    /// Drop a registration, but only if it still points at the given
    /// connection. A reconnecting peer re-registers before the old
    /// connection task notices the close.
    fn remove_if(&mut self, identity: &Identity, writer: &InboundWriter) {
        if let Some(current) = self.writers.get(identity) {
            if current.same_channel(writer) {
                self.writers.remove(identity);
            }
        }
    }
}

/// Spawn the accept loop for the endpoint's bound socket.
pub(crate) fn spawn_listener(
    listener: TcpListener,
    registry: Rc<RefCell<InboundRegistry>>,
    service_tx: mpsc::UnboundedSender<ServiceMessage>,
    queue_depth: usize,
    shutdown: Shutdown,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_local(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "accepted inbound connection");
                        let _ = stream.set_nodelay(true);
                        tokio::task::spawn_local(connection_task(
                            stream,
                            registry.clone(),
                            service_tx.clone(),
                            queue_depth,
                            shutdown.clone(),
                        ));
                    }
                    Err(error) => warn!(%error, "accept failed"),
                },
            }
        }
        debug!("listener loop exited");
    })
}

async fn connection_task(
    stream: TcpStream,
    registry: Rc<RefCell<InboundRegistry>>,
    service_tx: mpsc::UnboundedSender<ServiceMessage>,
    queue_depth: usize,
    shutdown: Shutdown,
) {
    let (mut read_half, write_half) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(queue_depth);
    let writer = tokio::task::spawn_local(connection_writer(write_half, out_rx));

    let mut registered: Option<Identity> = None;
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
                debug!(%error, "inbound read failed");
                break 'conn;
            }
        }

        loop {
            match try_decode_frame(&buffer) {
                Ok(None) => break,
                Ok(Some((frame, consumed))) => {
                    buffer.drain(..consumed);
                    handle_frame(frame, &out_tx, &registry, &service_tx, &mut registered);
                }
                Err(error) => {
                    // The stream cannot be resynchronized after a bad frame.
                    warn!(%error, "malformed inbound frame, dropping connection");
                    break 'conn;
                }
            }
        }
    }

    if let Some(identity) = registered {
        registry.borrow_mut().remove_if(&identity, &out_tx);
        debug!(peer = %identity, "inbound connection closed");
    }
    writer.abort();
}

async fn connection_writer(
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(packet) = out_rx.recv().await {
        if let Err(error) = write_half.write_all(&packet).await {
            debug!(%error, "inbound write failed");
            break;
        }
    }
}

fn handle_frame(
    frame: Frame,
    out_tx: &InboundWriter,
    registry: &Rc<RefCell<InboundRegistry>>,
    service_tx: &mpsc::UnboundedSender<ServiceMessage>,
    registered: &mut Option<Identity>,
) {
    match frame.as_control() {
        Some(ControlFrame::ConnectionConfirm) => {
            let Some(sender) = frame.sender else {
                warn!("connection confirm without sender, ignoring");
                return;
            };
            if registry.borrow_mut().register(sender.clone(), out_tx.clone()) {
                info!(peer = %sender, "incoming connection established");
            }
            *registered = Some(sender);
            send_control(out_tx, ControlFrame::ConnectionConfirmed);
        }
        Some(ControlFrame::HealthCheck) => send_control(out_tx, ControlFrame::HealthAlive),
        Some(other) => debug!(control = ?other, "ignoring unexpected control frame"),
        None => {
            let Some(sender) = frame.sender else {
                warn!("application frame without sender, dropping");
                return;
            };
            let _ = service_tx.send(ServiceMessage {
                sender,
                request_id: frame.request_id,
                payload: frame.payload,
            });
        }
    }
}

fn send_control(out_tx: &InboundWriter, control: ControlFrame) {
    match encode_frame(&Frame::control(None, control)) {
        // A full queue means the peer is not reading; the control answer
        // is dropped like any other frame to a stalled connection.
        Ok(packet) => {
            if out_tx.try_send(packet).is_err() {
                debug!(control = ?control, "control reply dropped, connection stalled");
            }
        }
        Err(error) => warn!(%error, "failed to encode control reply"),
    }
}
