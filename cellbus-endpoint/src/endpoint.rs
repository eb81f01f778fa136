//! The endpoint: a named process on the bus.
//!
//! An endpoint owns one bound socket for inbound traffic and one outbound
//! data connection per registered peer. Sends mint a correlation id;
//! receives filter by it, stashing non-matching correlated replies so
//! overlapping exchanges on the same peer never steal each other's
//! answers. All connection plumbing runs as local tasks on the caller's
//! event loop.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use cellbus_core::{
    encode_frame, try_decode_frame, ControlFrame, Frame, Identity, JsonCodec, MessageCodec,
    RequestId, RequestIdGenerator, Shutdown,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::dispatch::{self, InboundRegistry, ServiceMessage};
use crate::error::{EndpointError, EndpointResult};
use crate::health::{self, HealthProbe, LinkHealth, LinkState};

/// Outbound state for one registered peer.
struct PeerConnection {
    outbound_tx: mpsc::Sender<Vec<u8>>,
    replies: mpsc::UnboundedReceiver<Frame>,
    /// Correlated replies that arrived while a receive was filtering for a
    /// different id. Served before the live channel on later receives.
    stash: VecDeque<Frame>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl PeerConnection {
    fn abort(&self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// A named endpoint on the bus.
///
/// Generic over the payload codec; [`JsonCodec`] is the default.
pub struct Endpoint<C: MessageCodec = JsonCodec> {
    identity: Identity,
    config: EndpointConfig,
    codec: C,
    local_port: u16,
    peers: HashMap<String, PeerConnection>,
    service_rx: mpsc::UnboundedReceiver<ServiceMessage>,
    registry: Rc<RefCell<InboundRegistry>>,
    link_states: Rc<RefCell<HashMap<String, LinkHealth>>>,
    probe_tx: mpsc::UnboundedSender<HealthProbe>,
    request_ids: RequestIdGenerator,
    shutdown: Shutdown,
    listener_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl Endpoint<JsonCodec> {
    /// Bind an endpoint with the default JSON codec.
    ///
    /// Must be called from within a `LocalSet` (or other local task
    /// context); the endpoint spawns its listener and health monitor as
    /// local tasks.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Bind`] if the configured port cannot be
    /// bound.
    pub async fn bind(config: EndpointConfig) -> EndpointResult<Self> {
        Self::bind_with_codec(config, JsonCodec).await
    }
}

impl<C: MessageCodec> Endpoint<C> {
    /// Bind an endpoint with an explicit payload codec.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Bind`] if the configured port cannot be
    /// bound.
    pub async fn bind_with_codec(config: EndpointConfig, codec: C) -> EndpointResult<Self> {
        let identity = Identity::mint(&config.module_name);
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|source| EndpointError::Bind {
                port: config.port,
                source,
            })?;
        let local_port = listener
            .local_addr()
            .map_err(|source| EndpointError::Bind {
                port: config.port,
                source,
            })?
            .port();

        let shutdown = Shutdown::new();
        let registry = Rc::new(RefCell::new(InboundRegistry::default()));
        let (service_tx, service_rx) = mpsc::unbounded_channel();
        let listener_handle = dispatch::spawn_listener(
            listener,
            registry.clone(),
            service_tx,
            config.outbound_queue_depth,
            shutdown.clone(),
        );

        let link_states = Rc::new(RefCell::new(HashMap::new()));
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();
        let monitor_handle = health::spawn_monitor(
            identity.clone(),
            config.health_interval,
            config.probe_timeout,
            link_states.clone(),
            probe_rx,
            shutdown.clone(),
        );

        info!(identity = %identity, port = local_port, "endpoint bound");
        Ok(Self {
            identity,
            config,
            codec,
            local_port,
            peers: HashMap::new(),
            service_rx,
            registry,
            link_states,
            probe_tx,
            request_ids: RequestIdGenerator::new(),
            shutdown,
            listener_handle: Some(listener_handle),
            monitor_handle: Some(monitor_handle),
        })
    }

    /// This endpoint's bus identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The port the inbound socket actually bound (useful with port 0).
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// A shutdown handle shared with the endpoint's background tasks.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Register an outbound connection to a peer.
    ///
    /// `address` is either `host` (the configured port is appended) or
    /// `host:port`, and is the key later calls use to name this peer.
    /// Registration connects, sends `confirm_connection` and waits for the
    /// confirmation; it also opens the probe connection the health monitor
    /// uses. Re-registering an address replaces the previous connection.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Connect`],
    /// [`EndpointError::ConnectTimeout`] or
    /// [`EndpointError::HandshakeTimeout`]; a failed registration retains
    /// no state for the peer.
    pub async fn register_connection(&mut self, address: &str) -> EndpointResult<()> {
        let target = resolve_target(address, self.config.port);
        let mut stream = self.connect(address, &target).await?;

        let confirm = encode_frame(&Frame::control(
            Some(self.identity.clone()),
            ControlFrame::ConnectionConfirm,
        ))?;
        stream
            .write_all(&confirm)
            .await
            .map_err(|source| EndpointError::Connect {
                address: address.to_string(),
                source,
            })?;
        match tokio::time::timeout(
            self.config.handshake_timeout,
            await_confirmation(&mut stream, address),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(EndpointError::HandshakeTimeout {
                    address: address.to_string(),
                    timeout: self.config.handshake_timeout,
                })
            }
        }

        let probe_stream = self.connect(address, &target).await?;
        let _ = self.probe_tx.send(HealthProbe {
            address: address.to_string(),
            target,
            stream: probe_stream,
        });
        self.link_states
            .borrow_mut()
            .insert(address.to_string(), LinkHealth::fresh());

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue_depth);
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let writer_handle = tokio::task::spawn_local(peer_writer(write_half, outbound_rx));
        let reader_handle =
            tokio::task::spawn_local(peer_reader(address.to_string(), read_half, reply_tx));

        if let Some(old) = self.peers.insert(
            address.to_string(),
            PeerConnection {
                outbound_tx,
                replies,
                stash: VecDeque::new(),
                reader_handle,
                writer_handle,
            },
        ) {
            debug!(%address, "replacing existing registration");
            old.abort();
        }
        info!(%address, "connection established");
        Ok(())
    }

    /// Register a peer at an explicit host and port.
    ///
    /// Equivalent to [`Endpoint::register_connection`] with `host:port`;
    /// that combined string becomes the peer's address key.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Endpoint::register_connection`].
    pub async fn register_connection_to(&mut self, host: &str, port: u16) -> EndpointResult<()> {
        self.register_connection(&format!("{host}:{port}")).await
    }

    async fn connect(&self, address: &str, target: &str) -> EndpointResult<TcpStream> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| EndpointError::ConnectTimeout {
                address: address.to_string(),
                timeout: self.config.connect_timeout,
            })?
            .map_err(|source| EndpointError::Connect {
                address: address.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Send a message to a registered peer, minting a fresh correlation id.
    ///
    /// Returns the id to pass to [`Endpoint::receive`].
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::UnknownPeer`] for unregistered addresses
    /// and [`EndpointError::ConnectionClosed`] if the peer connection is
    /// gone.
    pub fn send<T: Serialize>(&mut self, address: &str, message: &T) -> EndpointResult<RequestId> {
        let payload = self.codec.encode(message)?;
        let request_id = self.request_ids.mint();
        let frame = Frame::application(self.identity.clone(), Some(request_id), payload);
        self.dispatch_to_peer(address, frame)?;
        debug!(%address, %request_id, "sent request");
        Ok(request_id)
    }

    /// Send a relay-addressed message to `destination` through a registered
    /// relay.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Endpoint::send`], for the relay connection.
    pub fn send_via<T: Serialize>(
        &mut self,
        relay: &str,
        destination: &Identity,
        message: &T,
    ) -> EndpointResult<RequestId> {
        let payload = self.codec.encode(message)?;
        let request_id = self.request_ids.mint();
        let frame = Frame::routed(
            self.identity.clone(),
            destination.clone(),
            Some(request_id),
            payload,
        );
        self.dispatch_to_peer(relay, frame)?;
        debug!(%relay, %destination, %request_id, "sent routed request");
        Ok(request_id)
    }

    /// Answer a routed message through a registered relay, echoing the
    /// request id the sender attached.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Endpoint::send`], for the relay connection.
    pub fn reply_via<T: Serialize>(
        &mut self,
        relay: &str,
        destination: &Identity,
        request_id: Option<RequestId>,
        message: &T,
    ) -> EndpointResult<()> {
        let payload = self.codec.encode(message)?;
        let frame = Frame::routed(self.identity.clone(), destination.clone(), request_id, payload);
        self.dispatch_to_peer(relay, frame)
    }

    fn dispatch_to_peer(&mut self, address: &str, frame: Frame) -> EndpointResult<()> {
        let packet = encode_frame(&frame)?;
        let peer = self
            .peers
            .get(address)
            .ok_or_else(|| EndpointError::UnknownPeer {
                address: address.to_string(),
            })?;
        peer.outbound_tx
            .try_send(packet)
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => EndpointError::QueueFull {
                    address: address.to_string(),
                },
                mpsc::error::TrySendError::Closed(_) => EndpointError::ConnectionClosed {
                    address: address.to_string(),
                },
            })
    }

    /// Receive a reply from a registered peer.
    ///
    /// With a `request_id`, only the matching reply is returned; other
    /// correlated replies arriving meanwhile are stashed for their own
    /// receives, and uncorrelated frames are dropped. Without an id, the
    /// oldest pending reply is returned. `timeout` bounds the wait;
    /// `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Timeout`] when the deadline passes and
    /// [`EndpointError::ConnectionClosed`] if the peer connection drops
    /// while waiting. A payload that fails to decode is dropped and
    /// reported as [`EndpointError::Codec`].
    pub async fn receive<T: DeserializeOwned>(
        &mut self,
        address: &str,
        request_id: Option<RequestId>,
        timeout: Option<Duration>,
    ) -> EndpointResult<T> {
        let frame = self.receive_frame(address, request_id, timeout).await?;
        match self.codec.decode(&frame.payload) {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(%address, %error, "dropping undecodable reply");
                Err(error.into())
            }
        }
    }

    /// Receive the next routed message forwarded by a relay, with its
    /// sender identity and request id.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Endpoint::receive`].
    pub async fn receive_routed(
        &mut self,
        relay: &str,
        timeout: Option<Duration>,
    ) -> EndpointResult<ServiceMessage> {
        loop {
            let frame = self.receive_frame(relay, None, timeout).await?;
            match frame.sender {
                Some(sender) => {
                    return Ok(ServiceMessage {
                        sender,
                        request_id: frame.request_id,
                        payload: frame.payload,
                    })
                }
                None => debug!(%relay, "dropping routed frame without sender"),
            }
        }
    }

    async fn receive_frame(
        &mut self,
        address: &str,
        request_id: Option<RequestId>,
        timeout: Option<Duration>,
    ) -> EndpointResult<Frame> {
        let peer = self
            .peers
            .get_mut(address)
            .ok_or_else(|| EndpointError::UnknownPeer {
                address: address.to_string(),
            })?;

        let stashed = match request_id {
            Some(want) => peer
                .stash
                .iter()
                .position(|frame| frame.request_id == Some(want)),
            None => {
                if peer.stash.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
        };
        if let Some(position) = stashed {
            if let Some(frame) = peer.stash.remove(position) {
                return Ok(frame);
            }
        }

        let wait = async {
            loop {
                let frame = match peer.replies.recv().await {
                    Some(frame) => frame,
                    None => {
                        return Err(EndpointError::ConnectionClosed {
                            address: address.to_string(),
                        })
                    }
                };
                match request_id {
                    Some(want) if frame.request_id != Some(want) => {
                        if frame.request_id.is_some() {
                            peer.stash.push_back(frame);
                        } else {
                            debug!(%address, "dropping uncorrelated frame while waiting for reply");
                        }
                    }
                    _ => return Ok(frame),
                }
            }
        };
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(EndpointError::Timeout {
                    address: address.to_string(),
                    request_id,
                }),
            },
            None => wait.await,
        }
    }

    /// Discard every buffered reply from a peer, stashed or still queued.
    ///
    /// Returns the number of frames discarded. Callers run this before a
    /// fresh exchange when earlier receives timed out and stale replies
    /// may still be in flight.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::UnknownPeer`] for unregistered addresses.
    pub fn flush(&mut self, address: &str) -> EndpointResult<usize> {
        let peer = self
            .peers
            .get_mut(address)
            .ok_or_else(|| EndpointError::UnknownPeer {
                address: address.to_string(),
            })?;
        let mut drained = peer.stash.len();
        peer.stash.clear();
        while peer.replies.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(%address, drained, "flushed stale replies");
        }
        Ok(drained)
    }

    /// Wait for the next inbound application message.
    ///
    /// Returns `None` once the endpoint is closed and the queue is
    /// drained.
    pub async fn next_message(&mut self) -> Option<ServiceMessage> {
        self.service_rx.recv().await
    }

    /// Take the next inbound application message if one is already queued.
    pub fn try_next_message(&mut self) -> Option<ServiceMessage> {
        self.service_rx.try_recv().ok()
    }

    /// Discard every queued inbound message, returning how many there were.
    pub fn drain_service_queue(&mut self) -> usize {
        let mut drained = 0;
        while self.service_rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Reply to an inbound message's sender over the connection it arrived
    /// on.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::UnknownPeer`] if the sender's connection
    /// is no longer registered and [`EndpointError::ConnectionClosed`] if
    /// it is shutting down.
    pub fn reply<T: Serialize>(
        &self,
        to: &Identity,
        request_id: Option<RequestId>,
        message: &T,
    ) -> EndpointResult<()> {
        let payload = self.codec.encode(message)?;
        let packet = encode_frame(&Frame::reply(request_id, payload))?;
        let registry = self.registry.borrow();
        let writer = registry
            .writer(to)
            .ok_or_else(|| EndpointError::UnknownPeer {
                address: to.to_string(),
            })?;
        writer.try_send(packet).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => EndpointError::QueueFull {
                address: to.to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => EndpointError::ConnectionClosed {
                address: to.to_string(),
            },
        })
    }

    /// Decode an inbound message's payload with this endpoint's codec.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Codec`] if the payload does not parse.
    pub fn decode<T: DeserializeOwned>(&self, message: &ServiceMessage) -> EndpointResult<T> {
        Ok(self.codec.decode(&message.payload)?)
    }

    /// Current health of the link to a registered peer, as last observed
    /// by the background monitor.
    pub fn link_state(&self, address: &str) -> Option<LinkState> {
        self.link_states.borrow().get(address).map(|health| health.state)
    }

    /// Number of health transitions observed on the link so far.
    ///
    /// Counts edges only: repeated failed probes while `Interrupted` (or
    /// answered probes while `Healthy`) leave the count unchanged.
    pub fn link_transitions(&self, address: &str) -> Option<u32> {
        self.link_states
            .borrow()
            .get(address)
            .map(|health| health.transitions)
    }

    /// Shut the endpoint down: stop background tasks and drop every peer
    /// connection without waiting for in-flight traffic.
    pub async fn close(&mut self) {
        self.shutdown.signal();
        for (_, peer) in self.peers.drain() {
            peer.abort();
        }
        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.await;
        }
        info!(identity = %self.identity, "endpoint closed");
    }
}

/// Addresses are `host` (configured port appended) or `host:port`.
fn resolve_target(address: &str, port: u16) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{port}")
    }
}

async fn await_confirmation(stream: &mut TcpStream, address: &str) -> EndpointResult<()> {
    let mut buffer: Vec<u8> = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    loop {
        loop {
            match try_decode_frame(&buffer)? {
                Some((frame, consumed)) => {
                    buffer.drain(..consumed);
                    if frame.as_control() == Some(ControlFrame::ConnectionConfirmed) {
                        return Ok(());
                    }
                    debug!(%address, "skipping frame ahead of confirmation");
                }
                None => break,
            }
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|source| EndpointError::Connect {
                address: address.to_string(),
                source,
            })?;
        if n == 0 {
            return Err(EndpointError::ConnectionClosed {
                address: address.to_string(),
            });
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

async fn peer_writer(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(packet) = outbound_rx.recv().await {
        if let Err(error) = write_half.write_all(&packet).await {
            debug!(%error, "peer write failed");
            break;
        }
    }
}

async fn peer_reader(address: String, mut read_half: OwnedReadHalf, reply_tx: mpsc::UnboundedSender<Frame>) {
    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = vec![0u8; 4096];
    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!(%address, "peer connection closed");
                break;
            }
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(error) => {
                debug!(%address, %error, "peer read failed");
                break;
            }
        }
        loop {
            match try_decode_frame(&buffer) {
                Ok(None) => break,
                Ok(Some((frame, consumed))) => {
                    buffer.drain(..consumed);
                    match frame.as_control() {
                        Some(control) => {
                            debug!(%address, ?control, "ignoring control frame on data connection");
                        }
                        None => {
                            if reply_tx.send(frame).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(%address, %error, "malformed frame, dropping connection");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_configured_port() {
        assert_eq!(resolve_target("127.0.0.1", 5554), "127.0.0.1:5554");
    }

    #[test]
    fn explicit_port_is_kept() {
        assert_eq!(resolve_target("127.0.0.1:7000", 5554), "127.0.0.1:7000");
    }
}
