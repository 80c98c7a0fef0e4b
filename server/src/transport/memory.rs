//! In-process transport.
//!
//! Peers are simulated by calling [`MemoryTransport::connect`],
//! [`MemoryTransport::deliver`] and [`MemoryTransport::close`]; everything the
//! server sends is kept per handle and can be drained with
//! [`MemoryTransport::take_sent`]. Used by the test suites and by hosts that
//! want to drive the server without sockets.

use super::{ConnectionHandle, NetworkEvent, PeerSlots, Transport};
use crate::error::TransportError;
use log::debug;
use shared::Channel;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
struct MemoryPeer {
    events: VecDeque<NetworkEvent>,
    closing: bool,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    bound: Option<String>,
    listening: bool,
    refuse_bind: bool,
    peers: PeerSlots<MemoryPeer>,
    pending: VecDeque<ConnectionHandle>,
    sent: HashMap<ConnectionHandle, Vec<(Channel, Vec<u8>)>>,
    failing: HashSet<ConnectionHandle>,
    updates: u64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `bind` always fails
    pub fn refusing_bind() -> Self {
        Self {
            refuse_bind: true,
            ..Self::default()
        }
    }

    pub fn bound_address(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Number of `update` calls so far
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// A new peer connects; it waits in the accept queue
    pub fn connect(&mut self) -> ConnectionHandle {
        let handle = self.peers.insert(MemoryPeer::default());
        self.pending.push_back(handle);
        handle
    }

    /// Queues a payload from the peer. Returns false if the peer is gone.
    pub fn deliver(&mut self, handle: ConnectionHandle, channel: Channel, payload: &[u8]) -> bool {
        match self.peers.get_mut(handle) {
            Some(peer) if !peer.closing => {
                peer.events.push_back(NetworkEvent::Data {
                    payload: payload.to_vec(),
                    channel,
                });
                true
            }
            _ => false,
        }
    }

    /// The peer hangs up; a `Disconnect` event follows its queued data
    pub fn close(&mut self, handle: ConnectionHandle) -> bool {
        match self.peers.get_mut(handle) {
            Some(peer) if !peer.closing => {
                peer.closing = true;
                peer.events.push_back(NetworkEvent::Disconnect);
                true
            }
            _ => false,
        }
    }

    /// Makes every later send to this handle fail
    pub fn fail_sends_to(&mut self, handle: ConnectionHandle) {
        self.failing.insert(handle);
    }

    pub fn is_connected(&self, handle: ConnectionHandle) -> bool {
        self.peers.get(handle).is_some()
    }

    pub fn connected_peers(&self) -> usize {
        self.peers.len()
    }

    /// Drains the payloads sent to a handle so far
    pub fn take_sent(&mut self, handle: ConnectionHandle) -> Vec<(Channel, Vec<u8>)> {
        self.sent.remove(&handle).unwrap_or_default()
    }

    /// Drains the payloads sent to a handle as text
    pub fn take_sent_text(&mut self, handle: ConnectionHandle) -> Vec<String> {
        self.take_sent(handle)
            .into_iter()
            .map(|(_, payload)| String::from_utf8_lossy(&payload).into_owned())
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn bind(&mut self, addr: &str) -> Result<(), TransportError> {
        if self.refuse_bind {
            return Err(TransportError::Bind {
                addr: addr.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
            });
        }
        self.bound = Some(addr.to_string());
        Ok(())
    }

    fn listen(&mut self) -> Result<(), TransportError> {
        if self.bound.is_none() {
            return Err(TransportError::NotBound);
        }
        self.listening = true;
        Ok(())
    }

    fn accept(&mut self) -> Option<ConnectionHandle> {
        while let Some(handle) = self.pending.pop_front() {
            if self.peers.get(handle).is_some() {
                return Some(handle);
            }
        }
        None
    }

    fn update(&mut self) {
        self.updates += 1;
    }

    fn pop_event(&mut self, handle: ConnectionHandle) -> Option<NetworkEvent> {
        let event = match self.peers.get_mut(handle) {
            Some(peer) => peer.events.pop_front(),
            None => return Some(NetworkEvent::Disconnect),
        };

        if event == Some(NetworkEvent::Disconnect) {
            self.peers.remove(handle);
        }
        event
    }

    fn send(
        &mut self,
        handle: ConnectionHandle,
        channel: Channel,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if self.failing.contains(&handle) || self.peers.get(handle).is_none() {
            return Err(TransportError::InvalidConnection(handle.id()));
        }

        self.sent
            .entry(handle)
            .or_default()
            .push((channel, payload.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self, handle: ConnectionHandle) {
        if self.peers.remove(handle).is_some() {
            debug!("Dropped in-memory connection {}", handle.id());
        }
    }
}
