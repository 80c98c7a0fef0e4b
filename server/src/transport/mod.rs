//! Transport seam consumed by the event loop.
//!
//! The server never touches sockets directly. It accepts connections, pumps
//! I/O once per tick, pops per-connection events and sends payloads through the
//! [`Transport`] trait. Two bindings ship with the crate:
//! - [`UdpTransport`]: datagrams with a handshake, keep-alive and a
//!   reliable-ordered channel layered on top;
//! - [`MemoryTransport`]: an in-process binding for tests and embedding.

pub mod memory;
pub mod udp;

pub use memory::MemoryTransport;
pub use udp::UdpTransport;

use crate::error::TransportError;
use shared::Channel;

/// Opaque reference to a transport connection.
///
/// The id is reused once a connection is gone; the generation tells a stale
/// handle apart from the connection that took its id. The default handle is
/// never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionHandle {
    id: u32,
    generation: u32,
}

impl ConnectionHandle {
    pub fn new(id: u32, generation: u32) -> Self {
        Self { id, generation }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Something that happened on one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Data { payload: Vec<u8>, channel: Channel },
    Disconnect,
}

/// Non-blocking connection-oriented transport with two delivery channels
pub trait Transport {
    fn bind(&mut self, addr: &str) -> Result<(), TransportError>;

    fn listen(&mut self) -> Result<(), TransportError>;

    /// Next connection waiting to be accepted, if any
    fn accept(&mut self) -> Option<ConnectionHandle>;

    /// Processes pending I/O: reads, resends, keep-alives and timeouts
    fn update(&mut self);

    /// Next event of one connection. A stale or unknown handle yields
    /// `Disconnect`.
    fn pop_event(&mut self, handle: ConnectionHandle) -> Option<NetworkEvent>;

    fn send(
        &mut self,
        handle: ConnectionHandle,
        channel: Channel,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Drops a connection from the server side. No `Disconnect` event follows.
    fn disconnect(&mut self, handle: ConnectionHandle);
}

#[derive(Debug)]
struct Slot<P> {
    generation: u32,
    peer: Option<P>,
}

/// Id allocation shared by the transport bindings: the lowest free id is
/// reused and its generation bumped.
#[derive(Debug)]
pub(crate) struct PeerSlots<P> {
    slots: Vec<Slot<P>>,
}

impl<P> PeerSlots<P> {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub(crate) fn insert(&mut self, peer: P) -> ConnectionHandle {
        let index = match self.slots.iter().position(|slot| slot.peer.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    peer: None,
                });
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slot.peer = Some(peer);
        ConnectionHandle::new(index as u32, slot.generation)
    }

    fn slot(&self, handle: ConnectionHandle) -> Option<&Slot<P>> {
        self.slots
            .get(handle.id() as usize)
            .filter(|slot| slot.generation == handle.generation())
    }

    pub(crate) fn get(&self, handle: ConnectionHandle) -> Option<&P> {
        self.slot(handle).and_then(|slot| slot.peer.as_ref())
    }

    pub(crate) fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut P> {
        self.slots
            .get_mut(handle.id() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.peer.as_mut())
    }

    pub(crate) fn remove(&mut self, handle: ConnectionHandle) -> Option<P> {
        self.slots
            .get_mut(handle.id() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.peer.take())
    }

    pub(crate) fn find(&self, mut predicate: impl FnMut(&P) -> bool) -> Option<ConnectionHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.peer
                .as_ref()
                .filter(|peer| predicate(peer))
                .map(|_| ConnectionHandle::new(index as u32, slot.generation))
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ConnectionHandle, &mut P)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.peer
                .as_mut()
                .map(|peer| (ConnectionHandle::new(index as u32, generation), peer))
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.peer.is_some()).count()
    }
}

impl<P> Default for PeerSlots<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handle_is_never_valid() {
        let mut slots = PeerSlots::new();
        let handle = slots.insert("a");

        assert_eq!(handle.id(), 0);
        assert!(slots.get(ConnectionHandle::default()).is_none());
        assert_eq!(slots.get(handle), Some(&"a"));
    }

    #[test]
    fn test_ids_are_reused_with_new_generation() {
        let mut slots = PeerSlots::new();
        let first = slots.insert("a");
        let second = slots.insert("b");
        assert_eq!(second.id(), 1);

        assert_eq!(slots.remove(first), Some("a"));
        let third = slots.insert("c");

        assert_eq!(third.id(), first.id());
        assert_ne!(third.generation(), first.generation());
        assert!(slots.get(first).is_none());
        assert_eq!(slots.get(third), Some(&"c"));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_find_and_iterate() {
        let mut slots = PeerSlots::new();
        slots.insert(1);
        let two = slots.insert(2);

        assert_eq!(slots.find(|peer| *peer == 2), Some(two));
        assert_eq!(slots.find(|peer| *peer == 3), None);

        for (_, peer) in slots.iter_mut() {
            *peer *= 10;
        }
        assert_eq!(slots.get(two), Some(&20));
    }
}
