//! UDP binding of the transport.
//!
//! One non-blocking socket serves every peer. A peer becomes a connection when
//! it sends `Packet::Connect`; it stays one until it sends `Packet::Disconnect`,
//! the server drops it, or nothing is heard from it for the connection timeout.
//! Reliable payloads carry a sequence number and are acknowledged and resent
//! through `shared::reliability`; unreliable payloads are sent once.

use super::{ConnectionHandle, NetworkEvent, PeerSlots, Transport};
use crate::error::TransportError;
use log::{debug, info, warn};
use shared::reliability::{DEFAULT_RESEND_INTERVAL, MAX_RELIABLE_WINDOW};
use shared::{
    Channel, Packet, ReliableReceiver, ReliableSender, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// Silence after which a peer is considered gone
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle time after which the server sends a keep-alive
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct UdpPeer {
    addr: SocketAddr,
    last_seen: Instant,
    last_sent: Instant,
    events: VecDeque<NetworkEvent>,
    sender: ReliableSender,
    receiver: ReliableReceiver,
    closing: bool,
}

impl UdpPeer {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            last_seen: now,
            last_sent: now,
            events: VecDeque::new(),
            sender: ReliableSender::new(),
            receiver: ReliableReceiver::new(),
            closing: false,
        }
    }

    fn close(&mut self) {
        if !self.closing {
            self.closing = true;
            self.events.push_back(NetworkEvent::Disconnect);
        }
    }
}

pub struct UdpTransport {
    socket: Option<UdpSocket>,
    listening: bool,
    peers: PeerSlots<UdpPeer>,
    pending: VecDeque<ConnectionHandle>,
    connection_timeout: Duration,
    heartbeat_interval: Duration,
    resend_interval: Duration,
    buffer: Vec<u8>,
}

impl UdpTransport {
    pub fn new(connection_timeout: Duration) -> Self {
        Self {
            socket: None,
            listening: false,
            peers: PeerSlots::new(),
            pending: VecDeque::new(),
            connection_timeout,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn with_resend_interval(mut self, resend_interval: Duration) -> Self {
        self.resend_interval = resend_interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Address the socket is bound to, useful after binding port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    pub fn peer_addr(&self, handle: ConnectionHandle) -> Option<SocketAddr> {
        self.peers.get(handle).map(|peer| peer.addr)
    }

    fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), TransportError> {
        let data = packet.to_bytes()?;
        socket.send_to(&data, addr)?;
        Ok(())
    }

    /// Reads every datagram currently queued on the socket
    fn receive_datagrams(&mut self, now: Instant) {
        loop {
            let received = match &self.socket {
                Some(socket) => socket.recv_from(&mut self.buffer),
                None => return,
            };

            match received {
                Ok((len, addr)) => match Packet::from_bytes(&self.buffer[..len]) {
                    Ok(packet) => self.handle_packet(packet, addr, now),
                    Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    // ICMP errors from a previous send surface here on some
                    // platforms; they are not fatal for the socket
                    debug!("Error receiving packet: {}", e);
                    if e.kind() != ErrorKind::ConnectionReset {
                        return;
                    }
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr, now: Instant) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let existing = self.peers.find(|peer| peer.addr == addr && !peer.closing);

        if let Some(handle) = existing {
            if let Some(peer) = self.peers.get_mut(handle) {
                peer.last_seen = now;
            }
        }

        match packet {
            Packet::Connect { client_version } => {
                if !self.listening {
                    debug!("Ignoring connect from {} before listen", addr);
                    return;
                }

                if client_version != PROTOCOL_VERSION {
                    info!(
                        "Refusing {}: protocol version {} (expected {})",
                        addr, client_version, PROTOCOL_VERSION
                    );
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    if let Err(e) = Self::send_packet_impl(socket, &response, addr) {
                        warn!("Failed to send refusal to {}: {}", addr, e);
                    }
                    return;
                }

                // A repeated connect means our Accepted was lost
                let handle = match existing {
                    Some(handle) => handle,
                    None => {
                        let handle = self.peers.insert(UdpPeer::new(addr, now));
                        self.pending.push_back(handle);
                        info!("Client connecting from {} (version: {})", addr, client_version);
                        handle
                    }
                };

                let response = Packet::Accepted {
                    connection_id: handle.id(),
                };
                if let Err(e) = Self::send_packet_impl(socket, &response, addr) {
                    warn!("Failed to send accept to {}: {}", addr, e);
                }
            }

            Packet::Disconnect => {
                if let Some(peer) = existing.and_then(|handle| self.peers.get_mut(handle)) {
                    info!("Client at {} disconnected", addr);
                    peer.close();
                }
            }

            Packet::Heartbeat => {}

            Packet::Data {
                channel,
                sequence,
                payload,
            } => {
                let Some(peer) = existing.and_then(|handle| self.peers.get_mut(handle)) else {
                    debug!("Data from unknown peer {}", addr);
                    return;
                };

                match channel {
                    Channel::ReliableOrdered => {
                        if peer.receiver.is_beyond_window(sequence) {
                            debug!("Dropping sequence {} from {}: beyond window", sequence, addr);
                            return;
                        }
                        let ack = Packet::Ack { sequence };
                        if let Err(e) = Self::send_packet_impl(socket, &ack, addr) {
                            warn!("Failed to acknowledge {} to {}: {}", sequence, addr, e);
                        }
                        for payload in peer.receiver.receive(sequence, payload) {
                            peer.events.push_back(NetworkEvent::Data { payload, channel });
                        }
                    }
                    Channel::UnreliableUnordered => {
                        peer.events.push_back(NetworkEvent::Data { payload, channel });
                    }
                }
            }

            Packet::Ack { sequence } => {
                if let Some(peer) = existing.and_then(|handle| self.peers.get_mut(handle)) {
                    peer.sender.acknowledge(sequence);
                }
            }

            Packet::Accepted { .. } | Packet::Disconnected { .. } => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Resends, keep-alives and timeouts
    fn service_peers(&mut self, now: Instant) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };

        for (handle, peer) in self.peers.iter_mut() {
            if peer.closing {
                continue;
            }

            if now.duration_since(peer.last_seen) > self.connection_timeout {
                info!("Connection {} at {} timed out", handle.id(), peer.addr);
                peer.close();
                continue;
            }

            for packet in peer.sender.due_for_resend(now, self.resend_interval) {
                if let Err(e) = Self::send_packet_impl(socket, &packet, peer.addr) {
                    warn!("Failed to resend to {}: {}", peer.addr, e);
                }
                peer.last_sent = now;
            }

            if now.duration_since(peer.last_sent) >= self.heartbeat_interval {
                if let Err(e) = Self::send_packet_impl(socket, &Packet::Heartbeat, peer.addr) {
                    warn!("Failed to send heartbeat to {}: {}", peer.addr, e);
                }
                peer.last_sent = now;
            }
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_TIMEOUT)
    }
}

impl Transport for UdpTransport {
    fn bind(&mut self, addr: &str) -> Result<(), TransportError> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_nonblocking(true)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn listen(&mut self) -> Result<(), TransportError> {
        if self.socket.is_none() {
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
        let now = Instant::now();
        self.receive_datagrams(now);
        self.service_peers(now);
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
        let socket = self.socket.as_ref().ok_or(TransportError::NotBound)?;
        let peer = match self.peers.get_mut(handle) {
            Some(peer) if !peer.closing => peer,
            _ => return Err(TransportError::InvalidConnection(handle.id())),
        };

        let now = Instant::now();
        let packet = match channel {
            Channel::ReliableOrdered => match peer.sender.push(payload.to_vec(), now) {
                Ok(packet) => packet,
                Err(e) => {
                    // Heartbeats alone keep a peer alive; a stalled window ends it
                    warn!("Closing connection {} at {}: {}", handle.id(), peer.addr, e);
                    peer.close();
                    return Err(TransportError::Congested(handle.id()));
                }
            },
            Channel::UnreliableUnordered => Packet::Data {
                channel,
                sequence: 0,
                payload: payload.to_vec(),
            },
        };
        peer.last_sent = now;

        match Self::send_packet_impl(socket, &packet, peer.addr) {
            // Queued for resend, the next update retries it
            Err(TransportError::Io(e))
                if e.kind() == ErrorKind::WouldBlock && channel == Channel::ReliableOrdered =>
            {
                Ok(())
            }
            result => result,
        }
    }

    fn disconnect(&mut self, handle: ConnectionHandle) {
        let Some(peer) = self.peers.remove(handle) else {
            return;
        };

        if let Some(socket) = self.socket.as_ref() {
            let packet = Packet::Disconnected {
                reason: "Disconnected by server".to_string(),
            };
            if let Err(e) = Self::send_packet_impl(socket, &packet, peer.addr) {
                warn!("Failed to notify {} of disconnect: {}", peer.addr, e);
            }
        }
        info!("Connection {} at {} dropped by server", handle.id(), peer.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound_transport() -> UdpTransport {
        let mut transport = UdpTransport::default();
        transport.bind("127.0.0.1:0").unwrap();
        transport.listen().unwrap();
        transport
    }

    fn client_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn send(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) {
        socket.send_to(&packet.to_bytes().unwrap(), addr).unwrap();
    }

    fn recv(socket: &UdpSocket) -> Packet {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        Packet::from_bytes(&buf[..len]).unwrap()
    }

    /// Updates until the transport has something to accept
    fn accept_with_retries(transport: &mut UdpTransport) -> ConnectionHandle {
        for _ in 0..50 {
            transport.update();
            if let Some(handle) = transport.accept() {
                return handle;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("No connection accepted");
    }

    fn pop_with_retries(transport: &mut UdpTransport, handle: ConnectionHandle) -> NetworkEvent {
        for _ in 0..50 {
            transport.update();
            if let Some(event) = transport.pop_event(handle) {
                return event;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("No event received");
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let mut transport = UdpTransport::default();
        let result = transport.bind(&addr);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(matches!(transport.listen(), Err(TransportError::NotBound)));
    }

    #[test]
    fn test_handshake_and_reliable_data() {
        let mut transport = bound_transport();
        let server_addr = transport.local_addr().unwrap();
        let client = client_socket();

        send(&client, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr);
        let handle = accept_with_retries(&mut transport);
        assert_eq!(
            recv(&client),
            Packet::Accepted {
                connection_id: handle.id()
            }
        );

        let data = Packet::Data {
            channel: Channel::ReliableOrdered,
            sequence: 0,
            payload: b"1,alice,secret".to_vec(),
        };
        send(&client, &data, server_addr);

        assert_eq!(
            pop_with_retries(&mut transport, handle),
            NetworkEvent::Data {
                payload: b"1,alice,secret".to_vec(),
                channel: Channel::ReliableOrdered,
            }
        );
        assert_eq!(recv(&client), Packet::Ack { sequence: 0 });
    }

    #[test]
    fn test_reliable_send_is_resent_until_acked() {
        let mut transport = bound_transport().with_resend_interval(Duration::from_millis(0));
        let server_addr = transport.local_addr().unwrap();
        let client = client_socket();

        send(&client, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr);
        let handle = accept_with_retries(&mut transport);
        recv(&client);

        transport
            .send(handle, Channel::ReliableOrdered, b"LoginFail")
            .unwrap();
        let first = recv(&client);
        transport.update();
        let again = recv(&client);
        assert_eq!(first, again);

        send(&client, &Packet::Ack { sequence: 0 }, server_addr);
        transport.update();
        std::thread::sleep(Duration::from_millis(20));
        transport.update();
        assert_eq!(
            transport.peers.get(handle).map(|peer| peer.sender.in_flight()),
            Some(0)
        );
    }

    #[test]
    fn test_version_mismatch_is_refused() {
        let mut transport = bound_transport();
        let server_addr = transport.local_addr().unwrap();
        let client = client_socket();

        send(&client, &Packet::Connect { client_version: 99 }, server_addr);
        transport.update();
        std::thread::sleep(Duration::from_millis(20));
        transport.update();

        assert!(transport.accept().is_none());
        assert!(matches!(recv(&client), Packet::Disconnected { .. }));
    }

    #[test]
    fn test_client_disconnect_and_timeout() {
        let mut transport = UdpTransport::new(Duration::from_millis(50));
        transport.bind("127.0.0.1:0").unwrap();
        transport.listen().unwrap();
        let server_addr = transport.local_addr().unwrap();

        let leaving = client_socket();
        let silent = client_socket();
        send(&leaving, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr);
        let leaving_handle = accept_with_retries(&mut transport);
        send(&silent, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr);
        let silent_handle = accept_with_retries(&mut transport);

        send(&leaving, &Packet::Disconnect, server_addr);
        assert_eq!(
            pop_with_retries(&mut transport, leaving_handle),
            NetworkEvent::Disconnect
        );

        std::thread::sleep(Duration::from_millis(80));
        transport.update();
        assert_eq!(transport.pop_event(silent_handle), Some(NetworkEvent::Disconnect));
        assert!(transport.peer_addr(silent_handle).is_none());
    }

    #[test]
    fn test_unacked_peer_is_closed_when_window_fills() {
        let mut transport = bound_transport();
        let server_addr = transport.local_addr().unwrap();
        let client = client_socket();

        send(&client, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr);
        let handle = accept_with_retries(&mut transport);

        for _ in 0..MAX_RELIABLE_WINDOW {
            transport
                .send(handle, Channel::ReliableOrdered, b"StateChange:Lobby")
                .unwrap();
        }
        assert!(matches!(
            transport.send(handle, Channel::ReliableOrdered, b"StateChange:Lobby"),
            Err(TransportError::Congested(id)) if id == handle.id()
        ));
        assert!(transport
            .send(handle, Channel::ReliableOrdered, b"StateChange:Lobby")
            .is_err());
        assert_eq!(transport.pop_event(handle), Some(NetworkEvent::Disconnect));
    }

    #[test]
    fn test_far_ahead_data_is_neither_buffered_nor_acked() {
        let mut transport = bound_transport();
        let server_addr = transport.local_addr().unwrap();
        let client = client_socket();

        send(&client, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr);
        let handle = accept_with_retries(&mut transport);
        recv(&client);

        for sequence in MAX_RELIABLE_WINDOW..MAX_RELIABLE_WINDOW + 50 {
            let data = Packet::Data {
                channel: Channel::ReliableOrdered,
                sequence,
                payload: b"1,flood,pw".to_vec(),
            };
            send(&client, &data, server_addr);
        }
        let data = Packet::Data {
            channel: Channel::ReliableOrdered,
            sequence: 0,
            payload: b"2,alice,pw".to_vec(),
        };
        send(&client, &data, server_addr);

        assert_eq!(
            pop_with_retries(&mut transport, handle),
            NetworkEvent::Data {
                payload: b"2,alice,pw".to_vec(),
                channel: Channel::ReliableOrdered,
            }
        );
        assert_eq!(
            transport.peers.get(handle).map(|peer| peer.receiver.buffered()),
            Some(0)
        );
        // Only the in-window datagram was acknowledged
        assert_eq!(recv(&client), Packet::Ack { sequence: 0 });
    }
}
