//! Types shared between the account server and its clients.
//!
//! Two layers live here:
//! - the application protocol (`protocol`): the comma separated text commands
//!   clients send and the reply tokens the server answers with;
//! - the datagram framing (`Packet`) and sequencing helpers (`reliability`)
//!   that the UDP transport uses to offer a reliable-ordered and an
//!   unreliable-unordered channel over a single socket.

use serde::{Deserialize, Serialize};

pub mod protocol;
pub mod reliability;

pub use protocol::{Command, DecodeError, GameState, ServerReply};
pub use reliability::{ReliableReceiver, ReliableSender, WindowFull, MAX_RELIABLE_WINDOW};

/// Datagram protocol version; peers with a different version are refused
pub const PROTOCOL_VERSION: u32 = 1;

/// Default UDP port of the account server
pub const DEFAULT_PORT: u16 = 9002;

/// Largest datagram either side will read
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Delivery mode of a payload
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Delivered exactly once, in send order
    ReliableOrdered,
    /// Best effort, may be lost or reordered
    UnreliableUnordered,
}

/// One UDP datagram
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Accepted {
        connection_id: u32,
    },
    Disconnect,
    Disconnected {
        reason: String,
    },
    Heartbeat,
    Data {
        channel: Channel,
        sequence: u32,
        payload: Vec<u8>,
    },
    Ack {
        sequence: u32,
    },
}

impl Packet {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_serialization_data() {
        let packet = Packet::Data {
            channel: Channel::ReliableOrdered,
            sequence: 7,
            payload: b"1,alice,secret".to_vec(),
        };

        let bytes = packet.to_bytes().unwrap();
        let decoded = Packet::from_bytes(&bytes).unwrap();

        match decoded {
            Packet::Data {
                channel,
                sequence,
                payload,
            } => {
                assert_eq!(channel, Channel::ReliableOrdered);
                assert_eq!(sequence, 7);
                assert_eq!(payload, b"1,alice,secret");
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_disconnected() {
        let packet = Packet::Disconnected {
            reason: "Server full".to_string(),
        };

        let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Packet::from_bytes(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
        assert!(Packet::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_encoded_packets_fit_datagram() {
        let packet = Packet::Data {
            channel: Channel::UnreliableUnordered,
            sequence: 0,
            payload: vec![b'a'; 512],
        };
        assert!(packet.to_bytes().unwrap().len() < MAX_DATAGRAM_SIZE);
    }
}
