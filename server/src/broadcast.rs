//! Fan-out of one message to every live connection.

use crate::connection_table::ConnectionTable;
use crate::transport::Transport;
use log::warn;
use shared::Channel;

/// Sends `message` over the reliable-ordered channel to each live connection.
///
/// A failed send is logged and skipped. Returns the number of connections the
/// transport accepted the message for.
pub fn broadcast<T: Transport + ?Sized>(
    transport: &mut T,
    connections: &ConnectionTable,
    message: &str,
) -> usize {
    let payload = message.as_bytes();
    let mut delivered = 0;

    for connection in connections.live() {
        match transport.send(connection.handle, Channel::ReliableOrdered, payload) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Failed to send to connection {}: {}", connection.id, e),
        }
    }

    delivered
}
