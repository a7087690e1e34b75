/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::types::basic::Address;

use super::messages::Message;

/// A handle to the transport that connects this node to its peers.
///
/// Implementations may lose, duplicate, or reorder messages. Byte-oriented transports can use
/// [`codec`](super::codec) to frame messages.
pub trait Network: Clone + Send {
    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: Address, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(Address, Message)>;
}
