use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use triangle_rs::{
    networking::{messages::Message, network::Network},
    types::basic::{Address, SequenceNumber},
};

/// A mock network stub which passes messages from and to threads using channels.
///
/// Messages matching a [hold](NetworkStub::hold) rule are kept back until
/// [released](NetworkStub::release_held), to simulate records that are late or lost in transit.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: Address,
    all_peers: HashMap<Address, Sender<(Address, Message)>>,
    inbox: Arc<Mutex<Receiver<(Address, Message)>>>,
    held: Arc<Mutex<Held>>,
}

#[derive(Default)]
struct Held {
    rules: Vec<(Address, SequenceNumber)>,
    messages: Vec<(Address, Message)>,
}

impl NetworkStub {
    pub(crate) fn me(&self) -> Address {
        self.me
    }

    /// Keep back the next record with `sequence` sent to `peer`.
    pub(crate) fn hold(&self, peer: Address, sequence: SequenceNumber) {
        self.held.lock().unwrap().rules.push((peer, sequence));
    }

    /// Deliver every message kept back so far.
    pub(crate) fn release_held(&self) {
        let messages = std::mem::take(&mut self.held.lock().unwrap().messages);
        for (peer, message) in messages {
            self.deliver(peer, message);
        }
    }

    /// Receive every message currently in the inbox.
    pub(crate) fn drain_inbox(&mut self) -> Vec<(Address, Message)> {
        let mut messages = Vec::new();
        while let Some(message) = self.recv() {
            messages.push(message);
        }
        messages
    }

    fn deliver(&self, peer: Address, message: Message) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.me, message));
        }
    }
}

impl Network for NetworkStub {
    fn send(&mut self, peer: Address, message: Message) {
        let Message::BackupWrite(record) = &message;
        {
            let mut held = self.held.lock().unwrap();
            let rule = held
                .rules
                .iter()
                .position(|(held_peer, sequence)| *held_peer == peer && *sequence == record.sequence);
            if let Some(rule) = rule {
                held.rules.remove(rule);
                held.messages.push((peer, message));
                return;
            }
        }
        self.deliver(peer, message)
    }

    fn recv(&mut self) -> Option<(Address, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = Address>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(Address, Receiver<(Address, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(me, inbox)| NetworkStub {
            me,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            held: Arc::new(Mutex::new(Held::default())),
        })
        .collect()
}
