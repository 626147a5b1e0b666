//! Connection table and the pure role-classification
//! rules resolved from `original_source/ecmread.c`.

use mio::Token;

pub use crate::config::Connection;
use crate::socket::Role;

/// Identifies a configured connection slot. `Input` is always slot zero in
/// spirit (there is exactly one), `Peer(i)` indexes into the peer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnId {
    Input,
    Peer(usize),
}

/// The live socket bound to each configured connection, plus the
/// configuration itself. A connection without a live socket (not yet
/// dialed, or waiting on its retry timer) has `socket == None`.
pub struct ConnectionTable {
    pub input: Connection,
    pub peers: Vec<Connection>,
    input_socket: Option<Token>,
    peer_sockets: Vec<Option<Token>>,
}

impl ConnectionTable {
    pub fn new(input: Connection, peers: Vec<Connection>) -> Self {
        let peer_sockets = vec![None; peers.len()];
        Self { input, peers, input_socket: None, peer_sockets }
    }

    pub fn ids(&self) -> Vec<ConnId> {
        std::iter::once(ConnId::Input)
            .chain((0..self.peers.len()).map(ConnId::Peer))
            .collect()
    }

    pub fn get(&self, id: ConnId) -> &Connection {
        match id {
            ConnId::Input => &self.input,
            ConnId::Peer(i) => &self.peers[i],
        }
    }

    pub fn socket_of(&self, id: ConnId) -> Option<Token> {
        match id {
            ConnId::Input => self.input_socket,
            ConnId::Peer(i) => self.peer_sockets[i],
        }
    }

    pub fn set_socket(&mut self, id: ConnId, token: Option<Token>) {
        match id {
            ConnId::Input => self.input_socket = token,
            ConnId::Peer(i) => self.peer_sockets[i] = token,
        }
    }

    /// The connection id owning the given live socket token, if any.
    pub fn id_of_socket(&self, token: Token) -> Option<ConnId> {
        if self.input_socket == Some(token) {
            return Some(ConnId::Input);
        }
        self.peer_sockets
            .iter()
            .position(|s| *s == Some(token))
            .map(ConnId::Peer)
    }
}

/// Determines a socket's fan-out `Role` purely from which connection it
/// belongs to and that connection's configuration — never from the
/// identity of whatever callback happens to service it.
///
/// The source always treats the INPUT connection's socket as the relay
/// role regardless of whether INPUT itself dials out or listens; peers
/// are `Bidirectional` when marked `controller` (they may write back
/// toward INPUT) and `Unidirectional` otherwise (parsed-frame sinks only).
pub fn classify_role(id: ConnId, conn: &Connection) -> Role {
    match id {
        ConnId::Input => Role::Relay,
        ConnId::Peer(_) => {
            if conn.controller {
                Role::Bidirectional
            } else {
                Role::Unidirectional
            }
        }
    }
}

/// Whether a socket needs its own `SlidingBuffer` for incoming bytes.
///
/// Resolved from the source's `(connection->connector || (!connection->controller
/// && !connected_to))` condition: a read buffer is allocated iff this is
/// the INPUT connection, and either INPUT is the one dialing out, or the
/// socket was accepted (not the configured listener's own listening
/// socket — `accepted` distinguishes an accepted child from the listener
/// itself). Peer sockets never get a read buffer of their own; they are
/// write-only fan-out targets.
pub fn needs_read_buffer(id: ConnId, conn: &Connection, accepted: bool) -> bool {
    match id {
        ConnId::Input => conn.connector || accepted,
        ConnId::Peer(_) => false,
    }
}
