//! Socket table.
//!
//! Replaces the source's function-pointer-identity role check (comparing
//! `socket->callback` against known handlers to decide how to treat a
//! socket during fan-out) with explicit `Role`/`CallbackTag` tags set once
//! at socket-creation time and matched everywhere else.

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::Token;

use crate::buffer::SlidingBuffer;
use crate::connection::ConnId;

/// How a socket participates in fan-out. `Relay` is the INPUT connection
/// (raw-byte and parsed-frame source); `Bidirectional` peers receive raw
/// INPUT bytes and may write back toward INPUT; `Unidirectional` peers
/// only ever receive parsed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Relay,
    Bidirectional,
    Unidirectional,
}

/// What kind of reactor event this socket was registered to receive,
/// independent of its fan-out `Role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackTag {
    AcceptListener,
    AwaitConnect,
    RelayInput,
    PeerIo,
}

pub enum SocketKind {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl SocketKind {
    pub fn as_stream(&self) -> Option<&TcpStream> {
        match self {
            SocketKind::Stream(s) => Some(s),
            SocketKind::Listener(_) => None,
        }
    }

    pub fn as_stream_mut(&mut self) -> Option<&mut TcpStream> {
        match self {
            SocketKind::Stream(s) => Some(s),
            SocketKind::Listener(_) => None,
        }
    }

    pub fn as_listener_mut(&mut self) -> Option<&mut TcpListener> {
        match self {
            SocketKind::Listener(l) => Some(l),
            SocketKind::Stream(_) => None,
        }
    }

    pub fn source(&mut self) -> &mut dyn Source {
        match self {
            SocketKind::Listener(l) => l,
            SocketKind::Stream(s) => s,
        }
    }
}

pub struct Socket {
    pub kind: SocketKind,
    pub role: Role,
    pub tag: CallbackTag,
    pub owner: ConnId,
    /// Present only on sockets that actually carry the ECM1240 byte
    /// stream; `None` for listeners and for peers that never read.
    pub read_buffer: Option<SlidingBuffer>,
    /// The async-connect timeout armed while `tag == AwaitConnect`.
    /// Cancelled once the connect completes (success or failure) so the
    /// timer never outlives the socket it was guarding.
    pub connect_timer: Option<crate::timer::TimerId>,
}

impl Socket {
    pub fn new(kind: SocketKind, role: Role, tag: CallbackTag, owner: ConnId) -> Self {
        Self { kind, role, tag, owner, read_buffer: None, connect_timer: None }
    }
}

/// Flat `Vec`-backed socket table, indexed by `mio::Token`. Kept as a
/// linear scan rather than a `HashMap` since the table stays small (one
/// entry per configured connection plus its accepted children) and
/// fan-out already needs a full scan every cycle.
#[derive(Default)]
pub struct SocketTable {
    entries: Vec<(Token, Socket)>,
}

impl SocketTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert(&mut self, token: Token, socket: Socket) {
        self.entries.push((token, socket));
    }

    pub fn remove(&mut self, token: Token) -> Option<Socket> {
        let pos = self.entries.iter().position(|(t, _)| *t == token)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, token: Token) -> Option<&Socket> {
        self.entries.iter().find(|(t, _)| *t == token).map(|(_, s)| s)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Socket> {
        self.entries.iter_mut().find(|(t, _)| *t == token).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, &Socket)> {
        self.entries.iter().map(|(t, s)| (*t, s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Token, &mut Socket)> {
        self.entries.iter_mut().map(|(t, s)| (*t, s))
    }

    /// Tokens of every socket matching the given role and callback tag,
    /// in table order. Used by the router to compute fan-out targets
    /// without holding a borrow across the write loop.
    pub fn tokens_matching(&self, role: Role, tag: CallbackTag) -> Vec<Token> {
        self.entries
            .iter()
            .filter(|(_, s)| s.role == role && s.tag == tag)
            .map(|(t, _)| *t)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn dummy_stream() -> TcpStream {
        let listener = std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let addr = listener.local_addr().unwrap();
        let std_stream = std::net::TcpStream::connect(addr).unwrap();
        std_stream.set_nonblocking(true).unwrap();
        TcpStream::from_std(std_stream)
    }

    #[test]
    fn tokens_matching_filters_by_role_and_tag() {
        let mut table = SocketTable::new();
        table.insert(
            Token(0),
            Socket::new(SocketKind::Stream(dummy_stream()), Role::Relay, CallbackTag::RelayInput, ConnId::Input),
        );
        table.insert(
            Token(1),
            Socket::new(
                SocketKind::Stream(dummy_stream()),
                Role::Bidirectional,
                CallbackTag::PeerIo,
                ConnId::Peer(0),
            ),
        );
        table.insert(
            Token(2),
            Socket::new(
                SocketKind::Stream(dummy_stream()),
                Role::Unidirectional,
                CallbackTag::PeerIo,
                ConnId::Peer(1),
            ),
        );

        let bidir = table.tokens_matching(Role::Bidirectional, CallbackTag::PeerIo);
        assert_eq!(bidir, vec![Token(1)]);

        let uni = table.tokens_matching(Role::Unidirectional, CallbackTag::PeerIo);
        assert_eq!(uni, vec![Token(2)]);
    }

    #[test]
    fn remove_then_get_returns_none() {
        let mut table = SocketTable::new();
        table.insert(
            Token(5),
            Socket::new(SocketKind::Stream(dummy_stream()), Role::Relay, CallbackTag::RelayInput, ConnId::Input),
        );
        assert!(table.remove(Token(5)).is_some());
        assert!(table.get(Token(5)).is_none());
    }
}
