//! Fan-out router.
//!
//! Writes are best-effort: a short or failed write is logged and the
//! byte/frame is dropped for that target. Matching the source's actual
//! behaviour, a write failure never itself triggers a reconnect — only a
//! *read* failure on a connector socket does that.

use std::io::Write;

use mio::Token;

use crate::connection::{ConnId, ConnectionTable};
use crate::frame::FRAME_LEN;
use crate::socket::{CallbackTag, Role, SocketTable};

fn best_effort_write(sockets: &mut SocketTable, token: Token, bytes: &[u8]) {
    let Some(socket) = sockets.get_mut(token) else { return };
    let Some(stream) = socket.kind.as_stream_mut() else { return };
    match stream.write(bytes) {
        Ok(n) if n == bytes.len() => {}
        Ok(n) => {
            tracing::warn!(token = token.0, wrote = n, wanted = bytes.len(), "short write to peer");
        }
        Err(e) => {
            tracing::warn!(token = token.0, error = %e, "write to peer failed");
        }
    }
}

/// Raw INPUT bytes, fanned out verbatim to every `Bidirectional` peer.
pub fn forward_from_input(sockets: &mut SocketTable, bytes: &[u8]) {
    for token in sockets.tokens_matching(Role::Bidirectional, CallbackTag::PeerIo) {
        best_effort_write(sockets, token, bytes);
    }
}

/// A parsed, validated 65-byte frame, fanned out to every `Unidirectional`
/// peer.
pub fn forward_frame_to_listeners(sockets: &mut SocketTable, frame: &[u8; FRAME_LEN]) {
    for token in sockets.tokens_matching(Role::Unidirectional, CallbackTag::PeerIo) {
        best_effort_write(sockets, token, frame);
    }
}

/// A controller peer's bytes, forwarded back toward INPUT. When INPUT
/// dials out, its single socket (tracked by the connection table) is the
/// target; when INPUT listens, there is no single owning socket for
/// multiple accepted children, so the source's `send_to_input` instead
/// picks the first `relay_data` socket in table order — the same rule
/// applied here.
pub fn forward_to_input(sockets: &mut SocketTable, conns: &ConnectionTable, bytes: &[u8]) {
    let target = if conns.input.connector {
        conns.socket_of(ConnId::Input)
    } else {
        sockets.tokens_matching(Role::Relay, CallbackTag::RelayInput).first().copied()
    };
    match target {
        Some(token) => best_effort_write(sockets, token, bytes),
        None => tracing::debug!("no INPUT socket available, dropping controller write"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::socket::{Socket, SocketKind};
    use mio::net::TcpStream;
    use std::io::Read;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    fn connected_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(client), server)
    }

    fn dummy_connection() -> Connection {
        Connection {
            name: "p".to_string(),
            host: Ipv4Addr::LOCALHOST,
            port: 1,
            connector: false,
            controller: false,
            connect_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn forward_from_input_reaches_only_bidirectional_peers() {
        let mut sockets = SocketTable::new();
        let (bidir_client, mut bidir_server) = connected_pair();
        let (uni_client, mut uni_server) = connected_pair();

        sockets.insert(
            Token(1),
            Socket::new(SocketKind::Stream(bidir_client), Role::Bidirectional, CallbackTag::PeerIo, ConnId::Peer(0)),
        );
        sockets.insert(
            Token(2),
            Socket::new(SocketKind::Stream(uni_client), Role::Unidirectional, CallbackTag::PeerIo, ConnId::Peer(1)),
        );

        forward_from_input(&mut sockets, b"hello");

        let mut buf = [0u8; 16];
        let n = bidir_server.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        uni_server.set_nonblocking(true).unwrap();
        let err = uni_server.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn forward_to_input_falls_back_to_first_relay_socket_when_listening() {
        let mut sockets = SocketTable::new();
        let (relay_client, mut relay_server) = connected_pair();
        sockets.insert(
            Token(9),
            Socket::new(SocketKind::Stream(relay_client), Role::Relay, CallbackTag::RelayInput, ConnId::Input),
        );

        let conns = ConnectionTable::new(dummy_connection(), vec![]);
        forward_to_input(&mut sockets, &conns, b"ack");

        let mut buf = [0u8; 8];
        let n = relay_server.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ack");
    }
}
