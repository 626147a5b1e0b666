//! Single-threaded readiness loop tying together the timer wheel, socket
//! table, connection manager, and router.
//!
//! The async-connect handling here is event-driven: register for writable
//! interest, wait for actual writable readiness, then check `SO_ERROR` via
//! `peer_addr()` — rather than polling `take_error()` on a fixed repeat
//! timer regardless of readiness.

use std::io::{self, ErrorKind, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::config::RelayConfig;
use crate::connection::{classify_role, needs_read_buffer, ConnId, ConnectionTable};
use crate::frame::{drain_frames, FRAME_LEN};
use crate::router::{forward_frame_to_listeners, forward_from_input, forward_to_input};
use crate::socket::{CallbackTag, Role, Socket, SocketKind, SocketTable};
use crate::timer::TimerWheel;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const LISTEN_BACKLOG: i32 = 5;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy)]
enum TimerAction {
    Reconnect(ConnId),
    CancelConnect(Token),
}

pub struct Relay {
    poll: Poll,
    events: Events,
    sockets: SocketTable,
    conns: ConnectionTable,
    timers: TimerWheel<TimerAction>,
    next_token: usize,
}

impl Relay {
    pub fn new(config: RelayConfig) -> io::Result<Self> {
        let conns = ConnectionTable::new(config.input, config.peers);
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(128),
            sockets: SocketTable::new(),
            conns,
            timers: TimerWheel::new(),
            next_token: 0,
        })
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Dials or listens for every configured connection. Called once at
    /// startup; later (re)connections go through `schedule_reconnect` /
    /// `setup_connection`.
    pub fn bootstrap(&mut self) {
        for id in self.conns.ids() {
            self.setup_connection(id);
        }
    }

    fn setup_connection(&mut self, id: ConnId) {
        let conn = self.conns.get(id).clone();
        let result = if conn.connector {
            self.dial(id, &conn)
        } else {
            self.listen(id, &conn)
        };
        if let Err(e) = result {
            tracing::warn!(connection = %conn.name, error = %e, "failed to set up connection");
            if conn.connector {
                self.schedule_reconnect(id, conn.connect_delay);
            }
        }
    }

    fn dial(&mut self, id: ConnId, conn: &crate::config::Connection) -> io::Result<()> {
        let addr = SocketAddr::from((conn.host, conn.port));
        let stream = TcpStream::connect(addr)?;
        let token = self.next_token();

        if stream.peer_addr().is_ok() {
            self.register_connected(token, stream, id, conn, false)?;
        } else {
            let mut socket = Socket::new(SocketKind::Stream(stream), Role::Relay, CallbackTag::AwaitConnect, id);
            self.poll.registry().register(socket.kind.source(), token, Interest::WRITABLE)?;
            let timer_id = self.timers.start(CONNECT_TIMEOUT, TimerAction::CancelConnect(token));
            socket.connect_timer = Some(timer_id);
            self.sockets.insert(token, socket);
            self.conns.set_socket(id, Some(token));
        }
        Ok(())
    }

    fn bind_reuseaddr(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
        let domain = socket2::Domain::for_address(addr);
        let sock = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sock.bind(&addr.into())?;
        sock.listen(LISTEN_BACKLOG)?;
        sock.set_nonblocking(true)?;
        Ok(sock.into())
    }

    fn listen(&mut self, id: ConnId, conn: &crate::config::Connection) -> io::Result<()> {
        let addr = SocketAddr::from((conn.host, conn.port));
        let std_listener = Self::bind_reuseaddr(addr)?;
        let mut listener = TcpListener::from_std(std_listener);
        let token = self.next_token();
        self.poll.registry().register(&mut listener, token, Interest::READABLE)?;

        let role = classify_role(id, conn);
        let socket = Socket::new(SocketKind::Listener(listener), role, CallbackTag::AcceptListener, id);
        self.sockets.insert(token, socket);
        self.conns.set_socket(id, Some(token));
        Ok(())
    }

    fn register_connected(
        &mut self,
        token: Token,
        mut stream: TcpStream,
        id: ConnId,
        conn: &crate::config::Connection,
        accepted: bool,
    ) -> io::Result<()> {
        let role = classify_role(id, conn);
        let tag = match role {
            Role::Relay => CallbackTag::RelayInput,
            Role::Bidirectional | Role::Unidirectional => CallbackTag::PeerIo,
        };
        self.poll.registry().register(&mut stream, token, Interest::READABLE)?;

        let mut socket = Socket::new(SocketKind::Stream(stream), role, tag, id);
        if needs_read_buffer(id, conn, accepted) {
            socket.read_buffer = Some(crate::buffer::SlidingBuffer::new());
        }
        self.sockets.insert(token, socket);
        self.conns.set_socket(id, Some(token));
        Ok(())
    }

    fn schedule_reconnect(&mut self, id: ConnId, delay: Duration) {
        self.timers.start(delay, TimerAction::Reconnect(id));
    }

    /// Runs until `shutdown` is observed true after a reactor cycle
    /// completes.
    ///
    /// With no timers armed the natural wait is unbounded, but an
    /// unbounded `poll` would also leave shutdown unobserved until the
    /// next socket event. `SHUTDOWN_POLL_INTERVAL` bounds the wait so the
    /// flag is rechecked promptly even when the socket table is quiet.
    pub fn run(&mut self, shutdown: &AtomicBool) -> io::Result<()> {
        const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

        while !shutdown.load(Ordering::Relaxed) {
            let timeout = Some(
                self.timers
                    .min_deadline()
                    .map(|deadline| {
                        let now = Instant::now();
                        if deadline > now {
                            deadline - now
                        } else {
                            Duration::ZERO
                        }
                    })
                    .unwrap_or(SHUTDOWN_POLL_INTERVAL)
                    .min(SHUTDOWN_POLL_INTERVAL),
            );

            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let fired = self.timers.tick(Instant::now());
            for action in fired {
                self.handle_timer_action(action);
            }

            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|ev| (ev.token(), ev.is_readable(), ev.is_writable()))
                .collect();
            for (token, readable, writable) in ready {
                self.dispatch(token, readable, writable);
            }
        }
        Ok(())
    }

    fn handle_timer_action(&mut self, action: TimerAction) {
        match action {
            TimerAction::Reconnect(id) => self.setup_connection(id),
            TimerAction::CancelConnect(token) => {
                // The socket may have connected successfully (and moved on
                // to RelayInput/PeerIo) or been closed entirely before this
                // timer got here; only a socket still waiting on connect
                // completion is actually a timeout.
                if matches!(self.sockets.get(token), Some(s) if s.tag == CallbackTag::AwaitConnect) {
                    tracing::warn!(token = token.0, "async connect timed out");
                    self.handle_connect_failure(token);
                }
            }
        }
    }

    fn dispatch(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(socket) = self.sockets.get(token) else { return };
        match socket.tag {
            CallbackTag::AcceptListener => {
                if readable {
                    self.accept_on(token);
                }
            }
            CallbackTag::AwaitConnect => {
                if writable {
                    self.on_await_connect(token);
                }
            }
            CallbackTag::RelayInput => {
                if readable {
                    self.on_relay_readable(token);
                }
            }
            CallbackTag::PeerIo => {
                if readable {
                    self.on_peer_readable(token);
                }
            }
        }
    }

    fn accept_on(&mut self, listener_token: Token) {
        loop {
            let Some(socket) = self.sockets.get_mut(listener_token) else { return };
            let Some(listener) = socket.kind.as_listener_mut() else { return };
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let owner = socket.owner;
                    let conn = self.conns.get(owner).clone();
                    let token = self.next_token();
                    if let Err(e) = self.register_connected(token, stream, owner, &conn, true) {
                        tracing::warn!(error = %e, "failed to register accepted socket");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn on_await_connect(&mut self, token: Token) {
        let owner = match self.sockets.get(token) {
            Some(s) => s.owner,
            None => return,
        };
        let connected = self
            .sockets
            .get(token)
            .and_then(|s| s.kind.as_stream())
            .map(|s| s.peer_addr().is_ok())
            .unwrap_or(false);

        if connected {
            let conn = self.conns.get(owner).clone();
            let role = classify_role(owner, &conn);
            let tag = match role {
                Role::Relay => CallbackTag::RelayInput,
                Role::Bidirectional | Role::Unidirectional => CallbackTag::PeerIo,
            };
            if let Some(socket) = self.sockets.get_mut(token) {
                if let Some(timer_id) = socket.connect_timer.take() {
                    self.timers.cancel(timer_id);
                }
                socket.role = role;
                socket.tag = tag;
                if needs_read_buffer(owner, &conn, false) {
                    socket.read_buffer = Some(crate::buffer::SlidingBuffer::new());
                }
                if let Some(stream) = socket.kind.as_stream_mut() {
                    let _ = self.poll.registry().reregister(stream, token, Interest::READABLE);
                }
            }
        } else {
            tracing::warn!(token = token.0, "async connect failed");
            self.handle_connect_failure(token);
        }
    }

    fn handle_connect_failure(&mut self, token: Token) {
        let owner = self.sockets.get(token).map(|s| s.owner);
        self.close_socket(token);
        if let Some(owner) = owner {
            let conn = self.conns.get(owner).clone();
            if conn.connector {
                self.schedule_reconnect(owner, conn.connect_delay);
            }
        }
    }

    fn close_socket(&mut self, token: Token) {
        if let Some(mut socket) = self.sockets.remove(token) {
            let _ = self.poll.registry().deregister(socket.kind.source());
            if let Some(timer_id) = socket.connect_timer.take() {
                self.timers.cancel(timer_id);
            }
            if self.conns.socket_of(socket.owner) == Some(token) {
                self.conns.set_socket(socket.owner, None);
            }
        }
    }

    /// Reads available bytes from the INPUT-role socket, fans them out raw
    /// to controllers, and drains any validated frames to listeners.
    ///
    /// The sliding buffer is temporarily `take()`n out of the socket so
    /// the table can be mutably borrowed again for fan-out writes to
    /// other sockets while this socket's own entry is untouched.
    fn on_relay_readable(&mut self, token: Token) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let Some(socket) = self.sockets.get_mut(token) else { return };
            let Some(stream) = socket.kind.as_stream_mut() else { return };
            match stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::warn!(token = token.0, "input socket EOF");
                    self.handle_read_error(token);
                    return;
                }
                Ok(n) => {
                    forward_from_input(&mut self.sockets, &chunk[..n]);

                    let Some(socket) = self.sockets.get_mut(token) else { return };
                    let mut buffer = match socket.read_buffer.take() {
                        Some(b) => b,
                        None => continue,
                    };
                    buffer.append(&chunk[..n]);
                    let sockets = &mut self.sockets;
                    drain_frames(&mut buffer, |frame: &[u8; FRAME_LEN]| {
                        forward_frame_to_listeners(sockets, frame);
                    });
                    if let Some(socket) = self.sockets.get_mut(token) {
                        socket.read_buffer = Some(buffer);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(token = token.0, error = %e, "input read error");
                    self.handle_read_error(token);
                    return;
                }
            }
        }
    }

    fn on_peer_readable(&mut self, token: Token) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let Some(socket) = self.sockets.get_mut(token) else { return };
            if socket.role != Role::Bidirectional {
                // Unidirectional peers never send meaningful bytes back;
                // drain and discard so readiness doesn't spin.
                let Some(stream) = socket.kind.as_stream_mut() else { return };
                match stream.read(&mut chunk) {
                    Ok(0) => {
                        self.handle_read_error(token);
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                    Err(_) => {
                        self.handle_read_error(token);
                        return;
                    }
                }
            }
            let Some(stream) = socket.kind.as_stream_mut() else { return };
            match stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::warn!(token = token.0, "controller peer EOF");
                    self.handle_read_error(token);
                    return;
                }
                Ok(n) => {
                    forward_to_input(&mut self.sockets, &self.conns, &chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(token = token.0, error = %e, "peer read error");
                    self.handle_read_error(token);
                    return;
                }
            }
        }
    }

    fn handle_read_error(&mut self, token: Token) {
        let owner = self.sockets.get(token).map(|s| s.owner);
        self.close_socket(token);
        if let Some(owner) = owner {
            let conn = self.conns.get(owner).clone();
            if conn.connector {
                self.schedule_reconnect(owner, conn.connect_delay);
            }
        }
    }
}
