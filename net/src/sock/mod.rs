use std::{
    fmt, io,
    net::{IpAddr, SocketAddr},
    task::{ready, Context, Poll},
};

use tokio::net::{TcpSocket, TcpStream};

use crate::{
    error::{ConnectionError, Stage},
    port::PortScheme,
    rendezvous::PeerEntry,
    topology::TopologyMask,
};

/// Direction a connection drives user data in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Send,
    Recv,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Send, Role::Recv];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Send => "send",
            Role::Recv => "recv",
        })
    }
}

/// What the engine does with a connection once it is established.
///
/// Resolved once from the role and the mask; the engine never looks at the
/// role again on the I/O path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Read into the scratch buffer and count received bytes.
    Drain,
    /// Write the payload and count sent bytes.
    Flood,
    /// Held open, never polled.
    Idle,
}

impl Activity {
    pub fn for_role(role: Role, own_id: u32, peer_id: u32, mask: &TopologyMask) -> Self {
        match role {
            Role::Send if mask.receives(own_id) && mask.sends(peer_id) => Activity::Drain,
            Role::Recv if mask.sends(own_id) && mask.receives(peer_id) => Activity::Flood,
            _ => Activity::Idle,
        }
    }
}

/// A bound socket with its active open not yet issued.
#[derive(Debug)]
pub struct Dial {
    peer: u32,
    role: Role,
    activity: Activity,
    remote: SocketAddr,
    socket: TcpSocket,
}

impl Dial {
    /// Binds the locally derived port for `role`. Address reuse is enabled so
    /// the same local port serves every peer in that role.
    pub fn bind(
        peer: &PeerEntry,
        role: Role,
        own_id: u32,
        ports: &PortScheme,
        mask: &TopologyMask,
    ) -> Result<Self, ConnectionError> {
        let fail = |source: io::Error| ConnectionError {
            peer: peer.id,
            role,
            stage: Stage::Bind,
            source,
        };
        let (local, remote) = ports
            .bind_addr(role, own_id, peer.ip)
            .zip(ports.remote_addr(role, peer.id, peer.ip))
            .ok_or_else(|| {
                fail(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "worker id outside the port range",
                ))
            })?;

        let socket = match peer.ip {
            IpAddr::V4(_) => TcpSocket::new_v4(),
            IpAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(fail)?;
        socket.set_reuseaddr(true).map_err(fail)?;
        socket.bind(local).map_err(fail)?;

        Ok(Self {
            peer: peer.id,
            role,
            activity: Activity::for_role(role, own_id, peer.id, mask),
            remote,
            socket,
        })
    }

    pub fn peer(&self) -> u32 {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Issues the non-blocking active open. Resolves once the reactor reports
    /// the socket writable with no pending error.
    pub async fn connect(self) -> Result<PeerConnection, ConnectionError> {
        let Self {
            peer,
            role,
            activity,
            remote,
            socket,
        } = self;
        let fail = |stage, source| ConnectionError {
            peer,
            role,
            stage,
            source,
        };

        let stream = socket
            .connect(remote)
            .await
            .map_err(|err| fail(Stage::Connect, err))?;
        stream
            .set_nodelay(true)
            .map_err(|err| fail(Stage::Connect, err))?;

        Ok(PeerConnection {
            peer,
            role,
            activity,
            stream,
            transferred: 0,
        })
    }
}

/// Outcome of one readiness-driven I/O action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Sent(usize),
    Received(usize),
}

/// Why a connection stopped making progress.
#[derive(Debug)]
pub enum Fault {
    /// The readiness registration itself failed. Not tied to one peer.
    Reactor(io::Error),
    /// This connection is dead; the rest keep running.
    Peer(ConnectionError),
}

/// One established, directed channel to a peer.
#[derive(Debug)]
pub struct PeerConnection {
    peer: u32,
    role: Role,
    activity: Activity,
    stream: TcpStream,
    transferred: u64,
}

impl PeerConnection {
    pub fn peer(&self) -> u32 {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    /// Bytes moved on this connection in its active direction.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Performs at most one read or write, depending on [`Activity`], once the
    /// socket is ready for it. Idle connections stay pending forever.
    pub fn poll_transfer(
        &mut self,
        cx: &mut Context<'_>,
        scratch: &mut [u8],
        payload: &[u8],
    ) -> Poll<Result<Transfer, Fault>> {
        match self.activity {
            Activity::Drain => self.poll_drain(cx, scratch),
            Activity::Flood => self.poll_flood(cx, payload),
            Activity::Idle => Poll::Pending,
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>, scratch: &mut [u8]) -> Poll<Result<Transfer, Fault>> {
        loop {
            ready!(self.stream.poll_read_ready(cx)).map_err(Fault::Reactor)?;
            match self.stream.try_read(scratch) {
                Ok(0) => {
                    return Poll::Ready(Err(self.fault(
                        Stage::Read,
                        io::Error::from(io::ErrorKind::UnexpectedEof),
                    )))
                }
                Ok(n) => {
                    self.transferred += n as u64;
                    return Poll::Ready(Ok(Transfer::Received(n)));
                }
                // readiness was stale; re-arm on the next poll
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Poll::Ready(Err(self.fault(Stage::Read, err))),
            }
        }
    }

    fn poll_flood(&mut self, cx: &mut Context<'_>, payload: &[u8]) -> Poll<Result<Transfer, Fault>> {
        loop {
            ready!(self.stream.poll_write_ready(cx)).map_err(Fault::Reactor)?;
            match self.stream.try_write(payload) {
                Ok(0) => {
                    return Poll::Ready(Err(
                        self.fault(Stage::Write, io::Error::from(io::ErrorKind::WriteZero))
                    ))
                }
                Ok(n) => {
                    self.transferred += n as u64;
                    return Poll::Ready(Ok(Transfer::Sent(n)));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Poll::Ready(Err(self.fault(Stage::Write, err))),
            }
        }
    }

    fn fault(&self, stage: Stage, source: io::Error) -> Fault {
        Fault::Peer(ConnectionError {
            peer: self.peer,
            role: self.role,
            stage,
            source,
        })
    }
}
