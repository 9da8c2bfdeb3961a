//! Network-related code, i.e. actually sending queries and receiving answers.
//!
//! The engine only talks to the network through [`DatagramTransport`] and [`StreamConnector`], so
//! tests (or embedders) can swap the socket implementations below for their own.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use byteorder::{NetworkEndian, WriteBytesExt};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;

/// An absolute point in time after which a query has failed.
///
/// A query computes its deadline once and every transport call is bounded by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Returns the time left, or an [`io::ErrorKind::TimedOut`] error if there is none.
    ///
    /// The result is never zero, so it can be handed to the `set_*_timeout` methods of std
    /// sockets as is.
    pub fn remaining(&self) -> io::Result<Duration> {
        match self.0.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(left),
            _ => Err(io::Error::new(io::ErrorKind::TimedOut, "query deadline passed")),
        }
    }
}

/// Sends one datagram and waits for one datagram in return.
pub trait DatagramTransport: Send + Sync {
    /// Sends `data` to `remote` (from `local`, if given) and blocks until a reply of at most
    /// `max_size` bytes arrives or `deadline` passes.
    ///
    /// Every call sends `data` again.
    fn send_recv(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        data: &[u8],
        max_size: usize,
        deadline: Deadline,
    ) -> io::Result<Vec<u8>>;
}

/// An open stream connection to a DNS server, carrying length-prefixed messages.
pub trait StreamConnection: Send {
    /// Binds all further I/O on this connection to `deadline`.
    fn set_deadline(&mut self, deadline: Deadline);

    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Receives one message. `Ok(None)` means the peer closed the connection before sending
    /// anything.
    fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;

    fn close(self);
}

/// Opens [`StreamConnection`]s.
pub trait StreamConnector: Send + Sync {
    type Connection: StreamConnection;

    /// Opens a connection to `remote`, bound to `local` first if given. The connection inherits
    /// `deadline`.
    fn connect(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        deadline: Deadline,
    ) -> io::Result<Self::Connection>;
}

/// [`DatagramTransport`] over a fresh std [`UdpSocket`] per exchange.
#[derive(Clone, Copy, Debug, Default)]
pub struct UdpTransport;

impl DatagramTransport for UdpTransport {
    fn send_recv(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        data: &[u8],
        max_size: usize,
        deadline: Deadline,
    ) -> io::Result<Vec<u8>> {
        let socket = UdpSocket::bind(local.unwrap_or_else(|| unspecified_for(remote)))?;
        // a connected socket drops datagrams from other peers
        socket.connect(remote)?;

        socket.set_write_timeout(Some(deadline.remaining()?))?;
        socket.send(data)?;
        trace!(bytes = data.len(), %remote, "sent datagram");

        let mut res = vec![0; max_size];
        socket.set_read_timeout(Some(deadline.remaining()?))?;
        let bytes_recvd = socket.recv(&mut res)?;
        res.truncate(bytes_recvd);
        trace!(bytes = bytes_recvd, %remote, "received datagram");

        Ok(res)
    }
}

/// [`StreamConnector`] opening std [`TcpStream`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

impl StreamConnector for TcpConnector {
    type Connection = TcpConnection;

    fn connect(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        deadline: Deadline,
    ) -> io::Result<TcpConnection> {
        let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;
        if let Some(local) = local {
            socket.bind(&local.into())?;
        }
        socket.connect_timeout(&remote.into(), deadline.remaining()?)?;

        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;
        trace!(%remote, "opened stream connection");

        Ok(TcpConnection { stream, deadline })
    }
}

/// A TCP connection using the two-byte length framing of
/// [RFC 1035, Section 4.2.2](https://www.rfc-editor.org/rfc/rfc1035#section-4.2.2).
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    deadline: Deadline,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Reads until `buf` is full or the peer closes the connection. Returns the number of bytes
    /// read.
    ///
    /// We can't use `read_exact()` because we need to know how much arrived before an EOF, and
    /// the read timeout has to shrink with the deadline on every call.
    fn read_until_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut offset = 0;
        while offset < buf.len() {
            self.stream
                .set_read_timeout(Some(self.deadline.remaining()?))?;
            match self.stream.read(&mut buf[offset..]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        Ok(offset)
    }
}

impl StreamConnection for TcpConnection {
    fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let len = u16::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too long"))?;
        let mut msg = Vec::with_capacity(data.len() + 2);
        msg.write_u16::<NetworkEndian>(len)?;
        msg.extend_from_slice(data);

        self.stream
            .set_write_timeout(Some(self.deadline.remaining()?))?;
        self.stream.write_all(&msg)?;
        trace!(bytes = data.len(), "sent stream message");
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len = [0; 2];
        match self.read_until_full(&mut len)? {
            0 => return Ok(None),
            2 => (),
            _ => return Err(io::ErrorKind::UnexpectedEof.into()),
        }

        let expected = u16::from_be_bytes(len) as usize;
        let mut res = vec![0; expected];
        let bytes_recvd = self.read_until_full(&mut res)?;
        if bytes_recvd != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Received {} bytes, but TCP message says {} bytes were sent.",
                    bytes_recvd, expected
                ),
            ));
        }
        trace!(bytes = bytes_recvd, "received stream message");
        Ok(Some(res))
    }

    fn close(self) {
        // the peer may already be gone
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// The wildcard address of the same family as `remote`, with an ephemeral port.
fn unspecified_for(remote: SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}
