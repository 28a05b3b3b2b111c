use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

/// The datagram transport behind one configured nameserver.  The resolver
/// core never owns sockets directly; it writes queries and drains pending
/// responses through this handle.
///
/// Both calls must be non-blocking.  `recv` returns `Ok(0)` when no datagram
/// is pending; a `send` shorter than the query counts as a send error.
pub trait NameserverIo: Send {
    /// Sends one query datagram, returning the number of bytes written.
    ///
    /// # Errors
    /// Returns an error when the transport cannot take the datagram.
    fn send(&mut self, datagram: &[u8]) -> Result<usize, std::io::Error>;

    /// Receives one response datagram into `buf`, returning its length, or
    /// zero when nothing is pending.
    ///
    /// # Errors
    /// Returns an error when the transport failed.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error>;
}

/// Counters kept for each nameserver, updated under the section lock.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NameserverCounters {
    /// Queries written to the transport.
    pub sent: u64,
    /// Encoding or transport failures, including short writes.
    pub snd_error: u64,
    /// Responses that completed a resolution.
    pub valid: u64,
    /// Responses that made a requester adopt a new address.
    pub update: u64,
    /// NXDOMAIN responses.
    pub nx: u64,
    /// REFUSED responses.
    pub refused: u64,
    /// Responses with an empty answer section.
    pub any_err: u64,
    /// Broken CNAME chains.
    pub cname_error: u64,
    /// Truncated responses that could not be used.
    pub truncated: u64,
    /// Structurally invalid frames and responses.
    pub invalid: u64,
    /// Frames larger than the accepted payload size.
    pub too_big: u64,
    /// Responses whose query id matched no in-flight resolution.
    pub outdated: u64,
    /// Remaining error classifications.
    pub other: u64,
}

/// One configured nameserver: an identifier for logs, the transport handle
/// and its counters.
pub struct Nameserver {
    pub id: String,
    pub io: Box<dyn NameserverIo>,
    pub counters: NameserverCounters,
}
impl Nameserver {
    #[must_use]
    pub fn new(id: impl Into<String>, io: Box<dyn NameserverIo>) -> Self {
        Self {
            id: id.into(),
            io,
            counters: NameserverCounters::default(),
        }
    }
}
impl core::fmt::Debug for Nameserver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "Nameserver({})", self.id)
    }
}

/// A UDP transport connected to one nameserver address.
pub struct UdpNameserver {
    socket: UdpSocket,
}
impl UdpNameserver {
    /// Binds an ephemeral local socket, connects it to `addr` and switches it
    /// to non-blocking mode.
    ///
    /// # Errors
    /// Returns an error when socket setup fails.
    pub fn connect(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap_or_else(|_| unreachable!())
        } else {
            "[::]:0".parse().unwrap_or_else(|_| unreachable!())
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}
impl NameserverIo for UdpNameserver {
    fn send(&mut self, datagram: &[u8]) -> Result<usize, std::io::Error> {
        self.socket.send(datagram)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        match self.socket.recv(buf) {
            Ok(len) => Ok(len),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(core::time::Duration::from_millis(500)))
            .unwrap();
        let mut ns = UdpNameserver::connect(server.local_addr().unwrap()).unwrap();
        assert_eq!(0, ns.recv(&mut [0; 16]).unwrap());
        assert_eq!(5, ns.send(b"query").unwrap());
        let mut buf = [0; 16];
        let (len, peer) = server.recv_from(&mut buf).unwrap();
        assert_eq!(b"query", &buf[..len]);
        server.send_to(b"reply", peer).unwrap();
        // recv is non-blocking, so give the datagram a moment to land.
        let mut got = 0;
        for _ in 0..100 {
            got = ns.recv(&mut buf).unwrap();
            if got > 0 {
                break;
            }
            std::thread::sleep(core::time::Duration::from_millis(5));
        }
        assert_eq!(b"reply", &buf[..got]);
    }
}
