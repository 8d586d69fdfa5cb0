use crate::target::AddressFamily;
use socket2::{Domain, Protocol, SockAddr, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Raw transport primitives consumed by a session: open a non-blocking raw
/// socket of one family, send, and poll for inbound packets. Closing is
/// dropping the handle.
pub trait Transport: Send {
    fn open(family: AddressFamily) -> Result<Box<Self>, io::Error>
    where
        Self: Sized;

    fn send_to(&self, buf: &[u8], addr: IpAddr) -> io::Result<usize>;

    /// Non-blocking receive: `Ok(None)` when no packet is queued.
    fn try_recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Raw ICMP socket backed by `socket2`.
pub struct RawTransport {
    socket: socket2::Socket,
}

impl Transport for RawTransport {
    fn open(family: AddressFamily) -> Result<Box<Self>, io::Error> {
        let (domain, protocol) = match family {
            AddressFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
            AddressFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        let socket = socket2::Socket::new(domain, Type::RAW, Some(protocol))?;
        socket.set_nonblocking(true)?;
        Ok(Box::new(RawTransport { socket }))
    }

    fn send_to(&self, buf: &[u8], addr: IpAddr) -> io::Result<usize> {
        self.socket.send_to(buf, &SockAddr::from(SocketAddr::new(addr, 0)))
    }

    fn try_recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        // Socket2 gives a safety guaranty which allows us to do an unsafe
        // cast from `&mut [u8]` to `&mut [std::mem::MaybeUninit<u8>]`.
        // https://docs.rs/socket2/0.4.7/socket2/struct.Socket.html#method.recv
        let result = socket2::Socket::recv_from(&self.socket, unsafe {
            &mut *(std::ptr::addr_of_mut!(*buf) as *mut [u8]
                as *mut [std::mem::MaybeUninit<u8>])
        });
        match result {
            Ok((n, _)) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
