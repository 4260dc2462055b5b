//! POSIX-style descriptor facade over the socket operations.
//!
//! Descriptors start at [`FIRST_FD`] and are handed out round-robin up to
//! [`MAX_FDS`].  Every call returns a non-negative value on success and a
//! negative errno on failure, like a system call would.

use mote_lib::klog_debug;

use super::binding::BindingTable;
use super::config::{FIRST_FD, MAX_FDS};
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::socket::{SockType, SocketId};
use super::tcp::TcpEngine;
use super::types::{Ipv4Addr, NetError, Port, SockAddr};

pub const AF_INET: u16 = 2;
pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;

/// IPv4 socket address as passed across the facade.
///
/// `port` is a host-order number; `addr` holds the octets in wire order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockAddrIn {
    pub family: u16,
    pub port: Port,
    pub addr: Ipv4Addr,
}

impl SockAddrIn {
    pub const fn new(addr: Ipv4Addr, port: Port) -> Self {
        Self {
            family: AF_INET,
            port,
            addr,
        }
    }

    fn to_sock_addr(self) -> Result<SockAddr, NetError> {
        if self.family != AF_INET {
            return Err(NetError::InvalidArgument);
        }
        Ok(SockAddr::new(self.addr, self.port))
    }
}

impl Default for SockAddrIn {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, Port::ANY)
    }
}

impl From<SockAddr> for SockAddrIn {
    fn from(addr: SockAddr) -> Self {
        Self::new(addr.ip, addr.port)
    }
}

#[inline]
fn errno(result: Result<i32, NetError>) -> i32 {
    result.unwrap_or_else(NetError::to_errno)
}

#[inline]
fn errno_size(result: Result<usize, NetError>) -> isize {
    match result {
        Ok(n) => n as isize,
        Err(e) => e.to_errno() as isize,
    }
}

/// Descriptor table.  One per stack instance.
pub struct BsdSockets {
    fds: [Option<SocketId>; MAX_FDS + 1],
    cur_fd: usize,
}

impl BsdSockets {
    pub const fn new() -> Self {
        Self {
            fds: [None; MAX_FDS + 1],
            cur_fd: FIRST_FD,
        }
    }

    /// Socket behind `fd`.
    pub fn lookup(&self, fd: i32) -> Option<SocketId> {
        let fd = usize::try_from(fd).ok()?;
        if fd < FIRST_FD {
            return None;
        }
        *self.fds.get(fd)?
    }

    fn sock(&self, fd: i32) -> Result<SocketId, NetError> {
        self.lookup(fd).ok_or(NetError::BadSocket)
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.fds.iter().flatten().count()
    }

    /// Reserve a descriptor for `sock`, scanning from the cursor.
    fn install(&mut self, sock: SocketId) -> Result<i32, NetError> {
        for _ in FIRST_FD..=MAX_FDS {
            let fd = self.cur_fd;
            self.cur_fd = if fd >= MAX_FDS { FIRST_FD } else { fd + 1 };
            if self.fds[fd].is_none() {
                self.fds[fd] = Some(sock);
                return Ok(fd as i32);
            }
        }
        Err(NetError::TableFull)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub fn socket<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, family: u16, ty: i32, _protocol: i32) -> i32
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno(self.try_socket(stack, family, ty))
    }

    pub fn bind<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, addr: &SockAddrIn) -> i32
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno(self.try_bind(stack, fd, addr))
    }

    pub fn listen<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, backlog: i32) -> i32
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno(self.try_listen(stack, fd, backlog))
    }

    /// Accept a pending connection into a new descriptor; the peer goes to
    /// `peer`.
    pub fn accept<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, peer: &mut SockAddrIn) -> i32
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno(self.try_accept(stack, fd, peer))
    }

    pub fn connect<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, addr: &SockAddrIn) -> i32
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno(self.try_connect(stack, fd, addr))
    }

    /// Send `buf` to `dst`.  Returns the number of bytes sent.
    pub fn sendto<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, buf: &[u8], dst: &SockAddrIn) -> isize
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno_size(self.try_sendto(stack, fd, buf, dst))
    }

    /// Read one packet into `buf`, truncating it if `buf` is short.  Returns
    /// the number of bytes copied; the sender goes to `src`.
    pub fn recvfrom<'p, D, B, T>(
        &mut self,
        stack: &mut NetStack<'p, D, B, T>,
        fd: i32,
        buf: &mut [u8],
        src: &mut SockAddrIn,
    ) -> isize
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno_size(self.try_recvfrom(stack, fd, buf, src))
    }

    pub fn close<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32) -> i32
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        errno(self.try_close(stack, fd))
    }

    // =========================================================================
    // Result-returning bodies
    // =========================================================================

    fn try_socket<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, family: u16, ty: i32) -> Result<i32, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        if family != AF_INET {
            return Err(NetError::InvalidArgument);
        }
        let ty = match ty {
            SOCK_STREAM => SockType::Stream,
            SOCK_DGRAM => SockType::Datagram,
            _ => return Err(NetError::InvalidArgument),
        };
        let sock = stack.sock_open(ty)?;
        self.install(sock).inspect_err(|_| {
            let _ = stack.sock_close(sock);
        })
    }

    fn try_bind<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, addr: &SockAddrIn) -> Result<i32, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        let addr = addr.to_sock_addr()?;
        stack.sock_bind(self.sock(fd)?, addr.port)?;
        Ok(0)
    }

    fn try_listen<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, backlog: i32) -> Result<i32, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        let backlog = usize::try_from(backlog).map_err(|_| NetError::InvalidArgument)?;
        stack.sock_listen(self.sock(fd)?, backlog)?;
        Ok(0)
    }

    fn try_accept<'p, D, B, T>(
        &mut self,
        stack: &mut NetStack<'p, D, B, T>,
        fd: i32,
        peer: &mut SockAddrIn,
    ) -> Result<i32, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        let (child, remote) = stack.sock_accept(self.sock(fd)?)?;
        let new_fd = self.install(child).inspect_err(|_| {
            let _ = stack.sock_close(child);
        })?;
        *peer = remote.into();
        Ok(new_fd)
    }

    fn try_connect<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32, addr: &SockAddrIn) -> Result<i32, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        let remote = addr.to_sock_addr()?;
        stack.sock_connect(self.sock(fd)?, remote)?;
        Ok(0)
    }

    fn try_sendto<'p, D, B, T>(
        &mut self,
        stack: &mut NetStack<'p, D, B, T>,
        fd: i32,
        buf: &[u8],
        dst: &SockAddrIn,
    ) -> Result<usize, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        let dst = dst.to_sock_addr()?;
        stack.sock_put(self.sock(fd)?, buf, dst)
    }

    fn try_recvfrom<'p, D, B, T>(
        &mut self,
        stack: &mut NetStack<'p, D, B, T>,
        fd: i32,
        buf: &mut [u8],
        src: &mut SockAddrIn,
    ) -> Result<usize, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        let (pkt, from) = stack.sock_get(self.sock(fd)?)?;
        let len = buf.len().min(pkt.len());
        buf[..len].copy_from_slice(&pkt.payload()[..len]);
        *src = from.into();
        Ok(len)
    }

    fn try_close<'p, D, B, T>(&mut self, stack: &mut NetStack<'p, D, B, T>, fd: i32) -> Result<i32, NetError>
    where
        D: NetDevice<'p>,
        B: BindingTable,
        T: TcpEngine<'p>,
    {
        let sock = self.sock(fd)?;
        let idx = fd as usize;
        self.fds[idx] = None;
        stack.sock_close(sock)?;
        // Hand the most recent descriptor out again.
        if idx + 1 == self.cur_fd {
            self.cur_fd = idx;
        }
        klog_debug!("bsd: fd {} closed", fd);
        Ok(0)
    }
}

impl Default for BsdSockets {
    fn default() -> Self {
        Self::new()
    }
}
