//! Socket layer: endpoints, bindings, connection records and the per-socket
//! receive queues.
//!
//! [`SocketTable`] owns every socket, every [`TcpConn`] and the binding
//! storage.  Sockets and connections live in fixed arenas and are named by
//! index ([`SocketId`], [`ConnId`]); listen backlogs and receive queues are
//! bounded ring buffers of those indices or of packets.
//!
//! The application-facing operations are the `sock_*` methods on
//! [`NetStack`], which add the transmit side (UDP output, TCP encapsulation)
//! to the table operations.  [`bsd`](super::bsd) wraps them in descriptors.

use core::fmt;

use bitflags::bitflags;
use heapless::{Deque, Vec};
use mote_lib::klog_debug;

use super::binding::BindingTable;
use super::config::{BACKLOG_MAX, MAX_CONNS, MAX_SOCKETS, SOCK_RX_QUEUE_LEN, StackConfig};
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::packetbuf::{PacketBuf, tx_headroom};
use super::tcp::{self, ConnStatus, TcpConn, TcpEngine, TcpFlags, TcpSegment};
use super::types::{Ipv4Addr, NetError, Port, SockAddr};
use super::{UDP_HEADER_LEN, udp};

// =============================================================================
// Types
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SockType {
    Stream,
    Datagram,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketId(pub u8);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sock{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(pub u8);

bitflags! {
    /// Readiness bits accumulated on a socket until taken.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct SockEvents: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const HANGUP = 1 << 2;
    }
}

/// Result of handing an inbound packet to the socket layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    NoListener,
    QueueFull,
}

/// Backlog of a listening stream socket.
#[derive(Debug)]
pub struct ListenState {
    backlog_max: usize,
    pending: Deque<ConnId, BACKLOG_MAX>,
}

impl ListenState {
    #[inline]
    pub fn backlog_max(&self) -> usize {
        self.backlog_max
    }

    #[inline]
    pub fn backlog(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug)]
pub struct SockInfo<'p> {
    ty: SockType,
    port: Port,
    /// `true` if this socket owns the `(ty, port)` binding.  Accepted sockets
    /// share their listener's port without owning it.
    bound: bool,
    rx: Deque<PacketBuf<'p>, SOCK_RX_QUEUE_LEN>,
    conn: Option<ConnId>,
    listen: Option<ListenState>,
    events: SockEvents,
}

impl<'p> SockInfo<'p> {
    fn new(ty: SockType) -> Self {
        Self {
            ty,
            port: Port::ANY,
            bound: false,
            rx: Deque::new(),
            conn: None,
            listen: None,
            events: SockEvents::empty(),
        }
    }

    #[inline]
    pub fn ty(&self) -> SockType {
        self.ty
    }

    #[inline]
    pub fn port(&self) -> Port {
        self.port
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    #[inline]
    pub fn conn(&self) -> Option<ConnId> {
        self.conn
    }

    #[inline]
    pub fn listen_state(&self) -> Option<&ListenState> {
        self.listen.as_ref()
    }

    /// Datagrams waiting to be read.
    #[inline]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn events(&self) -> SockEvents {
        self.events
    }
}

/// Connections released by a close: the socket's own and its backlog.
pub type Released<'p> = Vec<TcpConn<'p>, { BACKLOG_MAX + 1 }>;

// =============================================================================
// SocketTable
// =============================================================================

pub struct SocketTable<'p, B> {
    sockets: [Option<SockInfo<'p>>; MAX_SOCKETS],
    conns: [Option<TcpConn<'p>>; MAX_CONNS],
    bindings: B,
    ephemeral_next: u16,
    ephemeral_start: u16,
    ephemeral_end: u16,
}

impl<'p, B: BindingTable> SocketTable<'p, B> {
    pub fn new(bindings: B, config: &StackConfig) -> Self {
        Self {
            sockets: core::array::from_fn(|_| None),
            conns: core::array::from_fn(|_| None),
            bindings,
            ephemeral_next: config.ephemeral_start,
            ephemeral_start: config.ephemeral_start,
            ephemeral_end: config.ephemeral_end,
        }
    }

    #[inline]
    pub fn get(&self, id: SocketId) -> Option<&SockInfo<'p>> {
        self.sockets.get(id.0 as usize)?.as_ref()
    }

    fn get_mut(&mut self, id: SocketId) -> Result<&mut SockInfo<'p>, NetError> {
        self.sockets
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(NetError::BadSocket)
    }

    #[inline]
    pub fn bindings(&self) -> &B {
        &self.bindings
    }

    /// Open sockets.
    pub fn len(&self) -> usize {
        self.sockets.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live connection records, owned or pending.
    pub fn conn_count(&self) -> usize {
        self.conns.iter().flatten().count()
    }

    pub fn open(&mut self, ty: SockType) -> Result<SocketId, NetError> {
        let idx = self
            .sockets
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::TableFull)?;
        self.sockets[idx] = Some(SockInfo::new(ty));
        Ok(SocketId(idx as u8))
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Bind `id` to `port`; [`Port::ANY`] picks an ephemeral port.
    ///
    /// Returns the bound port.  A bound datagram socket is immediately
    /// writable and gets [`SockEvents::WRITE`].
    pub fn bind(&mut self, id: SocketId, port: Port) -> Result<Port, NetError> {
        let (ty, bound) = {
            let sock = self.get_mut(id)?;
            (sock.ty, sock.bound)
        };
        if bound {
            return Err(NetError::InvalidArgument);
        }

        let port = if port.is_any() {
            self.ephemeral_port(ty).ok_or(NetError::NoPortsAvailable)?
        } else {
            port
        };
        self.bindings.insert(ty, port, id)?;

        let sock = self.get_mut(id)?;
        sock.port = port;
        sock.bound = true;
        if ty == SockType::Datagram {
            sock.events |= SockEvents::WRITE;
        }
        klog_debug!("socket: {} bound to {:?} {}", id, ty, port);
        Ok(port)
    }

    /// Next free port of the ephemeral range, continuing from the last one
    /// handed out.  `None` after one full cycle without a free port.
    fn ephemeral_port(&mut self, ty: SockType) -> Option<Port> {
        let span = self.ephemeral_end - self.ephemeral_start;
        for _ in 0..span {
            let port = Port(self.ephemeral_next);
            self.ephemeral_next += 1;
            if self.ephemeral_next >= self.ephemeral_end {
                self.ephemeral_next = self.ephemeral_start;
            }
            if self.bindings.lookup(ty, port).is_none() {
                return Some(port);
            }
        }
        None
    }

    // =========================================================================
    // Listen / accept
    // =========================================================================

    /// Make a stream socket accept connections.  `backlog` is clamped to
    /// `1..=BACKLOG_MAX`; calling it again only changes the limit.
    pub fn listen(&mut self, id: SocketId, backlog: usize) -> Result<(), NetError> {
        let sock = self.get_mut(id)?;
        if sock.ty != SockType::Stream {
            return Err(NetError::OperationNotSupported);
        }
        let backlog_max = backlog.clamp(1, BACKLOG_MAX);
        match sock.listen.as_mut() {
            Some(listen) => listen.backlog_max = backlog_max,
            None => {
                sock.listen = Some(ListenState {
                    backlog_max,
                    pending: Deque::new(),
                })
            }
        }
        Ok(())
    }

    /// Take the oldest pending connection of `id` into a new socket.
    ///
    /// Returns the new socket and the peer address.  The new socket shares the
    /// listener's port but does not own the binding.
    pub fn accept(&mut self, id: SocketId) -> Result<(SocketId, SockAddr), NetError> {
        let port = {
            let sock = self.get_mut(id)?;
            let listen = sock.listen.as_ref().ok_or(NetError::NotListening)?;
            if listen.pending.is_empty() {
                return Err(NetError::WouldBlock);
            }
            sock.port
        };
        let child = self.open(SockType::Stream)?;

        let cid = match self.get_mut(id)?.listen.as_mut().and_then(|l| l.pending.pop_front()) {
            Some(cid) => cid,
            None => {
                self.sockets[child.0 as usize] = None;
                return Err(NetError::WouldBlock);
            }
        };

        let (remote, status) = match self.conn_mut(cid) {
            Some(conn) => {
                conn.owner = Some(child);
                (conn.remote, conn.status)
            }
            None => {
                self.sockets[child.0 as usize] = None;
                return Err(NetError::NotConnected);
            }
        };

        let sock = self.get_mut(child)?;
        sock.port = port;
        sock.conn = Some(cid);
        if status == ConnStatus::Connected {
            sock.events |= SockEvents::WRITE;
        }
        klog_debug!("socket: {} accepted {} on port {} as {}", id, remote, port, child);
        Ok((child, remote))
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    /// Queue a datagram (cursor on the payload, L3/L4 marked) on the socket
    /// bound to `port`.  Packets that are not queued are dropped here.
    pub fn deliver_datagram(&mut self, port: Port, pkt: PacketBuf<'p>) -> Delivery {
        let Some(id) = self.bindings.lookup(SockType::Datagram, port) else {
            return Delivery::NoListener;
        };
        let Ok(sock) = self.get_mut(id) else {
            return Delivery::NoListener;
        };
        match sock.rx.push_back(pkt) {
            Ok(()) => {
                sock.events |= SockEvents::READ;
                Delivery::Queued
            }
            Err(_) => Delivery::QueueFull,
        }
    }

    /// Dequeue the oldest packet of `id` with the cursor on the payload.
    ///
    /// Datagram sockets report the sender; stream sockets report the peer.  A
    /// stream socket whose connection is closed and drained releases the
    /// connection and fails with [`NetError::NotConnected`].
    pub fn get_packet(&mut self, id: SocketId) -> Result<(PacketBuf<'p>, SockAddr), NetError> {
        let sock = self.get_mut(id)?;
        match sock.ty {
            SockType::Datagram => {
                let pkt = sock.rx.pop_front().ok_or(NetError::WouldBlock)?;
                let src_ip = pkt
                    .l3_header()
                    .get(12..16)
                    .and_then(Ipv4Addr::from_slice)
                    .unwrap_or_default();
                let src_port = pkt
                    .l4_header()
                    .get(0..2)
                    .map_or(Port::ANY, |b| Port::from_network_bytes([b[0], b[1]]));
                Ok((pkt, SockAddr::new(src_ip, src_port)))
            }
            SockType::Stream => {
                let cid = sock.conn.ok_or(NetError::WouldBlock)?;
                let conn = self.conn_mut(cid).ok_or(NetError::NotConnected)?;
                if let Some(pkt) = conn.rx.pop_front() {
                    return Ok((pkt, conn.remote));
                }
                if conn.status == ConnStatus::Closed {
                    self.take_conn(cid);
                    klog_debug!("socket: {} connection closed and drained", id);
                    return Err(NetError::NotConnected);
                }
                Err(NetError::WouldBlock)
            }
        }
    }

    /// Return and clear the readiness bits of `id`.
    pub fn take_events(&mut self, id: SocketId) -> Result<SockEvents, NetError> {
        let sock = self.get_mut(id)?;
        Ok(core::mem::take(&mut sock.events))
    }

    // =========================================================================
    // Connection records
    // =========================================================================

    /// Allocate a connection record.  It belongs to no socket until it is
    /// attached or accepted from a backlog.
    pub fn alloc_conn(
        &mut self,
        local_port: Port,
        remote: SockAddr,
        status: ConnStatus,
    ) -> Result<ConnId, NetError> {
        let idx = self
            .conns
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::TableFull)?;
        self.conns[idx] = Some(TcpConn::new(local_port, remote, status));
        Ok(ConnId(idx as u8))
    }

    #[inline]
    pub fn conn(&self, id: ConnId) -> Option<&TcpConn<'p>> {
        self.conns.get(id.0 as usize)?.as_ref()
    }

    #[inline]
    pub fn conn_mut(&mut self, id: ConnId) -> Option<&mut TcpConn<'p>> {
        self.conns.get_mut(id.0 as usize)?.as_mut()
    }

    /// Connection for the 4-tuple `(local_port, remote)`.
    pub fn conn_lookup(&self, local_port: Port, remote: SockAddr) -> Option<ConnId> {
        self.conns
            .iter()
            .position(|c| {
                c.as_ref()
                    .is_some_and(|c| c.local_port == local_port && c.remote == remote)
            })
            .map(|idx| ConnId(idx as u8))
    }

    /// Listening stream socket bound to `port`.
    pub fn listener_for(&self, port: Port) -> Option<SocketId> {
        let id = self.bindings.lookup(SockType::Stream, port)?;
        self.get(id)?.listen.as_ref().map(|_| id)
    }

    /// Make `conn` the connection of stream socket `sock`.
    pub fn attach_conn(&mut self, sock: SocketId, conn: ConnId) -> Result<(), NetError> {
        let info = self.get(sock).ok_or(NetError::BadSocket)?;
        if info.ty != SockType::Stream || info.conn.is_some() {
            return Err(NetError::InvalidArgument);
        }
        let c = self.conn_mut(conn).ok_or(NetError::NotConnected)?;
        c.owner = Some(sock);
        self.get_mut(sock)?.conn = Some(conn);
        Ok(())
    }

    /// Queue an established connection on `listener`'s backlog.
    pub fn add_backlog(&mut self, listener: SocketId, conn: ConnId) -> Result<(), NetError> {
        let sock = self.get_mut(listener)?;
        let listen = sock.listen.as_mut().ok_or(NetError::NotListening)?;
        if listen.pending.len() >= listen.backlog_max {
            return Err(NetError::BacklogFull);
        }
        listen
            .pending
            .push_back(conn)
            .map_err(|_| NetError::BacklogFull)?;
        sock.events |= SockEvents::READ;
        Ok(())
    }

    /// Queue a segment payload on `conn` and flag its socket readable.
    pub fn deliver_to_conn(&mut self, conn: ConnId, pkt: PacketBuf<'p>) -> Delivery {
        let Some(c) = self.conn_mut(conn) else {
            return Delivery::NoListener;
        };
        if c.rx.push_back(pkt).is_err() {
            return Delivery::QueueFull;
        }
        let owner = c.owner;
        if let Some(owner) = owner {
            self.raise(owner, SockEvents::READ);
        }
        Delivery::Queued
    }

    /// Update the status of `conn`, flagging its socket writable on
    /// establishment and hung up on close.
    pub fn set_conn_status(&mut self, conn: ConnId, status: ConnStatus) {
        let Some(c) = self.conn_mut(conn) else {
            return;
        };
        c.status = status;
        let owner = c.owner;
        let events = match status {
            ConnStatus::Connected => SockEvents::WRITE,
            ConnStatus::Closed => SockEvents::HANGUP,
            _ => SockEvents::empty(),
        };
        if let Some(owner) = owner {
            self.raise(owner, events);
        }
    }

    /// Remove a connection record, detaching it from its socket.
    pub fn take_conn(&mut self, conn: ConnId) -> Option<TcpConn<'p>> {
        let c = self.conns.get_mut(conn.0 as usize)?.take()?;
        if let Some(owner) = c.owner {
            if let Ok(sock) = self.get_mut(owner) {
                if sock.conn == Some(conn) {
                    sock.conn = None;
                }
            }
        }
        Some(c)
    }

    fn raise(&mut self, id: SocketId, events: SockEvents) {
        if let Ok(sock) = self.get_mut(id) {
            sock.events |= events;
        }
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Remove `id`, its binding (if it owns one), its queued packets, its
    /// connection and every connection waiting in its backlog.
    ///
    /// The released connections are returned for the engine to terminate.
    pub fn close(&mut self, id: SocketId) -> Result<Released<'p>, NetError> {
        let sock = self
            .sockets
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(NetError::BadSocket)?;

        if sock.bound {
            self.bindings.remove(sock.ty, sock.port, id);
        }

        let mut released = Released::new();
        let pending = sock.listen.iter().flat_map(|l| l.pending.iter().copied());
        for cid in sock.conn.into_iter().chain(pending) {
            if let Some(conn) = self.conns.get_mut(cid.0 as usize).and_then(Option::take) {
                // Capacity covers one connection plus a full backlog.
                let _ = released.push(conn);
            }
        }
        klog_debug!(
            "socket: {} closed ({:?} {}, {} connections released)",
            id,
            sock.ty,
            sock.port,
            released.len()
        );
        Ok(released)
    }
}

// =============================================================================
// Application operations
// =============================================================================

impl<'p, D, B, T> NetStack<'p, D, B, T>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    pub fn sock_open(&mut self, ty: SockType) -> Result<SocketId, NetError> {
        self.sockets.open(ty)
    }

    pub fn sock_bind(&mut self, id: SocketId, port: Port) -> Result<Port, NetError> {
        self.sockets.bind(id, port)
    }

    pub fn sock_listen(&mut self, id: SocketId, backlog: usize) -> Result<(), NetError> {
        self.sockets.listen(id, backlog)
    }

    pub fn sock_accept(&mut self, id: SocketId) -> Result<(SocketId, SockAddr), NetError> {
        self.sockets.accept(id)
    }

    /// Open a connection from stream socket `id` to `remote`.
    ///
    /// Binds an ephemeral port first if the socket is unbound, then asks the
    /// engine for a SYN.  The socket becomes writable once the engine reports
    /// the connection established.
    pub fn sock_connect(&mut self, id: SocketId, remote: SockAddr) -> Result<(), NetError> {
        let sock = self.sockets.get(id).ok_or(NetError::BadSocket)?;
        if sock.ty() != SockType::Stream {
            return Err(NetError::OperationNotSupported);
        }
        if sock.conn().is_some() {
            return Err(NetError::InvalidArgument);
        }
        if remote.ip.is_unspecified() || remote.port.is_any() {
            return Err(NetError::NoDestination);
        }
        let port = if sock.is_bound() {
            sock.port()
        } else {
            self.sockets.bind(id, Port::ANY)?
        };

        let cid = self.sockets.alloc_conn(port, remote, ConnStatus::SynSent)?;
        self.sockets.attach_conn(id, cid)?;

        let result = self.emit_segment(cid, TcpFlags::SYN, &[]);
        if result.is_err() {
            self.sockets.take_conn(cid);
        }
        result
    }

    /// Send `data` on socket `id`.
    ///
    /// - Empty `data` succeeds with `0` and allocates nothing.
    /// - Datagram sockets send to `dst`, binding an ephemeral port first if
    ///   needed.
    /// - Stream sockets ignore `dst`, need an established connection and
    ///   advance the connection's sequence number by the bytes sent.
    pub fn sock_put(&mut self, id: SocketId, data: &[u8], dst: SockAddr) -> Result<usize, NetError> {
        if data.is_empty() {
            return Ok(0);
        }
        let sock = self.sockets.get(id).ok_or(NetError::BadSocket)?;

        match sock.ty() {
            SockType::Datagram => {
                let port = if sock.is_bound() {
                    sock.port()
                } else {
                    self.sockets.bind(id, Port::ANY)?
                };
                let mut pkt = PacketBuf::alloc_any(self.pool)?;
                pkt.reserve(tx_headroom(UDP_HEADER_LEN))?;
                pkt.append(data)?;
                udp::output(self, pkt, port, dst)?;
                Ok(data.len())
            }
            SockType::Stream => {
                let cid = sock.conn().ok_or(NetError::NotConnected)?;
                let status = self.sockets.conn(cid).map(|c| c.status);
                match status {
                    Some(ConnStatus::Connected) => {}
                    Some(ConnStatus::Closed) => {
                        if self.sockets.conn(cid).is_some_and(|c| c.queued() == 0) {
                            self.sockets.take_conn(cid);
                        }
                        return Err(NetError::NotConnected);
                    }
                    _ => return Err(NetError::NotConnected),
                }

                self.emit_segment(cid, TcpFlags::PSH | TcpFlags::ACK, data)?;
                if let Some(conn) = self.sockets.conn_mut(cid) {
                    conn.seqid = conn.seqid.wrapping_add(data.len() as u32);
                }
                Ok(data.len())
            }
        }
    }

    /// Dequeue the oldest inbound packet of `id`.  See
    /// [`SocketTable::get_packet`].
    pub fn sock_get(&mut self, id: SocketId) -> Result<(PacketBuf<'p>, SockAddr), NetError> {
        self.sockets.get_packet(id)
    }

    /// Close `id`, releasing its binding, queues and connections.  Each
    /// released connection is handed to the engine, which may ask for a final
    /// segment (such as a reset) to be sent.
    pub fn sock_close(&mut self, id: SocketId) -> Result<(), NetError> {
        let released = self.sockets.close(id)?;
        for mut conn in released {
            let Some(flags) = self.tcp.terminate(&conn) else {
                continue;
            };
            if let Err(e) = self.send_for_conn(&mut conn, flags, &[]) {
                klog_debug!("socket: final segment to {} not sent: {}", conn.remote, e);
            }
        }
        Ok(())
    }

    pub fn sock_take_events(&mut self, id: SocketId) -> Result<SockEvents, NetError> {
        self.sockets.take_events(id)
    }

    /// Build a segment for connection `cid` carrying `data` and send it.
    fn emit_segment(&mut self, cid: ConnId, flags: TcpFlags, data: &[u8]) -> Result<(), NetError> {
        let mut pkt = PacketBuf::alloc_any(self.pool)?;
        pkt.append(data)?;
        let conn = self.sockets.conn_mut(cid).ok_or(NetError::NotConnected)?;
        self.tcp.encapsulate(conn, flags, &mut pkt)?;
        let dst = conn.remote.ip;
        tcp::send_segment(self, None, Ipv4Addr::UNSPECIFIED, TcpSegment { dst, pkt })
    }

    /// Like [`emit_segment`](Self::emit_segment) for a connection already
    /// removed from the table.
    fn send_for_conn(&mut self, conn: &mut TcpConn<'p>, flags: TcpFlags, data: &[u8]) -> Result<(), NetError> {
        let mut pkt = PacketBuf::alloc_any(self.pool)?;
        pkt.append(data)?;
        self.tcp.encapsulate(conn, flags, &mut pkt)?;
        let dst = conn.remote.ip;
        tcp::send_segment(self, None, Ipv4Addr::UNSPECIFIED, TcpSegment { dst, pkt })
    }
}
