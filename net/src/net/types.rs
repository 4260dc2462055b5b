//! Type-safe network primitives.
//!
//! Newtype wrappers that keep byte order, addresses and identifiers from being
//! confused with each other.  All types are `Copy` and usable in `const`
//! context where it makes sense.

use core::fmt;

// =============================================================================
// Newtype wrappers
// =============================================================================

/// IPv4 address stored in **network byte order** (`[u8; 4]`).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    /// `0.0.0.0`
    pub const UNSPECIFIED: Self = Self([0, 0, 0, 0]);
    /// `255.255.255.255`
    pub const BROADCAST: Self = Self([255, 255, 255, 255]);

    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    #[inline]
    pub const fn from_u32_be(val: u32) -> Self {
        Self(val.to_be_bytes())
    }

    #[inline]
    pub const fn to_u32_be(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        self.to_u32_be() == u32::MAX
    }

    #[inline]
    pub const fn is_unspecified(&self) -> bool {
        self.to_u32_be() == 0
    }

    /// `true` if `self` and `other` agree on every bit set in `mask`.
    #[inline]
    pub const fn same_subnet(self, other: Ipv4Addr, mask: Ipv4Addr) -> bool {
        let m = mask.to_u32_be();
        (self.to_u32_be() & m) == (other.to_u32_be() & m)
    }

    /// Read an address from the first four bytes of `bytes`.
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(Self(raw))
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Transport port in **host byte order**.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Port(pub u16);

impl Port {
    /// Port 0 asks `bind` for an ephemeral port.
    pub const ANY: Self = Self(0);

    #[inline]
    pub const fn new(val: u16) -> Self {
        Self(val)
    }

    #[inline]
    pub const fn to_network_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub const fn from_network_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_any(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; 6]);
    pub const ZERO: Self = Self([0; 6]);

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// Least-significant bit of the first octet.
    #[inline]
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(raw))
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Interface index inside one [`NetStack`](super::netstack::NetStack).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfaceId(pub u8);

impl fmt::Debug for IfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IfaceId({})", self.0)
    }
}

impl fmt::Display for IfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// IPv4 endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SockAddr {
    pub ip: Ipv4Addr,
    pub port: Port,
}

impl SockAddr {
    #[inline]
    pub const fn new(ip: Ipv4Addr, port: Port) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// =============================================================================
// NetError
// =============================================================================

/// Error type shared by every layer of the stack.
///
/// Conversion to POSIX errno happens only in the BSD facade via
/// [`to_errno`](NetError::to_errno).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// Packet pool (main and reserve) exhausted.
    OutOfPackets,
    /// No interface given and no default route configured.
    NoRoute,
    /// Destination address is `0.0.0.0`.
    NoDestination,
    /// Cursor or length arithmetic would leave the buffer.
    BufferOverrun,
    /// Inbound checksum did not verify.
    ChecksumMismatch,
    /// Inbound header failed a structural check.
    MalformedHeader,
    /// Protocol or ethertype this stack does not speak.
    UnsupportedProtocol,
    /// Hardware address not known yet; resolution is in progress.
    AddressUnresolved,
    /// Nothing to read or accept right now.
    WouldBlock,
    /// Another socket already holds the `(type, port)` binding.
    PortInUse,
    /// Every port of the ephemeral range is bound.
    NoPortsAvailable,
    /// Stream write without an established connection.
    NotConnected,
    /// IP output called with the protocol field left at zero.
    ProtocolNotSet,
    /// Argument outside the accepted domain.
    InvalidArgument,
    /// Socket handle or descriptor does not name an open socket.
    BadSocket,
    /// `accept` on a socket that never called `listen`.
    NotListening,
    /// Listen backlog already holds `backlog_max` connections.
    BacklogFull,
    /// A fixed-capacity table (sockets, connections, timers, wait list) is full.
    TableFull,
    /// Operation not valid for this socket type.
    OperationNotSupported,
    /// Address resolution gave up.
    HostUnreachable,
}

impl NetError {
    /// Negative POSIX errno for the descriptor-based API.
    pub const fn to_errno(self) -> i32 {
        let errno = match self {
            Self::OutOfPackets => 105,         // ENOBUFS
            Self::NoRoute => 101,              // ENETUNREACH
            Self::NoDestination => 89,         // EDESTADDRREQ
            Self::BufferOverrun => 90,         // EMSGSIZE
            Self::ChecksumMismatch => 74,      // EBADMSG
            Self::MalformedHeader => 74,       // EBADMSG
            Self::UnsupportedProtocol => 93,   // EPROTONOSUPPORT
            Self::AddressUnresolved => 11,     // EAGAIN
            Self::WouldBlock => 11,            // EAGAIN
            Self::PortInUse => 98,             // EADDRINUSE
            Self::NoPortsAvailable => 98,      // EADDRINUSE
            Self::NotConnected => 107,         // ENOTCONN
            Self::ProtocolNotSet => 22,        // EINVAL
            Self::InvalidArgument => 22,       // EINVAL
            Self::BadSocket => 9,              // EBADF
            Self::NotListening => 22,          // EINVAL
            Self::BacklogFull => 111,          // ECONNREFUSED
            Self::TableFull => 24,             // EMFILE
            Self::OperationNotSupported => 95, // EOPNOTSUPP
            Self::HostUnreachable => 113,      // EHOSTUNREACH
        };
        -errno
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfPackets => "packet pool exhausted",
            Self::NoRoute => "no route to destination",
            Self::NoDestination => "destination address required",
            Self::BufferOverrun => "buffer bounds exceeded",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::MalformedHeader => "malformed header",
            Self::UnsupportedProtocol => "unsupported protocol",
            Self::AddressUnresolved => "address resolution pending",
            Self::WouldBlock => "operation would block",
            Self::PortInUse => "port already bound",
            Self::NoPortsAvailable => "no ephemeral ports available",
            Self::NotConnected => "socket not connected",
            Self::ProtocolNotSet => "protocol field not set",
            Self::InvalidArgument => "invalid argument",
            Self::BadSocket => "bad socket",
            Self::NotListening => "socket not listening",
            Self::BacklogFull => "listen backlog full",
            Self::TableFull => "table full",
            Self::OperationNotSupported => "operation not supported",
            Self::HostUnreachable => "host unreachable",
        };
        f.write_str(msg)
    }
}

// =============================================================================
// Protocol discriminants
// =============================================================================

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
}

impl EtherType {
    #[inline]
    pub const fn from_u16(val: u16) -> Option<Self> {
        match val {
            0x0800 => Some(Self::Ipv4),
            0x0806 => Some(Self::Arp),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl IpProtocol {
    #[inline]
    pub const fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Self::Icmp),
            6 => Some(Self::Tcp),
            17 => Some(Self::Udp),
            _ => None,
        }
    }
}
