//! The stack context: one value that owns every table of a stack instance.
//!
//! Nothing in the stack is global.  [`NetStack`] holds the interfaces, the
//! default route, the ARP cache and wait list, the timer set, the socket
//! table and the transport engine, and every protocol entry point takes it
//! by `&mut`.  Several instances can run side by side, each with its own
//! [`PacketPool`].
//!
//! The stack is driven from one cooperative task:
//!
//! ```ignore
//! static EVENTS: EventQueue = EventQueue::new();
//!
//! // interrupt handlers
//! EVENTS.post(NetEvent::RxReady(iface));
//! EVENTS.post(NetEvent::Tick { now_us });
//!
//! // network task
//! loop {
//!     stack.poll(&EVENTS);
//!     wait_for_interrupt();
//! }
//! ```

use heapless::Vec;
use mote_lib::{klog_debug, klog_info};

use super::binding::{BindingTable, ListBindings};
use super::config::{MAX_IFACES, RX_BUDGET, StackConfig};
use super::event::{EventQueue, NetEvent};
use super::neighbor::{ArpCache, ArpWaitList};
use super::netdev::{NetDevice, NetStats};
use super::packetbuf::PacketBuf;
use super::pool::PacketPool;
use super::route::DefaultRoute;
use super::socket::SocketTable;
use super::tcp::{NullTcp, TcpEngine};
use super::timer::{FiredTimer, NetTimers, TimerKind};
use super::types::{IfaceId, Ipv4Addr, MacAddr, NetError};
use super::{arp, ingress};

// =============================================================================
// Interface configuration
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IfaceConfig {
    pub mac: MacAddr,
    pub ipv4_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub up: bool,
}

impl IfaceConfig {
    pub const fn new(mac: MacAddr, ipv4_addr: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            mac,
            ipv4_addr,
            netmask,
            up: true,
        }
    }

    /// `true` if `ip` is in the interface's subnet.
    #[inline]
    pub fn is_on_link(&self, ip: Ipv4Addr) -> bool {
        ip.same_subnet(self.ipv4_addr, self.netmask)
    }

    /// Directed broadcast address of the subnet.
    #[inline]
    pub fn broadcast(&self) -> Ipv4Addr {
        let mask = self.netmask.to_u32_be();
        Ipv4Addr::from_u32_be((self.ipv4_addr.to_u32_be() & mask) | !mask)
    }

    /// Netmask as a prefix length (counts leading one bits).
    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.netmask.to_u32_be().leading_ones() as u8
    }
}

// =============================================================================
// NetStack
// =============================================================================

/// One network stack instance.  See the [module documentation](self).
///
/// - `D`: the link device driver.
/// - `B`: the socket binding storage ([`ListBindings`] or
///   [`HashBindings`](super::binding::HashBindings)).
/// - `T`: the transport engine behind stream sockets.
pub struct NetStack<'p, D, B = ListBindings, T = NullTcp> {
    pub(crate) pool: &'p PacketPool,
    pub(crate) dev: D,
    pub(crate) config: StackConfig,
    pub(crate) ifaces: Vec<IfaceConfig, MAX_IFACES>,
    pub(crate) route: Option<DefaultRoute>,
    pub(crate) neighbors: ArpCache,
    pub(crate) arp_wait: ArpWaitList<'p>,
    pub(crate) timers: NetTimers,
    pub(crate) sockets: SocketTable<'p, B>,
    pub(crate) tcp: T,
    pub(crate) stats: NetStats,
}

impl<'p, D, B, T> NetStack<'p, D, B, T>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    pub fn new(
        pool: &'p PacketPool,
        dev: D,
        bindings: B,
        tcp: T,
        config: StackConfig,
    ) -> Result<Self, NetError> {
        config.validate()?;

        let mut stack = Self {
            pool,
            dev,
            config,
            ifaces: Vec::new(),
            route: None,
            neighbors: ArpCache::new(),
            arp_wait: ArpWaitList::new(),
            timers: NetTimers::new(),
            sockets: SocketTable::new(bindings, &config),
            tcp,
            stats: NetStats::default(),
        };

        if let Some(period) = config.arp_expiry_us {
            stack.timers.schedule(period, TimerKind::ArpExpire, 0)?;
        }

        klog_info!(
            "net: stack up (arp retries={} timeout={}us ttl={} ephemeral={}..{})",
            config.arp_retries,
            config.arp_retry_timeout_us,
            config.ip_ttl,
            config.ephemeral_start,
            config.ephemeral_end
        );
        Ok(stack)
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn add_iface(&mut self, iface: IfaceConfig) -> Result<IfaceId, NetError> {
        let id = IfaceId(self.ifaces.len() as u8);
        self.ifaces.push(iface).map_err(|_| NetError::TableFull)?;
        klog_info!(
            "net: {} {} {}/{}",
            id,
            iface.mac,
            iface.ipv4_addr,
            iface.prefix_len()
        );
        Ok(id)
    }

    #[inline]
    pub fn iface(&self, id: IfaceId) -> Option<&IfaceConfig> {
        self.ifaces.get(id.0 as usize)
    }

    pub fn iface_mut(&mut self, id: IfaceId) -> Option<&mut IfaceConfig> {
        self.ifaces.get_mut(id.0 as usize)
    }

    pub fn set_default_route(&mut self, iface: IfaceId, gateway: Ipv4Addr) -> Result<(), NetError> {
        if self.iface(iface).is_none() || gateway.is_unspecified() {
            return Err(NetError::InvalidArgument);
        }
        self.route = Some(DefaultRoute { iface, gateway });
        Ok(())
    }

    pub fn clear_default_route(&mut self) {
        self.route = None;
    }

    #[inline]
    pub fn default_route(&self) -> Option<&DefaultRoute> {
        self.route.as_ref()
    }

    /// Seed the ARP cache with a static mapping.
    pub fn add_neighbor(&mut self, ip: Ipv4Addr, mac: MacAddr, iface: IfaceId) -> Result<(), NetError> {
        if self.iface(iface).is_none() {
            return Err(NetError::InvalidArgument);
        }
        self.neighbors.insert(ip, mac, iface);
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn pool(&self) -> &'p PacketPool {
        self.pool
    }

    #[inline]
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.dev
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    #[inline]
    pub fn neighbors(&self) -> &ArpCache {
        &self.neighbors
    }

    #[inline]
    pub fn arp_wait(&self) -> &ArpWaitList<'p> {
        &self.arp_wait
    }

    #[inline]
    pub fn timers(&self) -> &NetTimers {
        &self.timers
    }

    #[inline]
    pub fn sockets(&self) -> &SocketTable<'p, B> {
        &self.sockets
    }

    #[inline]
    pub fn sockets_mut(&mut self) -> &mut SocketTable<'p, B> {
        &mut self.sockets
    }

    #[inline]
    pub fn tcp(&self) -> &T {
        &self.tcp
    }

    #[inline]
    pub fn tcp_mut(&mut self) -> &mut T {
        &mut self.tcp
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Drain `events` in FIFO order.  Returns the number of events handled.
    pub fn poll(&mut self, events: &EventQueue) -> usize {
        let mut handled = 0;
        while let Some(event) = events.pop() {
            match event {
                NetEvent::RxReady(iface) => {
                    self.poll_device(iface);
                }
                NetEvent::Tick { now_us } => {
                    self.process_timers(now_us);
                }
            }
            handled += 1;
        }
        handled
    }

    /// Pull up to [`RX_BUDGET`] frames from the device and run them through
    /// the ingress path.  Returns the number of frames processed.
    ///
    /// A driver with more frames pending posts another `RxReady`.
    pub fn poll_device(&mut self, iface: IfaceId) -> usize {
        let mut count = 0;
        while count < RX_BUDGET {
            let Some(pkt) = self.dev.poll_rx(iface, self.pool) else {
                break;
            };
            ingress::net_rx(self, iface, pkt);
            count += 1;
        }
        count
    }

    /// Hand one received frame to the ingress path.
    pub fn receive(&mut self, iface: IfaceId, frame: PacketBuf<'p>) {
        ingress::net_rx(self, iface, frame);
    }

    /// Fire every timer due at `now_us`.  Returns the number dispatched.
    pub fn process_timers(&mut self, now_us: u64) -> usize {
        let mut dispatched = 0;
        loop {
            let fired = self.timers.advance_to(now_us);
            if fired.is_empty() {
                break;
            }
            for timer in fired {
                self.dispatch_timer(timer);
                dispatched += 1;
            }
        }
        dispatched
    }

    fn dispatch_timer(&mut self, timer: FiredTimer) {
        klog_debug!("net: timer {:?} key={} fired", timer.kind, timer.key);
        match timer.kind {
            TimerKind::ArpRetry => arp::on_retry_timer(self, timer.key as usize, timer.token),
            TimerKind::ArpExpire => arp::on_expire_timer(self),
        }
    }
}
