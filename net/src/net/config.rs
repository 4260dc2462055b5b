//! Stack capacities and runtime policy.
//!
//! Capacities are compile-time constants because every table in the stack is a
//! fixed-size array.  Policy knobs (retry counts, timeouts, TTL, ephemeral
//! range) live in [`StackConfig`] and can be overridden from a `key=value`
//! argument string.

use mote_lib::klog_warn;

use super::types::NetError;

// =============================================================================
// Capacities
// =============================================================================

/// ARP cache slots.  Must be a power of two (the insertion cursor wraps by mask).
pub const ARP_TABLE_SIZE: usize = 4;
/// Packets that may wait on address resolution at once.
pub const ARP_WAIT_MAX: usize = 4;
pub const MAX_IFACES: usize = 2;
pub const MAX_SOCKETS: usize = 8;
pub const MAX_CONNS: usize = 8;
/// Inbound datagrams buffered per datagram socket.
pub const SOCK_RX_QUEUE_LEN: usize = 4;
/// Inbound segments buffered per connection.
pub const CONN_RX_QUEUE_LEN: usize = 4;
/// Upper bound for any listen backlog.
pub const BACKLOG_MAX: usize = 4;
/// Hash-backed binding table size.  Must be a power of two.
pub const BINDING_TABLE_SIZE: usize = 16;
pub const MAX_TIMERS: usize = 16;
/// Timers returned by a single `advance_to` call; the rest fire on the next call.
pub const MAX_TIMERS_PER_ADVANCE: usize = 8;
pub const EVENT_QUEUE_LEN: usize = 16;
/// Frames pulled from a device per `RxReady` event.
pub const RX_BUDGET: usize = 8;
/// Highest descriptor handed out by the BSD facade.
pub const MAX_FDS: usize = 100;
/// First descriptor handed out by the BSD facade (0 to 2 are stdio).
pub const FIRST_FD: usize = 3;

const _: () = assert!(ARP_TABLE_SIZE.is_power_of_two());
const _: () = assert!(BINDING_TABLE_SIZE.is_power_of_two());
const _: () = assert!(BINDING_TABLE_SIZE >= MAX_SOCKETS);
const _: () = assert!(FIRST_FD < MAX_FDS);

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_ARP_RETRIES: u8 = 2;
pub const DEFAULT_ARP_RETRY_TIMEOUT_US: u64 = 3_000_000;
pub const DEFAULT_IP_TTL: u8 = 0x38;
pub const DEFAULT_EPHEMERAL_START: u16 = 49152;
pub const DEFAULT_EPHEMERAL_END: u16 = 65535;

/// Runtime policy for one stack instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackConfig {
    /// Retransmissions of an ARP request before the waiting packet is dropped.
    pub arp_retries: u8,
    pub arp_retry_timeout_us: u64,
    /// Period of the ARP mark-and-sweep expiry; `None` keeps entries until evicted.
    pub arp_expiry_us: Option<u64>,
    pub ip_ttl: u8,
    /// Ephemeral port range `[start, end)`.
    pub ephemeral_start: u16,
    pub ephemeral_end: u16,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            arp_retries: DEFAULT_ARP_RETRIES,
            arp_retry_timeout_us: DEFAULT_ARP_RETRY_TIMEOUT_US,
            arp_expiry_us: None,
            ip_ttl: DEFAULT_IP_TTL,
            ephemeral_start: DEFAULT_EPHEMERAL_START,
            ephemeral_end: DEFAULT_EPHEMERAL_END,
        }
    }
}

impl StackConfig {
    /// Number of ports in the ephemeral range.
    #[inline]
    pub fn ephemeral_span(&self) -> u16 {
        self.ephemeral_end.saturating_sub(self.ephemeral_start)
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.ephemeral_end <= self.ephemeral_start || self.ephemeral_start == 0 {
            return Err(NetError::InvalidArgument);
        }
        if self.ip_ttl == 0 || self.arp_retry_timeout_us == 0 {
            return Err(NetError::InvalidArgument);
        }
        if self.arp_expiry_us == Some(0) {
            return Err(NetError::InvalidArgument);
        }
        Ok(())
    }

    /// Build a config from whitespace-separated `key=value` pairs.
    ///
    /// Recognized keys: `arp.retries`, `arp.timeout_ms`, `arp.expiry_ms`
    /// (`0` disables expiry), `ip.ttl`, `port.ephemeral_start`,
    /// `port.ephemeral_end`.  Unknown keys and unparsable values are logged
    /// and leave the default in place.
    pub fn from_args(args: &str) -> Self {
        let mut cfg = Self::default();

        for token in args.split_ascii_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                klog_warn!("config: ignoring token '{}'", token);
                continue;
            };

            let applied = match key {
                "arp.retries" => value.parse().map(|v| cfg.arp_retries = v).is_ok(),
                "arp.timeout_ms" => value
                    .parse::<u64>()
                    .map(|v| cfg.arp_retry_timeout_us = v.saturating_mul(1000))
                    .is_ok(),
                "arp.expiry_ms" => value
                    .parse::<u64>()
                    .map(|v| {
                        cfg.arp_expiry_us = if v == 0 {
                            None
                        } else {
                            Some(v.saturating_mul(1000))
                        }
                    })
                    .is_ok(),
                "ip.ttl" => value.parse().map(|v| cfg.ip_ttl = v).is_ok(),
                "port.ephemeral_start" => value.parse().map(|v| cfg.ephemeral_start = v).is_ok(),
                "port.ephemeral_end" => value.parse().map(|v| cfg.ephemeral_end = v).is_ok(),
                _ => {
                    klog_warn!("config: unknown key '{}'", key);
                    continue;
                }
            };

            if !applied {
                klog_warn!("config: bad value '{}' for '{}'", value, key);
            }
        }

        cfg
    }
}
