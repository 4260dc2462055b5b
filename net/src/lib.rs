//! A small IPv4 stack for microcontrollers: Ethernet, ARP, IPv4, ICMP echo,
//! UDP and a socket layer with a pluggable TCP engine.
//!
//! Everything runs from fixed-capacity tables.  See [`net::netstack`] for how
//! a stack instance is assembled and driven.

#![cfg_attr(not(test), no_std)]

pub mod net;

pub use net::netstack::{IfaceConfig, NetStack};
pub use net::types::{IfaceId, Ipv4Addr, MacAddr, NetError, Port, SockAddr};
