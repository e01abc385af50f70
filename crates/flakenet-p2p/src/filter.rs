//! Admission filter for gossiped addresses.
//!
//! Peers routinely advertise loopback or RFC1918 addresses, whether by
//! misconfiguration or malice; none of them are dialable from the open
//! internet, so they never enter the directory.

use std::net::Ipv4Addr;

/// Whether an advertised address may enter the peer directory.
/// Rejects 127.0.0.0/8, 10.0.0.0/8, 172.16.0.0/12 and 192.168.0.0/16.
pub fn is_routable(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback() || ip.is_private())
}
