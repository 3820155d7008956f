//! Local IPv4 interface enumeration, used by the broadcast loop to send a
//! presence announcement out of every local interface each cycle.

use std::net::Ipv4Addr;

/// Every non-loopback IPv4 address currently bound to a local interface.
///
/// Walks `getifaddrs(3)` directly (teacher convention for raw libc calls:
/// unsafe block scoped tightly around the FFI call, checked return,
/// guaranteed cleanup — see `wraith-transport::worker::pin_to_core` and
/// `wraith-transport::numa::alloc_on_node`). Returns an empty `Vec` rather
/// than an error if enumeration fails; a broadcast cycle with no addresses
/// is a no-op, not fatal to discovery.
#[must_use]
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();

    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: `ifap` is a valid out-pointer; `getifaddrs` populates a
    // linked list we own and must free with `freeifaddrs`.
    let rc = unsafe { libc::getifaddrs(&mut ifap) };
    if rc != 0 || ifap.is_null() {
        return addrs;
    }

    let mut cursor = ifap;
    while !cursor.is_null() {
        // SAFETY: `cursor` is non-null and was produced by `getifaddrs`;
        // each node remains valid until `freeifaddrs` is called below.
        let entry = unsafe { &*cursor };

        if !entry.ifa_addr.is_null() {
            // SAFETY: `ifa_addr` is non-null, pointing at a `sockaddr` at
            // least as large as `sockaddr_in` when `sa_family == AF_INET`.
            let family = unsafe { (*entry.ifa_addr).sa_family };
            if i32::from(family) == libc::AF_INET {
                // SAFETY: family check above guarantees this cast is to the
                // correct concrete sockaddr variant.
                let sockaddr_in = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(sockaddr_in.sin_addr.s_addr));
                if !ip.is_loopback() {
                    addrs.push(ip);
                }
            }
        }

        cursor = entry.ifa_next;
    }

    // SAFETY: `ifap` was allocated by the `getifaddrs` call above and has
    // not been freed yet.
    unsafe { libc::freeifaddrs(ifap) };

    addrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_excludes_loopback() {
        let addrs = local_ipv4_addresses();
        assert!(addrs.iter().all(|ip| !ip.is_loopback()));
    }
}
