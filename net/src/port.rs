use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::sock::Role;

pub const BASE_SEND: u16 = 18000;
pub const BASE_RECV: u16 = 14000;

/// Deterministic (role, id) -> port mapping shared by every worker of an experiment.
///
/// A worker's `Send` connection to a peer and the peer's `Recv` connection back
/// address the same four-tuple from opposite ends, so the two simultaneous
/// active opens meet without either side listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortScheme {
    pub send_base: u16,
    pub recv_base: u16,
}

impl Default for PortScheme {
    fn default() -> Self {
        Self::new(BASE_SEND, BASE_RECV)
    }
}

impl PortScheme {
    pub const fn new(send_base: u16, recv_base: u16) -> Self {
        Self {
            send_base,
            recv_base,
        }
    }

    /// (local bind port, remote port) for one directed connection.
    pub fn endpoints(&self, role: Role, own_id: u32, peer_id: u32) -> Option<(u16, u16)> {
        let (local_base, remote_base) = match role {
            Role::Send => (self.send_base, self.recv_base),
            Role::Recv => (self.recv_base, self.send_base),
        };
        Some((offset(local_base, own_id)?, offset(remote_base, peer_id)?))
    }

    pub fn bind_addr(&self, role: Role, own_id: u32, family: IpAddr) -> Option<SocketAddr> {
        let (local, _) = self.endpoints(role, own_id, 0)?;
        let unspecified = match family {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Some(SocketAddr::new(unspecified, local))
    }

    pub fn remote_addr(&self, role: Role, peer_id: u32, peer_ip: IpAddr) -> Option<SocketAddr> {
        let (_, remote) = self.endpoints(role, 0, peer_id)?;
        Some(SocketAddr::new(peer_ip, remote))
    }

    /// Whether every id below `worker_count` maps to a port in both ranges
    /// without the two ranges overlapping.
    pub fn covers(&self, worker_count: u32) -> bool {
        let Some(last) = worker_count.checked_sub(1) else {
            return false;
        };
        let (Some(send_end), Some(recv_end)) =
            (offset(self.send_base, last), offset(self.recv_base, last))
        else {
            return false;
        };
        send_end < self.recv_base || recv_end < self.send_base
    }
}

fn offset(base: u16, id: u32) -> Option<u16> {
    u16::try_from(id).ok().and_then(|id| base.checked_add(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_ports() {
        let scheme = PortScheme::default();
        assert_eq!(scheme.endpoints(Role::Send, 3, 7), Some((18003, 14007)));
        assert_eq!(scheme.endpoints(Role::Recv, 3, 7), Some((14003, 18007)));
    }

    #[test]
    fn deterministic_for_every_pair() {
        let scheme = PortScheme::default();
        for own in 0..64 {
            for peer in 0..64 {
                for role in Role::ALL {
                    assert_eq!(
                        scheme.endpoints(role, own, peer),
                        scheme.endpoints(role, own, peer)
                    );
                }
            }
        }
    }

    #[test]
    fn send_and_recv_meet_on_the_same_four_tuple() {
        let scheme = PortScheme::default();
        for a in 0..32 {
            for b in 0..32 {
                if a == b {
                    continue;
                }
                let (a_local, a_remote) = scheme.endpoints(Role::Send, a, b).unwrap();
                let (b_local, b_remote) = scheme.endpoints(Role::Recv, b, a).unwrap();
                assert_eq!(a_local, b_remote, "a={a} b={b}");
                assert_eq!(a_remote, b_local, "a={a} b={b}");

                let (a_local, a_remote) = scheme.endpoints(Role::Recv, a, b).unwrap();
                let (b_local, b_remote) = scheme.endpoints(Role::Send, b, a).unwrap();
                assert_eq!(a_local, b_remote);
                assert_eq!(a_remote, b_local);
            }
        }
    }

    #[test]
    fn addresses_follow_the_peer_family() {
        let scheme = PortScheme::default();
        let peer: IpAddr = "10.0.0.9".parse().unwrap();
        assert_eq!(
            scheme.remote_addr(Role::Send, 2, peer),
            Some("10.0.0.9:14002".parse().unwrap())
        );
        assert_eq!(
            scheme.bind_addr(Role::Recv, 5, peer),
            Some("0.0.0.0:14005".parse().unwrap())
        );
        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(
            scheme.bind_addr(Role::Send, 1, v6),
            Some("[::]:18001".parse().unwrap())
        );
    }

    #[test]
    fn coverage_rejects_overlap_and_overflow() {
        let scheme = PortScheme::default();
        assert!(scheme.covers(1));
        assert!(scheme.covers(4000));
        assert!(!scheme.covers(4001));
        assert!(!scheme.covers(0));
        assert!(!PortScheme::new(65000, 1000).covers(1000));
        assert_eq!(PortScheme::new(65535, 1000).endpoints(Role::Send, 1, 0), None);
    }
}
