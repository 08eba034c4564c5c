//! UDP group socket (§4.3).
//!
//! Grounded on `original_source/groupsock/include/GroupsockHelper.hh`:
//! `setupDatagramSocket`, `socketJoinGroup`/`socketJoinGroupSSM`,
//! `socketLeaveGroup`/`socketLeaveGroupSSM`,
//! `changeReceiveInterfaceIfNecessary`,
//! `increaseSendBufferTo`/`increaseReceiveBufferTo`, and the
//! `ttl`/send-only knobs a `Groupsock` carries. The original exposes
//! these as free functions taking a raw `int socket`; here they're
//! methods on a single [`GroupSocket`] type that owns the underlying
//! `UdpSocket`, matching the small-owned-wrapper-around-a-std-socket
//! style the rest of this workspace's transport code uses.

use std::io::{Error, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::AsRawFd;

use crate::error::{EngineError, Result};

/// How large a send/receive buffer growth attempt starts at, and how far
/// it backs off on `EINVAL`/`ENOBUFS` before giving up (§4.3 "buffer
/// growth", grounded on `increaseSendBufferTo`'s halving retry loop).
const BUFFER_GROWTH_FLOOR: usize = 4096;

/// Which kind of multicast membership (if any) a [`GroupSocket`] currently
/// holds, and on which interface. Tracked as a single enum rather than a
/// bare `Option<Ipv4Addr>` so `leave` can refuse to tear down an SSM
/// membership with the wrong socket option (`IP_DROP_MEMBERSHIP` doesn't
/// carry a source address the way `IP_DROP_SOURCE_MEMBERSHIP` does), and
/// so `change_receive_interface_if_necessary` knows which join to replay
/// on the new interface.
#[derive(Debug, Clone, Copy)]
enum Membership {
    Asm { group: Ipv4Addr, interface: Ipv4Addr },
    Ssm { group: Ipv4Addr, source: Ipv4Addr, interface: Ipv4Addr },
}

/// A bound UDP socket with multicast membership and TTL/loopback
/// controls layered on top (§4.3).
pub struct GroupSocket {
    socket: UdpSocket,
    membership: Option<Membership>,
    send_only: bool,
    ttl: u32,
}

impl GroupSocket {
    /// Bind to `port` on `bind_addr` (typically `0.0.0.0` or an explicit
    /// receiving interface, §11). Does not join any multicast group —
    /// call [`join`](Self::join) or [`join_ssm`](Self::join_ssm) for that.
    pub fn bind(bind_addr: Ipv4Addr, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(bind_addr, port))?;
        Ok(Self {
            socket,
            membership: None,
            send_only: false,
            ttl: 255,
        })
    }

    /// Bind an ephemeral send-only socket, matching the original's
    /// `setLoopback = False` / no-bind-to-group-port path for a
    /// sender that never reads back its own traffic.
    pub fn bind_send_only(bind_addr: Ipv4Addr) -> Result<Self> {
        let mut gs = Self::bind(bind_addr, 0)?;
        gs.send_only = true;
        Ok(gs)
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Join an any-source multicast group (`socketJoinGroup`).
    pub fn join(&mut self, group: Ipv4Addr, via_interface: Ipv4Addr) -> Result<()> {
        self.socket.join_multicast_v4(&group, &via_interface)?;
        self.membership = Some(Membership::Asm { group, interface: via_interface });
        Ok(())
    }

    /// Leave an any-source multicast group joined with [`join`](Self::join)
    /// (`socketLeaveGroup`). Returns an error rather than silently
    /// no-opping or mistearing-down an SSM membership joined with
    /// [`join_ssm`](Self::join_ssm) — that one needs
    /// [`leave_ssm`](Self::leave_ssm) instead, since `IP_DROP_MEMBERSHIP`
    /// carries no source address to match against.
    pub fn leave(&mut self, via_interface: Ipv4Addr) -> Result<()> {
        match self.membership.take() {
            None => Ok(()),
            Some(Membership::Asm { group, .. }) => {
                self.socket.leave_multicast_v4(&group, &via_interface)?;
                Ok(())
            }
            Some(other @ Membership::Ssm { .. }) => {
                self.membership = Some(other);
                Err(EngineError::Io(Error::new(
                    ErrorKind::InvalidInput,
                    "leave() called on an SSM membership; use leave_ssm()",
                )))
            }
        }
    }

    /// Join a source-specific multicast (SSM) group, restricting
    /// delivery to datagrams from `source` (`socketJoinGroupSSM`).
    ///
    /// SSM membership isn't exposed by `std::net`, so this is built on
    /// the raw `IP_ADD_SOURCE_MEMBERSHIP` socket option via `libc` —
    /// the one place this module steps below `std::net`, since no
    /// higher-level crate exposes source-specific multicast join and
    /// the original treats it as core, non-optional functionality.
    pub fn join_ssm(&mut self, group: Ipv4Addr, source: Ipv4Addr, via_interface: Ipv4Addr) -> Result<()> {
        ssm_setsockopt(&self.socket, group, source, via_interface, libc::IP_ADD_SOURCE_MEMBERSHIP)?;
        self.membership = Some(Membership::Ssm { group, source, interface: via_interface });
        Ok(())
    }

    /// Leave a source-specific multicast group joined with
    /// [`join_ssm`](Self::join_ssm) (`socketLeaveGroupSSM`), via
    /// `IP_DROP_SOURCE_MEMBERSHIP`. A no-op if no SSM membership is held
    /// for `group`/`source`.
    pub fn leave_ssm(&mut self, group: Ipv4Addr, source: Ipv4Addr, via_interface: Ipv4Addr) -> Result<()> {
        let matches = matches!(
            self.membership,
            Some(Membership::Ssm { group: g, source: s, .. }) if g == group && s == source
        );
        if !matches {
            return Ok(());
        }
        ssm_setsockopt(&self.socket, group, source, via_interface, libc::IP_DROP_SOURCE_MEMBERSHIP)?;
        self.membership = None;
        Ok(())
    }

    /// Rejoin the currently-held membership (ASM or SSM) on
    /// `new_interface` if it differs from the interface last joined on
    /// (`changeReceiveInterfaceIfNecessary`). A no-op with no membership
    /// held, or when `new_interface` already matches.
    pub fn change_receive_interface_if_necessary(&mut self, new_interface: Ipv4Addr) -> Result<()> {
        match self.membership {
            Some(Membership::Asm { group, interface }) if interface != new_interface => {
                self.socket.leave_multicast_v4(&group, &interface)?;
                self.socket.join_multicast_v4(&group, &new_interface)?;
                self.membership = Some(Membership::Asm { group, interface: new_interface });
                Ok(())
            }
            Some(Membership::Ssm { group, source, interface }) if interface != new_interface => {
                ssm_setsockopt(&self.socket, group, source, interface, libc::IP_DROP_SOURCE_MEMBERSHIP)?;
                ssm_setsockopt(&self.socket, group, source, new_interface, libc::IP_ADD_SOURCE_MEMBERSHIP)?;
                self.membership = Some(Membership::Ssm { group, source, interface: new_interface });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn set_ttl(&mut self, ttl: u32) -> Result<()> {
        self.socket.set_multicast_ttl_v4(ttl)?;
        self.ttl = ttl;
        Ok(())
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn set_multicast_loopback(&mut self, enabled: bool) -> Result<()> {
        Ok(self.socket.set_multicast_loop_v4(enabled)?)
    }

    pub fn send_to(&self, payload: &[u8], dest: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, dest)?)
    }

    /// Blocking read of one datagram. `buffer` is caller-owned, matching
    /// the framed-pipeline's push-with-caller-supplied-buffer contract
    /// (§4.4) rather than `readSocket`'s env-owned scratch buffer.
    ///
    /// A send-only socket (`bind_send_only`) never reads its own
    /// traffic back — §4.3 requires the send-only flag to "inhibit the
    /// datagram socket's recv side so that a sender on the same host
    /// does not loop its own traffic back" — so this returns an error
    /// instead of calling into the OS.
    pub fn recv(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)> {
        if self.send_only {
            return Err(EngineError::Io(Error::new(
                ErrorKind::Other,
                "recv() called on a send-only GroupSocket",
            )));
        }
        Ok(self.socket.recv_from(buffer)?)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        Ok(self.socket.set_nonblocking(nonblocking)?)
    }

    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.socket.as_raw_fd()
    }

    pub fn is_send_only(&self) -> bool {
        self.send_only
    }

    /// Attempt to grow the socket's send buffer to `requested`, halving
    /// the request on failure until it either succeeds or falls below
    /// [`BUFFER_GROWTH_FLOOR`] (`increaseSendBufferTo`'s retry strategy).
    /// Returns the size actually achieved.
    pub fn grow_send_buffer(&self, requested: usize) -> Result<usize> {
        grow_buffer(&self.socket, requested, libc::SO_SNDBUF)
    }

    pub fn grow_receive_buffer(&self, requested: usize) -> Result<usize> {
        grow_buffer(&self.socket, requested, libc::SO_RCVBUF)
    }
}

#[repr(C)]
struct IpMreqSource {
    imr_multiaddr: libc::in_addr,
    imr_interface: libc::in_addr,
    imr_sourceaddr: libc::in_addr,
}

/// Shared `IP_ADD_SOURCE_MEMBERSHIP`/`IP_DROP_SOURCE_MEMBERSHIP` call —
/// the two options take an identical `ip_mreq_source` payload, differing
/// only in direction, so join/leave/interface-change all funnel through
/// this one raw `setsockopt`.
fn ssm_setsockopt(
    socket: &UdpSocket,
    group: Ipv4Addr,
    source: Ipv4Addr,
    via_interface: Ipv4Addr,
    option: libc::c_int,
) -> Result<()> {
    let mreq = IpMreqSource {
        imr_multiaddr: libc::in_addr { s_addr: u32::from_ne_bytes(group.octets()) },
        imr_interface: libc::in_addr { s_addr: u32::from_ne_bytes(via_interface.octets()) },
        imr_sourceaddr: libc::in_addr { s_addr: u32::from_ne_bytes(source.octets()) },
    };
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            option,
            &mreq as *const _ as *const libc::c_void,
            std::mem::size_of::<IpMreqSource>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(EngineError::Io(Error::last_os_error()));
    }
    Ok(())
}

fn grow_buffer(socket: &UdpSocket, requested: usize, option: libc::c_int) -> Result<usize> {
    let mut size = requested;
    loop {
        let value = size as libc::c_int;
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                &value as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            return Ok(size);
        }
        if size <= BUFFER_GROWTH_FLOOR {
            return Err(EngineError::Io(Error::last_os_error()));
        }
        size /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_local_port_round_trip() {
        let gs = GroupSocket::bind(Ipv4Addr::UNSPECIFIED, 0).unwrap();
        assert!(gs.local_port().unwrap() > 0);
        assert!(!gs.is_send_only());
    }

    #[test]
    fn send_only_socket_is_flagged() {
        let gs = GroupSocket::bind_send_only(Ipv4Addr::UNSPECIFIED).unwrap();
        assert!(gs.is_send_only());
    }

    #[test]
    fn send_and_recv_round_trip_on_loopback() {
        let receiver = GroupSocket::bind(Ipv4Addr::LOCALHOST, 0).unwrap();
        let sender = GroupSocket::bind_send_only(Ipv4Addr::LOCALHOST).unwrap();
        let dest = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), receiver.local_port().unwrap());

        sender.send_to(b"hello", dest).unwrap();

        let mut buf = [0u8; 16];
        let (n, _from) = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn recv_on_send_only_socket_is_rejected() {
        let sender = GroupSocket::bind_send_only(Ipv4Addr::LOCALHOST).unwrap();
        let mut buf = [0u8; 16];
        assert!(sender.recv(&mut buf).is_err());
    }

    #[test]
    fn default_ttl_matches_original_default() {
        let gs = GroupSocket::bind(Ipv4Addr::UNSPECIFIED, 0).unwrap();
        assert_eq!(gs.ttl(), 255);
    }

    #[test]
    fn leave_refuses_an_ssm_membership() {
        let mut gs = GroupSocket::bind(Ipv4Addr::UNSPECIFIED, 0).unwrap();
        // Fake an SSM membership without touching the network stack, to
        // exercise the type-mismatch guard in isolation.
        gs.membership = Some(Membership::Ssm {
            group: Ipv4Addr::new(239, 1, 1, 1),
            source: Ipv4Addr::new(10, 0, 0, 1),
            interface: Ipv4Addr::UNSPECIFIED,
        });
        assert!(gs.leave(Ipv4Addr::UNSPECIFIED).is_err());
        assert!(gs.membership.is_some(), "a rejected leave must not drop the membership");
    }

    #[test]
    fn change_receive_interface_is_a_no_op_without_membership() {
        let mut gs = GroupSocket::bind(Ipv4Addr::UNSPECIFIED, 0).unwrap();
        assert!(gs.change_receive_interface_if_necessary(Ipv4Addr::new(10, 0, 0, 2)).is_ok());
    }
}
