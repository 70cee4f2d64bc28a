//! OS-level listen probes
//!
//! A probe binds a throwaway socket and drops it immediately; nothing is
//! held across candidates.

use super::{Protocol, DEFAULT_BASE_PORT};
use crate::{Error, Result};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

/// Verify that `listen:port` is free for every transport `proto` needs
pub fn check_port(listen: IpAddr, port: u16, proto: Protocol) -> Result<()> {
    if port == 0 {
        return Err(Error::validation("listen port must be between 1 and 65535"));
    }
    let addr = SocketAddr::new(listen, port);
    if proto.requires_tcp() {
        probe(addr, Type::STREAM, SockProtocol::TCP)?;
    }
    if proto.requires_udp() {
        probe(addr, Type::DGRAM, SockProtocol::UDP)?;
    }
    Ok(())
}

/// First free port in `start..=65535`, skipping `reserved`.
///
/// A `start` of 0 falls back to the default base port.
pub fn find_available_port(
    listen: IpAddr,
    start: u16,
    proto: Protocol,
    reserved: &HashSet<u16>,
) -> Result<u16> {
    let start = if start == 0 { DEFAULT_BASE_PORT } else { start };
    for port in start..=u16::MAX {
        if reserved.contains(&port) {
            continue;
        }
        match check_port(listen, port, proto) {
            Ok(()) => {
                debug!(port, listen = %listen, "free forward port found");
                return Ok(port);
            }
            Err(Error::PortUnavailable { .. }) => continue,
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(port, listen = %listen, "probe denied, skipping port");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::NoPortAvailable(start))
}

fn probe(addr: SocketAddr, ty: Type, proto: SockProtocol) -> Result<()> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, ty, Some(proto))?;
    // matches what the proxy engine's own TCP listener will request
    if ty == Type::STREAM && cfg!(not(windows)) {
        socket.set_reuse_address(true)?;
    }
    let bound = socket.bind(&addr.into()).and_then(|()| {
        if ty == Type::STREAM {
            socket.listen(1)
        } else {
            Ok(())
        }
    });
    match bound {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(Error::PortUnavailable {
            address: addr.ip().to_string(),
            port: addr.port(),
        }),
        Err(e) => Err(Error::Io(e)),
    }
}
