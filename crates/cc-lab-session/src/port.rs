use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Ask the OS for a UDP port that is currently free on `ip`.
///
/// The scratch socket is closed before returning, so the port is only a
/// candidate: callers bind it immediately afterwards.
pub fn free_udp_port(ip: IpAddr) -> io::Result<u16> {
    let scratch = UdpSocket::bind(SocketAddr::new(ip, 0))?;
    Ok(scratch.local_addr()?.port())
}
