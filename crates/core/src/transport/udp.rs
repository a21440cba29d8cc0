use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::error::{Result, RtspError};

/// Per-session UDP socket for outbound RTP.
///
/// Bound on an ephemeral port during SETUP and owned by the session's
/// stream, so dropping the session closes it. The local port is what the
/// SETUP response advertises as `server_port`.
///
/// This layer is address-only; it does not know about sessions. The
/// destination is fixed at SETUP and passed in by the caller.
#[derive(Debug)]
pub struct RtpSocket {
    socket: UdpSocket,
}

impl RtpSocket {
    /// Bind an ephemeral UDP socket on `ip`.
    pub fn bind(ip: IpAddr) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(ip, 0))?;
        Ok(Self { socket })
    }

    /// Local port the socket is bound to.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Send one RTP packet. Failures surface as [`RtspError::Transport`].
    pub fn send_to(&self, packet: &[u8], addr: SocketAddr) -> Result<usize> {
        self.socket.send_to(packet, addr).map_err(RtspError::Transport)
    }
}
