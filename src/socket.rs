//! Blocking UDP transport used by the synchronization loop.

use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::wire::PACKET_SIZE;

/// A connected UDP socket with a receive timeout, matching the contract the
/// worker loop expects: one peer, one timeout, blocking send/receive.
pub(crate) struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    /// Resolve `host:port`, bind an ephemeral local socket, connect it to the
    /// resolved peer and arm the receive timeout.
    pub(crate) fn open(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let mut addrs = (host, port).to_socket_addrs().map_err(|_| Error::Send)?;
        let addr = addrs.next().ok_or(Error::Send)?;

        let local_bind = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(local_bind).map_err(|_| Error::Send)?;
        socket.connect(addr).map_err(|_| Error::Send)?;
        socket
            .set_read_timeout(Some(timeout))
            .map_err(|_| Error::Send)?;

        #[cfg(feature = "log")]
        log::debug!("connected to {addr} with read timeout {timeout:?}");

        Ok(UdpChannel { socket })
    }

    pub(crate) fn send(&self, buf: &[u8; PACKET_SIZE]) -> Result<()> {
        #[cfg(feature = "log")]
        log::trace!("send {buf:02x?}");

        match self.socket.send(buf) {
            Ok(n) if n == PACKET_SIZE => Ok(()),
            _ => Err(Error::Send),
        }
    }

    /// Blocks until a datagram arrives or the read timeout expires.
    pub(crate) fn receive(&self) -> Result<[u8; PACKET_SIZE]> {
        let mut buf = [0u8; PACKET_SIZE];
        let n = self.socket.recv(&mut buf).map_err(|_| Error::Receive)?;

        if n != PACKET_SIZE {
            return Err(Error::Receive);
        }

        #[cfg(feature = "log")]
        log::trace!("recv {buf:02x?}");

        Ok(buf)
    }
}
