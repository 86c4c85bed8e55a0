use std::net::{SocketAddr, UdpSocket};
use thiserror::Error;

/// A failed frame transmission. Send failures are non-fatal: the mutation
/// engine logs them and moves on without advancing its sequence counter.
#[derive(Error, Debug)]
#[error("link send failed on '{interface}': {reason}")]
pub struct LinkError {
    pub interface: String,
    pub reason: String,
}

/// The outbound seam of the pipeline: something that can put raw frame
/// bytes on the wire toward the target.
///
/// Transmission is fire-and-forget — implementations report failure but
/// must never block indefinitely.
pub trait LinkSender: Send {
    fn transmit(&mut self, frame: &[u8], interface: &str) -> Result<(), LinkError>;
}

/// Encapsulates raw frames in UDP datagrams addressed to an injection
/// collector (a replay box sitting on the target's segment). The socket is
/// bound once at construction; per-send cost is a single non-blocking
/// datagram.
pub struct UdpLinkSender {
    socket: UdpSocket,
    collector: SocketAddr,
}

impl UdpLinkSender {
    pub fn new(collector: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, collector })
    }
}

impl LinkSender for UdpLinkSender {
    fn transmit(&mut self, frame: &[u8], interface: &str) -> Result<(), LinkError> {
        self.socket
            .send_to(frame, self.collector)
            .map_err(|e| LinkError {
                interface: interface.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
