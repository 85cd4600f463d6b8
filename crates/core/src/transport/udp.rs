use std::net::{SocketAddr, SocketAddrV4, UdpSocket};

use super::Sink;
use crate::error::{Result, StreamError};
use crate::media::rtp::ParsedHeader;

/// UDP sink for outbound RTP packet delivery.
///
/// Binds a single ephemeral socket (`0.0.0.0:0`) and sends every packet as
/// one datagram to a fixed destination. There is no retry: a failed send is
/// reported for that packet only.
pub struct UdpSink {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl UdpSink {
    /// Bind an ephemeral UDP socket for outbound RTP.
    pub fn bind(destination: SocketAddrV4) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        tracing::info!(
            local = %socket.local_addr()?,
            %destination,
            "RTP sink bound"
        );
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddrV4 {
        self.destination
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Sink for UdpSink {
    fn write(&mut self, packet: &[u8]) -> Result<usize> {
        self.socket
            .send_to(packet, self.destination)
            .map_err(|source| StreamError::Send {
                sequence: ParsedHeader::parse(packet).map_or(0, |h| h.sequence),
                source,
            })
    }

    fn close(&mut self) -> Result<()> {
        tracing::debug!(destination = %self.destination, "RTP sink closed");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("rtp://{}", self.destination)
    }
}
