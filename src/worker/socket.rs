use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;

use crate::message::Message;

use super::WorkerError;

const RECV_BUFFER_LEN: usize = 64 * 1024;

/// The node's one UDP socket. Owned by the handler; nothing else sends or
/// receives.
pub(crate) struct Socket {
  socket: UdpSocket,
  local_addr: SocketAddrV4,
  buffer: Vec<u8>,
}

impl Socket {
  /// Fails only if `socket.local_addr()` fails or the socket is not IPv4.
  pub fn new(socket: UdpSocket) -> io::Result<Self> {
    let local_addr = match socket.local_addr()? {
      SocketAddr::V4(addr) => addr,
      SocketAddr::V6(_) => {
        return Err(io::Error::new(
          io::ErrorKind::InvalidInput,
          "the DHT requires an IPv4 socket",
        ))
      }
    };

    Ok(Self {
      socket,
      local_addr,
      buffer: vec![0; RECV_BUFFER_LEN],
    })
  }

  pub fn local_addr(&self) -> SocketAddrV4 {
    self.local_addr
  }

  /// Encode and send one message. Unroutable ports (0 and 65535) are
  /// dropped without error; the remote simply never hears from us.
  pub async fn send(
    &self,
    message: &Message,
    addr: SocketAddrV4,
  ) -> Result<(), WorkerError> {
    if addr.port() == 0 || addr.port() == u16::MAX {
      log::debug!("not sending to unroutable port {}", addr);
      return Ok(());
    }

    let bytes = message.encode().map_err(WorkerError::InvalidBencodeSer)?;
    self.socket.send_to(&bytes, SocketAddr::V4(addr)).await?;

    Ok(())
  }

  pub async fn recv(&mut self) -> io::Result<(Vec<u8>, SocketAddrV4)> {
    loop {
      let (len, addr) = self.socket.recv_from(&mut self.buffer).await?;

      // An IPv4-bound socket should never report a V6 source; skip if the
      // platform surprises us.
      if let SocketAddr::V4(addr) = addr {
        return Ok((self.buffer[..len].to_vec(), addr));
      }
    }
  }
}
