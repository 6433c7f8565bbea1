use std::fmt;
use std::net::SocketAddrV4;

use crate::id::NodeId;

/// Node id + its UDP endpoint. Only IPv4 endpoints participate in this DHT.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Contact {
  pub id: NodeId,
  pub addr: SocketAddrV4,
}

impl Contact {
  pub fn new(id: NodeId, addr: SocketAddrV4) -> Self {
    Self { id, addr }
  }
}

impl fmt::Debug for Contact {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}@{:?}", self.id, self.addr)
  }
}
