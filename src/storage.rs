use std::collections::HashMap;
use std::net::SocketAddrV4;

use crate::id::InfoHash;

/// Peers learned through `announce_peer`, grouped by info hash.
///
/// Membership is by endpoint equality, which coincides with byte equality
/// of the 6-byte compact form. Insertion order is preserved so replies are
/// stable. Entries live for the lifetime of the node; expiry is left to a
/// future revision.
pub struct PeerStore {
  storage: HashMap<InfoHash, Vec<SocketAddrV4>>,
}

impl PeerStore {
  pub fn new() -> Self {
    Self {
      storage: HashMap::new(),
    }
  }

  /// Returns true if the peer was not already present.
  pub fn insert(&mut self, info_hash: InfoHash, peer: SocketAddrV4) -> bool {
    let peers = self.storage.entry(info_hash).or_default();

    if peers.contains(&peer) {
      return false;
    }

    peers.push(peer);
    true
  }

  /// Returns true if the peer was present.
  pub fn remove(&mut self, info_hash: &InfoHash, peer: &SocketAddrV4) -> bool {
    let Some(peers) = self.storage.get_mut(info_hash) else {
      return false;
    };

    let Some(index) = peers.iter().position(|p| p == peer) else {
      return false;
    };

    peers.remove(index);

    if peers.is_empty() {
      self.storage.remove(info_hash);
    }

    true
  }

  pub fn get(&self, info_hash: &InfoHash) -> &[SocketAddrV4] {
    self
      .storage
      .get(info_hash)
      .map(Vec::as_slice)
      .unwrap_or_default()
  }

  /// Total number of stored peer entries across all info hashes.
  pub fn len(&self) -> usize {
    self.storage.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.storage.is_empty()
  }
}

impl Default for PeerStore {
  fn default() -> Self {
    Self::new()
  }
}
