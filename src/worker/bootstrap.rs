use std::collections::HashSet;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net;

/// How long the routing table may stay empty before the bootstrap is
/// re-run from the original router list.
pub(crate) const BOOTSTRAP_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Seed material for joining the network: DNS names of well-known routers
/// plus any fixed endpoints the embedder supplied.
pub(crate) struct TableBootstrap {
  routers: Vec<String>,
  initial_nodes: HashSet<SocketAddrV4>,
  attempt: u64,
}

impl TableBootstrap {
  pub fn new(
    routers: Vec<String>,
    initial_nodes: HashSet<SocketAddrV4>,
  ) -> Self {
    Self {
      routers,
      initial_nodes,
      attempt: 0,
    }
  }

  /// A node with nothing to join through is its network's first member and
  /// counts as bootstrapped from the start.
  pub fn has_seeds(&self) -> bool {
    !self.routers.is_empty() || !self.initial_nodes.is_empty()
  }

  pub fn attempt(&self) -> u64 {
    self.attempt
  }

  /// Resolve the router names and merge in the fixed seed endpoints.
  /// Resolution failures are logged and skipped; the retry timer gets
  /// another chance at them.
  pub async fn resolve_seeds(&mut self) -> Vec<SocketAddrV4> {
    self.attempt += 1;

    let mut seeds: Vec<SocketAddrV4> =
      self.initial_nodes.iter().copied().collect();

    for router in &self.routers {
      match net::lookup_host(router).await {
        Ok(addrs) => {
          let resolved = addrs.filter_map(|addr| match addr {
            SocketAddr::V4(addr) => Some(addr),
            SocketAddr::V6(_) => None,
          });

          // One address per router is plenty; the lookup fans out from
          // whatever answers.
          if let Some(addr) = resolved.into_iter().next() {
            if !seeds.contains(&addr) {
              seeds.push(addr);
            }
          } else {
            log::warn!("router {} has no IPv4 address", router);
          }
        }
        Err(error) => {
          log::warn!("failed to resolve router {}: {}", router, error);
        }
      }
    }

    seeds
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use pretty_assertions::assert_eq;

  use super::TableBootstrap;
  use crate::test;

  #[test]
  fn positive_has_seeds() {
    let empty = TableBootstrap::new(Vec::new(), HashSet::new());
    assert!(!empty.has_seeds());

    let with_router =
      TableBootstrap::new(vec!["example.com:6881".into()], HashSet::new());
    assert!(with_router.has_seeds());

    let with_node = TableBootstrap::new(
      Vec::new(),
      [test::dummy_socket_addr_v4()].into(),
    );
    assert!(with_node.has_seeds());
  }

  #[tokio::test]
  async fn positive_fixed_nodes_need_no_resolution() {
    let node = test::dummy_socket_addr_v4();
    let mut bootstrap = TableBootstrap::new(Vec::new(), [node].into());

    assert_eq!(bootstrap.resolve_seeds().await, vec![node]);
    assert_eq!(bootstrap.attempt(), 1);

    assert_eq!(bootstrap.resolve_seeds().await, vec![node]);
    assert_eq!(bootstrap.attempt(), 2);
  }
}
