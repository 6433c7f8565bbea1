use std::collections::{HashSet, VecDeque};
use std::net::SocketAddrV4;

use tokio::sync::oneshot;

use crate::{
  contact::Contact,
  id::Id,
  routing::table::{RoutingTable, BUCKET_SIZE},
};

use super::LookupMode;

/// Kademlia's α: how many probes a lookup keeps in flight.
pub(crate) const LOOKUP_CONCURRENCY: usize = 3;

/// One iterative closest-node search.
///
/// The frontier lives in the routing table itself: after every completed
/// probe the candidates are recomputed as the K table contacts closest to
/// the target minus everything already queried. Timeouts and error replies
/// count as completions too, so a silent peer can never wedge the search.
pub(crate) struct IterativeLookup {
  target: Id,
  mode: LookupMode,
  seeds: VecDeque<SocketAddrV4>,
  queried: HashSet<SocketAddrV4>,
  pending: usize,
  tokens: Vec<(Contact, Vec<u8>)>,
  done: Option<oneshot::Sender<()>>,
}

impl IterativeLookup {
  pub fn new(
    target: Id,
    mode: LookupMode,
    seeds: Vec<SocketAddrV4>,
    done: Option<oneshot::Sender<()>>,
  ) -> Self {
    Self {
      target,
      mode,
      seeds: seeds.into(),
      queried: HashSet::new(),
      pending: 0,
      tokens: Vec::new(),
      done,
    }
  }

  pub fn target(&self) -> Id {
    self.target
  }

  pub fn mode(&self) -> LookupMode {
    self.mode
  }

  /// Pick the next endpoint to probe, marking it queried and in flight.
  /// Returns `None` while the α cap is reached or nothing new is left.
  /// Seeds are consumed first; after that the routing table drives.
  pub fn next_probe(&mut self, table: &RoutingTable) -> Option<SocketAddrV4> {
    if self.pending >= LOOKUP_CONCURRENCY {
      return None;
    }

    while let Some(addr) = self.seeds.pop_front() {
      if self.queried.insert(addr) {
        self.pending += 1;
        return Some(addr);
      }
    }

    let candidate = table
      .closest(&self.target, BUCKET_SIZE)
      .into_iter()
      .map(|contact| contact.addr)
      .find(|addr| !self.queried.contains(addr))?;

    self.queried.insert(candidate);
    self.pending += 1;

    Some(candidate)
  }

  /// One in-flight probe ended, successfully or not.
  pub fn probe_completed(&mut self) {
    self.pending = self.pending.saturating_sub(1);
  }

  /// Remember a responder that handed us an announce token.
  pub fn record_token(&mut self, contact: Contact, token: Vec<u8>) {
    self.tokens.push((contact, token));
  }

  /// The search has converged: nothing in flight and no unqueried
  /// candidate left anywhere.
  pub fn is_complete(&self, table: &RoutingTable) -> bool {
    self.pending == 0
      && self.seeds.is_empty()
      && table
        .closest(&self.target, BUCKET_SIZE)
        .iter()
        .all(|contact| self.queried.contains(&contact.addr))
  }

  /// Token-bearing responders to announce to, closest to the target first.
  pub fn announce_targets(
    &mut self,
    count: usize,
  ) -> Vec<(SocketAddrV4, Vec<u8>)> {
    self
      .tokens
      .sort_by_key(|(contact, _)| contact.id.distance(&self.target));

    self
      .tokens
      .iter()
      .take(count)
      .map(|(contact, token)| (contact.addr, token.clone()))
      .collect()
  }

  pub fn take_done(&mut self) -> Option<oneshot::Sender<()>> {
    self.done.take()
  }
}
