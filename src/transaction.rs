//! Outstanding-query bookkeeping.
//!
//! Replies are matched to queries by `(remote endpoint, transaction id)`.
//! Ids are 16-bit per-endpoint sequences, so two distinct peers may see the
//! same id without ambiguity, while a single peer never has two pending
//! queries under one id.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::Duration;

use crate::worker::timer::Timeout;

/// How long a query may remain unanswered before its slot is reclaimed.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) const TRANSACTION_ID_LEN: usize = 2;

/// 16-bit transaction id, carried on the wire as a 2-byte big-endian
/// string. Inbound `t` values of any other length are echoed verbatim in
/// replies but never matched against pending state.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct TransactionId(u16);

impl TransactionId {
  pub fn to_bytes(self) -> [u8; TRANSACTION_ID_LEN] {
    self.0.to_be_bytes()
  }

  pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
    let bytes: [u8; TRANSACTION_ID_LEN] = bytes.try_into().ok()?;
    Some(Self(u16::from_be_bytes(bytes)))
  }
}

/// Pending queries, each holding a waiter of the embedder's choosing plus
/// the handle of its armed timeout.
pub(crate) struct Transactions<T> {
  next_ids: HashMap<SocketAddrV4, u16>,
  pending: HashMap<(SocketAddrV4, TransactionId), PendingTransaction<T>>,
}

struct PendingTransaction<T> {
  waiter: T,
  timeout: Timeout,
}

impl<T> Transactions<T> {
  pub fn new() -> Self {
    Self {
      next_ids: HashMap::new(),
      pending: HashMap::new(),
    }
  }

  /// Next id for this endpoint: a per-endpoint sequence starting at 1,
  /// wrapping at 2^16. An id still in flight after a full wraparound is
  /// skipped, so concurrently pending ids are always distinct.
  pub fn allocate(&mut self, addr: SocketAddrV4) -> TransactionId {
    let next = self.next_ids.entry(addr).or_insert(1);

    loop {
      let candidate = TransactionId(*next);
      *next = next.wrapping_add(1);

      if !self.pending.contains_key(&(addr, candidate)) {
        return candidate;
      }
    }
  }

  pub fn insert(
    &mut self,
    addr: SocketAddrV4,
    tid: TransactionId,
    waiter: T,
    timeout: Timeout,
  ) {
    self
      .pending
      .insert((addr, tid), PendingTransaction { waiter, timeout });
  }

  /// Match an inbound reply. At most one of `resolve`/`expire` ever yields
  /// the waiter; the caller must cancel the returned timeout.
  pub fn resolve(
    &mut self,
    addr: SocketAddrV4,
    tid: TransactionId,
  ) -> Option<(T, Timeout)> {
    let pending = self.pending.remove(&(addr, tid))?;
    Some((pending.waiter, pending.timeout))
  }

  /// Reclaim a slot whose timer has already fired.
  pub fn expire(
    &mut self,
    addr: SocketAddrV4,
    tid: TransactionId,
  ) -> Option<T> {
    Some(self.pending.remove(&(addr, tid))?.waiter)
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use super::{TransactionId, Transactions};
  use crate::{test, worker::timer::Timer};

  fn dummy_timeout(timer: &mut Timer<()>) -> crate::worker::timer::Timeout {
    timer.schedule_in(Duration::from_secs(2), ())
  }

  #[test]
  fn positive_sequence_starts_at_one() {
    let mut transactions: Transactions<()> = Transactions::new();
    let addr = test::dummy_socket_addr_v4();

    assert_eq!(transactions.allocate(addr).to_bytes(), [0, 1]);
    assert_eq!(transactions.allocate(addr).to_bytes(), [0, 2]);
    assert_eq!(transactions.allocate(addr).to_bytes(), [0, 3]);
  }

  #[test]
  fn positive_sequences_are_per_endpoint() {
    let mut transactions: Transactions<()> = Transactions::new();
    let addrs = test::dummy_block_socket_addrs(2);

    assert_eq!(transactions.allocate(addrs[0]).to_bytes(), [0, 1]);
    assert_eq!(transactions.allocate(addrs[0]).to_bytes(), [0, 2]);
    assert_eq!(transactions.allocate(addrs[1]).to_bytes(), [0, 1]);
  }

  #[test]
  fn positive_resolve_is_at_most_once() {
    let mut timer = Timer::new();
    let mut transactions = Transactions::new();
    let addr = test::dummy_socket_addr_v4();

    let tid = transactions.allocate(addr);
    let timeout = dummy_timeout(&mut timer);
    transactions.insert(addr, tid, "waiter", timeout);

    assert!(transactions.resolve(addr, tid).is_some());
    assert!(transactions.resolve(addr, tid).is_none());
    assert!(transactions.expire(addr, tid).is_none());
    assert_eq!(transactions.len(), 0);
  }

  #[test]
  fn positive_pending_id_is_skipped_after_wraparound() {
    let mut timer = Timer::new();
    let mut transactions = Transactions::new();
    let addr = test::dummy_socket_addr_v4();

    let tid = transactions.allocate(addr);
    let timeout = dummy_timeout(&mut timer);
    transactions.insert(addr, tid, (), timeout);

    // Wind the sequence all the way around to the still-pending id.
    transactions.next_ids.insert(addr, 1);

    let reallocated = transactions.allocate(addr);

    assert_ne!(reallocated, tid);
    assert_eq!(reallocated.to_bytes(), [0, 2]);
  }

  #[test]
  fn positive_wire_round_trip() {
    let tid = TransactionId(0xabcd);

    assert_eq!(tid.to_bytes(), [0xab, 0xcd]);
    assert_eq!(TransactionId::from_bytes(&[0xab, 0xcd]), Some(tid));
  }

  #[test]
  fn positive_foreign_length_ids_do_not_match() {
    assert_eq!(TransactionId::from_bytes(b""), None);
    assert_eq!(TransactionId::from_bytes(b"a"), None);
    assert_eq!(TransactionId::from_bytes(b"abc"), None);
  }
}
