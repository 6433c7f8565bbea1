use std::fmt;

use crate::{
  contact::Contact,
  id::{Id, NodeId},
};

/// Maximum contacts per bucket (the Kademlia `K`).
pub const BUCKET_SIZE: usize = 8;

/// One bucket per possible shared-prefix length.
pub const MAX_BUCKETS: usize = 160;

/// Routing table anchored at the local node id.
///
/// Bucket `i` holds contacts whose XOR distance to the local id has exactly
/// `i` leading zero bits; the deepest bucket is the catch-all for every
/// longer prefix. Only the catch-all covers the local id's own prefix, so
/// splitting it (by pushing a new, deeper bucket and redistributing) grows
/// precision around our own neighborhood and nowhere else.
pub struct RoutingTable {
  local_id: NodeId,
  buckets: Vec<Bucket>,
}

/// Outcome of an insert attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AddOutcome {
  /// The contact is new to the table.
  Added,
  /// The id was already present; its endpoint and recency were updated.
  Refreshed,
  /// The responsible bucket is full and may not split; the newcomer was
  /// dropped.
  Full,
  /// The contact carries the local id and is never stored.
  LocalId,
}

impl RoutingTable {
  pub fn new(local_id: NodeId) -> Self {
    Self {
      local_id,
      buckets: vec![Bucket::new()],
    }
  }

  pub fn local_id(&self) -> NodeId {
    self.local_id
  }

  pub fn add(&mut self, contact: Contact) -> AddOutcome {
    if contact.id == self.local_id {
      return AddOutcome::LocalId;
    }

    loop {
      let index = self.bucket_index(&contact.id);
      let bucket = &mut self.buckets[index];

      if bucket.refresh(contact) {
        return AddOutcome::Refreshed;
      }

      if bucket.contacts.len() < BUCKET_SIZE {
        bucket.contacts.push(contact);
        return AddOutcome::Added;
      }

      // Only the deepest bucket covers the local id's prefix; anywhere
      // else a full bucket drops the newcomer.
      let can_split =
        index == self.buckets.len() - 1 && self.buckets.len() < MAX_BUCKETS;

      if !can_split {
        return AddOutcome::Full;
      }

      self.split_last_bucket();
    }
  }

  pub fn remove(&mut self, id: &NodeId) -> Option<Contact> {
    if *id == self.local_id {
      return None;
    }

    let index = self.bucket_index(id);
    let bucket = &mut self.buckets[index];
    let position = bucket.contacts.iter().position(|c| c.id == *id)?;

    Some(bucket.contacts.remove(position))
  }

  pub fn get(&self, id: &NodeId) -> Option<&Contact> {
    let index = self.bucket_index(id);
    self.buckets[index].contacts.iter().find(|c| c.id == *id)
  }

  /// Up to `count` contacts from the whole table, ascending by XOR distance
  /// to `target`. The sort is stable, so equidistant entries (impossible
  /// for distinct ids, but cheap to promise) keep insertion order.
  pub fn closest(&self, target: &Id, count: usize) -> Vec<Contact> {
    let mut contacts: Vec<Contact> =
      self.buckets.iter().flat_map(|b| &b.contacts).copied().collect();

    contacts.sort_by_key(|contact| contact.id.distance(target));
    contacts.truncate(count);
    contacts
  }

  pub fn len(&self) -> usize {
    self.buckets.iter().map(|b| b.contacts.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.buckets.iter().all(|b| b.contacts.is_empty())
  }

  pub fn bucket_count(&self) -> usize {
    self.buckets.len()
  }

  fn bucket_index(&self, id: &NodeId) -> usize {
    let zeros = self.local_id.distance(id).leading_zeros() as usize;
    zeros.min(self.buckets.len() - 1)
  }

  fn split_last_bucket(&mut self) {
    let depth = self.buckets.len() - 1;
    let old_last = self
      .buckets
      .pop()
      .unwrap_or_else(Bucket::new);

    let mut near = Bucket::new();
    let mut far = Bucket::new();

    for contact in old_last.contacts {
      let zeros = self.local_id.distance(&contact.id).leading_zeros() as usize;

      if zeros == depth {
        far.contacts.push(contact);
      } else {
        near.contacts.push(contact);
      }
    }

    self.buckets.push(far);
    self.buckets.push(near);
  }
}

impl fmt::Debug for RoutingTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RoutingTable")
      .field("local_id", &self.local_id)
      .field("buckets", &self.buckets.len())
      .field("contacts", &self.len())
      .finish()
  }
}

struct Bucket {
  // Ordered least- to most-recently seen.
  contacts: Vec<Contact>,
}

impl Bucket {
  fn new() -> Self {
    Self {
      contacts: Vec::with_capacity(BUCKET_SIZE),
    }
  }

  /// Move a known id to the most-recently-seen end, adopting the new
  /// endpoint. Returns false if the id is not in this bucket.
  fn refresh(&mut self, contact: Contact) -> bool {
    let Some(position) =
      self.contacts.iter().position(|c| c.id == contact.id)
    else {
      return false;
    };

    self.contacts.remove(position);
    self.contacts.push(contact);
    true
  }
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use pretty_assertions::assert_eq;

  use super::{AddOutcome, RoutingTable, BUCKET_SIZE};
  use crate::{
    contact::Contact,
    id::{NodeId, ID_LEN},
    test,
  };

  fn id_with_last_byte(value: u8) -> NodeId {
    let mut bytes = [0u8; ID_LEN];
    bytes[ID_LEN - 1] = value;
    bytes.into()
  }

  fn contact_with_last_byte(value: u8) -> Contact {
    Contact {
      id: id_with_last_byte(value),
      addr: SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881),
    }
  }

  #[test]
  fn positive_add_and_get() {
    let mut table = RoutingTable::new(test::dummy_node_id());
    let contact = Contact {
      id: test::dummy_node_id(),
      addr: test::dummy_socket_addr_v4(),
    };

    assert_eq!(table.add(contact), AddOutcome::Added);
    assert_eq!(table.get(&contact.id), Some(&contact));
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn positive_local_id_is_never_stored() {
    let local_id = test::dummy_node_id();
    let mut table = RoutingTable::new(local_id);

    let outcome = table.add(Contact {
      id: local_id,
      addr: test::dummy_socket_addr_v4(),
    });

    assert_eq!(outcome, AddOutcome::LocalId);
    assert_eq!(table.len(), 0);
  }

  #[test]
  fn positive_reinsert_refreshes_endpoint() {
    let mut table = RoutingTable::new(test::dummy_node_id());
    let id = test::dummy_node_id();

    let old_addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6881);
    let new_addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 6881);

    assert_eq!(table.add(Contact::new(id, old_addr)), AddOutcome::Added);
    assert_eq!(table.add(Contact::new(id, new_addr)), AddOutcome::Refreshed);

    assert_eq!(table.len(), 1);
    assert_eq!(table.get(&id).map(|c| c.addr), Some(new_addr));
  }

  #[test]
  fn positive_remove() {
    let mut table = RoutingTable::new(test::dummy_node_id());
    let contact = Contact {
      id: test::dummy_node_id(),
      addr: test::dummy_socket_addr_v4(),
    };

    table.add(contact);

    assert_eq!(table.remove(&contact.id), Some(contact));
    assert_eq!(table.remove(&contact.id), None);
    assert_eq!(table.len(), 0);
  }

  #[test]
  fn positive_no_bucket_overflows() {
    let local_id = NodeId::from([0u8; ID_LEN]);
    let mut table = RoutingTable::new(local_id);

    for _ in 0..1024 {
      table.add(Contact {
        id: test::dummy_node_id(),
        addr: test::dummy_socket_addr_v4(),
      });
    }

    for bucket in &table.buckets {
      assert!(bucket.contacts.len() <= BUCKET_SIZE);
    }
  }

  #[test]
  fn positive_no_duplicate_ids() {
    let mut table = RoutingTable::new(test::dummy_node_id());
    let contacts: Vec<_> = (1..=32).map(contact_with_last_byte).collect();

    for contact in &contacts {
      table.add(*contact);
    }
    for contact in &contacts {
      table.add(*contact);
    }

    let mut seen: Vec<_> = table
      .closest(&table.local_id(), usize::MAX)
      .iter()
      .map(|c| c.id)
      .collect();
    let total = seen.len();

    seen.sort();
    seen.dedup();

    assert_eq!(seen.len(), total);
  }

  #[test]
  fn positive_catch_all_bucket_splits() {
    // All ids share a long prefix with the local id, so they all land in
    // the catch-all bucket, which must keep splitting instead of dropping.
    let local_id = NodeId::from([0u8; ID_LEN]);
    let mut table = RoutingTable::new(local_id);

    // No distance-prefix class among 0x01..=0x10 exceeds BUCKET_SIZE, so
    // every insert must survive.
    for value in 1..=16 {
      assert_eq!(
        table.add(contact_with_last_byte(value)),
        AddOutcome::Added
      );
    }

    assert_eq!(table.len(), 16);
    assert!(table.bucket_count() > 1);
  }

  #[test]
  fn positive_full_interior_bucket_drops_newcomer() {
    let local_id = NodeId::from([0u8; ID_LEN]);
    let mut table = RoutingTable::new(local_id);

    // Distance prefix 0 (first bit set): an interior bucket once anything
    // deeper exists. 9 distinct such ids; the 9th must be dropped.
    for value in 1..=9u8 {
      let mut bytes = [0u8; ID_LEN];
      bytes[0] = 0x80;
      bytes[ID_LEN - 1] = value;

      table.add(Contact {
        id: bytes.into(),
        addr: test::dummy_socket_addr_v4(),
      });
    }

    // Force depth so bucket 0 is interior.
    for value in 1..=32 {
      table.add(contact_with_last_byte(value));
    }

    let mut bytes = [0u8; ID_LEN];
    bytes[0] = 0x80;
    bytes[ID_LEN - 1] = 0xff;

    let outcome = table.add(Contact {
      id: bytes.into(),
      addr: test::dummy_socket_addr_v4(),
    });

    assert_eq!(outcome, AddOutcome::Full);
  }

  #[test]
  fn positive_closest_is_sorted_and_bounded() {
    let mut table = RoutingTable::new(test::dummy_node_id());

    for _ in 0..64 {
      table.add(Contact {
        id: test::dummy_node_id(),
        addr: test::dummy_socket_addr_v4(),
      });
    }

    let target = test::dummy_node_id();
    let closest = table.closest(&target, 20);

    assert_eq!(closest.len(), 20.min(table.len()));

    for pair in closest.windows(2) {
      assert!(pair[0].id.distance(&target) <= pair[1].id.distance(&target));
    }

    // And it is the global minimum, not one bucket's worth.
    let all = table.closest(&target, usize::MAX);
    assert_eq!(&all[..closest.len()], &closest[..]);
  }

  #[test]
  fn positive_closest_xor_order_is_exact() {
    // Ten contacts 0x01..=0x0a, queried for 0x05: XOR, not arithmetic,
    // distance decides the order.
    let local_id = NodeId::from([0u8; ID_LEN]);
    let mut table = RoutingTable::new(local_id);

    for value in 1..=10 {
      table.add(contact_with_last_byte(value));
    }

    let target = id_with_last_byte(0x05);
    let closest = table.closest(&target, BUCKET_SIZE);

    let order: Vec<u8> = closest
      .iter()
      .map(|c| c.id.as_bytes()[ID_LEN - 1])
      .collect();

    assert_eq!(order, [0x05, 0x04, 0x07, 0x06, 0x01, 0x03, 0x02, 0x09]);
  }
}
