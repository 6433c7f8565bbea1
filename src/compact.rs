//! Serde helpers for the BEP-5 "compact" encodings.
//!
//! Peers travel as a bencode list of 6-byte strings (`ipv4 ‖ port`), nodes
//! as a single byte string of concatenated 26-byte records
//! (`id ‖ ipv4 ‖ port`). Ports are big-endian. Both decoders are best
//! effort: a malformed entry never fails the surrounding message.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::id::NODE_ID_LEN;

const SOCKET_ADDR_LEN: usize = 6;
const NODE_RECORD_LEN: usize = NODE_ID_LEN + SOCKET_ADDR_LEN;

fn decode_socket_addr(src: &[u8]) -> Option<SocketAddrV4> {
  if src.len() != SOCKET_ADDR_LEN {
    return None;
  }

  let ip: [u8; 4] = src.get(..4)?.try_into().ok()?;
  let port = u16::from_be_bytes(src.get(4..)?.try_into().ok()?);

  Some(SocketAddrV4::new(Ipv4Addr::from(ip), port))
}

fn encode_socket_addr(addr: &SocketAddrV4) -> [u8; SOCKET_ADDR_LEN] {
  let mut buffer = [0; SOCKET_ADDR_LEN];
  buffer[..4].copy_from_slice(&addr.ip().octets());
  buffer[4..].copy_from_slice(&addr.port().to_be_bytes());
  buffer
}

/// Serialize/deserialize a `Vec` of peer endpoints as a list of 6-byte
/// strings (the `values` field of a `get_peers` response).
pub mod values {
  use std::net::SocketAddrV4;

  use serde::{de::Visitor, ser::SerializeSeq, Deserializer, Serializer};
  use serde_bytes::{ByteBuf, Bytes};

  pub fn serialize<S>(addrs: &[SocketAddrV4], s: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut seq = s.serialize_seq(Some(addrs.len()))?;
    for addr in addrs {
      seq.serialize_element(Bytes::new(&super::encode_socket_addr(addr)))?;
    }
    seq.end()
  }

  pub fn deserialize<'de, D>(d: D) -> Result<Vec<SocketAddrV4>, D::Error>
  where
    D: Deserializer<'de>,
  {
    struct SocketAddrsVisitor;

    impl<'de> Visitor<'de> for SocketAddrsVisitor {
      type Value = Vec<SocketAddrV4>;

      fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "list of byte strings")
      }

      fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
      where
        A: serde::de::SeqAccess<'de>,
      {
        let mut output = Vec::with_capacity(seq.size_hint().unwrap_or(0));

        while let Some(bytes) = seq.next_element::<ByteBuf>()? {
          // Entries of the wrong length (e.g. IPv6 peers) are skipped.
          if let Some(item) = super::decode_socket_addr(&bytes) {
            output.push(item);
          }
        }

        Ok(output)
      }
    }

    d.deserialize_seq(SocketAddrsVisitor)
  }
}

/// Serialize/deserialize a `Vec` of `Contact` as one concatenated byte
/// string of 26-byte records (the `nodes` field of a response).
pub mod nodes {
  use serde::{Deserialize, Deserializer, Serializer};
  use serde_bytes::ByteBuf;

  use crate::{contact::Contact, id::NodeId};

  pub fn serialize<S>(nodes: &[Contact], s: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut buffer = Vec::with_capacity(nodes.len() * super::NODE_RECORD_LEN);

    for node in nodes {
      buffer.extend(node.id.as_ref());
      buffer.extend(super::encode_socket_addr(&node.addr));
    }

    s.serialize_bytes(&buffer)
  }

  pub fn deserialize<'de, D>(d: D) -> Result<Vec<Contact>, D::Error>
  where
    D: Deserializer<'de>,
  {
    let buffer = ByteBuf::deserialize(d)?;
    let chunks = buffer.chunks_exact(super::NODE_RECORD_LEN);

    // A trailing partial record marks the whole field as garbage.
    if !chunks.remainder().is_empty() {
      return Ok(Vec::new());
    }

    let nodes = chunks
      .filter_map(|chunk| {
        let id = NodeId::try_from(&chunk[..super::NODE_ID_LEN]).ok()?;
        let addr = super::decode_socket_addr(&chunk[super::NODE_ID_LEN..])?;

        Some(Contact { id, addr })
      })
      .collect();

    Ok(nodes)
  }
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use pretty_assertions::assert_eq;
  use serde::{Deserialize, Serialize};

  use crate::{contact::Contact, test};

  #[derive(Serialize, Deserialize, PartialEq, Eq, Debug)]
  struct NodesWrapper(#[serde(with = "super::nodes")] Vec<Contact>);

  #[derive(Serialize, Deserialize, PartialEq, Eq, Debug)]
  struct ValuesWrapper(#[serde(with = "super::values")] Vec<SocketAddrV4>);

  #[test]
  fn positive_encode_socket_addr() {
    let addr = SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881);

    assert_eq!(
      super::encode_socket_addr(&addr),
      [0x01, 0x02, 0x03, 0x04, 0x1a, 0xe1]
    );
  }

  #[test]
  fn positive_socket_addr_round_trip() {
    let addr = SocketAddrV4::new(Ipv4Addr::new(9, 9, 9, 9), 54321);
    let encoded = super::encode_socket_addr(&addr);

    assert_eq!(super::decode_socket_addr(&encoded), Some(addr));
  }

  #[test]
  fn positive_nodes_round_trip() {
    let contacts: Vec<_> = (0..8)
      .map(|i| Contact {
        id: test::dummy_node_id(),
        addr: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, i), 6881 + i as u16),
      })
      .collect();

    let encoded = serde_bencoded::to_vec(&NodesWrapper(contacts.clone()))
      .unwrap();
    let decoded: NodesWrapper =
      serde_bencoded::from_bytes(&encoded).unwrap();

    assert_eq!(decoded.0, contacts);
  }

  #[test]
  fn positive_nodes_partial_record_discards_field() {
    // One full record plus a truncated one: the decoder throws the whole
    // field away rather than guessing at boundaries.
    let contact = Contact {
      id: test::dummy_node_id(),
      addr: test::dummy_socket_addr_v4(),
    };

    let mut encoded = serde_bencoded::to_vec(&NodesWrapper(vec![contact]))
      .unwrap();
    // "26:" becomes "30:" with 4 junk bytes appended.
    let mut raw = Vec::from(&b"30:"[..]);
    raw.extend_from_slice(&encoded.split_off(3));
    raw.extend_from_slice(&[1, 2, 3, 4]);

    let decoded: NodesWrapper = serde_bencoded::from_bytes(&raw).unwrap();

    assert_eq!(decoded.0, Vec::new());
  }

  #[test]
  fn positive_values_round_trip() {
    let addrs = vec![
      SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881),
      SocketAddrV4::new(Ipv4Addr::new(5, 6, 7, 8), 6881),
    ];

    let encoded = serde_bencoded::to_vec(&ValuesWrapper(addrs.clone()))
      .unwrap();

    assert_eq!(
      encoded,
      b"l6:\x01\x02\x03\x04\x1a\xe16:\x05\x06\x07\x08\x1a\xe1e"
    );

    let decoded: ValuesWrapper =
      serde_bencoded::from_bytes(&encoded).unwrap();

    assert_eq!(decoded.0, addrs);
  }

  #[test]
  fn positive_values_skips_malformed_entries() {
    // 6-byte, 18-byte (IPv6), 6-byte: the odd one out is dropped.
    let raw =
      b"l6:\x01\x02\x03\x04\x1a\xe118:aaaaaaaaaaaaaaaaaa6:\x05\x06\x07\x08\x1a\xe1e";
    let decoded: ValuesWrapper = serde_bencoded::from_bytes(raw).unwrap();

    assert_eq!(
      decoded.0,
      vec![
        SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881),
        SocketAddrV4::new(Ipv4Addr::new(5, 6, 7, 8), 6881),
      ]
    );
  }
}
