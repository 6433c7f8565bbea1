use serde::{Deserialize, Serialize};

use crate::id::{InfoHash, NodeId};

/// The four query verbs. Every query carries the sender's node id in `a.id`.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
#[serde(tag = "q", content = "a")]
#[serde(rename_all = "snake_case")]
pub enum Request {
  Ping(PingRequest),
  FindNode(FindNodeRequest),
  GetPeers(GetPeersRequest),
  AnnouncePeer(AnnouncePeerRequest),
}

impl Request {
  /// Id the requester advertises about itself.
  pub fn sender_id(&self) -> NodeId {
    match self {
      Self::Ping(request) => request.id,
      Self::FindNode(request) => request.id,
      Self::GetPeers(request) => request.id,
      Self::AnnouncePeer(request) => request.id,
    }
  }

  /// Is `name` one of the verbs this node serves?
  pub fn is_known_verb(name: &str) -> bool {
    matches!(name, "ping" | "find_node" | "get_peers" | "announce_peer")
  }
}

#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct PingRequest {
  pub id: NodeId,
}

#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct FindNodeRequest {
  pub id: NodeId,
  pub target: NodeId,
}

#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct GetPeersRequest {
  pub id: NodeId,
  pub info_hash: InfoHash,
}

#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct AnnouncePeerRequest {
  pub id: NodeId,
  pub info_hash: InfoHash,

  /// `None` means `implied_port`: the peer is reachable on the UDP source
  /// port of the query itself.
  #[serde(flatten, with = "port")]
  pub port: Option<u16>,

  #[serde(with = "serde_bytes")]
  pub token: Vec<u8>,
}

/// Helper to serialize/deserialize the `port`/`implied_port` pair.
///
/// `implied_port` present and non-zero wins over any `port` value; a query
/// with neither key is rejected.
mod port {
  use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

  #[derive(Serialize, Deserialize)]
  struct Wrapper {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,

    #[serde(
      default,
      skip_serializing_if = "is_false",
      deserialize_with = "deserialize_bool"
    )]
    implied_port: bool,
  }

  pub fn serialize<S: Serializer>(
    port: &Option<u16>,
    s: S,
  ) -> Result<S::Ok, S::Error> {
    Wrapper {
      implied_port: port.is_none(),
      port: *port,
    }
    .serialize(s)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    d: D,
  ) -> Result<Option<u16>, D::Error> {
    let wrapper = Wrapper::deserialize(d)?;

    if wrapper.implied_port {
      Ok(None)
    } else if wrapper.port.is_some() {
      Ok(wrapper.port)
    } else {
      Err(D::Error::missing_field("port"))
    }
  }

  fn is_false(b: &bool) -> bool {
    !*b
  }

  fn deserialize_bool<'de, D: Deserializer<'de>>(
    d: D,
  ) -> Result<bool, D::Error> {
    let num = u8::deserialize(d)?;
    Ok(num > 0)
  }
}
