use std::net::SocketAddrV4;

use serde::{Deserialize, Serialize};

use crate::{compact, contact::Contact, id::NodeId};

/// Body of a `y = "r"` reply. One shape serves all four verbs: absent
/// fields are simply omitted from the dictionary.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Response {
  pub id: NodeId,

  /// Peer endpoints for the requested info hash (`get_peers` hit).
  #[serde(
    with = "compact::values",
    default,
    skip_serializing_if = "Vec::is_empty"
  )]
  pub values: Vec<SocketAddrV4>,

  /// Closest contacts to the requested target (`find_node`, or a
  /// `get_peers` miss).
  #[serde(
    with = "compact::nodes",
    default,
    skip_serializing_if = "Vec::is_empty"
  )]
  pub nodes: Vec<Contact>,

  /// Announce token, present only in `get_peers` replies.
  #[serde(
    with = "serde_bytes",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub token: Option<Vec<u8>>,
}

impl Response {
  /// Reply carrying nothing but our id (`ping`, `announce_peer`).
  pub fn new(id: NodeId) -> Self {
    Self {
      id,
      values: Vec::new(),
      nodes: Vec::new(),
      token: None,
    }
  }
}
