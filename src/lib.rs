//! A BitTorrent Mainline DHT node ([BEP-5]).
//!
//! Trackerless peer discovery: given a 20-byte torrent info hash, the node
//! locates other peers sharing that torrent by iteratively querying
//! closer-and-closer DHT participants over a bencoded UDP wire protocol.
//! It also serves its own slice of the keyspace, answering `ping`,
//! `find_node`, `get_peers` and `announce_peer` from the installed base.
//!
//! The node runs as a single spawned task owning all of its state; the
//! [`Dht`] handle issues operations and an [`EventStream`] reports what the
//! node learns.
//!
//! [BEP-5]: https://www.bittorrent.org/beps/bep_0005.html

pub mod compact;
pub mod id;
pub mod message;
pub mod router;
pub mod routing;

pub mod test;

mod builder;
mod contact;
mod storage;
mod token;
mod transaction;
mod worker;

pub use crate::{
  builder::{Dht, DhtBuilder, Event, EventStream, LookupOptions, Warning},
  contact::Contact,
  id::{Id, InfoHash, LengthError, NodeId},
  worker::{RequestError, State},
};
