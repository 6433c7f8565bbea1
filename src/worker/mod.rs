use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
  contact::Contact,
  id::{Id, InfoHash, NodeId},
  transaction::TransactionId,
};

pub(crate) mod bootstrap;
pub(crate) mod handler;
pub(crate) mod lookup;
pub(crate) mod socket;
pub(crate) mod timer;

/// Snapshot of the node's internals, for debugging and tests.
#[derive(Copy, Clone, Debug)]
pub struct State {
  pub bootstrapped: bool,
  pub contact_count: usize,
  pub bucket_count: usize,
  pub pending_transaction_count: usize,
  pub stored_peer_count: usize,
}

/// Why an awaited query did not produce a normal reply.
#[derive(Debug, Error)]
pub enum RequestError {
  #[error("no response within the timeout")]
  Timeout,

  #[error("remote node replied with error {code}: {message}")]
  Remote { code: u8, message: String },

  #[error("node has been shut down")]
  Shutdown,
}

#[derive(Debug, Error)]
pub(crate) enum WorkerError {
  #[error("invalid bencode data")]
  InvalidBencodeSer(#[source] serde_bencoded::SerError),

  #[error("socket error")]
  SocketError(#[from] io::Error),
}

/// Work the timer can hand back to the handler.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ScheduledTaskCheck {
  /// A sent query has gone unanswered for the full timeout.
  TransactionTimeout {
    addr: SocketAddrV4,
    tid: TransactionId,
  },
  /// Shift the announce-token secrets one generation.
  RotateSecrets,
  /// Re-run the bootstrap if the routing table is still empty.
  BootstrapRetry,
  /// Give up on one `bootstrapped()` waiter.
  BootstrapWaiterTimeout(u64),
}

/// Commands sent from the `Dht` handle into the handler task.
pub(crate) enum OneShotTask {
  StartBootstrap,
  GetState(oneshot::Sender<State>),
  CheckBootstrap(oneshot::Sender<bool>, Option<Duration>),
  GetLocalAddr(oneshot::Sender<SocketAddrV4>),
  Ping(SocketAddrV4, oneshot::Sender<Result<(), RequestError>>),
  StartLookup(StartLookup),
  AddNode(Contact),
  RemoveNode(NodeId),
  AddPeer(InfoHash, SocketAddrV4),
  RemovePeer(InfoHash, SocketAddrV4),
  Shutdown,
}

pub(crate) struct StartLookup {
  pub target: Id,
  pub mode: LookupMode,
  pub seeds: Vec<SocketAddrV4>,
  pub done: oneshot::Sender<()>,
}

/// Which probe a lookup sends, and what happens when it converges.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum LookupMode {
  FindNode,
  GetPeers { announce: Option<AnnouncePort> },
}

/// Port to advertise when announcing after a `get_peers` lookup.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum AnnouncePort {
  /// Let the receivers use the UDP source port they observe.
  Implied,
  Explicit(u16),
}
