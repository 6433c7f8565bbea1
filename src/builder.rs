use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use thiserror::Error;
use tokio::{
  net::UdpSocket,
  sync::{mpsc, oneshot},
  task,
};

use crate::{
  contact::Contact,
  id::{Id, InfoHash, NodeId},
  router,
  worker::{
    bootstrap::TableBootstrap, handler::DhtHandler, socket::Socket,
    AnnouncePort, LookupMode, OneShotTask, RequestError, StartLookup, State,
  },
};

/// Handle to a running DHT node.
///
/// The node itself is a single spawned task; this type is a cheap clonable
/// front over its command channel, so operations can be issued from any
/// task. Once the node shuts down every operation turns into a no-op.
#[derive(Clone)]
pub struct Dht {
  send: mpsc::UnboundedSender<OneShotTask>,
}

impl Dht {
  pub fn builder() -> DhtBuilder {
    DhtBuilder {
      node_id: None,
      routers: router::DEFAULT_ROUTERS
        .iter()
        .map(|r| (*r).to_owned())
        .collect(),
      nodes: HashSet::new(),
    }
  }

  /// Snapshot of the node's internals, for debugging.
  pub async fn state(&self) -> Option<State> {
    let (tx, rx) = oneshot::channel();

    if self.send.send(OneShotTask::GetState(tx)).is_err() {
      return None;
    }

    rx.await.ok()
  }

  /// Wait until the initial bootstrap completes (true), the node shuts
  /// down, or the optional timeout expires (false). Returns immediately if
  /// the bootstrap already finished.
  pub async fn bootstrapped(&self, timeout: Option<Duration>) -> bool {
    let (tx, rx) = oneshot::channel();

    if self
      .send
      .send(OneShotTask::CheckBootstrap(tx, timeout))
      .is_err()
    {
      return false;
    }

    rx.await.unwrap_or(false)
  }

  /// The address the node's UDP socket is bound to.
  pub async fn local_addr(&self) -> io::Result<SocketAddrV4> {
    fn error() -> io::Error {
      io::Error::new(io::ErrorKind::Other, "DHT node has shut down")
    }

    let (tx, rx) = oneshot::channel();

    self
      .send
      .send(OneShotTask::GetLocalAddr(tx))
      .map_err(|_| error())?;

    rx.await.map_err(|_| error())
  }

  /// One-shot `ping` query, resolving when the node replies, errors or
  /// stays silent for the request timeout.
  pub async fn ping(&self, addr: SocketAddrV4) -> Result<(), RequestError> {
    let (tx, rx) = oneshot::channel();

    self
      .send
      .send(OneShotTask::Ping(addr, tx))
      .map_err(|_| RequestError::Shutdown)?;

    rx.await.map_err(|_| RequestError::Shutdown)?
  }

  /// Run an iterative lookup for `target`.
  ///
  /// Discovered nodes and peers surface as [`Event::Node`]/[`Event::Peer`]
  /// while the search runs. Resolves with true on convergence, false if
  /// the node shut down first.
  pub async fn lookup(&self, target: Id, options: LookupOptions) -> bool {
    let mode = if options.find_node {
      LookupMode::FindNode
    } else {
      LookupMode::GetPeers { announce: None }
    };

    self.run_lookup(target, mode, options.seeds).await
  }

  /// Locate the nodes responsible for `info_hash` and announce ourselves
  /// to them as a peer. `port: None` announces with `implied_port`, i.e.
  /// the UDP source port the receivers observe.
  pub async fn announce(
    &self,
    info_hash: InfoHash,
    port: Option<u16>,
  ) -> bool {
    let announce = Some(match port {
      Some(port) => AnnouncePort::Explicit(port),
      None => AnnouncePort::Implied,
    });

    self
      .run_lookup(info_hash, LookupMode::GetPeers { announce }, Vec::new())
      .await
  }

  async fn run_lookup(
    &self,
    target: Id,
    mode: LookupMode,
    seeds: Vec<SocketAddrV4>,
  ) -> bool {
    let (tx, rx) = oneshot::channel();

    if self
      .send
      .send(OneShotTask::StartLookup(StartLookup {
        target,
        mode,
        seeds,
        done: tx,
      }))
      .is_err()
    {
      return false;
    }

    rx.await.is_ok()
  }

  /// Seed the routing table with a known contact.
  pub fn add_node(&self, id: NodeId, addr: SocketAddrV4) {
    let _ = self.send.send(OneShotTask::AddNode(Contact::new(id, addr)));
  }

  pub fn remove_node(&self, id: NodeId) {
    let _ = self.send.send(OneShotTask::RemoveNode(id));
  }

  /// Record a peer for `info_hash` as if it had announced to us.
  pub fn add_peer(&self, info_hash: InfoHash, addr: SocketAddrV4) {
    let _ = self.send.send(OneShotTask::AddPeer(info_hash, addr));
  }

  pub fn remove_peer(&self, info_hash: InfoHash, addr: SocketAddrV4) {
    let _ = self.send.send(OneShotTask::RemovePeer(info_hash, addr));
  }

  /// Stop the node: cancels every timer and pending query, closes the
  /// socket and ends the event stream. Idempotent.
  pub fn shutdown(&self) {
    let _ = self.send.send(OneShotTask::Shutdown);
  }
}

/// Options for [`Dht::lookup`].
#[derive(Clone, Debug, Default)]
pub struct LookupOptions {
  /// Probe with `find_node` instead of `get_peers`.
  pub find_node: bool,

  /// Endpoints to seed the search with, ahead of the routing table.
  pub seeds: Vec<SocketAddrV4>,
}

/// Stores information for initializing a DHT node.
#[derive(Debug)]
pub struct DhtBuilder {
  node_id: Option<NodeId>,
  routers: Vec<String>,
  nodes: HashSet<SocketAddrV4>,
}

impl DhtBuilder {
  /// Set the id of this node. If not provided, a random node id is
  /// generated.
  pub fn set_node_id(mut self, id: NodeId) -> DhtBuilder {
    self.node_id = Some(id);
    self
  }

  /// Add a node which will seed our routing table during bootstrap.
  pub fn add_node(mut self, node_addr: SocketAddrV4) -> DhtBuilder {
    self.nodes.insert(node_addr);
    self
  }

  /// Add a router which will let us gather nodes if our routing table is
  /// ever empty. Routers are hostname:port strings resolved at bootstrap
  /// time.
  pub fn add_router(mut self, router: impl Into<String>) -> DhtBuilder {
    self.routers.push(router.into());
    self
  }

  /// Add routers. Same as calling `add_router` multiple times but more
  /// convenient in some cases.
  pub fn add_routers<I, T>(mut self, routers: I) -> DhtBuilder
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    self.routers.extend(routers.into_iter().map(|r| r.into()));
    self
  }

  /// Drop the default public router list. A node built with no routers and
  /// no seed nodes starts its own network and is immediately bootstrapped.
  pub fn clear_routers(mut self) -> DhtBuilder {
    self.routers.clear();
    self
  }

  /// Bind a UDP socket and start the node. With `port: None` an ephemeral
  /// port is chosen; the effective port arrives as [`Event::Listening`].
  pub async fn listen(
    self,
    port: Option<u16>,
  ) -> io::Result<(Dht, EventStream)> {
    let socket =
      UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port.unwrap_or(0))).await?;
    self.start(socket)
  }

  /// Start the node on an already-bound socket.
  /// Fails only if `socket.local_addr()` fails or the socket is not IPv4.
  pub fn start(self, socket: UdpSocket) -> io::Result<(Dht, EventStream)> {
    let socket = Socket::new(socket)?;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let handler = DhtHandler::new(
      self.node_id.unwrap_or_else(NodeId::random),
      socket,
      TableBootstrap::new(self.routers, self.nodes),
      command_rx,
      event_tx,
    );

    if command_tx.send(OneShotTask::StartBootstrap).is_err() {
      // The corresponding receiver definitely exists at this point inside
      // the handler.
      unreachable!()
    }

    task::spawn(handler.run());

    Ok((Dht { send: command_tx }, EventStream(event_rx)))
  }
}

/// What the node tells its embedder.
#[derive(Debug)]
pub enum Event {
  /// The socket is bound and the node is accepting datagrams.
  Listening { port: u16 },
  /// A new contact entered the routing table.
  Node { id: NodeId, addr: SocketAddrV4 },
  /// A new peer entry was learned, by announce or by lookup.
  Peer {
    info_hash: InfoHash,
    addr: SocketAddrV4,
  },
  /// Something off-protocol happened that was safe to ignore.
  Warning(Warning),
  /// The socket failed underneath us; the node keeps running but may be
  /// deaf until the condition clears.
  Error(io::Error),
}

/// Non-fatal protocol anomalies surfaced as [`Event::Warning`].
#[derive(Clone, Debug, Error)]
pub enum Warning {
  #[error("unsolicited error reply from {addr}: {code} {message}")]
  UnsolicitedError {
    addr: SocketAddrV4,
    code: u8,
    message: String,
  },

  #[error("unrecognized message type {message_type:?} from {addr}")]
  UnknownMessageType {
    addr: SocketAddrV4,
    message_type: String,
  },
}

/// Stream of [`Event`]s emitted by a running node. Ends when the node
/// shuts down.
#[must_use = "streams do nothing unless polled"]
pub struct EventStream(mpsc::UnboundedReceiver<Event>);

impl Stream for EventStream {
  type Item = Event;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> std::task::Poll<Option<Self::Item>> {
    Pin::new(&mut self.0).poll_recv(cx)
  }
}
