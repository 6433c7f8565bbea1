use std::collections::HashMap;
use std::net::SocketAddrV4;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::{
  builder::{Event, Warning},
  contact::Contact,
  id::{Id, InfoHash, NodeId},
  message::{
    error_code, AnnouncePeerRequest, Error, FindNodeRequest, GetPeersRequest,
    Message, MessageBody, PingRequest, RawMessage, Request, Response,
  },
  routing::table::{AddOutcome, RoutingTable, BUCKET_SIZE},
  storage::PeerStore,
  token::{TokenAuthority, ROTATE_SECRET_INTERVAL},
  transaction::{TransactionId, Transactions, REQUEST_TIMEOUT},
};

use super::{
  bootstrap::{TableBootstrap, BOOTSTRAP_RETRY_TIMEOUT},
  lookup::IterativeLookup,
  socket::Socket,
  timer::Timer,
  AnnouncePort, LookupMode, OneShotTask, RequestError, ScheduledTaskCheck,
  StartLookup, State,
};

/// Who is waiting on an in-flight query.
pub(crate) enum ProbeWaiter {
  /// A lookup counting the probe toward its frontier.
  Lookup(u64),
  /// Fire-and-forget `announce_peer`; only failures are interesting.
  Announce,
  /// An embedder awaiting the outcome of a one-shot query.
  Caller(oneshot::Sender<Result<(), RequestError>>),
}

/// The node's single worker task.
///
/// Owns the socket, the routing table, the peer store, the token secrets,
/// the transaction registry and the timer; every mutation happens on this
/// task between `select!` suspension points, so none of the state needs a
/// lock.
pub(crate) struct DhtHandler {
  socket: Socket,
  table: RoutingTable,
  store: PeerStore,
  tokens: TokenAuthority,
  transactions: Transactions<ProbeWaiter>,
  timer: Timer<ScheduledTaskCheck>,

  lookups: HashMap<u64, IterativeLookup>,
  next_lookup_id: u64,

  bootstrap: TableBootstrap,
  bootstrap_lookup: Option<u64>,
  bootstrapped: bool,
  bootstrap_waiters: HashMap<u64, oneshot::Sender<bool>>,
  next_waiter_id: u64,

  command_rx: mpsc::UnboundedReceiver<OneShotTask>,
  event_tx: mpsc::UnboundedSender<Event>,
}

impl DhtHandler {
  pub fn new(
    node_id: NodeId,
    socket: Socket,
    bootstrap: TableBootstrap,
    command_rx: mpsc::UnboundedReceiver<OneShotTask>,
    event_tx: mpsc::UnboundedSender<Event>,
  ) -> Self {
    Self {
      socket,
      table: RoutingTable::new(node_id),
      store: PeerStore::new(),
      tokens: TokenAuthority::new(),
      transactions: Transactions::new(),
      timer: Timer::new(),
      lookups: HashMap::new(),
      next_lookup_id: 0,
      bootstrap,
      bootstrap_lookup: None,
      bootstrapped: false,
      bootstrap_waiters: HashMap::new(),
      next_waiter_id: 0,
      command_rx,
      event_tx,
    }
  }

  pub async fn run(mut self) {
    self.emit(Event::Listening {
      port: self.socket.local_addr().port(),
    });

    self
      .timer
      .schedule_in(ROTATE_SECRET_INTERVAL, ScheduledTaskCheck::RotateSecrets);

    loop {
      tokio::select! {
        command = self.command_rx.recv() => {
          match command {
            Some(OneShotTask::Shutdown) | None => break,
            Some(command) => self.handle_command(command).await,
          }
        }
        token = self.timer.next(), if !self.timer.is_empty() => {
          if let Some(token) = token {
            self.handle_timeout(token).await;
          }
        }
        result = self.socket.recv() => {
          match result {
            Ok((bytes, addr)) => self.handle_incoming(&bytes, addr).await,
            Err(error) => {
              log::warn!("socket receive failed: {}", error);
              self.emit(Event::Error(error));
            }
          }
        }
      }
    }

    // Dropping the handler cancels every timer and pending transaction;
    // waiters see the closed channel as a shutdown.
    log::debug!("DHT handler shutting down");
  }

  fn emit(&self, event: Event) {
    let _ = self.event_tx.send(event);
  }

  fn state(&self) -> State {
    State {
      bootstrapped: self.bootstrapped,
      contact_count: self.table.len(),
      bucket_count: self.table.bucket_count(),
      pending_transaction_count: self.transactions.len(),
      stored_peer_count: self.store.len(),
    }
  }

  /// Learn about a node, announcing it on the event stream if it is new.
  fn add_contact(&mut self, contact: Contact) {
    if let AddOutcome::Added = self.table.add(contact) {
      self.emit(Event::Node {
        id: contact.id,
        addr: contact.addr,
      });
    }
  }

  /// Store a peer, announcing it on the event stream if it is new.
  fn store_peer(&mut self, info_hash: InfoHash, addr: SocketAddrV4) {
    if self.store.insert(info_hash, addr) {
      self.emit(Event::Peer { info_hash, addr });
    }
  }

  // ---------- commands ---------- //

  async fn handle_command(&mut self, command: OneShotTask) {
    match command {
      OneShotTask::StartBootstrap => self.start_bootstrap().await,
      OneShotTask::GetState(tx) => {
        let _ = tx.send(self.state());
      }
      OneShotTask::CheckBootstrap(tx, timeout) => {
        if self.bootstrapped {
          let _ = tx.send(true);
          return;
        }

        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.bootstrap_waiters.insert(id, tx);

        if let Some(timeout) = timeout {
          self
            .timer
            .schedule_in(timeout, ScheduledTaskCheck::BootstrapWaiterTimeout(id));
        }
      }
      OneShotTask::GetLocalAddr(tx) => {
        let _ = tx.send(self.socket.local_addr());
      }
      OneShotTask::Ping(addr, tx) => {
        let request = Request::Ping(PingRequest {
          id: self.table.local_id(),
        });
        self.send_query(addr, request, ProbeWaiter::Caller(tx)).await;
      }
      OneShotTask::StartLookup(StartLookup {
        target,
        mode,
        seeds,
        done,
      }) => {
        let id = self.create_lookup(target, mode, seeds, Some(done));
        self.drive_lookup(id).await;
      }
      OneShotTask::AddNode(contact) => self.add_contact(contact),
      OneShotTask::RemoveNode(id) => {
        self.table.remove(&id);
      }
      OneShotTask::AddPeer(info_hash, addr) => {
        self.store_peer(info_hash, addr);
      }
      OneShotTask::RemovePeer(info_hash, addr) => {
        self.store.remove(&info_hash, &addr);
      }
      // Handled by the run loop.
      OneShotTask::Shutdown => {}
    }
  }

  // ---------- timer ---------- //

  async fn handle_timeout(&mut self, token: ScheduledTaskCheck) {
    match token {
      ScheduledTaskCheck::TransactionTimeout { addr, tid } => {
        let Some(waiter) = self.transactions.expire(addr, tid) else {
          return;
        };

        log::debug!("query to {} timed out", addr);

        match waiter {
          ProbeWaiter::Lookup(lookup_id) => {
            if let Some(lookup) = self.lookups.get_mut(&lookup_id) {
              lookup.probe_completed();
            }
            self.drive_lookup(lookup_id).await;
          }
          ProbeWaiter::Announce => {}
          ProbeWaiter::Caller(tx) => {
            let _ = tx.send(Err(RequestError::Timeout));
          }
        }
      }
      ScheduledTaskCheck::RotateSecrets => {
        self.tokens.rotate();
        log::debug!("announce token secret rotated");

        self.timer.schedule_in(
          ROTATE_SECRET_INTERVAL,
          ScheduledTaskCheck::RotateSecrets,
        );
      }
      ScheduledTaskCheck::BootstrapRetry => {
        if !self.bootstrapped && self.table.is_empty() {
          log::info!(
            "routing table still empty after bootstrap attempt {}, retrying",
            self.bootstrap.attempt()
          );
          self.start_bootstrap().await;
        }
      }
      ScheduledTaskCheck::BootstrapWaiterTimeout(id) => {
        if let Some(tx) = self.bootstrap_waiters.remove(&id) {
          let _ = tx.send(false);
        }
      }
    }
  }

  // ---------- bootstrap ---------- //

  async fn start_bootstrap(&mut self) {
    let seeds = self.bootstrap.resolve_seeds().await;
    let target = self.table.local_id();

    let id = self.create_lookup(target, LookupMode::FindNode, seeds, None);
    self.bootstrap_lookup = Some(id);

    if self.bootstrap.has_seeds() {
      self
        .timer
        .schedule_in(BOOTSTRAP_RETRY_TIMEOUT, ScheduledTaskCheck::BootstrapRetry);
    }

    self.drive_lookup(id).await;
  }

  fn finish_bootstrap(&mut self) {
    self.bootstrap_lookup = None;

    if self.table.is_empty() && self.bootstrap.has_seeds() {
      // The retry timer scheduled at start will try again.
      log::info!(
        "bootstrap attempt {} found no nodes",
        self.bootstrap.attempt()
      );
      return;
    }

    self.bootstrapped = true;
    log::info!("bootstrap complete, {} nodes in routing table", self.table.len());

    for (_, tx) in self.bootstrap_waiters.drain() {
      let _ = tx.send(true);
    }
  }

  // ---------- lookups ---------- //

  fn create_lookup(
    &mut self,
    target: Id,
    mode: LookupMode,
    seeds: Vec<SocketAddrV4>,
    done: Option<oneshot::Sender<()>>,
  ) -> u64 {
    let id = self.next_lookup_id;
    self.next_lookup_id += 1;

    self
      .lookups
      .insert(id, IterativeLookup::new(target, mode, seeds, done));

    id
  }

  /// Issue probes until the α cap or candidate exhaustion, then complete
  /// the lookup if it has converged.
  async fn drive_lookup(&mut self, lookup_id: u64) {
    loop {
      let (addr, request) = {
        let Some(lookup) = self.lookups.get_mut(&lookup_id) else {
          return;
        };

        let Some(addr) = lookup.next_probe(&self.table) else {
          break;
        };

        let request = match lookup.mode() {
          LookupMode::FindNode => Request::FindNode(FindNodeRequest {
            id: self.table.local_id(),
            target: lookup.target(),
          }),
          LookupMode::GetPeers { .. } => Request::GetPeers(GetPeersRequest {
            id: self.table.local_id(),
            info_hash: lookup.target(),
          }),
        };

        (addr, request)
      };

      self
        .send_query(addr, request, ProbeWaiter::Lookup(lookup_id))
        .await;
    }

    let complete = self
      .lookups
      .get(&lookup_id)
      .map(|lookup| lookup.is_complete(&self.table))
      .unwrap_or(false);

    if complete {
      self.finish_lookup(lookup_id).await;
    }
  }

  async fn finish_lookup(&mut self, lookup_id: u64) {
    let Some(mut lookup) = self.lookups.remove(&lookup_id) else {
      return;
    };

    if let LookupMode::GetPeers {
      announce: Some(port),
    } = lookup.mode()
    {
      let info_hash = lookup.target();

      for (addr, token) in lookup.announce_targets(BUCKET_SIZE) {
        let request = Request::AnnouncePeer(AnnouncePeerRequest {
          id: self.table.local_id(),
          info_hash,
          port: match port {
            AnnouncePort::Implied => None,
            AnnouncePort::Explicit(port) => Some(port),
          },
          token,
        });

        self.send_query(addr, request, ProbeWaiter::Announce).await;
      }
    }

    if self.bootstrap_lookup == Some(lookup_id) {
      self.finish_bootstrap();
    }

    if let Some(done) = lookup.take_done() {
      let _ = done.send(());
    }
  }

  // ---------- sending ---------- //

  async fn send_query(
    &mut self,
    addr: SocketAddrV4,
    request: Request,
    waiter: ProbeWaiter,
  ) {
    let tid = self.transactions.allocate(addr);
    let timeout = self.timer.schedule_in(
      REQUEST_TIMEOUT,
      ScheduledTaskCheck::TransactionTimeout { addr, tid },
    );
    self.transactions.insert(addr, tid, waiter, timeout);

    let message = Message {
      transaction_id: tid.to_bytes().to_vec(),
      body: MessageBody::Request(request),
    };

    if let Err(error) = self.socket.send(&message, addr).await {
      // The armed timeout turns the silence into a progress tick for
      // whoever is waiting.
      log::debug!("failed to send query to {}: {}", addr, error);
    }
  }

  async fn send_response(
    &mut self,
    transaction_id: Vec<u8>,
    response: Response,
    addr: SocketAddrV4,
  ) {
    let message = Message {
      transaction_id,
      body: MessageBody::Response(response),
    };

    if let Err(error) = self.socket.send(&message, addr).await {
      log::debug!("failed to send response to {}: {}", addr, error);
    }
  }

  async fn send_error(
    &mut self,
    transaction_id: Vec<u8>,
    code: u8,
    message: impl Into<String>,
    addr: SocketAddrV4,
  ) {
    let message = Message {
      transaction_id,
      body: MessageBody::Error(Error {
        code,
        message: message.into(),
      }),
    };

    if let Err(error) = self.socket.send(&message, addr).await {
      log::debug!("failed to send error reply to {}: {}", addr, error);
    }
  }

  // ---------- ingress ---------- //

  async fn handle_incoming(&mut self, bytes: &[u8], addr: SocketAddrV4) {
    match Message::decode(bytes) {
      Ok(message) => match message.body {
        MessageBody::Request(request) => {
          self
            .handle_request(message.transaction_id, request, addr)
            .await
        }
        MessageBody::Response(response) => {
          self
            .handle_response(message.transaction_id, response, addr)
            .await
        }
        MessageBody::Error(error) => {
          self
            .handle_remote_error(message.transaction_id, error, addr)
            .await
        }
      },
      Err(_) => self.handle_malformed(bytes, addr).await,
    }
  }

  /// A datagram that failed the full decode. Queries still get a framed
  /// error reply when the outer envelope is readable; everything else is
  /// dropped, silently for replies, with a warning for alien `y` values.
  async fn handle_malformed(&mut self, bytes: &[u8], addr: SocketAddrV4) {
    let Some(raw) = RawMessage::decode(bytes) else {
      log::debug!("dropping undecodable datagram from {}", addr);
      return;
    };

    match raw.y.as_str() {
      "q" => match raw.q.as_deref() {
        Some(name) if Request::is_known_verb(name) => {
          self
            .send_error(
              raw.transaction_id,
              error_code::PROTOCOL_ERROR,
              "invalid arguments",
              addr,
            )
            .await;
        }
        Some(name) => {
          self
            .send_error(
              raw.transaction_id,
              error_code::METHOD_UNKNOWN,
              format!("unexpected query type {}", name),
              addr,
            )
            .await;
        }
        None => {
          self
            .send_error(
              raw.transaction_id,
              error_code::PROTOCOL_ERROR,
              "missing query type",
              addr,
            )
            .await;
        }
      },
      // A malformed reply; the sender is untrusted, drop it.
      "r" | "e" => {}
      other => {
        log::warn!("unrecognized message type {:?} from {}", other, addr);
        self.emit(Event::Warning(Warning::UnknownMessageType {
          addr,
          message_type: other.to_owned(),
        }));
      }
    }
  }

  // ---------- server side ---------- //

  async fn handle_request(
    &mut self,
    transaction_id: Vec<u8>,
    request: Request,
    addr: SocketAddrV4,
  ) {
    // The sender advertised its id: remember it.
    self.add_contact(Contact::new(request.sender_id(), addr));

    let local_id = self.table.local_id();

    let response = match request {
      Request::Ping(_) => Response::new(local_id),
      Request::FindNode(FindNodeRequest { target, .. }) => Response {
        id: local_id,
        values: Vec::new(),
        nodes: self.table.closest(&target, BUCKET_SIZE),
        token: None,
      },
      Request::GetPeers(GetPeersRequest { info_hash, .. }) => {
        let token = self.tokens.issue(*addr.ip());
        let peers = self.store.get(&info_hash).to_vec();

        if peers.is_empty() {
          Response {
            id: local_id,
            values: Vec::new(),
            nodes: self.table.closest(&info_hash, BUCKET_SIZE),
            token: Some(token),
          }
        } else {
          Response {
            id: local_id,
            values: peers,
            nodes: Vec::new(),
            token: Some(token),
          }
        }
      }
      Request::AnnouncePeer(AnnouncePeerRequest {
        info_hash,
        port,
        token,
        ..
      }) => {
        if !self.tokens.verify(&token, *addr.ip()) {
          return self
            .send_error(
              transaction_id,
              error_code::PROTOCOL_ERROR,
              "cannot announce_peer with bad token",
              addr,
            )
            .await;
        }

        let port = port.unwrap_or_else(|| addr.port());

        if port == 0 || port == u16::MAX {
          return self
            .send_error(
              transaction_id,
              error_code::PROTOCOL_ERROR,
              "invalid port",
              addr,
            )
            .await;
        }

        self.store_peer(info_hash, SocketAddrV4::new(*addr.ip(), port));

        Response::new(local_id)
      }
    };

    self.send_response(transaction_id, response, addr).await;
  }

  // ---------- client side ---------- //

  async fn handle_response(
    &mut self,
    transaction_id: Vec<u8>,
    response: Response,
    addr: SocketAddrV4,
  ) {
    let matched = TransactionId::from_bytes(&transaction_id)
      .and_then(|tid| self.transactions.resolve(addr, tid));

    let Some((waiter, timeout)) = matched else {
      // A reply nobody asked for.
      self
        .send_error(
          transaction_id,
          error_code::GENERIC_ERROR,
          "unexpected message",
          addr,
        )
        .await;
      return;
    };

    self.timer.cancel(timeout);

    // Eagerly ingest everything the response teaches us.
    self.add_contact(Contact::new(response.id, addr));
    for contact in &response.nodes {
      self.add_contact(*contact);
    }

    match waiter {
      ProbeWaiter::Lookup(lookup_id) => {
        let values_for = match self.lookups.get_mut(&lookup_id) {
          Some(lookup) => {
            lookup.probe_completed();

            if let LookupMode::GetPeers { .. } = lookup.mode() {
              if let Some(token) = &response.token {
                lookup
                  .record_token(Contact::new(response.id, addr), token.clone());
              }
              Some(lookup.target())
            } else {
              None
            }
          }
          None => None,
        };

        if let Some(info_hash) = values_for {
          for peer in &response.values {
            self.store_peer(info_hash, *peer);
          }
        }

        self.drive_lookup(lookup_id).await;
      }
      ProbeWaiter::Announce => {}
      ProbeWaiter::Caller(tx) => {
        let _ = tx.send(Ok(()));
      }
    }
  }

  async fn handle_remote_error(
    &mut self,
    transaction_id: Vec<u8>,
    error: Error,
    addr: SocketAddrV4,
  ) {
    let matched = TransactionId::from_bytes(&transaction_id)
      .and_then(|tid| self.transactions.resolve(addr, tid));

    let Some((waiter, timeout)) = matched else {
      log::warn!(
        "unsolicited error from {}: {} {}",
        addr,
        error.code,
        error.message
      );
      self.emit(Event::Warning(Warning::UnsolicitedError {
        addr,
        code: error.code,
        message: error.message,
      }));
      return;
    };

    self.timer.cancel(timeout);

    match waiter {
      ProbeWaiter::Lookup(lookup_id) => {
        // An error reply still counts as a completed probe.
        if let Some(lookup) = self.lookups.get_mut(&lookup_id) {
          lookup.probe_completed();
        }
        self.drive_lookup(lookup_id).await;
      }
      ProbeWaiter::Announce => {
        log::debug!(
          "announce_peer rejected by {}: {} {}",
          addr,
          error.code,
          error.message
        );
      }
      ProbeWaiter::Caller(tx) => {
        let _ = tx.send(Err(RequestError::Remote {
          code: error.code,
          message: error.message,
        }));
      }
    }
  }
}
