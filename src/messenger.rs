//! The messenger: broadcast, per-peer sender/receiver tasks, inbound
//! dispatch, and client replies.
//!
//! One [`Messenger`] value owns every process-wide resource of the core —
//! sockets, queues, metrics, scenario flags — and is created once by `main`
//! and shared from there. Start-up mirrors the protocol stack's boot
//! order: [`Messenger::initialize`] builds the endpoint table,
//! [`Messenger::start_senders`] spawns the per-peer transmit loops, and
//! [`Messenger::subscribe`] spawns the inbound receivers.

use {
    crate::{
        auth::ThresholdAuth,
        byzantine,
        config::{MessengerConfig, Scenario},
        dispatch::Routes,
        error::{fatal, Result},
        message::{encode, ClientId, ClientReply, NetMessage, PeerId},
        metrics::{TrafficMetrics, TrafficSnapshot},
        transport::{read_frame, write_frame, Endpoints, ResponsePublisher},
    },
    log::{debug, info, warn},
    std::{collections::HashMap, sync::Arc},
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
        time::timeout,
    },
};

/// The messaging and dispatch core.
pub struct Messenger {
    config: MessengerConfig,
    auth: Arc<dyn ThresholdAuth>,
    routes: Arc<Routes>,
    metrics: Arc<TrafficMetrics>,
    /// Handoff queue to each peer's sender task. Never contains `config.id`.
    outbound: HashMap<PeerId, mpsc::Sender<NetMessage>>,
    /// Consumer sides of `outbound`, drained by `start_senders`.
    outbound_rxs: HashMap<PeerId, mpsc::Receiver<NetMessage>>,
    /// Connected outbound streams, drained by `start_senders`.
    send_links: HashMap<PeerId, TcpStream>,
    /// Per-peer receive listeners, drained by `subscribe`.
    peer_listeners: HashMap<PeerId, TcpListener>,
    /// Per-client request listeners, drained by `subscribe`.
    server_listeners: HashMap<ClientId, TcpListener>,
    /// Per-client reply publishers.
    response_pubs: HashMap<ClientId, ResponsePublisher>,
}

impl Messenger {
    /// Bind and connect every endpoint and build the routing surface.
    ///
    /// Any bind or connect failure is a setup error and is returned for
    /// the caller to treat as fatal.
    pub async fn initialize(
        config: MessengerConfig,
        auth: Arc<dyn ThresholdAuth>,
    ) -> Result<Self> {
        let Endpoints {
            send_links,
            peer_listeners,
            server_listeners,
            response_pubs,
        } = Endpoints::initialize(&config).await?;

        let (outbound, outbound_rxs) = outbound_queues(&config);
        Ok(Self {
            routes: Arc::new(Routes::new(
                config.instance_queue_depth,
                config.request_queue_depth,
            )),
            metrics: Arc::new(TrafficMetrics::new()),
            config,
            auth,
            outbound,
            outbound_rxs,
            send_links,
            peer_listeners,
            server_listeners,
            response_pubs,
        })
    }

    /// The delivery-queue surface consumed by the consensus layer.
    pub fn routes(&self) -> Arc<Routes> {
        Arc::clone(&self.routes)
    }

    /// Read the traffic counters.
    pub fn traffic(&self) -> TrafficSnapshot {
        self.metrics.snapshot()
    }

    /// The active configuration.
    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    // ── Outbound pipeline ───────────────────────────────────────────────

    /// Broadcast a message to all other replicas.
    ///
    /// Applies the Byzantine injector per recipient, then hands the frame
    /// to each peer's sender task. A handoff that cannot complete within
    /// `send_timeout` is silently dropped for that peer; the remaining
    /// peers are unaffected.
    pub async fn broadcast(&self, message: NetMessage) {
        if self.config.scenario == Scenario::Idle && self.config.byzantine {
            return;
        }

        for i in 0..self.config.n {
            if i == self.config.id {
                continue; // Not myself.
            }

            let outgoing = match byzantine::inject(
                &message,
                i,
                self.config.scenario,
                self.config.byzantine,
                self.auth.as_ref(),
            ) {
                Ok(Some(mutated)) => mutated,
                Ok(None) => message.clone(),
                Err(e) => fatal("byzantine injector", &e),
            };

            let Some(tx) = self.outbound.get(&i) else {
                continue;
            };
            if timeout(self.config.send_timeout, tx.send(outgoing))
                .await
                .is_err()
            {
                debug!("handoff to peer {i} timed out, message dropped");
            }
        }
    }

    /// Spawn one sender task per peer.
    ///
    /// Each task serializes envelopes from its handoff queue, writes the
    /// frame, and blocks on the peer's ACK before the next send — the
    /// stream is lock-step, so a single task per peer serializes access
    /// while keeping peers concurrent with each other.
    pub fn start_senders(&mut self) {
        let links = std::mem::take(&mut self.send_links);
        for (peer, mut stream) in links {
            let Some(mut rx) = self.outbound_rxs.remove(&peer) else {
                continue;
            };
            let metrics = Arc::clone(&self.metrics);
            let max = self.config.max_frame_size;
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    let bytes = match message.serialize() {
                        Ok(bytes) => bytes,
                        Err(e) => fatal("serialize outbound message", &e),
                    };
                    if let Err(e) = write_frame(&mut stream, &bytes, max).await {
                        fatal("send to peer", &e);
                    }
                    if let Err(e) = read_frame(&mut stream, max).await {
                        fatal("ack from peer", &e);
                    }
                    info!("SENT {} to {peer}", message.msg_type);
                    metrics.record_send(bytes.len());
                }
            });
        }
    }

    // ── Inbound dispatcher ──────────────────────────────────────────────

    /// Spawn the per-peer receivers and per-client request servers.
    ///
    /// Each inbound frame is handed to a detached handler before the ACK
    /// goes back, so demultiplexing never stalls the peer's lock-step
    /// stream. The handler itself blocks on the instance queue — that is
    /// the back-pressure path into the network.
    pub fn subscribe(&mut self) {
        let listeners = std::mem::take(&mut self.peer_listeners);
        for (peer, listener) in listeners {
            let routes = Arc::clone(&self.routes);
            let auth = Arc::clone(&self.auth);
            let max = self.config.max_frame_size;
            tokio::spawn(async move {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => fatal(&format!("accept link from peer {peer}"), &e.into()),
                };
                loop {
                    let frame = match read_frame(&mut stream, max).await {
                        Ok(frame) => frame,
                        Err(e) => fatal(&format!("receive from peer {peer}"), &e),
                    };

                    let routes = Arc::clone(&routes);
                    let auth = Arc::clone(&auth);
                    tokio::spawn(async move {
                        if let Err(e) = handle_message(&routes, auth.as_ref(), &frame).await {
                            fatal("handle message", &e);
                        }
                    });

                    if let Err(e) = write_frame(&mut stream, &[], max).await {
                        fatal(&format!("ack to peer {peer}"), &e);
                    }
                }
            });
        }

        let servers = std::mem::take(&mut self.server_listeners);
        for (client, listener) in servers {
            let requests = self.routes.requests.sender();
            let max = self.config.max_frame_size;
            tokio::spawn(async move {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => fatal(&format!("accept link from client {client}"), &e.into()),
                };
                loop {
                    let frame = match read_frame(&mut stream, max).await {
                        Ok(frame) => frame,
                        Err(e) => fatal(&format!("receive request from client {client}"), &e),
                    };

                    let tx = requests.clone();
                    tokio::spawn(async move {
                        info!("RECEIVED REQ from {client}");
                        if tx.send(frame).await.is_err() {
                            warn!("request queue closed, client {client} request dropped");
                        }
                    });

                    if let Err(e) = write_frame(&mut stream, &[], max).await {
                        fatal("ack to client", &e);
                    }
                }
            });
        }
    }

    // ── Client reply ────────────────────────────────────────────────────

    /// Publish a reply on the client's response endpoint.
    ///
    /// Fire-and-forget: a client that has not subscribed yet misses the
    /// reply. The send is accounted like any other wire send.
    pub async fn reply_client(&self, reply: ClientReply, to: ClientId) {
        let bytes = match encode(&reply) {
            Ok(bytes) => bytes,
            Err(e) => fatal("serialize client reply", &e),
        };

        let Some(publisher) = self.response_pubs.get(&to) else {
            warn!("no response endpoint for client {to}");
            return;
        };
        match publisher.publish(&bytes, self.config.max_frame_size).await {
            Ok(delivered) => {
                if !delivered {
                    debug!("client {to} not subscribed, reply dropped");
                }
                info!("REPLIED Client {to} - {}", reply.value);
                self.metrics.record_send(bytes.len());
            }
            Err(e) => fatal("publish client reply", &e),
        }
    }

    /// Build a messenger with no sockets: outbound queues are created but
    /// their consumer sides are handed back for the test to observe.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn stub(
        config: MessengerConfig,
        auth: Arc<dyn ThresholdAuth>,
    ) -> (Self, HashMap<PeerId, mpsc::Receiver<NetMessage>>) {
        let (outbound, outbound_rxs) = outbound_queues(&config);
        let messenger = Self {
            routes: Arc::new(Routes::new(
                config.instance_queue_depth,
                config.request_queue_depth,
            )),
            metrics: Arc::new(TrafficMetrics::new()),
            config,
            auth,
            outbound,
            outbound_rxs: HashMap::new(),
            send_links: HashMap::new(),
            peer_listeners: HashMap::new(),
            server_listeners: HashMap::new(),
            response_pubs: HashMap::new(),
        };
        (messenger, outbound_rxs)
    }
}

/// Create the per-peer handoff queues, excluding the local id.
fn outbound_queues(
    config: &MessengerConfig,
) -> (
    HashMap<PeerId, mpsc::Sender<NetMessage>>,
    HashMap<PeerId, mpsc::Receiver<NetMessage>>,
) {
    let mut txs = HashMap::new();
    let mut rxs = HashMap::new();
    for i in 0..config.n {
        if i == config.id {
            continue; // Not myself.
        }
        let (tx, rx) = mpsc::channel(config.outbound_queue_depth);
        txs.insert(i, tx);
        rxs.insert(i, rx);
    }
    (txs, rxs)
}

/// Decode, authenticate, and route one inbound frame.
///
/// A frame failing verification is logged and dropped without touching any
/// instance queue. Decode failures are protocol-level bugs and are handed
/// back as errors (fatal in the receiver tasks).
pub async fn handle_message(
    routes: &Routes,
    auth: &dyn ThresholdAuth,
    frame: &[u8],
) -> Result<()> {
    let envelope = NetMessage::deserialize(frame)?;

    if !auth.verify(&envelope.payload, &envelope.signature, envelope.from) {
        info!("INVALID {} from {}", envelope.msg_type, envelope.from);
        return Ok(());
    }

    info!("RECEIVED {} from {}", envelope.msg_type, envelope.from);
    routes.route(envelope).await
}

// ── Tests ───────────────────────────────────────────────────────────────────
