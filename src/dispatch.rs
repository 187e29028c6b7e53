//! Instance demultiplexer: typed, instance-keyed delivery queues.
//!
//! Each sub-protocol stream has its own registry of delivery queues, keyed
//! by instance id. Queues are created lazily on the first observed message
//! for an instance — by the dispatcher on receipt or by the consensus layer
//! on first consume, whichever happens first — and live for the process
//! lifetime; nothing is ever removed or replaced.
//!
//! Creation is atomic under the registry's write lock: concurrent arrivals
//! for the same fresh instance land on one queue, never two.

use {
    crate::{
        error::{MessengerError, Result},
        message::{
            decode, AbcMessage, BcMessage, MessageType, MvcMessage, NetMessage, PeerId, RbKind,
            RbMessage, SsabcMessage, SsvcDecision, SsvcMessage, VcMessage,
        },
    },
    parking_lot::{Mutex, RwLock},
    std::{collections::HashMap, hash::Hash},
    tokio::sync::mpsc,
};

/// An inner message together with the peer that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<M> {
    /// The decoded inner message.
    pub message: M,
    /// The sending peer.
    pub from: PeerId,
}

// ── Per-instance registries ─────────────────────────────────────────────────

struct InstanceSlot<M> {
    tx: mpsc::Sender<Delivery<M>>,
    /// Held here until the instance's consumer claims it.
    rx: Mutex<Option<mpsc::Receiver<Delivery<M>>>>,
}

impl<M> InstanceSlot<M> {
    fn new(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

/// Registry of delivery queues for one message type, keyed by instance.
pub struct InstanceRegistry<K, M> {
    slots: RwLock<HashMap<K, InstanceSlot<M>>>,
    depth: usize,
}

impl<K: Eq + Hash + Clone, M> InstanceRegistry<K, M> {
    fn new(depth: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            depth,
        }
    }

    /// Producer handle for `key`, creating the queue if this is the first
    /// sighting of the instance.
    pub fn sender(&self, key: &K) -> mpsc::Sender<Delivery<M>> {
        let mut slots = self.slots.write();
        let depth = self.depth;
        slots
            .entry(key.clone())
            .or_insert_with(|| InstanceSlot::new(depth))
            .tx
            .clone()
    }

    /// Claim the consumer side of `key`'s queue, creating it if missing.
    ///
    /// Each instance has exactly one consumer; a second claim returns
    /// `None`.
    pub fn subscribe(&self, key: &K) -> Option<mpsc::Receiver<Delivery<M>>> {
        let mut slots = self.slots.write();
        let depth = self.depth;
        let rx = slots
            .entry(key.clone())
            .or_insert_with(|| InstanceSlot::new(depth))
            .rx
            .lock()
            .take();
        rx
    }

    /// How many instances have been observed so far.
    pub fn instance_count(&self) -> usize {
        self.slots.read().len()
    }
}

// ── Global streams ──────────────────────────────────────────────────────────

/// A single fixed queue for a type with no instance key.
pub struct GlobalStream<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
}

impl<T> GlobalStream<T> {
    fn new(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Producer handle for the stream.
    pub fn sender(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Claim the consumer side. A second claim returns `None`.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<T>> {
        self.rx.lock().take()
    }
}

// ── Routing surface ─────────────────────────────────────────────────────────

/// Every delivery queue the consensus layer consumes from.
///
/// Each typed table has its own lock; lookups are reads, creations are
/// writes. The tables are created once at initialization and are never
/// torn down.
pub struct Routes {
    /// Binary value broadcast, per `tag`.
    pub bvb: InstanceRegistry<u64, BcMessage>,
    /// Binary consensus, per `tag`.
    pub bc: InstanceRegistry<u64, BcMessage>,
    /// Reliable broadcast, per `(kind, rbid)` with `kind ∈ {Mvc, Vc}`.
    pub rb: InstanceRegistry<(RbKind, u64), RbMessage>,
    /// Multi-valued consensus, per `cid`.
    pub mvc: InstanceRegistry<u64, MvcMessage>,
    /// Vector consensus, per `vcid`.
    pub vc: InstanceRegistry<u64, VcMessage>,
    /// Self-stabilizing vector consensus, per `ssvcid`.
    pub ssvc: InstanceRegistry<u64, SsvcMessage>,
    /// Decided vectors from self-stabilizing VC, per `ssvcid`.
    pub ssvc_decisions: InstanceRegistry<u64, SsvcDecision>,
    /// Reliable broadcast on behalf of atomic broadcast.
    pub rb_abc: GlobalStream<Delivery<RbMessage>>,
    /// Atomic broadcast.
    pub abc: GlobalStream<Delivery<AbcMessage>>,
    /// Self-stabilizing atomic broadcast.
    pub ssabc: GlobalStream<Delivery<SsabcMessage>>,
    /// Raw client request bytes. Bounded; producers block when full.
    pub requests: GlobalStream<Vec<u8>>,
}

impl Routes {
    /// Create the full routing surface.
    pub fn new(instance_queue_depth: usize, request_queue_depth: usize) -> Self {
        Self {
            bvb: InstanceRegistry::new(instance_queue_depth),
            bc: InstanceRegistry::new(instance_queue_depth),
            rb: InstanceRegistry::new(instance_queue_depth),
            mvc: InstanceRegistry::new(instance_queue_depth),
            vc: InstanceRegistry::new(instance_queue_depth),
            ssvc: InstanceRegistry::new(instance_queue_depth),
            ssvc_decisions: InstanceRegistry::new(instance_queue_depth),
            rb_abc: GlobalStream::new(instance_queue_depth),
            abc: GlobalStream::new(instance_queue_depth),
            ssabc: GlobalStream::new(instance_queue_depth),
            requests: GlobalStream::new(request_queue_depth),
        }
    }

    /// Deliver an authenticated envelope to its instance queue.
    ///
    /// Decodes the inner message just far enough to extract the instance
    /// key, then blocks on the queue send — a slow consensus instance
    /// pushes back on the dispatcher and thus on the peer.
    pub async fn route(&self, envelope: NetMessage) -> Result<()> {
        let from = envelope.from;
        match envelope.msg_type {
            MessageType::Bvb => {
                let message: BcMessage = decode(&envelope.payload)?;
                let tx = self.bvb.sender(&message.tag);
                send(tx, Delivery { message, from }).await
            }
            MessageType::Bc => {
                let message: BcMessage = decode(&envelope.payload)?;
                let tx = self.bc.sender(&message.tag);
                send(tx, Delivery { message, from }).await
            }
            MessageType::Rb => {
                let message: RbMessage = decode(&envelope.payload)?;
                let tx = self.rb.sender(&(message.kind, message.rbid));
                send(tx, Delivery { message, from }).await
            }
            MessageType::RbAbc => {
                let message: RbMessage = decode(&envelope.payload)?;
                send(self.rb_abc.sender(), Delivery { message, from }).await
            }
            MessageType::Mvc => {
                let message: MvcMessage = decode(&envelope.payload)?;
                let tx = self.mvc.sender(&message.cid);
                send(tx, Delivery { message, from }).await
            }
            MessageType::Vc => {
                let message: VcMessage = decode(&envelope.payload)?;
                let tx = self.vc.sender(&message.vcid);
                send(tx, Delivery { message, from }).await
            }
            MessageType::Abc => {
                let message: AbcMessage = decode(&envelope.payload)?;
                send(self.abc.sender(), Delivery { message, from }).await
            }
            MessageType::Ssvc => {
                let message: SsvcMessage = decode(&envelope.payload)?;
                let tx = self.ssvc.sender(&message.ssvcid);
                send(tx, Delivery { message, from }).await
            }
            MessageType::Ssvcds => {
                let message: SsvcDecision = decode(&envelope.payload)?;
                let tx = self.ssvc_decisions.sender(&message.ssvcid);
                send(tx, Delivery { message, from }).await
            }
            MessageType::Ssabc => {
                let message: SsabcMessage = decode(&envelope.payload)?;
                send(self.ssabc.sender(), Delivery { message, from }).await
            }
        }
    }
}

async fn send<T>(tx: mpsc::Sender<T>, item: T) -> Result<()> {
    tx.send(item).await.map_err(|_| MessengerError::ChannelClosed)
}

// ── Tests ───────────────────────────────────────────────────────────────────
