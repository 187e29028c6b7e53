//! Messaging and dispatch core for signature-free BFT consensus.
//!
//! This crate is the message multiplexer between a reliable transport and
//! a family of concurrent consensus sub-protocols (binary value broadcast,
//! binary consensus, reliable broadcast, multi-valued consensus, vector
//! consensus, atomic broadcast, and their self-stabilizing variants).
//! Authenticity on the broadcast path comes from a threshold scheme, not
//! per-message signatures.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  Consensus sub-protocols (BVB, BC, RB, MVC, …)  │
//!  │  → broadcast(msg)      ← typed instance queues  │
//!  └───────┬──────────────────────────────▲──────────┘
//!          │                              │ mpsc channels
//!  ┌───────▼──────────┐          ┌────────┴─────────┐
//!  │ Byzantine        │          │ Routes           │
//!  │ injector         │          │ (lazy per-       │
//!  │ (per recipient)  │          │  instance demux) │
//!  └───────┬──────────┘          └────────▲─────────┘
//!          │ per-peer handoff             │ verify + decode
//!  ┌───────▼──────────────────────────────┴─────────┐
//!  │  Transport (TCP, length-prefixed frames,       │
//!  │  lock-step ACK per message, one link per peer) │
//!  └────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]    | `MessengerConfig`, scenario names, endpoint addressing |
//! | [`message`]   | Envelope and typed inner wire messages, bincode ser/de |
//! | [`auth`]      | Seam to the external threshold-encryption module |
//! | [`byzantine`] | Per-recipient payload mutation under named scenarios |
//! | [`dispatch`]  | Typed, instance-keyed delivery queues (`Routes`) |
//! | [`transport`] | Framed TCP endpoints, ACK discipline, reply publisher |
//! | [`messenger`] | `Messenger`: broadcast, sender/receiver tasks, replies |
//! | [`metrics`]   | Message-complexity and wire-size counters |
//! | [`error`]     | Crate-wide error enum |

pub mod auth;
pub mod byzantine;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod messenger;
pub mod metrics;
pub mod transport;

pub use {
    auth::ThresholdAuth,
    config::{MessengerConfig, Scenario},
    dispatch::{Delivery, Routes},
    error::{MessengerError, Result},
    message::{ClientId, ClientReply, MessageType, NetMessage, PeerId},
    messenger::Messenger,
    metrics::TrafficSnapshot,
};
