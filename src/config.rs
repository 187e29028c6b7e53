//! Configuration for the messenger core.

use {
    crate::{
        error::MessengerError,
        message::{ClientId, PeerId},
    },
    std::{fmt, str::FromStr, time::Duration},
};

/// Named adversarial scenario driving the Byzantine injector.
///
/// Parsed from the configuration string; anything outside this set is a
/// configuration error, not a runtime fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Honest operation, no mutation.
    Normal,
    /// A Byzantine replica stays completely silent.
    Idle,
    /// Binary-consensus attack: `value` derived from `tag mod 3`.
    BcAttack,
    /// Send `recipient mod 2` so the two halves of the peer set disagree.
    HalfAndHalf,
    /// Send the same wrong value to everyone.
    BzAll,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scenario::Normal => "NORMAL",
            Scenario::Idle => "IDLE",
            Scenario::BcAttack => "BC_ATTACK",
            Scenario::HalfAndHalf => "HALF_&_HALF",
            Scenario::BzAll => "BZ_ALL",
        };
        f.write_str(name)
    }
}

impl FromStr for Scenario {
    type Err = MessengerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Scenario::Normal),
            "IDLE" => Ok(Scenario::Idle),
            "BC_ATTACK" => Ok(Scenario::BcAttack),
            "HALF_&_HALF" => Ok(Scenario::HalfAndHalf),
            "BZ_ALL" => Ok(Scenario::BzAll),
            other => Err(MessengerError::UnknownScenario(other.to_string())),
        }
    }
}

/// Configuration for the messaging and dispatch core.
///
/// Addressing: every replica binds one listener per remote peer (the socket
/// it receives from that peer on) and dials the matching listener on the
/// remote side. Ports are derived from `(binder, remote)` id pairs so the
/// whole table is computable from this struct on every replica.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Number of consensus participants.
    pub n: usize,

    /// This replica's id, in `0..n`.
    pub id: PeerId,

    /// Number of client endpoints to serve.
    pub clients: usize,

    /// Whether peers are on remote hosts. When false every endpoint binds
    /// and dials loopback.
    pub remote: bool,

    /// Active adversarial scenario.
    pub scenario: Scenario,

    /// Whether this replica acts Byzantine under `scenario`.
    pub byzantine: bool,

    /// One host per peer, indexed by peer id. Only consulted when `remote`.
    pub peer_hosts: Vec<String>,

    /// Base port for the per-peer receive listeners.
    pub peer_port_base: u16,

    /// Base port for the per-client request listeners.
    pub server_port_base: u16,

    /// Base port for the per-client response publishers.
    pub response_port_base: u16,

    /// How long `broadcast` waits to hand a message to a peer's sender
    /// task before silently dropping it for that peer.
    pub send_timeout: Duration,

    /// Depth of each per-peer outbound handoff queue.
    pub outbound_queue_depth: usize,

    /// Depth of each per-instance delivery queue.
    pub instance_queue_depth: usize,

    /// Depth of the client request queue. Producers block when full.
    pub request_queue_depth: usize,

    /// Maximum size of a single serialized frame in bytes.
    pub max_frame_size: usize,

    /// How many times to re-dial a peer's listener during initialization
    /// before the setup error becomes fatal.
    pub connect_attempts: u32,

    /// Delay between connect attempts.
    pub connect_retry_delay: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            n: 4,
            id: 0,
            clients: 0,
            remote: false,
            scenario: Scenario::Normal,
            byzantine: false,
            peer_hosts: Vec::new(),
            peer_port_base: 27_100,
            server_port_base: 27_700,
            response_port_base: 27_900,
            send_timeout: Duration::from_secs(10),
            outbound_queue_depth: 1,
            instance_queue_depth: 1,
            request_queue_depth: 100,
            max_frame_size: 1_048_576, // 1 MiB
            connect_attempts: 40,
            connect_retry_delay: Duration::from_millis(250),
        }
    }
}

impl MessengerConfig {
    /// Address this replica receives from peer `i` on (bound locally).
    pub fn rep_addr(&self, i: PeerId) -> String {
        let host = if self.remote { "0.0.0.0" } else { "127.0.0.1" };
        format!("{host}:{}", self.peer_port(self.id, i))
    }

    /// Address this replica dials to reach peer `i` (the remote side of
    /// `i`'s receive-from-us listener).
    pub fn req_addr(&self, i: PeerId) -> String {
        format!("{}:{}", self.peer_host(i), self.peer_port(i, self.id))
    }

    /// Address client `c`'s requests are received on (bound locally).
    pub fn server_addr(&self, c: ClientId) -> String {
        let host = if self.remote { "0.0.0.0" } else { "127.0.0.1" };
        format!("{host}:{}", self.client_port(self.server_port_base, c))
    }

    /// Address client `c` subscribes to for responses (bound locally).
    pub fn response_addr(&self, c: ClientId) -> String {
        let host = if self.remote { "0.0.0.0" } else { "127.0.0.1" };
        format!("{host}:{}", self.client_port(self.response_port_base, c))
    }

    /// Port of the listener on replica `binder` that receives from `remote`.
    fn peer_port(&self, binder: PeerId, remote: PeerId) -> u16 {
        self.peer_port_base + (binder * self.n + remote) as u16
    }

    /// Port of a per-client listener on this replica.
    fn client_port(&self, base: u16, c: ClientId) -> u16 {
        base + (self.id * self.clients.max(1) + c) as u16
    }

    fn peer_host(&self, i: PeerId) -> &str {
        if self.remote {
            self.peer_hosts
                .get(i)
                .map(String::as_str)
                .unwrap_or("127.0.0.1")
        } else {
            "127.0.0.1"
        }
    }

    /// Create a config suitable for local testing: loopback endpoints under
    /// the given port base and short timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev(n: usize, id: PeerId, clients: usize, port_base: u16) -> Self {
        Self {
            n,
            id,
            clients,
            peer_port_base: port_base,
            server_port_base: port_base + 500,
            response_port_base: port_base + 600,
            send_timeout: Duration::from_millis(300),
            connect_attempts: 80,
            connect_retry_delay: Duration::from_millis(25),
            ..Self::default()
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_roundtrip() {
        for name in ["NORMAL", "IDLE", "BC_ATTACK", "HALF_&_HALF", "BZ_ALL"] {
            let scenario: Scenario = name.parse().unwrap();
            assert_eq!(scenario.to_string(), name);
        }
        assert!("HALFHALF".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_peer_addresses_pair_up() {
        // Replica 0's dial address for peer 2 must be the port replica 2
        // binds to receive from replica 0.
        let a = MessengerConfig::dev(4, 0, 0, 40_000);
        let b = MessengerConfig::dev(4, 2, 0, 40_000);
        let dial = a.req_addr(2);
        let bind = b.rep_addr(0);
        assert_eq!(
            dial.rsplit(':').next().unwrap(),
            bind.rsplit(':').next().unwrap()
        );
    }

    #[test]
    fn test_local_addresses_use_loopback() {
        let cfg = MessengerConfig::dev(4, 1, 2, 41_000);
        assert!(cfg.rep_addr(0).starts_with("127.0.0.1:"));
        assert!(cfg.server_addr(1).starts_with("127.0.0.1:"));
        assert!(cfg.response_addr(1).starts_with("127.0.0.1:"));
    }
}
