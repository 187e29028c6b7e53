//! TCP endpoints and framing for the messenger core.
//!
//! Every frame on the wire is length-prefixed:
//!
//! ```text
//! [4 bytes: payload length (u32-le)] [N bytes: bincode payload]
//! ```
//!
//! A zero-length frame is the acknowledgement. Each peer pair keeps one
//! persistent stream per direction and runs it in lock-step: the sending
//! side writes a frame and blocks on the ACK before the next send, which
//! gives per-peer back-pressure for free but forbids pipelining. Small
//! per-instance fan-in is assumed to offset that.
//!
//! Client responses go out on a publisher endpoint: the latest connection
//! accepted on the response listener is retained, and publishing with no
//! subscriber is an accepted silent drop.

use {
    crate::{
        config::MessengerConfig,
        error::{MessengerError, Result},
        message::{ClientId, PeerId},
    },
    log::{debug, info, warn},
    std::{collections::HashMap, sync::Arc},
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::Mutex,
        time::sleep,
    },
};

// ── Framing ─────────────────────────────────────────────────────────────────

/// Write one length-prefixed frame. An empty payload is the ACK.
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8], max: usize) -> Result<()> {
    if payload.len() > max {
        return Err(MessengerError::FrameTooLarge {
            size: payload.len(),
            max,
        });
    }
    let len = (payload.len() as u32).to_le_bytes();
    stream.write_all(&len).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. Returns an empty buffer for an ACK.
pub async fn read_frame(stream: &mut TcpStream, max: usize) -> Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len > max {
        return Err(MessengerError::FrameTooLarge { size: len, max });
    }
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await?;
    }
    Ok(payload)
}

// ── Response publisher ──────────────────────────────────────────────────────

/// Fire-and-forget reply endpoint for one client.
///
/// A background task retains the most recent subscriber connection; a
/// reply published before the client subscribes is lost, which is an
/// accepted property of this channel.
pub struct ResponsePublisher {
    subscriber: Arc<Mutex<Option<TcpStream>>>,
}

impl ResponsePublisher {
    /// Start retaining subscriber connections from `listener`.
    pub fn start(listener: TcpListener) -> Self {
        let subscriber = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&subscriber);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("response subscriber connected from {addr}");
                        *slot.lock().await = Some(stream);
                    }
                    Err(e) => {
                        warn!("response listener accept error: {e}");
                    }
                }
            }
        });
        Self { subscriber }
    }

    /// Publish one frame to the current subscriber.
    ///
    /// Returns `false` when no subscriber is connected. Write errors
    /// propagate; the caller treats them as fatal.
    pub async fn publish(&self, payload: &[u8], max: usize) -> Result<bool> {
        let mut slot = self.subscriber.lock().await;
        match slot.as_mut() {
            Some(stream) => {
                write_frame(stream, payload, max).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ── Endpoints ───────────────────────────────────────────────────────────────

/// Every socket the messenger owns, produced once at initialization.
pub struct Endpoints {
    /// Persistent outbound stream per remote peer, keyed by peer id.
    pub send_links: HashMap<PeerId, TcpStream>,
    /// Listener this replica receives from each remote peer on.
    pub peer_listeners: HashMap<PeerId, TcpListener>,
    /// Listener for each client's requests.
    pub server_listeners: HashMap<ClientId, TcpListener>,
    /// Reply publisher for each client.
    pub response_pubs: HashMap<ClientId, ResponsePublisher>,
}

impl Endpoints {
    /// Bind and connect the full endpoint table from configuration.
    ///
    /// All listeners are bound before any outbound dial so that a mesh of
    /// replicas starting together converges; dials retry for a bounded
    /// number of attempts to absorb start-up ordering, after which the
    /// error is handed back to the caller (and is fatal there).
    pub async fn initialize(config: &MessengerConfig) -> Result<Self> {
        let mut peer_listeners = HashMap::new();
        for i in 0..config.n {
            if i == config.id {
                continue; // Not myself.
            }
            let addr = config.rep_addr(i);
            let listener = TcpListener::bind(&addr).await?;
            info!("Receive from peer {i} on {addr}");
            peer_listeners.insert(i, listener);
        }

        let mut server_listeners = HashMap::new();
        let mut response_pubs = HashMap::new();
        for c in 0..config.clients {
            let addr = config.server_addr(c);
            let listener = TcpListener::bind(&addr).await?;
            info!("Requests from client {c} on {addr}");
            server_listeners.insert(c, listener);

            let addr = config.response_addr(c);
            let listener = TcpListener::bind(&addr).await?;
            info!("Response to client {c} on {addr}");
            response_pubs.insert(c, ResponsePublisher::start(listener));
        }

        let mut send_links = HashMap::new();
        for i in 0..config.n {
            if i == config.id {
                continue; // Not myself.
            }
            let addr = config.req_addr(i);
            let stream = connect_with_retry(
                &addr,
                i,
                config.connect_attempts,
                config.connect_retry_delay,
            )
            .await?;
            info!("Send to peer {i} on {addr}");
            send_links.insert(i, stream);
        }

        Ok(Self {
            send_links,
            peer_listeners,
            server_listeners,
            response_pubs,
        })
    }
}

async fn connect_with_retry(
    addr: &str,
    peer: PeerId,
    attempts: u32,
    delay: std::time::Duration,
) -> Result<TcpStream> {
    let mut last_error = String::new();
    for attempt in 0..attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_error = e.to_string();
                debug!("dial {addr} for peer {peer} failed (attempt {attempt}): {e}");
                sleep(delay).await;
            }
        }
    }
    Err(MessengerError::ConnectionFailed {
        peer,
        addr: addr.to_string(),
        reason: last_error,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
