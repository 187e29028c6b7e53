//! End-to-end scenarios over loopback TCP with a four-replica mesh.

use {
    sigfree_messenger::{
        auth::NullAuth,
        message::{decode, encode, BcMessage, MessageType, MvcMessage, SsvcDecision},
        ClientReply, Messenger, MessengerConfig, NetMessage, Scenario,
    },
    std::{collections::HashMap, sync::Arc, time::Duration},
    tokio::{
        net::{TcpListener, TcpStream},
        time::{sleep, timeout},
    },
};

const N: usize = 4;
const RECV_DEADLINE: Duration = Duration::from_secs(5);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Bring up the replicas in `ids`, started and subscribed.
async fn spawn_mesh(
    clients: usize,
    port_base: u16,
    ids: &[usize],
    tweak: fn(usize, &mut MessengerConfig),
) -> HashMap<usize, Messenger> {
    let mut handles = Vec::new();
    for &id in ids {
        let mut config = MessengerConfig::dev(N, id, clients, port_base);
        tweak(id, &mut config);
        handles.push((
            id,
            tokio::spawn(Messenger::initialize(config, Arc::new(NullAuth))),
        ));
    }

    let mut mesh = HashMap::new();
    for (id, handle) in handles {
        let mut messenger = handle.await.unwrap().unwrap();
        messenger.start_senders();
        messenger.subscribe();
        mesh.insert(id, messenger);
    }
    mesh
}

fn bvb(tag: u64, value: u64) -> NetMessage {
    let payload = encode(&BcMessage { tag, value }).unwrap();
    NetMessage::signed(payload, MessageType::Bvb, 0, &NullAuth)
}

/// Honest BVB round-trip. Peers 1..3 each see exactly one BVB
/// in `bvb[7]` with value 1, and the broadcaster accounts three sends.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn honest_bvb_round_trip() {
    init_logger();
    let mesh = spawn_mesh(0, 43_000, &[0, 1, 2, 3], |_, _| {}).await;

    mesh[&0].broadcast(bvb(7, 1)).await;

    for peer in [1usize, 2, 3] {
        let mut rx = mesh[&peer].routes().bvb.subscribe(&7).unwrap();
        let delivery = timeout(RECV_DEADLINE, rx.recv()).await.unwrap().unwrap();
        assert_eq!(delivery.from, 0);
        assert_eq!(delivery.message, BcMessage { tag: 7, value: 1 });
        assert_eq!(mesh[&peer].routes().bvb.instance_count(), 1);
    }

    // The sender counts a message once its ACK is back; give it a moment.
    let deadline = tokio::time::Instant::now() + RECV_DEADLINE;
    loop {
        let traffic = mesh[&0].traffic();
        if traffic.msg_complexity == 3 {
            assert!(traffic.msg_size > 0);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "sends never accounted");
        sleep(Duration::from_millis(10)).await;
    }
}

/// BC_ATTACK. tag = 2, so tag mod 3 = 2 and every recipient
/// decodes value 1.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn byzantine_bc_attack() {
    init_logger();
    let mesh = spawn_mesh(0, 44_000, &[0, 1, 2, 3], |id, config| {
        if id == 0 {
            config.scenario = Scenario::BcAttack;
            config.byzantine = true;
        }
    })
    .await;

    let payload = encode(&BcMessage { tag: 2, value: 0 }).unwrap();
    let message = NetMessage::signed(payload, MessageType::Bc, 0, &NullAuth);
    mesh[&0].broadcast(message).await;

    for peer in [1usize, 2, 3] {
        let mut rx = mesh[&peer].routes().bc.subscribe(&2).unwrap();
        let delivery = timeout(RECV_DEADLINE, rx.recv()).await.unwrap().unwrap();
        assert_eq!(delivery.message.value, 1, "peer {peer}");
    }
}

/// IDLE silence. A Byzantine replica in IDLE sends nothing and
/// accounts nothing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_broadcast_is_silent() {
    init_logger();
    let mesh = spawn_mesh(0, 45_000, &[0, 1, 2, 3], |id, config| {
        if id == 0 {
            config.scenario = Scenario::Idle;
            config.byzantine = true;
        }
    })
    .await;

    mesh[&0].broadcast(bvb(1, 1)).await;
    sleep(Duration::from_millis(300)).await;

    assert_eq!(mesh[&0].traffic().msg_complexity, 0);
    for peer in [1usize, 2, 3] {
        assert_eq!(mesh[&peer].routes().bvb.instance_count(), 0, "peer {peer}");
    }
}

/// Lazy channel creation. Two peers deliver MVC{cid=42} concurrently;
/// one queue is created and both tuples arrive on it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mvc_arrivals_share_one_queue() {
    init_logger();
    let mesh = spawn_mesh(0, 46_000, &[0, 1, 2, 3], |_, _| {}).await;

    for sender in [1usize, 2] {
        let payload = encode(&MvcMessage {
            cid: 42,
            value: vec![sender as u8],
        })
        .unwrap();
        let message = NetMessage::signed(payload, MessageType::Mvc, sender, &NullAuth);
        mesh[&sender].broadcast(message).await;
    }

    let mut rx = mesh[&3].routes().mvc.subscribe(&42).unwrap();
    let mut froms = vec![
        timeout(RECV_DEADLINE, rx.recv()).await.unwrap().unwrap().from,
        timeout(RECV_DEADLINE, rx.recv()).await.unwrap().unwrap().from,
    ];
    froms.sort_unstable();
    assert_eq!(froms, vec![1, 2]);
    assert_eq!(mesh[&3].routes().mvc.instance_count(), 1);
}

/// SSVCDS exemption. Even under HALF_&_HALF every recipient
/// gets the identical decision.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ssvcds_is_never_mutated() {
    init_logger();
    let mesh = spawn_mesh(0, 47_000, &[0, 1, 2, 3], |id, config| {
        if id == 0 {
            config.scenario = Scenario::HalfAndHalf;
            config.byzantine = true;
        }
    })
    .await;

    let decision = SsvcDecision {
        ssvcid: 5,
        vector: [(1usize, b"a".to_vec()), (2, b"b".to_vec())]
            .into_iter()
            .collect(),
    };
    let payload = encode(&decision).unwrap();
    let message = NetMessage::signed(payload, MessageType::Ssvcds, 0, &NullAuth);
    mesh[&0].broadcast(message).await;

    for peer in [1usize, 2, 3] {
        let mut rx = mesh[&peer].routes().ssvc_decisions.subscribe(&5).unwrap();
        let delivery = timeout(RECV_DEADLINE, rx.recv()).await.unwrap().unwrap();
        assert_eq!(delivery.message, decision, "peer {peer}");
    }
}

/// Send timeout. Peer 2 never ACKs, so its sender task blocks;
/// once its handoff queue is full, broadcasts drop peer 2's copy after the
/// timeout while peers 1 and 3 keep receiving.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocked_peer_is_dropped_after_timeout() {
    init_logger();
    let port_base = 48_000;

    // Peer 2 is a black hole: it accepts the inbound links of the other
    // replicas but never reads a frame nor sends an ACK.
    let blackhole_config = MessengerConfig::dev(N, 2, 0, port_base);
    for other in [0usize, 1, 3] {
        let listener = TcpListener::bind(blackhole_config.rep_addr(other))
            .await
            .unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => continue,
                };
                held.push(stream);
            }
        });
    }

    let mesh = spawn_mesh(0, port_base, &[0, 1, 3], |_, _| {}).await;

    // First message parks peer 2's sender on the missing ACK, second fills
    // the handoff queue, third hits the timeout and is dropped for peer 2.
    for tag in [1u64, 2, 3] {
        mesh[&0].broadcast(bvb(tag, 0)).await;
    }

    for peer in [1usize, 3] {
        for tag in [1u64, 2, 3] {
            let mut rx = mesh[&peer].routes().bvb.subscribe(&tag).unwrap();
            let delivery = timeout(RECV_DEADLINE, rx.recv()).await.unwrap().unwrap();
            assert_eq!(delivery.message.tag, tag, "peer {peer}");
        }
    }
}

/// Client path: a request travels into the bounded request queue, and the
/// reply comes back over the response publisher.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_request_and_reply() {
    init_logger();
    let port_base = 49_000;
    let mut config = MessengerConfig::dev(1, 0, 1, port_base);
    let server_addr = config.server_addr(0);
    let response_addr = config.response_addr(0);
    config.scenario = Scenario::Normal;

    let mut messenger = Messenger::initialize(config, Arc::new(NullAuth))
        .await
        .unwrap();
    messenger.start_senders();
    messenger.subscribe();

    // Subscribe for responses before anything can be published.
    let mut response_stream = TcpStream::connect(&response_addr).await.unwrap();

    // Send one framed request and wait for the ACK.
    let mut request_stream = TcpStream::connect(&server_addr).await.unwrap();
    send_raw_frame(&mut request_stream, b"request-1").await;
    assert!(read_raw_frame(&mut request_stream).await.is_empty());

    let mut requests = messenger.routes().requests.subscribe().unwrap();
    let request = timeout(RECV_DEADLINE, requests.recv()).await.unwrap().unwrap();
    assert_eq!(request, b"request-1");

    // Let the publisher retain the subscriber, then reply.
    sleep(Duration::from_millis(300)).await;
    let reply = ClientReply {
        id: 1,
        value: "decided".to_string(),
    };
    messenger.reply_client(reply.clone(), 0).await;

    let frame = timeout(RECV_DEADLINE, read_raw_frame(&mut response_stream))
        .await
        .unwrap();
    let decoded: ClientReply = decode(&frame).unwrap();
    assert_eq!(decoded, reply);
    assert_eq!(messenger.traffic().msg_complexity, 1);
}

async fn send_raw_frame(stream: &mut TcpStream, payload: &[u8]) {
    use tokio::io::AsyncWriteExt;
    let len = (payload.len() as u32).to_le_bytes();
    stream.write_all(&len).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();
}

async fn read_raw_frame(stream: &mut TcpStream) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let mut payload = vec![0u8; u32::from_le_bytes(header) as usize];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).await.unwrap();
    }
    payload
}
