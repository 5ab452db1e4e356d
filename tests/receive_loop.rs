// Receive loop tests over real loopback sockets
//
// A second socket plays the boiler: it sends telemetry to the engine
// socket and answers command frames, while the engine's receive loop runs
// as its own task.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use airtub_udp::constants::DEFAULT_MULTICAST_GROUP;
use airtub_udp::event::event_channel;
use airtub_udp::transport::receiver::{Receiver, spawn_receiver_task};
use airtub_udp::{
    AirtubCrypt, CommandDispatcher, CommandOutcome, EngineConfig, EngineStatus, StateCache,
};

const SECRET: &str = "pw";
const DEVICE: &str = "abc";
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct Harness {
    engine_socket: Arc<UdpSocket>,
    boiler_socket: Arc<UdpSocket>,
    cache: Arc<StateCache>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

async fn bind_local() -> UdpSocket {
    UdpSocket::bind(SocketAddr::new(LOCALHOST, 0)).await.unwrap()
}

async fn start(error_pause: Duration) -> Harness {
    let engine_socket = Arc::new(bind_local().await);
    let boiler_socket = Arc::new(bind_local().await);
    let (tx, _rx) = event_channel(64);
    let cache = Arc::new(StateCache::new(tx));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let receiver = Receiver {
        socket: engine_socket.clone(),
        crypt: AirtubCrypt::new(SECRET),
        device_id: DEVICE.to_string(),
        cache: cache.clone(),
        multicast_group: DEFAULT_MULTICAST_GROUP,
        interface: Ipv4Addr::UNSPECIFIED,
        error_pause,
    };
    let handle = spawn_receiver_task(receiver, shutdown_rx);

    Harness {
        engine_socket,
        boiler_socket,
        cache,
        shutdown_tx,
        handle,
    }
}

impl Harness {
    async fn broadcast(&self, text: &str) {
        let frame = AirtubCrypt::new(SECRET)
            .encode_frame(1, text.as_bytes())
            .unwrap();
        let target = self.engine_socket.local_addr().unwrap();
        self.boiler_socket.send_to(&frame, target).await.unwrap();
    }

    /// Wait until the cache reports `key` = `value`.
    async fn wait_for(&self, key: &str, value: f64) -> bool {
        timeout(Duration::from_secs(2), async {
            while self.cache.state().await.get(key) != Some(value) {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    async fn stop(self) -> Arc<StateCache> {
        self.shutdown_tx.send(true).unwrap();
        let joined = timeout(Duration::from_secs(2), self.handle).await;
        assert!(matches!(joined, Ok(Ok(()))), "receive loop did not stop");
        self.cache
    }
}

/// Answer command frames, acknowledging the one whose `try` is `ack_on`.
fn spawn_boiler(socket: Arc<UdpSocket>, ack_on: u64) -> (JoinHandle<()>, Arc<Mutex<Vec<u64>>>) {
    let tries = Arc::new(Mutex::new(Vec::new()));
    let seen = tries.clone();
    let handle = tokio::spawn(async move {
        let crypt = AirtubCrypt::new(SECRET);
        let mut buf = [0u8; 1024];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let decoded = crypt.decode_frame(&buf[..n]);
            if !decoded.crc_valid {
                continue;
            }
            let command: Value = serde_json::from_str(&decoded.text()).unwrap();
            let attempt = command["try"].as_u64().unwrap();
            seen.lock().await.push(attempt);
            if attempt == ack_on {
                let reply = format!(r#"{{"dev":"{DEVICE}","rec":1}}"#);
                let frame = crypt.encode_frame(1, reply.as_bytes()).unwrap();
                socket.send_to(&frame, from).await.unwrap();
            }
        }
    });
    (handle, tries)
}

#[tokio::test]
async fn test_ack_arrives_through_receive_loop() {
    let harness = start(Duration::from_secs(1)).await;
    harness
        .broadcast(&format!(r#"{{"dev":"{DEVICE}","crt":20.5}}"#))
        .await;
    assert!(harness.wait_for("crt", 20.5).await);
    assert_eq!(harness.cache.sender().await, Some(LOCALHOST));

    let boiler_port = harness.boiler_socket.local_addr().unwrap().port();
    let config = EngineConfig::builder()
        .device_id(DEVICE)
        .secret(SECRET)
        .port(boiler_port)
        .retry_interval_ms(200)
        .build();
    let (boiler, tries) = spawn_boiler(harness.boiler_socket.clone(), 2);

    let dispatcher =
        CommandDispatcher::new(harness.engine_socket.clone(), harness.cache.clone(), &config);
    let outcome = timeout(Duration::from_secs(5), dispatcher.submit(r#"{"tdt":45}"#))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Acknowledged { attempt: 2 });
    assert_eq!(*tries.lock().await, vec![0, 1, 2]);
    boiler.abort();

    let cache = harness.stop().await;
    assert_eq!(cache.sender().await, Some(LOCALHOST));
    assert_eq!(cache.status().await, EngineStatus::Ready);
    assert!(cache.is_acknowledged().await);
}

#[tokio::test]
async fn test_loop_survives_bad_datagrams() {
    let harness = start(Duration::from_secs(1)).await;
    let target = harness.engine_socket.local_addr().unwrap();

    harness.boiler_socket.send_to(&[], target).await.unwrap();
    harness
        .boiler_socket
        .send_to(b"not a frame at all", target)
        .await
        .unwrap();
    harness.broadcast(r#"{"dev":"zzz","crt":30}"#).await;
    harness
        .broadcast(&format!(r#"{{"dev":"{DEVICE}","crt":"#))
        .await;
    harness
        .broadcast(&format!(r#"{{"dev":"{DEVICE}","crt":21.5,"tdt":48}}"#))
        .await;

    assert!(harness.wait_for("crt", 21.5).await);
    assert_eq!(harness.cache.state().await.get("tdt"), Some(48.0));
    assert!(!harness.handle.is_finished());

    harness.stop().await;
}

#[tokio::test]
async fn test_loop_survives_socket_error() {
    let harness = start(Duration::from_millis(100)).await;

    // Sending from a connected socket to a closed port queues ICMP port
    // unreachable, which surfaces as an error on the next receive.
    let dead = bind_local().await.local_addr().unwrap();
    harness.engine_socket.connect(dead).await.unwrap();
    let _ = harness.engine_socket.send(b"x").await;
    sleep(Duration::from_millis(50)).await;

    let boiler_addr = harness.boiler_socket.local_addr().unwrap();
    harness.engine_socket.connect(boiler_addr).await.unwrap();

    let text = format!(r#"{{"dev":"{DEVICE}","crt":22}}"#);
    let mut applied = false;
    for _ in 0..10 {
        harness.broadcast(&text).await;
        if harness.wait_for("crt", 22.0).await {
            applied = true;
            break;
        }
    }
    assert!(applied, "receive loop stopped after a socket error");
    assert!(!harness.handle.is_finished());

    let cache = harness.stop().await;
    assert_eq!(cache.state().await.get("crt"), Some(22.0));
}

#[tokio::test]
async fn test_dropping_shutdown_sender_stops_loop() {
    let harness = start(Duration::from_secs(1)).await;
    let Harness {
        shutdown_tx, handle, ..
    } = harness;

    drop(shutdown_tx);
    let joined = timeout(Duration::from_secs(2), handle).await;
    assert!(matches!(joined, Ok(Ok(()))));
}
