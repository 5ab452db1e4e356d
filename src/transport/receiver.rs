// MIT License - Copyright (c) 2026 Peter Wright
// Multicast receive loop

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::constants::RECV_BUFFER_SIZE;
use crate::crypto::AirtubCrypt;
use crate::protocol::{mentions_device, parse_device_payload};
use crate::state::{ApplyOutcome, EngineStatus, StateCache};

/// What became of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Zero-length datagram
    Empty,
    /// Too short, truncated, or CRC mismatch
    Corrupt,
    /// Valid frame for another boiler on the group
    OtherDevice,
    /// Addressed to us but not a JSON object
    Malformed,
    Applied(ApplyOutcome),
}

/// Everything the receive loop needs, owned by the task.
pub struct Receiver {
    pub socket: Arc<UdpSocket>,
    pub crypt: AirtubCrypt,
    pub device_id: String,
    pub cache: Arc<StateCache>,
    pub multicast_group: Ipv4Addr,
    pub interface: Ipv4Addr,
    pub error_pause: Duration,
}

/// Decode, filter and apply one datagram.
pub async fn handle_datagram(
    data: &[u8],
    from: SocketAddr,
    crypt: &AirtubCrypt,
    device_id: &str,
    cache: &StateCache,
) -> DatagramOutcome {
    if data.is_empty() {
        return DatagramOutcome::Empty;
    }

    let decoded = crypt.decode_frame(data);
    if !decoded.crc_valid {
        debug!("Discarding invalid frame from {} ({} bytes)", from, data.len());
        return DatagramOutcome::Corrupt;
    }

    let text = decoded.text();
    if !mentions_device(&text, device_id) {
        return DatagramOutcome::OtherDevice;
    }

    match parse_device_payload(&text, device_id) {
        Ok(payload) => {
            let outcome = cache.apply(payload, from.ip()).await;
            DatagramOutcome::Applied(outcome)
        }
        Err(e) => {
            warn!("Error decoding JSON from {}: {} ({:?})", from, e, text);
            cache.set_status(EngineStatus::Error).await;
            DatagramOutcome::Malformed
        }
    }
}

/// Spawn the receive loop. It runs until `shutdown_rx` flips to true or
/// its sender is dropped, then leaves the multicast group.
pub fn spawn_receiver_task(
    receiver: Receiver,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                result = receiver.socket.recv_from(&mut buf) => match result {
                    Ok((n, from)) => {
                        handle_datagram(
                            &buf[..n],
                            from,
                            &receiver.crypt,
                            &receiver.device_id,
                            &receiver.cache,
                        )
                        .await;
                    }
                    Err(e) => {
                        error!("Socket error: {}", e);
                        if pause_or_shutdown(&mut shutdown_rx, receiver.error_pause).await {
                            break;
                        }
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        if let Err(e) = receiver
            .socket
            .leave_multicast_v4(receiver.multicast_group, receiver.interface)
        {
            warn!("Failed to leave {}: {}", receiver.multicast_group, e);
        }
        info!("UDP listener stopped");
    })
}

/// Sleep for `pause`, returning early with `true` if shutdown was requested.
async fn pause_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    tokio::select! {
        _ = sleep(pause) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}
