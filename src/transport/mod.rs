// MIT License - Copyright (c) 2026 Peter Wright
// UDP multicast transport

pub mod dispatcher;
pub mod receiver;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{AirtubError, Result};

/// Outbound side of the transport.
///
/// Implemented for the shared multicast socket; tests substitute an
/// in-memory sink.
pub trait FrameSink: Send + Sync {
    /// Send one encoded frame to `target`.
    fn send_frame(
        &self,
        frame: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = std::io::Result<usize>> + Send;
}

impl FrameSink for UdpSocket {
    async fn send_frame(&self, frame: &[u8], target: SocketAddr) -> std::io::Result<usize> {
        self.send_to(frame, target).await
    }
}

/// Bind the port and join the configured multicast group.
///
/// Address and port reuse are enabled so several engine instances (or
/// other listeners) can share one group on the same host.
pub fn bind_multicast(config: &EngineConfig) -> Result<UdpSocket> {
    let bind_err = |e: std::io::Error| AirtubError::BindFailed {
        port: config.port,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(bind_err)?;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    socket.bind(&addr.into()).map_err(bind_err)?;

    socket
        .join_multicast_v4(&config.multicast_group, &config.interface)
        .map_err(|e| AirtubError::JoinFailed {
            group: config.multicast_group,
            reason: e.to_string(),
        })?;
    socket.set_multicast_ttl_v4(config.multicast_ttl)?;
    socket.set_nonblocking(true)?;

    debug!(
        "Joined {} on port {} via {}",
        config.multicast_group, config.port, config.interface
    );

    Ok(UdpSocket::from_std(socket.into())?)
}
