// MIT License - Copyright (c) 2026 Peter Wright
// Engine: one receiver, one dispatcher, one cache

use std::net::IpAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::crypto::AirtubCrypt;
use crate::error::{AirtubError, Result};
use crate::event::{event_channel, EngineEvent, EventReceiver, EventSender};
use crate::protocol::ClimateCommand;
use crate::state::{CacheSnapshot, DeviceState, EngineStatus, StateCache};
use crate::transport::bind_multicast;
use crate::transport::dispatcher::{CommandDispatcher, CommandOutcome};
use crate::transport::receiver::{spawn_receiver_task, Receiver};

/// The main public API for talking to one Airtub boiler.
///
/// # Example
///
/// ```no_run
/// use airtub_udp::{AirtubEngine, EngineConfig, EngineEvent};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = EngineConfig::builder()
///         .device_id("a1b2c3")
///         .secret("boiler-password")
///         .build();
///
///     let mut engine = AirtubEngine::start(config).await?;
///
///     let mut events = engine.subscribe();
///     while let Ok(event) = events.recv().await {
///         if event == EngineEvent::NewData {
///             println!("crt = {:?}", engine.read_state().await.get("crt"));
///             break;
///         }
///     }
///
///     let outcome = engine.submit_command(r#"{"tdt":45}"#).await?;
///     println!("{}", outcome);
///
///     engine.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct AirtubEngine {
    config: EngineConfig,
    cache: Arc<StateCache>,
    dispatcher: CommandDispatcher<UdpSocket>,
    event_tx: EventSender,
    receiver_handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AirtubEngine {
    /// Join the multicast group and start the receive loop.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Starting UDP listener for {} on {}:{}",
            config.device_id, config.multicast_group, config.port
        );

        let socket = Arc::new(bind_multicast(&config)?);
        let (event_tx, _event_rx) = event_channel(256);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let cache = Arc::new(StateCache::new(event_tx.clone()));

        let receiver = Receiver {
            socket: socket.clone(),
            crypt: AirtubCrypt::new(&config.secret),
            device_id: config.device_id.clone(),
            cache: cache.clone(),
            multicast_group: config.multicast_group,
            interface: config.interface,
            error_pause: config.error_pause(),
        };
        let receiver_handle = spawn_receiver_task(receiver, shutdown_rx);
        let dispatcher = CommandDispatcher::new(socket, cache.clone(), &config);

        Ok(Self {
            config,
            cache,
            dispatcher,
            event_tx,
            receiver_handle: Some(receiver_handle),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Invoke `callback` once per telemetry refresh until the engine stops.
    pub fn subscribe_new_data<F>(&self, mut callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(EngineEvent::NewData) => callback(),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("New data subscriber lagged, missed {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Latest device state.
    pub async fn read_state(&self) -> Arc<DeviceState> {
        self.cache.state().await
    }

    /// State together with the learned boiler address.
    pub async fn snapshot(&self) -> CacheSnapshot {
        self.cache.get().await
    }

    pub async fn sender(&self) -> Option<IpAddr> {
        self.cache.sender().await
    }

    pub async fn status(&self) -> EngineStatus {
        self.cache.status().await
    }

    /// Send a raw JSON command fragment, e.g. `{"tdt":45}`.
    pub async fn submit_command(&self, fragment: &str) -> Result<CommandOutcome> {
        if self.receiver_handle.is_none() {
            return Err(AirtubError::Shutdown);
        }
        self.dispatcher.submit(fragment).await
    }

    /// Send a typed climate command.
    pub async fn send(&self, command: ClimateCommand) -> Result<CommandOutcome> {
        debug!("Sending {:?}", command);
        self.submit_command(&command.to_fragment()).await
    }

    /// Stop the receive loop and leave the multicast group.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.receiver_handle.take()
            && let Err(e) = handle.await
        {
            warn!("UDP listener task ended abnormally: {}", e);
        }
        info!("Engine for {} stopped", self.config.device_id);
    }
}

impl Drop for AirtubEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.receiver_handle.take() {
            handle.abort();
        }
    }
}
