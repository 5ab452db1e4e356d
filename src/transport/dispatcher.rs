// MIT License - Copyright (c) 2026 Peter Wright
// Command dispatch with acknowledgment retry

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::constants::{MAX_PAYLOAD_SIZE, MSG_TYPE_COMMAND};
use crate::crypto::AirtubCrypt;
use crate::error::{AirtubError, Result};
use crate::protocol::{build_command, with_attempt};
use crate::state::{EngineStatus, StateCache};
use crate::transport::FrameSink;

/// Final result of a command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// No boiler has been heard from yet, so there is nowhere to send.
    NotReady,
    /// The boiler acknowledged the attempt with this `try` value.
    Acknowledged { attempt: u32 },
    /// Every attempt went unacknowledged.
    Exhausted { attempts: u32 },
}

impl CommandOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged { .. })
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => f.write_str("not ready"),
            Self::Acknowledged { attempt } => write!(f, "acknowledged (try {})", attempt),
            Self::Exhausted { attempts } => write!(f, "exhausted after {} attempts", attempts),
        }
    }
}

/// Sends commands to the learned boiler endpoint and retries until the
/// receiver observes an acknowledgment.
///
/// Submissions are serialized: a second command waits until the first
/// sequence has finished, so sequences never share the acknowledgment flag.
pub struct CommandDispatcher<S: FrameSink> {
    sink: Arc<S>,
    crypt: AirtubCrypt,
    cache: Arc<StateCache>,
    device_id: String,
    port: u16,
    retry_max: u32,
    retry_interval: Duration,
    in_flight: Mutex<()>,
}

impl<S: FrameSink> CommandDispatcher<S> {
    pub fn new(sink: Arc<S>, cache: Arc<StateCache>, config: &EngineConfig) -> Self {
        Self {
            sink,
            crypt: AirtubCrypt::new(&config.secret),
            cache,
            device_id: config.device_id.clone(),
            port: config.port,
            retry_max: config.retry_max,
            retry_interval: config.retry_interval(),
            in_flight: Mutex::new(()),
        }
    }

    /// Send a JSON command fragment and wait for the boiler to acknowledge.
    ///
    /// Malformed or oversized commands fail before anything is sent.
    /// Exhaustion is reported through the outcome, not as an error.
    pub async fn submit(&self, fragment: &str) -> Result<CommandOutcome> {
        let _guard = self.in_flight.lock().await;

        if self.retry_max == 0 {
            return Err(AirtubError::InvalidConfig {
                details: "retry_max must be at least 1".into(),
            });
        }

        let Some(remote) = self.cache.sender().await else {
            info!("Command dropped, no boiler endpoint learned yet");
            return Ok(CommandOutcome::NotReady);
        };

        let mut command = match build_command(fragment, &self.device_id) {
            Ok(command) => command,
            Err(e) => {
                warn!("Error decoding JSON: {}", e);
                self.cache.set_status(EngineStatus::Error).await;
                return Err(e);
            }
        };

        // The last attempt carries the widest counter.
        let longest = with_attempt(&mut command, self.retry_max - 1).len();
        if longest > MAX_PAYLOAD_SIZE {
            warn!("Command too large ({} bytes): {}", longest, fragment);
            self.cache.set_status(EngineStatus::Error).await;
            return Err(AirtubError::PayloadTooLarge {
                len: longest,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let target = SocketAddr::new(remote, self.port);
        self.cache.set_status(EngineStatus::Busy).await;
        self.cache.clear_ack().await;

        for attempt in 0..self.retry_max {
            let wire = with_attempt(&mut command, attempt);
            let frame = self.crypt.encode_frame(MSG_TYPE_COMMAND, wire.as_bytes())?;

            match self.sink.send_frame(&frame, target).await {
                Ok(_) => debug!("Sent try {} to {}: {}", attempt, target, wire),
                Err(e) => error!("Error occurred while sending data to {}: {}", target, e),
            }

            sleep(self.retry_interval).await;

            if self.cache.is_acknowledged().await {
                info!("Command acknowledged on try {}", attempt);
                self.cache.set_status(EngineStatus::Ready).await;
                return Ok(CommandOutcome::Acknowledged { attempt });
            }
        }

        warn!(
            "Command not acknowledged after {} attempts: {}",
            self.retry_max, fragment
        );
        self.cache.set_status(EngineStatus::Error).await;
        Ok(CommandOutcome::Exhausted {
            attempts: self.retry_max,
        })
    }
}
