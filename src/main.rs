// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, warn};

use airtub_udp::devices::boiler::{self, BoilerFlags, Circuit, CircuitKind};
use airtub_udp::devices::sensor::{SensorReading, render_state};
use airtub_udp::{
    AirtubEngine, ClimateCommand, CommandOutcome, DeviceState, EngineConfig, EngineEvent,
    EngineStatus, OperateMode,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "airtub2mqtt")]
#[command(about = "Bridge between an Airtub boiler and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    device: DeviceToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct DeviceToml {
    device_id: String,
    secret: String,
    #[serde(default = "default_multicast_group")]
    multicast_group: Ipv4Addr,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_interface")]
    interface: Ipv4Addr,
    #[serde(default = "default_retry_max")]
    retry_max: u32,
    #[serde(default = "default_retry_interval")]
    retry_interval_ms: u64,
    /// Base delay between attempts to bind the multicast socket
    #[serde(default = "default_start_delay")]
    start_delay_ms: u64,
    /// "auto" (room target) or "manual" (flow target)
    #[serde(default = "default_operate_mode")]
    operate_mode: String,
}

fn default_multicast_group() -> Ipv4Addr {
    airtub_udp::constants::DEFAULT_MULTICAST_GROUP
}
fn default_port() -> u16 {
    airtub_udp::constants::DEFAULT_PORT
}
fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
fn default_retry_max() -> u32 {
    airtub_udp::constants::DEFAULT_RETRY_MAX
}
fn default_retry_interval() -> u64 {
    1000
}
fn default_start_delay() -> u64 {
    2000
}
fn default_operate_mode() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "airtub-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "airtub/cmd".to_string()
}
fn default_publish_topic() -> String {
    "airtub".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

fn build_engine_config(toml: &DeviceToml) -> Result<EngineConfig> {
    let mode = OperateMode::parse(&toml.operate_mode)
        .with_context(|| format!("Unknown operate_mode: {}", toml.operate_mode))?;
    let config = EngineConfig::builder()
        .device_id(&toml.device_id)
        .secret(&toml.secret)
        .multicast_group(toml.multicast_group)
        .port(toml.port)
        .interface(toml.interface)
        .retry_max(toml.retry_max)
        .retry_interval_ms(toml.retry_interval_ms)
        .operate_mode(mode)
        .build();
    config.validate()?;
    Ok(config)
}

/// Start the engine, retrying socket setup failures with exponential backoff.
async fn start_engine(config: &EngineConfig, start_delay_ms: u64) -> Result<AirtubEngine> {
    let mut attempt: u32 = 0;
    loop {
        match AirtubEngine::start(config.clone()).await {
            Ok(engine) => return Ok(engine),
            Err(e) if e.is_retryable() => {
                attempt += 1;
                let delay = start_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(
                    "Engine start attempt {attempt} failed: {e}. Retrying in {:.1}s...",
                    delay as f64 / 1000.0
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e).context("Failed to start UDP engine"),
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages - all share {now, op, ...} flat structure

#[derive(Serialize)]
struct MqttState<'a> {
    now: u64,
    op: &'static str,
    status: EngineStatus,
    state: &'a DeviceState,
    sensors: BTreeMap<String, SensorReading>,
    flags: Vec<String>,
    heating: Circuit,
    dhw: Circuit,
}

#[derive(Serialize)]
struct MqttStatus {
    now: u64,
    op: &'static str,
    status: EngineStatus,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: &'static str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<CommandOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
}

// Inbound command (subscribed)
#[derive(Debug, Deserialize)]
struct MqttCommand {
    op: String,
    /// Raw JSON fragment for SEND
    #[serde(default)]
    cmd: Option<String>,
    #[serde(default)]
    on: Option<bool>,
    #[serde(default)]
    value: Option<f64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_state(client: &AsyncClient, topic: &str, engine: &AirtubEngine) {
    let state = engine.read_state().await;
    let mode = engine.config().operate_mode;
    let msg = MqttState {
        now: now_epoch_ms(),
        op: "STATE",
        status: engine.status().await,
        state: &state,
        sensors: render_state(&state),
        flags: BoilerFlags::from_state(&state).names(),
        heating: Circuit::heating(&state, mode),
        dhw: Circuit::dhw(&state),
    };
    publish_json(client, topic, &msg, true).await;
}

async fn publish_status(client: &AsyncClient, topic: &str, status: EngineStatus) {
    let msg = MqttStatus {
        now: now_epoch_ms(),
        op: "STATUS",
        status,
    };
    publish_json(client, topic, &msg, true).await;
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    result: airtub_udp::Result<CommandOutcome>,
    src: Option<serde_json::Value>,
) {
    let msg = match result {
        Ok(outcome) => MqttCmdAck {
            now: now_epoch_ms(),
            op: "CMD_ACK",
            success: outcome.is_acknowledged(),
            outcome: Some(outcome),
            error: None,
            src,
        },
        Err(e) => MqttCmdAck {
            now: now_epoch_ms(),
            op: "CMD_ACK",
            success: false,
            outcome: None,
            error: Some(e.to_string()),
            src,
        },
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_rejected(
    client: &AsyncClient,
    topic: &str,
    reason: String,
    src: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK",
        success: false,
        outcome: None,
        error: Some(reason),
        src,
    };
    publish_json(client, topic, &msg, false).await;
}

/// Map an inbound MQTT op to a boiler command fragment.
fn command_fragment(cmd: &MqttCommand, mode: OperateMode) -> std::result::Result<String, String> {
    let require_on = || cmd.on.ok_or_else(|| format!("{}: missing on", cmd.op));
    let require_value = || cmd.value.ok_or_else(|| format!("{}: missing value", cmd.op));
    let heating_kind = match mode {
        OperateMode::Auto => CircuitKind::HeatingAuto,
        OperateMode::Manual => CircuitKind::HeatingManual,
    };

    let command = match cmd.op.as_str() {
        "SEND" => {
            return cmd
                .cmd
                .clone()
                .ok_or_else(|| "SEND: missing cmd".to_string());
        }
        "SET_AUTO_MODE" => ClimateCommand::SetAutoMode(require_on()?),
        "SET_HEATING" => ClimateCommand::for_heating_mode(mode, require_on()?),
        "SET_HEATING_TARGET" => boiler::target_command(heating_kind, require_value()?),
        "SET_DHW" => ClimateCommand::SetDhw(require_on()?),
        "SET_DHW_TARGET" => boiler::target_command(CircuitKind::Dhw, require_value()?),
        other => return Err(format!("Unknown command: {other}")),
    };
    Ok(command.to_fragment())
}

/// Command sequences running against one engine instance.
///
/// A restart shuts these down first, so no task still holds the engine
/// when it is torn down.
#[derive(Clone, Default)]
struct CommandTasks(Arc<Mutex<JoinSet<()>>>);

impl CommandTasks {
    async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.0.lock().await;
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    /// Abort every task and wait for them to finish unwinding.
    async fn shutdown(&self) {
        self.0.lock().await.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// MQTT → engine
// ---------------------------------------------------------------------------

async fn handle_command(
    payload: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    engine: &AirtubEngine,
) {
    let src_json: Option<serde_json::Value> = serde_json::from_str(payload).ok();

    if cmd.op == "SNAPSHOT" {
        publish_state(client, topic, engine).await;
        return;
    }

    match command_fragment(&cmd, engine.config().operate_mode) {
        Ok(fragment) => {
            info!("Command: {} {}", cmd.op, fragment);
            let result = engine.submit_command(&fragment).await;
            match &result {
                Ok(outcome) if outcome.is_acknowledged() => info!("{} {}", cmd.op, outcome),
                Ok(outcome) => warn!("{} {}", cmd.op, outcome),
                Err(e) => warn!("{} failed: {}", cmd.op, e),
            }
            publish_cmd_ack(client, topic, result, src_json).await;
        }
        Err(reason) => {
            warn!("{reason}");
            publish_rejected(client, topic, reason, src_json).await;
        }
    }
}

/// Realign the boiler's operate mode with the configured one.
async fn correct_operate_mode(engine: &AirtubEngine) {
    let state = engine.read_state().await;
    if let Some(command) = boiler::mode_correction(&state, engine.config().operate_mode) {
        info!("Boiler operate mode differs from config, sending {:?}", command);
        match engine.send(command).await {
            Ok(outcome) => info!("Operate mode correction {}", outcome),
            Err(e) => warn!("Operate mode correction failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=airtub_udp=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let mut engine_config = build_engine_config(&config.device)?;
    let mut start_delay_ms = config.device.start_delay_ms;
    let mut mqtt_client_id = config.mqtt.client_id;
    let mut publish_topic = config.mqtt.publish_topic;
    let mut subscribe_topic = config.mqtt.subscribe_topic;
    let mut snapshot_interval_secs = config.mqtt.snapshot_interval_secs;
    let (mut mqtt_host, mut mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let engine = Arc::new(start_engine(&engine_config, start_delay_ms).await?);
        info!("Engine started for device {}", engine_config.device_id);

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&mqtt_client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        client
            .subscribe(&subscribe_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to MQTT topic")?;
        info!("MQTT: subscribed to {subscribe_topic}");

        publish_status(&client, &publish_topic, engine.status().await).await;

        let command_tasks = CommandTasks::default();

        // Task 1: engine event listener
        let engine_events = Arc::clone(&engine);
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let tasks_events = command_tasks.clone();
        let mut event_rx = engine.subscribe();
        let event_handle = tokio::spawn(async move {
            let mut mode_checked = false;
            loop {
                match event_rx.recv().await {
                    Ok(EngineEvent::NewData) => {
                        debug!("New data from boiler");
                        publish_state(&client_events, &topic_events, &engine_events).await;
                        if !mode_checked {
                            mode_checked = true;
                            let engine = Arc::clone(&engine_events);
                            tasks_events
                                .spawn(async move { correct_operate_mode(&engine).await })
                                .await;
                        }
                    }
                    Ok(EngineEvent::StatusChanged { old, new }) => {
                        info!("Status: {old} -> {new}");
                        publish_status(&client_events, &topic_events, new).await;
                    }
                    Ok(EngineEvent::Acknowledged) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, hands commands off)
        let engine_cmds = Arc::clone(&engine);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let sub_topic = subscribe_topic.clone();
        let tasks_cmds = command_tasks.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect.
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload).into_owned();
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    info!("MQTT command received: {payload}");
                                    // Retry sequences take seconds; keep polling meanwhile.
                                    let engine = Arc::clone(&engine_cmds);
                                    let client = client_cmds.clone();
                                    let topic = topic_cmds.clone();
                                    tasks_cmds
                                        .spawn(async move {
                                            handle_command(&payload, cmd, &client, &topic, &engine)
                                                .await;
                                        })
                                        .await;
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 3: snapshot timer
        let engine_snap = Arc::clone(&engine);
        let client_snap = client.clone();
        let topic_snap = publish_topic.clone();
        let snap_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(snapshot_interval_secs.max(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                publish_state(&client_snap, &topic_snap, &engine_snap).await;
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting...");
                true
            }
        };

        event_handle.abort();
        mqtt_handle.abort();
        snap_handle.abort();
        // Awaiting aborted tasks waits until they have released the engine.
        let _ = event_handle.await;
        let _ = mqtt_handle.await;
        let _ = snap_handle.await;
        command_tasks.shutdown().await;

        match Arc::try_unwrap(engine) {
            Ok(mut engine) => engine.shutdown().await,
            Err(_arc) => {
                warn!("Could not unwrap engine Arc for clean shutdown");
            }
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => match build_engine_config(&new_config.device) {
                Ok(new_engine_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                    Ok((new_host, new_port)) => {
                        engine_config = new_engine_config;
                        start_delay_ms = new_config.device.start_delay_ms;
                        mqtt_host = new_host;
                        mqtt_port = new_port;
                        mqtt_client_id = new_config.mqtt.client_id;
                        publish_topic = new_config.mqtt.publish_topic;
                        subscribe_topic = new_config.mqtt.subscribe_topic;
                        snapshot_interval_secs = new_config.mqtt.snapshot_interval_secs;
                        info!("Config reloaded successfully");
                    }
                    Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
                },
                Err(e) => warn!("Invalid device config in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e}"),
        }

        info!("Restarting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
