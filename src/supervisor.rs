// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Wires a `Driver`, a `BufferPool`, one `Sensor` per enabled stream kind, an optional
//! `MultiSourceSynchronizer`, and the `Broadcaster` into a running service. Routes sensor
//! events and subscriber control messages between them and periodically broadcasts stats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, span, warn, Level};

use crate::broadcaster::{Broadcaster, BroadcasterError, BroadcasterEvent, ClientMessage, ServerMessage};
use crate::config::Config;
use crate::driver::{self, DriverError, LedMode};
use crate::frame::StreamKind;
use crate::pool::BufferPool;
use crate::sensor::{Sensor, SensorConfig, SensorEvent};
use crate::sync::MultiSourceSynchronizer;
use crate::worker::{BodyParams, ColorParams, DepthParams, InfraredParams, Params};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("broadcaster error: {0}")]
    Broadcaster(#[from] BroadcasterError),

    #[error("sensor {0} failed to start: {1}")]
    SensorStart(StreamKind, String),

    #[error("frame_sync configuration error: {0}")]
    FrameSync(#[from] crate::config::ConfigError),

    #[error("signal handler setup failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// Runs the full service until a shutdown signal arrives. Blocks on the async runtime; sensor
/// pump threads and the broadcaster's accept loop run alongside it.
pub struct Supervisor {
    config: Config,
    pool: Arc<BufferPool>,
    sensors: HashMap<StreamKind, Arc<Sensor>>,
    broadcaster: Arc<Broadcaster>,
    driver: Arc<dyn driver::Driver>,
    synchronizer: std::sync::Mutex<Option<MultiSourceSynchronizer>>,
    shutdown: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn build(config: Config) -> Result<Supervisor, SupervisorError> {
        let driver = driver::get_driver(config.device.driver(), config.device.index())?;

        let pool_cfg = &config.service.buffer_pool;
        let pool = Arc::new(BufferPool::new(
            pool_cfg.initial_size(),
            pool_cfg.expand_size(),
            pool_cfg.max_pool_size(),
        ));

        let mut sensors = HashMap::new();
        if config.sensors.depth.enabled() {
            sensors.insert(StreamKind::Depth, Arc::new(build_sensor(StreamKind::Depth, &config, &driver, &pool)?));
        }
        if config.sensors.infrared.enabled() {
            sensors.insert(
                StreamKind::Infrared,
                Arc::new(build_sensor(StreamKind::Infrared, &config, &driver, &pool)?),
            );
        }
        if config.sensors.color.enabled() {
            sensors.insert(StreamKind::Color, Arc::new(build_sensor(StreamKind::Color, &config, &driver, &pool)?));
        }
        if config.sensors.body.enabled() {
            sensors.insert(StreamKind::Body, Arc::new(build_sensor(StreamKind::Body, &config, &driver, &pool)?));
        }

        let ws = &config.network.websocket;
        let broadcaster = Arc::new(Broadcaster::new(
            ws.host().to_string(),
            ws.port(),
            ws.identification_timeout().unwrap_or(Duration::from_secs(5)),
        ));

        let synchronizer = if config.frame_sync.enabled() {
            let required_kinds = config.frame_sync.required_kinds()?;
            let sync_window = config.frame_sync.sync_window()?;
            let drop_after = config.frame_sync.drop_after()?;
            let buffer_size = config.frame_sync.buffer_size();
            MultiSourceSynchronizer::new(required_kinds, sync_window, drop_after, buffer_size).ok()
        } else {
            None
        };

        Ok(Supervisor {
            config,
            pool,
            sensors,
            broadcaster,
            driver,
            synchronizer: std::sync::Mutex::new(synchronizer),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Starts the broadcaster, auto-starts configured sensors, and runs the routing loop until
    /// a `ctrl_c` signal or fatal error.
    pub async fn run(config: Config) -> Result<(), SupervisorError> {
        let supervisor = Supervisor::build(config)?;
        supervisor.start_auto_sensors();

        let port = supervisor.broadcaster.start().await?;
        info!(port, "supervisor listening for subscribers");

        let mut broadcaster_events = supervisor.broadcaster.events().await;
        let sensor_events = supervisor.spawn_sensor_event_forwarders();
        let stats_interval = supervisor.config.service.stats_interval().unwrap_or(Duration::from_secs(5));
        let mut stats_tick = tokio::time::interval(stats_interval);
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received (interrupt)");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("shutdown signal received (terminate)");
                    break;
                }
                Some(event) = broadcaster_events.recv() => {
                    supervisor.handle_broadcaster_event(event);
                }
                Some(event) = sensor_events.recv() => {
                    supervisor.handle_sensor_event(event);
                }
                _ = stats_tick.tick() => {
                    supervisor.broadcast_stats();
                }
            }
        }

        supervisor.shutdown_all().await;
        Ok(())
    }

    fn start_auto_sensors(&self) {
        let auto_start = self.config.service.auto_start();
        let targets: Vec<StreamKind> = if auto_start.is_empty() {
            self.sensors.keys().copied().collect()
        } else {
            auto_start.iter().filter_map(|s| StreamKind::parse(s)).collect()
        };
        for kind in targets {
            if let Some(sensor) = self.sensors.get(&kind) {
                if let Err(err) = sensor.start() {
                    error!(%kind, error = %err, "failed to auto-start sensor");
                }
            }
        }
    }

    /// Merges every sensor's event channel into a single tokio mpsc stream via one blocking
    /// forwarder thread per sensor, since `crossbeam_channel::Receiver` isn't directly awaitable.
    fn spawn_sensor_event_forwarders(&self) -> tokio::sync::mpsc::UnboundedReceiver<(StreamKind, SensorEvent)> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for (kind, sensor) in self.sensors.iter() {
            let events = sensor.events();
            let tx = tx.clone();
            let kind = *kind;
            let shutdown = Arc::clone(&self.shutdown);
            thread::spawn(move || {
                while let Ok(event) = events.recv() {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    if tx.send((kind, event)).is_err() {
                        break;
                    }
                }
            });
        }
        rx
    }

    fn handle_sensor_event(&self, (kind, event): (StreamKind, SensorEvent)) {
        match event {
            SensorEvent::Frame(frame) => {
                if let Some(bundle) = self.push_to_sync(frame.clone()) {
                    self.broadcaster.broadcast(ServerMessage::FrameSync { frame: bundle });
                }
                self.broadcaster.broadcast(ServerMessage::Frame { sensor_type: kind, data: frame });
            }
            SensorEvent::Movement { tracking_id, velocities } => {
                self.broadcaster.broadcast(ServerMessage::Movement {
                    sensor_type: kind,
                    tracking_id,
                    velocities,
                });
            }
            SensorEvent::Gesture { tracking_id, swipe } => {
                self.broadcaster
                    .broadcast(ServerMessage::Gesture { sensor_type: kind, tracking_id, swipe });
            }
            SensorEvent::Error(message) => {
                warn!(%kind, %message, "sensor reported an error");
                self.broadcaster.broadcast(ServerMessage::Error { error: format!("{kind}: {message}") });
            }
        }
    }

    /// Feeds the frame synchronizer, returning a bundle once it completes. A no-op when
    /// `frame_sync` is disabled or wasn't constructed.
    fn push_to_sync(&self, frame: crate::frame::ProcessedFrame) -> Option<crate::frame::SyncBundle> {
        let mut sync = self.synchronizer.lock().expect("synchronizer lock poisoned");
        sync.as_mut()?.push(frame, crate::frame::now_ms())
    }

    fn handle_broadcaster_event(&self, event: BroadcasterEvent) {
        match event {
            BroadcasterEvent::ClientConnected { id, descriptor } => {
                info!(%id, name = %descriptor.name, "subscriber identified");
                let info = serde_json::json!({
                    "name": self.driver.device_info().name,
                    "serial": self.driver.device_info().serial,
                    "firmwareVersion": self.driver.device_info().firmware_version,
                    "supportsBodyTracking": self.driver.device_info().supports_body_tracking,
                });
                self.broadcaster.send(id, ServerMessage::DeviceInfo { info });
            }
            BroadcasterEvent::ClientDisconnected { id, subscribers_remaining } => {
                info!(%id, subscribers_remaining, "subscriber disconnected");
                if subscribers_remaining == 0 {
                    info!("last subscriber disconnected, stopping all sensors");
                    for sensor in self.sensors.values() {
                        sensor.stop();
                    }
                }
            }
            BroadcasterEvent::Control { id, message } => {
                self.handle_control_message(id, message);
            }
        }
    }

    fn handle_control_message(&self, id: uuid::Uuid, message: ClientMessage) {
        let span = span!(Level::INFO, "control message", %id);
        let _enter = span.enter();

        match message {
            ClientMessage::Identify { .. } => {}
            ClientMessage::StartSensor { sensor_type } => match StreamKind::parse(&sensor_type) {
                Some(kind) => match self.sensors.get(&kind) {
                    Some(sensor) => {
                        if let Err(err) = sensor.start() {
                            self.broadcaster.send(id, ServerMessage::Error { error: err });
                        }
                    }
                    None => self.broadcaster.send(
                        id,
                        ServerMessage::Error { error: format!("{kind} sensor is not enabled") },
                    ),
                },
                None => self.broadcaster.send(
                    id,
                    ServerMessage::Error { error: format!("unknown stream kind {sensor_type:?}") },
                ),
            },
            ClientMessage::StopSensor { sensor_type } => match StreamKind::parse(&sensor_type) {
                Some(kind) => {
                    if let Some(sensor) = self.sensors.get(&kind) {
                        sensor.stop();
                    }
                }
                None => self.broadcaster.send(
                    id,
                    ServerMessage::Error { error: format!("unknown stream kind {sensor_type:?}") },
                ),
            },
            ClientMessage::SetLed { color } => {
                if let Some(mode) = parse_led_mode(&color) {
                    if let Err(err) = self.driver.set_led(mode) {
                        self.broadcaster.send(id, ServerMessage::Error { error: err.to_string() });
                    }
                } else {
                    self.broadcaster.send(id, ServerMessage::Error { error: format!("unknown LED mode {color:?}") });
                }
            }
            ClientMessage::SetIrEmitter { enabled } => {
                if let Err(err) = self.driver.set_ir_emitter(enabled) {
                    self.broadcaster.send(id, ServerMessage::Error { error: err.to_string() });
                }
            }
            ClientMessage::SetTilt { angle } => {
                if let Err(err) = self.driver.set_tilt(angle) {
                    self.broadcaster.send(id, ServerMessage::Error { error: err.to_string() });
                }
            }
            ClientMessage::RequestDeviceInfo => {
                let device_info = self.driver.device_info();
                let info = serde_json::json!({
                    "name": device_info.name,
                    "serial": device_info.serial,
                    "firmwareVersion": device_info.firmware_version,
                    "supportsBodyTracking": device_info.supports_body_tracking,
                });
                self.broadcaster.send(id, ServerMessage::DeviceInfo { info });
            }
        }
    }

    fn broadcast_stats(&self) {
        let mut per_sensor = serde_json::Map::new();
        for (kind, sensor) in self.sensors.iter() {
            let status = sensor.status();
            per_sensor.insert(
                kind.to_string(),
                serde_json::json!({
                    "running": status.running,
                    "fps": status.fps,
                    "avgProcessTimeMs": status.process_stats.avg_process_time_ms(),
                    "restartAttempts": status.restart_attempts,
                    "queueDepth": status.queue_depth,
                    "missedFrames": status.missed_frames,
                }),
            );
        }
        let pool_stats: serde_json::Map<String, serde_json::Value> = [StreamKind::Depth, StreamKind::Infrared, StreamKind::Color]
            .iter()
            .map(|kind| {
                let stats = self.pool.stats(*kind);
                (
                    kind.to_string(),
                    serde_json::json!({
                        "totalAllocated": stats.total_allocated,
                        "available": stats.available,
                        "inUse": stats.in_use,
                    }),
                )
            })
            .collect();

        let stats = serde_json::json!({
            "sensors": per_sensor,
            "bufferPool": pool_stats,
            "subscribers": self.broadcaster.subscriber_count(),
        });
        self.broadcaster.broadcast(ServerMessage::Stats { stats });
    }

    async fn shutdown_all(&self) {
        self.shutdown.store(true, Ordering::Release);
        for sensor in self.sensors.values() {
            sensor.cleanup();
        }
        self.broadcaster.stop().await;
    }
}

fn build_sensor(
    kind: StreamKind,
    config: &Config,
    driver: &Arc<dyn driver::Driver>,
    pool: &Arc<BufferPool>,
) -> Result<Sensor, SupervisorError> {
    let (base, params) = match kind {
        StreamKind::Depth => {
            let s = &config.sensors.depth;
            let (focal_length, ppx, ppy) = s.calibration().unwrap_or((365.0, 256.0, 212.0));
            (
                s.base(),
                Params::Depth(DepthParams {
                    width: StreamKind::Depth.dimensions().0,
                    height: StreamKind::Depth.dimensions().1,
                    min_distance: s.min_distance(),
                    max_distance: s.max_distance(),
                    normalize: s.normalize(),
                    gamma: s.gamma(),
                    point_cloud: s.point_cloud(),
                    colorize: s.colorize().map(str::to_string),
                    focal_length,
                    principal_point_x: ppx,
                    principal_point_y: ppy,
                }),
            )
        }
        StreamKind::Infrared => {
            let s = &config.sensors.infrared;
            (
                s.base(),
                Params::Infrared(InfraredParams {
                    width: StreamKind::Infrared.dimensions().0,
                    height: StreamKind::Infrared.dimensions().1,
                    gamma: s.gamma(),
                }),
            )
        }
        StreamKind::Color => {
            let s = &config.sensors.color;
            (
                s.base(),
                Params::Color(ColorParams {
                    width: StreamKind::Color.dimensions().0,
                    height: StreamKind::Color.dimensions().1,
                    force_alpha: s.force_alpha(),
                    compress: s.compress(),
                    compression_format: s.compression_format().to_string(),
                }),
            )
        }
        StreamKind::Body => {
            let s = &config.sensors.body;
            (
                s.base(),
                Params::Body(BodyParams {
                    correction: s.correction(),
                    max_deviation: s.max_deviation(),
                    jitter_radius: s.jitter_radius(),
                    velocities: s.velocities(),
                    bounds: s.bounds(),
                    confidence: s.confidence(),
                    gestures: s.gestures(),
                    gesture_threshold: s.gesture_threshold(),
                }),
            )
        }
    };

    let sensor_config = SensorConfig {
        max_queue_size: base.max_queue_size(),
        health_check_interval: base.health_check_interval().unwrap_or(Duration::from_secs(5)),
        frame_timeout: base.frame_timeout().unwrap_or(Duration::from_secs(2)),
        max_restarts: base.max_restarts(),
    };

    Ok(Sensor::new(kind, Arc::clone(driver), Arc::clone(pool), sensor_config, params))
}

fn parse_led_mode(s: &str) -> Option<LedMode> {
    match s.to_ascii_lowercase().as_str() {
        "off" => Some(LedMode::Off),
        "green" => Some(LedMode::Green),
        "red" => Some(LedMode::Red),
        "yellow" => Some(LedMode::Yellow),
        "blinkgreen" | "blink_green" => Some(LedMode::BlinkGreen),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_led_mode_accepts_known_names() {
        assert_eq!(Some(LedMode::Green), parse_led_mode("green"));
        assert_eq!(Some(LedMode::BlinkGreen), parse_led_mode("blinkGreen"));
        assert_eq!(None, parse_led_mode("purple"));
    }

    #[test]
    fn test_build_from_default_config_enables_all_sensors() {
        let config = Config::default();
        let supervisor = Supervisor::build(config).expect("build");
        assert_eq!(4, supervisor.sensors.len());
    }
}
