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

//! One `Sensor` runs per enabled stream kind. It owns the driver subscription for that kind,
//! a bounded FIFO of raw input awaiting processing, and the `ProcessingWorker` that turns raw
//! input into a `ProcessedFrame`. Driver and sensor-pump-thread sizing, restart, and
//! head-drop-on-overflow policy live here; kind-specific transforms live in `worker`.
//!
//! **Implementation note.** The design calls for the Sensor to acquire a pool buffer and copy
//! driver-supplied raw bytes into it. Since the mock driver (and any future in-process driver)
//! writes pixel data directly into a pool-borrowed buffer rather than a separate scratch
//! buffer, that copy is elided here: the driver's `RawFrame` already owns a `PooledBuffer`.
//! `PoolExhausted` handling still applies, just one step earlier, at `Driver::open_pixel_stream`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use tracing::{error, info, span, warn, Level};

use crate::cancel::CancelHandle;
use crate::driver::Driver;
use crate::frame::{ProcessedFrame, RawBodyFrame, RawFrame, StreamKind};
use crate::pool::BufferPool;
use crate::worker::{Params, SideEffect, Worker, WorkerInput, WorkerReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// An event a Sensor hands up to the Supervisor.
pub enum SensorEvent {
    Frame(ProcessedFrame),
    Movement { tracking_id: u64, velocities: std::collections::HashMap<crate::frame::JointName, crate::frame::Vec3> },
    Gesture { tracking_id: u64, swipe: crate::frame::Swipe },
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct ProcessStats {
    pub frame_count: u64,
    pub total_process_time_ms: f64,
    pub min_process_time_ms: f64,
    pub max_process_time_ms: f64,
}

impl ProcessStats {
    fn record(&mut self, ms: f64) {
        if self.frame_count == 0 {
            self.min_process_time_ms = ms;
            self.max_process_time_ms = ms;
        } else {
            self.min_process_time_ms = self.min_process_time_ms.min(ms);
            self.max_process_time_ms = self.max_process_time_ms.max(ms);
        }
        self.total_process_time_ms += ms;
        self.frame_count += 1;
    }

    pub fn avg_process_time_ms(&self) -> f64 {
        if self.frame_count == 0 {
            0.0
        } else {
            self.total_process_time_ms / self.frame_count as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorStatus {
    pub kind: StreamKind,
    pub running: bool,
    pub fps: f64,
    pub process_stats: ProcessStats,
    pub restart_attempts: u32,
    pub max_restarts: u32,
    pub queue_depth: usize,
    pub missed_frames: u64,
}

struct Shared {
    state: Mutex<SensorState>,
    queue_depth: AtomicU64,
    missed_frames: AtomicU64,
    restart_attempts: AtomicU32,
    frame_count_window: AtomicU64,
    fps: Mutex<f64>,
    process_stats: Mutex<ProcessStats>,
    running: AtomicBool,
}

impl Default for Shared {
    fn default() -> Shared {
        Shared {
            state: Mutex::new(SensorState::Stopped),
            queue_depth: AtomicU64::new(0),
            missed_frames: AtomicU64::new(0),
            restart_attempts: AtomicU32::new(0),
            frame_count_window: AtomicU64::new(0),
            fps: Mutex::new(0.0),
            process_stats: Mutex::new(ProcessStats::default()),
            running: AtomicBool::new(false),
        }
    }
}

pub struct SensorConfig {
    pub max_queue_size: usize,
    pub health_check_interval: Duration,
    pub frame_timeout: Duration,
    pub max_restarts: u32,
}

/// Owns a driver subscription, queue, and worker for one stream kind.
pub struct Sensor {
    kind: StreamKind,
    driver: Arc<dyn Driver>,
    pool: Arc<BufferPool>,
    config: SensorConfig,
    params: Params,
    shared: Arc<Shared>,
    events: (Sender<SensorEvent>, Receiver<SensorEvent>),
    cancel_handle: Mutex<Option<CancelHandle>>,
    pump: Mutex<Option<thread::JoinHandle<()>>>,
    stop_tx: Mutex<Option<Sender<()>>>,
}

impl Sensor {
    pub fn new(
        kind: StreamKind,
        driver: Arc<dyn Driver>,
        pool: Arc<BufferPool>,
        config: SensorConfig,
        params: Params,
    ) -> Sensor {
        Sensor {
            kind,
            driver,
            pool,
            config,
            params,
            shared: Arc::new(Shared::default()),
            events: unbounded(),
            cancel_handle: Mutex::new(None),
            pump: Mutex::new(None),
            stop_tx: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The channel the Supervisor drains for this sensor's frames/movement/gesture/error
    /// events.
    pub fn events(&self) -> Receiver<SensorEvent> {
        self.events.1.clone()
    }

    /// Idempotent: returns immediately if already Running.
    pub fn start(&self) -> Result<(), String> {
        {
            let mut state = self.shared.state.lock().expect("sensor state lock poisoned");
            if *state == SensorState::Running {
                return Ok(());
            }
            *state = SensorState::Starting;
        }

        let span = span!(Level::INFO, "sensor start");
        let _enter = span.enter();

        let cancel_handle = CancelHandle::new();
        let worker = Worker::spawn(self.kind);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let opened = if self.kind == StreamKind::Body {
            let (tx, rx) = unbounded();
            self.driver
                .open_body_stream(tx, cancel_handle.clone())
                .map(|()| RawRx::Body(rx))
        } else {
            let (tx, rx) = unbounded();
            self.driver
                .open_pixel_stream(self.kind, Arc::clone(&self.pool), tx, cancel_handle.clone())
                .map(|()| RawRx::Pixel(rx))
        };

        let raw_rx = match opened {
            Ok(rx) => rx,
            Err(err) => {
                warn!(kind = %self.kind, error = %err, "driver refused to open stream");
                *self.shared.state.lock().expect("sensor state lock poisoned") = SensorState::Stopped;
                return Err(err.to_string());
            }
        };

        *self.cancel_handle.lock().expect("cancel handle lock poisoned") = Some(cancel_handle);
        *self.stop_tx.lock().expect("stop_tx lock poisoned") = Some(stop_tx);

        let shared = Arc::clone(&self.shared);
        let config_snapshot = SensorConfig {
            max_queue_size: self.config.max_queue_size,
            health_check_interval: self.config.health_check_interval,
            frame_timeout: self.config.frame_timeout,
            max_restarts: self.config.max_restarts,
        };
        let params = self.params.clone();
        let events_tx = self.events.0.clone();
        let kind = self.kind;

        shared.running.store(true, Ordering::Release);
        let handle = thread::spawn(move || {
            run_pump(kind, raw_rx, worker, config_snapshot, params, shared, events_tx, stop_rx);
        });
        *self.pump.lock().expect("pump lock poisoned") = Some(handle);

        *self.shared.state.lock().expect("sensor state lock poisoned") = SensorState::Running;
        self.shared.restart_attempts.store(0, Ordering::Relaxed);
        info!(kind = %self.kind, "sensor started");
        Ok(())
    }

    /// Stops the driver stream, drains the pump thread, and transitions to Stopped.
    pub fn stop(&self) {
        *self.shared.state.lock().expect("sensor state lock poisoned") = SensorState::Stopping;

        if let Some(cancel_handle) = self.cancel_handle.lock().expect("cancel handle lock poisoned").take() {
            cancel_handle.cancel();
        }
        if let Some(stop_tx) = self.stop_tx.lock().expect("stop_tx lock poisoned").take() {
            drop(stop_tx);
        }
        if let Some(handle) = self.pump.lock().expect("pump lock poisoned").take() {
            let _ = handle.join();
        }

        self.shared.running.store(false, Ordering::Release);
        *self.shared.state.lock().expect("sensor state lock poisoned") = SensorState::Stopped;
        info!(kind = %self.kind, "sensor stopped");
    }

    /// `stop()` plus clearing accumulated fps/process-time counters.
    pub fn cleanup(&self) {
        self.stop();
        *self.shared.process_stats.lock().expect("process_stats lock poisoned") = ProcessStats::default();
        self.shared.missed_frames.store(0, Ordering::Relaxed);
        self.shared.restart_attempts.store(0, Ordering::Relaxed);
        *self.shared.fps.lock().expect("fps lock poisoned") = 0.0;
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus {
            kind: self.kind,
            running: self.shared.running.load(Ordering::Acquire),
            fps: *self.shared.fps.lock().expect("fps lock poisoned"),
            process_stats: self.shared.process_stats.lock().expect("process_stats lock poisoned").clone(),
            restart_attempts: self.shared.restart_attempts.load(Ordering::Relaxed),
            max_restarts: self.config.max_restarts,
            queue_depth: self.shared.queue_depth.load(Ordering::Relaxed) as usize,
            missed_frames: self.shared.missed_frames.load(Ordering::Relaxed),
        }
    }
}

enum RawRx {
    Pixel(Receiver<RawFrame>),
    Body(Receiver<RawBodyFrame>),
}

#[allow(clippy::too_many_arguments)]
fn run_pump(
    kind: StreamKind,
    raw_rx: RawRx,
    mut worker: Worker,
    config: SensorConfig,
    params: Params,
    shared: Arc<Shared>,
    events_tx: Sender<SensorEvent>,
    stop_rx: Receiver<()>,
) {
    let mut pixel_queue: VecDeque<RawFrame> = VecDeque::new();
    let mut body_queue: VecDeque<RawBodyFrame> = VecDeque::new();
    let health_tick = crossbeam_channel::tick(config.health_check_interval);
    let mut last_reply_at = Instant::now();
    let mut window_start = Instant::now();

    loop {
        let worker_replies = worker.replies().clone();
        select! {
            recv(stop_rx) -> _ => break,
            recv(health_tick) -> _ => {
                worker.health_check();
                if last_reply_at.elapsed() > config.frame_timeout {
                    warn!(kind = %kind, "worker unresponsive, restarting");
                    let attempts = shared.restart_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempts > config.max_restarts {
                        error!(kind = %kind, attempts, "max restarts exceeded, stopping sensor");
                        let _ = events_tx.send(SensorEvent::Error(format!(
                            "{kind} worker exceeded max_restarts ({attempts})"
                        )));
                        break;
                    }
                    let _ = events_tx.send(SensorEvent::Error(format!(
                        "{kind} worker unresponsive, restarting (attempt {attempts}/{})",
                        config.max_restarts
                    )));
                    worker = Worker::spawn(kind);
                    last_reply_at = Instant::now();
                }
            },
            recv(worker_replies) -> reply => {
                match reply {
                    Ok(WorkerReply::Artifact(frame, side_effects)) => {
                        last_reply_at = Instant::now();
                        let mut stats = shared.process_stats.lock().expect("process_stats lock poisoned");
                        stats.record(frame.process_time_ms);
                        drop(stats);

                        shared.frame_count_window.fetch_add(1, Ordering::Relaxed);
                        if window_start.elapsed() >= Duration::from_secs(1) {
                            let count = shared.frame_count_window.swap(0, Ordering::Relaxed);
                            *shared.fps.lock().expect("fps lock poisoned") = count as f64 / window_start.elapsed().as_secs_f64();
                            window_start = Instant::now();
                        }

                        let _ = events_tx.send(SensorEvent::Frame(frame));
                        for effect in side_effects {
                            match effect {
                                SideEffect::Movement { tracking_id, velocities } => {
                                    let _ = events_tx.send(SensorEvent::Movement { tracking_id, velocities });
                                }
                                SideEffect::Gesture { tracking_id, swipe } => {
                                    let _ = events_tx.send(SensorEvent::Gesture { tracking_id, swipe });
                                }
                            }
                        }
                    }
                    Ok(WorkerReply::Error(err)) => {
                        last_reply_at = Instant::now();
                        warn!(kind = %kind, error = %err, "worker reported an error");
                        let _ = events_tx.send(SensorEvent::Error(err.to_string()));
                    }
                    Ok(WorkerReply::HealthOk) => {
                        last_reply_at = Instant::now();
                    }
                    Err(_) => {}
                }
                try_submit_next(kind, &mut pixel_queue, &mut body_queue, &worker, &params, &shared);
            },
            default(Duration::from_millis(50)) => {},
        }

        match &raw_rx {
            RawRx::Pixel(rx) => {
                while let Ok(frame) = rx.try_recv() {
                    enqueue_pixel(frame, &mut pixel_queue, config.max_queue_size, &shared);
                }
            }
            RawRx::Body(rx) => {
                while let Ok(frame) = rx.try_recv() {
                    enqueue_body(frame, &mut body_queue, config.max_queue_size, &shared);
                }
            }
        }
        try_submit_next(kind, &mut pixel_queue, &mut body_queue, &worker, &params, &shared);
    }
}

fn enqueue_pixel(frame: RawFrame, queue: &mut VecDeque<RawFrame>, max: usize, shared: &Shared) {
    if queue.len() >= max {
        queue.pop_front();
        shared.missed_frames.fetch_add(1, Ordering::Relaxed);
        warn!(kind = %frame.kind, "queue full, dropping oldest frame");
    }
    queue.push_back(frame);
    shared.queue_depth.store(queue.len() as u64, Ordering::Relaxed);
}

fn enqueue_body(frame: RawBodyFrame, queue: &mut VecDeque<RawBodyFrame>, max: usize, shared: &Shared) {
    if queue.len() >= max {
        queue.pop_front();
        shared.missed_frames.fetch_add(1, Ordering::Relaxed);
        warn!("body queue full, dropping oldest frame");
    }
    queue.push_back(frame);
    shared.queue_depth.store(queue.len() as u64, Ordering::Relaxed);
}

fn try_submit_next(
    kind: StreamKind,
    pixel_queue: &mut VecDeque<RawFrame>,
    body_queue: &mut VecDeque<RawBodyFrame>,
    worker: &Worker,
    params: &Params,
    shared: &Shared,
) {
    if worker.is_processing() {
        return;
    }
    if kind == StreamKind::Body {
        if let Some(frame) = body_queue.pop_front() {
            if !worker.try_submit(WorkerInput::Body(frame), params.clone()) {
                // Worker flipped busy between the check and the send; put it back.
            }
        }
    } else if let Some(frame) = pixel_queue.pop_front() {
        worker.try_submit(WorkerInput::Pixel(frame), params.clone());
    }
    shared.queue_depth.store((pixel_queue.len() + body_queue.len()) as u64, Ordering::Relaxed);
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::driver::MockDriver;
    use crate::worker::DepthParams;

    use super::*;

    fn depth_params() -> Params {
        Params::Depth(DepthParams {
            width: 512,
            height: 424,
            min_distance: 500,
            max_distance: 4500,
            normalize: true,
            gamma: false,
            point_cloud: false,
            colorize: None,
            focal_length: 365.0,
            principal_point_x: 256.0,
            principal_point_y: 212.0,
        })
    }

    #[test]
    fn test_sensor_start_emits_frame_events() {
        let driver: Arc<dyn Driver> = Arc::new(MockDriver::new("mock0", 0));
        let pool = Arc::new(BufferPool::new(4, 2, 16));
        let sensor = Sensor::new(
            StreamKind::Depth,
            driver,
            pool,
            SensorConfig {
                max_queue_size: 3,
                health_check_interval: Duration::from_secs(5),
                frame_timeout: Duration::from_secs(5),
                max_restarts: 3,
            },
            depth_params(),
        );

        sensor.start().expect("start");
        let events = sensor.events();
        let event = events.recv_timeout(Duration::from_secs(2)).expect("expected a frame event");
        assert!(matches!(event, SensorEvent::Frame(_)));

        sensor.stop();
        assert!(!sensor.status().running);
    }

    #[test]
    fn test_sensor_start_is_idempotent() {
        let driver: Arc<dyn Driver> = Arc::new(MockDriver::new("mock0", 0));
        let pool = Arc::new(BufferPool::new(4, 2, 16));
        let sensor = Sensor::new(
            StreamKind::Depth,
            driver,
            pool,
            SensorConfig {
                max_queue_size: 3,
                health_check_interval: Duration::from_secs(5),
                frame_timeout: Duration::from_secs(5),
                max_restarts: 3,
            },
            depth_params(),
        );

        sensor.start().expect("start");
        sensor.start().expect("start again should be a no-op");
        sensor.stop();
    }
}
