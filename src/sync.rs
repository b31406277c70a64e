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

//! Bundles per-kind processed frames into a `SyncBundle` once every required kind has reported
//! a frame within `sync_window` of each other. Runs synchronously from the caller (the
//! Supervisor's frame-routing path), not on its own thread: bundling is pure bookkeeping with
//! no I/O, so there's nothing to block on.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::frame::{ProcessedFrame, StreamKind, SyncBundle};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("frame_sync.required_kinds must name at least one stream kind")]
    NoRequiredKinds,
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub synced: u64,
    pub dropped: u64,
    pub last_sync_delay_ms: u64,
    pub max_sync_delay_ms: u64,
    pub frame_delays_ms: HashMap<StreamKind, u64>,
    pub buffer_overflows: u64,
    pub sync_attempts: u64,
}

struct Slot {
    frame: ProcessedFrame,
    arrived_at_ms: u64,
}

pub struct MultiSourceSynchronizer {
    required_kinds: Vec<StreamKind>,
    sync_window: Duration,
    drop_after: Duration,
    buffer_size: usize,
    slots: HashMap<StreamKind, Slot>,
    stats: SyncStats,
    running: bool,
}

impl MultiSourceSynchronizer {
    pub fn new(
        required_kinds: Vec<StreamKind>,
        sync_window: Duration,
        drop_after: Duration,
        buffer_size: usize,
    ) -> Result<MultiSourceSynchronizer, SyncError> {
        if required_kinds.is_empty() {
            return Err(SyncError::NoRequiredKinds);
        }
        Ok(MultiSourceSynchronizer {
            required_kinds,
            sync_window,
            drop_after,
            buffer_size,
            slots: HashMap::new(),
            stats: SyncStats::default(),
            running: true,
        })
    }

    /// Feeds one processed frame in at wall-clock `now_ms`, returning a `SyncBundle` if this
    /// arrival completes the required set within `sync_window`.
    pub fn push(&mut self, frame: ProcessedFrame, now_ms: u64) -> Option<SyncBundle> {
        if !self.running {
            return None;
        }
        self.stats.sync_attempts += 1;

        if !self.slots.contains_key(&frame.kind) && self.slots.len() >= self.buffer_size {
            self.stats.buffer_overflows += 1;
            warn!(kind = %frame.kind, size = self.slots.len(), "synchronizer buffer overflow, dropping frame");
            return None;
        }

        self.slots.insert(
            frame.kind,
            Slot {
                frame,
                arrived_at_ms: now_ms,
            },
        );

        self.expire_stale_slots(now_ms);

        let has_all_required = self
            .required_kinds
            .iter()
            .all(|kind| self.slots.contains_key(kind));
        if !has_all_required {
            return None;
        }

        let timestamps: Vec<u64> = self
            .required_kinds
            .iter()
            .map(|kind| self.slots[kind].arrived_at_ms)
            .collect();
        let min_ts = *timestamps.iter().min().expect("non-empty required_kinds");
        let max_ts = *timestamps.iter().max().expect("non-empty required_kinds");
        let delay = max_ts - min_ts;

        if Duration::from_millis(delay) > self.sync_window {
            return None;
        }

        let mut frames = HashMap::new();
        for kind in &self.required_kinds {
            if let Some(slot) = self.slots.remove(kind) {
                frames.insert(*kind, slot.frame);
            }
        }

        self.stats.synced += 1;
        self.stats.last_sync_delay_ms = delay;
        self.stats.max_sync_delay_ms = self.stats.max_sync_delay_ms.max(delay);

        Some(SyncBundle {
            timestamp_ms: now_ms,
            frames,
            max_delay_ms: delay,
        })
    }

    fn expire_stale_slots(&mut self, now_ms: u64) {
        let drop_after_ms = self.drop_after.as_millis() as u64;
        let stale: Vec<StreamKind> = self
            .slots
            .iter()
            .filter(|(_, slot)| now_ms.saturating_sub(slot.arrived_at_ms) > drop_after_ms)
            .map(|(kind, slot)| {
                warn!(kind = %kind, delay_ms = now_ms - slot.arrived_at_ms, "dropping stale synchronizer slot");
                *kind
            })
            .collect();
        for kind in stale {
            self.slots.remove(&kind);
            self.stats.dropped += 1;
            if let Some(entry) = self.stats.frame_delays_ms.get_mut(&kind) {
                *entry = now_ms;
            } else {
                self.stats.frame_delays_ms.insert(kind, now_ms);
            }
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.clone()
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.slots.clear();
        self.stats = SyncStats::default();
    }
}

#[cfg(test)]
mod test {
    use crate::frame::Payload;

    use super::*;

    fn frame(kind: StreamKind, seq: u64) -> ProcessedFrame {
        ProcessedFrame {
            kind,
            seq,
            captured_at_ms: 0,
            emitted_at_ms: 0,
            payload: Payload::Infrared {
                processed: vec![],
                width: 0,
                height: 0,
                format: "f32".to_string(),
            },
            process_time_ms: 0.0,
        }
    }

    #[test]
    fn test_rejects_empty_required_kinds() {
        let err = MultiSourceSynchronizer::new(vec![], Duration::from_millis(33), Duration::from_millis(200), 4);
        assert!(matches!(err, Err(SyncError::NoRequiredKinds)));
    }

    #[test]
    fn test_emits_bundle_when_all_kinds_arrive_within_window() {
        let mut sync = MultiSourceSynchronizer::new(
            vec![StreamKind::Depth, StreamKind::Color],
            Duration::from_millis(33),
            Duration::from_millis(200),
            4,
        )
        .expect("construct");

        assert!(sync.push(frame(StreamKind::Depth, 1), 1000).is_none());
        let bundle = sync.push(frame(StreamKind::Color, 1), 1010).expect("bundle");
        assert_eq!(2, bundle.frames.len());
        assert_eq!(1, sync.stats().synced);
    }

    #[test]
    fn test_drops_stale_slot_outside_drop_after() {
        let mut sync = MultiSourceSynchronizer::new(
            vec![StreamKind::Depth, StreamKind::Color],
            Duration::from_millis(33),
            Duration::from_millis(200),
            4,
        )
        .expect("construct");

        sync.push(frame(StreamKind::Depth, 1), 1000);
        sync.push(frame(StreamKind::Color, 1), 1500);
        assert_eq!(1, sync.stats().dropped);
    }

    #[test]
    fn test_buffer_overflow_when_more_kinds_than_buffer_size() {
        let mut sync = MultiSourceSynchronizer::new(
            vec![StreamKind::Depth, StreamKind::Color, StreamKind::Infrared],
            Duration::from_millis(33),
            Duration::from_millis(200),
            2,
        )
        .expect("construct");

        sync.push(frame(StreamKind::Depth, 1), 1000);
        sync.push(frame(StreamKind::Color, 1), 1000);
        sync.push(frame(StreamKind::Infrared, 1), 1000);
        assert_eq!(1, sync.stats().buffer_overflows);
    }
}
