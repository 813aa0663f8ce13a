use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use serde::Serialize;

use crate::{
    audio::mix::{FrameKind, MixedFrame},
    output::Delivery,
};

/// Per-engine counters, updated by the mix loop.
#[derive(Debug, Default)]
pub struct EngineStats {
    speech_frames: AtomicU64,
    ambience_frames: AtomicU64,
    idle_ticks: AtomicU64,
    network_bytes: AtomicU64,
    transport_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub speech_frames: u64,
    pub ambience_frames: u64,
    pub idle_ticks: u64,
    pub network_bytes: u64,
    pub transport_failures: u64,
}

impl EngineStats {
    pub fn record_frame(&self, frame: &MixedFrame, delivery: &Delivery) {
        match frame.kind {
            FrameKind::Speech => self.speech_frames.fetch_add(1, Relaxed),
            FrameKind::Ambience => self.ambience_frames.fetch_add(1, Relaxed),
        };
        self.network_bytes
            .fetch_add(delivery.network_bytes as u64, Relaxed);
        if delivery.network_failed {
            self.transport_failures.fetch_add(1, Relaxed);
        }
    }

    pub fn record_idle(&self) {
        self.idle_ticks.fetch_add(1, Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            speech_frames: self.speech_frames.load(Relaxed),
            ambience_frames: self.ambience_frames.load(Relaxed),
            idle_ticks: self.idle_ticks.load(Relaxed),
            network_bytes: self.network_bytes.load(Relaxed),
            transport_failures: self.transport_failures.load(Relaxed),
        }
    }
}
