//! The two background activities of a running engine: the paced mix/emit
//! loop and the intake drain loop.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::stats::EngineStats;
use crate::{
    audio::mix::{DrainOutcome, IntakeReceiver, Mixer, PendingChunks},
    common::types::PcmFormat,
    output::OutputFanout,
};

pub(crate) struct LoopTiming {
    pub format: PcmFormat,
    pub idle_poll: Duration,
    pub drain_wait: Duration,
}

/// Mix, fan out, then sleep until the emitted audio has played out.
///
/// Each frame holds the loop for its own duration, measured from when the
/// previous frame was due, so the stream tracks wall-clock rate. A tick with
/// nothing to play retries after `idle_poll`. Returns the mixer and fan-out
/// so the caller can release their resources.
pub(crate) async fn mix_loop(
    mut mixer: Mixer,
    mut fanout: OutputFanout,
    timing: Arc<LoopTiming>,
    stats: Arc<EngineStats>,
    cancel_token: CancellationToken,
) -> (Mixer, OutputFanout) {
    let mut next_due = Instant::now();

    loop {
        if cancel_token.is_cancelled() {
            break;
        }

        let now = Instant::now();
        if next_due < now {
            next_due = now;
        }

        match mixer.tick() {
            Some(frame) => {
                let delivery = tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    d = fanout.dispatch(&frame) => d,
                };
                stats.record_frame(&frame, &delivery);
                trace!(
                    "Emitted {:?} frame: {} samples in {} sub-chunks",
                    frame.kind,
                    frame.samples(),
                    delivery.sub_chunks
                );
                next_due += frame.duration(timing.format);
            }
            None => {
                stats.record_idle();
                next_due = now + timing.idle_poll;
            }
        }

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep_until(next_due) => {}
        }
    }

    debug!("Mix loop stopped");
    (mixer, fanout)
}

/// Move pushed chunks into the mixer's pending list until cancelled.
///
/// The wait on the channel is bounded so cancellation is observed promptly
/// even when no producer ever pushes again.
pub(crate) async fn drain_loop(
    receiver: IntakeReceiver,
    pending: PendingChunks,
    timing: Arc<LoopTiming>,
    cancel_token: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            o = receiver.wait_and_drain(&pending, timing.drain_wait) => o,
        };

        match outcome {
            DrainOutcome::Drained(n) => trace!("Drained {} foreground chunk(s)", n),
            DrainOutcome::TimedOut => {}
            DrainOutcome::Disconnected => {
                debug!("All foreground producers gone");
                break;
            }
        }
    }

    debug!("Drain loop stopped");
}
