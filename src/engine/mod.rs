//! Lifecycle of one call leg's mixer.
//!
//! Construction wires the background track, intake queue and sinks
//! together; [`MixerEngine::start`] spawns the mix loop and the drain loop;
//! [`MixerEngine::stop`] cancels both, waits for them and releases the
//! background asset and speaker exactly once.

pub mod mix_loop;
pub mod stats;

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub use self::stats::{EngineStats, StatsSnapshot};
use self::mix_loop::{LoopTiming, drain_loop, mix_loop};
use crate::{
    audio::{
        background::BackgroundTrack,
        mix::{ForegroundIntake, IntakeReceiver, Mixer, PendingChunks, intake_channel},
    },
    common::{
        errors::{MixerError, MixerResult},
        types::CallId,
    },
    configs::MixerConfig,
    output::{FileSpeaker, NetworkSink, OutputFanout, SpeakerSink},
};

/// Parts owned by the engine until `start()` moves them into the tasks.
struct EngineParts {
    mixer: Mixer,
    fanout: OutputFanout,
    receiver: IntakeReceiver,
}

struct RunningTasks {
    mix: JoinHandle<(Mixer, OutputFanout)>,
    drain: JoinHandle<()>,
}

/// Where the engine's resources live. Only ever moves forward:
/// `Built -> Running -> Stopped` or `Built -> Stopped`.
enum Lifecycle {
    Built(EngineParts),
    Running(RunningTasks),
    Stopped,
}

pub struct MixerEngine {
    call_id: CallId,
    intake: ForegroundIntake,
    pending: PendingChunks,
    timing: Arc<LoopTiming>,
    stats: Arc<EngineStats>,
    /// Taken by `start()` and `stop()` alike, so neither can observe the
    /// other half-done.
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    /// Serializes `stop()` so a second caller returns only after teardown.
    stopped: tokio::sync::Mutex<bool>,
    cancel_token: CancellationToken,
}

impl Drop for MixerEngine {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

pub struct MixerEngineBuilder {
    config: MixerConfig,
    track: BackgroundTrack,
    call_id: Option<CallId>,
    network: Option<Box<dyn NetworkSink>>,
    speaker: Option<Box<dyn SpeakerSink>>,
}

impl MixerEngineBuilder {
    pub fn call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    pub fn network(mut self, sink: impl NetworkSink + 'static) -> Self {
        self.network = Some(Box::new(sink));
        self
    }

    /// Speaker device, used only when `output_to_speaker` is set.
    pub fn speaker(mut self, sink: impl SpeakerSink + 'static) -> Self {
        self.speaker = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> MixerResult<MixerEngine> {
        let config = self.config;
        config.validate()?;

        let call_id = self.call_id.unwrap_or_else(CallId::generate);
        let (intake, receiver) = intake_channel(config.format());
        let pending = PendingChunks::new();
        let mixer = Mixer::new(self.track, pending.clone(), &config)?;

        let mut fanout = OutputFanout::new(config.chunk_size, config.send_timeout());
        if let Some(network) = self.network {
            fanout = fanout.with_network(network);
        }

        // Speaker capability is resolved once here, never re-probed per tick.
        let speaker = match (config.output_to_speaker, self.speaker) {
            (true, Some(speaker)) => Some(speaker),
            (true, None) => match &config.speaker_output_path {
                Some(dir) => Some(Box::new(spawn_file_speaker(dir, &call_id)?) as Box<dyn SpeakerSink>),
                None => {
                    warn!("[{}] output_to_speaker set but no speaker device available", call_id);
                    None
                }
            },
            (false, Some(mut speaker)) => {
                debug!("[{}] output_to_speaker is off, ignoring speaker", call_id);
                speaker.close();
                None
            }
            (false, None) => None,
        };
        if let Some(speaker) = speaker {
            fanout = fanout.with_speaker(speaker);
        }

        let timing = Arc::new(LoopTiming {
            format: config.format(),
            idle_poll: config.idle_poll(),
            drain_wait: config.drain_wait(),
        });

        debug!(
            "[{}] Engine built: {}Hz, chunk {}B, background volume {}, network={} speaker={}",
            call_id,
            config.sample_rate,
            config.chunk_size,
            config.background_volume,
            fanout.network_active(),
            fanout.speaker_active()
        );

        Ok(MixerEngine {
            call_id,
            intake,
            pending,
            timing,
            stats: Arc::new(EngineStats::default()),
            lifecycle: Mutex::new(Lifecycle::Built(EngineParts {
                mixer,
                fanout,
                receiver,
            })),
            running: AtomicBool::new(false),
            stopped: tokio::sync::Mutex::new(false),
            cancel_token: CancellationToken::new(),
        })
    }
}

/// One raw PCM file per call so concurrent legs never interleave.
fn spawn_file_speaker(dir: &str, call_id: &CallId) -> MixerResult<FileSpeaker> {
    std::fs::create_dir_all(dir).map_err(|e| {
        MixerError::InvalidConfig(format!("cannot create speaker output dir {}: {}", dir, e))
    })?;
    FileSpeaker::spawn(Path::new(dir).join(format!("{}.pcm", call_id)))
}

impl MixerEngine {
    pub fn builder(config: MixerConfig, track: BackgroundTrack) -> MixerEngineBuilder {
        MixerEngineBuilder {
            config,
            track,
            call_id: None,
            network: None,
            speaker: None,
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Producer handle for the synthesizer side. Cheap to clone.
    pub fn intake(&self) -> ForegroundIntake {
        self.intake.clone()
    }

    /// Queue a speech chunk. Never blocks.
    pub fn push(&self, chunk: impl Into<Bytes>, is_final: bool) -> MixerResult<()> {
        self.intake.push(chunk, is_final)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the mix loop and the drain loop on the current tokio runtime.
    pub fn start(&self) -> MixerResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if self.cancel_token.is_cancelled() {
            return Err(MixerError::Stopped);
        }
        let EngineParts {
            mixer,
            fanout,
            receiver,
        } = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Built(parts) => parts,
            Lifecycle::Running(tasks) => {
                *lifecycle = Lifecycle::Running(tasks);
                return Err(MixerError::AlreadyStarted);
            }
            Lifecycle::Stopped => return Err(MixerError::Stopped),
        };

        let mix = tokio::spawn(
            mix_loop(
                mixer,
                fanout,
                self.timing.clone(),
                self.stats.clone(),
                self.cancel_token.child_token(),
            )
            .instrument(info_span!("mix_loop", call = %self.call_id)),
        );
        let drain = tokio::spawn(
            drain_loop(
                receiver,
                self.pending.clone(),
                self.timing.clone(),
                self.cancel_token.child_token(),
            )
            .instrument(info_span!("drain_loop", call = %self.call_id)),
        );

        *lifecycle = Lifecycle::Running(RunningTasks { mix, drain });
        self.running.store(true, Ordering::Release);
        info!("[{}] Mixer engine started", self.call_id);
        Ok(())
    }

    /// Stop mixing and release resources. Safe to call any number of times;
    /// every call returns only once teardown has completed.
    pub async fn stop(&self) {
        let mut stopped = self.stopped.lock().await;
        if *stopped {
            return;
        }
        *stopped = true;

        self.intake.close();
        self.cancel_token.cancel();

        // A `start()` that won the lock has finished spawning by now; one that
        // lost it sees the cancelled token and backs out.
        let taken = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        self.running.store(false, Ordering::Release);

        let released = match taken {
            Lifecycle::Running(RunningTasks { mix, drain }) => {
                if let Err(e) = drain.await {
                    error!("[{}] Drain task failed: {}", self.call_id, e);
                }
                match mix.await {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        error!("[{}] Mix task failed: {}", self.call_id, e);
                        None
                    }
                }
            }
            Lifecycle::Built(parts) => Some((parts.mixer, parts.fanout)),
            Lifecycle::Stopped => None,
        };

        if let Some((mixer, mut fanout)) = released {
            fanout.close();
            let mut track = mixer.into_track();
            track.close();
        }

        let dropped = self.pending.clear();
        if dropped > 0 {
            debug!("[{}] Discarded {} unplayed chunk(s)", self.call_id, dropped);
        }

        let s = self.stats.snapshot();
        info!(
            "[{}] Mixer engine stopped: {} speech / {} ambience frames, {} bytes sent",
            self.call_id, s.speech_frames, s.ambience_frames, s.network_bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        audio::{background::AssetHandle, mix::Volumes, pcm},
        output::{ChannelSpeaker, fanout::tests::RecordingSink},
    };

    struct CountingHandle(Arc<AtomicUsize>);

    impl AssetHandle for CountingHandle {
        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bed() -> Vec<i16> {
        // 2 s at 16 kHz, never silent.
        (0..32_000).map(|i| ((i % 160) as i16 - 80) * 50 + 11).collect()
    }

    fn config() -> MixerConfig {
        MixerConfig {
            background_volume: 0.4,
            ..MixerConfig::default()
        }
    }

    fn joined(sink: &RecordingSink) -> Vec<u8> {
        sink.sent.lock().iter().flat_map(|b| b.iter().copied()).collect()
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        let mut out = Vec::new();
        pcm::decode_into(bytes, &mut out);
        out
    }

    #[tokio::test(start_paused = true)]
    async fn silent_until_first_chunk() {
        let sink = RecordingSink::default();
        let engine = MixerEngine::builder(config(), BackgroundTrack::new(bed()).unwrap())
            .network(sink.clone())
            .build()
            .unwrap();
        engine.start().unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sink.sent.lock().is_empty());
        let stats = engine.stats();
        assert_eq!(stats.speech_frames + stats.ambience_frames, 0);
        assert!(stats.idle_ticks > 0);

        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn final_chunk_is_mixed_then_ambience_follows() {
        let bed = bed();
        let sink = RecordingSink::default();
        let engine = MixerEngine::builder(config(), BackgroundTrack::new(bed.clone()).unwrap())
            .network(sink.clone())
            .build()
            .unwrap();
        let v = Volumes::from_background(0.4).unwrap();

        engine.push(pcm::encode(&[1000i16; 1_600]), true).unwrap();
        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(550)).await;
        engine.stop().await;

        let out = samples(&joined(&sink));
        assert!(out.len() > 1_600);
        for i in 0..1_600 {
            let expected = pcm::clip(1000.0 * v.foreground + bed[i] as f32 * v.background);
            assert_eq!(out[i], expected, "speech sample {i}");
        }
        for (j, &s) in out[1_600..].iter().enumerate() {
            let b = bed[(1_600 + j) % bed.len()];
            assert_eq!(s, pcm::clip(b as f32 * v.background), "ambience sample {j}");
        }

        let stats = engine.stats();
        assert_eq!(stats.speech_frames, 1);
        assert!(stats.ambience_frames >= 3);
        assert!(sink.sent.lock().iter().all(|c| c.len() <= 640));
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_play_in_push_order() {
        let sink = RecordingSink::default();
        let cfg = MixerConfig {
            background_volume: 0.0,
            ..config()
        };
        let engine = MixerEngine::builder(cfg, BackgroundTrack::new(vec![0i16; 100]).unwrap())
            .network(sink.clone())
            .build()
            .unwrap();
        engine.start().unwrap();

        let intake = engine.intake();
        for (i, value) in [111i16, 222, 333].into_iter().enumerate() {
            intake.push(pcm::encode(&[value; 320]), i == 2).unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop().await;

        let out = samples(&joined(&sink));
        assert_eq!(&out[..320], &[111; 320]);
        assert_eq!(&out[320..640], &[222; 320]);
        assert_eq!(&out[640..960], &[333; 320]);
    }

    #[tokio::test(start_paused = true)]
    async fn double_stop_releases_asset_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let track = BackgroundTrack::new(bed())
            .unwrap()
            .with_handle(Box::new(CountingHandle(closes.clone())));
        let engine = MixerEngine::builder(config(), track).build().unwrap();
        engine.start().unwrap();
        engine.push(pcm::encode(&[5i16; 160]), true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        engine.stop().await;
        engine.stop().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn stop_without_start_still_releases() {
        let closes = Arc::new(AtomicUsize::new(0));
        let track = BackgroundTrack::new(bed())
            .unwrap()
            .with_handle(Box::new(CountingHandle(closes.clone())));
        let engine = MixerEngine::builder(config(), track).build().unwrap();

        engine.stop().await;
        engine.stop().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(engine.start(), Err(MixerError::Stopped)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_start_and_stop_release_exactly_once() {
        for _ in 0..500 {
            let closes = Arc::new(AtomicUsize::new(0));
            let track = BackgroundTrack::new(vec![3i16; 320])
                .unwrap()
                .with_handle(Box::new(CountingHandle(closes.clone())));
            let engine = Arc::new(MixerEngine::builder(config(), track).build().unwrap());

            let stopper = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.stop().await })
            };
            let started = engine.start();
            stopper.await.unwrap();
            engine.stop().await;

            assert_eq!(closes.load(Ordering::SeqCst), 1);
            assert!(!engine.is_running());
            assert!(matches!(
                started,
                Ok(()) | Err(MixerError::Stopped)
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn push_after_stop_is_rejected() {
        let engine = MixerEngine::builder(config(), BackgroundTrack::new(bed()).unwrap())
            .build()
            .unwrap();
        engine.start().unwrap();
        engine.stop().await;
        assert!(matches!(
            engine.push(pcm::encode(&[1i16; 16]), true),
            Err(MixerError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let engine = MixerEngine::builder(config(), BackgroundTrack::new(bed()).unwrap())
            .build()
            .unwrap();
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(MixerError::AlreadyStarted)));
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_frames_after_stop_returns() {
        let sink = RecordingSink::default();
        let engine = MixerEngine::builder(config(), BackgroundTrack::new(bed()).unwrap())
            .network(sink.clone())
            .build()
            .unwrap();
        engine.push(Bytes::new(), true).unwrap();
        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        engine.stop().await;

        let sent = sink.sent.lock().len();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.sent.lock().len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_keeps_speaker_playing() {
        let sink = RecordingSink {
            fail_at: Some(0),
            ..RecordingSink::default()
        };
        let (speaker, speaker_rx) = ChannelSpeaker::new(1_024);
        let cfg = MixerConfig {
            output_to_speaker: true,
            ..config()
        };
        let engine = MixerEngine::builder(cfg, BackgroundTrack::new(bed()).unwrap())
            .network(sink.clone())
            .speaker(speaker)
            .build()
            .unwrap();
        engine.push(pcm::encode(&[300i16; 1_600]), true).unwrap();
        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        engine.stop().await;

        let stats = engine.stats();
        assert_eq!(stats.transport_failures, 1);
        assert_eq!(stats.network_bytes, 0);
        assert!(stats.ambience_frames >= 2);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert!(speaker_rx.try_iter().count() >= 15);
    }

    #[tokio::test]
    async fn speaker_is_ignored_when_disabled() {
        let (speaker, speaker_rx) = ChannelSpeaker::new(8);
        let engine = MixerEngine::builder(config(), BackgroundTrack::new(bed()).unwrap())
            .speaker(speaker)
            .build()
            .unwrap();
        assert!(speaker_rx.recv_async().await.is_err());
        engine.stop().await;
    }

    #[tokio::test]
    async fn configured_speaker_dir_gets_one_file_per_call() {
        let dir = std::env::temp_dir().join(format!("callmix-speaker-{}", CallId::generate()));
        let cfg = MixerConfig {
            output_to_speaker: true,
            speaker_output_path: Some(dir.to_string_lossy().into_owned()),
            ..config()
        };
        let engine = MixerEngine::builder(cfg, BackgroundTrack::new(bed()).unwrap())
            .call_id(CallId::from("leg-1".to_string()))
            .build()
            .unwrap();
        engine.stop().await;

        assert!(dir.join("leg-1.pcm").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_config_fails_build() {
        let cfg = MixerConfig {
            background_volume: 1.2,
            ..config()
        };
        let result = MixerEngine::builder(cfg, BackgroundTrack::new(bed()).unwrap()).build();
        assert!(matches!(result, Err(MixerError::InvalidConfig(_))));
    }
}
