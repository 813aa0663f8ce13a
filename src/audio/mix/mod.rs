pub mod intake;
pub mod mixer;

pub use intake::{DrainOutcome, ForegroundChunk, ForegroundIntake, IntakeReceiver, PendingChunks, intake_channel};
pub use mixer::{FrameKind, MixedFrame, Mixer, Volumes, blend};
