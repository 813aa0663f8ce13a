pub mod background;
pub mod constants;
pub mod demux;
pub mod mix;
pub mod pcm;
pub mod resample;

pub use background::{AssetHandle, BackgroundTrack, decode_background, load_background};
pub use mix::{ForegroundChunk, ForegroundIntake, FrameKind, MixedFrame, Mixer, PendingChunks};
