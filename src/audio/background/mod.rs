//! Background ambience: the decoded bed and its loader.

pub mod loader;
pub mod track;

pub use loader::{decode_background, load_background};
pub use track::{AssetHandle, BackgroundTrack};
