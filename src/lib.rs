pub mod audio;
pub mod common;
pub mod configs;
pub mod engine;
pub mod output;
pub mod server;

pub use engine::MixerEngine;
