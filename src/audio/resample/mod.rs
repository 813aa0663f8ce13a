//! PCM resampling for the background asset.
//!
//! Only the linear path is needed: the bed is decoded once at startup and
//! sits under speech at reduced gain, so interpolation quality is not the
//! bottleneck.

pub mod linear;

pub use linear::LinearResampler;
