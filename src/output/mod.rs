//! Mixed-frame delivery: sink abstractions and the fan-out that feeds them.

pub mod fanout;
pub mod sink;
pub mod speaker;

pub use fanout::{Delivery, OutputFanout};
pub use sink::{NetworkSink, SpeakerSink};
pub use speaker::{ChannelSpeaker, FileSpeaker};
