//! Remote endpoint plumbing: the transcode contract, its HTTP implementation,
//! and the dispatcher that ties segments to the playback side.

pub mod dispatch;
pub mod endpoint;

pub use dispatch::TranscodeDispatcher;
pub use endpoint::{HttpEndpoint, TranscodeEndpoint, TranscodeReply};
