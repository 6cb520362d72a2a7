//! Audio building blocks: resampling, WAV framing, accumulation, backpressure.

pub mod accumulator;
pub mod gate;
pub mod resample;
pub mod wav;

pub use accumulator::ChunkAccumulator;
pub use gate::BackpressureGate;
pub use resample::resample;
pub use wav::{decode_pcm16, decode_raw_i16, encode_wav};
