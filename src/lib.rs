//! Live relay of shared screen/tab audio through a speech translation
//! endpoint.
//!
//! The pipeline: system loopback capture, decimation to the endpoint's
//! rate, segment accumulation behind a single-request backpressure gate,
//! an HTTP transcode round-trip per segment, and gapless scheduling of the
//! synthesized replies on the local output device. [`Session`] owns the
//! whole lifecycle.
//!
//! ```no_run
//! use screen_voice_relay::{RelayConfig, Session};
//!
//! let mut config = RelayConfig::default();
//! config.endpoint_url = "http://127.0.0.1:8080/transcode".to_string();
//! let mut session = Session::new(config);
//! session.start()?;
//! // ... audio relays until ...
//! session.stop();
//! # Ok::<(), screen_voice_relay::RelayError>(())
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod net;
pub mod playback;
pub mod session;

pub use config::{RelayConfig, ResponseFormat};
pub use error::{RelayError, Result};
pub use session::{ConnectionState, Session};
