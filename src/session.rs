//! Session lifecycle: wiring capture, dispatch, and playback together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::{resample, BackpressureGate, ChunkAccumulator};
use crate::capture::{CaptureSource, SystemLoopback};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::net::{HttpEndpoint, TranscodeDispatcher, TranscodeEndpoint};
use crate::playback::{CpalSink, OutputSink, PlaybackScheduler};

const PUMP_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// One live relay session: loopback capture feeding a transcode endpoint,
/// replies playing out gaplessly on the local device.
///
/// `start` and `stop` are idempotent and may be called in any order; all
/// failure paths release whatever they had already acquired.
pub struct Session {
    config: RelayConfig,
    state: ConnectionState,
    last_error: Option<String>,
    status: Arc<Mutex<String>>,
    capture: Box<dyn CaptureSource>,
    endpoint: Arc<dyn TranscodeEndpoint>,
    gate: Arc<BackpressureGate>,
    playback: Option<Arc<Mutex<PlaybackScheduler>>>,
    stop_flag: Arc<AtomicBool>,
    pump: Option<thread::JoinHandle<()>>,
    sink_override: Option<Box<dyn OutputSink>>,
}

impl Session {
    pub fn new(config: RelayConfig) -> Self {
        let endpoint: Arc<dyn TranscodeEndpoint> = Arc::new(HttpEndpoint::new(&config));
        Self::with_parts(config, Box::new(SystemLoopback::new()), endpoint, None)
    }

    /// Assemble a session from explicit parts. `sink` replaces the default
    /// output device when given.
    pub fn with_parts(
        config: RelayConfig,
        capture: Box<dyn CaptureSource>,
        endpoint: Arc<dyn TranscodeEndpoint>,
        sink: Option<Box<dyn OutputSink>>,
    ) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            last_error: None,
            status: Arc::new(Mutex::new(String::new())),
            capture,
            endpoint,
            gate: Arc::new(BackpressureGate::new()),
            playback: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            pump: None,
            sink_override: sink,
        }
    }

    /// Bring the pipeline up: capture stream, optional model warm-up,
    /// endpoint probe, output device, then the pump thread.
    ///
    /// A failed warm-up is fatal only when the configuration requires one;
    /// a failed probe is logged and the session proceeds, since the first
    /// real request will surface the problem anyway.
    pub fn start(&mut self) -> Result<()> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        self.last_error = None;
        tracing::info!(endpoint = %self.config.endpoint_url, "session starting");

        let (block_tx, block_rx) = mpsc::channel();
        if let Err(e) = self.capture.start(block_tx) {
            return Err(self.fail(e));
        }

        if self.config.warmup_required {
            tracing::info!("warming up the model");
            if let Err(e) = self.endpoint.warm_up() {
                self.capture.stop();
                return Err(self.fail(e));
            }
        }

        if let Err(e) = self.endpoint.probe() {
            tracing::warn!("endpoint probe failed (continuing): {e}");
            *self.status.lock().unwrap() = format!("probe failed: {e}");
        }

        // Output device last: an injected sink must survive earlier start
        // failures so a retried start still uses it.
        let sink: Box<dyn OutputSink> = match self.sink_override.take() {
            Some(sink) => sink,
            None => match CpalSink::open(self.config.playback_sample_rate) {
                Ok(sink) => Box::new(sink),
                Err(e) => {
                    self.capture.stop();
                    return Err(self.fail(e));
                }
            },
        };
        let playback = Arc::new(Mutex::new(PlaybackScheduler::new(
            sink,
            self.config.playback_sample_rate,
            self.config.response_format,
        )));

        self.stop_flag.store(false, Ordering::Release);
        let dispatcher = TranscodeDispatcher::new(
            self.endpoint.clone(),
            self.gate.clone(),
            self.config.target_sample_rate,
        );
        let pump = spawn_pump(
            block_rx,
            dispatcher,
            self.gate.clone(),
            playback.clone(),
            self.status.clone(),
            self.stop_flag.clone(),
            &self.config,
        );

        self.playback = Some(playback);
        self.pump = Some(pump);
        self.state = ConnectionState::Connected;
        tracing::info!("session connected");
        Ok(())
    }

    /// Tear the pipeline down in dependency order: dispatch pump first so
    /// nothing new enters the network, then capture, then playback. A
    /// request still in flight finds the scheduler closed and its reply is
    /// discarded.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
        self.capture.stop();
        if let Some(playback) = self.playback.take() {
            playback.lock().unwrap().close();
        }
        // An explicit stop always lands in Disconnected, even from Error;
        // `last_error` stays around for display.
        self.state = ConnectionState::Disconnected;
        tracing::info!("session stopped");
    }

    /// Block until already-scheduled reply audio has played out.
    pub fn drain_playback(&self) {
        if let Some(playback) = &self.playback {
            playback.lock().unwrap().drain();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Capture level meter, RMS in [0, 1].
    pub fn input_level(&self) -> f32 {
        self.capture.input_level()
    }

    /// One-line pipeline diagnostic, updated by the pump thread.
    pub fn status_line(&self) -> String {
        self.status.lock().unwrap().clone()
    }

    fn fail(&mut self, e: RelayError) -> RelayError {
        tracing::error!("session start failed: {e}");
        self.last_error = Some(e.to_string());
        self.state = ConnectionState::Error;
        e
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pump thread body: drain capture blocks, decimate to the target rate,
/// accumulate, and hand ready segments to a dispatch thread. One dispatch
/// thread at a time exists because the gate refuses a second segment.
fn spawn_pump(
    block_rx: mpsc::Receiver<crate::capture::CaptureBlock>,
    dispatcher: TranscodeDispatcher,
    gate: Arc<BackpressureGate>,
    playback: Arc<Mutex<PlaybackScheduler>>,
    status: Arc<Mutex<String>>,
    stop_flag: Arc<AtomicBool>,
    config: &RelayConfig,
) -> thread::JoinHandle<()> {
    let target_rate = config.target_sample_rate;
    let mut acc = ChunkAccumulator::new(
        target_rate,
        config.min_segment_secs,
        config.silence_threshold,
    );
    let flush_interval = Duration::from_millis(config.flush_interval_ms);

    thread::spawn(move || {
        let mut last_flush = Instant::now();
        // Last round-trip failure, shown in the status line until the next
        // successful dispatch clears it.
        let last_failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        while !stop_flag.load(Ordering::Acquire) {
            let mut got_audio = false;
            while let Ok(block) = block_rx.try_recv() {
                match resample(&block.samples, block.sample_rate, target_rate) {
                    Ok(resampled) => {
                        acc.append(&resampled);
                        got_audio = true;
                    }
                    Err(e) => tracing::warn!("capture block dropped: {e}"),
                }
            }

            if got_audio || last_flush.elapsed() >= flush_interval {
                last_flush = Instant::now();
                if let Some(segment) = acc.try_dispatch(&gate) {
                    let dispatcher = dispatcher.clone();
                    let playback = playback.clone();
                    let status = status.clone();
                    let last_failure = last_failure.clone();
                    thread::spawn(move || match dispatcher.send(segment, &playback) {
                        Ok(()) => {
                            last_failure.lock().unwrap().take();
                        }
                        Err(e) => {
                            tracing::warn!("transcode round-trip failed: {e}");
                            let msg = format!("transcode failed: {e}");
                            *status.lock().unwrap() = msg.clone();
                            *last_failure.lock().unwrap() = Some(msg);
                        }
                    });
                }
                let backlog = playback.lock().unwrap().backlog_secs();
                let mut line = format!(
                    "buffered {:.1}s | in-flight: {} | playback backlog {:.1}s",
                    acc.buffered_secs(),
                    if gate.is_busy() { "yes" } else { "no" },
                    backlog,
                );
                if let Some(failure) = last_failure.lock().unwrap().as_ref() {
                    line.push_str(" | ");
                    line.push_str(failure);
                }
                *status.lock().unwrap() = line;
            }
            thread::sleep(PUMP_POLL);
        }
    })
}
