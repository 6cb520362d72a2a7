//! cpal output device behind the `OutputSink` seam.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{RelayError, Result};
use crate::playback::OutputSink;

const DEVICE_SETUP_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(20);
const DRAIN_CAP: Duration = Duration::from_secs(30);

struct SinkState {
    queue: VecDeque<f32>,
    played: u64,
}

/// Mono sample queue played out on the default output device.
///
/// The cpal stream cannot move between threads, so a dedicated worker owns
/// it for the sink's whole lifetime; this handle only touches the shared
/// queue. The output callback advances the frame counter even while the
/// queue is empty, which is what makes `now()` a real wall clock for the
/// scheduler.
pub struct CpalSink {
    state: Arc<Mutex<SinkState>>,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn open(sample_rate: u32) -> Result<Self> {
        let state = Arc::new(Mutex::new(SinkState {
            queue: VecDeque::new(),
            played: 0,
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let (setup_tx, setup_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let thread_state = state.clone();
        let thread_stop = stop.clone();
        let worker = thread::spawn(move || {
            run_output_stream(sample_rate, thread_state, thread_stop, setup_tx);
        });

        match setup_rx.recv_timeout(DEVICE_SETUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                state,
                sample_rate,
                stop,
                worker: Some(worker),
            }),
            Ok(Err(msg)) => {
                let _ = worker.join();
                Err(RelayError::Playback(msg))
            }
            Err(_) => {
                stop.store(true, Ordering::Release);
                Err(RelayError::Playback(
                    "output device setup timed out".to_string(),
                ))
            }
        }
    }
}

impl OutputSink for CpalSink {
    fn now(&self) -> f64 {
        let played = self.state.lock().unwrap().played;
        played as f64 / self.sample_rate as f64
    }

    fn schedule(&self, samples: Vec<f32>, at: f64) {
        let mut state = self.state.lock().unwrap();
        let target_frame = (at * self.sample_rate as f64).round() as i64;
        let offset = (target_frame - state.played as i64).max(0) as usize;

        if offset >= state.queue.len() {
            // Gap before the clip: pad with silence up to the start frame.
            let pad = offset - state.queue.len();
            state.queue.extend(std::iter::repeat(0.0).take(pad));
            state.queue.extend(samples);
        } else {
            // Overlaps already-queued audio: mix into the overlap, append
            // the rest.
            let overlap = (state.queue.len() - offset).min(samples.len());
            for (i, s) in samples[..overlap].iter().enumerate() {
                state.queue[offset + i] += s;
            }
            state.queue.extend(samples[overlap..].iter().copied());
        }
    }

    fn drain(&self) {
        let deadline = std::time::Instant::now() + DRAIN_CAP;
        loop {
            if self.state.lock().unwrap().queue.is_empty() {
                break;
            }
            if std::time::Instant::now() > deadline {
                tracing::warn!("playback drain hit the cap with audio still queued");
                return;
            }
            thread::sleep(DRAIN_POLL);
        }
        // Device-side buffer grace period.
        thread::sleep(Duration::from_millis(100));
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker body: build the stream, hand the setup result back, then park
/// until told to stop. The stream lives and dies on this thread.
fn run_output_stream(
    sample_rate: u32,
    state: Arc<Mutex<SinkState>>,
    stop: Arc<AtomicBool>,
    setup_tx: mpsc::Sender<std::result::Result<(), String>>,
) {
    #[cfg(target_os = "windows")]
    let host = cpal::host_from_id(cpal::HostId::Wasapi).unwrap_or_else(|_| cpal::default_host());
    #[cfg(not(target_os = "windows"))]
    let host = cpal::default_host();

    let Some(device) = host.default_output_device() else {
        let _ = setup_tx.send(Err("no output device available".to_string()));
        return;
    };
    tracing::debug!("output device: {:?}", device.name());

    // Stereo with the mono source duplicated into both channels; plenty of
    // devices refuse a mono config.
    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let state_f32 = state.clone();
    let stream = match device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut st = state_f32.lock().unwrap();
            for frame in data.chunks_mut(2) {
                let sample = st.queue.pop_front().unwrap_or(0.0);
                for out in frame.iter_mut() {
                    *out = sample;
                }
                st.played += 1;
            }
        },
        |err| tracing::warn!("output stream error: {err}"),
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!("f32 output stream failed ({e}); trying i16");
            let state_i16 = state.clone();
            match device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut st = state_i16.lock().unwrap();
                    for frame in data.chunks_mut(2) {
                        let sample = st.queue.pop_front().unwrap_or(0.0);
                        let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        for out in frame.iter_mut() {
                            *out = quantized;
                        }
                        st.played += 1;
                    }
                },
                |err| tracing::warn!("output stream error: {err}"),
                None,
            ) {
                Ok(stream) => stream,
                Err(e2) => {
                    let _ = setup_tx.send(Err(format!("cannot open output stream: {e2}")));
                    return;
                }
            }
        }
    };

    if let Err(e) = stream.play() {
        let _ = setup_tx.send(Err(format!("cannot start output stream: {e}")));
        return;
    }
    let _ = setup_tx.send(Ok(()));

    while !stop.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
}
