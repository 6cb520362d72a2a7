//! System loopback capture over cpal.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::capture::{CaptureBlock, CaptureSource};
use crate::error::{RelayError, Result};

const DEVICE_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Captures whatever the system is playing by opening the default output
/// device in loopback mode (WASAPI exposes render devices as capture
/// endpoints), with the default input device as a fallback.
///
/// The cpal stream cannot leave the thread it is built on, so a worker
/// thread owns it; the handle shares only the stop flag and the level
/// meter. Blocks are pushed over an unbounded channel, so the device
/// callback never blocks on a slow consumer.
pub struct SystemLoopback {
    stop: Arc<AtomicBool>,
    level_bits: Arc<AtomicU32>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SystemLoopback {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            level_bits: Arc::new(AtomicU32::new(0)),
            worker: None,
        }
    }
}

impl Default for SystemLoopback {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for SystemLoopback {
    fn start(&mut self, sink: mpsc::Sender<CaptureBlock>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::Release);

        let (setup_tx, setup_rx) = mpsc::channel::<std::result::Result<(), RelayError>>();
        let stop = self.stop.clone();
        let level_bits = self.level_bits.clone();
        let worker = thread::spawn(move || {
            run_capture_stream(sink, stop, level_bits, setup_tx);
        });

        match setup_rx.recv_timeout(DEVICE_SETUP_TIMEOUT) {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.stop.store(true, Ordering::Release);
                Err(RelayError::Capture(
                    "capture device setup timed out".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn input_level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Acquire))
    }
}

impl Drop for SystemLoopback {
    fn drop(&mut self) {
        CaptureSource::stop(self);
    }
}

fn run_capture_stream(
    sink: mpsc::Sender<CaptureBlock>,
    stop: Arc<AtomicBool>,
    level_bits: Arc<AtomicU32>,
    setup_tx: mpsc::Sender<std::result::Result<(), RelayError>>,
) {
    #[cfg(target_os = "windows")]
    let host = cpal::host_from_id(cpal::HostId::Wasapi).unwrap_or_else(|_| cpal::default_host());
    #[cfg(not(target_os = "windows"))]
    let host = cpal::default_host();

    let device = match host.default_output_device().or_else(|| host.default_input_device()) {
        Some(d) => d,
        None => {
            let _ = setup_tx.send(Err(RelayError::NoAudioTrack));
            return;
        }
    };
    tracing::debug!("capture device: {:?}", device.name());

    let config = match device
        .default_output_config()
        .or_else(|_| device.default_input_config())
    {
        Ok(c) => c,
        Err(e) => {
            let _ = setup_tx.send(Err(RelayError::Capture(format!(
                "no usable stream config: {e}"
            ))));
            return;
        }
    };
    let sample_rate = config.sample_rate();
    let channels = config.channels() as usize;

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let sink = sink.clone();
            device.build_input_stream(
                &config.clone().into(),
                move |data: &[f32], _: &_| {
                    let mono = downmix_f32(data, channels);
                    store_level(&level_bits, &mono);
                    let _ = sink.send(CaptureBlock {
                        samples: mono,
                        sample_rate,
                    });
                },
                |e| tracing::warn!("capture stream error: {e}"),
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let sink = sink.clone();
            device.build_input_stream(
                &config.clone().into(),
                move |data: &[i16], _: &_| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / 32768.0).collect();
                    let mono = downmix_f32(&floats, channels);
                    store_level(&level_bits, &mono);
                    let _ = sink.send(CaptureBlock {
                        samples: mono,
                        sample_rate,
                    });
                },
                |e| tracing::warn!("capture stream error: {e}"),
                None,
            )
        }
        other => {
            let _ = setup_tx.send(Err(RelayError::Capture(format!(
                "unsupported sample format {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(cpal::BuildStreamError::DeviceNotAvailable) => {
            let _ = setup_tx.send(Err(RelayError::PermissionDenied));
            return;
        }
        Err(e) => {
            let _ = setup_tx.send(Err(RelayError::Capture(format!(
                "cannot open capture stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = setup_tx.send(Err(RelayError::Capture(format!(
            "cannot start capture stream: {e}"
        ))));
        return;
    }
    let _ = setup_tx.send(Ok(()));

    while !stop.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
}

fn downmix_f32(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

fn store_level(level_bits: &AtomicU32, mono: &[f32]) {
    if mono.is_empty() {
        return;
    }
    let rms = (mono.iter().map(|s| s * s).sum::<f32>() / mono.len() as f32).sqrt();
    level_bits.store(rms.to_bits(), Ordering::Release);
}
