//! System audio capture (what others say on Zoom/Meet/etc.).
//!
//! Captures from PipeWire/PulseAudio monitor sources, which expose the
//! system's audio output as an input device. Monitor devices run at their
//! native rate, so the callback decimates down to the pipeline rate before
//! frames leave the thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::source::{AudioFrame, AudioSource, SourceTag, SAMPLE_RATE};
use crate::error::PipelineError;

type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

pub struct SystemAudioSource {
    wav_path: Option<PathBuf>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    active: bool,
}

impl SystemAudioSource {
    pub fn new(wav_path: Option<PathBuf>) -> Self {
        Self {
            wav_path,
            stop_tx: None,
            thread: None,
            active: false,
        }
    }

    /// Find a PipeWire/PulseAudio monitor source via cpal.
    fn find_monitor_device() -> Option<(cpal::Device, u32)> {
        let host = cpal::default_host();

        for device in host.input_devices().ok()? {
            if let Ok(name) = device.name() {
                if name.to_lowercase().contains("monitor") {
                    if let Ok(default_config) = device.default_input_config() {
                        let sample_rate = default_config.sample_rate().0;
                        info!("Found system audio monitor: {} ({}Hz)", name, sample_rate);
                        return Some((device, sample_rate));
                    }
                }
            }
        }

        None
    }
}

impl AudioSource for SystemAudioSource {
    fn tag(&self) -> SourceTag {
        SourceTag::System
    }

    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, PipelineError> {
        if self.active {
            return Err(PipelineError::Capture(
                "system audio source already recording".to_string(),
            ));
        }

        let (frames_tx, frames_rx) = mpsc::channel::<AudioFrame>(64);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        let wav_path = self.wav_path.clone();

        let thread = std::thread::spawn(move || {
            let writer: SharedWriter = Arc::new(Mutex::new(None));

            let built = build_stream(wav_path.as_deref(), writer.clone(), frames_tx);
            let stream = match built {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            let _ = stop_rx.recv();
            drop(stream);

            if let Some(w) = writer.lock().unwrap().take() {
                if let Err(e) = w.finalize() {
                    warn!("Failed to finalize system audio WAV file: {}", e);
                }
            }
            debug!("System audio capture thread exited");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = thread.join();
                return Err(PipelineError::Capture(msg));
            }
            Err(_) => {
                return Err(PipelineError::Capture(
                    "system capture thread died during startup".to_string(),
                ));
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        self.active = true;

        info!("System audio capture started via monitor source");
        Ok(frames_rx)
    }

    fn stop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.active = false;
        info!("System audio capture stopped");
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn audio_path(&self) -> Option<PathBuf> {
        self.wav_path.clone()
    }
}

impl Drop for SystemAudioSource {
    fn drop(&mut self) {
        if self.active {
            debug!("Dropping active SystemAudioSource, cleaning up");
            self.stop();
        }
    }
}

fn build_stream(
    wav_path: Option<&std::path::Path>,
    writer: SharedWriter,
    frames_tx: mpsc::Sender<AudioFrame>,
) -> anyhow::Result<cpal::Stream> {
    let (device, device_rate) = SystemAudioSource::find_monitor_device().ok_or_else(|| {
        anyhow::anyhow!(
            "No system audio monitor source found. \
             Ensure PipeWire is running and a monitor source is available."
        )
    })?;

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Decimate by an integer step; monitor rates are multiples of 16 kHz in
    // practice (44.1 kHz rounds down to a slightly fast step, acceptable
    // for recognition).
    let step = (device_rate / SAMPLE_RATE).max(1) as usize;

    if let Some(path) = wav_path {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        *writer.lock().unwrap() = Some(WavWriter::create(path, spec)?);
    }

    let mut samples_sent: u64 = 0;
    let err_fn = |err| error!("System audio stream error: {}", err);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let downsampled: Vec<f32> = data.iter().step_by(step).copied().collect();

            if let Ok(mut guard) = writer.lock() {
                if let Some(w) = guard.as_mut() {
                    for &sample in &downsampled {
                        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        let _ = w.write_sample(s);
                    }
                }
            }

            let elapsed_ms = samples_sent * 1000 / SAMPLE_RATE as u64;
            samples_sent += downsampled.len() as u64;

            let frame = AudioFrame {
                samples: downsampled,
                source: SourceTag::System,
                elapsed_ms,
            };
            let _ = frames_tx.try_send(frame);
        },
        err_fn,
        None,
    )?;

    stream.play()?;
    Ok(stream)
}
