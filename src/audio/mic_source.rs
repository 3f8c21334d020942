//! Microphone audio capture via cpal.
//!
//! The cpal stream lives on a dedicated capture thread; frames leave through
//! a bounded channel and the raw audio is mirrored to a WAV file inside the
//! callback itself, keeping the recorded file in strict frame order.

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

pub struct MicAudioSource {
    wav_path: Option<PathBuf>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    active: bool,
}

impl MicAudioSource {
    pub fn new(wav_path: Option<PathBuf>) -> Self {
        Self {
            wav_path,
            stop_tx: None,
            thread: None,
            active: false,
        }
    }
}

impl AudioSource for MicAudioSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Microphone
    }

    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, PipelineError> {
        if self.active {
            return Err(PipelineError::Capture(
                "mic source already recording".to_string(),
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

            // Park until stop; the stream keeps delivering callbacks.
            let _ = stop_rx.recv();
            drop(stream);

            if let Some(w) = writer.lock().unwrap().take() {
                if let Err(e) = w.finalize() {
                    warn!("Failed to finalize mic WAV file: {}", e);
                }
            }
            debug!("Mic capture thread exited");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = thread.join();
                return Err(PipelineError::Capture(msg));
            }
            Err(_) => {
                return Err(PipelineError::Capture(
                    "mic capture thread died during startup".to_string(),
                ));
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        self.active = true;

        info!("Mic capture started");
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
        info!("Mic capture stopped");
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn audio_path(&self) -> Option<PathBuf> {
        self.wav_path.clone()
    }
}

impl Drop for MicAudioSource {
    fn drop(&mut self) {
        if self.active {
            debug!("Dropping active MicAudioSource, cleaning up");
            self.stop();
        }
    }
}

fn build_stream(
    wav_path: Option<&std::path::Path>,
    writer: SharedWriter,
    frames_tx: mpsc::Sender<AudioFrame>,
) -> anyhow::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No input device available for mic capture"))?;

    info!(
        "Mic source using device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

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
    let err_fn = |err| error!("Mic stream error: {}", err);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Disk write happens here, on the callback, so the recorded
            // file keeps strict frame order.
            if let Ok(mut guard) = writer.lock() {
                if let Some(w) = guard.as_mut() {
                    for &sample in data {
                        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        let _ = w.write_sample(s);
                    }
                }
            }

            let elapsed_ms = samples_sent * 1000 / SAMPLE_RATE as u64;
            samples_sent += data.len() as u64;

            let frame = AudioFrame {
                samples: data.to_vec(),
                source: SourceTag::Microphone,
                elapsed_ms,
            };
            // Never block the callback; a full channel drops the frame for
            // streaming only, the WAV mirror above already has it.
            let _ = frames_tx.try_send(frame);
        },
        err_fn,
        None,
    )?;

    stream.play()?;
    Ok(stream)
}
