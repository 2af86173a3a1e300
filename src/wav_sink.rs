use crate::backends::{AudioFormat, AudioSink};
use crate::error::{EngineError, EngineResult};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

type Writer = hound::WavWriter<BufWriter<File>>;

struct State {
    writer: Option<Writer>,
    format: AudioFormat,
    failed: bool,
}

/// Audio sink that writes the utterance to a WAV file.
pub struct WavFileSink {
    path: PathBuf,
    state: Mutex<State>,
}

fn wav_err(e: hound::Error) -> EngineError {
    EngineError::Failed(format!("WAV write failed: {}", e))
}

impl WavFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(State {
                writer: None,
                format: AudioFormat::Pcm16Bit,
                failed: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the engine reported an error for this utterance.
    pub fn failed(&self) -> bool {
        self.state.lock().map(|s| s.failed).unwrap_or(true)
    }

    fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| EngineError::Failed("sink lock poisoned".into()))
    }
}

impl AudioSink for WavFileSink {
    fn start(&self, sample_rate: u32, format: AudioFormat, channels: u16) -> EngineResult<()> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: match format {
                AudioFormat::Pcm8Bit => 8,
                AudioFormat::Pcm16Bit => 16,
            },
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec).map_err(wav_err)?;

        let mut state = self.lock()?;
        state.writer = Some(writer);
        state.format = format;
        debug!("Writing {} Hz audio to {}", sample_rate, self.path.display());
        Ok(())
    }

    fn audio_available(&self, buffer: &[u8]) -> EngineResult<()> {
        let mut state = self.lock()?;
        let format = state.format;
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| EngineError::Failed("audio before start".into()))?;

        match format {
            AudioFormat::Pcm16Bit => {
                for pair in buffer.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .map_err(wav_err)?;
                }
            }
            AudioFormat::Pcm8Bit => {
                for &b in buffer {
                    writer
                        .write_sample((b as i16 - 128) as i8)
                        .map_err(wav_err)?;
                }
            }
        }
        Ok(())
    }

    fn done(&self) {
        let writer = match self.state.lock() {
            Ok(mut state) => state.writer.take(),
            Err(_) => None,
        };
        if let Some(writer) = writer {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize {}: {}", self.path.display(), e);
            }
        }
    }

    fn error(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failed = true;
        }
    }
}
