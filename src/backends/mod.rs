pub mod espeak;
pub mod pico;

use crate::error::{ConfigurationError, EngineError, EngineResult};
use crate::filter::{FilterSpec, LowShelf, PICO_ENGINE_MARKER};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Size of each PCM buffer handed to an [`AudioSink`].
pub const SYNTH_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Pcm8Bit,
    Pcm16Bit,
}

/// How well an engine supports a requested locale, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageAvailability {
    NotSupported,
    MissingData,
    Available,
    CountryAvailable,
    CountryVarAvailable,
}

impl LanguageAvailability {
    pub fn is_available(self) -> bool {
        self >= LanguageAvailability::Available
    }
}

/// ISO-3 language/country/variant triple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locale {
    pub language: String,
    pub country: String,
    pub variant: String,
}

/// Receives synthesized audio. Called by the engine, never by the proxy.
#[cfg_attr(test, mockall::automock)]
pub trait AudioSink: Send + Sync {
    fn start(&self, sample_rate: u32, format: AudioFormat, channels: u16) -> EngineResult<()>;
    fn audio_available(&self, buffer: &[u8]) -> EngineResult<()>;
    fn done(&self);
    fn error(&self);
}

/// Trait that all synthesis engines must implement.
/// Mirrors the native engine contract: configure, select a language, synthesize into a sink.
#[cfg_attr(test, mockall::automock)]
pub trait SynthEngine: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "pico2wave")
    fn id(&self) -> &'static str;

    fn set_low_shelf(
        &self,
        enabled: bool,
        gain: f32,
        attenuation_db: f32,
        freq_hz: f32,
        slope: f32,
    ) -> EngineResult<()>;

    fn is_language_available(&self, lang: &str, country: &str, variant: &str)
        -> LanguageAvailability;

    fn set_language(&self, lang: &str, country: &str, variant: &str) -> EngineResult<()>;

    fn get_language(&self) -> Option<Locale>;

    /// Known properties: "rate", "pitch", "volume"
    fn set_property(&self, name: &str, value: &str) -> EngineResult<()>;

    fn synthesize(&self, text: &str, sink: Arc<dyn AudioSink>) -> EngineResult<()>;

    fn stop(&self) -> EngineResult<()>;

    fn shutdown(&self);
}

/// Opens engines from an identifier and an engine-specific configuration string.
#[cfg_attr(test, mockall::automock)]
pub trait EngineLoader: Send + Sync {
    fn load(&self, identifier: &str, config: &str)
        -> Result<Box<dyn SynthEngine>, ConfigurationError>;
}

/// Loads command-line engines installed on the system.
pub struct CommandLoader;

impl EngineLoader for CommandLoader {
    fn load(
        &self,
        identifier: &str,
        config: &str,
    ) -> Result<Box<dyn SynthEngine>, ConfigurationError> {
        load_engine(identifier, config)
    }
}

/// Picks a backend from the engine identifier. Pico identifiers get the pico2wave
/// backend, everything else is driven as an eSpeak-compatible binary.
pub fn load_engine(
    identifier: &str,
    config: &str,
) -> Result<Box<dyn SynthEngine>, ConfigurationError> {
    let binary = resolve_binary(identifier)
        .ok_or_else(|| ConfigurationError::EngineNotFound(identifier.to_string()))?;

    let file_name = binary
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();

    debug!("Loading engine {} (config: {:?})", binary.display(), config);
    if file_name.contains(PICO_ENGINE_MARKER) {
        let lingware_dir = config.trim();
        if !lingware_dir.is_empty() && !Path::new(lingware_dir).is_dir() {
            return Err(ConfigurationError::Load(format!(
                "lingware directory {} does not exist",
                lingware_dir
            )));
        }
        Ok(Box::new(pico::PicoBackend::new(binary, config)))
    } else {
        Ok(Box::new(espeak::EspeakBackend::new(binary, config)))
    }
}

/// Resolves a binary name against `PATH`; paths with a separator are taken as-is.
pub fn resolve_binary(identifier: &str) -> Option<PathBuf> {
    if identifier.is_empty() {
        return None;
    }

    let candidate = Path::new(identifier);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(identifier))
            .find(|p| p.is_file())
    })
}

/// State every command engine carries: filter config and the stop flag.
#[derive(Default)]
pub(crate) struct EngineCore {
    filter: Mutex<Option<FilterSpec>>,
    stop_requested: AtomicBool,
}

impl EngineCore {
    pub(crate) fn set_low_shelf(
        &self,
        enabled: bool,
        gain: f32,
        attenuation_db: f32,
        freq_hz: f32,
        slope: f32,
    ) -> EngineResult<()> {
        let mut filter = self
            .filter
            .lock()
            .map_err(|_| EngineError::Failed("filter lock poisoned".into()))?;

        if !enabled {
            *filter = None;
            return Ok(());
        }
        if slope == 0.0 {
            return Err(EngineError::Failed("Invalid slope, can't be zero".into()));
        }
        *filter = Some(FilterSpec {
            gain,
            low_shelf_attenuation_db: attenuation_db,
            transition_frequency_hz: freq_hz,
            shelf_slope_q: slope,
            enabled,
        });
        Ok(())
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn begin_utterance(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Decodes a WAV produced by the engine, runs the post-filter over it and hands it
    /// to the sink in fixed-size buffers.
    pub(crate) fn stream_wav(&self, wav: &[u8], sink: &dyn AudioSink) -> EngineResult<()> {
        let mut reader = hound::WavReader::new(Cursor::new(wav))
            .map_err(|e| EngineError::Failed(format!("Failed to decode engine output: {}", e)))?;
        let spec = reader.spec();

        let (format, bytes) = match spec.bits_per_sample {
            16 => {
                let mut samples = reader
                    .samples::<i16>()
                    .collect::<Result<Vec<i16>, _>>()
                    .map_err(|e| EngineError::Failed(e.to_string()))?;

                let filter = self.filter.lock().ok().and_then(|f| *f);
                if let Some(filter) = filter {
                    match LowShelf::from_spec(&filter, spec.sample_rate) {
                        Some(mut shelf) => shelf.process(&mut samples),
                        None => warn!("Skipping post-filter for sample rate {}", spec.sample_rate),
                    }
                }

                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                (AudioFormat::Pcm16Bit, bytes)
            }
            8 => {
                let samples = reader
                    .samples::<i8>()
                    .collect::<Result<Vec<i8>, _>>()
                    .map_err(|e| EngineError::Failed(e.to_string()))?;
                // WAV stores 8-bit PCM unsigned
                let bytes: Vec<u8> = samples.iter().map(|&s| (s as i16 + 128) as u8).collect();
                (AudioFormat::Pcm8Bit, bytes)
            }
            bits => {
                return Err(EngineError::Failed(format!(
                    "Unsupported sample width: {} bits",
                    bits
                )))
            }
        };

        sink.start(spec.sample_rate, format, spec.channels)?;
        for chunk in bytes.chunks(SYNTH_BUFFER_SIZE) {
            if self.stop_requested() {
                debug!("Synthesis stopped before end of utterance");
                break;
            }
            sink.audio_available(chunk)?;
        }
        sink.done();
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::wav_bytes;
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        started: Mutex<Option<(u32, AudioFormat, u16)>>,
        chunks: Mutex<Vec<Vec<u8>>>,
        done: AtomicBool,
    }

    impl AudioSink for CollectingSink {
        fn start(&self, rate: u32, format: AudioFormat, channels: u16) -> EngineResult<()> {
            *self.started.lock().unwrap() = Some((rate, format, channels));
            Ok(())
        }
        fn audio_available(&self, buffer: &[u8]) -> EngineResult<()> {
            self.chunks.lock().unwrap().push(buffer.to_vec());
            Ok(())
        }
        fn done(&self) {
            self.done.store(true, Ordering::SeqCst);
        }
        fn error(&self) {}
    }

    #[test]
    fn test_stream_wav_chunks_unfiltered() {
        let core = EngineCore::default();
        core.set_low_shelf(false, 5.0, -18.0, 1100.0, 1.0).unwrap();
        let samples: Vec<i16> = (0..3000).map(|i| (i % 100) as i16).collect();
        let sink = CollectingSink::default();

        core.stream_wav(&wav_bytes(16000, &samples), &sink).unwrap();

        assert_eq!(
            *sink.started.lock().unwrap(),
            Some((16000, AudioFormat::Pcm16Bit, 1))
        );
        let chunks = sink.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 3); // 6000 bytes
        assert!(chunks[..2].iter().all(|c| c.len() == SYNTH_BUFFER_SIZE));
        let joined: Vec<u8> = chunks.concat();
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(joined, expected);
        assert!(sink.done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stream_wav_applies_filter() {
        let core = EngineCore::default();
        core.set_low_shelf(true, 5.0, -18.0, 1100.0, 1.0).unwrap();
        let samples = vec![100i16; 512];
        let sink = CollectingSink::default();

        core.stream_wav(&wav_bytes(16000, &samples), &sink).unwrap();

        let joined: Vec<u8> = sink.chunks.lock().unwrap().concat();
        let first = i16::from_le_bytes([joined[0], joined[1]]);
        assert!(first > 100, "expected boosted onset, got {}", first);
    }

    #[test]
    fn test_zero_slope_rejected() {
        let core = EngineCore::default();
        assert!(core.set_low_shelf(true, 5.0, -18.0, 1100.0, 0.0).is_err());
        assert!(core.set_low_shelf(false, 5.0, -18.0, 1100.0, 0.0).is_ok());
    }

    #[test]
    fn test_stop_cuts_delivery() {
        let core = EngineCore::default();
        core.request_stop();
        let sink = CollectingSink::default();
        core.stream_wav(&wav_bytes(16000, &[1; 4096]), &sink).unwrap();
        assert!(sink.chunks.lock().unwrap().is_empty());
        assert!(sink.done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_resolve_binary() {
        assert!(resolve_binary("").is_none());
        assert!(resolve_binary("/definitely/not/here/pico2wave").is_none());
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("pico2wave");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        assert_eq!(resolve_binary(bin.to_str().unwrap()), Some(bin));
    }

    #[test]
    fn test_missing_engine_fails_to_load() {
        let err = load_engine("/nowhere/libttspico.so", "").err().unwrap();
        assert!(matches!(err, ConfigurationError::EngineNotFound(_)));
    }

    #[test]
    fn test_pico_with_missing_lingware_dir_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("pico2wave");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        let bin = bin.to_str().unwrap();

        let missing = dir.path().join("no-lang");
        let err = load_engine(bin, missing.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, ConfigurationError::Load(_)));

        let engine = load_engine(bin, dir.path().to_str().unwrap()).unwrap();
        assert_eq!(engine.id(), "pico2wave");
    }
}
