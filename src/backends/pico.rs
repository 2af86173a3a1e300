use super::{AudioSink, EngineCore, LanguageAvailability, Locale, SynthEngine};
use crate::error::{EngineError, EngineResult};
use crate::voice_data::{PicoVoice, PICO_SYSTEM_LINGWARE_PATH, PICO_VOICES};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

const PICO_MIN_RATE: i32 = 20;
const PICO_MAX_RATE: i32 = 500;
const PICO_DEF_RATE: i32 = 100;
const PICO_MIN_PITCH: i32 = 50;
const PICO_MAX_PITCH: i32 = 200;
const PICO_DEF_PITCH: i32 = 100;
const PICO_MIN_VOLUME: i32 = 0;
const PICO_MAX_VOLUME: i32 = 500;
const PICO_DEF_VOLUME: i32 = 100;

const SYNTH_TIMEOUT: Duration = Duration::from_secs(30);

struct Properties {
    rate: i32,
    pitch: i32,
    volume: i32,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            rate: PICO_DEF_RATE,
            pitch: PICO_DEF_PITCH,
            volume: PICO_DEF_VOLUME,
        }
    }
}

/// SVOX Pico driven through the `pico2wave` front end.
/// The engine configuration string is the lingware directory.
pub struct PicoBackend {
    binary: PathBuf,
    lingware_dir: PathBuf,
    core: EngineCore,
    current: Mutex<Option<&'static PicoVoice>>,
    props: Mutex<Properties>,
}

impl PicoBackend {
    pub fn new(binary: PathBuf, config: &str) -> Self {
        let lingware_dir = if config.trim().is_empty() {
            PathBuf::from(PICO_SYSTEM_LINGWARE_PATH)
        } else {
            PathBuf::from(config.trim())
        };

        Self {
            binary,
            lingware_dir,
            core: EngineCore::default(),
            current: Mutex::new(None),
            props: Mutex::new(Properties::default()),
        }
    }

    /// Matches on the language first, then narrows to the country if one matches.
    /// Returns the voice plus whether the country matched too.
    fn find_voice(lang: &str, country: &str) -> Option<(&'static PicoVoice, bool)> {
        let lang_index = PICO_VOICES.iter().position(|v| v.lang == lang)?;
        if country.is_empty() {
            return Some((&PICO_VOICES[lang_index], false));
        }

        match PICO_VOICES[lang_index..]
            .iter()
            .find(|v| v.lang == lang && v.country == country)
        {
            Some(voice) => Some((voice, true)),
            None => Some((&PICO_VOICES[lang_index], false)),
        }
    }

    fn has_resources(&self, voice: &PicoVoice) -> bool {
        voice
            .files
            .iter()
            .all(|f| self.lingware_dir.join(f).is_file())
    }

    fn select(&self, voice: &'static PicoVoice) -> EngineResult<()> {
        if !self.has_resources(voice) {
            return Err(EngineError::Failed(format!(
                "Lingware for {} missing in {}",
                voice.locale,
                self.lingware_dir.display()
            )));
        }
        let mut current = self
            .current
            .lock()
            .map_err(|_| EngineError::Failed("language lock poisoned".into()))?;
        if current.map(|c| c.locale) != Some(voice.locale) {
            info!("Pico: switching language to {}", voice.locale);
        }
        *current = Some(voice);
        Ok(())
    }

    /// Wraps the text in Pico prosody markup for every non-default property.
    fn apply_markup(&self, text: &str) -> String {
        let props = match self.props.lock() {
            Ok(p) => p,
            Err(_) => return text.to_string(),
        };

        let mut out = String::new();
        let mut close = Vec::new();
        if props.pitch != PICO_DEF_PITCH {
            out.push_str(&format!("<pitch level='{}'>", props.pitch));
            close.push("</pitch>");
        }
        if props.rate != PICO_DEF_RATE {
            out.push_str(&format!("<speed level='{}'>", props.rate));
            close.push("</speed>");
        }
        if props.volume != PICO_DEF_VOLUME {
            out.push_str(&format!("<volume level='{}'>", props.volume));
            close.push("</volume>");
        }
        out.push_str(text);
        for tag in close.iter().rev() {
            out.push_str(tag);
        }
        out
    }

    fn parse_level(name: &str, value: &str) -> EngineResult<i32> {
        value
            .trim()
            .parse::<i32>()
            .map_err(|_| EngineError::Failed(format!("Invalid {} value: {}", name, value)))
    }
}

impl SynthEngine for PicoBackend {
    fn id(&self) -> &'static str {
        "pico2wave"
    }

    fn set_low_shelf(
        &self,
        enabled: bool,
        gain: f32,
        attenuation_db: f32,
        freq_hz: f32,
        slope: f32,
    ) -> EngineResult<()> {
        self.core
            .set_low_shelf(enabled, gain, attenuation_db, freq_hz, slope)
    }

    fn is_language_available(
        &self,
        lang: &str,
        country: &str,
        _variant: &str,
    ) -> LanguageAvailability {
        if lang.is_empty() {
            return LanguageAvailability::NotSupported;
        }
        match Self::find_voice(lang, country) {
            None => LanguageAvailability::NotSupported,
            Some((voice, _)) if !self.has_resources(voice) => LanguageAvailability::MissingData,
            Some((_, true)) => LanguageAvailability::CountryAvailable,
            Some((_, false)) => LanguageAvailability::Available,
        }
    }

    fn set_language(&self, lang: &str, country: &str, _variant: &str) -> EngineResult<()> {
        let (voice, _) = Self::find_voice(lang, country)
            .ok_or_else(|| EngineError::UnsupportedLanguage(format!("{}-{}", lang, country)))?;
        self.select(voice)
    }

    fn get_language(&self) -> Option<Locale> {
        let current = self.current.lock().ok()?;
        current.map(|v| Locale {
            language: v.lang.to_string(),
            country: v.country.to_string(),
            variant: String::new(),
        })
    }

    fn set_property(&self, name: &str, value: &str) -> EngineResult<()> {
        if name == "language" {
            let voice = PICO_VOICES
                .iter()
                .find(|v| v.locale == value)
                .ok_or_else(|| EngineError::UnsupportedLanguage(value.to_string()))?;
            return self.select(voice);
        }

        let level = Self::parse_level(name, value)?;
        let mut props = self
            .props
            .lock()
            .map_err(|_| EngineError::Failed("property lock poisoned".into()))?;
        match name {
            "rate" => props.rate = level.clamp(PICO_MIN_RATE, PICO_MAX_RATE),
            "pitch" => props.pitch = level.clamp(PICO_MIN_PITCH, PICO_MAX_PITCH),
            "volume" => props.volume = level.clamp(PICO_MIN_VOLUME, PICO_MAX_VOLUME),
            _ => return Err(EngineError::Failed(format!("Unknown property: {}", name))),
        }
        Ok(())
    }

    fn synthesize(&self, text: &str, sink: Arc<dyn AudioSink>) -> EngineResult<()> {
        self.core.begin_utterance();

        let locale = self
            .current
            .lock()
            .ok()
            .and_then(|c| c.map(|v| v.locale))
            .unwrap_or(PICO_VOICES[0].locale);

        // pico2wave insists on a .wav suffix
        let output = tempfile::Builder::new()
            .prefix("picotts-")
            .suffix(".wav")
            .tempfile()?;

        let markup = self.apply_markup(text);
        debug!("Pico: synthesizing {} chars in {}", markup.len(), locale);

        let mut child = Command::new(&self.binary)
            .arg("-w")
            .arg(output.path())
            .arg("-l")
            .arg(locale)
            .arg("--")
            .arg(&markup)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        match child.wait_timeout(SYNTH_TIMEOUT)? {
            Some(status) if status.success() => {}
            Some(_) => {
                let out = child.wait_with_output()?;
                return Err(EngineError::Failed(format!(
                    "pico2wave error: {}",
                    String::from_utf8_lossy(&out.stderr)
                )));
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                warn!("Pico: synthesis timed out after {:?}", SYNTH_TIMEOUT);
                return Err(EngineError::Failed("Backend timed out".into()));
            }
        }

        let wav = std::fs::read(output.path())?;
        self.core.stream_wav(&wav, sink.as_ref())
    }

    fn stop(&self) -> EngineResult<()> {
        self.core.request_stop();
        Ok(())
    }

    fn shutdown(&self) {
        self.core.request_stop();
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        debug!("Pico: engine shut down");
    }
}
