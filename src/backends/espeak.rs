use super::{AudioSink, EngineCore, LanguageAvailability, Locale, SynthEngine};
use crate::error::{EngineError, EngineResult};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// eSpeak words per minute at the neutral rate of 100.
const ESPEAK_BASE_WPM: i32 = 175;

struct Settings {
    voice: Option<String>,
    locale: Option<Locale>,
    rate: i32,
    pitch: i32,
    volume: i32,
}

pub struct EspeakBackend {
    binary: PathBuf,
    extra_args: Vec<String>,
    core: EngineCore,
    settings: Mutex<Settings>,
}

impl EspeakBackend {
    /// `config` is split on whitespace and passed as extra arguments.
    pub fn new(binary: PathBuf, config: &str) -> Self {
        Self {
            binary,
            extra_args: config.split_whitespace().map(String::from).collect(),
            core: EngineCore::default(),
            settings: Mutex::new(Settings {
                voice: None,
                locale: None,
                rate: 100,
                pitch: 100,
                volume: 100,
            }),
        }
    }

    /// espeak voice name, with the variant appended as `+variant` when given.
    fn voice_for(lang: &str, country: &str, variant: &str) -> String {
        let base = match lang {
            "eng" => "en",
            "deu" => "de",
            "spa" => "es",
            "fra" => "fr",
            "ita" => "it",
            other => other,
        };
        let voice = match (base, country) {
            ("en", "USA") => "en-us".to_string(),
            ("en", "GBR") => "en-gb".to_string(),
            _ => base.to_lowercase(),
        };
        if variant.is_empty() {
            voice
        } else {
            format!("{}+{}", voice, variant.to_lowercase())
        }
    }

    fn command_args(&self) -> Vec<String> {
        let mut args = vec!["--stdout".to_string()];
        if let Ok(s) = self.settings.lock() {
            if let Some(voice) = &s.voice {
                args.push("-v".into());
                args.push(voice.clone());
            }
            args.push("-s".into());
            args.push((ESPEAK_BASE_WPM * s.rate / 100).clamp(80, 450).to_string());
            args.push("-p".into());
            args.push((s.pitch / 2).clamp(0, 99).to_string());
            args.push("-a".into());
            args.push(s.volume.clamp(0, 200).to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl SynthEngine for EspeakBackend {
    fn id(&self) -> &'static str {
        "espeak-ng"
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
        variant: &str,
    ) -> LanguageAvailability {
        if lang.is_empty() {
            LanguageAvailability::NotSupported
        } else if country.is_empty() {
            LanguageAvailability::Available
        } else if variant.is_empty() {
            LanguageAvailability::CountryAvailable
        } else {
            LanguageAvailability::CountryVarAvailable
        }
    }

    fn set_language(&self, lang: &str, country: &str, variant: &str) -> EngineResult<()> {
        if lang.is_empty() {
            return Err(EngineError::UnsupportedLanguage(String::new()));
        }
        let mut s = self
            .settings
            .lock()
            .map_err(|_| EngineError::Failed("settings lock poisoned".into()))?;
        s.voice = Some(Self::voice_for(lang, country, variant));
        s.locale = Some(Locale {
            language: lang.to_string(),
            country: country.to_string(),
            variant: variant.to_string(),
        });
        Ok(())
    }

    fn get_language(&self) -> Option<Locale> {
        self.settings.lock().ok()?.locale.clone()
    }

    fn set_property(&self, name: &str, value: &str) -> EngineResult<()> {
        let mut s = self
            .settings
            .lock()
            .map_err(|_| EngineError::Failed("settings lock poisoned".into()))?;
        if name == "language" {
            s.voice = Some(value.to_lowercase());
            return Ok(());
        }
        let level: i32 = value
            .trim()
            .parse()
            .map_err(|_| EngineError::Failed(format!("Invalid {} value: {}", name, value)))?;
        match name {
            "rate" => s.rate = level,
            "pitch" => s.pitch = level,
            "volume" => s.volume = level,
            _ => return Err(EngineError::Failed(format!("Unknown property: {}", name))),
        }
        Ok(())
    }

    fn synthesize(&self, text: &str, sink: Arc<dyn AudioSink>) -> EngineResult<()> {
        self.core.begin_utterance();
        debug!("eSpeak: synthesizing {} chars", text.len());

        let mut child = Command::new(&self.binary)
            .args(self.command_args())
            .arg("--")
            .arg(text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stdout while waiting, a long utterance would fill the pipe otherwise
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Failed("no stdout from espeak".into()))?;
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        // Wait for 5 seconds max
        match child.wait_timeout(Duration::from_secs(5))? {
            Some(status) if status.success() => {}
            Some(_) => {
                let mut err_msg = String::new();
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut err_msg);
                }
                return Err(EngineError::Failed(format!("espeak error: {}", err_msg)));
            }
            None => {
                // Timeout occurred, kill the process
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Failed("Backend timed out after 5s".into()));
            }
        }

        let wav = reader
            .join()
            .map_err(|_| EngineError::Failed("espeak reader panicked".into()))??;
        self.core.stream_wav(&wav, sink.as_ref())
    }

    fn stop(&self) -> EngineResult<()> {
        self.core.request_stop();
        Ok(())
    }

    fn shutdown(&self) {
        self.core.request_stop();
        debug!("eSpeak: engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_mapping() {
        assert_eq!(EspeakBackend::voice_for("eng", "GBR", ""), "en-gb");
        assert_eq!(EspeakBackend::voice_for("eng", "", ""), "en");
        assert_eq!(EspeakBackend::voice_for("fra", "FRA", ""), "fr");
        assert_eq!(EspeakBackend::voice_for("NL", "", ""), "nl");
        assert_eq!(EspeakBackend::voice_for("eng", "USA", "F3"), "en-us+f3");
    }

    #[test]
    fn test_variant_availability() {
        let espeak = EspeakBackend::new(PathBuf::from("espeak-ng"), "");
        assert_eq!(
            espeak.is_language_available("", "USA", "f3"),
            LanguageAvailability::NotSupported
        );
        assert_eq!(
            espeak.is_language_available("eng", "USA", ""),
            LanguageAvailability::CountryAvailable
        );
        assert_eq!(
            espeak.is_language_available("eng", "USA", "f3"),
            LanguageAvailability::CountryVarAvailable
        );
        assert!(LanguageAvailability::CountryVarAvailable.is_available());

        espeak.set_language("eng", "USA", "f3").unwrap();
        assert_eq!(espeak.get_language().unwrap().variant, "f3");
        assert_eq!(&espeak.command_args()[1..3], &["-v", "en-us+f3"]);
    }

    #[test]
    fn test_properties_map_to_arguments() {
        let espeak = EspeakBackend::new(PathBuf::from("espeak-ng"), "--punct");
        espeak.set_property("rate", "200").unwrap();
        espeak.set_property("pitch", "100").unwrap();
        espeak.set_language("deu", "DEU", "").unwrap();

        let args = espeak.command_args();
        assert_eq!(
            args,
            vec!["--stdout", "-v", "de", "-s", "350", "-p", "50", "-a", "100", "--punct"]
        );
        assert_eq!(espeak.get_language().unwrap().country, "DEU");
        assert!(espeak.set_property("rate", "x").is_err());
    }
}
