//! Pico lingware inventory: which voices exist, which files they need, and whether
//! those files are installed.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where distributions install the Pico lingware.
pub const PICO_SYSTEM_LINGWARE_PATH: &str = "/usr/share/pico/lang/";

pub struct PicoVoice {
    /// ISO-3 language code
    pub lang: &'static str,
    /// ISO-3 country code
    pub country: &'static str,
    pub locale: &'static str,
    /// Text analysis and signal generation resources
    pub files: [&'static str; 2],
    pub sample_text: &'static str,
}

impl PicoVoice {
    pub fn info(&self) -> String {
        format!("{}-{}", self.lang, self.country)
    }
}

/// Engine order: the first entry of a language is its default voice.
pub static PICO_VOICES: [PicoVoice; 6] = [
    PicoVoice {
        lang: "eng",
        country: "USA",
        locale: "en-US",
        files: ["en-US_ta.bin", "en-US_lh0_sg.bin"],
        sample_text: "This is an example of speech synthesis in English.",
    },
    PicoVoice {
        lang: "eng",
        country: "GBR",
        locale: "en-GB",
        files: ["en-GB_ta.bin", "en-GB_kh0_sg.bin"],
        sample_text: "This is an example of speech synthesis in English.",
    },
    PicoVoice {
        lang: "deu",
        country: "DEU",
        locale: "de-DE",
        files: ["de-DE_ta.bin", "de-DE_gl0_sg.bin"],
        sample_text: "Dies ist ein Beispiel für Sprachsynthese in Deutsch.",
    },
    PicoVoice {
        lang: "spa",
        country: "ESP",
        locale: "es-ES",
        files: ["es-ES_ta.bin", "es-ES_zl0_sg.bin"],
        sample_text: "Este es un ejemplo de síntesis de voz en español.",
    },
    PicoVoice {
        lang: "fra",
        country: "FRA",
        locale: "fr-FR",
        files: ["fr-FR_ta.bin", "fr-FR_nk0_sg.bin"],
        sample_text: "Ceci est un exemple de synthèse vocale en français.",
    },
    PicoVoice {
        lang: "ita",
        country: "ITA",
        locale: "it-IT",
        files: ["it-IT_ta.bin", "it-IT_cm0_sg.bin"],
        sample_text: "Questo è un esempio di sintesi vocale in italiano.",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckResult {
    Pass,
    MissingData,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceDataCheck {
    pub result: CheckResult,
    pub root_directory: PathBuf,
    pub data_files: Vec<&'static str>,
    pub data_files_info: Vec<String>,
    pub available: Vec<String>,
    pub unavailable: Vec<String>,
}

pub struct VoiceDataChecker {
    root: PathBuf,
    system_dir: PathBuf,
}

impl VoiceDataChecker {
    pub fn new(root: impl Into<PathBuf>, system_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            system_dir: system_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checks the voices named in `requested` (e.g. "eng-USA"), or all voices if empty.
    pub fn check(&self, requested: &[String]) -> VoiceDataCheck {
        let wanted: HashSet<&str> = requested
            .iter()
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .collect();

        let mut result = CheckResult::Pass;
        let mut found_match = false;
        let mut available = Vec::new();
        let mut unavailable = Vec::new();

        for voice in PICO_VOICES.iter() {
            let info = voice.info();
            if !wanted.is_empty() && !wanted.contains(info.as_str()) {
                continue;
            }
            if voice.files.iter().all(|f| self.file_exists(f)) {
                available.push(info);
                found_match = true;
            } else {
                result = CheckResult::MissingData;
                unavailable.push(info);
            }
        }

        if !wanted.is_empty() && !found_match {
            result = CheckResult::Fail;
        }
        debug!(?result, available = available.len(), "Voice data check");

        VoiceDataCheck {
            result,
            root_directory: self.root.clone(),
            data_files: PICO_VOICES.iter().flat_map(|v| v.files).collect(),
            data_files_info: PICO_VOICES
                .iter()
                .flat_map(|v| [v.info(), v.info()])
                .collect(),
            available,
            unavailable,
        }
    }

    fn file_exists(&self, name: &str) -> bool {
        self.root.join(name).exists() || self.system_dir.join(name).exists()
    }
}

/// Sample sentence for a voice; `None` when the language is not supported.
pub fn sample_text(lang: &str, country: &str) -> Option<&'static str> {
    let mut matching = PICO_VOICES.iter().filter(|v| v.lang == lang).peekable();
    let first = matching.peek().map(|v| v.sample_text)?;
    Some(
        matching
            .find(|v| v.country == country)
            .map(|v| v.sample_text)
            .unwrap_or(first),
    )
}
