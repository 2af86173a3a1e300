use config::{Config, File};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::voice_data::PICO_SYSTEM_LINGWARE_PATH;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine_binary: String,  // "pico2wave", "espeak-ng" or a full path
    pub engine_config: String,  // handed to the engine at load, may be empty
    pub voice_data_root: String, // install destination, ends with '/'
    pub system_lingware_path: String,
    pub langpack_archive: String, // zip installed by `picotts install`
    pub log_level: String,
}

fn default_voice_data_root() -> String {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    format!("{}/picotts-ng/", base.display())
}

fn default_langpack() -> String {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("picotts-ng")
        .join("svoxlangpack.zip")
        .display()
        .to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine_binary: "pico2wave".to_string(),
            engine_config: String::new(),
            voice_data_root: default_voice_data_root(),
            system_lingware_path: PICO_SYSTEM_LINGWARE_PATH.to_string(),
            langpack_archive: default_langpack(),
            log_level: "info".to_string(),
        }
    }
}

lazy_static! {
    pub static ref SETTINGS: RwLock<Settings> = RwLock::new(Settings::new().unwrap_or_else(|e| {
        eprintln!("Failed to load settings, using defaults: {}", e);
        Settings::default()
    }));
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = Config::builder()
            .set_default("engine_binary", "pico2wave")?
            .set_default("engine_config", "")?
            .set_default("voice_data_root", default_voice_data_root())?
            .set_default("system_lingware_path", PICO_SYSTEM_LINGWARE_PATH)?
            .set_default("langpack_archive", default_langpack())?
            .set_default("log_level", "info")?
            // Merge with local config file (if exists)
            .add_source(File::with_name("PicoTts").required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.config/picotts-ng/PicoTts",
                    std::env::var("HOME").unwrap_or_default()
                ))
                .required(false),
            )
            // Environment wins (e.g. PICOTTS_ENGINE_BINARY)
            .add_source(config::Environment::with_prefix("PICOTTS"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.engine_binary.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "engine_binary must not be empty".to_string(),
            ));
        }
        if !self.voice_data_root.ends_with(std::path::MAIN_SEPARATOR) {
            return Err(config::ConfigError::Message(format!(
                "Invalid voice_data_root: {}. Must end with a path separator",
                self.voice_data_root
            )));
        }
        Ok(())
    }
}
