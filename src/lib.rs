//! Pico TTS engine glue: engine proxy with the speech post-filter, voice data checks and
//! the language pack installer.

pub mod backends;
pub mod config_loader;
pub mod error;
pub mod filter;
pub mod installer;
pub mod proxy;
pub mod service;
pub mod voice_data;
pub mod wav_sink;
