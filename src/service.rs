use crate::backends::{AudioSink, EngineLoader, LanguageAvailability, Locale};
use crate::config_loader;
use crate::error::{ConfigurationError, EngineError, EngineResult};
use crate::proxy::SynthProxy;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

/// Source of the engine configuration string handed to the engine at load.
#[cfg_attr(test, mockall::automock)]
pub trait EngineConfigProvider: Send + Sync {
    /// `None` when nothing is configured.
    fn engine_config(&self) -> Option<String>;
}

/// Reads `engine_config` from the global settings.
pub struct SettingsConfigProvider;

impl EngineConfigProvider for SettingsConfigProvider {
    fn engine_config(&self) -> Option<String> {
        config_loader::SETTINGS
            .read()
            .ok()
            .map(|s| s.engine_config.clone())
            .filter(|c| !c.is_empty())
    }
}

/// One synthesis call as the platform hands it over.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub language: String,
    pub country: String,
    pub variant: String,
    pub speech_rate: i32,
    pub pitch: i32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: String::new(),
            country: String::new(),
            variant: String::new(),
            speech_rate: 100,
            pitch: 100,
        }
    }
}

/// Platform-facing TTS service: owns at most one engine session at a time.
pub struct TtsService {
    loader: Arc<dyn EngineLoader>,
    config: Arc<dyn EngineConfigProvider>,
    identifier: String,
    proxy: RwLock<Option<Arc<SynthProxy>>>,
}

impl TtsService {
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        config: Arc<dyn EngineConfigProvider>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            config,
            identifier: identifier.into(),
            proxy: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<Arc<SynthProxy>> {
        self.proxy.read().ok()?.clone()
    }

    fn require(&self) -> EngineResult<Arc<SynthProxy>> {
        self.current().ok_or(EngineError::Released)
    }

    fn take(&self) -> Option<Arc<SynthProxy>> {
        match self.proxy.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Loads a fresh engine session, replacing any previous one.
    pub fn on_create(&self) -> Result<(), ConfigurationError> {
        if let Some(old) = self.take() {
            old.shutdown();
        }

        let config = self.config.engine_config().unwrap_or_default();
        let proxy = SynthProxy::open(self.loader.as_ref(), &self.identifier, &config)?;
        info!("TTS service ready with {}", self.identifier);

        match self.proxy.write() {
            Ok(mut slot) => *slot = Some(Arc::new(proxy)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(proxy)),
        }
        Ok(())
    }

    pub fn on_destroy(&self) {
        if let Some(proxy) = self.take() {
            proxy.shutdown();
        }
    }

    pub fn on_get_language(&self) -> Option<Locale> {
        self.current()?.get_language()
    }

    pub fn on_is_language_available(
        &self,
        lang: &str,
        country: &str,
        variant: &str,
    ) -> LanguageAvailability {
        match self.current() {
            Some(proxy) => proxy.is_language_available(lang, country, variant),
            None => LanguageAvailability::NotSupported,
        }
    }

    /// Selects the language when the engine can speak it; reports availability either way.
    pub fn on_load_language(&self, lang: &str, country: &str, variant: &str) -> LanguageAvailability {
        let Some(proxy) = self.current() else {
            return LanguageAvailability::NotSupported;
        };
        let availability = proxy.is_language_available(lang, country, variant);
        if availability.is_available() {
            if let Err(e) = proxy.set_language(lang, country, variant) {
                warn!("Failed to load language {}-{}: {}", lang, country, e);
                return LanguageAvailability::NotSupported;
            }
        }
        availability
    }

    pub fn on_stop(&self) -> EngineResult<()> {
        self.require()?.stop()
    }

    pub fn on_synthesize_text(
        &self,
        request: &SynthesisRequest,
        sink: Arc<dyn AudioSink>,
    ) -> EngineResult<()> {
        let result = self.require().and_then(|proxy| {
            proxy.set_language(&request.language, &request.country, &request.variant)?;
            proxy.set_speech_rate(request.speech_rate)?;
            proxy.set_pitch(request.pitch)?;
            proxy.speak(&request.text, sink.clone())
        });

        if let Err(e) = &result {
            error!("Synthesis failed: {}", e);
            sink.error();
        }
        result
    }
}

impl Drop for TtsService {
    fn drop(&mut self) {
        self.on_destroy();
    }
}
