use crate::backends::{AudioSink, EngineLoader, LanguageAvailability, Locale, SynthEngine};
use crate::error::{ConfigurationError, EngineError, EngineResult};
use crate::filter::FilterSpec;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Exclusive owner of one loaded engine.
///
/// An open proxy always has its post-filter configured; `open` fails otherwise.
/// The engine is released by [`SynthProxy::shutdown`]; calls after that return
/// [`EngineError::Released`].
pub struct SynthProxy {
    identifier: String,
    filter: FilterSpec,
    engine: RwLock<Option<Arc<dyn SynthEngine>>>,
    // Held for the duration of a synthesis; `stop_sync` waits on it
    synth_lock: Mutex<()>,
}

impl SynthProxy {
    pub fn open(
        loader: &dyn EngineLoader,
        identifier: &str,
        config: &str,
    ) -> Result<Self, ConfigurationError> {
        let engine = loader.load(identifier, config)?;

        let filter = FilterSpec::for_engine(identifier);
        if let Err(e) = filter.apply_to(engine.as_ref()) {
            engine.shutdown();
            return Err(e);
        }

        info!(
            "Engine {} loaded from {} (post-filter {})",
            engine.id(),
            identifier,
            if filter.enabled { "on" } else { "off" }
        );

        Ok(Self {
            identifier: identifier.to_string(),
            filter,
            engine: RwLock::new(Some(Arc::from(engine))),
            synth_lock: Mutex::new(()),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn is_released(&self) -> bool {
        self.engine.read().map(|e| e.is_none()).unwrap_or(true)
    }

    fn engine(&self) -> EngineResult<Arc<dyn SynthEngine>> {
        self.engine
            .read()
            .map_err(|_| EngineError::Failed("engine lock poisoned".into()))?
            .clone()
            .ok_or(EngineError::Released)
    }

    pub fn speak(&self, text: &str, sink: Arc<dyn AudioSink>) -> EngineResult<()> {
        let engine = self.engine()?;
        let _guard = self
            .synth_lock
            .lock()
            .map_err(|_| EngineError::Failed("synthesis lock poisoned".into()))?;
        engine.synthesize(text, sink)
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.engine()?.stop()
    }

    /// Stops and waits until a running synthesis has let go of the engine.
    pub fn stop_sync(&self) -> EngineResult<()> {
        let result = self.stop();
        drop(self.synth_lock.lock());
        result
    }

    pub fn is_language_available(
        &self,
        lang: &str,
        country: &str,
        variant: &str,
    ) -> LanguageAvailability {
        match self.engine() {
            Ok(engine) => engine.is_language_available(lang, country, variant),
            Err(_) => LanguageAvailability::NotSupported,
        }
    }

    pub fn set_language(&self, lang: &str, country: &str, variant: &str) -> EngineResult<()> {
        let engine = self.engine()?;
        let _guard = self
            .synth_lock
            .lock()
            .map_err(|_| EngineError::Failed("synthesis lock poisoned".into()))?;
        engine.set_language(lang, country, variant)
    }

    pub fn get_language(&self) -> Option<Locale> {
        self.engine().ok()?.get_language()
    }

    pub fn set_property(&self, name: &str, value: &str) -> EngineResult<()> {
        let engine = self.engine()?;
        let _guard = self
            .synth_lock
            .lock()
            .map_err(|_| EngineError::Failed("synthesis lock poisoned".into()))?;
        engine.set_property(name, value)
    }

    pub fn set_speech_rate(&self, rate: i32) -> EngineResult<()> {
        self.set_property("rate", &rate.to_string())
    }

    pub fn set_pitch(&self, pitch: i32) -> EngineResult<()> {
        self.set_property("pitch", &pitch.to_string())
    }

    /// Releases the engine. Safe to call more than once.
    pub fn shutdown(&self) {
        let engine = match self.engine.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(engine) = engine {
            let _ = engine.stop();
            drop(self.synth_lock.lock());
            engine.shutdown();
            debug!("Engine {} released", self.identifier);
        }
    }
}

impl Drop for SynthProxy {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!(
                "Engine {} dropped without shutdown, releasing it now",
                self.identifier
            );
            self.shutdown();
        }
    }
}
