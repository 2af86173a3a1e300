//! Speech post-filter configuration.
//!
//! The Pico voices sound muffled and quiet through small speakers, so the proxy
//! configures a low-shelf cut plus a linear boost whenever a Pico engine is loaded.
//! Other engines receive an explicit "no filter" configuration.

use crate::backends::SynthEngine;
use crate::error::ConfigurationError;
use tracing::{debug, error};

/// Substring identifying the Pico engine in an engine identifier.
pub const PICO_ENGINE_MARKER: &str = "pico";

pub const FILTER_GAIN: f32 = 5.0;
pub const FILTER_LOWSHELF_ATTENUATION_DB: f32 = -18.0;
pub const FILTER_TRANSITION_FREQ_HZ: f32 = 1100.0;
pub const FILTER_SHELF_SLOPE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub gain: f32,
    pub low_shelf_attenuation_db: f32,
    pub transition_frequency_hz: f32,
    pub shelf_slope_q: f32,
    pub enabled: bool,
}

impl FilterSpec {
    /// Derives the filter for the engine at `identifier` (usually a binary path).
    pub fn for_engine(identifier: &str) -> Self {
        let enabled = identifier.to_lowercase().contains(PICO_ENGINE_MARKER);
        Self {
            gain: FILTER_GAIN,
            low_shelf_attenuation_db: FILTER_LOWSHELF_ATTENUATION_DB,
            transition_frequency_hz: FILTER_TRANSITION_FREQ_HZ,
            shelf_slope_q: FILTER_SHELF_SLOPE,
            enabled,
        }
    }

    /// Sends the configuration to the engine. Called exactly once per engine load,
    /// also when disabled, so that nothing from a previous session survives.
    pub fn apply_to(&self, engine: &dyn SynthEngine) -> Result<(), ConfigurationError> {
        debug!(
            enabled = self.enabled,
            gain = self.gain,
            attenuation_db = self.low_shelf_attenuation_db,
            freq_hz = self.transition_frequency_hz,
            slope = self.shelf_slope_q,
            "Configuring low-shelf filter"
        );
        engine
            .set_low_shelf(
                self.enabled,
                self.gain,
                self.low_shelf_attenuation_db,
                self.transition_frequency_hz,
                self.shelf_slope_q,
            )
            .map_err(|e| {
                error!("Filter configuration rejected by {}: {}", engine.id(), e);
                ConfigurationError::FilterRejected(e.to_string())
            })
    }
}

/// Biquad low-shelf with a linear output gain, run over signed 16-bit PCM.
#[derive(Debug, Clone)]
pub struct LowShelf {
    fa: f64,
    fb: f64,
    fc: f64,
    fd: f64,
    fe: f64,
    x1: f64,
    x2: f64,
    out1: f64,
    out2: f64,
}

impl LowShelf {
    /// Returns `None` for a zero slope, which has no defined shelf.
    pub fn new(
        gain: f32,
        attenuation_db: f32,
        transition_hz: f32,
        slope: f32,
        sample_rate: u32,
    ) -> Option<Self> {
        if slope == 0.0 || sample_rate == 0 {
            return None;
        }

        let amp = 10f64.powf(attenuation_db as f64 / 40.0);
        let w = 2.0 * std::f64::consts::PI * (transition_hz as f64 / sample_rate as f64);
        let sinw = w.sin();
        let cosw = w.cos();
        let beta = amp.sqrt() / slope as f64;

        let b0 = amp * ((amp + 1.0) - ((amp - 1.0) * cosw) + (beta * sinw));
        let b1 = 2.0 * amp * ((amp - 1.0) - ((amp + 1.0) * cosw));
        let b2 = amp * ((amp + 1.0) - ((amp - 1.0) * cosw) - (beta * sinw));
        let a0 = (amp + 1.0) + ((amp - 1.0) * cosw) + (beta * sinw);
        let a1 = 2.0 * ((amp - 1.0) + ((amp + 1.0) * cosw));
        let a2 = -((amp + 1.0) + ((amp - 1.0) * cosw) - (beta * sinw));

        let gain = gain as f64;
        Some(Self {
            fa: gain * b0 / a0,
            fb: gain * b1 / a0,
            fc: gain * b2 / a0,
            fd: a1 / a0,
            fe: a2 / a0,
            x1: 0.0,
            x2: 0.0,
            out1: 0.0,
            out2: 0.0,
        })
    }

    pub fn from_spec(spec: &FilterSpec, sample_rate: u32) -> Option<Self> {
        Self::new(
            spec.gain,
            spec.low_shelf_attenuation_db,
            spec.transition_frequency_hz,
            spec.shelf_slope_q,
            sample_rate,
        )
    }

    /// Clears the sample history. Done at the start of every utterance.
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.out1 = 0.0;
        self.out2 = 0.0;
    }

    pub fn process(&mut self, samples: &mut [i16]) {
        for sample in samples.iter_mut() {
            let x0 = *sample as f64;
            let out0 = (self.fa * x0)
                + (self.fb * self.x1)
                + (self.fc * self.x2)
                + (self.fd * self.out1)
                + (self.fe * self.out2);

            self.x2 = self.x1;
            self.x1 = x0;
            self.out2 = self.out1;
            self.out1 = out0;

            *sample = out0.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockSynthEngine;
    use crate::error::EngineError;
    use mockall::predicate::eq;
    use proptest::prelude::*;

    #[test]
    fn test_pico_library_enables_filter() {
        let spec = FilterSpec::for_engine("/system/lib/libttspico.so");
        assert!(spec.enabled);
        assert_eq!(spec.gain, 5.0);
        assert_eq!(spec.low_shelf_attenuation_db, -18.0);
        assert_eq!(spec.transition_frequency_hz, 1100.0);
        assert_eq!(spec.shelf_slope_q, 1.0);
    }

    #[test]
    fn test_other_engine_disables_filter() {
        assert!(!FilterSpec::for_engine("/system/lib/libacme.so").enabled);
        assert!(!FilterSpec::for_engine("").enabled);
        assert!(FilterSpec::for_engine("/usr/bin/PICO2WAVE").enabled);
    }

    proptest! {
        #[test]
        fn prop_marker_in_any_case_enables(prefix in "[a-z/]{0,12}", suffix in "[a-z.]{0,8}", mask in 0u8..16) {
            let marker: String = PICO_ENGINE_MARKER
                .chars()
                .enumerate()
                .map(|(i, c)| if mask & (1 << i) != 0 { c.to_ascii_uppercase() } else { c })
                .collect();
            let spec = FilterSpec::for_engine(&format!("{}{}{}", prefix, marker, suffix));
            prop_assert!(spec.enabled);
            prop_assert_eq!(spec.gain, FILTER_GAIN);
            prop_assert_eq!(spec.low_shelf_attenuation_db, FILTER_LOWSHELF_ATTENUATION_DB);
            prop_assert_eq!(spec.transition_frequency_hz, FILTER_TRANSITION_FREQ_HZ);
            prop_assert_eq!(spec.shelf_slope_q, FILTER_SHELF_SLOPE);
        }

        #[test]
        fn prop_without_marker_disabled(id in "[a-hj-oq-z0-9/._-]{0,40}") {
            // alphabet excludes 'i' and 'p', so the marker cannot appear
            prop_assert!(!FilterSpec::for_engine(&id).enabled);
        }
    }

    #[test]
    fn test_disabled_filter_is_still_sent() {
        let mut engine = MockSynthEngine::new();
        engine
            .expect_set_low_shelf()
            .with(eq(false), eq(5.0f32), eq(-18.0f32), eq(1100.0f32), eq(1.0f32))
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        FilterSpec::for_engine("espeak-ng").apply_to(&engine).unwrap();
    }

    #[test]
    fn test_rejection_is_configuration_error() {
        let mut engine = MockSynthEngine::new();
        engine
            .expect_set_low_shelf()
            .times(1)
            .returning(|_, _, _, _, _| Err(EngineError::Failed("bad slope".into())));
        engine.expect_id().return_const("mock");

        let err = FilterSpec::for_engine("pico2wave").apply_to(&engine).unwrap_err();
        assert!(matches!(err, ConfigurationError::FilterRejected(_)));
    }

    #[test]
    fn test_zero_slope_has_no_shelf() {
        assert!(LowShelf::new(5.0, -18.0, 1100.0, 0.0, 16000).is_none());
    }

    #[test]
    fn test_low_shelf_saturates() {
        let spec = FilterSpec::for_engine("pico");
        let mut shelf = LowShelf::from_spec(&spec, 16000).unwrap();
        let mut samples = vec![i16::MAX; 256];
        shelf.process(&mut samples);
        // the step onset is boosted past full scale, the settled level is not
        assert_eq!(samples[0], i16::MAX);
        assert!(samples[255] > 0 && samples[255] < i16::MAX);

        let mut silence = vec![0i16; 32];
        shelf.reset();
        shelf.process(&mut silence);
        assert!(silence.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_low_shelf_cuts_dc_relative_to_high_band() {
        // DC sits deep inside the shelf, so its steady-state gain is gain * 10^(-18/20)
        let spec = FilterSpec::for_engine("pico");
        let mut shelf = LowShelf::from_spec(&spec, 16000).unwrap();
        let mut dc = vec![1000i16; 4000];
        shelf.process(&mut dc);
        let expected = 1000.0 * 5.0 * 10f64.powf(-18.0 / 20.0);
        assert!((dc[3999] as f64 - expected).abs() < 5.0, "got {}", dc[3999]);
    }
}
