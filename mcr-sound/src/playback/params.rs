//! Per-sound playback parameters

use crate::reader::{Property, StopMode};

/// Playback parameters applied to a sound's reader chain
#[derive(Debug, Clone, PartialEq)]
pub struct SoundParams {
    /// Linear gain (1.0 = unchanged), before the attract-volume multiplier
    pub volume: f64,

    /// -1.0 (left) to 1.0 (right)
    pub pan: f64,

    pub pitch: f64,
    pub speed: f64,
    pub fade_in_seconds: f64,
    pub fade_out_seconds: f64,

    /// Start point within the file
    pub start_seconds: f64,

    /// Played length from the start point (None = to the end)
    pub length_seconds: Option<f64>,

    /// None = resolve from the file name
    pub stop_mode: Option<StopMode>,
}

impl Default for SoundParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            pitch: 1.0,
            speed: 1.0,
            fade_in_seconds: 0.0,
            fade_out_seconds: 0.0,
            start_seconds: 0.0,
            length_seconds: None,
            stop_mode: None,
        }
    }
}

impl SoundParams {
    /// Record a property change
    pub fn apply(&mut self, property: &Property) {
        match *property {
            Property::Pitch(v) => self.pitch = v,
            Property::Speed(v) => self.speed = v,
            Property::Volume(v) => self.volume = v,
            Property::Pan(v) => self.pan = v,
            Property::FadeInSeconds(v) => self.fade_in_seconds = v,
            Property::FadeOutSeconds(v) => self.fade_out_seconds = v,
            Property::StopMode(mode) => self.stop_mode = Some(mode),
            Property::StartSeconds(v) => self.start_seconds = v,
            Property::LengthSeconds(v) => self.length_seconds = (v > 0.0).then_some(v),
        }
    }

    /// Stop mode to use: the explicit one, else `Loop` for files whose name
    /// contains "loop", else `Stop`
    pub fn resolved_stop_mode(&self, name: &str) -> StopMode {
        self.stop_mode.unwrap_or_else(|| {
            if name.to_lowercase().contains("loop") {
                StopMode::Loop
            } else {
                StopMode::Stop
            }
        })
    }

    /// Every parameter as a property, volume scaled by `volume_scale`
    pub fn properties(&self, volume_scale: f64, stop_mode: StopMode) -> Vec<Property> {
        vec![
            Property::Volume(self.volume * volume_scale),
            Property::Pan(self.pan),
            Property::Pitch(self.pitch),
            Property::Speed(self.speed),
            Property::FadeInSeconds(self.fade_in_seconds),
            Property::FadeOutSeconds(self.fade_out_seconds),
            Property::StartSeconds(self.start_seconds),
            Property::LengthSeconds(self.length_seconds.unwrap_or(0.0)),
            Property::StopMode(stop_mode),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_mode_resolution() {
        let mut params = SoundParams::default();
        assert_eq!(params.resolved_stop_mode("music/Intro.ogg"), StopMode::Stop);
        assert_eq!(params.resolved_stop_mode("music/Engine_LOOP.ogg"), StopMode::Loop);

        params.apply(&Property::StopMode(StopMode::Continue));
        assert_eq!(
            params.resolved_stop_mode("music/Engine_LOOP.ogg"),
            StopMode::Continue
        );
    }

    #[test]
    fn test_apply_and_properties() {
        let mut params = SoundParams::default();
        params.apply(&Property::Volume(0.5));
        params.apply(&Property::LengthSeconds(0.0));
        assert_eq!(params.length_seconds, None);
        params.apply(&Property::LengthSeconds(2.5));
        assert_eq!(params.length_seconds, Some(2.5));

        let props = params.properties(0.5, StopMode::Stop);
        assert_eq!(props[0], Property::Volume(0.25));
        assert!(props.contains(&Property::LengthSeconds(2.5)));
        assert!(props.contains(&Property::StopMode(StopMode::Stop)));
    }
}
