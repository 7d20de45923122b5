//! Fade curves for sound fade-in and fade-out
//!
//! A fade maps normalized progress `t` in [0.0, 1.0] to a gain multiplier.
//! Fade-in curves rise from 0.0 to 1.0; fade-out is the mirror image, so
//! `fade_out(t) == fade_in(1.0 - t)` for every curve.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Gain curve used by sound envelopes
///
/// - Linear: constant rate of change
/// - Exponential: slow start, fast finish (v = t²)
/// - SCurve: smooth acceleration and deceleration (v = 0.5 × (1 - cos(π × t)))
/// - EqualPower: constant perceived loudness when two fades overlap (v = sin(t × π/2))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,

    /// v(t) = t²
    Exponential,

    /// v(t) = 0.5 × (1 - cos(π × t))
    #[serde(alias = "cosine")]
    SCurve,

    /// v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Gain for a fade-in at normalized progress `t` (clamped to [0, 1])
    pub fn fade_in(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::SCurve => 0.5 * (1.0 - (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Gain for a fade-out at normalized progress `t` (1.0 at the start, 0.0 at the end)
    pub fn fade_out(&self, t: f32) -> f32 {
        self.fade_in(1.0 - t.clamp(0.0, 1.0))
    }

    /// Parse a curve name as used in configuration files and scripts
    ///
    /// Accepts `linear`, `exponential`, `s_curve` (also `scurve`, `s-curve`,
    /// `cosine`) and `equal_power` (also `equalpower`), case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "exponential" => Some(FadeCurve::Exponential),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Some(FadeCurve::EqualPower),
            _ => None,
        }
    }

    /// All curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::SCurve,
            FadeCurve::EqualPower,
        ]
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_in_bounds() {
        for curve in FadeCurve::all_variants() {
            assert!(curve.fade_in(0.0).abs() < 1e-6, "{:?} should start silent", curve);
            assert!((curve.fade_in(1.0) - 1.0).abs() < 1e-6, "{:?} should end at unity", curve);
        }
    }

    #[test]
    fn test_fade_out_mirrors_fade_in() {
        for curve in FadeCurve::all_variants() {
            for step in 0..=10 {
                let t = step as f32 / 10.0;
                assert!((curve.fade_out(t) - curve.fade_in(1.0 - t)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_curves_are_monotonic() {
        for curve in FadeCurve::all_variants() {
            let mut last = curve.fade_in(0.0);
            for step in 1..=100 {
                let v = curve.fade_in(step as f32 / 100.0);
                assert!(v >= last, "{:?} decreased at step {}", curve, step);
                last = v;
            }
        }
    }

    #[test]
    fn test_out_of_range_progress_is_clamped() {
        assert_eq!(FadeCurve::Linear.fade_in(-0.5), 0.0);
        assert_eq!(FadeCurve::Linear.fade_in(1.5), 1.0);
        assert_eq!(FadeCurve::Linear.fade_out(2.0), 0.0);
    }

    #[test]
    fn test_parse_and_display_round_trip() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(FadeCurve::parse(&curve.to_string()), Some(*curve));
        }
        assert_eq!(FadeCurve::parse("Cosine"), Some(FadeCurve::SCurve));
        assert_eq!(FadeCurve::parse("EQUALPOWER"), Some(FadeCurve::EqualPower));
        assert_eq!(FadeCurve::parse("bogus"), None);
    }
}
