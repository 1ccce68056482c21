//! Fade curve implementations for parameter automation
//!
//! Every curve maps normalized progress `p ∈ [0, 1]` onto `[0, 1]` with
//! `f(0) = 0`, `f(1) = 1` and is monotonically non-decreasing, so a fade can
//! interpolate any numeric field as `start + (end - start) × f(p)` regardless
//! of direction.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fade curve types for automation
///
/// Each curve type provides a different perceptual quality:
/// - Linear: Constant rate of change
/// - Exponential: Slow start, fast finish
/// - Logarithmic: Fast start, slow finish
/// - SCurve: Smooth acceleration and deceleration
/// - EaseIn: Very slow start (cubic)
/// - EaseOut: Very slow finish (cubic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FadeCurve {
    /// Linear: f(p) = p
    Linear,

    /// Exponential: f(p) = p²
    Exponential,

    /// Logarithmic: f(p) = √p
    Logarithmic,

    /// S-Curve (smoothstep): f(p) = 3p² − 2p³
    SCurve,

    /// Ease-in: f(p) = p³
    EaseIn,

    /// Ease-out: f(p) = 1 − (1 − p)³
    EaseOut,
}

impl FadeCurve {
    /// Evaluate the curve at normalized progress.
    ///
    /// Progress is clamped to `[0, 1]` first, so callers may pass raw
    /// `elapsed / duration` ratios.
    pub fn apply(&self, progress: f64) -> f64 {
        let p = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };

        match self {
            FadeCurve::Linear => p,
            FadeCurve::Exponential => p * p,
            FadeCurve::Logarithmic => p.sqrt(),
            FadeCurve::SCurve => 3.0 * p * p - 2.0 * p * p * p,
            FadeCurve::EaseIn => p * p * p,
            FadeCurve::EaseOut => {
                let inv = 1.0 - p;
                1.0 - inv * inv * inv
            }
        }
    }

    /// Interpolate between two values along this curve
    pub fn interpolate(&self, start: f64, end: f64, progress: f64) -> f64 {
        start + (end - start) * self.apply(progress)
    }

    /// Canonical serialized name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "sCurve",
            FadeCurve::EaseIn => "easeIn",
            FadeCurve::EaseOut => "easeOut",
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::Exponential => "Exponential",
            FadeCurve::Logarithmic => "Logarithmic",
            FadeCurve::SCurve => "S-Curve",
            FadeCurve::EaseIn => "Ease In",
            FadeCurve::EaseOut => "Ease Out",
        }
    }

    /// Get all available fade curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::Logarithmic,
            FadeCurve::SCurve,
            FadeCurve::EaseIn,
            FadeCurve::EaseOut,
        ]
    }
}

impl Default for FadeCurve {
    fn default() -> Self {
        FadeCurve::Linear
    }
}

impl fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for FadeCurve {
    type Err = Error;

    /// Parse a curve name, case-insensitive, accepting `_`/`-` separated aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            "scurve" | "smoothstep" => Ok(FadeCurve::SCurve),
            "easein" => Ok(FadeCurve::EaseIn),
            "easeout" => Ok(FadeCurve::EaseOut),
            _ => Err(Error::InvalidInput(format!("Unknown fade curve: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_endpoints_are_exact() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.apply(0.0), 0.0, "{:?} f(0)", curve);
            assert_eq!(curve.apply(1.0), 1.0, "{:?} f(1)", curve);
        }
    }

    #[test]
    fn test_scurve_midpoint() {
        assert_eq!(FadeCurve::SCurve.apply(0.5), 0.5);
    }

    #[test]
    fn test_curves_are_monotonic() {
        for curve in FadeCurve::all_variants() {
            let mut previous = curve.apply(0.0);
            for step in 1..=1000 {
                let value = curve.apply(step as f64 / 1000.0);
                assert!(
                    value >= previous,
                    "{:?} decreased at step {}: {} < {}",
                    curve,
                    step,
                    value,
                    previous
                );
                previous = value;
            }
        }
    }

    #[test]
    fn test_curve_formulas() {
        let p = 0.25;
        assert!((FadeCurve::Linear.apply(p) - 0.25).abs() < 1e-12);
        assert!((FadeCurve::Exponential.apply(p) - 0.0625).abs() < 1e-12);
        assert!((FadeCurve::Logarithmic.apply(p) - 0.5).abs() < 1e-12);
        assert!((FadeCurve::EaseIn.apply(p) - 0.015625).abs() < 1e-12);
        assert!((FadeCurve::EaseOut.apply(p) - (1.0 - 0.75f64.powi(3))).abs() < 1e-12);
        assert!((FadeCurve::SCurve.apply(p) - 0.15625).abs() < 1e-12);
    }

    #[test]
    fn test_progress_is_clamped() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.apply(-0.5), 0.0);
            assert_eq!(curve.apply(7.0), 1.0);
            assert_eq!(curve.apply(f64::NAN), 0.0);
        }
    }

    #[test]
    fn test_interpolate_downwards() {
        let value = FadeCurve::Linear.interpolate(1.0, 0.0, 0.25);
        assert!((value - 0.75).abs() < 1e-12);
        assert_eq!(FadeCurve::EaseOut.interpolate(-6.0, -60.0, 1.0), -60.0);
    }

    #[test]
    fn test_parse_round_trip_and_aliases() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.as_str().parse::<FadeCurve>().unwrap(), *curve);
        }
        assert_eq!("s_curve".parse::<FadeCurve>().unwrap(), FadeCurve::SCurve);
        assert_eq!("EASE-OUT".parse::<FadeCurve>().unwrap(), FadeCurve::EaseOut);
        assert!("cosine".parse::<FadeCurve>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&FadeCurve::SCurve).unwrap();
        assert_eq!(json, "\"sCurve\"");
        let parsed: FadeCurve = serde_json::from_str("\"easeIn\"").unwrap();
        assert_eq!(parsed, FadeCurve::EaseIn);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", FadeCurve::Linear), "Linear");
        assert_eq!(format!("{}", FadeCurve::SCurve), "S-Curve");
    }
}
