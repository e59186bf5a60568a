//! When the warp fires, and how strongly.

use serde::{Deserialize, Serialize};

fn default_ema_alpha() -> f32 {
    0.3
}

/// Trigger policy consumed by the pipeline entry point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerMode {
    /// Apply the configured intensity on every face frame.
    #[default]
    AlwaysOn,
    /// Ramp in once the smoothed expression score passes `threshold`.
    ///
    /// Gain is `clamp((ema - threshold) * ramp_scale, 0, 1)`.
    ThresholdTriggered {
        threshold: f32,
        ramp_scale: f32,
        #[serde(default = "default_ema_alpha")]
        ema_alpha: f32,
    },
    /// Manual override: full designed deformation regardless of score.
    Forced,
}

/// Exponential moving average of the detector's expression score.
///
/// Lives across frames; updated once per face frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TriggerState {
    ema: f32,
}

impl TriggerState {
    pub fn ema(&self) -> f32 {
        self.ema
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
    }

    /// Fold this frame's score into the average and return the effective intensity.
    ///
    /// A missing score counts as 0.
    pub fn effective_intensity(&mut self, mode: &TriggerMode, configured: f64, score: Option<f32>) -> f64 {
        match *mode {
            TriggerMode::AlwaysOn => configured,
            TriggerMode::Forced => 1.0,
            TriggerMode::ThresholdTriggered {
                threshold,
                ramp_scale,
                ema_alpha,
            } => {
                let s = score.filter(|s| s.is_finite()).unwrap_or(0.0);
                self.ema = ema_alpha * s + (1.0 - ema_alpha) * self.ema;
                let gain = ((self.ema - threshold) * ramp_scale).clamp(0.0, 1.0);
                tracing::trace!(score = s, ema = self.ema, gain, "trigger updated");
                configured * gain as f64
            }
        }
    }
}
