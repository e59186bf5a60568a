use crate::affine::Sampling;
use crate::compositor::PatchProfile;
use crate::field::DEFAULT_SIGMA_FACTOR;
use crate::grid::GridResolution;
use crate::landmarks::SchemeKind;
use crate::mapper::MeshProfile;
use crate::mask::MaskStyle;
use crate::trigger::TriggerMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on grid cells per axis; keeps a frame inside its time budget.
pub const MAX_GRID_CELLS: usize = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} = {value} is out of range ({expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
}

/// How the warped face is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// One RBF-driven triangle grid over the whole face.
    #[default]
    Mesh,
    /// Independent feathered patches for mouth, brows and eyelids.
    Patches,
}

/// Warp engine configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
/// Scalar keys come before tables so the struct serializes to valid TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    /// Deformation strength in `[0, 1]`; every offset scales linearly with it.
    pub intensity: f64,
    /// Padding around the landmark bounding box, as a fraction of its size.
    pub padding_fraction: f64,
    /// RBF falloff `sigma` relative to the inter-eye distance.
    pub sigma_factor: f64,
    /// Working resolution relative to the input frame, `(0, 1]`.
    pub source_scale: f64,
    pub render: RenderMode,
    pub scheme: SchemeKind,
    pub sampling: Sampling,
    pub grid: GridResolution,
    pub trigger: TriggerMode,
    pub mesh_profile: MeshProfile,
    pub patch_profile: PatchProfile,
    pub mask: MaskStyle,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            intensity: 0.85,
            padding_fraction: 0.15,
            sigma_factor: DEFAULT_SIGMA_FACTOR,
            source_scale: 1.0,
            render: RenderMode::default(),
            scheme: SchemeKind::default(),
            sampling: Sampling::default(),
            grid: GridResolution::default(),
            trigger: TriggerMode::default(),
            mesh_profile: MeshProfile::default(),
            patch_profile: PatchProfile::default(),
            mask: MaskStyle::default(),
        }
    }
}

impl WarpConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    /// Read a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Apply `GLUM_*` environment variable overrides on top of the current values.
    pub fn apply_env(mut self) -> Self {
        self.intensity = env_f64("GLUM_INTENSITY", self.intensity);
        self.padding_fraction = env_f64("GLUM_PADDING_FRACTION", self.padding_fraction);
        self.sigma_factor = env_f64("GLUM_SIGMA_FACTOR", self.sigma_factor);
        self.source_scale = env_f64("GLUM_SOURCE_SCALE", self.source_scale);
        self.grid.cols = env_usize("GLUM_GRID_COLS", self.grid.cols);
        self.grid.rows = env_usize("GLUM_GRID_ROWS", self.grid.rows);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check("intensity", self.intensity, (0.0..=1.0).contains(&self.intensity), "0 ≤ x ≤ 1")?;
        check(
            "padding_fraction",
            self.padding_fraction,
            self.padding_fraction >= 0.0 && self.padding_fraction.is_finite(),
            "x ≥ 0",
        )?;
        check(
            "sigma_factor",
            self.sigma_factor,
            self.sigma_factor > 0.0 && self.sigma_factor.is_finite(),
            "x > 0",
        )?;
        check(
            "source_scale",
            self.source_scale,
            self.source_scale > 0.0 && self.source_scale <= 1.0,
            "0 < x ≤ 1",
        )?;
        for (field, cells) in [("grid.cols", self.grid.cols), ("grid.rows", self.grid.rows)] {
            check(field, cells as f64, (1..=MAX_GRID_CELLS).contains(&cells), "1 ≤ x ≤ 256")?;
        }
        if let TriggerMode::ThresholdTriggered {
            threshold,
            ramp_scale,
            ema_alpha,
        } = self.trigger
        {
            check("trigger.threshold", threshold as f64, threshold.is_finite(), "finite")?;
            check("trigger.ema_alpha", ema_alpha as f64, ema_alpha > 0.0 && ema_alpha <= 1.0, "0 < x ≤ 1")?;
            check("trigger.ramp_scale", ramp_scale as f64, ramp_scale > 0.0 && ramp_scale.is_finite(), "x > 0")?;
        }
        check(
            "mask.blur_factor",
            self.mask.blur_factor,
            self.mask.blur_factor >= 0.0 && self.mask.blur_factor.is_finite(),
            "x ≥ 0",
        )?;
        Ok(())
    }
}

fn check(field: &'static str, value: f64, ok: bool, expected: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, expected })
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = WarpConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.sigma_factor, 0.55);
        assert_eq!(cfg.grid, GridResolution { cols: 24, rows: 24 });
        assert_eq!(cfg.trigger, TriggerMode::AlwaysOn);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = WarpConfig::from_toml_str(
            r#"
            intensity = 0.5
            render = "patches"
            scheme = "clmtrackr"

            [grid]
            cols = 8
            rows = 6

            [trigger]
            mode = "threshold_triggered"
            threshold = 0.6
            ramp_scale = 4.0

            [mesh_profile]
            brow_drop = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.intensity, 0.5);
        assert_eq!(cfg.render, RenderMode::Patches);
        assert_eq!(cfg.scheme, SchemeKind::Clmtrackr);
        assert_eq!(cfg.grid, GridResolution { cols: 8, rows: 6 });
        assert_eq!(cfg.mesh_profile.brow_drop, 0.3);
        assert_eq!(cfg.mesh_profile.mouth_down, 0.28);
        assert_eq!(cfg.padding_fraction, 0.15);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let cfg = WarpConfig {
            trigger: TriggerMode::ThresholdTriggered { threshold: 0.5, ramp_scale: 2.0, ema_alpha: 0.25 },
            ..WarpConfig::default()
        };
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(WarpConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let bad = [
            WarpConfig { intensity: 1.5, ..WarpConfig::default() },
            WarpConfig { sigma_factor: 0.0, ..WarpConfig::default() },
            WarpConfig { source_scale: 0.0, ..WarpConfig::default() },
            WarpConfig { padding_fraction: -0.1, ..WarpConfig::default() },
            WarpConfig { grid: GridResolution { cols: 0, rows: 4 }, ..WarpConfig::default() },
            WarpConfig {
                trigger: TriggerMode::ThresholdTriggered { threshold: 0.5, ramp_scale: 1.0, ema_alpha: 0.0 },
                ..WarpConfig::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange { .. })), "{cfg:?}");
        }
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let cfg = WarpConfig::from_toml_str(
            "[trigger]\nmode = \"threshold_triggered\"\nthreshold = nan\nramp_scale = 2.0\n",
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "trigger.threshold", .. }), "{err}");
    }

    #[test]
    fn test_unknown_render_mode_is_parse_error() {
        let err = WarpConfig::from_toml_str("render = \"hologram\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = WarpConfig::load(Path::new("/nonexistent/glum.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
