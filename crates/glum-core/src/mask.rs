//! Feathered rounded-rectangle alpha masks for patch compositing.

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

/// Single-channel float alpha plane.
pub type AlphaBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Mask geometry relative to the inter-eye distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskStyle {
    pub corner_radius_factor: f64,
    pub min_corner_radius: f64,
    /// Width of the soft edge, as a fraction of `ipd`.
    pub feather_factor: f64,
    pub min_feather: f64,
    /// Extra Gaussian softening, as a fraction of `ipd`. 0 disables it.
    pub blur_factor: f64,
}

impl Default for MaskStyle {
    fn default() -> Self {
        Self {
            corner_radius_factor: 0.2,
            min_corner_radius: 16.0,
            feather_factor: 0.1,
            min_feather: 4.0,
            blur_factor: 0.0,
        }
    }
}

impl MaskStyle {
    pub fn corner_radius(&self, ipd: f64) -> f64 {
        (ipd * self.corner_radius_factor).max(self.min_corner_radius)
    }

    pub fn feather(&self, ipd: f64) -> f64 {
        (ipd * self.feather_factor).max(self.min_feather)
    }

    pub fn blur_sigma(&self, ipd: f64) -> f32 {
        (ipd * self.blur_factor) as f32
    }
}

/// Whether the optional Gaussian mask blur can be used this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurCapability {
    Available,
    Unavailable,
}

impl BlurCapability {
    /// Run the blur once on a small probe mask and check the result is sane.
    pub fn probe(style: &MaskStyle) -> Self {
        if !(style.blur_factor > 0.0 && style.blur_factor.is_finite()) {
            return BlurCapability::Unavailable;
        }
        let mut probe = FeatherMask::default();
        probe.render(32, 32, 6.0, 4.0);
        let blurred = image::imageops::blur(&probe.alpha, 2.0);
        let sane = blurred.dimensions() == (32, 32)
            && blurred.pixels().all(|p| p.0[0].is_finite() && (0.0..=1.0 + 1e-4).contains(&p.0[0]))
            && blurred.get_pixel(16, 16).0[0] > 0.5;
        if sane {
            BlurCapability::Available
        } else {
            tracing::warn!("mask blur probe failed; using analytic feather only");
            BlurCapability::Unavailable
        }
    }
}

/// Alpha plane: 1 inside a rounded rectangle, easing to 0 at its border.
#[derive(Debug, Clone)]
pub struct FeatherMask {
    alpha: AlphaBuffer,
}

impl Default for FeatherMask {
    fn default() -> Self {
        Self {
            alpha: AlphaBuffer::new(0, 0),
        }
    }
}

impl FeatherMask {
    pub fn new(width: u32, height: u32, corner_radius: f64, feather: f64) -> Self {
        let mut mask = Self::default();
        mask.render(width, height, corner_radius, feather);
        mask
    }

    /// Redraw for a `width × height` region, reusing the buffer when the size matches.
    pub fn render(&mut self, width: u32, height: u32, corner_radius: f64, feather: f64) {
        if self.alpha.dimensions() != (width, height) {
            self.alpha = AlphaBuffer::new(width, height);
        }
        let w = width as f64;
        let h = height as f64;
        let half_w = w / 2.0;
        let half_h = h / 2.0;
        let radius = corner_radius.min(w * 0.25).min(h * 0.25).max(0.0);
        let feather = feather.min(half_w).min(half_h).max(f64::EPSILON);

        for (x, y, px) in self.alpha.enumerate_pixels_mut() {
            let px_x = x as f64 + 0.5 - half_w;
            let px_y = y as f64 + 0.5 - half_h;
            let inside = -rounded_rect_sdf(px_x, px_y, half_w, half_h, radius);
            px.0[0] = smoothstep((inside / feather).clamp(0.0, 1.0)) as f32;
        }
    }

    /// Soften with a Gaussian, keeping the border at zero.
    pub fn blur(&mut self, sigma: f32) {
        if sigma <= 0.0 || self.alpha.width() == 0 || self.alpha.height() == 0 {
            return;
        }
        let blurred = image::imageops::blur(&self.alpha, sigma);
        for (dst, b) in self.alpha.pixels_mut().zip(blurred.pixels()) {
            dst.0[0] = (dst.0[0] * b.0[0]).clamp(0.0, 1.0);
        }
    }

    pub fn width(&self) -> u32 {
        self.alpha.width()
    }

    pub fn height(&self) -> u32 {
        self.alpha.height()
    }

    pub fn alpha(&self, x: u32, y: u32) -> f32 {
        self.alpha.get_pixel(x, y).0[0]
    }
}

/// Signed distance to a rounded rectangle centred at the origin (negative inside).
fn rounded_rect_sdf(x: f64, y: f64, half_w: f64, half_h: f64, radius: f64) -> f64 {
    let qx = x.abs() - (half_w - radius);
    let qy = y.abs() - (half_h - radius);
    let outside = qx.max(0.0).hypot(qy.max(0.0));
    let inside = qx.max(qy).min(0.0);
    outside + inside - radius
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}
