//! Gaussian RBF displacement field over the image plane.
//!
//! Each control point contributes its delta weighted by
//! `exp(-r² / 2σ²)`. Where kernels overlap (`Σw ≥ 1`) the deltas are averaged;
//! where they do not, the weighted sum is used as-is, so the displacement
//! fades smoothly to zero away from every control instead of holding the
//! nearest control's delta.

use crate::types::{ControlPoint, Point};

/// Below this total weight the query is treated as outside every kernel.
pub const WEIGHT_EPSILON: f64 = 1e-12;

/// Default falloff relative to the inter-eye distance.
pub const DEFAULT_SIGMA_FACTOR: f64 = 0.55;

#[derive(Debug, Clone)]
struct Sample {
    source: Point,
    delta: Point,
}

/// Smooth map `(x, y) -> (x', y')` closed over one frame's control points.
#[derive(Debug, Clone)]
pub struct DisplacementField {
    samples: Vec<Sample>,
    sigma: f64,
    inv_two_sigma_sq: f64,
}

impl DisplacementField {
    /// `sigma` is clamped to at least one pixel.
    pub fn build<'a>(controls: impl IntoIterator<Item = &'a ControlPoint>, sigma: f64) -> Self {
        let sigma = if sigma.is_finite() { sigma.max(1.0) } else { 1.0 };
        let samples = controls
            .into_iter()
            .map(|c| Sample {
                source: c.source,
                delta: c.delta(),
            })
            .collect();
        Self {
            samples,
            sigma,
            inv_two_sigma_sq: 1.0 / (2.0 * sigma * sigma),
        }
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Displacement vector at `p`.
    pub fn displacement(&self, p: Point) -> Point {
        let mut weight_sum = 0.0;
        let mut dx = 0.0;
        let mut dy = 0.0;
        for s in &self.samples {
            let w = (-p.distance_sq(&s.source) * self.inv_two_sigma_sq).exp();
            weight_sum += w;
            dx += w * s.delta.x;
            dy += w * s.delta.y;
        }
        if weight_sum < WEIGHT_EPSILON {
            return Point::default();
        }
        let norm = weight_sum.max(1.0);
        Point::new(dx / norm, dy / norm)
    }

    /// Displaced position of `p`.
    pub fn eval(&self, p: Point) -> Point {
        p + self.displacement(p)
    }
}

/// Falloff radius for a face of the given inter-eye distance.
pub fn sigma_for(ipd: f64, sigma_factor: f64) -> f64 {
    ipd * sigma_factor
}
