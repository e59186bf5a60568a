//! Per-triangle affine solve and resampling.
//!
//! Each triangle gets the unique affine map taking its three source vertices
//! onto its three destination vertices. Destination pixels whose centres lie
//! inside the destination triangle are pulled back through the inverse map
//! and sampled from the source frame.

use crate::grid::Grid;
use crate::types::Point;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Below this |det| the source triangle is considered collinear.
pub const DEGENERATE_EPSILON: f64 = 1e-8;

/// Inclusive slack for the point-in-triangle test, in pixels² of edge cross product.
const EDGE_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum AffineError {
    #[error("degenerate source triangle (det = {det:e})")]
    Degenerate { det: f64 },
}

/// 2×3 affine map in canvas order:
/// ```text
/// x' = a·x + c·y + e
/// y' = b·x + d·y + f
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// Solve the map sending `src[i]` to `dst[i]` for i = 0..3.
    ///
    /// Inverts the homogeneous source matrix
    /// ```text
    /// | s0.x  s0.y  1 |
    /// | s1.x  s1.y  1 |
    /// | s2.x  s2.y  1 |
    /// ```
    /// by cofactors and applies it to the destination x and y columns.
    pub fn from_triangles(src: [Point; 3], dst: [Point; 3]) -> Result<Self, AffineError> {
        let m = [
            src[0].x, src[0].y, 1.0, //
            src[1].x, src[1].y, 1.0, //
            src[2].x, src[2].y, 1.0,
        ];
        let inv = invert_3x3(&m)?;
        let [a, c, e] = mul_3x3(&inv, [dst[0].x, dst[1].x, dst[2].x]);
        let [b, d, f] = mul_3x3(&inv, [dst[0].y, dst[1].y, dst[2].y]);
        Ok(Self { a, b, c, d, e, f })
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// `None` when the map collapses the plane onto a line.
    pub fn inverse(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < DEGENERATE_EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = self.d * inv_det;
        let b = -self.b * inv_det;
        let c = -self.c * inv_det;
        let d = self.a * inv_det;
        Some(AffineTransform {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }

    /// Coefficients as `(a, b, c, d, e, f)`.
    pub fn coefficients(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

/// Row-major 3×3 inverse via the adjugate.
#[allow(clippy::many_single_char_names)]
fn invert_3x3(m: &[f64; 9]) -> Result<[f64; 9], AffineError> {
    let [a, b, c, d, e, f, g, h, i] = *m;
    let ca = e * i - f * h;
    let cb = -(d * i - f * g);
    let cc = d * h - e * g;
    let cd = -(b * i - c * h);
    let ce = a * i - c * g;
    let cf = -(a * h - b * g);
    let cg = b * f - c * e;
    let ch = -(a * f - c * d);
    let ci = a * e - b * d;

    let det = a * ca + b * cb + c * cc;
    if det.abs() < DEGENERATE_EPSILON {
        return Err(AffineError::Degenerate { det });
    }
    let r = 1.0 / det;
    Ok([
        ca * r, cd * r, cg * r, //
        cb * r, ce * r, ch * r, //
        cc * r, cf * r, ci * r,
    ])
}

fn mul_3x3(m: &[f64; 9], v: [f64; 3]) -> [f64; 3] {
    [
        m[0] * v[0] + m[1] * v[1] + m[2] * v[2],
        m[3] * v[0] + m[4] * v[1] + m[5] * v[2],
        m[6] * v[0] + m[7] * v[1] + m[8] * v[2],
    ]
}

/// Source lookup filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sampling {
    #[default]
    Bilinear,
    Nearest,
}

/// Read the RGBA value at continuous pixel coordinates (pixel centres at +0.5).
///
/// Coordinates outside the frame clamp to the border.
pub fn sample(src: &RgbaImage, x: f64, y: f64, sampling: Sampling) -> [u8; 4] {
    let (w, h) = src.dimensions();
    let (w, h) = (w as i64, h as i64);
    let raw: &[u8] = src.as_raw();
    let fetch = |px: i64, py: i64| -> [u8; 4] {
        let px = px.clamp(0, w - 1) as usize;
        let py = py.clamp(0, h - 1) as usize;
        let o = (py * w as usize + px) * 4;
        [raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]
    };

    match sampling {
        Sampling::Nearest => fetch(x.floor() as i64, y.floor() as i64),
        Sampling::Bilinear => {
            let sx = x - 0.5;
            let sy = y - 0.5;
            let x0 = sx.floor();
            let y0 = sy.floor();
            let fx = sx - x0;
            let fy = sy - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let tl = fetch(x0, y0);
            let tr = fetch(x0 + 1, y0);
            let bl = fetch(x0, y0 + 1);
            let br = fetch(x0 + 1, y0 + 1);

            let mut out = [0u8; 4];
            for ch in 0..4 {
                let val = tl[ch] as f64 * (1.0 - fx) * (1.0 - fy)
                    + tr[ch] as f64 * fx * (1.0 - fy)
                    + bl[ch] as f64 * (1.0 - fx) * fy
                    + br[ch] as f64 * fx * fy;
                out[ch] = val.round().clamp(0.0, 255.0) as u8;
            }
            out
        }
    }
}

fn edge(p: Point, q: Point, r: Point) -> f64 {
    (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
}

/// Warp one triangle of `src` into `dst`, clipped to the destination triangle.
///
/// Returns the number of pixels written. A collinear source triangle is an
/// error and leaves `dst` untouched.
pub fn warp_triangle(
    src: &RgbaImage,
    dst: &mut RgbaImage,
    s: [Point; 3],
    d: [Point; 3],
    sampling: Sampling,
) -> Result<usize, AffineError> {
    let forward = AffineTransform::from_triangles(s, d)?;
    // Destination collapsed to a line: covers no pixel centres.
    let Some(inverse) = forward.inverse() else {
        return Ok(0);
    };

    let (w, h) = dst.dimensions();
    if w == 0 || h == 0 {
        return Ok(0);
    }
    let min_x = d.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = d.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = d.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = d.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

    let x_start = (min_x.floor().max(0.0) as u32).min(w);
    let x_end = (max_x.ceil().max(0.0) as u32).min(w);
    let y_start = (min_y.floor().max(0.0) as u32).min(h);
    let y_end = (max_y.ceil().max(0.0) as u32).min(h);

    let area = edge(d[0], d[1], d[2]);
    let sign = if area < 0.0 { -1.0 } else { 1.0 };

    let mut painted = 0;
    for py in y_start..y_end {
        for px in x_start..x_end {
            let c = Point::new(px as f64 + 0.5, py as f64 + 0.5);
            let inside = sign * edge(d[0], d[1], c) >= -EDGE_TOLERANCE
                && sign * edge(d[1], d[2], c) >= -EDGE_TOLERANCE
                && sign * edge(d[2], d[0], c) >= -EDGE_TOLERANCE;
            if !inside {
                continue;
            }
            let s_pt = inverse.apply(c);
            let rgba = sample(src, s_pt.x, s_pt.y, sampling);
            dst.put_pixel(px, py, image::Rgba(rgba));
            painted += 1;
        }
    }
    Ok(painted)
}

/// Outcome counters for one grid warp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarpStats {
    pub triangles: usize,
    pub degenerate: usize,
    pub pixels: usize,
}

impl std::ops::AddAssign for WarpStats {
    fn add_assign(&mut self, rhs: Self) {
        self.triangles += rhs.triangles;
        self.degenerate += rhs.degenerate;
        self.pixels += rhs.pixels;
    }
}

/// Warp every triangle of `grid`. Degenerate triangles are skipped and
/// leave whatever `dst` already holds showing through.
pub fn warp_grid(src: &RgbaImage, dst: &mut RgbaImage, grid: &Grid, sampling: Sampling) -> WarpStats {
    let mut stats = WarpStats::default();
    for t in grid.triangles() {
        stats.triangles += 1;
        match warp_triangle(src, dst, grid.source_triangle(t), grid.dest_triangle(t), sampling) {
            Ok(n) => stats.pixels += n,
            Err(err) => {
                stats.degenerate += 1;
                tracing::trace!(triangle = ?t, error = %err, "skipping triangle");
            }
        }
    }
    if stats.degenerate > 0 {
        tracing::debug!(degenerate = stats.degenerate, total = stats.triangles, "degenerate triangles skipped");
    }
    stats
}
