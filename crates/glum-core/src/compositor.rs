//! Localized patch warps: mouth, brows and upper eyelids.
//!
//! Each region is warped on its own as a single quad into a transparent
//! frame-sized buffer, faded out with a [`FeatherMask`](crate::mask::FeatherMask), and alpha-composited
//! over the output. Patches always read from the untouched base frame, so
//! overlapping regions do not feed into each other.

use crate::affine::{warp_grid, Sampling, WarpStats};
use crate::grid::Grid;
use crate::landmarks::{FaceLandmarks, FaceRole};
use crate::mapper::ScaleReference;
use crate::mask::{BlurCapability, MaskStyle};
use crate::pool::BufferPool;
use crate::types::{Point, Rect};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Patch sizes and offsets, in units of `ipd` unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchProfile {
    /// Bottom edge of the mouth patch moves down by this much.
    pub mouth_down: f64,
    /// Top edge of the mouth patch moves down by this much.
    pub mouth_top_shift: f64,
    pub mouth_pad_factor: f64,
    /// Minimum mouth padding, pixels.
    pub min_mouth_pad: f64,
    pub brow_width: f64,
    pub brow_height: f64,
    pub brow_drop: f64,
    pub brow_pinch: f64,
    /// Fraction of `brow_pinch` applied to the whole brow patch.
    pub brow_pinch_ratio: f64,
    /// Eye patch width as a fraction of the eye-corner distance.
    pub eye_width_ratio: f64,
    /// Eye patch height as a fraction of its width.
    pub eye_aspect: f64,
    pub eyelid_droop: f64,
}

impl Default for PatchProfile {
    fn default() -> Self {
        Self {
            mouth_down: 0.22,
            mouth_top_shift: 0.06,
            mouth_pad_factor: 0.5,
            min_mouth_pad: 20.0,
            brow_width: 0.55,
            brow_height: 0.22,
            brow_drop: 0.14,
            brow_pinch: 0.04,
            brow_pinch_ratio: 0.6,
            eye_width_ratio: 0.95,
            eye_aspect: 0.5,
            eyelid_droop: 0.06,
        }
    }
}

/// One deformation region: a source rectangle and where its corners go.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRegion {
    pub name: &'static str,
    /// Pixel-aligned source rectangle, inside the frame.
    pub rect: Rect,
    /// Destination corners: top-left, top-right, bottom-right, bottom-left.
    pub dest: [Point; 4],
}

impl PatchRegion {
    fn translated(name: &'static str, rect: Rect, dx: f64, dy: f64) -> Self {
        let dest = rect.corners().map(|p| Point::new(p.x + dx, p.y + dy));
        Self { name, rect, dest }
    }
}

/// Mouth, both brows and both upper eyelids for one frame.
///
/// Regions that fall entirely outside the frame are dropped.
pub fn patch_regions(
    face: &FaceLandmarks,
    profile: &PatchProfile,
    intensity: f64,
    width: u32,
    height: u32,
) -> Vec<PatchRegion> {
    let k = intensity.clamp(0.0, 1.0);
    let scale = ScaleReference::measure(face);
    let ipd = scale.ipd;
    let mut regions = Vec::with_capacity(5);

    // Mouth: top edge shifts slightly, bottom edge drops further.
    let mouth = [
        face.get(FaceRole::MouthCornerLeft),
        face.get(FaceRole::MouthCornerRight),
        face.get(FaceRole::UpperLipTop),
        face.get(FaceRole::LowerLipBottom),
    ];
    if let Some(bounds) = Rect::bounding(&mouth) {
        let pad = (ipd * profile.mouth_pad_factor).max(profile.min_mouth_pad);
        let rect = bounds.inflate(pad).snap_out(width, height);
        let top = profile.mouth_top_shift * ipd * k;
        let down = profile.mouth_down * ipd * k;
        let [tl, tr, br, bl] = rect.corners();
        regions.push(PatchRegion {
            name: "mouth",
            rect,
            dest: [
                Point::new(tl.x, tl.y + top),
                Point::new(tr.x, tr.y + top),
                Point::new(br.x, br.y + down),
                Point::new(bl.x, bl.y + down),
            ],
        });
    }

    // Brows: whole patch drops and slides toward the midline.
    let drop = profile.brow_drop * ipd * k;
    let pinch = profile.brow_pinch * profile.brow_pinch_ratio * ipd * k;
    for (name, role) in [("left_brow", FaceRole::LeftMidBrow), ("right_brow", FaceRole::RightMidBrow)] {
        let center = face.get(role);
        let rect = Rect::centered(center, ipd * profile.brow_width, ipd * profile.brow_height);
        let rect = rect.snap_out(width, height);
        regions.push(PatchRegion::translated(name, rect, scale.inward(center) * pinch, drop));
    }

    // Upper eyelids: patch between the eye corners droops.
    let droop = profile.eyelid_droop * ipd * k;
    for (name, inner, outer) in [
        ("left_eyelid", FaceRole::LeftEyeInner, FaceRole::LeftEyeOuter),
        ("right_eyelid", FaceRole::RightEyeInner, FaceRole::RightEyeOuter),
    ] {
        let inner = face.get(inner);
        let outer = face.get(outer);
        let w = inner.distance(&outer) * profile.eye_width_ratio;
        let rect = Rect::centered(inner.midpoint(&outer), w, w * profile.eye_aspect);
        let rect = rect.snap_out(width, height);
        regions.push(PatchRegion::translated(name, rect, 0.0, droop));
    }

    regions.retain(|r| !r.rect.is_empty());
    regions
}

/// Warps patches and blends them over the output frame.
#[derive(Debug, Clone)]
pub struct PatchCompositor {
    style: MaskStyle,
    blur: BlurCapability,
    sampling: Sampling,
}

impl PatchCompositor {
    pub fn new(style: MaskStyle, blur: BlurCapability, sampling: Sampling) -> Self {
        Self { style, blur, sampling }
    }

    /// Warp `region` of `base` and blend it onto `out`.
    ///
    /// `base` and `out` must share the pool's dimensions. `slot` picks the
    /// pooled mask; pass the region's index in the frame's region list.
    pub fn composite(
        &self,
        base: &RgbaImage,
        out: &mut RgbaImage,
        region: &PatchRegion,
        slot: usize,
        ipd: f64,
        pool: &mut BufferPool,
    ) -> WarpStats {
        let (w, h) = base.dimensions();
        let (scratch, mask) = pool.patch_buffers(slot);

        let grid = Grid::from_quad(region.rect.corners(), region.dest);
        let stats = warp_grid(base, scratch, &grid, self.sampling);

        let mw = region.rect.width as u32;
        let mh = region.rect.height as u32;
        mask.render(mw, mh, self.style.corner_radius(ipd), self.style.feather(ipd));
        if self.blur == BlurCapability::Available {
            mask.blur(self.style.blur_sigma(ipd));
        }

        // Everything the warp may have touched: source rect plus destination quad.
        let dirty = Rect::bounding(&region.dest)
            .map(|d| d.union(&region.rect))
            .unwrap_or(region.rect)
            .snap_out(w, h);
        let (rx, ry) = (region.rect.x as u32, region.rect.y as u32);

        for y in dirty.y as u32..dirty.bottom() as u32 {
            for x in dirty.x as u32..dirty.right() as u32 {
                let src = scratch.get_pixel(x, y).0;
                if src[3] == 0 {
                    continue;
                }
                let inside = x >= rx && y >= ry && x < rx + mw && y < ry + mh;
                if inside {
                    let a = src[3] as f32 / 255.0 * mask.alpha(x - rx, y - ry);
                    let dst = out.get_pixel_mut(x, y);
                    dst.0 = alpha_over(src, dst.0, a);
                }
                scratch.put_pixel(x, y, image::Rgba([0, 0, 0, 0]));
            }
        }

        tracing::trace!(region = region.name, pixels = stats.pixels, "patch composited");
        stats
    }
}

/// Standard "over" operator with straight (non-premultiplied) alpha.
/// `alpha` is the effective source coverage in `[0, 1]`.
pub fn alpha_over(src: [u8; 4], dst: [u8; 4], alpha: f32) -> [u8; 4] {
    let a = alpha.clamp(0.0, 1.0);
    if a <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = a + da * (1.0 - a);
    if out_a <= 0.0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for ch in 0..3 {
        let v = (src[ch] as f32 * a + dst[ch] as f32 * da * (1.0 - a)) / out_a;
        out[ch] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    out
}
