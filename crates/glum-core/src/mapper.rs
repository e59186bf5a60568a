//! Control-point targets from landmarks, inter-eye distance and intensity.

use crate::landmarks::{FaceLandmarks, FaceRole};
use crate::types::{ControlPoint, Point};
use serde::{Deserialize, Serialize};

/// Floor for the inter-eye distance, in pixels.
pub const MIN_IPD: f64 = 1.0;

/// Offset coefficients for the full-face mesh render, in units of `ipd`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshProfile {
    /// Inner-brow drop.
    pub brow_drop: f64,
    /// Inner-brow pull toward the midline.
    pub brow_pinch: f64,
    /// Mid-brow drop as a fraction of `brow_drop`.
    pub mid_brow_drop_ratio: f64,
    /// Mid-brow pinch as a fraction of `brow_pinch`.
    pub mid_brow_pinch_ratio: f64,
    pub mouth_down: f64,
    /// Mouth-corner pull toward the midline as a fraction of `brow_pinch`.
    pub mouth_pinch_ratio: f64,
    /// Upper-lip counter-shift (upward).
    pub lip_raise: f64,
    pub eyelid_droop: f64,
}

impl Default for MeshProfile {
    fn default() -> Self {
        Self {
            brow_drop: 0.25,
            brow_pinch: 0.08,
            mid_brow_drop_ratio: 0.7,
            mid_brow_pinch_ratio: 0.5,
            mouth_down: 0.28,
            mouth_pinch_ratio: 0.2,
            lip_raise: 0.06,
            eyelid_droop: 0.06,
        }
    }
}

/// Face scale and orientation reference for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleReference {
    /// Inter-eye distance in pixels, never below [`MIN_IPD`].
    pub ipd: f64,
    /// Midpoint between the two eye references.
    pub midline: Point,
}

impl ScaleReference {
    pub fn measure(face: &FaceLandmarks) -> Self {
        let left = face.get(FaceRole::LeftEyeReference);
        let right = face.get(FaceRole::RightEyeReference);
        let raw = left.distance(&right);
        let ipd = if raw < MIN_IPD {
            tracing::warn!(ipd = raw, min = MIN_IPD, "inter-eye distance below floor; clamping");
            MIN_IPD
        } else {
            raw
        };
        Self {
            ipd,
            midline: left.midpoint(&right),
        }
    }

    /// Horizontal unit step toward the facial midline: -1, 0 or +1.
    pub fn inward(&self, p: Point) -> f64 {
        let d = self.midline.x - p.x;
        if d > 0.0 {
            1.0
        } else if d < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}

/// The frame's control points with their scale reference.
#[derive(Debug, Clone)]
pub struct ControlPoints {
    pub points: Vec<ControlPoint>,
    pub scale: ScaleReference,
}

impl ControlPoints {
    pub fn target_of(&self, role: FaceRole) -> Option<Point> {
        self.points.iter().find(|c| c.role == role).map(|c| c.target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlPoint> {
        self.points.iter()
    }

    /// Largest control displacement, in pixels.
    pub fn max_displacement(&self) -> f64 {
        self.points
            .iter()
            .map(|c| c.source.distance(&c.target))
            .fold(0.0, f64::max)
    }
}

/// Maps semantic landmarks to displaced targets with a fixed [`MeshProfile`].
#[derive(Debug, Clone, Default)]
pub struct ControlPointMapper {
    profile: MeshProfile,
}

impl ControlPointMapper {
    pub fn new(profile: MeshProfile) -> Self {
        Self { profile }
    }

    /// Every offset is linear in `intensity`, so 0 yields `target == source`.
    pub fn map(&self, face: &FaceLandmarks, intensity: f64) -> ControlPoints {
        let k = intensity.clamp(0.0, 1.0);
        let scale = ScaleReference::measure(face);
        let p = &self.profile;

        let drop = p.brow_drop * scale.ipd * k;
        let pinch = p.brow_pinch * scale.ipd * k;
        let mouth_down = p.mouth_down * scale.ipd * k;
        let lip_raise = p.lip_raise * scale.ipd * k;
        let droop = p.eyelid_droop * scale.ipd * k;

        // (role, inward shift, vertical shift)
        let offsets = [
            (FaceRole::LeftInnerBrow, pinch, drop),
            (FaceRole::RightInnerBrow, pinch, drop),
            (
                FaceRole::LeftMidBrow,
                pinch * p.mid_brow_pinch_ratio,
                drop * p.mid_brow_drop_ratio,
            ),
            (
                FaceRole::RightMidBrow,
                pinch * p.mid_brow_pinch_ratio,
                drop * p.mid_brow_drop_ratio,
            ),
            (FaceRole::MouthCornerLeft, pinch * p.mouth_pinch_ratio, mouth_down),
            (FaceRole::MouthCornerRight, pinch * p.mouth_pinch_ratio, mouth_down),
            (FaceRole::UpperLipTop, 0.0, -lip_raise),
            (FaceRole::LeftUpperEyelid, 0.0, droop),
            (FaceRole::RightUpperEyelid, 0.0, droop),
        ];

        let points = offsets
            .into_iter()
            .map(|(role, inward, down)| {
                let source = face.get(role);
                let target = Point::new(source.x + scale.inward(source) * inward, source.y + down);
                ControlPoint { role, source, target }
            })
            .collect();

        tracing::trace!(ipd = scale.ipd, intensity = k, "mapped control points");
        ControlPoints { points, scale }
    }
}
