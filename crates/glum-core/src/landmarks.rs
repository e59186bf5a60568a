//! Semantic face roles and the detector index schemes that locate them.
//!
//! Offset formulas only ever speak in [`FaceRole`]s; the detector's own
//! numbering lives in exactly one table per [`SchemeKind`].

use crate::types::{LandmarkSet, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Anatomical role of a landmark. Left/right are the subject's own sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum FaceRole {
    LeftInnerBrow,
    RightInnerBrow,
    LeftMidBrow,
    RightMidBrow,
    LeftUpperEyelid,
    RightUpperEyelid,
    LeftEyeInner,
    LeftEyeOuter,
    RightEyeInner,
    RightEyeOuter,
    MouthCornerLeft,
    MouthCornerRight,
    UpperLipTop,
    LowerLipBottom,
    /// Scale reference: `ipd` is measured between the two eye references.
    LeftEyeReference,
    RightEyeReference,
}

impl FaceRole {
    pub const ALL: [FaceRole; 16] = [
        FaceRole::LeftInnerBrow,
        FaceRole::RightInnerBrow,
        FaceRole::LeftMidBrow,
        FaceRole::RightMidBrow,
        FaceRole::LeftUpperEyelid,
        FaceRole::RightUpperEyelid,
        FaceRole::LeftEyeInner,
        FaceRole::LeftEyeOuter,
        FaceRole::RightEyeInner,
        FaceRole::RightEyeOuter,
        FaceRole::MouthCornerLeft,
        FaceRole::MouthCornerRight,
        FaceRole::UpperLipTop,
        FaceRole::LowerLipBottom,
        FaceRole::LeftEyeReference,
        FaceRole::RightEyeReference,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FaceRole::LeftInnerBrow => "left_inner_brow",
            FaceRole::RightInnerBrow => "right_inner_brow",
            FaceRole::LeftMidBrow => "left_mid_brow",
            FaceRole::RightMidBrow => "right_mid_brow",
            FaceRole::LeftUpperEyelid => "left_upper_eyelid",
            FaceRole::RightUpperEyelid => "right_upper_eyelid",
            FaceRole::LeftEyeInner => "left_eye_inner",
            FaceRole::LeftEyeOuter => "left_eye_outer",
            FaceRole::RightEyeInner => "right_eye_inner",
            FaceRole::RightEyeOuter => "right_eye_outer",
            FaceRole::MouthCornerLeft => "mouth_corner_left",
            FaceRole::MouthCornerRight => "mouth_corner_right",
            FaceRole::UpperLipTop => "upper_lip_top",
            FaceRole::LowerLipBottom => "lower_lip_bottom",
            FaceRole::LeftEyeReference => "left_eye_reference",
            FaceRole::RightEyeReference => "right_eye_reference",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("landmark set has {actual} points, scheme {scheme} expects {expected}")]
    WrongCount {
        scheme: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("landmark {index} ({role}) is not a finite coordinate")]
    NonFinite { index: usize, role: &'static str },
}

/// Which detector produced the landmark array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    /// MediaPipe FaceMesh, 468 points (478 with iris refinement).
    #[default]
    #[serde(rename = "mediapipe_face_mesh")]
    MediaPipeFaceMesh,
    /// clmtrackr, 71 points.
    Clmtrackr,
}

impl SchemeKind {
    pub fn scheme(&self) -> &'static LandmarkScheme {
        match self {
            SchemeKind::MediaPipeFaceMesh => &MEDIAPIPE_FACE_MESH,
            SchemeKind::Clmtrackr => &CLMTRACKR,
        }
    }
}

/// Role → detector index table for one landmark detector.
#[derive(Debug)]
pub struct LandmarkScheme {
    pub name: &'static str,
    /// Minimum number of points a complete detection carries.
    pub point_count: usize,
    /// Upper bound accepted (refined meshes append iris points).
    pub max_point_count: usize,
    /// Detector index per role, in `FaceRole::ALL` order.
    indices: [usize; 16],
}

pub static MEDIAPIPE_FACE_MESH: LandmarkScheme = LandmarkScheme {
    name: "mediapipe_face_mesh",
    point_count: 468,
    max_point_count: 478,
    indices: [
        65, // LeftInnerBrow
        295, // RightInnerBrow
        70, // LeftMidBrow
        300, // RightMidBrow
        159, // LeftUpperEyelid
        386, // RightUpperEyelid
        133, // LeftEyeInner
        33, // LeftEyeOuter
        362, // RightEyeInner
        263, // RightEyeOuter
        61, // MouthCornerLeft
        291, // MouthCornerRight
        13, // UpperLipTop
        14, // LowerLipBottom
        33, // LeftEyeReference
        263, // RightEyeReference
    ],
};

pub static CLMTRACKR: LandmarkScheme = LandmarkScheme {
    name: "clmtrackr",
    point_count: 71,
    max_point_count: 71,
    indices: [
        19, // LeftInnerBrow
        15, // RightInnerBrow
        20, // LeftMidBrow
        14, // RightMidBrow
        24, // LeftUpperEyelid
        29, // RightUpperEyelid
        25, // LeftEyeInner
        23, // LeftEyeOuter
        30, // RightEyeInner
        28, // RightEyeOuter
        44, // MouthCornerLeft
        50, // MouthCornerRight
        47, // UpperLipTop
        53, // LowerLipBottom
        27, // LeftEyeReference
        32, // RightEyeReference
    ],
};

impl LandmarkScheme {
    pub fn index_of(&self, role: FaceRole) -> usize {
        self.indices[role as usize]
    }

    pub fn roles(&self) -> impl Iterator<Item = (FaceRole, usize)> + '_ {
        FaceRole::ALL.into_iter().zip(self.indices)
    }

    /// Check point count and that every role this scheme names is finite.
    pub fn validate(&self, set: &LandmarkSet) -> Result<(), LandmarkError> {
        let n = set.len();
        if n < self.point_count || n > self.max_point_count {
            return Err(LandmarkError::WrongCount {
                scheme: self.name,
                expected: self.point_count,
                actual: n,
            });
        }
        for (role, index) in self.roles() {
            if !set.points[index].is_finite() {
                return Err(LandmarkError::NonFinite {
                    index,
                    role: role.name(),
                });
            }
        }
        Ok(())
    }

    /// Resolve every role against a validated landmark set.
    pub fn resolve(&self, set: &LandmarkSet) -> Result<FaceLandmarks, LandmarkError> {
        self.validate(set)?;
        let positions = std::array::from_fn(|i| set.points[self.indices[i]]);
        Ok(FaceLandmarks { positions })
    }
}

/// Role-addressed landmark positions for one frame.
#[derive(Debug, Clone)]
pub struct FaceLandmarks {
    positions: [Point; 16],
}

impl FaceLandmarks {
    pub fn get(&self, role: FaceRole) -> Point {
        self.positions[role as usize]
    }

    /// Build directly from role positions (detector-agnostic callers, tests).
    pub fn from_fn(mut f: impl FnMut(FaceRole) -> Point) -> Self {
        let positions = std::array::from_fn(|i| f(FaceRole::ALL[i]));
        Self { positions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoordinateSpace;

    fn full_set(n: usize) -> LandmarkSet {
        LandmarkSet::new(
            CoordinateSpace::Pixels,
            (0..n).map(|i| Point::new(i as f64, 2.0 * i as f64)).collect(),
        )
    }

    #[test]
    fn test_role_ordinals_match_table_order() {
        for (i, role) in FaceRole::ALL.iter().enumerate() {
            assert_eq!(*role as usize, i, "{} out of order", role.name());
        }
        for scheme in [&MEDIAPIPE_FACE_MESH, &CLMTRACKR] {
            for (role, index) in scheme.roles() {
                assert!(index < scheme.point_count, "{}: {} -> {index}", scheme.name, role.name());
            }
        }
    }

    #[test]
    fn test_resolve_reads_scheme_indices() {
        let set = full_set(71);
        let face = CLMTRACKR.resolve(&set).unwrap();
        assert_eq!(face.get(FaceRole::MouthCornerLeft), Point::new(44.0, 88.0));
        assert_eq!(face.get(FaceRole::RightEyeReference), Point::new(32.0, 64.0));
    }

    #[test]
    fn test_wrong_count_rejected() {
        let err = MEDIAPIPE_FACE_MESH.validate(&full_set(71)).unwrap_err();
        assert_eq!(
            err,
            LandmarkError::WrongCount { scheme: "mediapipe_face_mesh", expected: 468, actual: 71 }
        );
        // Refined mesh with iris points is still accepted.
        assert!(MEDIAPIPE_FACE_MESH.validate(&full_set(478)).is_ok());
        assert!(MEDIAPIPE_FACE_MESH.validate(&full_set(479)).is_err());
    }

    #[test]
    fn test_non_finite_role_rejected() {
        let mut set = full_set(71);
        set.points[47] = Point::new(f64::NAN, 1.0);
        let err = CLMTRACKR.validate(&set).unwrap_err();
        assert_eq!(err, LandmarkError::NonFinite { index: 47, role: "upper_lip_top" });

        // Indices no role uses may be garbage.
        let mut set = full_set(71);
        set.points[0] = Point::new(f64::INFINITY, 0.0);
        assert!(CLMTRACKR.validate(&set).is_ok());
    }
}
