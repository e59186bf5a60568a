//! glum-core — Landmark-driven facial warp engine.
//!
//! Turns sparse control-point displacements (derived from detected face
//! landmarks) into a smooth Gaussian RBF displacement field, tessellates the
//! face region into a triangle grid, and resamples the frame through one
//! affine map per triangle. A localized variant warps small feathered patches
//! and alpha-composites them back onto the frame.

pub mod affine;
pub mod compositor;
pub mod config;
pub mod field;
pub mod frame;
pub mod grid;
pub mod landmarks;
pub mod mapper;
pub mod mask;
pub mod pipeline;
pub mod pool;
pub mod trigger;
pub mod types;

pub use config::{RenderMode, WarpConfig};
pub use field::DisplacementField;
pub use landmarks::{FaceRole, LandmarkScheme, SchemeKind};
pub use pipeline::{FrameOutcome, WarpEngine};
pub use trigger::TriggerMode;
pub use types::{ControlPoint, CoordinateSpace, Detection, LandmarkSet, Point, Rect};
