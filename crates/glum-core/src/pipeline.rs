//! Per-frame entry point: detection in, warped frame out.
//!
//! Every failure inside a frame degrades to passing the input through
//! unmodified; nothing here is fatal to the host.

use crate::affine::{sample, warp_grid, Sampling, WarpStats};
use crate::compositor::{patch_regions, PatchCompositor};
use crate::config::{ConfigError, RenderMode, WarpConfig};
use crate::field::{sigma_for, DisplacementField};
use crate::frame;
use crate::landmarks::{FaceLandmarks, LandmarkError};
use crate::mapper::{ControlPointMapper, ScaleReference};
use crate::mask::BlurCapability;
use crate::pool::BufferPool;
use crate::trigger::{TriggerMode, TriggerState};
use crate::types::{CoordinateSpace, Detection, LandmarkSet, Point, Rect};
use image::{Rgba, RgbaImage};

/// Distance from the landmark bounds to the mesh grid edge, in units of sigma.
/// The field has decayed to a small fraction of a pixel there.
pub const FIELD_SUPPORT_SIGMAS: f64 = 4.0;

/// Why a frame was returned unmodified.
#[derive(Debug, Clone, PartialEq)]
pub enum PassthroughReason {
    NoFace,
    /// Wrong point count or a required landmark is not finite.
    MalformedLandmarks(LandmarkError),
    /// The trigger resolved to zero intensity.
    Idle,
    /// The face region does not overlap the frame, or the frame is empty.
    OutsideFrame,
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Passthrough(PassthroughReason),
    Warped {
        intensity: f64,
        /// Output pixels that may differ from the input.
        region: Rect,
        stats: WarpStats,
    },
}

impl FrameOutcome {
    pub fn is_warped(&self) -> bool {
        matches!(self, FrameOutcome::Warped { .. })
    }
}

/// Stateful warp engine. Feed it one frame at a time.
#[derive(Debug)]
pub struct WarpEngine {
    config: WarpConfig,
    mapper: ControlPointMapper,
    compositor: PatchCompositor,
    blur: BlurCapability,
    trigger: TriggerState,
    pool: BufferPool,
}

impl WarpEngine {
    pub fn new(config: WarpConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let blur = BlurCapability::probe(&config.mask);
        tracing::info!(
            render = ?config.render,
            scheme = config.scheme.scheme().name,
            intensity = config.intensity,
            grid_cols = config.grid.cols,
            grid_rows = config.grid.rows,
            source_scale = config.source_scale,
            blur = ?blur,
            "warp engine ready"
        );
        Ok(Self {
            mapper: ControlPointMapper::new(config.mesh_profile),
            compositor: PatchCompositor::new(config.mask, blur, config.sampling),
            blur,
            trigger: TriggerState::default(),
            pool: BufferPool::new(0, 0),
            config,
        })
    }

    pub fn config(&self) -> &WarpConfig {
        &self.config
    }

    pub fn blur_capability(&self) -> BlurCapability {
        self.blur
    }

    pub fn trigger_state(&self) -> &TriggerState {
        &self.trigger
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Change the configured intensity (slider input).
    pub fn set_intensity(&mut self, intensity: f64) -> Result<(), ConfigError> {
        let next = WarpConfig {
            intensity,
            ..self.config.clone()
        };
        next.validate()?;
        self.config = next;
        Ok(())
    }

    /// Switch trigger policy. The smoothed score starts over.
    pub fn set_trigger(&mut self, mode: TriggerMode) -> Result<(), ConfigError> {
        let next = WarpConfig {
            trigger: mode,
            ..self.config.clone()
        };
        next.validate()?;
        self.config = next;
        self.trigger.reset();
        Ok(())
    }

    /// Process one frame into a freshly allocated output.
    pub fn process(&mut self, input: &RgbaImage, detection: &Detection) -> (RgbaImage, FrameOutcome) {
        let mut out = RgbaImage::new(0, 0);
        let outcome = self.process_into(input, detection, &mut out);
        (out, outcome)
    }

    /// Process one frame into `out`, reusing its allocation.
    ///
    /// `out` always ends up with `input`'s dimensions. On any passthrough it
    /// is byte-identical to `input`. Frames without a face leave the trigger
    /// average untouched.
    pub fn process_into(&mut self, input: &RgbaImage, detection: &Detection, out: &mut RgbaImage) -> FrameOutcome {
        out.clone_from(input);

        let Detection::Face { landmarks, score } = detection else {
            return FrameOutcome::Passthrough(PassthroughReason::NoFace);
        };

        let (w, h) = input.dimensions();
        if w == 0 || h == 0 {
            return FrameOutcome::Passthrough(PassthroughReason::OutsideFrame);
        }
        let (sw, sh) = frame::scaled_dimensions(w, h, self.config.source_scale);
        let working = working_landmarks(landmarks, (w, h), (sw, sh));
        let face = match self.config.scheme.scheme().resolve(&working) {
            Ok(face) => face,
            Err(err) => {
                tracing::warn!(error = %err, "malformed landmark set; passing frame through");
                return FrameOutcome::Passthrough(PassthroughReason::MalformedLandmarks(err));
            }
        };

        let intensity = self
            .trigger
            .effective_intensity(&self.config.trigger, self.config.intensity, *score);
        if intensity.is_nan() || intensity <= 0.0 {
            return FrameOutcome::Passthrough(PassthroughReason::Idle);
        }

        self.pool.ensure(sw, sh);
        let rendered = if (sw, sh) == (w, h) {
            self.render(input, out, &working, &face, intensity)
        } else {
            let mut work = std::mem::take(&mut self.pool.work);
            let mut canvas = std::mem::take(&mut self.pool.canvas);
            frame::resize_into(input, sw, sh, &mut work);
            canvas.clone_from(&work);
            let rendered = self
                .render(&work, &mut canvas, &working, &face, intensity)
                .map(|(region, stats)| (paste_upscaled(&canvas, region, out), stats));
            self.pool.work = work;
            self.pool.canvas = canvas;
            rendered
        };

        match rendered {
            Some((region, stats)) => {
                tracing::debug!(
                    intensity,
                    triangles = stats.triangles,
                    degenerate = stats.degenerate,
                    pixels = stats.pixels,
                    "frame warped"
                );
                FrameOutcome::Warped { intensity, region, stats }
            }
            None => FrameOutcome::Passthrough(PassthroughReason::OutsideFrame),
        }
    }

    /// Warp `src` into `dst` (same size, `dst` starts as a copy of `src`).
    /// Returns the pixel rectangle that may have changed.
    fn render(
        &mut self,
        src: &RgbaImage,
        dst: &mut RgbaImage,
        landmarks: &LandmarkSet,
        face: &FaceLandmarks,
        intensity: f64,
    ) -> Option<(Rect, WarpStats)> {
        match self.config.render {
            RenderMode::Mesh => self.render_mesh(src, dst, landmarks, face, intensity),
            RenderMode::Patches => self.render_patches(src, dst, face, intensity),
        }
    }

    fn render_mesh(
        &mut self,
        src: &RgbaImage,
        dst: &mut RgbaImage,
        landmarks: &LandmarkSet,
        face: &FaceLandmarks,
        intensity: f64,
    ) -> Option<(Rect, WarpStats)> {
        let (w, h) = src.dimensions();
        let controls = self.mapper.map(face, intensity);
        let sigma = sigma_for(controls.scale.ipd, self.config.sigma_factor);

        let finite: Vec<Point> = landmarks.points.iter().copied().filter(Point::is_finite).collect();
        let region = mesh_region(&finite, self.config.padding_fraction, sigma, w, h)?;

        let field = DisplacementField::build(controls.iter(), sigma);
        tracing::trace!(
            sigma,
            max_displacement = controls.max_displacement(),
            "displacement field built"
        );

        let grid = &mut self.pool.grid;
        grid.rebuild(region, self.config.grid, |p| field.eval(p));
        let stats = warp_grid(src, dst, grid, self.config.sampling);

        let moved: Vec<Point> = (0..grid.vertex_count()).map(|i| grid.dest(i)).collect();
        let touched = Rect::bounding(&moved)
            .map(|r| r.union(&region))
            .unwrap_or(region)
            .snap_out(w, h);
        Some((touched, stats))
    }

    fn render_patches(
        &mut self,
        src: &RgbaImage,
        dst: &mut RgbaImage,
        face: &FaceLandmarks,
        intensity: f64,
    ) -> Option<(Rect, WarpStats)> {
        let (w, h) = src.dimensions();
        let ipd = ScaleReference::measure(face).ipd;
        let regions = patch_regions(face, &self.config.patch_profile, intensity, w, h);

        let mut stats = WarpStats::default();
        let mut touched: Option<Rect> = None;
        for (slot, region) in regions.iter().enumerate() {
            stats += self.compositor.composite(src, dst, region, slot, ipd, &mut self.pool);
            touched = Some(touched.map_or(region.rect, |t| t.union(&region.rect)));
        }
        touched.map(|t| (t, stats))
    }
}

/// Grid rectangle for the mesh render: the landmark bounds padded by
/// `padding_fraction` of their size, and by at least [`FIELD_SUPPORT_SIGMAS`]
/// sigma, clipped to the frame.
fn mesh_region(points: &[Point], padding_fraction: f64, sigma: f64, width: u32, height: u32) -> Option<Rect> {
    let bounds = Rect::bounding(points)?;
    let reach = FIELD_SUPPORT_SIGMAS * sigma;
    let pad_x = (bounds.width * padding_fraction).max(reach);
    let pad_y = (bounds.height * padding_fraction).max(reach);
    let region = Rect::new(
        bounds.x - pad_x,
        bounds.y - pad_y,
        bounds.width + 2.0 * pad_x,
        bounds.height + 2.0 * pad_y,
    )
    .clamp_to(width as f64, height as f64);
    (!region.is_empty()).then_some(region)
}

/// Landmarks in pixel coordinates of the working resolution.
fn working_landmarks(set: &LandmarkSet, full: (u32, u32), work: (u32, u32)) -> LandmarkSet {
    if set.space == CoordinateSpace::Normalized || full == work {
        return set.to_pixels(work.0, work.1);
    }
    let sx = work.0 as f64 / full.0 as f64;
    let sy = work.1 as f64 / full.1 as f64;
    let points = set.points.iter().map(|p| Point::new(p.x * sx, p.y * sy)).collect();
    LandmarkSet::new(CoordinateSpace::Pixels, points)
}

/// Upsample `region` of the working canvas back into the full-size output.
/// Returns the output rectangle that was written.
fn paste_upscaled(canvas: &RgbaImage, region: Rect, out: &mut RgbaImage) -> Rect {
    let (cw, ch) = canvas.dimensions();
    let (w, h) = out.dimensions();
    let sx = w as f64 / cw as f64;
    let sy = h as f64 / ch as f64;
    let target = Rect::new(region.x * sx, region.y * sy, region.width * sx, region.height * sy).snap_out(w, h);

    for y in target.y as u32..target.bottom() as u32 {
        for x in target.x as u32..target.right() as u32 {
            let px = sample(
                canvas,
                (x as f64 + 0.5) / sx,
                (y as f64 + 0.5) / sy,
                Sampling::Bilinear,
            );
            out.put_pixel(x, y, Rgba(px));
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::DEFAULT_SIGMA_FACTOR;
    use crate::grid::{Grid, GridResolution};
    use crate::landmarks::{FaceRole, SchemeKind};
    use crate::mapper::tests::synthetic_face;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]))
    }

    /// A 71-point pixel-space set with the synthetic face on its role indices
    /// and the remaining points spread over the face oval.
    fn clmtrackr_detection(score: Option<f32>) -> Detection {
        clmtrackr_detection_at(Point::new(0.0, 0.0), score)
    }

    /// Same set moved by `offset`.
    fn clmtrackr_detection_at(offset: Point, score: Option<f32>) -> Detection {
        let face = synthetic_face();
        let scheme = SchemeKind::Clmtrackr.scheme();
        let mut points: Vec<Point> = (0..scheme.point_count)
            .map(|i| {
                let t = i as f64 / scheme.point_count as f64 * std::f64::consts::TAU;
                Point::new(200.0 + 90.0 * t.cos(), 210.0 + 110.0 * t.sin()) + offset
            })
            .collect();
        for (role, index) in scheme.roles() {
            points[index] = face.get(role) + offset;
        }
        Detection::Face {
            landmarks: LandmarkSet::new(CoordinateSpace::Pixels, points),
            score,
        }
    }

    fn engine(config: WarpConfig) -> WarpEngine {
        WarpEngine::new(WarpConfig {
            scheme: SchemeKind::Clmtrackr,
            grid: GridResolution { cols: 12, rows: 12 },
            ..config
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = WarpEngine::new(WarpConfig {
            intensity: 2.0,
            ..WarpConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "intensity", .. }));
    }

    #[test]
    fn test_no_face_is_byte_identical() {
        let input = gradient(64, 48);
        let mut engine = engine(WarpConfig::default());
        let (out, outcome) = engine.process(&input, &Detection::NoFace);
        assert_eq!(outcome, FrameOutcome::Passthrough(PassthroughReason::NoFace));
        assert_eq!(out.as_raw(), input.as_raw());
    }

    #[test]
    fn test_mesh_warp_moves_mouth_region() {
        let input = gradient(800, 800);
        let mut engine = engine(WarpConfig {
            intensity: 1.0,
            ..WarpConfig::default()
        });
        let (out, outcome) = engine.process(&input, &clmtrackr_detection(None));
        let FrameOutcome::Warped { region, stats, .. } = outcome else {
            panic!("expected a warp, got {outcome:?}");
        };
        assert_eq!(stats.triangles, 12 * 12 * 2);
        assert_eq!(stats.degenerate, 0);

        // Mouth corners drop by 28 px: the pixel under the left corner now
        // shows content from above it.
        let corner = synthetic_face().get(FaceRole::MouthCornerLeft);
        let (cx, cy) = (corner.x as u32, corner.y as u32 + 20);
        assert!(out.get_pixel(cx, cy).0[1] < input.get_pixel(cx, cy).0[1]);

        for (x, y, px) in out.enumerate_pixels() {
            let inside = (x as f64) >= region.x
                && (y as f64) >= region.y
                && (x as f64) < region.right()
                && (y as f64) < region.bottom();
            if !inside {
                assert_eq!(px, input.get_pixel(x, y), "({x}, {y}) outside {region:?} changed");
            }
        }
    }

    #[test]
    fn test_patch_mode_warps() {
        let input = gradient(400, 400);
        let mut engine = engine(WarpConfig {
            render: RenderMode::Patches,
            ..WarpConfig::default()
        });
        let (out, outcome) = engine.process(&input, &clmtrackr_detection(None));
        let FrameOutcome::Warped { stats, .. } = outcome else {
            panic!("expected a warp, got {outcome:?}");
        };
        assert_eq!(stats.triangles, 5 * 2);
        assert_ne!(out.as_raw(), input.as_raw());
        // Top-left corner is far from every patch.
        assert_eq!(out.get_pixel(2, 2), input.get_pixel(2, 2));
    }

    #[test]
    fn test_malformed_set_passes_through() {
        let input = gradient(64, 64);
        let mut engine = engine(WarpConfig::default());
        let detection = Detection::Face {
            landmarks: LandmarkSet::new(CoordinateSpace::Normalized, vec![Point::new(0.5, 0.5); 10]),
            score: None,
        };
        let (out, outcome) = engine.process(&input, &detection);
        assert!(matches!(
            outcome,
            FrameOutcome::Passthrough(PassthroughReason::MalformedLandmarks(LandmarkError::WrongCount { actual: 10, .. }))
        ));
        assert_eq!(out.as_raw(), input.as_raw());
    }

    #[test]
    fn test_outcome_clones_with_malformed_reason() {
        let outcome = FrameOutcome::Passthrough(PassthroughReason::MalformedLandmarks(LandmarkError::WrongCount {
            scheme: "clmtrackr",
            expected: 71,
            actual: 10,
        }));
        let copy = outcome.clone();
        assert_eq!(copy, outcome);
        assert!(!copy.is_warped());
    }

    #[test]
    fn test_empty_frame_passes_through() {
        let input = RgbaImage::new(0, 0);
        for (render, source_scale) in [(RenderMode::Mesh, 1.0), (RenderMode::Patches, 1.0), (RenderMode::Mesh, 0.5)] {
            let mut engine = engine(WarpConfig {
                render,
                source_scale,
                trigger: TriggerMode::Forced,
                ..WarpConfig::default()
            });
            let (out, outcome) = engine.process(&input, &clmtrackr_detection(None));
            assert_eq!(outcome, FrameOutcome::Passthrough(PassthroughReason::OutsideFrame));
            assert_eq!(out.dimensions(), (0, 0));
        }
    }

    #[test]
    fn test_mesh_region_edge_is_at_rest() {
        let offset = Point::new(500.0, 500.0);
        let Detection::Face { landmarks, .. } = clmtrackr_detection_at(offset, None) else {
            unreachable!()
        };
        let face = SchemeKind::Clmtrackr.scheme().resolve(&landmarks).unwrap();
        let controls = ControlPointMapper::default().map(&face, 1.0);
        let sigma = sigma_for(controls.scale.ipd, DEFAULT_SIGMA_FACTOR);
        let field = DisplacementField::build(controls.iter(), sigma);

        let region = mesh_region(&landmarks.points, 0.15, sigma, 2000, 2000).unwrap();
        // Not clipped by the frame on any side.
        assert!(region.x > 0.0 && region.y > 0.0 && region.right() < 2000.0 && region.bottom() < 2000.0);

        let mut grid = Grid::default();
        grid.rebuild(region, GridResolution::default(), |p| field.eval(p));
        for j in 0..=grid.rows() {
            for i in 0..=grid.cols() {
                if i != 0 && j != 0 && i != grid.cols() && j != grid.rows() {
                    continue;
                }
                let idx = grid.index(i, j);
                let moved = grid.source(idx).distance(&grid.dest(idx));
                assert!(moved < 0.5, "edge vertex ({i}, {j}) moved {moved} px");
            }
        }
    }

    #[test]
    fn test_mesh_warp_has_no_seam_at_region_edge() {
        let input = RgbaImage::from_fn(1200, 1200, |x, y| {
            Rgba([(x * 255 / 1200) as u8, (y * 255 / 1200) as u8, ((x + y) * 255 / 2400) as u8, 255])
        });
        let mut engine = engine(WarpConfig {
            intensity: 1.0,
            ..WarpConfig::default()
        });
        let (out, outcome) = engine.process(&input, &clmtrackr_detection_at(Point::new(400.0, 400.0), None));
        let FrameOutcome::Warped { region, .. } = outcome else {
            panic!("expected a warp, got {outcome:?}");
        };
        assert!(region.x > 0.0 && region.right() < 1200.0);

        let (x0, y0) = (region.x as u32, region.y as u32);
        let (x1, y1) = (region.right() as u32, region.bottom() as u32);
        for y in y0..y1 {
            for x in x0..x1 {
                let near_edge = x < x0 + 3 || y < y0 + 3 || x + 3 >= x1 || y + 3 >= y1;
                if !near_edge {
                    continue;
                }
                let (a, b) = (out.get_pixel(x, y).0, input.get_pixel(x, y).0);
                for c in 0..4 {
                    assert!(a[c].abs_diff(b[c]) <= 2, "({x}, {y}) jumps from {b:?} to {a:?}");
                }
            }
        }
    }

    #[test]
    fn test_threshold_trigger_idles_then_fires() {
        let input = gradient(400, 400);
        let mut engine = engine(WarpConfig {
            trigger: TriggerMode::ThresholdTriggered {
                threshold: 0.5,
                ramp_scale: 10.0,
                ema_alpha: 1.0,
            },
            ..WarpConfig::default()
        });
        let (_, idle) = engine.process(&input, &clmtrackr_detection(Some(0.2)));
        assert_eq!(idle, FrameOutcome::Passthrough(PassthroughReason::Idle));

        // No-face frames do not touch the average.
        engine.process(&input, &Detection::NoFace);
        assert!((engine.trigger_state().ema() - 0.2).abs() < 1e-6);

        let (_, fired) = engine.process(&input, &clmtrackr_detection(Some(0.9)));
        assert!(fired.is_warped());
    }

    #[test]
    fn test_set_trigger_resets_average() {
        let mut engine = engine(WarpConfig {
            trigger: TriggerMode::ThresholdTriggered {
                threshold: 0.5,
                ramp_scale: 1.0,
                ema_alpha: 1.0,
            },
            ..WarpConfig::default()
        });
        engine.process(&gradient(400, 400), &clmtrackr_detection(Some(0.8)));
        assert!(engine.trigger_state().ema() > 0.0);
        engine.set_trigger(TriggerMode::Forced).unwrap();
        assert_eq!(engine.trigger_state().ema(), 0.0);
        assert!(engine.set_intensity(-1.0).is_err());
        assert_eq!(engine.config().intensity, 0.85);
        let nan_threshold = TriggerMode::ThresholdTriggered {
            threshold: f32::NAN,
            ramp_scale: 1.0,
            ema_alpha: 1.0,
        };
        assert!(engine.set_trigger(nan_threshold).is_err());
        assert_eq!(engine.config().trigger, TriggerMode::Forced);
    }

    #[test]
    fn test_downscaled_working_resolution() {
        let input = gradient(1000, 1000);
        let mut engine = engine(WarpConfig {
            intensity: 1.0,
            source_scale: 0.5,
            ..WarpConfig::default()
        });
        let (out, outcome) = engine.process(&input, &clmtrackr_detection(None));
        let FrameOutcome::Warped { region, .. } = outcome else {
            panic!("expected a warp, got {outcome:?}");
        };
        assert_eq!(out.dimensions(), (1000, 1000));
        assert_eq!(engine.pool().dimensions(), (500, 500));
        assert!(region.right() < 1000.0 && region.bottom() < 1000.0);
        // Outside the pasted region the full-resolution input survives untouched.
        assert_eq!(out.get_pixel(999, 999), input.get_pixel(999, 999));
        assert_eq!(out.get_pixel(999, 0), input.get_pixel(999, 0));
    }

    #[test]
    fn test_mirrored_input_gives_mirrored_output() {
        // Smooth, non-wrapping gradient so triangulation differences stay small.
        let input = RgbaImage::from_fn(400, 400, |x, y| Rgba([(x * 255 / 400) as u8, (y * 255 / 400) as u8, 128, 255]));
        let Detection::Face { landmarks, .. } = clmtrackr_detection(None) else {
            unreachable!()
        };
        let mut engine = engine(WarpConfig {
            intensity: 1.0,
            ..WarpConfig::default()
        });

        let (mut expected, _) = engine.process(&input, &Detection::Face { landmarks: landmarks.clone(), score: None });
        frame::mirror_horizontal(&mut expected);

        let mut mirrored = input.clone();
        frame::mirror_horizontal(&mut mirrored);
        let detection = Detection::Face {
            landmarks: landmarks.mirrored(400),
            score: None,
        };
        let (actual, outcome) = engine.process(&mirrored, &detection);
        assert!(outcome.is_warped());

        let total: u64 = actual
            .as_raw()
            .iter()
            .zip(expected.as_raw())
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        let mean = total as f64 / actual.as_raw().len() as f64;
        assert!(mean < 0.5, "mean channel difference {mean}");
    }

    #[test]
    fn test_working_landmarks_scaling() {
        let px = LandmarkSet::new(CoordinateSpace::Pixels, vec![Point::new(100.0, 40.0)]);
        assert_eq!(working_landmarks(&px, (200, 80), (100, 40)).points[0], Point::new(50.0, 20.0));

        let norm = LandmarkSet::new(CoordinateSpace::Normalized, vec![Point::new(0.5, 0.25)]);
        assert_eq!(working_landmarks(&norm, (200, 80), (100, 40)).points[0], Point::new(50.0, 10.0));
    }
}
