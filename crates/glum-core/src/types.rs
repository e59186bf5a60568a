use crate::landmarks::FaceRole;
use serde::{Deserialize, Serialize};

/// A 2-D position in image space (pixels unless stated otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn distance_sq(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f64> for Point {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned rectangle: origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Tight bounding box of a point set. `None` for an empty set.
    pub fn bounding(points: &[Point]) -> Option<Rect> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Rectangle of the given size centred on `center`.
    pub fn centered(center: Point, width: f64, height: f64) -> Rect {
        Rect::new(center.x - width / 2.0, center.y - height / 2.0, width, height)
    }

    /// Grow by `pad` pixels on every side.
    pub fn inflate(&self, pad: f64) -> Rect {
        Rect::new(
            self.x - pad,
            self.y - pad,
            self.width + 2.0 * pad,
            self.height + 2.0 * pad,
        )
    }

    /// Grow by `fraction` of the rectangle's own width/height on every side.
    pub fn pad_fraction(&self, fraction: f64) -> Rect {
        let px = self.width * fraction;
        let py = self.height * fraction;
        Rect::new(
            self.x - px,
            self.y - py,
            self.width + 2.0 * px,
            self.height + 2.0 * py,
        )
    }

    /// Intersect with the frame `[0, width] × [0, height]`.
    pub fn clamp_to(&self, width: f64, height: f64) -> Rect {
        let x0 = self.x.max(0.0);
        let y0 = self.y.max(0.0);
        let x1 = (self.x + self.width).min(width);
        let y1 = (self.y + self.height).min(height);
        Rect::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Snap outward to whole pixels, then clip to the frame.
    pub fn snap_out(&self, width: u32, height: u32) -> Rect {
        let x0 = self.x.floor();
        let y0 = self.y.floor();
        let x1 = self.right().ceil();
        let y1 = self.bottom().ceil();
        Rect::new(x0, y0, x1 - x0, y1 - y0).clamp_to(width as f64, height as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Corners in order: top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }
}

/// A labeled landmark with its current and displaced position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    pub role: FaceRole,
    pub source: Point,
    pub target: Point,
}

impl ControlPoint {
    pub fn delta(&self) -> Point {
        self.target - self.source
    }
}

/// Coordinate space of a landmark array as delivered by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// `[0, 1]` relative to frame width/height.
    #[default]
    Normalized,
    Pixels,
}

/// One frame's landmark array, indexed by the detector's own numbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    #[serde(default)]
    pub space: CoordinateSpace,
    pub points: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(space: CoordinateSpace, points: Vec<Point>) -> Self {
        Self { space, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Pixel-space copy for a frame of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> LandmarkSet {
        let points = match self.space {
            CoordinateSpace::Pixels => self.points.clone(),
            CoordinateSpace::Normalized => self
                .points
                .iter()
                .map(|p| Point::new(p.x * width as f64, p.y * height as f64))
                .collect(),
        };
        LandmarkSet::new(CoordinateSpace::Pixels, points)
    }

    /// Mirror horizontally, matching a frame flipped with `frame::mirror_horizontal`.
    pub fn mirrored(&self, width: u32) -> LandmarkSet {
        let span = match self.space {
            CoordinateSpace::Pixels => width as f64,
            CoordinateSpace::Normalized => 1.0,
        };
        let points = self
            .points
            .iter()
            .map(|p| Point::new(span - p.x, p.y))
            .collect();
        LandmarkSet::new(self.space, points)
    }
}

/// Per-frame result of the external face detector.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Detection {
    #[default]
    NoFace,
    Face {
        landmarks: LandmarkSet,
        /// Optional expression score used by threshold triggering.
        score: Option<f32>,
    },
}

#[derive(Deserialize)]
struct DetectionFile {
    #[serde(default)]
    space: CoordinateSpace,
    #[serde(default)]
    points: Vec<Point>,
    score: Option<f32>,
}

impl Detection {
    /// Parse a detector dump: `null`, or `{"space", "points", "score"}`.
    /// An empty point list is treated as "no face".
    pub fn from_json(json: &str) -> Result<Detection, serde_json::Error> {
        let parsed: Option<DetectionFile> = serde_json::from_str(json)?;
        Ok(match parsed {
            Some(file) if !file.points.is_empty() => Detection::Face {
                landmarks: LandmarkSet::new(file.space, file.points),
                score: file.score,
            },
            _ => Detection::NoFace,
        })
    }
}
