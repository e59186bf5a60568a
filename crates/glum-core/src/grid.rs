//! Uniform triangle grid over the warped region.
//!
//! Vertices are stored row-major, `(cols + 1) × (rows + 1)`. Each cell
//! `a b / c d` splits along the `a–d` diagonal into `(a, b, d)` and
//! `(a, d, c)`, so every interior edge is shared by exactly two triangles
//! that index the same vertex pair.

use crate::field::DisplacementField;
use crate::types::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Grid resolution in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridResolution {
    pub cols: usize,
    pub rows: usize,
}

impl Default for GridResolution {
    fn default() -> Self {
        Self { cols: 24, rows: 24 }
    }
}

/// Three vertex indices into a [`Grid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle(pub [usize; 3]);

/// Source and displaced-destination vertex positions for one frame.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    cols: usize,
    rows: usize,
    sources: Vec<Point>,
    dests: Vec<Point>,
}

impl Grid {
    /// Lay the grid over `rect` and push every vertex through `field`.
    pub fn tessellate(rect: Rect, resolution: GridResolution, field: &DisplacementField) -> Self {
        let mut grid = Grid::default();
        grid.rebuild(rect, resolution, |p| field.eval(p));
        grid
    }

    /// A single cell whose corners move independently (patch warps).
    ///
    /// Corners are ordered top-left, top-right, bottom-right, bottom-left.
    pub fn from_quad(src: [Point; 4], dst: [Point; 4]) -> Self {
        // Row-major vertex order is TL, TR, BL, BR.
        Self {
            cols: 1,
            rows: 1,
            sources: vec![src[0], src[1], src[3], src[2]],
            dests: vec![dst[0], dst[1], dst[3], dst[2]],
        }
    }

    /// Refill in place, reusing the vertex buffers.
    pub fn rebuild(&mut self, rect: Rect, resolution: GridResolution, mut map: impl FnMut(Point) -> Point) {
        let cols = resolution.cols.max(1);
        let rows = resolution.rows.max(1);
        self.cols = cols;
        self.rows = rows;
        self.sources.clear();
        self.dests.clear();
        let n = (cols + 1) * (rows + 1);
        self.sources.reserve(n);
        self.dests.reserve(n);

        let step_x = rect.width / cols as f64;
        let step_y = rect.height / rows as f64;
        for j in 0..=rows {
            // Pin the last row/column to the exact rectangle edge.
            let y = if j == rows { rect.bottom() } else { rect.y + j as f64 * step_y };
            for i in 0..=cols {
                let x = if i == cols { rect.right() } else { rect.x + i as f64 * step_x };
                let p = Point::new(x, y);
                self.sources.push(p);
                self.dests.push(map(p));
            }
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn vertex_count(&self) -> usize {
        self.sources.len()
    }

    pub fn index(&self, i: usize, j: usize) -> usize {
        j * (self.cols + 1) + i
    }

    pub fn source(&self, idx: usize) -> Point {
        self.sources[idx]
    }

    pub fn dest(&self, idx: usize) -> Point {
        self.dests[idx]
    }

    pub fn triangle_count(&self) -> usize {
        2 * self.cols * self.rows
    }

    /// Both triangles of every cell, row by row.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        (0..self.rows).flat_map(move |j| {
            (0..self.cols).flat_map(move |i| {
                let a = self.index(i, j);
                let b = self.index(i + 1, j);
                let c = self.index(i, j + 1);
                let d = self.index(i + 1, j + 1);
                [Triangle([a, b, d]), Triangle([a, d, c])]
            })
        })
    }

    pub fn source_triangle(&self, t: Triangle) -> [Point; 3] {
        t.0.map(|i| self.sources[i])
    }

    pub fn dest_triangle(&self, t: Triangle) -> [Point; 3] {
        t.0.map(|i| self.dests[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::FaceRole;
    use crate::types::ControlPoint;
    use std::collections::HashMap;

    fn single_control_field() -> DisplacementField {
        let controls = vec![ControlPoint {
            role: FaceRole::UpperLipTop,
            source: Point::new(50.0, 50.0),
            target: Point::new(60.0, 50.0),
        }];
        DisplacementField::build(&controls, 20.0)
    }

    #[test]
    fn test_single_cell_corners() {
        let rect = Rect::new(0.0, 0.0, 100.0, 100.0);
        let grid = Grid::tessellate(rect, GridResolution { cols: 1, rows: 1 }, &single_control_field());
        assert_eq!(grid.vertex_count(), 4);
        assert_eq!(grid.triangle_count(), 2);

        let shift = 10.0 * (-6.25f64).exp();
        let tl = grid.dest(grid.index(0, 0));
        let br = grid.dest(grid.index(1, 1));
        assert!((tl.x - shift).abs() < 1e-12 && tl.y == 0.0, "tl = {tl:?}");
        assert!((br.x - (100.0 + shift)).abs() < 1e-12 && br.y == 100.0, "br = {br:?}");

        let tris: Vec<_> = grid.triangles().collect();
        assert_eq!(tris, vec![Triangle([0, 1, 3]), Triangle([0, 3, 2])]);
    }

    #[test]
    fn test_vertices_span_rect_evenly() {
        let rect = Rect::new(10.0, 20.0, 30.0, 60.0);
        let grid = Grid::tessellate(rect, GridResolution { cols: 3, rows: 4 }, &single_control_field());
        assert_eq!(grid.vertex_count(), 4 * 5);
        assert_eq!(grid.source(grid.index(0, 0)), Point::new(10.0, 20.0));
        assert_eq!(grid.source(grid.index(3, 4)), Point::new(40.0, 80.0));
        assert_eq!(grid.source(grid.index(1, 2)), Point::new(20.0, 50.0));
    }

    #[test]
    fn test_shared_edges_have_identical_vertices() {
        let rect = Rect::new(0.0, 0.0, 120.0, 90.0);
        let grid = Grid::tessellate(rect, GridResolution { cols: 6, rows: 5 }, &single_control_field());

        // Every undirected edge appears in one or two triangles; interior edges in two.
        let mut edges: HashMap<(usize, usize), Vec<(Point, Point)>> = HashMap::new();
        for t in grid.triangles() {
            let [a, b, c] = t.0;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let key = (u.min(v), u.max(v));
                edges
                    .entry(key)
                    .or_default()
                    .push((grid.dest(key.0), grid.dest(key.1)));
            }
        }
        let shared = edges.values().filter(|v| v.len() == 2).count();
        assert!(shared > 0);
        for uses in edges.values() {
            assert!(uses.len() <= 2);
            assert!(uses.iter().all(|e| *e == uses[0]));
        }
    }

    #[test]
    fn test_consistent_winding() {
        let rect = Rect::new(0.0, 0.0, 50.0, 50.0);
        let grid = Grid::tessellate(rect, GridResolution { cols: 4, rows: 4 }, &single_control_field());
        for t in grid.triangles() {
            let [p, q, r] = grid.source_triangle(t);
            let cross = (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x);
            assert!(cross > 0.0, "triangle {t:?} flipped");
        }
    }

    #[test]
    fn test_from_quad_order() {
        let src = Rect::new(0.0, 0.0, 10.0, 10.0).corners();
        let dst = src.map(|p| Point::new(p.x, p.y + 2.0));
        let grid = Grid::from_quad(src, dst);
        let tris: Vec<_> = grid.triangles().collect();
        // (TL, TR, BR) and (TL, BR, BL).
        assert_eq!(grid.source_triangle(tris[0]), [src[0], src[1], src[2]]);
        assert_eq!(grid.source_triangle(tris[1]), [src[0], src[2], src[3]]);
        assert_eq!(grid.dest_triangle(tris[1]), [dst[0], dst[2], dst[3]]);
    }
}
