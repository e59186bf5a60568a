//! Per-frame scratch buffers, sized once and reused.

use crate::grid::Grid;
use crate::mask::FeatherMask;
use image::RgbaImage;

/// Scratch storage for one working resolution.
///
/// Frames are processed one at a time, so a single set of buffers serves
/// every frame. The patch scratch is reallocated only when the working size
/// changes. Each patch slot keeps its own mask, reallocated only when that
/// patch's size changes. The downscaled working copy is rebuilt by
/// `imageops::resize` on every downscaled frame.
#[derive(Debug)]
pub struct BufferPool {
    width: u32,
    height: u32,
    /// Transparent full-frame patch buffer. Kept all-zero between patches.
    pub(crate) scratch: RgbaImage,
    /// One feather mask per patch slot.
    masks: Vec<FeatherMask>,
    pub(crate) grid: Grid,
    /// Downscaled source frame (only used when `source_scale < 1`).
    pub(crate) work: RgbaImage,
    /// Downscaled render target (only used when `source_scale < 1`).
    pub(crate) canvas: RgbaImage,
    reallocations: usize,
}

impl BufferPool {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scratch: RgbaImage::new(width, height),
            masks: Vec::new(),
            grid: Grid::default(),
            work: RgbaImage::new(0, 0),
            canvas: RgbaImage::new(0, 0),
            reallocations: 0,
        }
    }

    /// Resize for a new working resolution. Returns `true` if buffers were reallocated.
    pub fn ensure(&mut self, width: u32, height: u32) -> bool {
        if (self.width, self.height) == (width, height) {
            return false;
        }
        tracing::info!(
            from_width = self.width,
            from_height = self.height,
            width,
            height,
            "resizing frame buffer pool"
        );
        self.width = width;
        self.height = height;
        self.scratch = RgbaImage::new(width, height);
        self.reallocations += 1;
        true
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Patch scratch plus the mask kept for patch `slot`, growing the slot list on demand.
    pub(crate) fn patch_buffers(&mut self, slot: usize) -> (&mut RgbaImage, &mut FeatherMask) {
        if self.masks.len() <= slot {
            self.masks.resize_with(slot + 1, FeatherMask::default);
        }
        (&mut self.scratch, &mut self.masks[slot])
    }

    /// How many times the pool had to grow or shrink since creation.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }
}
