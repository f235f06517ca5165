//! Block enumeration over the working grid

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{Dimensions, PixelRect};

/// Zero-based position of a block in the block grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockIndex {
    pub xblock: usize,
    pub yblock: usize,
}

impl BlockIndex {
    pub fn new(xblock: usize, yblock: usize) -> Self {
        Self { xblock, yblock }
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.xblock, self.yblock)
    }
}

/// Geometry of one block: the region it owns and the region it reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub index: BlockIndex,
    /// Region this block writes to the outputs
    pub nominal: PixelRect,
    /// Region read from the inputs, nominal plus overlap clipped to the grid
    pub read: PixelRect,
    pub pad_left: usize,
    pub pad_top: usize,
    pub pad_right: usize,
    pub pad_bottom: usize,
}

/// Splits a grid into fixed-size windows visited in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    total: Dimensions,
    window: Dimensions,
    overlap: usize,
    blocks: Dimensions,
}

impl BlockLayout {
    /// Creates a layout, rejecting empty windows and overlap >= window
    pub fn new(total: Dimensions, window: Dimensions, overlap: usize) -> Result<Self> {
        if window.width == 0 || window.height == 0 {
            return Err(Error::configuration(format!(
                "window size must be positive, got {}",
                window
            )));
        }
        if overlap >= window.width || overlap >= window.height {
            return Err(Error::configuration(format!(
                "overlap {} must be smaller than the window size {}",
                overlap, window
            )));
        }
        if total.width == 0 || total.height == 0 {
            return Err(Error::configuration(format!("empty grid {}", total)));
        }

        let blocks = Dimensions::new(
            total.width.div_ceil(window.width),
            total.height.div_ceil(window.height),
        );

        debug!(
            "BlockLayout: {} grid, window {}, overlap {} -> {} blocks ({} total)",
            total,
            window,
            overlap,
            blocks,
            blocks.pixel_count()
        );

        Ok(Self {
            total,
            window,
            overlap,
            blocks,
        })
    }

    /// Total grid size in pixels
    pub fn total_size(&self) -> Dimensions {
        self.total
    }

    /// Nominal window size
    pub fn window_size(&self) -> Dimensions {
        self.window
    }

    /// Overlap added on every side of a window
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Number of blocks along each axis
    pub fn total_blocks(&self) -> Dimensions {
        self.blocks
    }

    /// Number of blocks in the whole grid
    pub fn block_count(&self) -> usize {
        self.blocks.pixel_count()
    }

    /// Row-major position of a block
    pub fn linear_index(&self, index: BlockIndex) -> usize {
        index.yblock * self.blocks.width + index.xblock
    }

    /// Block at a row-major position
    pub fn index_at(&self, linear: usize) -> Option<BlockIndex> {
        if linear >= self.block_count() {
            return None;
        }
        Some(BlockIndex::new(
            linear % self.blocks.width,
            linear / self.blocks.width,
        ))
    }

    /// Every block in row-major order: all x for y = 0, then y = 1, ...
    pub fn iter(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        (0..self.block_count()).filter_map(move |linear| self.index_at(linear))
    }

    /// Geometry of one block
    pub fn window(&self, index: BlockIndex) -> Result<BlockWindow> {
        if index.xblock >= self.blocks.width || index.yblock >= self.blocks.height {
            return Err(Error::invalid_state(format!(
                "block {} outside the {} block grid",
                index, self.blocks
            )));
        }

        let x_min = index.xblock * self.window.width;
        let y_min = index.yblock * self.window.height;
        let x_max = (x_min + self.window.width).min(self.total.width);
        let y_max = (y_min + self.window.height).min(self.total.height);

        let read_x_min = x_min.saturating_sub(self.overlap);
        let read_y_min = y_min.saturating_sub(self.overlap);
        let read_x_max = (x_max + self.overlap).min(self.total.width);
        let read_y_max = (y_max + self.overlap).min(self.total.height);

        Ok(BlockWindow {
            index,
            nominal: PixelRect::new(x_min, y_min, x_max - x_min, y_max - y_min),
            read: PixelRect::new(
                read_x_min,
                read_y_min,
                read_x_max - read_x_min,
                read_y_max - read_y_min,
            ),
            pad_left: x_min - read_x_min,
            pad_top: y_min - read_y_min,
            pad_right: read_x_max - x_max,
            pad_bottom: read_y_max - y_max,
        })
    }
}
