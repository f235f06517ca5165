//! Per-block metadata handed to block callbacks
//!
//! A [`BlockContext`] borrows the job-wide state (working grid, block layout,
//! statistics cache) and carries the state of exactly one block: its window,
//! the pixel size actually delivered, its world bounds and the table mapping
//! each delivered input slot back to the dataset it was read from.
//!
//! A fresh context is built for every block and dropped when the callback
//! returns, so the source table never outlives the buffers it describes.

use log::info;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::block::RasterBlock;
use crate::cache::{BandStatistics, StatisticsCache, StatsKey};
use crate::error::{Error, Result};
use crate::grid::{Coordinate, GeoTransform, WorkingGrid};
use crate::io::RasterDataset;
use crate::layout::{BlockIndex, BlockLayout, BlockWindow};
use crate::types::Dimensions;

/// Band used when a caller has no reason to pick another
pub const DEFAULT_BAND: usize = 1;

/// Position of one delivered input buffer: the logical input name and the
/// index of the file within that name's list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSlot<'a> {
    pub name: &'a str,
    pub index: usize,
}

impl<'a> InputSlot<'a> {
    pub fn new(name: &'a str, index: usize) -> Self {
        Self { name, index }
    }
}

impl fmt::Display for InputSlot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.index)
    }
}

/// The dataset an input buffer was read from
#[derive(Clone)]
pub struct SourceEntry {
    pub dataset: Arc<dyn RasterDataset>,
    pub filename: PathBuf,
}

impl SourceEntry {
    pub fn new(dataset: Arc<dyn RasterDataset>) -> Self {
        let filename = dataset.path().to_path_buf();
        Self { dataset, filename }
    }
}

impl fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceEntry")
            .field("filename", &self.filename)
            .finish()
    }
}

/// Input buffers of one block, grouped by logical input name. Each name maps
/// to one block per file, in the order the files were configured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockInputs {
    blocks: BTreeMap<String, Vec<RasterBlock>>,
}

impl BlockInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a block under `name`, returning its slot index
    pub fn push(&mut self, name: impl Into<String>, block: RasterBlock) -> usize {
        let list = self.blocks.entry(name.into()).or_default();
        list.push(block);
        list.len() - 1
    }

    /// Every block delivered for `name`
    pub fn get(&self, name: &str) -> Option<&[RasterBlock]> {
        self.blocks.get(name).map(Vec::as_slice)
    }

    /// The block in one slot
    pub fn block(&self, slot: InputSlot<'_>) -> Option<&RasterBlock> {
        self.blocks.get(slot.name).and_then(|list| list.get(slot.index))
    }

    /// Logical input names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    /// Every (slot, block) pair, names sorted, files in configured order
    pub fn slots(&self) -> impl Iterator<Item = (InputSlot<'_>, &RasterBlock)> {
        self.blocks.iter().flat_map(|(name, list)| {
            list.iter()
                .enumerate()
                .map(move |(index, block)| (InputSlot::new(name, index), block))
        })
    }

    /// Total number of blocks across all names
    pub fn len(&self) -> usize {
        self.blocks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output buffers produced by a callback, keyed by logical output name.
///
/// Starts empty with the list of names the job expects; the callback fills
/// in one block per expected name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockOutputs {
    expected: Vec<String>,
    blocks: BTreeMap<String, RasterBlock>,
}

impl BlockOutputs {
    /// Empty outputs expecting the given names
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: names.into_iter().map(Into::into).collect(),
            blocks: BTreeMap::new(),
        }
    }

    /// Names the job will write
    pub fn expected_names(&self) -> &[String] {
        &self.expected
    }

    /// Stores the result for `name`, replacing any earlier one
    pub fn insert(&mut self, name: impl Into<String>, block: RasterBlock) {
        self.blocks.insert(name.into(), block);
    }

    pub fn get(&self, name: &str) -> Option<&RasterBlock> {
        self.blocks.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RasterBlock> {
        self.blocks.remove(name)
    }

    /// Names that were produced
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockState {
    window: BlockWindow,
    size: Dimensions,
    top_left: Coordinate,
    bottom_right: Coordinate,
}

/// Block metadata for one callback invocation
pub struct BlockContext<'a> {
    grid: &'a WorkingGrid,
    layout: &'a BlockLayout,
    cache: &'a StatisticsCache,
    block: Option<BlockState>,
    sources: HashMap<String, Vec<SourceEntry>>,
}

impl<'a> BlockContext<'a> {
    /// Creates a context not yet specialized for any block
    pub fn new(grid: &'a WorkingGrid, layout: &'a BlockLayout, cache: &'a StatisticsCache) -> Self {
        Self {
            grid,
            layout,
            cache,
            block: None,
            sources: HashMap::new(),
        }
    }

    /// Binds the context to one block. Size, world bounds and indices are
    /// all set here together.
    pub fn specialize(&mut self, window: BlockWindow) {
        let transform = self.grid.transform();
        let read = window.read;
        self.block = Some(BlockState {
            window,
            size: window.nominal.dimensions(),
            top_left: transform.pixel_to_world(read.x as f64, read.y as f64),
            bottom_right: transform.pixel_to_world(read.x_end() as f64, read.y_end() as f64),
        });
        self.sources.clear();
    }

    /// Records the dataset behind the next input buffer delivered for `name`
    pub fn register_source(&mut self, name: impl Into<String>, entry: SourceEntry) {
        self.sources.entry(name.into()).or_default().push(entry);
    }

    fn state(&self) -> Result<&BlockState> {
        self.block.as_ref().ok_or_else(|| {
            Error::invalid_state("block context queried before it was bound to a block")
        })
    }

    /// Nominal window size, constant for the job
    pub fn window_size(&self) -> Dimensions {
        self.layout.window_size()
    }

    /// Pixels added on each side of the nominal window
    pub fn overlap_size(&self) -> usize {
        self.layout.overlap()
    }

    /// Size of the whole working grid in pixels
    pub fn total_size(&self) -> Dimensions {
        self.layout.total_size()
    }

    /// Number of blocks along each axis
    pub fn total_blocks(&self) -> Dimensions {
        self.layout.total_blocks()
    }

    pub fn transform(&self) -> GeoTransform {
        self.grid.transform()
    }

    pub fn projection(&self) -> &str {
        self.grid.projection()
    }

    /// Pixel size (x, y) in world units
    pub fn pixel_size(&self) -> (f64, f64) {
        self.grid.resolution()
    }

    /// Pixel size of the current block without overlap. Equal to the
    /// window size except at the right and bottom edges.
    pub fn block_size(&self) -> Result<Dimensions> {
        Ok(self.state()?.size)
    }

    /// Pixel size of the buffers delivered for the current block, overlap
    /// included. Callback outputs must have this size.
    pub fn read_size(&self) -> Result<Dimensions> {
        Ok(self.state()?.window.read.dimensions())
    }

    /// Overrides the delivered block size
    pub fn set_block_size(&mut self, size: Dimensions) -> Result<()> {
        match self.block.as_mut() {
            Some(state) => {
                state.size = size;
                Ok(())
            }
            None => Err(Error::invalid_state(
                "cannot set the block size before the context is bound to a block",
            )),
        }
    }

    /// World coordinates of the top-left and bottom-right corners of the
    /// current block, overlap included
    pub fn block_bounds(&self) -> Result<(Coordinate, Coordinate)> {
        let state = self.state()?;
        Ok((state.top_left, state.bottom_right))
    }

    /// Zero-based (xblock, yblock) of the current block
    pub fn block_count(&self) -> Result<BlockIndex> {
        Ok(self.state()?.window.index)
    }

    /// Geometry of the current block
    pub fn block_window(&self) -> Result<BlockWindow> {
        Ok(self.state()?.window)
    }

    /// Converts a pixel offset within the current block to (column, row) in
    /// the full image
    pub fn pixel_to_image_coord(&self, x: usize, y: usize) -> Result<(usize, usize)> {
        let index = self.block_count()?;
        let window = self.window_size();
        Ok((
            index.xblock * window.width + x,
            index.yblock * window.height + y,
        ))
    }

    /// World coordinate of a pixel offset within the current block
    pub fn pixel_to_world(&self, x: usize, y: usize) -> Result<Coordinate> {
        let (col, row) = self.pixel_to_image_coord(x, y)?;
        Ok(self.grid.transform().pixel_to_world(col as f64, row as f64))
    }

    /// True for block (0, 0)
    pub fn is_first_block(&self) -> Result<bool> {
        let index = self.block_count()?;
        Ok(index.xblock == 0 && index.yblock == 0)
    }

    /// True for the last block in row-major order
    pub fn is_last_block(&self) -> Result<bool> {
        let index = self.block_count()?;
        let total = self.total_blocks();
        Ok(index.xblock + 1 == total.width && index.yblock + 1 == total.height)
    }

    /// Percentage of blocks preceding the current one in row-major order,
    /// truncated
    pub fn percent_complete(&self) -> Result<u32> {
        let index = self.block_count()?;
        let total = self.total_blocks();
        let visited = index.yblock * total.width + index.xblock;
        Ok((100 * visited / total.pixel_count()) as u32)
    }

    /// Dataset and filename an input buffer was read from
    pub fn source_of(&self, slot: InputSlot<'_>) -> Result<&SourceEntry> {
        self.sources
            .get(slot.name)
            .and_then(|list| list.get(slot.index))
            .ok_or_else(|| {
                Error::lookup(format!(
                    "input {} was not delivered for the current block",
                    slot
                ))
            })
    }

    pub fn filename_for(&self, slot: InputSlot<'_>) -> Result<&Path> {
        Ok(self.source_of(slot)?.filename.as_path())
    }

    pub fn dataset_for(&self, slot: InputSlot<'_>) -> Result<&Arc<dyn RasterDataset>> {
        Ok(&self.source_of(slot)?.dataset)
    }

    /// No-data value of a band of the slot's source dataset
    pub fn no_data_value_for(&self, slot: InputSlot<'_>, band: usize) -> Result<Option<f64>> {
        self.source_of(slot)?.dataset.no_data_value(band)
    }

    /// Whole-band statistics of the slot's source, served from the cache
    /// when possible.
    ///
    /// On a miss with `ignore` set, that value becomes the band's no-data
    /// value on the source dataset before statistics are computed, and stays
    /// so afterwards.
    pub fn global_statistics(
        &self,
        slot: InputSlot<'_>,
        band: usize,
        ignore: Option<f64>,
    ) -> Result<BandStatistics> {
        let source = self.source_of(slot)?;
        let key = StatsKey::new(&source.filename, band, ignore);

        self.cache.get_or_insert_with(key, |key| {
            if let Some(value) = ignore {
                source.dataset.set_no_data_value(band, Some(value))?;
            }
            info!(
                "Calculating global statistics for {} band {}...",
                key.filename().display(),
                band
            );
            source.dataset.compute_statistics(band, true)
        })
    }

    pub fn global_min(&self, slot: InputSlot<'_>, band: usize, ignore: Option<f64>) -> Result<f64> {
        Ok(self.global_statistics(slot, band, ignore)?.min)
    }

    pub fn global_max(&self, slot: InputSlot<'_>, band: usize, ignore: Option<f64>) -> Result<f64> {
        Ok(self.global_statistics(slot, band, ignore)?.max)
    }

    pub fn global_mean(&self, slot: InputSlot<'_>, band: usize, ignore: Option<f64>) -> Result<f64> {
        Ok(self.global_statistics(slot, band, ignore)?.mean)
    }

    pub fn global_stddev(&self, slot: InputSlot<'_>, band: usize, ignore: Option<f64>) -> Result<f64> {
        Ok(self.global_statistics(slot, band, ignore)?.stddev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Bounds;
    use crate::io::{MemoryDataset, MemoryDriver, RasterDriver};
    use crate::types::DataType;
    use ndarray::Array2;

    struct Fixture {
        grid: WorkingGrid,
        layout: BlockLayout,
        cache: StatisticsCache,
        driver: MemoryDriver,
    }

    fn fixture(window: usize, overlap: usize) -> Fixture {
        let grid = WorkingGrid::new(Bounds::new(0.0, 10.0, 0.0, 10.0), 1.0, 1.0, "local").unwrap();
        let layout = BlockLayout::new(grid.size(), Dimensions::new(window, window), overlap).unwrap();
        let driver = MemoryDriver::new();
        driver.insert(
            MemoryDataset::from_bands(
                "ramp.mem",
                DataType::U8,
                grid.transform(),
                "local",
                vec![Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f64)],
            )
            .unwrap(),
        );
        Fixture {
            grid,
            layout,
            cache: StatisticsCache::new(),
            driver,
        }
    }

    fn bound<'a>(f: &'a Fixture, x: usize, y: usize) -> BlockContext<'a> {
        let mut ctx = BlockContext::new(&f.grid, &f.layout, &f.cache);
        ctx.specialize(f.layout.window(BlockIndex::new(x, y)).unwrap());
        let dataset = f.driver.open_for_read(Path::new("ramp.mem")).unwrap();
        ctx.register_source("image", SourceEntry::new(dataset));
        ctx
    }

    #[test]
    fn test_unbound_context_fails_fast() {
        let f = fixture(4, 0);
        let mut ctx = BlockContext::new(&f.grid, &f.layout, &f.cache);

        assert_eq!(ctx.window_size(), Dimensions::new(4, 4));
        assert_eq!(ctx.total_blocks(), Dimensions::new(3, 3));
        assert!(matches!(ctx.block_size(), Err(Error::InvalidState(_))));
        assert!(matches!(ctx.block_bounds(), Err(Error::InvalidState(_))));
        assert!(matches!(ctx.percent_complete(), Err(Error::InvalidState(_))));
        assert!(matches!(ctx.set_block_size(Dimensions::new(1, 1)), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_first_and_last_block() {
        let f = fixture(4, 0);
        let mut firsts = 0;
        let mut lasts = 0;
        let mut previous = 0;

        for index in f.layout.iter() {
            let ctx = bound(&f, index.xblock, index.yblock);
            if ctx.is_first_block().unwrap() {
                firsts += 1;
                assert_eq!(ctx.percent_complete().unwrap(), 0);
            }
            if ctx.is_last_block().unwrap() {
                lasts += 1;
                assert_eq!(index, BlockIndex::new(2, 2));
            }
            let percent = ctx.percent_complete().unwrap();
            assert!(percent >= previous);
            previous = percent;
        }

        assert_eq!((firsts, lasts), (1, 1));
        // 8 of 9 blocks precede the last one
        assert_eq!(previous, 88);
    }

    #[test]
    fn test_edge_block_size_and_bounds() {
        let f = fixture(4, 1);
        let ctx = bound(&f, 2, 0);

        // nominal 8..10, read 7..10 with overlap
        assert_eq!(ctx.block_size().unwrap(), Dimensions::new(2, 4));
        assert_eq!(ctx.read_size().unwrap(), Dimensions::new(3, 5));
        let (top_left, bottom_right) = ctx.block_bounds().unwrap();
        assert_eq!(top_left, Coordinate::new(7.0, 10.0));
        assert_eq!(bottom_right, Coordinate::new(10.0, 5.0));
    }

    #[test]
    fn test_interior_block_size_excludes_overlap() {
        let f = fixture(4, 1);
        let ctx = bound(&f, 1, 1);

        assert_eq!(ctx.block_size().unwrap(), ctx.window_size());
        assert_eq!(ctx.read_size().unwrap(), Dimensions::new(6, 6));
        let (top_left, bottom_right) = ctx.block_bounds().unwrap();
        assert_eq!(top_left, Coordinate::new(3.0, 7.0));
        assert_eq!(bottom_right, Coordinate::new(9.0, 1.0));
    }

    #[test]
    fn test_pixel_to_image_coord_round_trip() {
        let f = fixture(4, 0);
        let ctx = bound(&f, 1, 2);
        let transform = ctx.transform();

        for y in 0..2 {
            for x in 0..4 {
                let (col, row) = ctx.pixel_to_image_coord(x, y).unwrap();
                assert_eq!((col, row), (4 + x, 8 + y));
                let world = ctx.pixel_to_world(x, y).unwrap();
                let (c, r) = transform.world_to_pixel(world).unwrap();
                assert!((c - col as f64).abs() < 1e-9);
                assert!((r - row as f64).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_source_lookup() {
        let f = fixture(4, 0);
        let ctx = bound(&f, 0, 0);

        assert_eq!(ctx.filename_for(InputSlot::new("image", 0)).unwrap(), Path::new("ramp.mem"));
        assert_eq!(ctx.no_data_value_for(InputSlot::new("image", 0), DEFAULT_BAND).unwrap(), None);
        assert!(matches!(ctx.source_of(InputSlot::new("image", 1)), Err(Error::Lookup(_))));
        assert!(matches!(ctx.source_of(InputSlot::new("other", 0)), Err(Error::Lookup(_))));
    }

    #[test]
    fn test_statistics_cache_hit_skips_collaborator() {
        let f = fixture(4, 0);
        let dataset = f.driver.dataset("ramp.mem").unwrap();
        let slot = InputSlot::new("image", 0);

        for index in f.layout.iter() {
            let ctx = bound(&f, index.xblock, index.yblock);
            assert_eq!(ctx.global_max(slot, DEFAULT_BAND, None).unwrap(), 99.0);
            assert_eq!(ctx.global_mean(slot, DEFAULT_BAND, None).unwrap(), 49.5);
        }
        assert_eq!(dataset.statistics_calls(), 1);
        assert_eq!(f.cache.len(), 1);
    }

    #[test]
    fn test_ignore_override_applies_to_source() {
        let f = fixture(4, 0);
        let dataset = f.driver.dataset("ramp.mem").unwrap();
        let ctx = bound(&f, 0, 0);
        let slot = InputSlot::new("image", 0);

        let stats = ctx.global_statistics(slot, DEFAULT_BAND, Some(0.0)).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(ctx.no_data_value_for(slot, DEFAULT_BAND).unwrap(), Some(0.0));

        // a different override is a different key
        assert_eq!(ctx.global_min(slot, DEFAULT_BAND, None).unwrap(), 1.0);
        assert_eq!(dataset.statistics_calls(), 2);
    }

    #[test]
    fn test_block_inputs_slots() {
        let mut inputs = BlockInputs::new();
        let block = RasterBlock::filled(DataType::U8, 1, Dimensions::new(2, 2), 1.0);
        assert_eq!(inputs.push("b", block.clone()), 0);
        assert_eq!(inputs.push("a", block.clone()), 0);
        assert_eq!(inputs.push("b", block), 1);

        let slots: Vec<_> = inputs.slots().map(|(slot, _)| slot.to_string()).collect();
        assert_eq!(slots, vec!["a[0]", "b[0]", "b[1]"]);
        assert_eq!(inputs.len(), 3);
        assert!(inputs.block(InputSlot::new("b", 1)).is_some());
        assert!(inputs.block(InputSlot::new("b", 2)).is_none());
    }
}
