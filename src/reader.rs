//! Reading input windows onto the working grid
//!
//! Every input is opened once per job (per participant). For each block the
//! working-grid read window is mapped pixel by pixel into each source's own
//! lattice by nearest neighbour, the smallest covering source window is read
//! per band, and the samples are gathered into a working-grid shaped block.

use log::debug;
use ndarray::Array2;
use std::sync::Arc;

use crate::block::RasterBlock;
use crate::config::InputFiles;
use crate::context::{BlockInputs, SourceEntry};
use crate::error::{Error, Result};
use crate::grid::{GridInfo, WorkingGrid};
use crate::io::{DatasetInfo, RasterDataset, RasterDriver};
use crate::types::PixelRect;

/// One opened input file
pub struct InputSource {
    name: String,
    dataset: Arc<dyn RasterDataset>,
    info: DatasetInfo,
    grid: GridInfo,
}

impl InputSource {
    /// Logical name the file was configured under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset(&self) -> &Arc<dyn RasterDataset> {
        &self.dataset
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    pub fn grid(&self) -> &GridInfo {
        &self.grid
    }

    /// Source column or row covering each working pixel centre, `None` where
    /// the source has no data. `scale` is working/source resolution and
    /// `shift` the origin offset in source pixels.
    fn lattice_map(start: usize, count: usize, scale: f64, shift: f64, len: usize) -> Vec<Option<usize>> {
        (start..start + count)
            .map(|i| {
                let pixel = ((i as f64 + 0.5) * scale + shift).floor();
                (pixel >= 0.0 && pixel < len as f64).then_some(pixel as usize)
            })
            .collect()
    }

    /// Reads every band of this source over a working-grid window
    pub fn read(&self, grid: &WorkingGrid, rect: PixelRect) -> Result<RasterBlock> {
        let bounds = grid.bounds();
        let (x_res, y_res) = grid.resolution();

        let cols = Self::lattice_map(
            rect.x,
            rect.width,
            x_res / self.grid.x_res,
            (bounds.x_min - self.grid.bounds.x_min) / self.grid.x_res,
            self.info.size.width,
        );
        // rows count downwards from the top edge
        let rows = Self::lattice_map(
            rect.y,
            rect.height,
            y_res / self.grid.y_res,
            (self.grid.bounds.y_max - bounds.y_max) / self.grid.y_res,
            self.info.size.height,
        );

        let span = |map: &[Option<usize>]| {
            let mut valid = map.iter().flatten().copied();
            let first = valid.next()?;
            let (lo, hi) = valid.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
            Some((lo, hi - lo + 1))
        };
        let source_rect = match (span(&cols), span(&rows)) {
            (Some((x, width)), Some((y, height))) => Some(PixelRect::new(x, y, width, height)),
            _ => None,
        };

        let mut bands = Vec::with_capacity(self.info.bands);
        for band in 1..=self.info.bands {
            let fill = self.dataset.no_data_value(band)?.unwrap_or(0.0);
            let mut out = Array2::from_elem((rect.height, rect.width), fill);

            if let Some(src_rect) = source_rect {
                let source = self.dataset.read_window(band, src_rect)?;
                for (r, row) in rows.iter().enumerate() {
                    let Some(row) = row else { continue };
                    for (c, col) in cols.iter().enumerate() {
                        if let Some(col) = col {
                            out[[r, c]] = source[[row - src_rect.y, col - src_rect.x]];
                        }
                    }
                }
            }
            bands.push(out);
        }

        RasterBlock::from_bands(self.info.data_type, bands)
            .map_err(|e| Error::raster(self.dataset.path(), e.to_string()))
    }
}

/// All inputs of a job, ordered by logical name then configured position
pub struct InputSet {
    sources: Vec<InputSource>,
}

impl InputSet {
    /// Opens every configured input through `driver`
    pub fn open(driver: &dyn RasterDriver, inputs: &InputFiles) -> Result<Self> {
        let mut sources = Vec::new();
        for (name, paths) in inputs {
            if paths.is_empty() {
                return Err(Error::configuration(format!("input {:?} lists no files", name)));
            }
            for path in paths {
                let dataset = driver.open_for_read(path)?;
                let info = dataset.info();
                let grid = info.grid_info().map_err(|e| {
                    Error::configuration(format!("{}: {}", path.display(), e))
                })?;
                debug!(
                    "Input {} <- {} ({}, {} band(s) of {})",
                    name,
                    path.display(),
                    info.size,
                    info.bands,
                    info.data_type
                );
                sources.push(InputSource {
                    name: name.clone(),
                    dataset,
                    info,
                    grid,
                });
            }
        }

        if sources.is_empty() {
            return Err(Error::configuration("a job needs at least one input file"));
        }
        Ok(Self { sources })
    }

    /// Grid of every input, in the same order as [`InputSet::sources`]
    pub fn grid_infos(&self) -> Vec<GridInfo> {
        self.sources.iter().map(|s| s.grid.clone()).collect()
    }

    pub fn sources(&self) -> &[InputSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Reads one working-grid window from every input.
    ///
    /// Returns the blocks together with the source of each, in delivery
    /// order, for registration with the block context.
    pub fn read_block(
        &self,
        grid: &WorkingGrid,
        rect: PixelRect,
    ) -> Result<(BlockInputs, Vec<(String, SourceEntry)>)> {
        let mut inputs = BlockInputs::new();
        let mut table = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let block = source.read(grid, rect)?;
            inputs.push(source.name.clone(), block);
            table.push((
                source.name.clone(),
                SourceEntry::new(Arc::clone(&source.dataset)),
            ));
        }

        Ok((inputs, table))
    }
}
