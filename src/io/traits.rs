//! Raster I/O collaborator traits
//!
//! The block engine never decodes pixels itself. Everything it needs from a
//! raster library goes through [`RasterDriver`] (opening and creating files)
//! and [`RasterDataset`] (window reads/writes, no-data values, statistics).
//! Bands are numbered from 1.

use ndarray::{Array2, ArrayView2};
use std::path::Path;
use std::sync::Arc;

use crate::cache::BandStatistics;
use crate::error::Result;
use crate::grid::{GeoTransform, GridInfo, WorkingGrid};
use crate::types::{DataType, Dimensions, PixelRect};

/// Static description of an open dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub size: Dimensions,
    pub bands: usize,
    pub data_type: DataType,
    pub transform: GeoTransform,
    pub projection: String,
}

impl DatasetInfo {
    /// The dataset's grid, for working-grid reconciliation
    pub fn grid_info(&self) -> Result<GridInfo> {
        GridInfo::from_transform(&self.transform, self.size, &self.projection)
    }
}

/// Everything needed to create an output dataset
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOptions {
    pub size: Dimensions,
    pub bands: usize,
    pub data_type: DataType,
    pub transform: GeoTransform,
    pub projection: String,
    pub no_data: Option<f64>,
}

impl CreateOptions {
    /// Options for a dataset covering `grid`
    pub fn for_grid(grid: &WorkingGrid, bands: usize, data_type: DataType) -> Self {
        Self {
            size: grid.size(),
            bands,
            data_type,
            transform: grid.transform(),
            projection: grid.projection().to_string(),
            no_data: None,
        }
    }

    /// Sets the no-data value written to every band
    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = no_data;
        self
    }
}

/// An open raster dataset.
///
/// Handles are shared between worker threads, so implementations guard any
/// mutable state internally. Calls may be slow and may fail.
pub trait RasterDataset: Send + Sync {
    /// Path the dataset was opened from
    fn path(&self) -> &Path;

    /// Size, band count, type and georeferencing
    fn info(&self) -> DatasetInfo;

    /// Reads one band of a pixel window as (row, column)
    fn read_window(&self, band: usize, rect: PixelRect) -> Result<Array2<f64>>;

    /// Writes one band of a pixel window; samples are cast to the dataset type
    fn write_window(&self, band: usize, rect: PixelRect, data: ArrayView2<'_, f64>) -> Result<()>;

    /// No-data value of a band
    fn no_data_value(&self, band: usize) -> Result<Option<f64>>;

    /// Replaces the no-data value of a band
    fn set_no_data_value(&self, band: usize, value: Option<f64>) -> Result<()>;

    /// Whole-band statistics, excluding the band's no-data value when
    /// `ignore_no_data` is set
    fn compute_statistics(&self, band: usize, ignore_no_data: bool) -> Result<BandStatistics>;
}

/// Opens and creates datasets
pub trait RasterDriver: Send + Sync {
    /// Opens an existing dataset for reading
    fn open_for_read(&self, path: &Path) -> Result<Arc<dyn RasterDataset>>;

    /// Opens a dataset for writing, creating it if needed.
    ///
    /// Pixel data already present in a matching dataset is preserved so
    /// several independent processes may open the same output.
    fn open_for_write(&self, path: &Path, options: &CreateOptions) -> Result<Arc<dyn RasterDataset>>;

    /// Deletes a dataset; succeeds if it does not exist
    fn remove(&self, path: &Path) -> Result<()>;
}
