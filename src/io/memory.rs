//! In-memory raster driver
//!
//! Datasets live in a process-local map keyed by path. Used to seed inputs in
//! tests and to run jobs without touching the filesystem.

use dashmap::DashMap;
use ndarray::{s, Array2, ArrayView2};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::BandStatistics;
use crate::error::{Error, Result};
use crate::grid::GeoTransform;
use crate::io::traits::{CreateOptions, DatasetInfo, RasterDataset, RasterDriver};
use crate::types::{DataType, Dimensions, PixelRect};

struct BandState {
    pixels: Array2<f64>,
    no_data: Option<f64>,
}

/// A raster held entirely in memory
pub struct MemoryDataset {
    path: PathBuf,
    data_type: DataType,
    transform: GeoTransform,
    projection: String,
    size: Dimensions,
    bands: RwLock<Vec<BandState>>,
    statistics_calls: AtomicUsize,
}

impl MemoryDataset {
    /// Creates a dataset from per-band pixel arrays, all of the same shape
    pub fn from_bands(
        path: impl AsRef<Path>,
        data_type: DataType,
        transform: GeoTransform,
        projection: impl Into<String>,
        bands: Vec<Array2<f64>>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (rows, cols) = bands
            .first()
            .map(|b| b.dim())
            .ok_or_else(|| Error::raster(&path, "a dataset needs at least one band"))?;
        if bands.iter().any(|b| b.dim() != (rows, cols)) {
            return Err(Error::raster(&path, "bands differ in size"));
        }

        let states = bands
            .into_iter()
            .map(|pixels| BandState {
                pixels: pixels.mapv(|v| data_type.quantize(v)),
                no_data: None,
            })
            .collect();

        Ok(Self {
            path,
            data_type,
            transform,
            projection: projection.into(),
            size: Dimensions::new(cols, rows),
            bands: RwLock::new(states),
            statistics_calls: AtomicUsize::new(0),
        })
    }

    fn create(path: &Path, options: &CreateOptions) -> Self {
        let states = (0..options.bands)
            .map(|_| BandState {
                pixels: Array2::from_elem(
                    (options.size.height, options.size.width),
                    options.no_data.map(|v| options.data_type.quantize(v)).unwrap_or(0.0),
                ),
                no_data: options.no_data,
            })
            .collect();

        Self {
            path: path.to_path_buf(),
            data_type: options.data_type,
            transform: options.transform,
            projection: options.projection.clone(),
            size: options.size,
            bands: RwLock::new(states),
            statistics_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the no-data value of every band
    pub fn with_no_data(self, value: Option<f64>) -> Self {
        for band in self.bands.write().iter_mut() {
            band.no_data = value;
        }
        self
    }

    /// Copy of one whole band
    pub fn band(&self, band: usize) -> Result<Array2<f64>> {
        let bands = self.bands.read();
        let state = self.band_state(&bands, band)?;
        Ok(state.pixels.clone())
    }

    /// How many times statistics were computed on this dataset
    pub fn statistics_calls(&self) -> usize {
        self.statistics_calls.load(Ordering::SeqCst)
    }

    fn band_state<'a>(&self, bands: &'a [BandState], band: usize) -> Result<&'a BandState> {
        band.checked_sub(1)
            .and_then(|i| bands.get(i))
            .ok_or_else(|| Error::raster(&self.path, format!("band {} does not exist", band)))
    }

    fn check_rect(&self, rect: PixelRect) -> Result<()> {
        if !rect.fits_within(self.size) {
            return Err(Error::raster(
                &self.path,
                format!("window {} outside {} raster", rect, self.size),
            ));
        }
        Ok(())
    }
}

impl RasterDataset for MemoryDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn info(&self) -> DatasetInfo {
        DatasetInfo {
            size: self.size,
            bands: self.bands.read().len(),
            data_type: self.data_type,
            transform: self.transform,
            projection: self.projection.clone(),
        }
    }

    fn read_window(&self, band: usize, rect: PixelRect) -> Result<Array2<f64>> {
        self.check_rect(rect)?;
        let bands = self.bands.read();
        let state = self.band_state(&bands, band)?;
        Ok(state
            .pixels
            .slice(s![rect.y..rect.y_end(), rect.x..rect.x_end()])
            .to_owned())
    }

    fn write_window(&self, band: usize, rect: PixelRect, data: ArrayView2<'_, f64>) -> Result<()> {
        self.check_rect(rect)?;
        if data.dim() != (rect.height, rect.width) {
            return Err(Error::raster(
                &self.path,
                format!("buffer {:?} does not match window {}", data.dim(), rect),
            ));
        }

        let mut bands = self.bands.write();
        let index = band
            .checked_sub(1)
            .filter(|i| *i < bands.len())
            .ok_or_else(|| Error::raster(&self.path, format!("band {} does not exist", band)))?;
        let data_type = self.data_type;
        bands[index]
            .pixels
            .slice_mut(s![rect.y..rect.y_end(), rect.x..rect.x_end()])
            .zip_mut_with(&data, |dst, &src| *dst = data_type.quantize(src));
        Ok(())
    }

    fn no_data_value(&self, band: usize) -> Result<Option<f64>> {
        let bands = self.bands.read();
        Ok(self.band_state(&bands, band)?.no_data)
    }

    fn set_no_data_value(&self, band: usize, value: Option<f64>) -> Result<()> {
        let mut bands = self.bands.write();
        let index = band
            .checked_sub(1)
            .filter(|i| *i < bands.len())
            .ok_or_else(|| Error::raster(&self.path, format!("band {} does not exist", band)))?;
        bands[index].no_data = value;
        Ok(())
    }

    fn compute_statistics(&self, band: usize, ignore_no_data: bool) -> Result<BandStatistics> {
        self.statistics_calls.fetch_add(1, Ordering::SeqCst);
        let bands = self.bands.read();
        let state = self.band_state(&bands, band)?;
        let no_data = if ignore_no_data { state.no_data } else { None };

        BandStatistics::from_samples(state.pixels.iter().copied(), no_data).ok_or_else(|| {
            Error::raster(&self.path, format!("band {} has no valid pixels", band))
        })
    }
}

/// Driver over a shared map of in-memory datasets.
///
/// Clones share the same datasets.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    datasets: Arc<DashMap<PathBuf, Arc<MemoryDataset>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dataset under its path, replacing any previous one
    pub fn insert(&self, dataset: MemoryDataset) -> Arc<MemoryDataset> {
        let dataset = Arc::new(dataset);
        self.datasets
            .insert(dataset.path.clone(), Arc::clone(&dataset));
        dataset
    }

    /// Looks up a dataset by path
    pub fn dataset(&self, path: impl AsRef<Path>) -> Option<Arc<MemoryDataset>> {
        self.datasets
            .get(path.as_ref())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true if a dataset exists at `path`
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.datasets.contains_key(path.as_ref())
    }
}

impl RasterDriver for MemoryDriver {
    fn open_for_read(&self, path: &Path) -> Result<Arc<dyn RasterDataset>> {
        let dataset = self
            .dataset(path)
            .ok_or_else(|| Error::raster(path, "no such in-memory dataset"))?;
        Ok(dataset)
    }

    fn open_for_write(&self, path: &Path, options: &CreateOptions) -> Result<Arc<dyn RasterDataset>> {
        let entry = self
            .datasets
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(MemoryDataset::create(path, options)));
        let dataset = Arc::clone(entry.value());
        drop(entry);

        let info = dataset.info();
        if info.size != options.size || info.bands != options.bands || info.data_type != options.data_type {
            return Err(Error::raster(
                path,
                format!(
                    "existing dataset is {} x {} bands of {}, expected {} x {} bands of {}",
                    info.size, info.bands, info.data_type, options.size, options.bands, options.data_type
                ),
            ));
        }
        Ok(dataset)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.datasets.remove(path);
        Ok(())
    }
}
