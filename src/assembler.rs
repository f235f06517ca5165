//! Writing callback results into output rasters
//!
//! Each output is created on the first block produced for it and shared by
//! every worker afterwards. Writes to one output are serialized by a
//! per-output lock; blocks cover disjoint regions so the order of writes
//! does not matter.

use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use crate::block::RasterBlock;
use crate::config::OutputFiles;
use crate::context::BlockOutputs;
use crate::error::{Error, Result};
use crate::grid::WorkingGrid;
use crate::io::{CreateOptions, RasterDataset, RasterDriver};
use crate::layout::BlockWindow;
use crate::types::DataType;

struct OutputTarget {
    dataset: Arc<dyn RasterDataset>,
    bands: usize,
    data_type: DataType,
    lock: Mutex<()>,
}

/// Routes output blocks to their files
pub struct OutputAssembler {
    driver: Arc<dyn RasterDriver>,
    grid: WorkingGrid,
    outputs: OutputFiles,
    no_data: Option<f64>,
    targets: DashMap<String, Arc<OutputTarget>>,
}

impl OutputAssembler {
    pub fn new(
        driver: Arc<dyn RasterDriver>,
        grid: WorkingGrid,
        outputs: OutputFiles,
        no_data: Option<f64>,
    ) -> Self {
        Self {
            driver,
            grid,
            outputs,
            no_data,
            targets: DashMap::new(),
        }
    }

    /// Logical output names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// Removes outputs left over from an earlier run
    pub fn prepare(&self) -> Result<()> {
        for (name, path) in &self.outputs {
            debug!("Preparing output {} -> {}", name, path.display());
            self.driver.remove(path)?;
        }
        Ok(())
    }

    fn target(&self, name: &str, path: &Path, block: &RasterBlock) -> Result<Arc<OutputTarget>> {
        if let Some(target) = self.targets.get(name) {
            return Ok(Arc::clone(target.value()));
        }

        let entry = self.targets.entry(name.to_string()).or_try_insert_with(|| {
            let options = CreateOptions::for_grid(&self.grid, block.band_count(), block.data_type())
                .with_no_data(self.no_data);
            let dataset = self.driver.open_for_write(path, &options)?;
            info!(
                "Created output {} ({}, {} band(s) of {})",
                path.display(),
                options.size,
                options.bands,
                options.data_type
            );
            Ok::<_, Error>(Arc::new(OutputTarget {
                dataset,
                bands: options.bands,
                data_type: options.data_type,
                lock: Mutex::new(()),
            }))
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Writes the outputs of one block, trimming the overlap
    pub fn write(&self, window: &BlockWindow, mut outputs: BlockOutputs) -> Result<()> {
        let expected = window.read.dimensions();

        if let Some(extra) = outputs.names().find(|name| !self.outputs.contains_key(*name)) {
            return Err(Error::callback(format!("unexpected output {:?}", extra)));
        }

        for (name, path) in &self.outputs {
            let block = outputs
                .remove(name)
                .ok_or_else(|| Error::callback(format!("output {:?} was not produced", name)))?;

            if block.dimensions() != expected {
                return Err(Error::callback(format!(
                    "output {:?} is {}, expected {}",
                    name,
                    block.dimensions(),
                    expected
                )));
            }

            let target = self.target(name, path, &block)?;
            if block.band_count() != target.bands || block.data_type() != target.data_type {
                return Err(Error::callback(format!(
                    "output {:?} has {} band(s) of {}, earlier blocks had {} band(s) of {}",
                    name,
                    block.band_count(),
                    block.data_type(),
                    target.bands,
                    target.data_type
                )));
            }

            let trimmed = block.trimmed(
                window.pad_left,
                window.pad_top,
                window.pad_right,
                window.pad_bottom,
            )?;

            let _guard = target.lock.lock();
            for band in 0..trimmed.band_count() {
                target
                    .dataset
                    .write_window(band + 1, window.nominal, trimmed.band(band))?;
            }
        }

        Ok(())
    }
}
