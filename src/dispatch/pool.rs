//! Local worker pool execution

use log::warn;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{first_failure, BlockCallback, BlockPlan, Executor};
use crate::config::ErrorPolicy;
use crate::error::{Error, Result};
use crate::layout::BlockIndex;

/// Runs blocks on a fixed-size rayon thread pool.
///
/// Workers pull blocks from the shared row-major list; completion order is
/// unspecified. With fail-fast, workers stop picking up new blocks once one
/// has failed and whichever error arrived first is reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolExecutor {
    workers: Option<usize>,
}

impl PoolExecutor {
    /// `None` sizes the pool to the number of CPUs
    pub fn new(workers: Option<usize>) -> Self {
        Self { workers }
    }
}

impl Executor for PoolExecutor {
    fn describe(&self) -> String {
        match self.workers {
            Some(n) => format!("worker pool of {} threads", n),
            None => "worker pool (one thread per CPU)".to_string(),
        }
    }

    fn execute(&self, plan: &BlockPlan, callback: &BlockCallback<'_>, policy: ErrorPolicy) -> Result<usize> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.workers {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| Error::configuration(format!("cannot start worker pool: {}", e)))?;

        plan.prepare()?;

        let blocks: Vec<BlockIndex> = plan.layout().iter().collect();
        let processed = AtomicUsize::new(0);

        pool.install(|| match policy {
            ErrorPolicy::FailFast => blocks.par_iter().try_for_each(|&index| {
                plan.run_block(index, callback)?;
                processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            ErrorPolicy::Continue => {
                let failures: Vec<Error> = blocks
                    .par_iter()
                    .filter_map(|&index| match plan.run_block(index, callback) {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::Relaxed);
                            None
                        }
                        Err(e) => {
                            warn!("{}; continuing", e);
                            Some(e)
                        }
                    })
                    .collect();
                first_failure(failures)
            }
        })?;

        Ok(processed.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, InputFiles, JobConfig, OutputFiles};
    use crate::context::InputSlot;
    use crate::dispatch::{Job, JobState};
    use crate::grid::GeoTransform;
    use crate::io::{MemoryDataset, MemoryDriver};
    use crate::types::DataType;
    use ndarray::Array2;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn job(driver: &MemoryDriver, policy: ErrorPolicy) -> Job {
        driver.insert(
            MemoryDataset::from_bands(
                "in.mem",
                DataType::U8,
                GeoTransform::north_up(0.0, 10.0, 1.0, 1.0),
                "local",
                vec![Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f64)],
            )
            .unwrap(),
        );
        let inputs: InputFiles = [("image".to_string(), vec![PathBuf::from("in.mem")])]
            .into_iter()
            .collect();
        let outputs: OutputFiles = [("out".to_string(), PathBuf::from("out.mem"))]
            .into_iter()
            .collect();
        let config = JobConfig::default()
            .with_window(2, 2)
            .with_backend(Backend::Pool { workers: Some(2) })
            .with_error_policy(policy);
        Job::new(Arc::new(driver.clone()), &inputs, outputs, config).unwrap()
    }

    #[test]
    fn test_pool_copies_every_block() {
        let driver = MemoryDriver::new();
        let mut job = job(&driver, ErrorPolicy::FailFast);

        let summary = job
            .run(|_, inputs, outputs| {
                let block = inputs.block(InputSlot::new("image", 0)).ok_or("missing input")?;
                outputs.insert("out", block.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(summary.blocks_processed, 25);
        assert_eq!(
            driver.dataset("out.mem").unwrap().band(1).unwrap(),
            driver.dataset("in.mem").unwrap().band(1).unwrap()
        );
    }

    #[test]
    fn test_pool_fail_fast_stops_picking_up_blocks() {
        let driver = MemoryDriver::new();
        let mut job = job(&driver, ErrorPolicy::FailFast);
        let calls = AtomicUsize::new(0);

        let err = job
            .run(|_, _, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad block".into())
            })
            .unwrap_err();

        let calls = calls.load(Ordering::SeqCst);
        assert!(calls >= 1 && calls < 25, "{} callback calls", calls);
        assert!(matches!(err, Error::Block { .. }));
        assert!(matches!(err.root(), Error::Callback(_)));
        assert_eq!(job.state(), JobState::Error);
    }

    #[test]
    fn test_pool_continue_visits_every_block() {
        let driver = MemoryDriver::new();
        let mut job = job(&driver, ErrorPolicy::Continue);
        let calls = AtomicUsize::new(0);

        let err = job
            .run(|ctx, inputs, outputs| {
                calls.fetch_add(1, Ordering::SeqCst);
                if ctx.block_count()?.yblock == 1 {
                    return Err("row one fails".into());
                }
                let block = inputs.block(InputSlot::new("image", 0)).ok_or("missing input")?;
                outputs.insert("out", block.clone());
                Ok(())
            })
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 25);
        // failures are collected in row-major order
        assert!(matches!(err, Error::Block { xblock: 0, yblock: 1, .. }));

        let out = driver.dataset("out.mem").unwrap().band(1).unwrap();
        assert_eq!(out[[9, 9]], 99.0);
        assert_eq!(out[[4, 4]], 44.0);
    }
}
