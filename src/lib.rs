//! rasterblock - Block-wise processing of co-registered rasters
//!
//! rasterblock reconciles one or more input rasters onto a common working
//! grid, splits that grid into fixed-size windows and calls a user function
//! once per window. The same job runs serially, on a local worker pool or
//! across distributed participants with identical results.
//!
//! # Examples
//!
//! ## Averaging two rasters
//!
//! ```no_run
//! use std::sync::Arc;
//! use rasterblock::{InputFiles, Job, JobConfig, OutputFiles, RasterBlock, RawDriver};
//!
//! let mut inputs = InputFiles::new();
//! inputs.insert("image".into(), vec!["ramp1.raw".into(), "ramp2.raw".into()]);
//! let mut outputs = OutputFiles::new();
//! outputs.insert("average".into(), "avg.raw".into());
//!
//! let config = JobConfig::default().with_window(4, 4);
//! let mut job = Job::new(Arc::new(RawDriver::new()), &inputs, outputs, config)?;
//!
//! job.run(|_ctx, inputs, outputs| {
//!     let blocks = inputs.get("image").ok_or("no image input")?;
//!     let mut sum = blocks[0].data().clone();
//!     for block in &blocks[1..] {
//!         sum += block.data();
//!     }
//!     sum /= blocks.len() as f64;
//!     outputs.insert("average", RasterBlock::new(blocks[0].data_type(), sum));
//!     Ok(())
//! })?;
//! # Ok::<(), rasterblock::Error>(())
//! ```
//!
//! ## Global statistics from inside a block
//!
//! ```no_run
//! use rasterblock::{BlockContext, BlockInputs, BlockOutputs, CallbackError, InputSlot};
//!
//! fn stretch(
//!     ctx: &BlockContext<'_>,
//!     inputs: &BlockInputs,
//!     outputs: &mut BlockOutputs,
//! ) -> Result<(), CallbackError> {
//!     let slot = InputSlot::new("image", 0);
//!     let stats = ctx.global_statistics(slot, 1, None)?;
//!     let block = inputs.block(slot).ok_or("no image input")?;
//!     let scaled = block.data().mapv(|v| (v - stats.min) / (stats.max - stats.min));
//!     outputs.insert("stretched", rasterblock::RasterBlock::new(rasterblock::DataType::F32, scaled));
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod block;
pub mod cache;
pub mod comm;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod grid;
pub mod io;
pub mod layout;
pub mod reader;
pub mod types;

pub use assembler::OutputAssembler;
pub use block::RasterBlock;
pub use cache::{BandStatistics, CacheStats, StatisticsCache, StatsKey};
pub use comm::{Communicator, LocalCommunicator, Message, ParticipantEnv, TcpCommunicator};
pub use config::{Backend, ErrorPolicy, InputFiles, JobConfig, OutputFiles};
pub use context::{BlockContext, BlockInputs, BlockOutputs, InputSlot, SourceEntry, DEFAULT_BAND};
pub use dispatch::{BlockCallback, BlockPlan, Executor, Job, JobState, JobSummary};
pub use error::{CallbackError, Error, Result};
pub use grid::{Bounds, Coordinate, Footprint, GeoTransform, GridInfo, WorkingGrid};
pub use io::{
    ByteOrder, CreateOptions, DatasetInfo, MemoryDataset, MemoryDriver, RasterDataset, RasterDriver,
    RawDriver,
};
pub use layout::{BlockIndex, BlockLayout, BlockWindow};
pub use reader::InputSet;
pub use types::{DataType, Dimensions, PixelRect};
