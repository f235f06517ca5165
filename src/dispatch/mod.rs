//! Block dispatch
//!
//! A [`Job`] resolves the working grid, lays out the blocks and hands them to
//! an [`Executor`]. Every executor runs the same [`BlockPlan::run_block`] for
//! each block it owns (read inputs, build the context, call the callback,
//! write outputs), so callbacks see identical data whichever backend runs
//! them. Only scheduling and result collection differ.

pub mod distributed;
pub mod pool;
pub mod serial;

use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::assembler::OutputAssembler;
use crate::cache::StatisticsCache;
use crate::comm::{self, Communicator, ParticipantEnv};
use crate::config::{Backend, ErrorPolicy, InputFiles, JobConfig, OutputFiles};
use crate::context::{BlockContext, BlockInputs, BlockOutputs};
use crate::error::{CallbackError, Error, Result};
use crate::grid::WorkingGrid;
use crate::io::RasterDriver;
use crate::layout::{BlockIndex, BlockLayout};
use crate::reader::InputSet;

pub use distributed::DistributedExecutor;
pub use pool::PoolExecutor;
pub use serial::SerialExecutor;

/// The per-block user transformation
pub type BlockCallback<'f> = dyn Fn(&BlockContext<'_>, &BlockInputs, &mut BlockOutputs) -> std::result::Result<(), CallbackError>
    + Send
    + Sync
    + 'f;

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    GridComputed,
    Dispatching,
    Draining,
    Done,
    Error,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::GridComputed => "grid computed",
            JobState::Dispatching => "dispatching",
            JobState::Draining => "draining",
            JobState::Done => "done",
            JobState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything needed to process any single block.
///
/// Shared by reference between worker threads; one per participant.
pub struct BlockPlan {
    grid: WorkingGrid,
    layout: BlockLayout,
    inputs: InputSet,
    assembler: OutputAssembler,
    cache: StatisticsCache,
}

impl BlockPlan {
    pub fn grid(&self) -> &WorkingGrid {
        &self.grid
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn cache(&self) -> &StatisticsCache {
        &self.cache
    }

    /// Removes stale outputs before any block is written
    pub fn prepare(&self) -> Result<()> {
        self.assembler.prepare()
    }

    /// Reads, transforms and writes one block. Failures carry the block index.
    pub fn run_block(&self, index: BlockIndex, callback: &BlockCallback<'_>) -> Result<()> {
        self.process(index, callback)
            .map_err(|e| e.in_block(index.xblock, index.yblock))
    }

    fn process(&self, index: BlockIndex, callback: &BlockCallback<'_>) -> Result<()> {
        let window = self.layout.window(index)?;
        let (inputs, sources) = self.inputs.read_block(&self.grid, window.read)?;

        let mut context = BlockContext::new(&self.grid, &self.layout, &self.cache);
        context.specialize(window);
        for (name, entry) in sources {
            context.register_source(name, entry);
        }

        debug!(
            "Block {} ({}% complete)",
            index,
            context.percent_complete()?
        );

        let mut outputs = BlockOutputs::with_names(self.assembler.names());
        callback(&context, &inputs, &mut outputs).map_err(Error::Callback)?;
        drop(context);

        self.assembler.write(&window, outputs)
    }
}

/// Runs `blocks` one after another on the calling thread under `policy`,
/// returning how many were processed
pub(crate) fn run_sequence<I>(
    plan: &BlockPlan,
    blocks: I,
    callback: &BlockCallback<'_>,
    policy: ErrorPolicy,
) -> Result<usize>
where
    I: IntoIterator<Item = BlockIndex>,
{
    let mut processed = 0;
    let mut failures = Vec::new();

    for index in blocks {
        match plan.run_block(index, callback) {
            Ok(()) => processed += 1,
            Err(e) => match policy {
                ErrorPolicy::FailFast => return Err(e),
                ErrorPolicy::Continue => {
                    warn!("{}; continuing", e);
                    failures.push(e);
                }
            },
        }
    }

    first_failure(failures).map(|()| processed)
}

/// Collapses the failures of a `Continue` run into the first one
pub(crate) fn first_failure(failures: Vec<Error>) -> Result<()> {
    let count = failures.len();
    match failures.into_iter().next() {
        None => Ok(()),
        Some(first) => {
            if count > 1 {
                warn!("{} blocks failed; reporting the first", count);
            }
            Err(first)
        }
    }
}

/// Schedules the blocks of a plan
pub trait Executor: Send {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Processes this participant's share of the blocks, preparing outputs
    /// first where this participant is responsible for that. Returns the
    /// number of blocks processed here.
    fn execute(&self, plan: &BlockPlan, callback: &BlockCallback<'_>, policy: ErrorPolicy) -> Result<usize>;
}

/// Outcome of a completed job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub backend: Backend,
    pub total_blocks: usize,
    /// Blocks processed by this participant
    pub blocks_processed: usize,
    pub elapsed: Duration,
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} blocks processed ({} backend) in {:.2?}",
            self.blocks_processed, self.total_blocks, self.backend, self.elapsed
        )
    }
}

/// One block-processing job
pub struct Job {
    state: JobState,
    config: JobConfig,
    plan: BlockPlan,
    communicator: Option<Box<dyn Communicator>>,
}

impl Job {
    /// Validates the configuration, opens the inputs and computes the
    /// working grid and block layout. Nothing is dispatched yet.
    pub fn new(
        driver: Arc<dyn RasterDriver>,
        inputs: &InputFiles,
        outputs: OutputFiles,
        config: JobConfig,
    ) -> Result<Self> {
        debug!("Job state: {}", JobState::Idle);
        config.validate()?;

        let inputs = InputSet::open(driver.as_ref(), inputs)?;
        let grid = WorkingGrid::from_inputs(&inputs.grid_infos(), config.footprint, config.reference_input)?;
        let layout = BlockLayout::new(grid.size(), config.window_size(), config.overlap)?;
        let assembler = OutputAssembler::new(driver, grid.clone(), outputs, config.output_no_data);

        info!(
            "Job state: {} ({} pixels, {} blocks of {})",
            JobState::GridComputed,
            grid.size(),
            layout.block_count(),
            layout.window_size()
        );

        Ok(Self {
            state: JobState::GridComputed,
            config,
            plan: BlockPlan {
                grid,
                layout,
                inputs,
                assembler,
                cache: StatisticsCache::new(),
            },
            communicator: None,
        })
    }

    /// Runs the job as one participant of a distributed group
    pub fn with_communicator(mut self, communicator: Box<dyn Communicator>) -> Self {
        self.config.backend = Backend::Distributed;
        self.communicator = Some(communicator);
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn grid(&self) -> &WorkingGrid {
        self.plan.grid()
    }

    pub fn layout(&self) -> &BlockLayout {
        self.plan.layout()
    }

    /// Statistics cached so far by this participant
    pub fn cache(&self) -> &StatisticsCache {
        self.plan.cache()
    }

    fn transition(&mut self, state: JobState) {
        info!("Job state: {} -> {}", self.state, state);
        self.state = state;
    }

    fn executor(&mut self) -> Result<Box<dyn Executor>> {
        Ok(match self.config.backend {
            Backend::Serial => Box::new(SerialExecutor),
            Backend::Pool { workers } => Box::new(PoolExecutor::new(workers)),
            Backend::Distributed => {
                let communicator = match self.communicator.take() {
                    Some(communicator) => communicator,
                    None => comm::connect(&ParticipantEnv::detect()?, self.config.connect_timeout())?,
                };
                Box::new(DistributedExecutor::new(
                    communicator,
                    self.config.participant_timeout(),
                ))
            }
        })
    }

    /// Runs `callback` over every block this participant owns.
    ///
    /// A job runs once; calling `run` again is an invalid-state error.
    pub fn run<F>(&mut self, callback: F) -> Result<JobSummary>
    where
        F: Fn(&BlockContext<'_>, &BlockInputs, &mut BlockOutputs) -> std::result::Result<(), CallbackError>
            + Send
            + Sync,
    {
        if self.state != JobState::GridComputed {
            return Err(Error::invalid_state(format!(
                "job cannot run from state {}",
                self.state
            )));
        }

        let started = Instant::now();
        let executor = match self.executor() {
            Ok(executor) => executor,
            Err(e) => {
                self.transition(JobState::Error);
                return Err(e);
            }
        };

        self.transition(JobState::Dispatching);
        info!("Dispatching with {}", executor.describe());
        let outcome = executor.execute(&self.plan, &callback, self.config.error_policy);
        drop(executor);

        match outcome {
            Ok(blocks_processed) => {
                self.transition(JobState::Draining);
                self.transition(JobState::Done);
                let summary = JobSummary {
                    backend: self.config.backend,
                    total_blocks: self.plan.layout.block_count(),
                    blocks_processed,
                    elapsed: started.elapsed(),
                };
                info!("{}", summary);
                Ok(summary)
            }
            Err(e) => {
                self.transition(JobState::Error);
                Err(e)
            }
        }
    }
}
