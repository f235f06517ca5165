//! Distributed execution over a [`Communicator`]
//!
//! Block `i` (row-major) belongs to rank `i % size`. Participants share no
//! memory: each has its own inputs, statistics cache and output handles.
//!
//! Protocol, as seen from rank 0:
//! 1. wait for `Ready` from every other rank
//! 2. remove stale outputs, then send `Start` to every other rank
//! 3. process its own blocks
//! 4. gather `Finished` or `Failed` from every other rank

use log::{debug, error, info};
use std::time::Duration;

use super::{run_sequence, BlockCallback, BlockPlan, Executor};
use crate::comm::{Communicator, Message};
use crate::config::ErrorPolicy;
use crate::error::{Error, Result};

/// Processes this participant's share of a statically partitioned job
pub struct DistributedExecutor {
    comm: Box<dyn Communicator>,
    timeout: Option<Duration>,
}

impl DistributedExecutor {
    /// `timeout` bounds every wait on another participant
    pub fn new(comm: Box<dyn Communicator>, timeout: Option<Duration>) -> Self {
        Self { comm, timeout }
    }

    fn coordinate_start(&self, plan: &BlockPlan) -> Result<()> {
        for rank in 1..self.comm.size() {
            match self.comm.recv_from(rank, self.timeout)? {
                Message::Ready { .. } => debug!("Participant {} ready", rank),
                Message::Failed { error, .. } => {
                    return Err(Error::dispatch(format!(
                        "participant {} failed before starting: {}",
                        rank, error
                    )));
                }
                other => {
                    return Err(Error::dispatch(format!(
                        "participant {} sent {:?} instead of ready",
                        rank, other
                    )));
                }
            }
        }

        plan.prepare()?;

        for rank in 1..self.comm.size() {
            self.comm.send(rank, &Message::Start)?;
        }
        info!("Released {} participant(s)", self.comm.size() - 1);
        Ok(())
    }

    fn await_start(&self) -> Result<()> {
        let rank = self.comm.rank();
        self.comm.send(0, &Message::Ready { rank })?;
        match self.comm.recv_from(0, None)? {
            Message::Start => Ok(()),
            other => Err(Error::dispatch(format!(
                "coordinator sent {:?} instead of start",
                other
            ))),
        }
    }

    /// Collects the outcome of every other rank. Returns the total number of
    /// blocks they processed and a description of each failed rank.
    fn gather(&self) -> (usize, Vec<String>) {
        let mut blocks = 0;
        let mut failures = Vec::new();

        for rank in 1..self.comm.size() {
            match self.comm.recv_from(rank, self.timeout) {
                Ok(Message::Finished { blocks: n, .. }) => {
                    debug!("Participant {} finished {} block(s)", rank, n);
                    blocks += n;
                }
                Ok(Message::Failed { error, .. }) => failures.push(format!("participant {}: {}", rank, error)),
                Ok(other) => failures.push(format!("participant {} sent {:?}", rank, other)),
                Err(e) => failures.push(e.to_string()),
            }
        }

        (blocks, failures)
    }
}

impl Executor for DistributedExecutor {
    fn describe(&self) -> String {
        format!(
            "distributed executor (rank {} of {})",
            self.comm.rank(),
            self.comm.size()
        )
    }

    fn execute(&self, plan: &BlockPlan, callback: &BlockCallback<'_>, policy: ErrorPolicy) -> Result<usize> {
        let rank = self.comm.rank();
        let size = self.comm.size();
        let layout = plan.layout();

        if rank == 0 {
            self.coordinate_start(plan)?;
        } else {
            self.await_start()?;
        }

        let mine = layout
            .iter()
            .filter(|index| layout.linear_index(*index) % size == rank);
        let local = run_sequence(plan, mine, callback, policy);

        if rank != 0 {
            return match local {
                Ok(blocks) => {
                    self.comm.send(0, &Message::Finished { rank, blocks })?;
                    Ok(blocks)
                }
                Err(e) => {
                    // the coordinator may already be gone; the local error wins
                    let _ = self.comm.send(
                        0,
                        &Message::Failed {
                            rank,
                            error: e.to_string(),
                        },
                    );
                    Err(e)
                }
            };
        }

        let (remote, failures) = self.gather();
        for failure in &failures {
            error!("{}", failure);
        }

        let blocks = local?;
        if !failures.is_empty() {
            return Err(Error::dispatch(failures.join("; ")));
        }

        info!(
            "All participants finished: {} block(s) here, {} elsewhere",
            blocks, remote
        );
        Ok(blocks)
    }
}
