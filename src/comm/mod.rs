//! Message passing between distributed participants
//!
//! Participants are numbered `0..size`. Rank 0 coordinates: it prepares the
//! outputs, releases the other ranks and gathers their results. Two
//! transports implement [`Communicator`]: crossbeam channels between threads
//! of one process, and newline-delimited JSON over TCP between processes.

pub mod env;
pub mod local;
pub mod tcp;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

pub use env::ParticipantEnv;
pub use local::LocalCommunicator;
pub use tcp::{PendingCoordinator, TcpCommunicator};

/// Control messages of the distributed protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A participant has opened its inputs and waits for the go-ahead
    Ready { rank: usize },
    /// Outputs are prepared; start processing
    Start,
    /// A participant processed all of its blocks
    Finished { rank: usize, blocks: usize },
    /// A participant hit an error
    Failed { rank: usize, error: String },
}

/// Point-to-point link between the participants of one job
pub trait Communicator: Send + Sync {
    /// This participant's rank
    fn rank(&self) -> usize;

    /// Number of participants
    fn size(&self) -> usize;

    /// Sends a message to another rank
    fn send(&self, to: usize, message: &Message) -> Result<()>;

    /// Waits for the next message from `from`. A closed link or an expired
    /// timeout is a dispatch error.
    fn recv_from(&self, from: usize, timeout: Option<Duration>) -> Result<Message>;
}

/// Builds the communicator described by the launcher environment.
///
/// A single participant needs no network; otherwise rank 0 listens on the
/// coordinator address and every other rank connects to it.
pub fn connect(env: &ParticipantEnv, connect_timeout: Duration) -> Result<Box<dyn Communicator>> {
    if env.size == 1 {
        return Ok(Box::new(LocalCommunicator::single()));
    }

    if env.rank == 0 {
        let pending = TcpCommunicator::listen(&env.coordinator)?;
        Ok(Box::new(pending.accept(env.size, Some(connect_timeout))?))
    } else {
        Ok(Box::new(TcpCommunicator::connect(
            &env.coordinator,
            env.rank,
            env.size,
            connect_timeout,
        )?))
    }
}
