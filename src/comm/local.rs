//! In-process communicator over crossbeam channels

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::{Communicator, Message};
use crate::error::{Error, Result};

/// One member of a group of threads that talk through channels.
///
/// Every ordered pair of ranks has its own channel, so messages from one
/// sender arrive in order and never mix with another sender's.
pub struct LocalCommunicator {
    rank: usize,
    senders: Vec<Sender<Message>>,
    receivers: Vec<Receiver<Message>>,
}

impl LocalCommunicator {
    /// Creates `size` connected communicators, indexed by rank
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        let channels: Vec<Vec<(Sender<Message>, Receiver<Message>)>> = (0..size)
            .map(|_| (0..size).map(|_| unbounded()).collect())
            .collect();

        (0..size)
            .map(|rank| LocalCommunicator {
                rank,
                senders: (0..size).map(|to| channels[rank][to].0.clone()).collect(),
                receivers: (0..size).map(|from| channels[from][rank].1.clone()).collect(),
            })
            .collect()
    }

    /// A group of one
    pub fn single() -> LocalCommunicator {
        let (tx, rx) = unbounded();
        LocalCommunicator {
            rank: 0,
            senders: vec![tx],
            receivers: vec![rx],
        }
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.senders.len() {
            return Err(Error::dispatch(format!(
                "rank {} outside a group of {}",
                rank,
                self.senders.len()
            )));
        }
        Ok(())
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, to: usize, message: &Message) -> Result<()> {
        self.check_rank(to)?;
        self.senders[to]
            .send(message.clone())
            .map_err(|_| Error::dispatch(format!("participant {} is unreachable", to)))
    }

    fn recv_from(&self, from: usize, timeout: Option<Duration>) -> Result<Message> {
        self.check_rank(from)?;
        let receiver = &self.receivers[from];
        match timeout {
            Some(timeout) => receiver.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::dispatch(format!(
                    "participant {} did not answer within {:?}",
                    from, timeout
                )),
                RecvTimeoutError::Disconnected => {
                    Error::dispatch(format!("participant {} is unreachable", from))
                }
            }),
            None => receiver
                .recv()
                .map_err(|_| Error::dispatch(format!("participant {} is unreachable", from))),
        }
    }
}
