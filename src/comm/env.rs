//! Participant discovery from the launcher environment

use std::env;

use crate::error::{Error, Result};

/// Coordinator address used when none is configured
pub const DEFAULT_COORDINATOR: &str = "127.0.0.1:47650";

/// Rank/size variable pairs, in lookup order
const RANK_VARIABLES: [(&str, &str); 3] = [
    ("RASTERBLOCK_RANK", "RASTERBLOCK_SIZE"),
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
];

/// Where this process sits in a distributed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEnv {
    pub rank: usize,
    pub size: usize,
    pub coordinator: String,
}

impl ParticipantEnv {
    /// A run with only this process
    pub fn single() -> Self {
        Self {
            rank: 0,
            size: 1,
            coordinator: DEFAULT_COORDINATOR.to_string(),
        }
    }

    /// Reads rank and size from the process environment
    pub fn detect() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Reads rank and size through `lookup`.
    ///
    /// The first complete rank/size pair wins; without one the process is
    /// a single participant.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut found = Self::single();
        if let Some(addr) = lookup("RASTERBLOCK_COORDINATOR") {
            found.coordinator = addr;
        }

        for (rank_var, size_var) in RANK_VARIABLES {
            if let (Some(rank), Some(size)) = (lookup(rank_var), lookup(size_var)) {
                found.rank = rank.trim().parse().map_err(|_| {
                    Error::configuration(format!("invalid {} {:?}", rank_var, rank))
                })?;
                found.size = size.trim().parse().map_err(|_| {
                    Error::configuration(format!("invalid {} {:?}", size_var, size))
                })?;
                break;
            }
        }

        if found.size == 0 || found.rank >= found.size {
            return Err(Error::configuration(format!(
                "rank {} is not valid for {} participants",
                found.rank, found.size
            )));
        }
        Ok(found)
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }
}
