use std::{fmt, ops::Range, str::FromStr};

use crate::error::TopologyError;

/// Per-worker activation for one run. Fixed once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyMask {
    send_active: Vec<bool>,
    recv_active: Vec<bool>,
}

impl TopologyMask {
    /// Every worker both sends and receives.
    pub fn dense(worker_count: u32) -> Self {
        Self {
            send_active: vec![true; worker_count as usize],
            recv_active: vec![true; worker_count as usize],
        }
    }

    /// Builds a mask from `x<id>` (active sender) and `<id>` (active receiver)
    /// tokens. Ids that never appear stay inactive in that role.
    pub fn from_tokens<I, S>(worker_count: u32, tokens: I) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut send_active = vec![false; worker_count as usize];
        let mut recv_active = vec![false; worker_count as usize];

        for token in tokens {
            let token = token.as_ref();
            let (slots, digits) = match token.strip_prefix('x') {
                Some(rest) => (&mut send_active, rest),
                None => (&mut recv_active, token),
            };
            let id: u32 = digits
                .parse()
                .map_err(|_| TopologyError::InvalidToken(token.to_string()))?;
            let slot = slots
                .get_mut(id as usize)
                .ok_or(TopologyError::OutOfRange { id, worker_count })?;
            *slot = true;
        }

        Ok(Self {
            send_active,
            recv_active,
        })
    }

    pub fn worker_count(&self) -> u32 {
        self.send_active.len() as u32
    }

    pub fn sends(&self, id: u32) -> bool {
        self.send_active.get(id as usize).copied().unwrap_or(false)
    }

    pub fn receives(&self, id: u32) -> bool {
        self.recv_active.get(id as usize).copied().unwrap_or(false)
    }

    /// Token form accepted by [`TopologyMask::from_tokens`].
    pub fn tokens(&self) -> Vec<String> {
        let senders = (0..self.worker_count())
            .filter(|id| self.sends(*id))
            .map(|id| format!("x{id}"));
        let receivers = (0..self.worker_count())
            .filter(|id| self.receives(*id))
            .map(|id| id.to_string());
        senders.chain(receivers).collect()
    }
}

/// Named communication pattern of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// `a2a`: every worker exchanges with every other worker.
    AllToAll,
    /// `group<k>`: blocks of `k` workers, exchange only inside a block.
    Grouped { size: u32 },
}

impl FromStr for Topology {
    type Err = TopologyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "a2a" {
            return Ok(Topology::AllToAll);
        }
        value
            .strip_prefix("group")
            .and_then(|size| size.parse::<u32>().ok())
            .filter(|size| *size > 0)
            .map(|size| Topology::Grouped { size })
            .ok_or_else(|| TopologyError::UnknownTopology(value.to_string()))
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::AllToAll => f.write_str("a2a"),
            Topology::Grouped { size } => write!(f, "group{size}"),
        }
    }
}

impl Topology {
    /// Number of blocks the workers are split into.
    pub fn block_dim(&self, worker_count: u32) -> Result<u32, TopologyError> {
        if worker_count == 0 {
            return Err(TopologyError::NoWorkers);
        }
        match *self {
            Topology::AllToAll => Ok(1),
            Topology::Grouped { size } if size > 0 && worker_count % size == 0 => {
                Ok(worker_count / size)
            }
            Topology::Grouped { size } => Err(TopologyError::InvalidGroupSize { size, worker_count }),
        }
    }
}

/// `block_dim` equal, contiguous blocks over `0..worker_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    worker_count: u32,
    block_size: u32,
}

impl BlockLayout {
    pub fn new(worker_count: u32, block_dim: u32) -> Result<Self, TopologyError> {
        if worker_count == 0 {
            return Err(TopologyError::NoWorkers);
        }
        if block_dim == 0 || worker_count % block_dim != 0 {
            return Err(TopologyError::InvalidBlockDim {
                block_dim,
                worker_count,
            });
        }
        Ok(Self {
            worker_count,
            block_size: worker_count / block_dim,
        })
    }

    pub fn block_of(&self, id: u32) -> u32 {
        id / self.block_size
    }

    pub fn members(&self, block: u32) -> Range<u32> {
        let start = block.saturating_mul(self.block_size).min(self.worker_count);
        start..start.saturating_add(self.block_size).min(self.worker_count)
    }

    pub fn same_block(&self, a: u32, b: u32) -> bool {
        a < self.worker_count && b < self.worker_count && self.block_of(a) == self.block_of(b)
    }

    /// Every other member of `id`'s block.
    pub fn peers_of(&self, id: u32) -> impl Iterator<Item = u32> {
        self.members(self.block_of(id))
            .filter(move |peer| *peer != id)
    }
}
