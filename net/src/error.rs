use std::{fmt, io, net::SocketAddr};

use crate::sock::Role;

/// Rejected topology input: activation tokens, topology names or block layouts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("unknown topology '{0}' (expected a2a or group<k>)")]
    UnknownTopology(String),
    #[error("invalid activation token '{0}'")]
    InvalidToken(String),
    #[error("worker id {id} out of range for {worker_count} workers")]
    OutOfRange { id: u32, worker_count: u32 },
    #[error("block dim {block_dim} does not divide {worker_count} workers")]
    InvalidBlockDim { block_dim: u32, worker_count: u32 },
    #[error("group size {size} does not divide {worker_count} workers")]
    InvalidGroupSize { size: u32, worker_count: u32 },
    #[error("worker count must be positive")]
    NoWorkers,
}

#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    #[error("coordinator {addr} unreachable: {source}")]
    Unreachable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("malformed peer list: {0}")]
    Malformed(String),
    #[error("unknown worker id {0}")]
    UnknownWorker(u32),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Fatal data-plane failures. Anything reported here ends the worker.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("rendezvous failed: {0}")]
    Rendezvous(#[from] RendezvousError),
    #[error("multiplexer failure: {0}")]
    Multiplexer(#[source] io::Error),
    #[error("progress sink failed: {0}")]
    Sink(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Bind,
    Connect,
    Read,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Bind => "bind",
            Stage::Connect => "connect",
            Stage::Read => "read",
            Stage::Write => "write",
        })
    }
}

/// A single peer connection failed. Logged and dropped, never fatal.
#[derive(Debug, thiserror::Error)]
#[error("peer {peer} ({role}) {stage} failed: {source}")]
pub struct ConnectionError {
    pub peer: u32,
    pub role: Role,
    pub stage: Stage,
    #[source]
    pub source: io::Error,
}
