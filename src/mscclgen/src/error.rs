use thiserror::Error;

use crate::gpu::MAX_RESOLVE_ITERATIONS;
use crate::threadblock::{ChannelId, ConnType};

/// Construction-time failures. Every variant means the client built an
/// invalid program; none is retriable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU {rank} not found")]
    GpuNotFound { rank: usize },

    #[error("step handle does not resolve on GPU {rank}")]
    InvalidHandle { rank: usize },

    #[error("{op} requires chunks on the same GPU, got ranks {src} and {dst}")]
    SameGpuRequired {
        op: &'static str,
        src: usize,
        dst: usize,
    },

    #[error("{op} requires chunks on different GPUs, both on rank {rank}")]
    DistinctGpuRequired { op: &'static str, rank: usize },

    #[error("{op} requires chunks of the same size, got {src} and {dst}")]
    SizeMismatch {
        op: &'static str,
        src: usize,
        dst: usize,
    },

    #[error("rcs requires three distinct ranks, got src {src}, dst {dst}, relay {relay}")]
    RelayRanks {
        src: usize,
        dst: usize,
        relay: usize,
    },

    #[error("GPU {rank} channel {chan} already has a thread-block with {role} peer {peer}")]
    RoleConflict {
        rank: usize,
        chan: ChannelId,
        peer: usize,
        role: ConnType,
    },

    #[error("cross-GPU dependency is not allowed (step on GPU {step_rank}, dependency on GPU {dep_rank})")]
    CrossGpuDependency { step_rank: usize, dep_rank: usize },

    #[error("dependencies within one thread-block are expressed by step order, not edges (GPU {rank}, tb {tb})")]
    SameTbDependency { rank: usize, tb: usize },

    #[error("send/recv issue order diverged: send_index {send_index:?} != recv_index {recv_index:?}")]
    LockStepMismatch {
        send_index: Option<usize>,
        recv_index: Option<usize>,
    },

    #[error("GPU {rank}: dependency graph not resolved within {MAX_RESOLVE_ITERATIONS} passes")]
    Unresolved { rank: usize },
}
