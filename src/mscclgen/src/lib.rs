//! Builder for MSCCL-style collective-communication execution programs.
//!
//! A client describes per-GPU data movements (local copies,
//! point-to-point sends/receives, fused relays) through [`ChunkBuilder`]
//! calls against a [`Program`], optionally wiring explicit dependency
//! edges between the returned step handles. A single [`Program::resolve`]
//! pass then linearizes the dependency graph into a per-thread-block
//! program order in which every instruction carries at most one
//! predecessor reference, fusing eligible receive+send pairs into relay
//! instructions on the way. The resolved program renders as the XML
//! document the downstream runtime consumes.

pub mod chunk;
pub mod config;
pub mod error;
pub mod gpu;
pub mod program;
pub mod step;
pub mod threadblock;
pub mod xml;

pub use chunk::{Chunk, ChunkBuilder};
pub use config::ProgramConfig;
pub use error::Error;
pub use gpu::Gpu;
pub use program::{Program, ResolveOptions};
pub use step::{BufferKind, BufferRef, PredRef, Step, StepHandle, StepKind};
pub use threadblock::{ChannelId, ConnType, ThreadBlock};
