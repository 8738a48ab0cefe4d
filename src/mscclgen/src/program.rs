use std::io;
use std::path::Path;

use crate::chunk::ChunkBuilder;
use crate::config::ProgramConfig;
use crate::error::Error;
use crate::gpu::Gpu;
use crate::step::{Step, StepHandle};
use crate::xml;

/// Knobs for the global resolution pass.
#[derive(Clone, Copy, Debug)]
pub struct ResolveOptions {
    /// Reorder single-peer thread-blocks into canonical send/recv
    /// alternation before resolving.
    pub sort: bool,
    /// Merge eligible adjacent recv+send pairs into fused relay steps.
    pub fuse: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            sort: true,
            fuse: false,
        }
    }
}

/// Top-level aggregate: program metadata plus one GPU per rank.
///
/// Clients issue builder calls through [`chunks`], then run [`resolve`]
/// exactly once; the resolved structure is read-only input to the
/// document rendering.
///
/// [`chunks`]: Program::chunks
/// [`resolve`]: Program::resolve
pub struct Program {
    meta: ProgramConfig,
    gpus: Vec<Gpu>,
}

impl Program {
    pub fn new(meta: ProgramConfig) -> Self {
        let gpus = (0..meta.ngpus).map(Gpu::new).collect();
        Program { meta, gpus }
    }

    pub fn meta(&self) -> &ProgramConfig {
        &self.meta
    }

    pub fn gpus(&self) -> &[Gpu] {
        &self.gpus
    }

    pub fn gpu(&self, rank: usize) -> Result<&Gpu, Error> {
        self.gpus.get(rank).ok_or(Error::GpuNotFound { rank })
    }

    pub fn gpu_mut(&mut self, rank: usize) -> Result<&mut Gpu, Error> {
        self.gpus.get_mut(rank).ok_or(Error::GpuNotFound { rank })
    }

    /// Operation surface for issuing data movements.
    pub fn chunks(&mut self) -> ChunkBuilder<'_> {
        ChunkBuilder::new(self)
    }

    pub fn step(&self, handle: StepHandle) -> Result<&Step, Error> {
        self.gpu(handle.rank)?
            .step(handle.id)
            .ok_or(Error::InvalidHandle { rank: handle.rank })
    }

    /// Records an explicit edge: `step` executes only after `dep`.
    /// Edges never cross GPUs, and ordering within one thread-block is
    /// expressed by issue order instead.
    pub fn add_dep(&mut self, step: StepHandle, dep: StepHandle) -> Result<(), Error> {
        if step.rank != dep.rank {
            return Err(Error::CrossGpuDependency {
                step_rank: step.rank,
                dep_rank: dep.rank,
            });
        }
        self.check_handle(step)?;
        self.check_handle(dep)?;
        self.gpu_mut(step.rank)?.add_dep(step.id, dep.id)
    }

    /// Removes an edge added with [`add_dep`] (or at creation), clearing
    /// both sides of the mirror.
    ///
    /// [`add_dep`]: Program::add_dep
    pub fn remove_dep(&mut self, step: StepHandle, dep: StepHandle) -> Result<(), Error> {
        if step.rank != dep.rank {
            return Err(Error::CrossGpuDependency {
                step_rank: step.rank,
                dep_rank: dep.rank,
            });
        }
        self.check_handle(step)?;
        self.check_handle(dep)?;
        self.gpu_mut(step.rank)?.remove_dep(step.id, dep.id);
        Ok(())
    }

    /// Binds a send and its cross-GPU receive counterpart as mutual
    /// peers. `copy_diff` does this automatically; clients pairing
    /// `send`/`recv` calls by hand do it here.
    pub fn bind_peers(&mut self, send: StepHandle, recv: StepHandle) -> Result<(), Error> {
        self.check_handle(send)?;
        self.check_handle(recv)?;
        self.gpu_mut(send.rank)?.step_mut(send.id).peer = Some(recv);
        self.gpu_mut(recv.rank)?.step_mut(recv.id).peer = Some(send);
        Ok(())
    }

    fn check_handle(&self, handle: StepHandle) -> Result<(), Error> {
        self.step(handle).map(|_| ())
    }

    /// Resolves the dependency graph of every GPU into fixed positions
    /// and single predecessor references. Call exactly once, after all
    /// builder calls and before rendering.
    pub fn resolve(&mut self, options: ResolveOptions) -> Result<(), Error> {
        log::debug!(
            "resolving program {:?}: {} GPUs, sort={}, fuse={}",
            self.meta.name,
            self.gpus.len(),
            options.sort,
            options.fuse
        );
        if options.sort {
            for gpu in &mut self.gpus {
                gpu.sort_tb_steps();
            }
        }
        for gpu in &mut self.gpus {
            gpu.resolve(options.fuse)?;
        }
        Ok(())
    }

    /// Renders the resolved program as its interchange document.
    pub fn to_xml(&self) -> xml::Element {
        xml::render(self)
    }

    /// Writes the rendered document to `path`.
    pub fn save_xml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        std::fs::write(path, self.to_xml().to_string())
    }
}
