use crate::error::Error;
use crate::program::Program;
use crate::step::{BufferKind, BufferRef, StepHandle, StepId, StepKind};
use crate::threadblock::{ChannelId, ConnType, ThreadBlock};

/// Logical chunk descriptor: a contiguous run of elements in one buffer
/// of one GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub rank: usize,
    pub buf: BufferKind,
    pub offset: usize,
    pub count: usize,
}

impl Chunk {
    pub fn new(rank: usize, buf: BufferKind, offset: usize, count: usize) -> Self {
        Chunk {
            rank,
            buf,
            offset,
            count,
        }
    }

    fn buffer_ref(&self) -> BufferRef {
        BufferRef::new(self.buf, self.offset)
    }
}

/// Operation surface of the builder. Each call locates or creates the
/// right thread-block on the affected GPU(s) and appends the right step,
/// returning a handle usable as a dependency or peer reference.
pub struct ChunkBuilder<'a> {
    program: &'a mut Program,
}

impl<'a> ChunkBuilder<'a> {
    pub(crate) fn new(program: &'a mut Program) -> Self {
        ChunkBuilder { program }
    }

    /// Local copy between two chunks of one GPU.
    pub fn copy(
        &mut self,
        src: Chunk,
        dst: Chunk,
        chan: ChannelId,
        deps: &[StepHandle],
    ) -> Result<StepHandle, Error> {
        if src.rank != dst.rank {
            return Err(Error::SameGpuRequired {
                op: "copy",
                src: src.rank,
                dst: dst.rank,
            });
        }
        if src.count != dst.count {
            return Err(Error::SizeMismatch {
                op: "copy",
                src: src.count,
                dst: dst.count,
            });
        }
        let dep_ids = same_gpu_deps(src.rank, deps)?;
        let gpu = self.program.gpu_mut(src.rank)?;
        let ti = match gpu.find_local_tb(chan) {
            Some(ti) => ti,
            None => gpu.add_tb(ThreadBlock::local(chan))?,
        };
        let id = gpu.push_step(
            ti,
            StepKind::Copy,
            src.buffer_ref(),
            dst.buffer_ref(),
            src.count,
            &dep_ids,
        );
        Ok(StepHandle::new(src.rank, id))
    }

    /// Send of `src` towards `dest_rank`. With `bidirectional`, a newly
    /// created thread-block also claims `dest_rank` as its receive
    /// source so the two directions share one execution unit.
    pub fn send(
        &mut self,
        src: Chunk,
        dest_rank: usize,
        chan: ChannelId,
        deps: &[StepHandle],
        bidirectional: bool,
    ) -> Result<StepHandle, Error> {
        let dep_ids = same_gpu_deps(src.rank, deps)?;
        let gpu = self.program.gpu_mut(src.rank)?;
        let ti = match gpu.find_send_tb(dest_rank, chan) {
            Some(ti) => ti,
            None => {
                let tb = if bidirectional {
                    if gpu.find_recv_tb(dest_rank, chan).is_some() {
                        return Err(Error::RoleConflict {
                            rank: src.rank,
                            chan,
                            peer: dest_rank,
                            role: ConnType::Recv,
                        });
                    }
                    ThreadBlock::new(Some(dest_rank), Some(dest_rank), chan)
                } else {
                    ThreadBlock::new(Some(dest_rank), None, chan)
                };
                gpu.add_tb(tb)?
            }
        };
        let id = gpu.push_step(
            ti,
            StepKind::Send,
            src.buffer_ref(),
            BufferRef::unbound(BufferKind::Output),
            src.count,
            &dep_ids,
        );
        Ok(StepHandle::new(src.rank, id))
    }

    /// Receive into `dst` from `src_rank`; symmetric to [`send`].
    ///
    /// [`send`]: ChunkBuilder::send
    pub fn recv(
        &mut self,
        dst: Chunk,
        src_rank: usize,
        chan: ChannelId,
        deps: &[StepHandle],
        bidirectional: bool,
    ) -> Result<StepHandle, Error> {
        let dep_ids = same_gpu_deps(dst.rank, deps)?;
        let gpu = self.program.gpu_mut(dst.rank)?;
        let ti = match gpu.find_recv_tb(src_rank, chan) {
            Some(ti) => ti,
            None => {
                let tb = if bidirectional {
                    if gpu.find_send_tb(src_rank, chan).is_some() {
                        return Err(Error::RoleConflict {
                            rank: dst.rank,
                            chan,
                            peer: src_rank,
                            role: ConnType::Send,
                        });
                    }
                    ThreadBlock::new(Some(src_rank), Some(src_rank), chan)
                } else {
                    ThreadBlock::new(None, Some(src_rank), chan)
                };
                gpu.add_tb(tb)?
            }
        };
        let id = gpu.push_step(
            ti,
            StepKind::Recv,
            BufferRef::unbound(BufferKind::Input),
            dst.buffer_ref(),
            dst.count,
            &dep_ids,
        );
        Ok(StepHandle::new(dst.rank, id))
    }

    /// Cross-GPU copy, decomposed into a send on the source GPU and a
    /// receive on the destination GPU. The two steps are bound as
    /// mutual peers, each side's buffer descriptor is copied into the
    /// other so both emitted instructions are self-describing, and the
    /// two sides' sequence numbers must agree.
    pub fn copy_diff(
        &mut self,
        src: Chunk,
        dst: Chunk,
        chan: ChannelId,
        deps: &[StepHandle],
        bidirectional: bool,
    ) -> Result<(StepHandle, StepHandle), Error> {
        if src.rank == dst.rank {
            return Err(Error::DistinctGpuRequired {
                op: "copy_diff",
                rank: src.rank,
            });
        }
        if src.count != dst.count {
            return Err(Error::SizeMismatch {
                op: "copy_diff",
                src: src.count,
                dst: dst.count,
            });
        }

        let send = self.send(src, dst.rank, chan, deps, bidirectional)?;
        let recv = self.recv(dst, src.rank, chan, &[], bidirectional)?;
        self.program.bind_peers(send, recv)?;

        let recv_dst = self.program.step(recv)?.dst();
        let send_src = self.program.step(send)?.src();
        self.program.gpu_mut(send.rank)?.step_mut(send.id).dst = recv_dst;
        self.program.gpu_mut(recv.rank)?.step_mut(recv.id).src = send_src;

        let send_index = self.program.step(send)?.send_index();
        let recv_index = self.program.step(recv)?.recv_index();
        if send_index != recv_index {
            return Err(Error::LockStepMismatch {
                send_index,
                recv_index,
            });
        }

        Ok((send, recv))
    }

    /// Fused relay on `relay_rank`: receive `src` from its owner and
    /// send it on towards `dst`, as a single step. The three ranks must
    /// be pairwise distinct.
    pub fn rcs(
        &mut self,
        src: Chunk,
        dst: Chunk,
        relay_rank: usize,
        chan: ChannelId,
        deps: &[StepHandle],
    ) -> Result<StepHandle, Error> {
        if src.rank == dst.rank || src.rank == relay_rank || dst.rank == relay_rank {
            return Err(Error::RelayRanks {
                src: src.rank,
                dst: dst.rank,
                relay: relay_rank,
            });
        }
        if src.count != dst.count {
            return Err(Error::SizeMismatch {
                op: "rcs",
                src: src.count,
                dst: dst.count,
            });
        }
        let dep_ids = same_gpu_deps(relay_rank, deps)?;
        let gpu = self.program.gpu_mut(relay_rank)?;
        let ti = match gpu.find_relay_tb(dst.rank, src.rank, chan) {
            Some(ti) => ti,
            None => {
                if gpu.find_send_tb(dst.rank, chan).is_some() {
                    return Err(Error::RoleConflict {
                        rank: relay_rank,
                        chan,
                        peer: dst.rank,
                        role: ConnType::Send,
                    });
                }
                if gpu.find_recv_tb(src.rank, chan).is_some() {
                    return Err(Error::RoleConflict {
                        rank: relay_rank,
                        chan,
                        peer: src.rank,
                        role: ConnType::Recv,
                    });
                }
                gpu.add_tb(ThreadBlock::new(Some(dst.rank), Some(src.rank), chan))?
            }
        };
        let id = gpu.push_step(
            ti,
            StepKind::RecvCopySend,
            src.buffer_ref(),
            dst.buffer_ref(),
            src.count,
            &dep_ids,
        );
        Ok(StepHandle::new(relay_rank, id))
    }
}

/// Dependencies of a step must live on the GPU the step is created on.
fn same_gpu_deps(rank: usize, deps: &[StepHandle]) -> Result<Vec<StepId>, Error> {
    deps.iter()
        .map(|handle| {
            if handle.rank != rank {
                Err(Error::CrossGpuDependency {
                    step_rank: rank,
                    dep_rank: handle.rank,
                })
            } else {
                Ok(handle.id)
            }
        })
        .collect()
}
