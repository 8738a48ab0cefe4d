use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::step::{BufferKind, BufferRef, PredRef, Step, StepId, StepKind};
use crate::threadblock::{ChannelId, ConnType, ThreadBlock};

/// Bound on full resolution passes per GPU. Exceeding it means the
/// dependency graph contains a cycle or an edge that can never fix.
pub(crate) const MAX_RESOLVE_ITERATIONS: usize = 100;

// copies and nops never interleave ahead of communication steps
const NON_COMM_SORT_STRIDE: usize = 1000;

/// Ranks already claimed on one channel, used to reject role conflicts
/// at thread-block creation.
#[derive(Debug, Default)]
struct ChannelUsage {
    send_targets: HashSet<usize>,
    recv_sources: HashSet<usize>,
}

/// One execution context: owns its thread-blocks, the per-channel role
/// tables, and the step arena all handles of this rank point into.
pub struct Gpu {
    rank: usize,
    tbs: Vec<ThreadBlock>,
    channel_usage: HashMap<ChannelId, ChannelUsage>,
    steps: Vec<Step>,
}

impl Gpu {
    pub(crate) fn new(rank: usize) -> Self {
        Gpu {
            rank,
            tbs: Vec::new(),
            channel_usage: HashMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn tbs(&self) -> &[ThreadBlock] {
        &self.tbs
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.index())
    }

    #[inline]
    fn step_ref(&self, id: StepId) -> &Step {
        &self.steps[id.index()]
    }

    #[inline]
    pub(crate) fn step_mut(&mut self, id: StepId) -> &mut Step {
        &mut self.steps[id.index()]
    }

    /// Appends a thread-block, assigning the next contiguous id. Rejects
    /// blocks whose roles collide with an existing block on the channel.
    pub fn add_tb(&mut self, mut tb: ThreadBlock) -> Result<usize, Error> {
        self.check_channel_conflict(&tb)?;

        let usage = self.channel_usage.entry(tb.chan).or_default();
        if let Some(peer) = tb.send {
            usage.send_targets.insert(peer);
        }
        if let Some(peer) = tb.recv {
            usage.recv_sources.insert(peer);
        }

        let id = self.tbs.len();
        tb.id = id;
        self.tbs.push(tb);
        Ok(id)
    }

    fn check_channel_conflict(&self, tb: &ThreadBlock) -> Result<(), Error> {
        if let Some(usage) = self.channel_usage.get(&tb.chan) {
            if let Some(peer) = tb.send {
                if usage.send_targets.contains(&peer) {
                    return Err(Error::RoleConflict {
                        rank: self.rank,
                        chan: tb.chan,
                        peer,
                        role: ConnType::Send,
                    });
                }
            }
            if let Some(peer) = tb.recv {
                if usage.recv_sources.contains(&peer) {
                    return Err(Error::RoleConflict {
                        rank: self.rank,
                        chan: tb.chan,
                        peer,
                        role: ConnType::Recv,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn find_local_tb(&self, chan: ChannelId) -> Option<usize> {
        self.tbs
            .iter()
            .find(|tb| tb.send.is_none() && tb.recv.is_none() && tb.chan == chan)
            .map(|tb| tb.id)
    }

    pub fn find_send_tb(&self, peer: usize, chan: ChannelId) -> Option<usize> {
        self.tbs
            .iter()
            .find(|tb| tb.send == Some(peer) && tb.chan == chan)
            .map(|tb| tb.id)
    }

    pub fn find_recv_tb(&self, peer: usize, chan: ChannelId) -> Option<usize> {
        self.tbs
            .iter()
            .find(|tb| tb.recv == Some(peer) && tb.chan == chan)
            .map(|tb| tb.id)
    }

    pub fn find_relay_tb(&self, send_to: usize, recv_from: usize, chan: ChannelId) -> Option<usize> {
        self.tbs
            .iter()
            .find(|tb| tb.send == Some(send_to) && tb.recv == Some(recv_from) && tb.chan == chan)
            .map(|tb| tb.id)
    }

    /// Creates a step inside thread-block `ti`, wiring its creation-time
    /// dependency edges. Send- and recv-type steps take the block's next
    /// sequence number.
    pub(crate) fn push_step(
        &mut self,
        ti: usize,
        kind: StepKind,
        src: BufferRef,
        dst: BufferRef,
        cnt: usize,
        deps: &[StepId],
    ) -> StepId {
        let mut step = Step::new(kind, src, dst, cnt);
        step.tb = ti;
        {
            let tb = &mut self.tbs[ti];
            step.s = tb.steps.len();
            step.original_index = tb.steps.len();
            match kind {
                StepKind::Send => {
                    step.send_index = Some(tb.send_index);
                    tb.send_index += 1;
                }
                StepKind::Recv => {
                    step.recv_index = Some(tb.recv_index);
                    tb.recv_index += 1;
                }
                StepKind::RecvCopySend => {
                    step.recv_index = Some(tb.recv_index);
                    step.send_index = Some(tb.send_index);
                    tb.recv_index += 1;
                    tb.send_index += 1;
                }
                StepKind::Copy | StepKind::Nop => {}
            }
        }

        let id = self.alloc_step(step);
        for dep in deps {
            // same-block edges are legal on this path: the adjacent
            // receive a relay send depends on arrives exactly here
            self.link_dep(id, *dep);
        }
        self.tbs[ti].steps.push(id);
        id
    }

    fn alloc_step(&mut self, step: Step) -> StepId {
        let id = StepId(self.steps.len() as u32);
        self.steps.push(step);
        id
    }

    /// Records `step depends on dep` with the mirrored back-edge.
    pub(crate) fn add_dep(&mut self, step: StepId, dep: StepId) -> Result<(), Error> {
        if self.step_ref(step).tb == self.step_ref(dep).tb {
            return Err(Error::SameTbDependency {
                rank: self.rank,
                tb: self.step_ref(step).tb,
            });
        }
        self.link_dep(step, dep);
        Ok(())
    }

    fn link_dep(&mut self, step: StepId, dep: StepId) {
        if !self.step_ref(step).deps.contains(&dep) {
            self.step_mut(step).deps.push(dep);
            self.step_mut(dep).has_dep = true;
            if !self.step_ref(dep).depended_by.contains(&step) {
                self.step_mut(dep).depended_by.push(step);
            }
        }
    }

    /// Removes the edge and its mirror; clears the dependency flag once
    /// nothing depends on `dep` anymore.
    pub(crate) fn remove_dep(&mut self, step: StepId, dep: StepId) {
        if let Some(pos) = self.step_ref(step).deps.iter().position(|d| *d == dep) {
            self.step_mut(step).deps.remove(pos);
            if let Some(pos) = self.step_ref(dep).depended_by.iter().position(|d| *d == step) {
                self.step_mut(dep).depended_by.remove(pos);
            }
            if self.step_ref(dep).depended_by.is_empty() {
                self.step_mut(dep).has_dep = false;
            }
        }
    }

    /// Reorders every block that alternates with a single peer into the
    /// canonical send/recv interleaving, keyed by sequence number.
    pub(crate) fn sort_tb_steps(&mut self) {
        for ti in 0..self.tbs.len() {
            if self.tbs[ti].send != self.tbs[ti].recv {
                continue;
            }
            let mut order = self.tbs[ti].steps.clone();
            order.sort_by_key(|id| self.sort_key(*id));
            self.tbs[ti].steps = order;
            self.renumber_from(ti, 0);
        }
    }

    fn sort_key(&self, id: StepId) -> (usize, usize) {
        let step = self.step_ref(id);
        match step.kind {
            StepKind::Send => (2 * step.send_index.unwrap_or(0), 0),
            StepKind::Recv => (2 * step.recv_index.unwrap_or(0) + 1, 1),
            StepKind::RecvCopySend => (2 * step.recv_index.unwrap_or(0), 2),
            StepKind::Copy | StepKind::Nop => (NON_COMM_SORT_STRIDE * step.original_index, 3),
        }
    }

    fn renumber_from(&mut self, ti: usize, from: usize) {
        for pos in from..self.tbs[ti].steps.len() {
            let id = self.tbs[ti].steps[pos];
            self.steps[id.index()].s = pos;
        }
    }

    /// Fixpoint position-fixing: repeatedly scans every unfixed step and
    /// fixes those whose dependencies are all fixed, materializing the
    /// single predecessor reference (inserting nop joins for multi-edge
    /// steps) and fusing eligible recv+send pairs along the way.
    pub(crate) fn resolve(&mut self, fuse: bool) -> Result<(), Error> {
        let mut passes = 0;
        loop {
            passes += 1;
            if passes > MAX_RESOLVE_ITERATIONS {
                return Err(Error::Unresolved { rank: self.rank });
            }

            let mut all_fixed = true;
            for ti in 0..self.tbs.len() {
                let mut i = 0;
                while i < self.tbs[ti].steps.len() {
                    let id = self.tbs[ti].steps[i];
                    if self.step_ref(id).position_fixed {
                        i += 1;
                        continue;
                    }

                    let can_fix = self
                        .step_ref(id)
                        .deps
                        .iter()
                        .all(|dep| self.step_ref(*dep).position_fixed);
                    if !can_fix {
                        all_fixed = false;
                        i += 1;
                        continue;
                    }

                    match self.step_ref(id).deps.len() {
                        0 => {}
                        1 => {
                            let dep = self.step_ref(id).deps[0];
                            self.step_mut(id).pred = Some(self.pred_ref(dep));
                        }
                        _ => {
                            // one nop join per dependency except the
                            // last; the step itself waits on the last
                            let deps = self.step_ref(id).deps.clone();
                            self.insert_nop_joins(ti, i, &deps[..deps.len() - 1]);
                            let last = deps[deps.len() - 1];
                            self.step_mut(id).pred = Some(self.pred_ref(last));
                        }
                    }

                    if fuse && self.fusion_candidate(ti, i) {
                        self.fuse_at(ti, i);
                        // the step at this position changed; rescan it
                        continue;
                    }

                    self.step_mut(id).position_fixed = true;
                    i += 1;
                }
            }

            if all_fixed {
                log::debug!(
                    "GPU {}: dependency graph resolved after {} passes",
                    self.rank,
                    passes
                );
                return Ok(());
            }
        }
    }

    fn pred_ref(&self, dep: StepId) -> PredRef {
        let dep = self.step_ref(dep);
        PredRef { tb: dep.tb, s: dep.s }
    }

    /// Inserts one fixed nop per listed dependency immediately before
    /// position `at`, each carrying that dependency's materialized
    /// reference, in the order the edges were added.
    fn insert_nop_joins(&mut self, ti: usize, at: usize, deps: &[StepId]) {
        for (offset, dep) in deps.iter().enumerate() {
            let mut nop = Step::nop();
            nop.tb = ti;
            nop.position_fixed = true;
            nop.pred = Some(self.pred_ref(*dep));
            let id = self.alloc_step(nop);
            self.tbs[ti].steps.insert(at + offset, id);
        }
        self.renumber_from(ti, 0);
    }

    /// A send being fixed fuses with the already-fixed receive right
    /// before it when the block relays between two different peers, the
    /// send reads exactly what the receive wrote, and the send depends
    /// on nothing or only on that receive (by identity or through its
    /// materialized reference).
    fn fusion_candidate(&self, ti: usize, i: usize) -> bool {
        let tb = &self.tbs[ti];
        if tb.send == tb.recv {
            return false;
        }
        if i == 0 || i >= tb.steps.len() {
            return false;
        }
        let send = self.step_ref(tb.steps[i]);
        let recv = self.step_ref(tb.steps[i - 1]);
        if send.kind != StepKind::Send || recv.kind != StepKind::Recv {
            return false;
        }
        // the fused step is fixed immediately, so the receive's own
        // predecessor must already be settled
        if !recv.position_fixed {
            return false;
        }
        if send.cnt != recv.cnt || send.src != recv.dst {
            return false;
        }
        match send.deps.as_slice() {
            [] => true,
            [dep] => {
                *dep == tb.steps[i - 1]
                    || send.pred == Some(PredRef { tb: tb.id, s: recv.s })
            }
            _ => false,
        }
    }

    /// Replaces the receive at `i - 1` and the send at `i` with one
    /// fused relay step at the receive's position. The fused step takes
    /// the send's source, the receive's destination, predecessor and
    /// dependency set, both halves' dependents (mirrors re-pointed) and
    /// both peer bindings, and is fixed immediately.
    fn fuse_at(&mut self, ti: usize, i: usize) {
        let recv_id = self.tbs[ti].steps[i - 1];
        let send_id = self.tbs[ti].steps[i];

        let recv = self.step_ref(recv_id);
        let send = self.step_ref(send_id);

        let mut fused = Step::new(StepKind::RecvCopySend, send.src, recv.dst, recv.cnt);
        fused.tb = ti;
        fused.s = recv.s;
        fused.original_index = recv.original_index;
        fused.pred = recv.pred;
        fused.deps = recv.deps.clone();
        fused.send_index = send.send_index;
        fused.recv_index = recv.recv_index;
        fused.recv_peer = recv.peer;
        fused.send_peer = send.peer;
        fused.position_fixed = true;

        let recv_deps = recv.deps.clone();
        let recv_depended_by = recv.depended_by.clone();
        let send_deps = send.deps.clone();
        let send_depended_by = send.depended_by.clone();

        let fused_id = self.alloc_step(fused);

        // steps that depended on the send now depend on the fused step
        for by in &send_depended_by {
            self.repoint_dep(*by, send_id, fused_id);
            self.step_mut(fused_id).depended_by.push(*by);
        }
        // likewise for the receive, except the send being merged away
        for by in &recv_depended_by {
            if *by == send_id {
                continue;
            }
            self.repoint_dep(*by, recv_id, fused_id);
            self.step_mut(fused_id).depended_by.push(*by);
        }
        // the receive's own dependencies now back-reference the fused step
        for dep in &recv_deps {
            let list = &mut self.step_mut(*dep).depended_by;
            if let Some(pos) = list.iter().position(|d| *d == recv_id) {
                list.remove(pos);
            }
            self.step_mut(*dep).depended_by.push(fused_id);
        }
        // the send's dependencies drop their back-reference to it
        for dep in &send_deps {
            let list = &mut self.step_mut(*dep).depended_by;
            if let Some(pos) = list.iter().position(|d| *d == send_id) {
                list.remove(pos);
            }
        }

        let has_dep = !self.step_ref(fused_id).depended_by.is_empty();
        self.step_mut(fused_id).has_dep = has_dep;

        let tb = &mut self.tbs[ti];
        tb.steps.remove(i);
        tb.steps.remove(i - 1);
        tb.steps.insert(i - 1, fused_id);
        self.renumber_from(ti, i - 1);

        log::trace!(
            "GPU {} tb {}: fused recv+send into rcs at position {}",
            self.rank,
            ti,
            i - 1
        );
    }

    fn repoint_dep(&mut self, step: StepId, from: StepId, to: StepId) {
        let deps = &mut self.step_mut(step).deps;
        if let Some(pos) = deps.iter().position(|d| *d == from) {
            deps.remove(pos);
            deps.push(to);
        }
    }

    /// Largest `offset + count` observed per buffer kind across the
    /// final step list, in input/output/scratch order.
    pub(crate) fn buffer_depths(&self) -> [usize; 3] {
        let mut depths = [0usize; 3];
        for tb in &self.tbs {
            for id in &tb.steps {
                let step = self.step_ref(*id);
                for buf in [step.src, step.dst] {
                    if let Some(offset) = buf.offset {
                        let slot = match buf.buf {
                            BufferKind::Input => &mut depths[0],
                            BufferKind::Output => &mut depths[1],
                            BufferKind::Scratch => &mut depths[2],
                        };
                        *slot = (*slot).max(offset + step.cnt);
                    }
                }
            }
        }
        depths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::BufferRef;

    fn chan(id: u32) -> ChannelId {
        ChannelId(id)
    }

    fn copy_step(gpu: &mut Gpu, ti: usize, off: usize, deps: &[StepId]) -> StepId {
        gpu.push_step(
            ti,
            StepKind::Copy,
            BufferRef::new(BufferKind::Input, off),
            BufferRef::new(BufferKind::Output, off),
            1,
            deps,
        )
    }

    #[test]
    fn tb_ids_are_contiguous() {
        let mut gpu = Gpu::new(0);
        let a = gpu.add_tb(ThreadBlock::local(chan(0))).unwrap();
        let b = gpu.add_tb(ThreadBlock::new(Some(1), None, chan(0))).unwrap();
        let c = gpu.add_tb(ThreadBlock::new(None, Some(1), chan(1))).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn duplicate_send_target_on_channel_rejected() {
        let mut gpu = Gpu::new(0);
        gpu.add_tb(ThreadBlock::new(Some(3), None, chan(0))).unwrap();
        let err = gpu
            .add_tb(ThreadBlock::new(Some(3), Some(2), chan(0)))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RoleConflict {
                rank: 0,
                peer: 3,
                role: ConnType::Send,
                ..
            }
        ));
        // same roles on another channel are fine
        gpu.add_tb(ThreadBlock::new(Some(3), None, chan(1))).unwrap();
    }

    #[test]
    fn duplicate_recv_source_on_channel_rejected() {
        let mut gpu = Gpu::new(0);
        gpu.add_tb(ThreadBlock::new(None, Some(2), chan(0))).unwrap();
        let err = gpu
            .add_tb(ThreadBlock::new(Some(1), Some(2), chan(0)))
            .unwrap_err();
        assert!(matches!(err, Error::RoleConflict { role: ConnType::Recv, .. }));
    }

    #[test]
    fn dep_edges_are_mirrored_and_removable() {
        let mut gpu = Gpu::new(0);
        let t0 = gpu.add_tb(ThreadBlock::local(chan(0))).unwrap();
        let t1 = gpu.add_tb(ThreadBlock::local(chan(1))).unwrap();
        let a = copy_step(&mut gpu, t0, 0, &[]);
        let b = copy_step(&mut gpu, t1, 1, &[]);

        gpu.add_dep(b, a).unwrap();
        assert!(gpu.step(a).unwrap().has_dep());
        assert_eq!(gpu.step_ref(a).depended_by, vec![b]);
        assert_eq!(gpu.step_ref(b).deps, vec![a]);

        gpu.remove_dep(b, a);
        assert!(!gpu.step(a).unwrap().has_dep());
        assert!(gpu.step_ref(a).depended_by.is_empty());
        assert!(gpu.step_ref(b).deps.is_empty());
    }

    #[test]
    fn same_tb_dep_rejected_after_creation() {
        let mut gpu = Gpu::new(0);
        let t0 = gpu.add_tb(ThreadBlock::local(chan(0))).unwrap();
        let a = copy_step(&mut gpu, t0, 0, &[]);
        let b = copy_step(&mut gpu, t0, 1, &[]);
        let err = gpu.add_dep(b, a).unwrap_err();
        assert!(matches!(err, Error::SameTbDependency { rank: 0, tb: 0 }));
    }

    #[test]
    fn resolve_single_dep_materializes_pred() {
        let mut gpu = Gpu::new(0);
        let t0 = gpu.add_tb(ThreadBlock::local(chan(0))).unwrap();
        let t1 = gpu.add_tb(ThreadBlock::local(chan(1))).unwrap();
        let a = copy_step(&mut gpu, t0, 0, &[]);
        let b = copy_step(&mut gpu, t1, 1, &[a]);

        gpu.resolve(false).unwrap();
        assert_eq!(gpu.step(b).unwrap().pred(), Some(PredRef { tb: 0, s: 0 }));
        assert_eq!(gpu.step(a).unwrap().pred(), None);
        assert!(gpu.step(a).unwrap().has_dep());
    }

    #[test]
    fn resolve_multi_dep_inserts_nop_joins() {
        let mut gpu = Gpu::new(0);
        let t0 = gpu.add_tb(ThreadBlock::local(chan(0))).unwrap();
        let t1 = gpu.add_tb(ThreadBlock::local(chan(1))).unwrap();
        let t2 = gpu.add_tb(ThreadBlock::local(chan(2))).unwrap();
        let t3 = gpu.add_tb(ThreadBlock::local(chan(3))).unwrap();
        let d0 = copy_step(&mut gpu, t0, 0, &[]);
        let d1 = copy_step(&mut gpu, t1, 1, &[]);
        let d2 = copy_step(&mut gpu, t2, 2, &[]);
        let joined = copy_step(&mut gpu, t3, 3, &[d0, d1, d2]);

        gpu.resolve(false).unwrap();

        // two nops precede the join step, one per dependency except the last
        let steps = gpu.tbs()[t3].steps().to_vec();
        assert_eq!(steps.len(), 3);
        let nop0 = gpu.step(steps[0]).unwrap();
        let nop1 = gpu.step(steps[1]).unwrap();
        assert_eq!(nop0.kind(), StepKind::Nop);
        assert_eq!(nop1.kind(), StepKind::Nop);
        assert_eq!(nop0.pred(), Some(PredRef { tb: 0, s: 0 }));
        assert_eq!(nop1.pred(), Some(PredRef { tb: 1, s: 0 }));
        assert_eq!(steps[2], joined);
        assert_eq!(gpu.step(joined).unwrap().pred(), Some(PredRef { tb: 2, s: 0 }));

        // positions renumbered contiguously
        for (pos, id) in steps.iter().enumerate() {
            assert_eq!(gpu.step(*id).unwrap().position(), pos);
        }
    }

    #[test]
    fn resolve_reports_cycle_as_unresolved() {
        let mut gpu = Gpu::new(0);
        let t0 = gpu.add_tb(ThreadBlock::local(chan(0))).unwrap();
        let t1 = gpu.add_tb(ThreadBlock::local(chan(1))).unwrap();
        let a = copy_step(&mut gpu, t0, 0, &[]);
        let b = copy_step(&mut gpu, t1, 1, &[]);
        gpu.add_dep(a, b).unwrap();
        gpu.add_dep(b, a).unwrap();

        let err = gpu.resolve(false).unwrap_err();
        assert!(matches!(err, Error::Unresolved { rank: 0 }));
    }

    fn relay_recv_send(gpu: &mut Gpu, ti: usize) -> (StepId, StepId) {
        let recv = gpu.push_step(
            ti,
            StepKind::Recv,
            BufferRef::unbound(BufferKind::Input),
            BufferRef::new(BufferKind::Output, 5),
            1,
            &[],
        );
        let send = gpu.push_step(
            ti,
            StepKind::Send,
            BufferRef::new(BufferKind::Output, 5),
            BufferRef::unbound(BufferKind::Output),
            1,
            &[recv],
        );
        (recv, send)
    }

    #[test]
    fn adjacent_recv_send_fuse_on_relay_tb() {
        let mut gpu = Gpu::new(1);
        // relays from rank 0 towards rank 2
        let ti = gpu.add_tb(ThreadBlock::new(Some(2), Some(0), chan(0))).unwrap();
        let (_, send) = relay_recv_send(&mut gpu, ti);

        // a later step in another block waits on the send
        let t1 = gpu.add_tb(ThreadBlock::local(chan(1))).unwrap();
        let waiter = copy_step(&mut gpu, t1, 0, &[send]);

        gpu.resolve(true).unwrap();

        let steps = gpu.tbs()[ti].steps();
        assert_eq!(steps.len(), 1);
        let fused = gpu.step(steps[0]).unwrap();
        assert_eq!(fused.kind(), StepKind::RecvCopySend);
        assert_eq!(fused.position(), 0);
        assert_eq!(fused.src(), BufferRef::new(BufferKind::Output, 5));
        assert_eq!(fused.dst(), BufferRef::new(BufferKind::Output, 5));
        assert!(fused.has_dep());

        // the waiter's edge moved onto the fused step
        assert_eq!(gpu.step_ref(waiter).deps, vec![steps[0]]);
        assert_eq!(
            gpu.step(waiter).unwrap().pred(),
            Some(PredRef { tb: ti, s: 0 })
        );
    }

    #[test]
    fn fusion_skipped_when_buffers_differ() {
        let mut gpu = Gpu::new(1);
        let ti = gpu.add_tb(ThreadBlock::new(Some(2), Some(0), chan(0))).unwrap();
        gpu.push_step(
            ti,
            StepKind::Recv,
            BufferRef::unbound(BufferKind::Input),
            BufferRef::new(BufferKind::Output, 5),
            1,
            &[],
        );
        gpu.push_step(
            ti,
            StepKind::Send,
            BufferRef::new(BufferKind::Output, 6),
            BufferRef::unbound(BufferKind::Output),
            1,
            &[],
        );

        gpu.resolve(true).unwrap();
        assert_eq!(gpu.tbs()[ti].steps().len(), 2);
    }

    #[test]
    fn fusion_skipped_on_single_peer_tb() {
        let mut gpu = Gpu::new(1);
        // alternates with rank 0 on both roles; relaying back is pointless
        let ti = gpu.add_tb(ThreadBlock::new(Some(0), Some(0), chan(0))).unwrap();
        relay_recv_send(&mut gpu, ti);

        gpu.resolve(true).unwrap();
        assert_eq!(gpu.tbs()[ti].steps().len(), 2);
    }

    #[test]
    fn canonical_sort_alternates_send_recv() {
        let mut gpu = Gpu::new(0);
        let ti = gpu.add_tb(ThreadBlock::new(Some(1), Some(1), chan(0))).unwrap();
        let s0 = gpu.push_step(
            ti,
            StepKind::Send,
            BufferRef::new(BufferKind::Output, 0),
            BufferRef::unbound(BufferKind::Output),
            1,
            &[],
        );
        let s1 = gpu.push_step(
            ti,
            StepKind::Send,
            BufferRef::new(BufferKind::Output, 1),
            BufferRef::unbound(BufferKind::Output),
            1,
            &[],
        );
        let r0 = gpu.push_step(
            ti,
            StepKind::Recv,
            BufferRef::unbound(BufferKind::Input),
            BufferRef::new(BufferKind::Output, 2),
            1,
            &[],
        );
        let r1 = gpu.push_step(
            ti,
            StepKind::Recv,
            BufferRef::unbound(BufferKind::Input),
            BufferRef::new(BufferKind::Output, 3),
            1,
            &[],
        );

        gpu.sort_tb_steps();
        assert_eq!(gpu.tbs()[ti].steps(), &[s0, r0, s1, r1]);
        for (pos, id) in gpu.tbs()[ti].steps().to_vec().iter().enumerate() {
            assert_eq!(gpu.step(*id).unwrap().position(), pos);
        }
    }

    #[test]
    fn relay_tb_keeps_creation_order() {
        let mut gpu = Gpu::new(1);
        let ti = gpu.add_tb(ThreadBlock::new(Some(2), Some(0), chan(0))).unwrap();
        let (recv, send) = relay_recv_send(&mut gpu, ti);
        gpu.sort_tb_steps();
        assert_eq!(gpu.tbs()[ti].steps(), &[recv, send]);
    }

    #[test]
    fn buffer_depths_scan_final_steps() {
        let mut gpu = Gpu::new(0);
        let t0 = gpu.add_tb(ThreadBlock::local(chan(0))).unwrap();
        gpu.push_step(
            t0,
            StepKind::Copy,
            BufferRef::new(BufferKind::Input, 3),
            BufferRef::new(BufferKind::Scratch, 7),
            2,
            &[],
        );
        assert_eq!(gpu.buffer_depths(), [5, 0, 9]);
    }
}
