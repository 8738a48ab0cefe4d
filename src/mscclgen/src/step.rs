use std::fmt;

/// Slot index into a GPU's step arena. Slots are never reused; a step
/// removed by fusion simply drops out of thread-block order while its
/// slot keeps the recorded fields readable through stale handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StepId(pub(crate) u32);

impl StepId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Cross-GPU reference to a step: owning rank plus arena slot.
///
/// Every builder operation returns one of these; dependency edges and
/// peer bindings are expressed in terms of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StepHandle {
    pub rank: usize,
    pub(crate) id: StepId,
}

impl StepHandle {
    pub(crate) fn new(rank: usize, id: StepId) -> Self {
        StepHandle { rank, id }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepKind {
    Copy,
    Send,
    Recv,
    RecvCopySend,
    Nop,
}

impl StepKind {
    /// Tag used in the emitted document.
    pub fn tag(self) -> &'static str {
        match self {
            StepKind::Copy => "cpy",
            StepKind::Send => "s",
            StepKind::Recv => "r",
            StepKind::RecvCopySend => "rcs",
            StepKind::Nop => "nop",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Input,
    Output,
    Scratch,
}

impl BufferKind {
    pub fn tag(self) -> &'static str {
        match self {
            BufferKind::Input => "i",
            BufferKind::Output => "o",
            BufferKind::Scratch => "s",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Buffer kind plus element offset. The offset stays unset on the
/// synthetic half of a send/recv until peer binding fills it in, and
/// renders as -1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRef {
    pub buf: BufferKind,
    pub offset: Option<usize>,
}

impl BufferRef {
    pub fn new(buf: BufferKind, offset: usize) -> Self {
        BufferRef {
            buf,
            offset: Some(offset),
        }
    }

    pub(crate) fn unbound(buf: BufferKind) -> Self {
        BufferRef { buf, offset: None }
    }
}

/// Materialized single-predecessor reference: owning thread-block id
/// plus step position within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredRef {
    pub tb: usize,
    pub s: usize,
}

/// One instruction of the emitted program.
///
/// During the build phase a step carries an explicit dependency set
/// (`deps`) and its mirror (`depended_by`); resolution collapses the set
/// into the single `pred` reference the downstream runtime understands.
pub struct Step {
    pub(crate) s: usize,
    pub(crate) kind: StepKind,
    pub(crate) src: BufferRef,
    pub(crate) dst: BufferRef,
    pub(crate) cnt: usize,
    pub(crate) pred: Option<PredRef>,
    pub(crate) has_dep: bool,

    // owning thread-block within the same GPU
    pub(crate) tb: usize,

    pub(crate) deps: Vec<StepId>,
    pub(crate) depended_by: Vec<StepId>,

    pub(crate) peer: Option<StepHandle>,
    // set on fused steps only, inherited from the two merged halves
    pub(crate) recv_peer: Option<StepHandle>,
    pub(crate) send_peer: Option<StepHandle>,

    pub(crate) send_index: Option<usize>,
    pub(crate) recv_index: Option<usize>,

    pub(crate) position_fixed: bool,
    pub(crate) original_index: usize,
}

impl Step {
    pub(crate) fn new(kind: StepKind, src: BufferRef, dst: BufferRef, cnt: usize) -> Self {
        Step {
            s: 0,
            kind,
            src,
            dst,
            cnt,
            pred: None,
            has_dep: false,
            tb: 0,
            deps: Vec::new(),
            depended_by: Vec::new(),
            peer: None,
            recv_peer: None,
            send_peer: None,
            send_index: None,
            recv_index: None,
            position_fixed: false,
            original_index: 0,
        }
    }

    pub(crate) fn nop() -> Self {
        Step::new(
            StepKind::Nop,
            BufferRef::unbound(BufferKind::Input),
            BufferRef::unbound(BufferKind::Output),
            0,
        )
    }

    /// Position within the owning thread-block, renumbered whenever the
    /// block's step order changes.
    pub fn position(&self) -> usize {
        self.s
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn src(&self) -> BufferRef {
        self.src
    }

    pub fn dst(&self) -> BufferRef {
        self.dst
    }

    pub fn count(&self) -> usize {
        self.cnt
    }

    /// Id of the owning thread-block.
    pub fn tb_id(&self) -> usize {
        self.tb
    }

    /// Single predecessor reference, valid only after resolution.
    pub fn pred(&self) -> Option<PredRef> {
        self.pred
    }

    pub fn has_dep(&self) -> bool {
        self.has_dep
    }

    pub fn peer(&self) -> Option<StepHandle> {
        self.peer
    }

    pub fn recv_peer(&self) -> Option<StepHandle> {
        self.recv_peer
    }

    pub fn send_peer(&self) -> Option<StepHandle> {
        self.send_peer
    }

    pub fn send_index(&self) -> Option<usize> {
        self.send_index
    }

    pub fn recv_index(&self) -> Option<usize> {
        self.recv_index
    }
}
