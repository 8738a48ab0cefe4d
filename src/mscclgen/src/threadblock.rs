use std::fmt;

use crate::step::StepId;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_string().as_str())
    }
}

/// Communication role a thread-block claims on its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnType {
    Send,
    Recv,
}

impl fmt::Display for ConnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnType::Send => f.write_str("send"),
            ConnType::Recv => f.write_str("recv"),
        }
    }
}

/// One execution unit of a GPU: an ordered list of steps bound to one
/// channel and fixed send/receive roles.
///
/// Roles are fixed for the block's lifetime. `None` means the role is
/// absent and renders as -1. A block with `send == recv` (both set)
/// alternates send/recv with a single peer; a block with both roles set
/// to different peers relays between them.
pub struct ThreadBlock {
    pub(crate) id: usize,
    pub(crate) send: Option<usize>,
    pub(crate) recv: Option<usize>,
    pub(crate) chan: ChannelId,
    // program order; positions renumber whenever this changes
    pub(crate) steps: Vec<StepId>,
    // number send- and recv-type steps in creation order
    pub(crate) send_index: usize,
    pub(crate) recv_index: usize,
}

impl ThreadBlock {
    pub fn new(send: Option<usize>, recv: Option<usize>, chan: ChannelId) -> Self {
        ThreadBlock {
            id: 0,
            send,
            recv,
            chan,
            steps: Vec::new(),
            send_index: 0,
            recv_index: 0,
        }
    }

    /// Block with no communication role, used for local copies.
    pub fn local(chan: ChannelId) -> Self {
        ThreadBlock::new(None, None, chan)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn send(&self) -> Option<usize> {
        self.send
    }

    pub fn recv(&self) -> Option<usize> {
        self.recv
    }

    pub fn chan(&self) -> ChannelId {
        self.chan
    }

    /// Step slots in program order.
    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }
}
