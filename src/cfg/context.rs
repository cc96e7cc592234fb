use crate::ast::ExitKind;
use crate::cfg::BlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    For,
    While,
    Do,
    Repeat,
}

impl LoopKind {
    /// Whether an `EXIT <kind>` targets this loop. `EXIT DO` also exits a
    /// REPEAT loop, which has no EXIT spelling of its own.
    pub fn matches_exit(&self, exit: ExitKind) -> bool {
        matches!(
            (self, exit),
            (LoopKind::For, ExitKind::For)
                | (LoopKind::While, ExitKind::While)
                | (LoopKind::Do, ExitKind::Do)
                | (LoopKind::Repeat, ExitKind::Do)
        )
    }
}

/// One frame of the context chain handed down through recursive CFG
/// construction. Frames carry only block ids, never references.
#[derive(Debug, Clone)]
pub enum ContextFrame {
    Loop {
        /// where CONTINUE goes: the condition/increment block
        header: BlockId,
        exit: BlockId,
        kind: LoopKind,
        /// user-visible counter name, for FOR loops
        var: Option<String>,
    },
    Select {
        exit: BlockId,
    },
    Try {
        catch: BlockId,
    },
    Gosub {
        return_block: BlockId,
    },
}

/// The chain itself: a stack with a single lookup operation, nearest
/// frame of a kind. Builders push a frame around a body and truncate back
/// to their saved depth afterwards.
#[derive(Debug, Clone, Default)]
pub struct ContextChain {
    frames: Vec<ContextFrame>,
}

impl ContextChain {
    pub fn push(&mut self, frame: ContextFrame) {
        self.frames.push(frame);
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Innermost loop frame matching the EXIT kind.
    pub fn nearest_loop_for_exit(&self, exit: ExitKind) -> Option<(BlockId, BlockId)> {
        self.frames.iter().rev().find_map(|f| match f {
            ContextFrame::Loop {
                header,
                exit: exit_id,
                kind,
                ..
            } if kind.matches_exit(exit) => Some((*header, *exit_id)),
            _ => None,
        })
    }

    /// Innermost loop frame of any kind.
    pub fn nearest_loop(&self) -> Option<(BlockId, BlockId)> {
        self.frames.iter().rev().find_map(|f| match f {
            ContextFrame::Loop { header, exit, .. } => Some((*header, *exit)),
            _ => None,
        })
    }

    pub fn nearest_select(&self) -> Option<BlockId> {
        self.frames.iter().rev().find_map(|f| match f {
            ContextFrame::Select { exit } => Some(*exit),
            _ => None,
        })
    }

    pub fn nearest_catch(&self) -> Option<BlockId> {
        self.frames.iter().rev().find_map(|f| match f {
            ContextFrame::Try { catch } => Some(*catch),
            _ => None,
        })
    }

    pub fn nearest_gosub_return(&self) -> Option<BlockId> {
        self.frames.iter().rev().find_map(|f| match f {
            ContextFrame::Gosub { return_block } => Some(*return_block),
            _ => None,
        })
    }
}
