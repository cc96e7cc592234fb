pub mod builder;
pub mod context;
pub mod dump;

use std::rc::Rc;

use indexmap::IndexMap;
use strum::Display;
use thiserror::Error;

use crate::ast::Statement;
use crate::diagnostics::SourceLoc;
use crate::types::TypeDescriptor;

pub type BlockId = usize;

/// Edge classification. The label (`"true"`, `"false"`, `"case_3"`, ...)
/// is only consulted at emission time to pick branch arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EdgeKind {
    Fallthrough,
    Conditional,
    Unconditional,
    Jump,
    Call,
    Return,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
    pub label: String,
}

/// Arena-allocated basic block. Blocks never hold pointers to each other;
/// all linkage is through ids into the graph's block vector.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    pub statements: Vec<Rc<Statement>>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    pub is_loop_header: bool,
    pub is_loop_exit: bool,
    pub is_subroutine: bool,
    /// last statement transfers control unconditionally
    pub is_terminator: bool,
}

impl BasicBlock {
    pub fn first_line(&self) -> Option<SourceLoc> {
        self.statements.first().map(|s| s.loc)
    }
}

/// Signature carried by procedure CFGs; the program-level CFG has none.
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub name: String,
    pub return_type: TypeDescriptor,
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub name: String,
    pub entry: BlockId,
    pub exit: BlockId,
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<Edge>,
    /// BASIC line number -> block beginning that line's statement
    pub line_index: IndexMap<u32, BlockId>,
    /// named label -> block
    pub label_index: IndexMap<String, BlockId>,
    /// blocks GOSUBs return into, in creation order; RETURN dispatches
    /// over these
    pub gosub_return_points: Vec<BlockId>,
    /// catch landing blocks with their optional error variable
    pub catch_blocks: Vec<(BlockId, Option<String>)>,
    pub function: Option<FunctionMeta>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CfgError {
    #[error("{loc}: jump target {target} does not exist")]
    UnresolvedTarget { loc: SourceLoc, target: String },
    #[error("{loc}: EXIT {kind} outside of a matching {kind}")]
    ExitOutsideContext { loc: SourceLoc, kind: String },
    #[error("{loc}: CONTINUE outside of a loop")]
    ContinueOutsideLoop { loc: SourceLoc },
}

impl ControlFlowGraph {
    pub fn new(name: impl Into<String>, function: Option<FunctionMeta>) -> Self {
        let mut graph = ControlFlowGraph {
            name: name.into(),
            entry: 0,
            exit: 0,
            blocks: Vec::new(),
            edges: Vec::new(),
            line_index: IndexMap::new(),
            label_index: IndexMap::new(),
            gosub_return_points: Vec::new(),
            catch_blocks: Vec::new(),
            function,
        };
        graph.entry = graph.new_block("entry");
        graph.exit = graph.new_block("exit");
        graph
    }

    pub fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock {
            id,
            label: format!("{}_{}", label.into(), id),
            ..BasicBlock::default()
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// Inserts an edge and keeps both adjacency lists in sync.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind, label: &str) {
        self.edges.push(Edge {
            from,
            to,
            kind,
            label: label.to_string(),
        });
        if !self.blocks[from].successors.contains(&to) {
            self.blocks[from].successors.push(to);
        }
        if !self.blocks[to].predecessors.contains(&from) {
            self.blocks[to].predecessors.push(from);
        }
    }

    pub fn edges_from(&self, id: BlockId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// First outgoing edge carrying the given label.
    pub fn edge_labeled(&self, id: BlockId, label: &str) -> Option<&Edge> {
        self.edges_from(id).find(|e| e.label == label)
    }

    /// Reverse postorder from the entry block; unreachable blocks are
    /// appended afterwards in id order so every block is emitted exactly
    /// once.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        self.postorder_visit(self.entry, &mut visited, &mut postorder);
        postorder.reverse();
        for block in &self.blocks {
            if !visited[block.id] {
                postorder.push(block.id);
            }
        }
        postorder
    }

    fn postorder_visit(&self, id: BlockId, visited: &mut [bool], out: &mut Vec<BlockId>) {
        if visited[id] {
            return;
        }
        visited[id] = true;
        for succ in self.blocks[id].successors.clone() {
            self.postorder_visit(succ, visited, out);
        }
        out.push(id);
    }

    /// Depth-first back-edge discovery; targets of back edges become loop
    /// headers. Also catches cycles built by the structured builders whose
    /// block ids do not follow a strict source ordering.
    pub fn mark_loop_headers(&mut self) {
        // fast path: a jump backwards in allocation order
        let back_targets: Vec<BlockId> = self
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Unconditional && e.to < e.from)
            .map(|e| e.to)
            .collect();
        for id in back_targets {
            self.blocks[id].is_loop_header = true;
        }
        // full pass: DFS coloring from entry
        let mut state = vec![0u8; self.blocks.len()];
        let mut stack = vec![(self.entry, 0usize)];
        state[self.entry] = 1;
        while let Some((id, next)) = stack.pop() {
            let succs = self.blocks[id].successors.clone();
            if next < succs.len() {
                stack.push((id, next + 1));
                let succ = succs[next];
                match state[succ] {
                    0 => {
                        state[succ] = 1;
                        stack.push((succ, 0));
                    }
                    1 => self.blocks[succ].is_loop_header = true,
                    _ => {}
                }
            } else {
                state[id] = 2;
            }
        }
    }

    /// Flags every block entered through a Call edge.
    pub fn mark_subroutines(&mut self) {
        let targets: Vec<BlockId> = self
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Call)
            .map(|e| e.to)
            .collect();
        for id in targets {
            self.blocks[id].is_subroutine = true;
        }
    }

    /// Structural soundness check used by tests: adjacency lists must
    /// mirror the edge list exactly.
    pub fn validate(&self) -> bool {
        for edge in &self.edges {
            if !self.blocks[edge.from].successors.contains(&edge.to) {
                return false;
            }
            if !self.blocks[edge.to].predecessors.contains(&edge.from) {
                return false;
            }
        }
        for block in &self.blocks {
            for succ in &block.successors {
                if !self.edges.iter().any(|e| e.from == block.id && e.to == *succ) {
                    return false;
                }
            }
            for pred in &block.predecessors {
                if !self.edges.iter().any(|e| e.to == block.id && e.from == *pred) {
                    return false;
                }
            }
        }
        true
    }
}
