// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Owned control-flow model of a single method's bytecode.
//!
//! Instructions live in an arena for the duration of one method analysis.
//! Each instruction keeps a single back-link to the most recent instruction
//! that branched to it, mirroring the line-attribution model of JaCoCo.

use std::fmt;

use fixedbitset::FixedBitSet;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstructionId(usize);

impl InstructionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Method-scoped jump target.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Instruction {
    /// Source line, or `None` if the method has no line debug info here.
    pub line: Option<u32>,

    /// Number of outgoing branches, including probed ones.
    pub branches: u32,

    /// Most recent instruction which added a branch to this one.
    pub predecessor: Option<InstructionId>,

    /// Branch index of `predecessor` that leads here.
    pub predecessor_branch: u32,
}

/// Edge to a label whose instruction may not exist yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Jump {
    pub source: Option<InstructionId>,
    pub target: Label,
    pub branch: u32,
}

#[derive(Clone, Debug, Default)]
pub struct InstructionGraph {
    instructions: Vec<Instruction>,
}

impl InstructionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: Option<u32>) -> InstructionId {
        let id = InstructionId(self.instructions.len());

        self.instructions.push(Instruction {
            line,
            ..Instruction::default()
        });

        id
    }

    pub fn get(&self, id: InstructionId) -> &Instruction {
        // Ids are only minted by `push()` on this graph.
        &self.instructions[id.0]
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Add a control-flow edge, making `source` the predecessor of `target`.
    pub fn add_branch(&mut self, source: InstructionId, target: InstructionId, branch: u32) {
        self.instructions[source.0].branches += 1;

        let target = &mut self.instructions[target.0];
        target.predecessor = Some(source);
        target.predecessor_branch = branch;
    }

    /// Count a probed branch of `source`, which leads to no instruction.
    pub fn add_probe_branch(&mut self, source: InstructionId) {
        self.instructions[source.0].branches += 1;
    }

    /// Walk back-links starting at (and including) `id`.
    pub fn predecessors(&self, id: InstructionId) -> Predecessors<'_> {
        Predecessors {
            graph: self,
            next: Some(id),
            visited: FixedBitSet::with_capacity(self.len()),
        }
    }
}

/// Iterator over a predecessor chain.
///
/// Back-edges of loops can close the chain into a cycle, so every
/// instruction is yielded at most once.
pub struct Predecessors<'a> {
    graph: &'a InstructionGraph,
    next: Option<InstructionId>,
    visited: FixedBitSet,
}

impl<'a> Iterator for Predecessors<'a> {
    type Item = InstructionId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;

        if self.visited.put(id.0) {
            return None;
        }

        self.next = self.graph.get(id).predecessor;

        Some(id)
    }
}
