// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;

use thiserror::Error;

use crate::instruction::{InstructionGraph, InstructionId, Jump, Label};
use crate::lines::CompactLines;
use crate::lookup::ClassCoverageLookup;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum AnalysisError {
    #[error("probe {probe} inserted before any instruction")]
    ProbeWithoutInstruction { probe: u32 },

    #[error("jump to label {label} which never precedes an instruction")]
    UnresolvedLabel { label: Label },

    #[error("instructions builder already finalized")]
    AlreadyFinalized,

    #[error("class {class} is already instrumented")]
    AlreadyInstrumented { class: String },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Building,
    Finalized,
}

#[derive(Clone, Copy, Debug)]
struct ProbeAnchor {
    probe_id: u32,
    instruction: InstructionId,
    branch: u32,
}

/// Builds the control-flow graph of one method from analysis callbacks, then
/// resolves each probe to the source lines its execution implies.
///
/// Callbacks must arrive in bytecode order. `fill_cache()` ends the method.
pub struct CachingInstructionsBuilder<'a> {
    lookup: &'a mut ClassCoverageLookup,
    state: State,
    graph: InstructionGraph,
    current_line: Option<u32>,
    current: Option<InstructionId>,
    pending_labels: Vec<Label>,
    labels: HashMap<Label, InstructionId>,
    jumps: Vec<Jump>,
    probes: Vec<ProbeAnchor>,
}

impl<'a> CachingInstructionsBuilder<'a> {
    pub fn new(lookup: &'a mut ClassCoverageLookup) -> Self {
        Self {
            lookup,
            state: State::Building,
            graph: InstructionGraph::new(),
            current_line: None,
            current: None,
            pending_labels: vec![],
            labels: HashMap::new(),
            jumps: vec![],
            probes: vec![],
        }
    }

    pub fn graph(&self) -> &InstructionGraph {
        &self.graph
    }

    pub fn set_current_line(&mut self, line: Option<u32>) {
        self.current_line = line;
    }

    /// Bind `label` to the next instruction.
    ///
    /// A label which is not a fallthrough successor starts a new flow.
    pub fn add_label(&mut self, label: Label, successor: bool) {
        self.pending_labels.push(label);

        if !successor {
            self.no_successor();
        }
    }

    pub fn add_instruction(&mut self) -> InstructionId {
        let insn = self.graph.push(self.current_line);

        for label in self.pending_labels.drain(..) {
            self.labels.insert(label, insn);
        }

        if let Some(previous) = self.current {
            self.graph.add_branch(previous, insn, 0);
        }

        self.current = Some(insn);

        insn
    }

    /// The next instruction is not reached by falling through.
    pub fn no_successor(&mut self) {
        self.current = None;
    }

    pub fn add_jump(&mut self, target: Label, branch: u32) {
        self.jumps.push(Jump {
            source: self.current,
            target,
            branch,
        });
    }

    /// Attach `probe_id` to `branch` of the current instruction.
    pub fn add_probe(&mut self, probe_id: u32, branch: u32) -> Result<(), AnalysisError> {
        let instruction = self
            .current
            .ok_or(AnalysisError::ProbeWithoutInstruction { probe: probe_id })?;

        self.graph.add_probe_branch(instruction);
        self.probes.push(ProbeAnchor {
            probe_id,
            instruction,
            branch,
        });

        Ok(())
    }

    /// Wire deferred jumps, then register the lines of every probe.
    pub fn fill_cache(&mut self) -> Result<(), AnalysisError> {
        if self.state == State::Finalized {
            return Err(AnalysisError::AlreadyFinalized);
        }
        self.state = State::Finalized;

        for jump in std::mem::take(&mut self.jumps) {
            let source = match jump.source {
                Some(source) => source,
                None => continue,
            };

            let target = *self
                .labels
                .get(&jump.target)
                .ok_or(AnalysisError::UnresolvedLabel { label: jump.target })?;

            self.graph.add_branch(source, target, jump.branch);
        }

        for anchor in &self.probes {
            let lines: CompactLines = self
                .graph
                .predecessors(anchor.instruction)
                .filter_map(|id| self.graph.get(id).line)
                .collect();

            trace!(
                "probe {} (branch {}) covers {:?}",
                anchor.probe_id,
                anchor.branch,
                lines
            );

            self.lookup.add_probe(anchor.probe_id, lines);
        }

        Ok(())
    }
}
