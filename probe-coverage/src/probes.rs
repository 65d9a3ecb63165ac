// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Probe placement.
//!
//! Replays a class into a `ClassProbesVisitor`, assigning probe ids at the
//! same places and in the same order as JaCoCo's instrumentation, so that ids
//! line up with the boolean arrays of recorded execution data.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result};

use crate::analyzer::{ClassProbesVisitor, MethodHeader, MethodProbesVisitor, SwitchTarget};
use crate::builder::AnalysisError;
use crate::classfile::{ClassFile, Code, Insn, InsnKind};
use crate::instruction::Label;

/// Replay `class` into `visitor`, placing probes.
pub fn accept(class: &ClassFile, class_id: u64, visitor: &mut dyn ClassProbesVisitor) -> Result<()> {
    visitor.visit_class(&class.name, class_id);
    visitor.visit_source(class.source_file.as_deref(), class.source_debug.as_deref());

    let mut ids = ProbeIds::default();

    for method in &class.methods {
        let header = MethodHeader {
            access: method.access,
            name: &method.name,
            descriptor: &method.descriptor,
        };

        let body = match &method.code {
            Some(code) => Some(MethodBody::new(code).with_context(|| {
                format!(
                    "unable to decode {}.{}{}",
                    class.name, method.name, method.descriptor
                )
            })?),
            None => None,
        };

        if method.is_synthetic() || method.is_bridge() {
            trace!(
                "analyzing generated method {}.{}{}",
                class.name,
                method.name,
                method.descriptor
            );
        }

        let mut method_visitor: Box<dyn MethodProbesVisitor + '_> =
            match visitor.visit_method(&header)? {
                Some(method_visitor) => method_visitor,
                None => Box::new(NoopMethodProbes),
            };

        if let Some(body) = &body {
            let flow = LabelFlow::analyze(body);
            replay(body, &flow, &mut ids, method_visitor.as_mut())?;
        }

        method_visitor.visit_end()?;
    }

    visitor.visit_total_probe_count(ids.count());

    Ok(())
}

/// Consecutive probe ids for one class.
#[derive(Default)]
struct ProbeIds {
    next: u32,
}

impl ProbeIds {
    fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    fn count(&self) -> u32 {
        self.next
    }
}

enum Event<'a> {
    Label(Label),
    Line { line: u32, start: Label },
    Insn(&'a Insn),
}

/// Linear view of a method body: at each offset, its label, then its line
/// numbers, then the instruction.
struct MethodBody {
    insns: Vec<Insn>,
    labels: BTreeMap<u32, Label>,
    lines: BTreeMap<u32, Vec<u32>>,
    handlers: Vec<(Label, Label)>,
    end: u32,
}

impl MethodBody {
    fn new(code: &Code) -> Result<Self> {
        let insns = code.instructions()?;
        let end = code.bytecode.len() as u32;
        let starts: BTreeSet<u32> = insns.iter().map(|i| i.offset).collect();

        let mut offsets = BTreeSet::new();

        for (insn, next) in insns.iter().zip(insns.iter().skip(1)) {
            offsets.extend(insn.kind.targets());

            // Code after an unconditional transfer starts a stack map frame.
            if !insn.kind.falls_through() {
                offsets.insert(next.offset);
            }
        }

        if let Some(last) = insns.last() {
            offsets.extend(last.kind.targets());
        }

        for handler in &code.exception_table {
            offsets.insert(handler.start_pc as u32);
            offsets.insert(handler.end_pc as u32);
            offsets.insert(handler.handler_pc as u32);
        }

        let mut lines: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

        for entry in &code.line_numbers {
            let offset = entry.start_pc as u32;

            // Entries pointing outside the code are dropped, as ASM does.
            if starts.contains(&offset) {
                offsets.insert(offset);
                lines.entry(offset).or_default().push(entry.line as u32);
            }
        }

        let labels: BTreeMap<u32, Label> = offsets
            .into_iter()
            .filter(|offset| starts.contains(offset) || *offset == end)
            .enumerate()
            .map(|(index, offset)| (offset, Label(index as u32)))
            .collect();

        let mut handlers = vec![];

        for handler in &code.exception_table {
            let start = labels.get(&(handler.start_pc as u32));
            let target = labels.get(&(handler.handler_pc as u32));

            if let (Some(start), Some(target)) = (start, target) {
                handlers.push((*start, *target));
            }
        }

        Ok(Self {
            insns,
            labels,
            lines,
            handlers,
            end,
        })
    }

    fn label(&self, offset: u32) -> Label {
        // Every branch target was given a label in `new()`.
        self.labels[&offset]
    }

    fn events(&self) -> Vec<Event<'_>> {
        let mut events = vec![];

        for insn in &self.insns {
            if let Some(label) = self.labels.get(&insn.offset) {
                events.push(Event::Label(*label));

                for line in self.lines.get(&insn.offset).into_iter().flatten() {
                    events.push(Event::Line {
                        line: *line,
                        start: *label,
                    });
                }
            }

            events.push(Event::Insn(insn));
        }

        if let Some(label) = self.labels.get(&self.end) {
            events.push(Event::Label(*label));
        }

        events
    }
}

/// Distinct switch targets, default first.
fn distinct_targets(default: Label, targets: &[Label]) -> Vec<Label> {
    let mut seen = HashSet::new();

    std::iter::once(default)
        .chain(targets.iter().copied())
        .filter(|label| seen.insert(*label))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct LabelInfo {
    target: bool,
    successor: bool,
    multi_target: bool,
    method_invocation_line: bool,
}

impl LabelInfo {
    fn set_target(&mut self) {
        if self.target || self.successor {
            self.multi_target = true;
        } else {
            self.target = true;
        }
    }

    fn set_successor(&mut self) {
        self.successor = true;

        if self.target {
            self.multi_target = true;
        }
    }

    fn needs_probe(&self) -> bool {
        self.successor && (self.multi_target || self.method_invocation_line)
    }
}

/// Control-flow facts about the labels of one method.
struct LabelFlow {
    infos: HashMap<Label, LabelInfo>,
}

impl LabelFlow {
    fn analyze(body: &MethodBody) -> Self {
        let mut infos: HashMap<Label, LabelInfo> = HashMap::new();

        // Handlers are visited in reverse table order.
        for (start, handler) in body.handlers.iter().rev() {
            infos.entry(*start).or_default().set_target();
            infos.entry(*handler).or_default().set_target();
        }

        let mut successor = false;
        let mut first = true;
        let mut line_start = None;

        for event in body.events() {
            match event {
                Event::Label(label) => {
                    let info = infos.entry(label).or_default();

                    if first {
                        info.set_target();
                    }

                    if successor {
                        info.set_successor();
                    }
                }
                Event::Line { start, .. } => {
                    line_start = Some(start);
                }
                Event::Insn(insn) => {
                    match &insn.kind {
                        InsnKind::Jump { target } => {
                            infos.entry(body.label(*target)).or_default().set_target();
                            successor = true;
                        }
                        InsnKind::Goto { target } => {
                            infos.entry(body.label(*target)).or_default().set_target();
                            successor = false;
                        }
                        InsnKind::Switch { default, targets } => {
                            let targets: Vec<_> =
                                targets.iter().map(|offset| body.label(*offset)).collect();

                            for label in distinct_targets(body.label(*default), &targets) {
                                infos.entry(label).or_default().set_target();
                            }

                            successor = false;
                        }
                        InsnKind::Return | InsnKind::Throw => {
                            successor = false;
                        }
                        InsnKind::Invoke => {
                            if let Some(start) = line_start {
                                infos.entry(start).or_default().method_invocation_line = true;
                            }

                            successor = true;
                        }
                        InsnKind::Plain => {
                            successor = true;
                        }
                    }

                    first = false;
                }
            }
        }

        Self { infos }
    }

    fn info(&self, label: Label) -> LabelInfo {
        self.infos.get(&label).copied().unwrap_or_default()
    }
}

fn replay(
    body: &MethodBody,
    flow: &LabelFlow,
    ids: &mut ProbeIds,
    visitor: &mut dyn MethodProbesVisitor,
) -> Result<(), AnalysisError> {
    for event in body.events() {
        match event {
            Event::Label(label) => {
                let info = flow.info(label);

                if info.needs_probe() {
                    visitor.visit_probe(ids.next_id())?;
                }

                visitor.visit_label(label, info.successor);
            }
            Event::Line { line, .. } => {
                visitor.visit_line_number(line);
            }
            Event::Insn(insn) => match &insn.kind {
                InsnKind::Return | InsnKind::Throw => {
                    visitor.visit_insn_with_probe(insn.opcode, ids.next_id())?;
                }
                InsnKind::Plain | InsnKind::Invoke => {
                    visitor.visit_insn(insn.opcode);
                }
                InsnKind::Jump { target } | InsnKind::Goto { target } => {
                    let label = body.label(*target);

                    if flow.info(label).multi_target {
                        visitor.visit_jump_insn_with_probe(insn.opcode, label, ids.next_id())?;
                    } else {
                        visitor.visit_jump_insn(insn.opcode, label);
                    }
                }
                InsnKind::Switch { default, targets } => {
                    let default = body.label(*default);
                    let targets: Vec<_> = targets.iter().map(|offset| body.label(*offset)).collect();

                    replay_switch(insn.opcode, default, &targets, flow, ids, visitor)?;
                }
            },
        }
    }

    Ok(())
}

fn replay_switch(
    opcode: u8,
    default: Label,
    targets: &[Label],
    flow: &LabelFlow,
    ids: &mut ProbeIds,
    visitor: &mut dyn MethodProbesVisitor,
) -> Result<(), AnalysisError> {
    let mut probes = HashMap::new();

    for label in distinct_targets(default, targets) {
        if flow.info(label).multi_target {
            probes.insert(label, ids.next_id());
        }
    }

    if probes.is_empty() {
        visitor.visit_switch_insn(opcode, default, targets);
        return Ok(());
    }

    let with_probe = |label: Label| SwitchTarget {
        label,
        probe: probes.get(&label).copied(),
    };

    let targets: Vec<_> = targets.iter().map(|label| with_probe(*label)).collect();
    visitor.visit_switch_insn_with_probes(opcode, with_probe(default), &targets)
}

/// Stands in for skipped methods, so that their probes still consume ids.
struct NoopMethodProbes;

impl MethodProbesVisitor for NoopMethodProbes {
    fn visit_label(&mut self, _label: Label, _successor: bool) {}

    fn visit_line_number(&mut self, _line: u32) {}

    fn visit_insn(&mut self, _opcode: u8) {}

    fn visit_jump_insn(&mut self, _opcode: u8, _target: Label) {}

    fn visit_switch_insn(&mut self, _opcode: u8, _default: Label, _targets: &[Label]) {}

    fn visit_probe(&mut self, _probe_id: u32) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn visit_insn_with_probe(&mut self, _opcode: u8, _probe_id: u32) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn visit_jump_insn_with_probe(
        &mut self,
        _opcode: u8,
        _target: Label,
        _probe_id: u32,
    ) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn visit_switch_insn_with_probes(
        &mut self,
        _opcode: u8,
        _default: SwitchTarget,
        _targets: &[SwitchTarget],
    ) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), AnalysisError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
