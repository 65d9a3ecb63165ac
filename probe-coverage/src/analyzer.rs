// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashSet;

use anyhow::Result;

use crate::builder::{AnalysisError, CachingInstructionsBuilder};
use crate::classfile::ClassFile;
use crate::crc64;
use crate::instruction::Label;
use crate::lookup::ClassCoverageLookup;
use crate::probes;

const INSTRUMENTED_METHOD: &str = "$jacocoInit";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MethodHeader<'a> {
    pub access: u16,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Receives a class in the order probe placement replays it.
pub trait ClassProbesVisitor {
    fn visit_class(&mut self, _name: &str, _id: u64) {}

    fn visit_source(&mut self, _source: Option<&str>, _debug: Option<&str>) {}

    /// Returns `None` to skip the method. Its probes still consume ids.
    fn visit_method(
        &mut self,
        method: &MethodHeader,
    ) -> Result<Option<Box<dyn MethodProbesVisitor + '_>>, AnalysisError>;

    fn visit_total_probe_count(&mut self, _count: u32) {}
}

/// Switch target, with the probe which replaces its jump, if any.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SwitchTarget {
    pub label: Label,
    pub probe: Option<u32>,
}

/// Receives one method body, with probes placed.
///
/// `successor` on a label is `true` if control can fall through into it.
pub trait MethodProbesVisitor {
    fn visit_label(&mut self, label: Label, successor: bool);

    fn visit_line_number(&mut self, line: u32);

    fn visit_insn(&mut self, opcode: u8);

    fn visit_jump_insn(&mut self, opcode: u8, target: Label);

    fn visit_switch_insn(&mut self, opcode: u8, default: Label, targets: &[Label]);

    fn visit_probe(&mut self, probe_id: u32) -> Result<(), AnalysisError>;

    fn visit_insn_with_probe(&mut self, opcode: u8, probe_id: u32) -> Result<(), AnalysisError>;

    fn visit_jump_insn_with_probe(
        &mut self,
        opcode: u8,
        target: Label,
        probe_id: u32,
    ) -> Result<(), AnalysisError>;

    fn visit_switch_insn_with_probes(
        &mut self,
        opcode: u8,
        default: SwitchTarget,
        targets: &[SwitchTarget],
    ) -> Result<(), AnalysisError>;

    fn visit_end(&mut self) -> Result<(), AnalysisError>;
}

/// Feeds one method into a `CachingInstructionsBuilder`.
pub struct MethodAnalyzer<'a> {
    builder: CachingInstructionsBuilder<'a>,
}

impl<'a> MethodAnalyzer<'a> {
    pub fn new(builder: CachingInstructionsBuilder<'a>) -> Self {
        Self { builder }
    }

    fn visit_switch_target(
        &mut self,
        target: &SwitchTarget,
        branch: u32,
        done: &mut HashSet<Label>,
    ) -> Result<(), AnalysisError> {
        if done.insert(target.label) {
            match target.probe {
                Some(probe_id) => self.builder.add_probe(probe_id, branch)?,
                None => self.builder.add_jump(target.label, branch),
            }
        }

        Ok(())
    }
}

impl<'a> MethodProbesVisitor for MethodAnalyzer<'a> {
    fn visit_label(&mut self, label: Label, successor: bool) {
        self.builder.add_label(label, successor);
    }

    fn visit_line_number(&mut self, line: u32) {
        self.builder.set_current_line(Some(line));
    }

    fn visit_insn(&mut self, _opcode: u8) {
        self.builder.add_instruction();
    }

    fn visit_jump_insn(&mut self, _opcode: u8, target: Label) {
        self.builder.add_instruction();
        self.builder.add_jump(target, 1);
    }

    fn visit_switch_insn(&mut self, _opcode: u8, default: Label, targets: &[Label]) {
        self.builder.add_instruction();

        let mut branch = 0;
        self.builder.add_jump(default, branch);

        let mut done = HashSet::new();
        done.insert(default);

        for target in targets {
            if done.insert(*target) {
                branch += 1;
                self.builder.add_jump(*target, branch);
            }
        }
    }

    fn visit_probe(&mut self, probe_id: u32) -> Result<(), AnalysisError> {
        self.builder.add_probe(probe_id, 0)?;
        self.builder.no_successor();
        Ok(())
    }

    fn visit_insn_with_probe(&mut self, _opcode: u8, probe_id: u32) -> Result<(), AnalysisError> {
        self.builder.add_instruction();
        self.builder.add_probe(probe_id, 0)
    }

    fn visit_jump_insn_with_probe(
        &mut self,
        _opcode: u8,
        _target: Label,
        probe_id: u32,
    ) -> Result<(), AnalysisError> {
        self.builder.add_instruction();
        self.builder.add_probe(probe_id, 1)
    }

    fn visit_switch_insn_with_probes(
        &mut self,
        _opcode: u8,
        default: SwitchTarget,
        targets: &[SwitchTarget],
    ) -> Result<(), AnalysisError> {
        self.builder.add_instruction();

        let mut done = HashSet::new();
        self.visit_switch_target(&default, 0, &mut done)?;

        for (index, target) in targets.iter().enumerate() {
            self.visit_switch_target(target, index as u32 + 1, &mut done)?;
        }

        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), AnalysisError> {
        self.builder.fill_cache()
    }
}

/// Builds the `ClassCoverageLookup` of one class.
pub struct CachingClassAnalyzer {
    lookup: ClassCoverageLookup,
}

impl CachingClassAnalyzer {
    pub fn new(class_id: u64, class_name: impl Into<String>) -> Self {
        Self {
            lookup: ClassCoverageLookup::new(class_name, class_id),
        }
    }

    pub fn into_lookup(self) -> ClassCoverageLookup {
        self.lookup
    }
}

impl ClassProbesVisitor for CachingClassAnalyzer {
    fn visit_source(&mut self, source: Option<&str>, _debug: Option<&str>) {
        if let Some(source) = source {
            self.lookup.set_source_file_name(source);
        }
    }

    fn visit_method(
        &mut self,
        method: &MethodHeader,
    ) -> Result<Option<Box<dyn MethodProbesVisitor + '_>>, AnalysisError> {
        if method.name == INSTRUMENTED_METHOD {
            return Err(AnalysisError::AlreadyInstrumented {
                class: self.lookup.class_name().to_owned(),
            });
        }

        let builder = CachingInstructionsBuilder::new(&mut self.lookup);
        Ok(Some(Box::new(MethodAnalyzer::new(builder))))
    }

    fn visit_total_probe_count(&mut self, count: u32) {
        self.lookup.set_total_probe_count(count);
    }
}

/// Analyze raw class-file bytes.
pub fn analyze_class(data: &[u8]) -> Result<ClassCoverageLookup> {
    let class = ClassFile::parse(data)?;
    analyze_parsed(crc64::class_id(data), &class)
}

/// Analyze a parsed class whose id is already known.
pub fn analyze_parsed(class_id: u64, class: &ClassFile) -> Result<ClassCoverageLookup> {
    if class.is_instrumented() {
        return Err(AnalysisError::AlreadyInstrumented {
            class: class.name.clone(),
        }
        .into());
    }

    let mut analyzer = CachingClassAnalyzer::new(class_id, class.name.as_str());
    probes::accept(class, class_id, &mut analyzer)?;

    Ok(analyzer.into_lookup())
}
