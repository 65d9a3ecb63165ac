// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashSet;

use anyhow::Result;
use pretty_assertions::assert_eq;

use super::*;
use crate::fixture::{
    branching_method, fallthrough_switch, try_catch, ClassBuilder, CodeDef, ACC_STATIC,
};

#[derive(Default)]
struct Recorder {
    source: Option<String>,
    skip: HashSet<String>,
    events: Vec<String>,
    total: Option<u32>,
}

impl ClassProbesVisitor for Recorder {
    fn visit_source(&mut self, source: Option<&str>, _debug: Option<&str>) {
        self.source = source.map(str::to_owned);
    }

    fn visit_method(
        &mut self,
        method: &MethodHeader,
    ) -> Result<Option<Box<dyn MethodProbesVisitor + '_>>, AnalysisError> {
        if self.skip.contains(method.name) {
            return Ok(None);
        }

        self.events.push(format!("method {}", method.name));

        Ok(Some(Box::new(MethodRecorder {
            events: &mut self.events,
        })))
    }

    fn visit_total_probe_count(&mut self, count: u32) {
        self.total = Some(count);
    }
}

struct MethodRecorder<'a> {
    events: &'a mut Vec<String>,
}

impl<'a> MethodProbesVisitor for MethodRecorder<'a> {
    fn visit_label(&mut self, label: Label, successor: bool) {
        if successor {
            self.events.push(format!("{}", label));
        } else {
            self.events.push(format!("{} (entry)", label));
        }
    }

    fn visit_line_number(&mut self, line: u32) {
        self.events.push(format!("line {}", line));
    }

    fn visit_insn(&mut self, opcode: u8) {
        self.events.push(format!("insn {:02x}", opcode));
    }

    fn visit_jump_insn(&mut self, opcode: u8, target: Label) {
        self.events.push(format!("jump {:02x} {}", opcode, target));
    }

    fn visit_switch_insn(&mut self, opcode: u8, default: Label, targets: &[Label]) {
        let targets: Vec<_> = targets.iter().map(|l| l.to_string()).collect();
        self.events.push(format!(
            "switch {:02x} {} [{}]",
            opcode,
            default,
            targets.join(", ")
        ));
    }

    fn visit_probe(&mut self, probe_id: u32) -> Result<(), AnalysisError> {
        self.events.push(format!("probe {}", probe_id));
        Ok(())
    }

    fn visit_insn_with_probe(&mut self, opcode: u8, probe_id: u32) -> Result<(), AnalysisError> {
        self.events
            .push(format!("insn {:02x} probe {}", opcode, probe_id));
        Ok(())
    }

    fn visit_jump_insn_with_probe(
        &mut self,
        opcode: u8,
        target: Label,
        probe_id: u32,
    ) -> Result<(), AnalysisError> {
        self.events
            .push(format!("jump {:02x} {} probe {}", opcode, target, probe_id));
        Ok(())
    }

    fn visit_switch_insn_with_probes(
        &mut self,
        opcode: u8,
        default: SwitchTarget,
        targets: &[SwitchTarget],
    ) -> Result<(), AnalysisError> {
        let show = |target: &SwitchTarget| match target.probe {
            Some(probe) => format!("{} probe {}", target.label, probe),
            None => target.label.to_string(),
        };

        let targets: Vec<_> = targets.iter().map(show).collect();
        self.events.push(format!(
            "switch {:02x} {} [{}]",
            opcode,
            show(&default),
            targets.join(", ")
        ));
        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), AnalysisError> {
        self.events.push("end".to_owned());
        Ok(())
    }
}

fn record(data: &[u8], skip: &[&str]) -> Result<Recorder> {
    let class = ClassFile::parse(data)?;

    let mut recorder = Recorder {
        skip: skip.iter().map(|s| s.to_string()).collect(),
        ..Recorder::default()
    };

    accept(&class, 0, &mut recorder)?;

    Ok(recorder)
}

macro_rules! events {
    ( $( $event: expr ),* $(,)? ) => {
        vec![ $( $event.to_string(), )* ]
    }
}

#[test]
fn test_straight_line_method_has_one_probe() -> Result<()> {
    let code = CodeDef::new(vec![
        0x03, // 0: iconst_0
        0x3b, // 1: istore_0
        0xb1, // 2: return
    ])
    .line(0, 5);

    let data = ClassBuilder::new("A")
        .source_file("A.java")
        .method(ACC_STATIC, "m", "()V", code)
        .build();
    let recorder = record(&data, &[])?;

    assert_eq!(recorder.source.as_deref(), Some("A.java"));
    assert_eq!(recorder.total, Some(1));
    assert_eq!(
        recorder.events,
        events![
            "method m",
            "L0 (entry)",
            "line 5",
            "insn 03",
            "insn 3b",
            "insn b1 probe 0",
            "end",
        ]
    );

    Ok(())
}

#[test]
fn test_branch_with_calls() -> Result<()> {
    let data = ClassBuilder::new("A")
        .method(ACC_STATIC, "m", "(Z)V", branching_method())
        .build();
    let recorder = record(&data, &[])?;

    assert_eq!(recorder.total, Some(4));
    assert_eq!(
        recorder.events,
        events![
            "method m",
            "L0 (entry)",
            "line 10",
            "insn 1a",
            "jump 99 L2 probe 0",
            "probe 1",
            "L1",
            "line 11",
            "insn b8",
            "probe 2",
            "L2",
            "line 12",
            "insn b8",
            "insn b1 probe 3",
            "end",
        ]
    );

    Ok(())
}

#[test]
fn test_ids_are_consecutive_across_methods() -> Result<()> {
    let data = ClassBuilder::new("A")
        .method(ACC_STATIC, "skipped", "(Z)V", branching_method())
        .method(0x0401, "abstractMethod", "()V", None)
        .method(ACC_STATIC, "m", "(Z)V", branching_method())
        .build();
    let recorder = record(&data, &["skipped"])?;

    assert_eq!(recorder.total, Some(8));

    let probes: Vec<_> = recorder
        .events
        .iter()
        .filter(|e| e.contains("probe") || e.starts_with("method") || *e == "end")
        .cloned()
        .collect();

    assert_eq!(
        probes,
        events![
            "method abstractMethod",
            "end",
            "method m",
            "jump 99 L2 probe 4",
            "probe 5",
            "probe 6",
            "insn b1 probe 7",
            "end",
        ]
    );

    Ok(())
}

#[test]
fn test_loop_back_edge() -> Result<()> {
    let code = CodeDef::new(vec![
        0x84, 0x00, 0x01, // 0: iinc 0 1
        0xa7, 0xff, 0xfd, // 3: goto 0
    ])
    .line(0, 3);

    let data = ClassBuilder::new("A").method(ACC_STATIC, "spin", "()V", code).build();
    let recorder = record(&data, &[])?;

    assert_eq!(recorder.total, Some(1));
    assert_eq!(
        recorder.events,
        events![
            "method spin",
            "L0 (entry)",
            "line 3",
            "insn 84",
            "jump a7 L0 probe 0",
            "end",
        ]
    );

    Ok(())
}

#[test]
fn test_switch_with_probes() -> Result<()> {
    let data = ClassBuilder::new("A")
        .method(ACC_STATIC, "s", "(I)V", fallthrough_switch())
        .build();
    let recorder = record(&data, &[])?;

    assert_eq!(recorder.total, Some(5));
    assert_eq!(
        recorder.events,
        events![
            "method s",
            "L0 (entry)",
            "line 1",
            "insn 1a",
            "switch ab L3 probe 0 [L1, L2 probe 1]",
            "L1 (entry)",
            "line 2",
            "insn b8",
            "probe 2",
            "L2",
            "line 3",
            "insn b8",
            "probe 3",
            "L3",
            "line 4",
            "insn b1 probe 4",
            "end",
        ]
    );

    Ok(())
}

#[test]
fn test_switch_without_probes() -> Result<()> {
    let code = CodeDef::new(vec![
        0x1a, // 0: iload_0
        0xab, 0x00, 0x00, // 1: lookupswitch
        0x00, 0x00, 0x00, 0x1d, // default: 30
        0x00, 0x00, 0x00, 0x02, // npairs
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1b, // 0: 28
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x1b, // 1: 28
        0x04, 0xac, // 28: iconst_1, ireturn
        0x03, 0xac, // 30: iconst_0, ireturn
    ]);

    let data = ClassBuilder::new("A").method(ACC_STATIC, "s", "(I)I", code).build();
    let recorder = record(&data, &[])?;

    assert_eq!(recorder.total, Some(2));
    assert_eq!(
        recorder.events,
        events![
            "method s",
            "insn 1a",
            "switch ab L1 [L0, L0]",
            "L0 (entry)",
            "insn 04",
            "insn ac probe 0",
            "L1 (entry)",
            "insn 03",
            "insn ac probe 1",
            "end",
        ]
    );

    Ok(())
}

#[test]
fn test_exception_handler() -> Result<()> {
    let data = ClassBuilder::new("A")
        .method(ACC_STATIC, "t", "()V", try_catch())
        .build();
    let recorder = record(&data, &[])?;

    assert_eq!(recorder.total, Some(4));
    assert_eq!(
        recorder.events,
        events![
            "method t",
            "L0 (entry)",
            "line 3",
            "insn b8",
            "L1",
            "jump a7 L4 probe 0",
            "L2 (entry)",
            "line 4",
            "insn 4b",
            "probe 1",
            "L3",
            "line 5",
            "insn b8",
            "probe 2",
            "L4",
            "line 6",
            "insn b1 probe 3",
            "end",
        ]
    );

    Ok(())
}

#[test]
fn test_subroutines_are_rejected() -> Result<()> {
    let code = CodeDef::new(vec![
        0xa8, 0x00, 0x04, // 0: jsr 4
        0xb1, // 3: return
        0x4b, // 4: astore_0
        0xa9, 0x00, // 5: ret 0
    ]);

    let data = ClassBuilder::new("A").method(ACC_STATIC, "old", "()V", code).build();
    let class = ClassFile::parse(&data)?;
    let error = accept(&class, 0, &mut Recorder::default()).unwrap_err();

    assert_eq!(
        error.downcast_ref::<crate::classfile::ClassFormatError>(),
        Some(&crate::classfile::ClassFormatError::Subroutine(0))
    );
    assert!(format!("{:#}", error).contains("A.old()V"));

    Ok(())
}
