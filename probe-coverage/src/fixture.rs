// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assembles small class files for tests.

use std::collections::HashMap;

use crate::mutf8;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;

#[derive(Clone, Debug, Default)]
pub struct CodeDef {
    bytecode: Vec<u8>,
    lines: Vec<(u16, u16)>,
    handlers: Vec<(u16, u16, u16)>,
}

impl CodeDef {
    pub fn new(bytecode: impl Into<Vec<u8>>) -> Self {
        Self {
            bytecode: bytecode.into(),
            ..Self::default()
        }
    }

    pub fn line(mut self, start_pc: u16, line: u16) -> Self {
        self.lines.push((start_pc, line));
        self
    }

    /// Catch-all handler for `[start_pc, end_pc)`.
    pub fn handler(mut self, start_pc: u16, end_pc: u16, handler_pc: u16) -> Self {
        self.handlers.push((start_pc, end_pc, handler_pc));
        self
    }
}

struct MethodDef {
    access: u16,
    name: String,
    descriptor: String,
    code: Option<CodeDef>,
}

pub struct ClassBuilder {
    name: String,
    access: u16,
    major_version: u16,
    source_file: Option<String>,
    long_constants: Vec<i64>,
    fields: Vec<(u16, String, String)>,
    methods: Vec<MethodDef>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access: ACC_PUBLIC | ACC_SUPER,
            major_version: 52,
            source_file: None,
            long_constants: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn major_version(mut self, major: u16) -> Self {
        self.major_version = major;
        self
    }

    pub fn source_file(mut self, name: impl Into<String>) -> Self {
        self.source_file = Some(name.into());
        self
    }

    /// Add a `long` constant, which takes two constant pool slots.
    pub fn long_constant(mut self, value: i64) -> Self {
        self.long_constants.push(value);
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.fields
            .push((access, name.to_owned(), descriptor.to_owned()));
        self
    }

    pub fn method(
        mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: impl Into<Option<CodeDef>>,
    ) -> Self {
        self.methods.push(MethodDef {
            access,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            code: code.into(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = PoolBuilder::default();

        for value in &self.long_constants {
            pool.long(*value);
        }

        let this_class = pool.class(&self.name);
        let super_class = pool.class("java/lang/Object");

        let mut body = vec![];
        put_u16(&mut body, self.access);
        put_u16(&mut body, this_class);
        put_u16(&mut body, super_class);
        put_u16(&mut body, 0);

        put_u16(&mut body, self.fields.len() as u16);
        for (access, name, descriptor) in &self.fields {
            put_u16(&mut body, *access);
            put_u16(&mut body, pool.utf8(name));
            put_u16(&mut body, pool.utf8(descriptor));
            put_u16(&mut body, 0);
        }

        put_u16(&mut body, self.methods.len() as u16);
        for method in &self.methods {
            put_u16(&mut body, method.access);
            put_u16(&mut body, pool.utf8(&method.name));
            put_u16(&mut body, pool.utf8(&method.descriptor));

            match &method.code {
                Some(code) => {
                    put_u16(&mut body, 1);
                    let attribute = code_attribute(code, &mut pool);
                    put_u16(&mut body, pool.utf8("Code"));
                    put_u32(&mut body, attribute.len() as u32);
                    body.extend(attribute);
                }
                None => put_u16(&mut body, 0),
            }
        }

        match &self.source_file {
            Some(source) => {
                put_u16(&mut body, 1);
                put_u16(&mut body, pool.utf8("SourceFile"));
                put_u32(&mut body, 2);
                put_u16(&mut body, pool.utf8(source));
            }
            None => put_u16(&mut body, 0),
        }

        let mut data = vec![];
        put_u32(&mut data, 0xcafe_babe);
        put_u16(&mut data, 0);
        put_u16(&mut data, self.major_version);
        put_u16(&mut data, pool.count);
        data.extend(pool.bytes);
        data.extend(body);

        data
    }
}

fn code_attribute(code: &CodeDef, pool: &mut PoolBuilder) -> Vec<u8> {
    let mut data = vec![];
    put_u16(&mut data, 4);
    put_u16(&mut data, 4);
    put_u32(&mut data, code.bytecode.len() as u32);
    data.extend(&code.bytecode);

    put_u16(&mut data, code.handlers.len() as u16);
    for (start, end, handler) in &code.handlers {
        put_u16(&mut data, *start);
        put_u16(&mut data, *end);
        put_u16(&mut data, *handler);
        put_u16(&mut data, 0);
    }

    if code.lines.is_empty() {
        put_u16(&mut data, 0);
    } else {
        put_u16(&mut data, 1);
        put_u16(&mut data, pool.utf8("LineNumberTable"));
        put_u32(&mut data, 2 + 4 * code.lines.len() as u32);
        put_u16(&mut data, code.lines.len() as u16);
        for (start_pc, line) in &code.lines {
            put_u16(&mut data, *start_pc);
            put_u16(&mut data, *line);
        }
    }

    data
}

struct PoolBuilder {
    count: u16,
    bytes: Vec<u8>,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            count: 1,
            bytes: vec![],
            utf8: HashMap::new(),
            classes: HashMap::new(),
        }
    }
}

impl PoolBuilder {
    fn utf8(&mut self, text: &str) -> u16 {
        if let Some(index) = self.utf8.get(text) {
            return *index;
        }

        let encoded = mutf8::encode(text);
        self.bytes.push(1);
        put_u16(&mut self.bytes, encoded.len() as u16);
        self.bytes.extend(encoded);

        let index = self.next(1);
        self.utf8.insert(text.to_owned(), index);
        index
    }

    fn class(&mut self, name: &str) -> u16 {
        if let Some(index) = self.classes.get(name) {
            return *index;
        }

        let name_index = self.utf8(name);
        self.bytes.push(7);
        put_u16(&mut self.bytes, name_index);

        let index = self.next(1);
        self.classes.insert(name.to_owned(), index);
        index
    }

    fn long(&mut self, value: i64) -> u16 {
        self.bytes.push(5);
        self.bytes.extend(value.to_be_bytes());
        self.next(2)
    }

    fn next(&mut self, slots: u16) -> u16 {
        let index = self.count;
        self.count += slots;
        index
    }
}

fn put_u16(data: &mut Vec<u8>, value: u16) {
    data.extend(value.to_be_bytes());
}

fn put_u32(data: &mut Vec<u8>, value: u32) {
    data.extend(value.to_be_bytes());
}

/// `static void m(boolean c) { if (c) a(); b(); }` on lines 10-12.
///
/// Placement gives 4 probes: `ifeq` (taken), before `a()`, before `b()`,
/// and `return`. Probe lines: 0 -> {10}, 1 -> {10}, 2 -> {11}, 3 -> {12}.
pub fn branching_method() -> CodeDef {
    CodeDef::new(vec![
        0x1a, // 0: iload_0
        0x99, 0x00, 0x06, // 1: ifeq 7
        0xb8, 0x00, 0x01, // 4: invokestatic
        0xb8, 0x00, 0x01, // 7: invokestatic
        0xb1, // 10: return
    ])
    .line(0, 10)
    .line(4, 11)
    .line(7, 12)
}

/// Class with a single `branching_method()`, 4 probes in total.
pub fn branching_class(name: &str, source_file: &str) -> Vec<u8> {
    ClassBuilder::new(name)
        .source_file(source_file)
        .method(ACC_STATIC, "m", "(Z)V", branching_method())
        .build()
}

/// `switch (x) { case 0: a(); case 1: b(); } return;` with fallthrough.
pub fn fallthrough_switch() -> CodeDef {
    CodeDef::new(vec![
        0x1a, // 0: iload_0
        0xab, 0x00, 0x00, // 1: lookupswitch
        0x00, 0x00, 0x00, 0x21, // default: 34
        0x00, 0x00, 0x00, 0x02, // npairs
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1b, // 0: 28
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x1e, // 1: 31
        0xb8, 0x00, 0x01, // 28: invokestatic
        0xb8, 0x00, 0x01, // 31: invokestatic
        0xb1, // 34: return
    ])
    .line(0, 1)
    .line(28, 2)
    .line(31, 3)
    .line(34, 4)
}

/// `try { a(); } catch (Throwable t) { b(); } return;`
pub fn try_catch() -> CodeDef {
    CodeDef::new(vec![
        0xb8, 0x00, 0x01, // 0: invokestatic
        0xa7, 0x00, 0x07, // 3: goto 10
        0x4b, // 6: astore_0
        0xb8, 0x00, 0x01, // 7: invokestatic
        0xb1, // 10: return
    ])
    .handler(0, 3, 6)
    .line(0, 3)
    .line(6, 4)
    .line(7, 5)
    .line(10, 6)
}
