// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reader for the parts of JVM class files that coverage analysis needs.

pub mod bytecode;

use thiserror::Error;

pub use bytecode::{Insn, InsnKind};

const MAGIC: u32 = 0xcafe_babe;

pub const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_MODULE: u16 = 0x8000;

/// Field added to classes by JaCoCo instrumentation.
const INSTRUMENTED_FIELD: &str = "$jacocoData";

/// Method added to classes by JaCoCo instrumentation.
const INSTRUMENTED_METHOD: &str = "$jacocoInit";

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ClassFormatError {
    #[error("not a class file (magic {0:#010x})")]
    BadMagic(u32),

    #[error("unexpected end of class file at offset {0}")]
    Truncated(usize),

    #[error("invalid constant pool index {0}")]
    InvalidConstant(u16),

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("invalid modified UTF-8 in constant pool entry {0}")]
    InvalidUtf8(u16),

    #[error("unknown opcode {opcode:#04x} at bytecode offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u32 },

    #[error("branch target {target} out of bounds at bytecode offset {offset}")]
    InvalidBranchTarget { offset: u32, target: i64 },

    #[error("subroutines (jsr/ret) are not supported, found at bytecode offset {0}")]
    Subroutine(u32),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: u16,

    /// VM form, e.g. `com/example/Foo`.
    pub name: String,

    pub super_name: Option<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,

    /// Value of the `SourceFile` attribute, e.g. `Foo.java`.
    pub source_file: Option<String>,

    /// Value of the `SourceDebugExtension` attribute (SMAP).
    pub source_debug: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Field {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Method {
    pub access: u16,
    pub name: String,
    pub descriptor: String,

    /// Absent for abstract and native methods.
    pub code: Option<Code>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub line_numbers: Vec<LineNumber>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line: u16,
}

impl ClassFile {
    pub fn parse(data: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = Reader::new(data);

        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }

        let minor_version = reader.u16()?;
        let major_version = reader.u16()?;
        let pool = ConstantPool::parse(&mut reader)?;

        let access = reader.u16()?;
        let name = pool.class_name(reader.u16()?)?.to_owned();
        let super_name = match reader.u16()? {
            0 => None,
            index => Some(pool.class_name(index)?.to_owned()),
        };

        let interfaces = reader.u16()?;
        reader.skip(2 * interfaces as usize)?;

        let mut fields = vec![];
        for _ in 0..reader.u16()? {
            let access = reader.u16()?;
            let name = pool.utf8(reader.u16()?)?.to_owned();
            let descriptor = pool.utf8(reader.u16()?)?.to_owned();
            skip_attributes(&mut reader)?;

            fields.push(Field {
                access,
                name,
                descriptor,
            });
        }

        let mut methods = vec![];
        for _ in 0..reader.u16()? {
            methods.push(Method::parse(&mut reader, &pool)?);
        }

        let mut source_file = None;
        let mut source_debug = None;

        for _ in 0..reader.u16()? {
            let attribute = pool.utf8(reader.u16()?)?;
            let length = reader.u32()? as usize;

            match attribute {
                "SourceFile" => {
                    source_file = Some(pool.utf8(reader.u16()?)?.to_owned());
                    reader.skip(length.saturating_sub(2))?;
                }
                "SourceDebugExtension" => {
                    let bytes = reader.bytes(length)?;
                    source_debug = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                _ => {
                    reader.skip(length)?;
                }
            }
        }

        Ok(Self {
            minor_version,
            major_version,
            access,
            name,
            super_name,
            fields,
            methods,
            source_file,
            source_debug,
        })
    }

    pub fn is_synthetic(&self) -> bool {
        self.access & ACC_SYNTHETIC != 0
    }

    /// `module-info` classes have no code to cover.
    pub fn is_module(&self) -> bool {
        self.access & ACC_MODULE != 0
    }

    /// Returns `true` if the class carries JaCoCo's runtime hooks.
    pub fn is_instrumented(&self) -> bool {
        self.fields.iter().any(|f| f.name == INSTRUMENTED_FIELD)
            || self.methods.iter().any(|m| m.name == INSTRUMENTED_METHOD)
    }
}

impl Method {
    fn parse(reader: &mut Reader, pool: &ConstantPool) -> Result<Self, ClassFormatError> {
        let access = reader.u16()?;
        let name = pool.utf8(reader.u16()?)?.to_owned();
        let descriptor = pool.utf8(reader.u16()?)?.to_owned();

        let mut code = None;

        for _ in 0..reader.u16()? {
            let attribute = pool.utf8(reader.u16()?)?;
            let length = reader.u32()? as usize;

            if attribute == "Code" {
                let data = reader.bytes(length)?;
                code = Some(Code::parse(&mut Reader::new(data), pool)?);
            } else {
                reader.skip(length)?;
            }
        }

        Ok(Self {
            access,
            name,
            descriptor,
            code,
        })
    }

    pub fn is_synthetic(&self) -> bool {
        self.access & ACC_SYNTHETIC != 0
    }

    /// Bridge methods are generated for generic overrides.
    pub fn is_bridge(&self) -> bool {
        self.access & ACC_BRIDGE != 0
    }
}

impl Code {
    fn parse(reader: &mut Reader, pool: &ConstantPool) -> Result<Self, ClassFormatError> {
        let max_stack = reader.u16()?;
        let max_locals = reader.u16()?;
        let length = reader.u32()? as usize;
        let bytecode = reader.bytes(length)?.to_vec();

        let mut exception_table = vec![];
        for _ in 0..reader.u16()? {
            exception_table.push(ExceptionHandler {
                start_pc: reader.u16()?,
                end_pc: reader.u16()?,
                handler_pc: reader.u16()?,
                catch_type: reader.u16()?,
            });
        }

        let mut line_numbers = vec![];
        for _ in 0..reader.u16()? {
            let attribute = pool.utf8(reader.u16()?)?;
            let length = reader.u32()? as usize;

            if attribute == "LineNumberTable" {
                for _ in 0..reader.u16()? {
                    line_numbers.push(LineNumber {
                        start_pc: reader.u16()?,
                        line: reader.u16()?,
                    });
                }
            } else {
                reader.skip(length)?;
            }
        }

        Ok(Self {
            max_stack,
            max_locals,
            bytecode,
            exception_table,
            line_numbers,
        })
    }

    /// Decode the bytecode into instructions, in offset order.
    pub fn instructions(&self) -> Result<Vec<Insn>, ClassFormatError> {
        bytecode::decode(&self.bytecode)
    }
}

fn skip_attributes(reader: &mut Reader) -> Result<(), ClassFormatError> {
    for _ in 0..reader.u16()? {
        reader.skip(2)?;
        let length = reader.u32()? as usize;
        reader.skip(length)?;
    }

    Ok(())
}

#[derive(Clone, Debug)]
enum Constant {
    // Index 0 and the upper half of `long` and `double` entries.
    Unusable,
    Utf8(String),
    Class { name_index: u16 },
    Other,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut Reader) -> Result<Self, ClassFormatError> {
        let count = reader.u16()?;
        let mut entries = vec![Constant::Unusable];

        while entries.len() < count as usize {
            let index = entries.len() as u16;
            let tag = reader.u8()?;

            let constant = match tag {
                1 => {
                    let length = reader.u16()? as usize;
                    let text = crate::mutf8::decode(reader.bytes(length)?)
                        .map_err(|_| ClassFormatError::InvalidUtf8(index))?;
                    Constant::Utf8(text)
                }
                7 => Constant::Class {
                    name_index: reader.u16()?,
                },
                // Long, Double: occupy two slots.
                5 | 6 => {
                    reader.skip(8)?;
                    entries.push(Constant::Other);
                    Constant::Unusable
                }
                // MethodType, Module, Package, String.
                16 | 19 | 20 | 8 => {
                    reader.skip(2)?;
                    Constant::Other
                }
                // MethodHandle.
                15 => {
                    reader.skip(3)?;
                    Constant::Other
                }
                // Integer, Float, field and method refs, NameAndType, Dynamic, InvokeDynamic.
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                _ => return Err(ClassFormatError::UnknownConstantTag { tag, index }),
            };

            entries.push(constant);
        }

        Ok(Self { entries })
    }

    fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(text)) => Ok(text),
            _ => Err(ClassFormatError::InvalidConstant(index)),
        }
    }

    fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entries.get(index as usize) {
            Some(Constant::Class { name_index }) => self.utf8(*name_index),
            _ => Err(ClassFormatError::InvalidConstant(index)),
        }
    }
}

/// Big-endian cursor over class-file bytes.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::Truncated(self.data.len()))?;

        let bytes = &self.data[self.pos..end];
        self.pos = end;

        Ok(bytes)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), ClassFormatError> {
        self.bytes(len).map(|_| ())
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ClassFormatError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ClassFormatError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn i16(&mut self) -> Result<i16, ClassFormatError> {
        Ok(self.u16()? as i16)
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ClassFormatError> {
        Ok(self.u32()? as i32)
    }
}
