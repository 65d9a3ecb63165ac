// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! JaCoCo execution data (`.exec`) files.
//!
//! A file is a sequence of blocks, each starting with a type byte. Values
//! are big-endian, strings are length-prefixed modified UTF-8, and probe
//! arrays are a var-int length followed by bits packed LSB-first.

use std::io::Write;

use anyhow::Result;
use fixedbitset::FixedBitSet;
use probe_coverage::execution::{ExecutionData, SessionInfo, TestSession};
use probe_coverage::mutf8;
use thiserror::Error;

pub const BLOCK_HEADER: u8 = 0x01;
pub const BLOCK_SESSION_INFO: u8 = 0x10;
pub const BLOCK_EXECUTION_DATA: u8 = 0x11;

pub const MAGIC_NUMBER: u16 = 0xc0c0;
pub const FORMAT_VERSION: u16 = 0x1007;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ExecFormatError {
    #[error("invalid execution data file")]
    InvalidHeader,

    #[error("incompatible execution data version {0:#06x}, expected 0x1007")]
    IncompatibleVersion(u16),

    #[error("unknown block type {0:#04x} at offset {1}")]
    UnknownBlock(u8, usize),

    #[error("unexpected end of execution data at offset {0}")]
    Truncated(usize),

    #[error("invalid string at offset {0}")]
    InvalidString(usize),
}

/// Read all sessions of an execution data file, in file order.
///
/// Execution data blocks belong to the most recent session block. Data
/// before the first session block is put in a session with an empty id.
pub fn read_exec(data: &[u8]) -> Result<Vec<TestSession>> {
    let mut reader = ExecReader::new(data);
    let mut sessions: Vec<TestSession> = vec![];
    let mut first = true;

    while !reader.is_empty() {
        let offset = reader.pos;
        let block = reader.u8()?;

        if first && block != BLOCK_HEADER {
            return Err(ExecFormatError::InvalidHeader.into());
        }
        first = false;

        match block {
            BLOCK_HEADER => {
                if reader.u16()? != MAGIC_NUMBER {
                    return Err(ExecFormatError::InvalidHeader.into());
                }

                let version = reader.u16()?;
                if version != FORMAT_VERSION {
                    return Err(ExecFormatError::IncompatibleVersion(version).into());
                }
            }
            BLOCK_SESSION_INFO => {
                let id = reader.utf()?;
                let start = reader.i64()?;
                let dump = reader.i64()?;

                sessions.push(TestSession::new(SessionInfo::new(id, start, dump)));
            }
            BLOCK_EXECUTION_DATA => {
                let id = reader.i64()? as u64;
                let name = reader.utf()?;
                let probes = reader.boolean_array()?;

                if sessions.is_empty() {
                    debug!("execution data before first session block");
                    sessions.push(TestSession::default());
                }

                // Unwrap checked: a session was pushed above.
                let session = sessions.last_mut().unwrap();
                session
                    .store
                    .put(ExecutionData::new(id, name, probes))?;
            }
            _ => return Err(ExecFormatError::UnknownBlock(block, offset).into()),
        }
    }

    Ok(sessions)
}

struct ExecReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ExecReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ExecFormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ExecFormatError::Truncated(self.data.len()))?;

        let bytes = &self.data[self.pos..end];
        self.pos = end;

        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, ExecFormatError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ExecFormatError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i64(&mut self) -> Result<i64, ExecFormatError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.bytes(8)?);
        Ok(i64::from_be_bytes(b))
    }

    fn utf(&mut self) -> Result<String, ExecFormatError> {
        let offset = self.pos;
        let len = self.u16()? as usize;
        let bytes = self.bytes(len)?;

        mutf8::decode(bytes).map_err(|_| ExecFormatError::InvalidString(offset))
    }

    fn var_int(&mut self) -> Result<u32, ExecFormatError> {
        let mut value = 0u32;

        for shift in (0..32).step_by(7) {
            let b = self.u8()? as u32;
            value |= (b & 0x7f) << shift;

            if b & 0x80 == 0 {
                return Ok(value);
            }
        }

        Ok(value)
    }

    fn boolean_array(&mut self) -> Result<FixedBitSet, ExecFormatError> {
        let len = self.var_int()? as usize;
        let bytes = self.bytes((len + 7) / 8)?;

        let mut probes = FixedBitSet::with_capacity(len);

        for index in 0..len {
            if bytes[index / 8] & (1 << (index % 8)) != 0 {
                probes.insert(index);
            }
        }

        Ok(probes)
    }
}

/// Writes execution data files.
pub struct ExecWriter<W: Write> {
    writer: W,
}

impl<W: Write> ExecWriter<W> {
    /// Start a new file, writing its header.
    pub fn new(writer: W) -> Result<Self> {
        let mut exec = Self { writer };
        exec.write_header()?;
        Ok(exec)
    }

    /// Write another header, as appending a second dump to a file does.
    pub fn write_header(&mut self) -> Result<()> {
        self.writer.write_all(&[BLOCK_HEADER])?;
        self.writer.write_all(&MAGIC_NUMBER.to_be_bytes())?;
        self.writer.write_all(&FORMAT_VERSION.to_be_bytes())?;
        Ok(())
    }

    pub fn write_session_info(&mut self, info: &SessionInfo) -> Result<()> {
        self.writer.write_all(&[BLOCK_SESSION_INFO])?;
        self.write_utf(&info.id)?;
        self.writer.write_all(&info.start.to_be_bytes())?;
        self.writer.write_all(&info.dump.to_be_bytes())?;
        Ok(())
    }

    pub fn write_execution_data(&mut self, data: &ExecutionData) -> Result<()> {
        self.writer.write_all(&[BLOCK_EXECUTION_DATA])?;
        self.writer.write_all(&(data.id as i64).to_be_bytes())?;
        self.write_utf(&data.name)?;
        self.write_boolean_array(&data.probes)?;
        Ok(())
    }

    /// Write a session block followed by all of its execution data.
    pub fn write_session(&mut self, session: &TestSession) -> Result<()> {
        self.write_session_info(&session.info)?;

        for data in session.store.iter() {
            self.write_execution_data(data)?;
        }

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_utf(&mut self, text: &str) -> Result<()> {
        let bytes = mutf8::encode(text);

        let Ok(len) = u16::try_from(bytes.len()) else {
            anyhow::bail!("string too long for execution data: {} bytes", bytes.len());
        };

        self.writer.write_all(&len.to_be_bytes())?;
        self.writer.write_all(&bytes)?;
        Ok(())
    }

    fn write_var_int(&mut self, mut value: u32) -> Result<()> {
        while value & !0x7f != 0 {
            self.writer.write_all(&[0x80 | (value & 0x7f) as u8])?;
            value >>= 7;
        }

        self.writer.write_all(&[value as u8])?;
        Ok(())
    }

    fn write_boolean_array(&mut self, probes: &FixedBitSet) -> Result<()> {
        self.write_var_int(probes.len() as u32)?;

        let mut bytes = vec![0u8; (probes.len() + 7) / 8];
        for index in probes.ones() {
            bytes[index / 8] |= 1 << (index % 8);
        }

        self.writer.write_all(&bytes)?;
        Ok(())
    }
}
