// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Operation codes carried in the first word of every command slot.
//!
//! The storvsc wire protocol uses a single 32-bit opcode namespace for
//! both directions.  The guest emits the initialization and SCSI-I/O
//! requests; the host answers with completions and unsolicited
//! notifications:
//!
//! ```text
//! guest → host: StartInit (0x07), FinishInit (0x08), QueryProto (0x09),
//!               QueryProps (0x0a), ScsiIo (0x03)
//! host → guest: IoDone (0x01), DevGone (0x02), Enumerate (0x0b)
//! ```

use core::fmt;

use thiserror::Error;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U32, Unaligned,
};

/// Every operation code the protocol defines.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOp {
    IoDone = 0x01,
    DevGone = 0x02,
    ScsiIo = 0x03,
    StartInit = 0x07,
    FinishInit = 0x08,
    QueryProto = 0x09,
    QueryProps = 0x0a,
    Enumerate = 0x0b,
}

impl CommandOp {
    #[inline]
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x01 => Self::IoDone,
            0x02 => Self::DevGone,
            0x03 => Self::ScsiIo,
            0x07 => Self::StartInit,
            0x08 => Self::FinishInit,
            0x09 => Self::QueryProto,
            0x0a => Self::QueryProps,
            0x0b => Self::Enumerate,
            _ => return None,
        })
    }
}

/// Returned when the opcode word holds an undefined operation.
#[derive(Debug, Error)]
#[error("invalid operation: {0:#x}")]
pub struct UnknownOp(pub u32);

/// Wire-safe, zero-copy opcode word (guest byte order).
/// Transparent over a little-endian `u32`, so it can live inside a
/// zerocopy command record.
#[repr(transparent)]
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
pub struct RawCommandOp(U32<LittleEndian>);

impl RawCommandOp {
    #[inline]
    pub fn raw(&self) -> u32 {
        self.0.get()
    }

    #[inline]
    pub fn from_raw(v: u32) -> Self {
        Self(U32::new(v))
    }

    #[inline]
    pub fn known(&self) -> Option<CommandOp> {
        CommandOp::from_u32(self.raw())
    }

    #[inline]
    pub fn set_known(&mut self, op: CommandOp) {
        self.0.set(op as u32);
    }
}

impl From<CommandOp> for RawCommandOp {
    #[inline]
    fn from(op: CommandOp) -> Self {
        Self(U32::new(op as u32))
    }
}

impl fmt::Debug for RawCommandOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(op) => write!(f, "RawCommandOp {{ {op:?} }}"),
            None => write!(f, "RawCommandOp {{ {:#04x} }}", self.raw()),
        }
    }
}
