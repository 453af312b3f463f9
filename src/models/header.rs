// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The 12-byte header every command record starts with.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U32, Unaligned,
};

use crate::models::opcode::{CommandOp, RawCommandOp};

/// Request-completion bit in the header flags word.  The channel layer
/// honors it by generating a completion packet that carries the
/// submitter's request id back.
pub const CMD_FLAG_REQUEST_COMPLETION: u32 = 0x1;

/// Common prefix of every command variant: opcode, flags, status.
/// The codec transports the status word; it never interprets it.
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
pub struct CmdHeader {
    pub op: RawCommandOp,
    pub flags: U32<LittleEndian>,
    pub status: U32<LittleEndian>,
}

impl CmdHeader {
    #[inline]
    pub fn request(op: CommandOp) -> Self {
        Self {
            op: op.into(),
            flags: U32::new(CMD_FLAG_REQUEST_COMPLETION),
            status: U32::new(0),
        }
    }

    #[inline]
    pub fn opcode(&self) -> Option<CommandOp> {
        self.op.known()
    }

    #[inline]
    pub fn op_raw(&self) -> u32 {
        self.op.raw()
    }

    #[inline]
    pub fn status(&self) -> u32 {
        self.status.get()
    }
}
