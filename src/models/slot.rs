// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The 64-byte command slot every packet travels in.
//!
//! The wire format is a union of the command variants over one fixed
//! slot; unused tail bytes stay zero.  Rather than a runtime union, the
//! slot is a plain byte array and the variants are zerocopy views that
//! all share the header prefix.

use core::fmt;

use enum_dispatch::enum_dispatch;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::models::{
    header::CmdHeader,
    opcode::{CommandOp, UnknownOp},
    props::{ChannelProps, CmdProps},
    srb::{CmdIo, CmdXio, MAX_SRB_DATA, Srb},
    version::CmdVersion,
};

/// Size of every packet, both directions.
pub const CMD_SIZE: usize = 64;

/// Offset of the SRB inline area within the slot.  An outbound CDB is
/// copied here; it may run past the nominal 20-byte area into the tail
/// of the slot, never past the slot itself.
pub const SRB_DATA_OFFSET: usize =
    size_of::<CmdHeader>() + size_of::<Srb>() - MAX_SRB_DATA;

/// Reserved request id used by all handshake commands.  Normal I/O ids
/// keep their low 32 bits zero and their high 32 bits below the CCB
/// count, so the sentinel can never collide with one.
pub const INIT_RID: u64 = 0x1984;

const _: () = assert!(size_of::<CmdHeader>() == 12);
const _: () = assert!(size_of::<CmdVersion>() == 16);
const _: () = assert!(size_of::<ChannelProps>() == 24);
const _: () = assert!(size_of::<CmdProps>() == 36);
const _: () = assert!(size_of::<Srb>() == 36);
const _: () = assert!(size_of::<CmdIo>() == 48);
const _: () = assert!(size_of::<CmdXio>() == CMD_SIZE);

/// Accessors shared by every command variant.
#[enum_dispatch]
pub trait CommandRecord {
    fn hdr(&self) -> &CmdHeader;
}

impl CommandRecord for CmdHeader {
    fn hdr(&self) -> &CmdHeader {
        self
    }
}

impl CommandRecord for CmdVersion {
    fn hdr(&self) -> &CmdHeader {
        &self.hdr
    }
}

impl CommandRecord for CmdProps {
    fn hdr(&self) -> &CmdHeader {
        &self.hdr
    }
}

impl CommandRecord for CmdIo {
    fn hdr(&self) -> &CmdHeader {
        &self.hdr
    }
}

/// A slot decoded into its variant, by opcode.
#[enum_dispatch(CommandRecord)]
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Version(CmdVersion),
    Props(CmdProps),
    Io(CmdIo),
    Bare(CmdHeader),
}

#[repr(C)]
#[derive(
    Clone,
    Copy,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
pub struct CommandSlot([u8; CMD_SIZE]);

impl CommandSlot {
    #[inline]
    pub fn zeroed() -> Self {
        Self([0u8; CMD_SIZE])
    }

    /// A zeroed slot carrying only a request header.
    #[inline]
    pub fn request(op: CommandOp) -> Self {
        let mut slot = Self::zeroed();
        *slot.header_mut() = CmdHeader::request(op);
        slot
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    fn view<T>(&self) -> &T
    where T: FromBytes + KnownLayout + Immutable + Unaligned {
        // All variants fit the 64-byte slot and have alignment 1.
        match T::ref_from_prefix(&self.0) {
            Ok((v, _)) => v,
            Err(_) => unreachable!("command variants fit the slot"),
        }
    }

    fn view_mut<T>(&mut self) -> &mut T
    where T: FromBytes + IntoBytes + KnownLayout + Unaligned {
        match T::mut_from_prefix(&mut self.0) {
            Ok((v, _)) => v,
            Err(_) => unreachable!("command variants fit the slot"),
        }
    }

    #[inline]
    pub fn header(&self) -> &CmdHeader {
        self.view()
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut CmdHeader {
        self.view_mut()
    }

    #[inline]
    pub fn version(&self) -> &CmdVersion {
        self.view()
    }

    #[inline]
    pub fn version_mut(&mut self) -> &mut CmdVersion {
        self.view_mut()
    }

    #[inline]
    pub fn props(&self) -> &CmdProps {
        self.view()
    }

    #[inline]
    pub fn props_mut(&mut self) -> &mut CmdProps {
        self.view_mut()
    }

    #[inline]
    pub fn io(&self) -> &CmdIo {
        self.view()
    }

    #[inline]
    pub fn io_mut(&mut self) -> &mut CmdIo {
        self.view_mut()
    }

    #[inline]
    pub fn xio(&self) -> &CmdXio {
        self.view()
    }

    #[inline]
    pub fn xio_mut(&mut self) -> &mut CmdXio {
        self.view_mut()
    }

    /// The SRB sits at the same offset in both I/O layouts.
    #[inline]
    pub fn srb(&self) -> &Srb {
        &self.io().srb
    }

    #[inline]
    pub fn srb_mut(&mut self) -> &mut Srb {
        &mut self.io_mut().srb
    }

    /// Decode the slot into its variant by opcode.
    pub fn classify(&self) -> Result<Command, UnknownOp> {
        use CommandOp::*;
        Ok(match self.header().opcode().ok_or(UnknownOp(self.header().op_raw()))? {
            StartInit | FinishInit | QueryProto => Command::Version(*self.version()),
            QueryProps => Command::Props(*self.props()),
            ScsiIo | IoDone => Command::Io(*self.io()),
            DevGone | Enumerate => Command::Bare(*self.header()),
        })
    }
}

impl Default for CommandSlot {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for CommandSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.classify() {
            Ok(cmd) => write!(f, "CommandSlot {{ {cmd:?} }}"),
            Err(e) => write!(f, "CommandSlot {{ {e} }}"),
        }
    }
}
