// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SCSI Request Block: the wire record carrying one SCSI command and,
//! on the way back, its result.
//!
//! The 20-byte inline area holds the CDB on the way out and the
//! autosense bytes on the way in.  Hosts that negotiated Win8 or newer
//! expect the extended record (`CmdXio`) and a 20-byte sense allowance;
//! older hosts get the base record and 18 bytes.

use core::fmt;

use bitflags::bitflags;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32, Unaligned,
};

use crate::models::header::CmdHeader;

pub const SENSE_DATA_LEN_WIN7: usize = 18;
pub const SENSE_DATA_LEN: usize = 20;
pub const MAX_SRB_DATA: usize = 20;

/// Data direction codes in `Srb::direction`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrbDirection {
    Write = 0,
    Read = 1,
    None = 2,
}

/// `Srb::iostatus` bits.  The low nibble is a completion code; the high
/// bits are qualifiers that travel alongside it.
pub const SRB_STATUS_PENDING: u8 = 0x00;
pub const SRB_STATUS_SUCCESS: u8 = 0x01;
pub const SRB_STATUS_ABORTED: u8 = 0x02;
pub const SRB_STATUS_ERROR: u8 = 0x04;
pub const SRB_STATUS_INVALID_LUN: u8 = 0x20;
pub const SRB_STATUS_QUEUE_FROZEN: u8 = 0x40;
pub const SRB_STATUS_AUTOSENSE_VALID: u8 = 0x80;

/// Completion code with the qualifier bits masked off.
#[inline]
pub fn srb_status_code(iostatus: u8) -> u8 {
    iostatus & !(SRB_STATUS_AUTOSENSE_VALID | SRB_STATUS_QUEUE_FROZEN)
}

bitflags! {
    /// `CmdXio::srbflags` bits understood by Win8+ hosts.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SrbFlags: u32 {
        const QUEUE_ACTION_ENABLE = 0x00000002;
        const DISABLE_DISCONNECT = 0x00000004;
        const DISABLE_SYNCH_TRANSFER = 0x00000008;
        const BYPASS_FROZEN_QUEUE = 0x00000010;
        const DISABLE_AUTOSENSE = 0x00000020;
        const DATA_IN = 0x00000040;
        const DATA_OUT = 0x00000080;
        const NO_DATA_TRANSFER = 0x00000000;
        const NO_QUEUE_FREEZE = 0x00000100;
        const ADAPTER_CACHE_ENABLE = 0x00000200;
        const FREE_SENSE_BUFFER = 0x00000400;
    }
}

#[repr(C)]
#[derive(
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
pub struct Srb {
    pub reqlen: U16<LittleEndian>,
    pub iostatus: u8,
    pub scsistatus: u8,

    pub initiator: u8,
    pub bus: u8,
    pub target: u8,
    pub lun: u8,

    pub cdblen: u8,
    pub senselen: u8,
    pub direction: u8,
    _reserved: u8,

    pub datalen: U32<LittleEndian>,
    pub data: [u8; MAX_SRB_DATA],
}

impl fmt::Debug for Srb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Srb")
            .field("reqlen", &self.reqlen.get())
            .field("iostatus", &format_args!("{:#04x}", self.iostatus))
            .field("scsistatus", &format_args!("{:#04x}", self.scsistatus))
            .field("target", &self.target)
            .field("lun", &self.lun)
            .field("cdblen", &self.cdblen)
            .field("senselen", &self.senselen)
            .field("direction", &self.direction)
            .field("datalen", &self.datalen.get())
            .finish()
    }
}

/// SRB command for Win7 and older hosts.
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
pub struct CmdIo {
    pub hdr: CmdHeader,
    pub srb: Srb,
}

/// SRB command with the Win8 extensions.
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
pub struct CmdXio {
    pub hdr: CmdHeader,
    pub srb: Srb,
    _reserved: [u8; 2],
    pub qtag: u8,
    pub qaction: u8,
    pub srbflags: U32<LittleEndian>,
    pub timeout: U32<LittleEndian>,
    pub qsortkey: U32<LittleEndian>,
}

impl CmdXio {
    #[inline]
    pub fn set_srbflags(&mut self, flags: SrbFlags) {
        self.srbflags.set(self.srbflags.get() | flags.bits());
    }
}
