// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Protocol version negotiation record.
//!
//! Version codes encode the Windows release that introduced them as
//! `major << 8 | minor`.  The host accepts or rejects each probe through
//! the status word of its IoDone reply; the guest walks the list in
//! preferred-first order until one sticks.

use core::fmt;

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, Unaligned,
};

use crate::models::{header::CmdHeader, opcode::CommandOp};

pub const PROTO_VERSION_WIN6: u16 = 0x200;
pub const PROTO_VERSION_WIN7: u16 = 0x402;
pub const PROTO_VERSION_WIN8: u16 = 0x501;
pub const PROTO_VERSION_WIN8_1: u16 = 0x600;
pub const PROTO_VERSION_WIN10: u16 = 0x602;

/// Probe order, most recent first.
pub const PROTO_VERSIONS: [u16; 5] = [
    PROTO_VERSION_WIN10,
    PROTO_VERSION_WIN8_1,
    PROTO_VERSION_WIN8,
    PROTO_VERSION_WIN7,
    PROTO_VERSION_WIN6,
];

/// Version negotiation command; also the shape of StartInit/FinishInit
/// requests, which leave the version fields zero.
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
pub struct CmdVersion {
    pub hdr: CmdHeader,
    pub ver: U16<LittleEndian>,
    pub rev: U16<LittleEndian>,
}

impl CmdVersion {
    #[inline]
    pub fn probe(ver: u16) -> Self {
        Self {
            hdr: CmdHeader::request(CommandOp::QueryProto),
            ver: U16::new(ver),
            rev: U16::new(0),
        }
    }
}

/// Protocol version rendered the way the attach message prints it.
pub struct ProtoVersion(pub u16);

impl fmt::Display for ProtoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", (self.0 >> 8) & 0xff, self.0 & 0xff)
    }
}
