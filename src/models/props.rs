// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Channel properties record returned by the QueryProps step.
//!
//! Only `path` (adopted as the SCSI bus id) and `target` (adopted as the
//! initiator id) feed back into the protocol engine; the remaining fields
//! are observed and logged.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32, U64, Unaligned,
};

use crate::models::header::CmdHeader;

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
pub struct ChannelProps {
    pub proto: U16<LittleEndian>,
    pub path: u8,
    pub target: u8,
    pub maxchan: U16<LittleEndian>,
    pub port: U16<LittleEndian>,
    pub chflags: U32<LittleEndian>,
    pub maxfer: U32<LittleEndian>,
    pub chanid: U64<LittleEndian>,
}

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
pub struct CmdProps {
    pub hdr: CmdHeader,
    pub props: ChannelProps,
}
