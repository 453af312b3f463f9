// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-format sense data: the synthetic autosense the driver builds
//! for oversize CDBs, and a decoder for what the host hands back.

use core::fmt;

use anyhow::{Context, Result, anyhow};

use crate::models::srb::SENSE_DATA_LEN;

pub const FIXED_MIN_LEN: usize = 18;

pub const SSD_ERRCODE_VALID: u8 = 0x80;
pub const SSD_ERRCODE_CURRENT: u8 = 0x70;
pub const SKEY_ILLEGAL_REQUEST: u8 = 0x05;
pub const ASC_INVALID_COMMAND_OPCODE: u8 = 0x20;

/// Build the CHECK CONDITION autosense for a command the driver refuses
/// to put on the wire.
pub fn fill_illegal_opcode(sense: &mut [u8; SENSE_DATA_LEN]) {
    sense.fill(0);
    sense[0] = SSD_ERRCODE_VALID | SSD_ERRCODE_CURRENT;
    sense[2] = SKEY_ILLEGAL_REQUEST;
    sense[12] = ASC_INVALID_COMMAND_OPCODE;
}

#[repr(C)]
#[derive(Default, PartialEq)]
pub struct SenseData {
    pub valid: bool,
    pub response_code: u8,
    pub sense_key: u8,
    pub ili: bool,
    pub eom: bool,
    pub filemark: bool,
    pub information: u32,
    pub additional_len: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_MIN_LEN {
            return Err(anyhow!("sense buffer too small: {}", buf.len()));
        }

        let response_code = buf[0] & 0x7F;
        match response_code {
            0x70 | 0x71 => Self::parse_fixed(buf),
            0x72 | 0x73 => Err(anyhow!(
                "descriptor-format sense (0x{:02x}) is not supported",
                response_code
            )),
            other => Err(anyhow!("unknown sense response code 0x{:02x}", other)),
        }
    }

    fn parse_fixed(sense: &[u8]) -> Result<Self> {
        let valid = sense[0] & 0x80 != 0;
        let response_code = sense[0] & 0x7F;

        let filemark = sense[2] & 0x80 != 0;
        let eom = sense[2] & 0x40 != 0;
        let ili = sense[2] & 0x20 != 0;
        let sense_key = sense[2] & 0x0F;

        let information = u32::from_be_bytes(
            sense[3..7]
                .try_into()
                .context("failed to read Information (3..6)")?,
        );

        let additional_len = sense[7];
        let asc = sense[12];
        let ascq = sense[13];

        Ok(SenseData {
            valid,
            response_code,
            sense_key,
            ili,
            eom,
            filemark,
            information,
            additional_len,
            asc,
            ascq,
        })
    }
}

impl fmt::Debug for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenseData")
            .field("valid", &self.valid)
            .field(
                "response_code",
                &format_args!("{:#04x}", self.response_code),
            )
            .field("sense_key", &format_args!("{:#x}", self.sense_key))
            .field("filemark", &self.filemark)
            .field("eom", &self.eom)
            .field("ili", &self.ili)
            .field("information", &self.information)
            .field("additional_len", &self.additional_len)
            .field("asc", &format_args!("{:#04x}", self.asc))
            .field("ascq", &format_args!("{:#04x}", self.ascq))
            .finish()
    }
}
