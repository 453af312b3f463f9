// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! INQUIRY data views and the fixup for malformed host replies.
//!
//! Hosts speaking the Win7/Win8/Win8.1 vintages are known to return
//! INQUIRY data with a zero version or response format for absent LUNs,
//! and to advertise SPC-2 on LUNs that actually support UNMAP.  The
//! completion path patches both cases in place before the data reaches
//! the midlayer.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::models::version::{PROTO_VERSION_WIN7, PROTO_VERSION_WIN8, PROTO_VERSION_WIN8_1};
#[cfg(test)]
use crate::models::version::PROTO_VERSION_WIN10;

pub const INQUIRY_OPCODE: u8 = 0x12;

pub const SID_TYPE: u8 = 0x1f;
pub const T_NODEVICE: u8 = 0x1f;
pub const SID_QUAL: u8 = 0xe0;
pub const SID_QUAL_BAD_LU: u8 = 0x60;

/// Bytes before the additional-length field counts.
pub const SID_INQUIRY_HDR: usize = 5;
/// Additional length of a minimal SCSI-2 INQUIRY response.
pub const SID_SCSI2_ALEN: usize = 31;

/// ANSI version bits of the INQUIRY version byte.
#[inline]
pub fn spc_version(version: u8) -> u8 {
    version & 0x07
}

/// First five bytes of the standard INQUIRY response, enough for the
/// validity check and the short fixup.
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
pub struct InquiryHeader {
    pub device: u8,
    pub dev_qual2: u8,
    pub version: u8,
    pub response_format: u8,
    pub additional_length: u8,
}

/// Standard INQUIRY response through the revision field.
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
pub struct InquiryData {
    pub device: u8,
    pub dev_qual2: u8,
    pub version: u8,
    pub response_format: u8,
    pub additional_length: u8,
    _reserved: [u8; 2],
    pub flags: u8,
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
}

const _: () = assert!(size_of::<InquiryData>() == SID_INQUIRY_HDR + SID_SCSI2_ALEN);

/// A reply naming no device or a bad LUN qualifier is not a real unit.
#[inline]
pub fn inquiry_valid(device: u8) -> bool {
    if device & SID_TYPE == T_NODEVICE {
        return false;
    }
    if device & SID_QUAL == SID_QUAL_BAD_LU {
        return false;
    }
    true
}

/// Vendor field with non-printable bytes replaced, the way the midlayer
/// sanitizes identification strings.
pub fn clean_vendor(vendor: &[u8; 8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (dst, src) in out.iter_mut().zip(vendor.iter()) {
        *dst = if src.is_ascii_graphic() || *src == b' ' {
            *src
        } else {
            b'?'
        };
    }
    out
}

/// Patch a malformed INQUIRY reply in place.
///
/// `reported` is the data length the host claims to have returned; it
/// never exceeds `data.len()` by the time the completion path gets here.
pub fn fixup_inquiry(proto: u16, data: &mut [u8], reported: u32) {
    let Ok((hdr, _)) = InquiryHeader::read_from_prefix(data) else {
        return;
    };

    let resplen: u32 = if reported >= SID_INQUIRY_HDR as u32 {
        hdr.additional_length as u32 + SID_INQUIRY_HDR as u32
    } else {
        0
    };
    let datalen = resplen.min(reported) as usize;

    let fixup_host = matches!(
        proto,
        PROTO_VERSION_WIN7 | PROTO_VERSION_WIN8 | PROTO_VERSION_WIN8_1
    );

    if fixup_host
        && !inquiry_valid(hdr.device)
        && datalen >= 4
        && (hdr.version == 0 || hdr.response_format == 0)
    {
        if let Ok((hdr, _)) = InquiryHeader::mut_from_prefix(data) {
            hdr.version = 0x05; /* SPC-3 */
            hdr.response_format = 2;
        }
    } else if datalen >= SID_INQUIRY_HDR + SID_SCSI2_ALEN {
        // Upgrade SPC-2 to SPC-3 on Win8 and WS2012 R2 hosts so the
        // midlayer probes for UNMAP.
        let upgrade_host = matches!(proto, PROTO_VERSION_WIN8 | PROTO_VERSION_WIN8_1);
        if let Ok((inq, _)) = InquiryData::mut_from_prefix(data) {
            if upgrade_host
                && spc_version(inq.version) == 2
                && clean_vendor(&inq.vendor)[..4] == *b"Msft"
            {
                inq.version = 0x05; /* SPC-3 */
            }
        }
    }
}
