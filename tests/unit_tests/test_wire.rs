// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use hex_literal::hex;
use storvsc_rs::models::{
    header::{CMD_FLAG_REQUEST_COMPLETION, CmdHeader},
    opcode::{CommandOp, RawCommandOp},
    slot::{CMD_SIZE, Command, CommandRecord, CommandSlot, INIT_RID, SRB_DATA_OFFSET},
    srb::{SENSE_DATA_LEN, SENSE_DATA_LEN_WIN7, SrbDirection},
    version::{CmdVersion, PROTO_VERSION_WIN10, PROTO_VERSIONS, ProtoVersion},
};

#[test]
fn version_probe_wire_image() {
    let mut slot = CommandSlot::zeroed();
    *slot.version_mut() = CmdVersion::probe(PROTO_VERSION_WIN10);

    // op=QueryProto, flags=request-completion, status=0, ver=0x0602,
    // rev=0, zero tail.
    let expected = hex!(
        "09000000 01000000 00000000 02060000"
        "00000000 00000000 00000000 00000000"
        "00000000 00000000 00000000 00000000"
        "00000000 00000000 00000000 00000000"
    );
    assert_eq!(slot.bytes(), &expected[..]);
}

#[test]
fn srb_field_offsets() {
    let mut slot = CommandSlot::zeroed();
    *slot.header_mut() = CmdHeader::request(CommandOp::ScsiIo);
    {
        let srb = slot.srb_mut();
        srb.reqlen.set(0x1234);
        srb.iostatus = 0x01;
        srb.scsistatus = 0x02;
        srb.initiator = 3;
        srb.bus = 4;
        srb.target = 5;
        srb.lun = 6;
        srb.cdblen = 7;
        srb.senselen = 8;
        srb.direction = SrbDirection::Read as u8;
        srb.datalen.set(0xdead_beef);
    }

    let b = slot.bytes();
    assert_eq!(&b[12..14], &[0x34, 0x12], "reqlen is little-endian");
    assert_eq!(b[14], 0x01, "iostatus");
    assert_eq!(b[15], 0x02, "scsistatus");
    assert_eq!(&b[16..20], &[3, 4, 5, 6]);
    assert_eq!(&b[20..23], &[7, 8, 1]);
    assert_eq!(b[23], 0, "reserved byte stays zero");
    assert_eq!(&b[24..28], &0xdead_beef_u32.to_le_bytes());
    assert_eq!(SRB_DATA_OFFSET, 28);
}

#[test]
fn request_header_sets_completion_flag() {
    let slot = CommandSlot::request(CommandOp::StartInit);
    let hdr = slot.header();
    assert_eq!(hdr.opcode(), Some(CommandOp::StartInit));
    assert_eq!(hdr.flags.get(), CMD_FLAG_REQUEST_COMPLETION);
    assert_eq!(hdr.status(), 0);
}

#[test]
fn classify_by_opcode() {
    let slot = CommandSlot::request(CommandOp::QueryProps);
    match slot.classify().expect("WTF") {
        Command::Props(p) => assert_eq!(p.hdr().opcode(), Some(CommandOp::QueryProps)),
        other => panic!("wrong variant: {other:?}"),
    }

    let mut done = CommandSlot::zeroed();
    done.header_mut().op = CommandOp::IoDone.into();
    match done.classify().expect("WTF") {
        Command::Io(io) => assert_eq!(io.hdr().op_raw(), 0x01),
        other => panic!("wrong variant: {other:?}"),
    }

    let mut bogus = CommandSlot::zeroed();
    bogus.header_mut().op = RawCommandOp::from_raw(0x77);
    assert!(bogus.classify().is_err());
}

#[test]
fn init_sentinel_is_disjoint_from_ccb_ids() {
    assert_eq!(INIT_RID & 0xffff_ffff, INIT_RID, "sentinel lives in the low half");
    for idx in 0..128u64 {
        assert_ne!(idx << 32, INIT_RID);
    }
}

#[test]
fn version_list_is_preferred_first() {
    assert_eq!(PROTO_VERSIONS[0], PROTO_VERSION_WIN10);
    let mut sorted = PROTO_VERSIONS;
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(sorted, PROTO_VERSIONS, "most recent first");
}

#[test]
fn proto_version_prints_major_minor() {
    assert_eq!(ProtoVersion(PROTO_VERSION_WIN10).to_string(), "6.2");
    assert_eq!(ProtoVersion(0x402).to_string(), "4.2");
}

#[test]
fn sense_length_constants() {
    assert_eq!(SENSE_DATA_LEN_WIN7, 18);
    assert_eq!(SENSE_DATA_LEN, 20);
    assert_eq!(CMD_SIZE, 64);
}
