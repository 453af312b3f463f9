// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use storvsc_rs::{
    models::{
        opcode::CommandOp,
        srb::{
            SRB_STATUS_AUTOSENSE_VALID, SRB_STATUS_ERROR, SRB_STATUS_QUEUE_FROZEN,
            SRB_STATUS_SUCCESS,
        },
    },
    scsi::{
        inquiry::T_NODEVICE,
        sense::SenseData,
        xfer::{ScsiStatus, XferFlags, XferResult},
    },
};

use crate::unit_tests::common::{
    attach_with, build_bare, build_iodone, make_xfer, rid_for, test_config,
};
use storvsc_rs::models::version::{PROTO_VERSION_WIN8, PROTO_VERSION_WIN10};

const READ_10: [u8; 10] = [0x28, 0, 0, 0, 0, 0, 0, 0, 0x10, 0];
const INQUIRY: [u8; 6] = [0x12, 0, 0, 0, 36, 0];

#[tokio::test]
async fn read_completion_sets_residual() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let mut xs = make_xfer(&h, &READ_10, vec![0u8; 8192]);
    xs.flags = XferFlags::DATA_IN;
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus = SRB_STATUS_SUCCESS;
        srb.datalen.set(4096);
    });
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();

    let mut done = h.midlayer.take();
    let (xs, result) = done.pop().expect("WTF");
    assert_eq!(result, XferResult::NoError);
    assert_eq!(xs.resid, 4096);
    assert_eq!(h.dmat.unloads(), 1, "map unloaded exactly once");
}

#[tokio::test]
async fn full_read_has_zero_residual() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let mut xs = make_xfer(&h, &READ_10, vec![0u8; 8192]);
    xs.flags = XferFlags::DATA_IN;
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus = SRB_STATUS_SUCCESS;
        srb.datalen.set(8192);
    });
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();

    let (xs, result) = h.midlayer.take().pop().expect("WTF");
    assert_eq!(result, XferResult::NoError);
    assert_eq!(xs.resid, 0);
}

#[tokio::test]
async fn overlong_reply_leaves_residual_unset() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let mut xs = make_xfer(&h, &READ_10, vec![0u8; 4096]);
    xs.flags = XferFlags::DATA_IN;
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus = SRB_STATUS_SUCCESS;
        srb.datalen.set(9000);
    });
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();

    let (xs, result) = h.midlayer.take().pop().expect("WTF");
    assert_eq!(result, XferResult::NoError);
    assert_eq!(xs.resid, 0, "residual untouched on a bogus length");
}

#[tokio::test]
async fn check_condition_delivers_autosense() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let xs = make_xfer(&h, &READ_10, Vec::new());
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::CheckCondition.raw();
        srb.iostatus = SRB_STATUS_ERROR | SRB_STATUS_AUTOSENSE_VALID;
        srb.senselen = 18;
        // fixed-format sense: MEDIUM ERROR, asc/ascq 0x11/0x00
        srb.data[0] = 0xf0;
        srb.data[2] = 0x03;
        srb.data[7] = 10;
        srb.data[12] = 0x11;
    });
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();

    let (xs, result) = h.midlayer.take().pop().expect("WTF");
    assert_eq!(result, XferResult::ScsiError(ScsiStatus::CheckCondition));

    let sense = SenseData::parse(&xs.sense).expect("WTF");
    assert_eq!(sense.sense_key, 0x03);
    assert_eq!(sense.asc, 0x11);
}

#[tokio::test]
async fn srb_failure_without_scsi_status_is_seltimeout() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let xs = make_xfer(&h, &READ_10, Vec::new());
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus = SRB_STATUS_ERROR;
    });
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();

    let (_, result) = h.midlayer.take().pop().expect("WTF");
    assert_eq!(result, XferResult::SelTimeout);
}

#[tokio::test]
async fn qualifier_bits_do_not_mask_success() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let xs = make_xfer(&h, &READ_10, Vec::new());
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus =
            SRB_STATUS_SUCCESS | SRB_STATUS_AUTOSENSE_VALID | SRB_STATUS_QUEUE_FROZEN;
    });
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();

    let (_, result) = h.midlayer.take().pop().expect("WTF");
    assert_eq!(result, XferResult::NoError);
}

#[tokio::test]
async fn malformed_request_ids_are_dropped() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let xs = make_xfer(&h, &READ_10, Vec::new());
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus = SRB_STATUS_SUCCESS;
    });
    // nonzero low half
    h.chan
        .push_reply(reply.bytes().to_vec(), rid_for(idx) | 0x1);
    // index out of range
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(1000));
    h.adapter.interrupt();
    assert!(h.midlayer.take().is_empty(), "both replies dropped");

    // the well-formed one still completes
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();
    assert_eq!(h.midlayer.take().len(), 1);
}

#[tokio::test]
async fn short_packet_is_a_framing_error() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let xs = make_xfer(&h, &READ_10, Vec::new());
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus = SRB_STATUS_SUCCESS;
    });
    h.chan.push_reply(vec![0u8; 32], rid_for(idx));
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));

    // the short packet aborts this pass before the good reply
    h.adapter.interrupt();
    assert!(h.midlayer.take().is_empty());

    // the next pass drains the good reply
    h.adapter.interrupt();
    assert_eq!(h.midlayer.take().len(), 1);
}

#[tokio::test]
async fn enumerate_schedules_one_rescan() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let pkt = build_bare(CommandOp::Enumerate);
    h.chan.push_reply(pkt.bytes().to_vec(), 0);
    h.chan.push_reply(pkt.bytes().to_vec(), 0);
    h.adapter.interrupt();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        h.midlayer.rescans.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "back-to-back enumerates coalesce"
    );
}

#[tokio::test]
async fn devgone_is_logged_and_ignored() {
    let h = attach_with(&[PROTO_VERSION_WIN10], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    let pkt = build_bare(CommandOp::DevGone);
    h.chan.push_reply(pkt.bytes().to_vec(), 0);
    h.adapter.interrupt();

    assert!(h.midlayer.take().is_empty());
    assert_eq!(
        h.midlayer.rescans.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn inquiry_fixup_applies_on_win8() {
    let h = attach_with(&[PROTO_VERSION_WIN8], test_config())
        .await
        .expect("WTF");
    h.chan.sent();

    // pretend the host already DMA'd its malformed reply into the buffer
    let mut data = vec![0u8; 36];
    data[0] = T_NODEVICE;
    data[4] = 31;

    let mut xs = make_xfer(&h, &INQUIRY, data);
    xs.flags = XferFlags::DATA_IN;
    let idx = xs.io.expect("WTF").index();
    h.adapter.scsi_cmd(xs).await;

    let reply = build_iodone(|srb| {
        srb.scsistatus = ScsiStatus::Good.raw();
        srb.iostatus = SRB_STATUS_SUCCESS;
        srb.datalen.set(36);
    });
    h.chan.push_reply(reply.bytes().to_vec(), rid_for(idx));
    h.adapter.interrupt();

    let (xs, result) = h.midlayer.take().pop().expect("WTF");
    assert_eq!(result, XferResult::NoError);
    assert_eq!(xs.data[2], 0x05, "version forced to SPC-3");
    assert_eq!(xs.data[3], 2, "response format repaired");
}
