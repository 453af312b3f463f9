// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The completion path: the channel interrupt handler and the per-CCB
//! completion it fans out to.
//!
//! Runs outside any engine lock except the brief windows of the reply
//! slot and the completing CCB; the midlayer is re-entered only through
//! its completion callback.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::{
    engine::{Adapter, lock},
    models::{
        opcode::CommandOp,
        slot::{CMD_SIZE, CommandSlot, INIT_RID},
        srb::{SRB_STATUS_AUTOSENSE_VALID, SRB_STATUS_SUCCESS, srb_status_code},
    },
    scsi::{
        inquiry::{INQUIRY_OPCODE, fixup_inquiry},
        xfer::{ScsiStatus, XferResult},
    },
    vmbus::ChannelError,
};

impl Adapter {
    /// Channel interrupt callback: drain pending packets one slot at a
    /// time and route them by request id and opcode.
    pub fn interrupt(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        loop {
            let mut slot = CommandSlot::zeroed();
            let (rlen, rid) = match self.chan.recv(slot.bytes_mut()) {
                Ok(v) => v,
                Err(ChannelError::Again) => break,
                Err(e) => {
                    warn!(error = %e, "failed to receive a packet");
                    break;
                },
            };
            if rlen == 0 {
                warn!("failed to receive a packet (empty)");
                break;
            }
            if rlen as usize != CMD_SIZE {
                warn!(rlen, "short read");
                return;
            }

            debug!(cmd = ?slot, rid = format_args!("{rid:#x}"), "receive");

            if rid == INIT_RID {
                *lock(&self.init_reply.slot) = slot;
                self.init_reply.notify.notify_one();
                continue;
            }

            match slot.header().opcode() {
                Some(CommandOp::IoDone) => self.complete_cmd(&slot, rid),
                Some(CommandOp::Enumerate) => self.schedule_probe(),
                _ => warn!(
                    op = slot.header().op_raw(),
                    "operation is not implemented"
                ),
            }
        }
    }

    /// Kick the midlayer's bus rescan from a task, once per burst of
    /// enumerate packets.
    fn schedule_probe(&self) {
        if self.probe_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let midlayer = self.midlayer.clone();
        let pending = self.probe_pending.clone();
        match self.rt.get() {
            Some(rt) => {
                rt.spawn(async move {
                    midlayer.rescan();
                    pending.store(false, Ordering::SeqCst);
                });
            },
            None => {
                midlayer.rescan();
                pending.store(false, Ordering::SeqCst);
            },
        }
    }

    fn complete_cmd(&self, slot: &CommandSlot, rid: u64) {
        let Some(pool) = self.pool.get() else {
            warn!(rid = format_args!("{rid:#x}"), "invalid response");
            return;
        };
        if rid & 0xffff_ffff != 0 || (rid >> 32) as usize >= pool.len() {
            warn!(rid = format_args!("{rid:#x}"), "invalid response");
            return;
        }
        let idx = (rid >> 32) as usize;

        let mut cell = lock(pool.cell(idx));
        cell.dmap.sync_post();
        cell.dmap.unload();

        let Some(mut xs) = cell.xfer.take() else {
            let abandoned = cell.abandoned;
            drop(cell);
            if abandoned {
                warn!(ccb = idx, "late completion for an abandoned CCB");
                pool.reclaim(idx);
            } else {
                warn!(ccb = idx, "completion without a transfer");
            }
            return;
        };
        drop(cell);

        let srb = slot.srb();
        let reqlen = xs.data_len();
        let reported = srb.datalen.get();

        if reported > reqlen {
            warn!(reported, reqlen, "transfer length too large");
        } else if reported != 0 {
            xs.resid = reqlen - reported;
        }

        let scsistatus = ScsiStatus::from_raw(srb.scsistatus);

        if scsistatus == ScsiStatus::CheckCondition
            && srb.iostatus & SRB_STATUS_AUTOSENSE_VALID != 0
        {
            let n = xs.sense.len().min(srb.senselen as usize);
            xs.sense[..n].copy_from_slice(&srb.data[..n]);
        }

        if scsistatus != ScsiStatus::Good {
            self.scsi_done(xs, XferResult::ScsiError(scsistatus));
            return;
        }

        let result = if srb_status_code(srb.iostatus) != SRB_STATUS_SUCCESS {
            XferResult::SelTimeout
        } else {
            if xs.cdb[0] == INQUIRY_OPCODE {
                if let Some(neg) = self.negotiated.get() {
                    fixup_inquiry(neg.proto, &mut xs.data, reported);
                }
            }
            XferResult::NoError
        };

        self.scsi_done(xs, result);
    }
}
