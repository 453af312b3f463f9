// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The submission path: one midlayer transfer in, one wire packet out.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    dma::{DmaDirection, PAGE_MASK, atop},
    engine::{Adapter, lock},
    models::{
        header::CmdHeader,
        opcode::CommandOp,
        slot::{CMD_SIZE, CommandSlot, SRB_DATA_OFFSET},
        srb::{CmdIo, CmdXio, SENSE_DATA_LEN, SENSE_DATA_LEN_WIN7, SrbDirection, SrbFlags},
    },
    scsi::{
        sense::fill_illegal_opcode,
        xfer::{Transfer, XferFlags, XferResult},
    },
    vmbus::{PacketFlags, PacketType},
};

impl Adapter {
    /// Submit one transfer.  All outcomes, including refusals, come back
    /// through the midlayer's completion callback.
    pub async fn scsi_cmd(&self, mut xs: Box<Transfer>) {
        if xs.cdb_len > CMD_SIZE {
            warn!(cdblen = xs.cdb_len, "CDB is too big");
            fill_illegal_opcode(&mut xs.sense);
            self.scsi_done(xs, XferResult::Sense);
            return;
        }

        let Some(neg) = self.negotiated.get() else {
            warn!("transfer submitted before the handshake");
            self.scsi_done(xs, XferResult::DriverStuffup);
            return;
        };
        let Some(pool) = self.pool.get() else {
            warn!("transfer submitted before the CCB pool");
            self.scsi_done(xs, XferResult::DriverStuffup);
            return;
        };
        let Some(token) = xs.io else {
            warn!("transfer submitted without a CCB");
            self.scsi_done(xs, XferResult::DriverStuffup);
            return;
        };

        let datalen = xs.data_len();
        let opcode = xs.cdb[0];

        let mut slot = CommandSlot::zeroed();
        *slot.header_mut() = CmdHeader::request(CommandOp::ScsiIo);

        let dir;
        let xio_flags;
        {
            let srb = slot.srb_mut();
            srb.initiator = neg.initiator;
            srb.bus = neg.bus;
            srb.target = xs.target;
            srb.lun = xs.lun;
            srb.cdblen = xs.cdb_len as u8;

            match (
                xs.flags.contains(XferFlags::DATA_IN),
                xs.flags.contains(XferFlags::DATA_OUT),
            ) {
                (true, false) => {
                    srb.direction = SrbDirection::Read as u8;
                    xio_flags = SrbFlags::DATA_IN;
                    dir = Some(DmaDirection::Write);
                },
                (false, true) => {
                    srb.direction = SrbDirection::Write as u8;
                    xio_flags = SrbFlags::DATA_OUT;
                    dir = Some(DmaDirection::Read);
                },
                _ => {
                    srb.direction = SrbDirection::None as u8;
                    xio_flags = SrbFlags::NO_DATA_TRANSFER;
                    dir = None;
                },
            }

            srb.datalen.set(datalen);
            if neg.xio {
                srb.reqlen.set(size_of::<CmdXio>() as u16);
                srb.senselen = SENSE_DATA_LEN as u8;
            } else {
                srb.reqlen.set(size_of::<CmdIo>() as u16);
                srb.senselen = SENSE_DATA_LEN_WIN7 as u8;
            }
        }

        // The CDB may be longer than the nominal inline area; it still
        // fits the slot tail.
        let n = xs.cdb_len.min(CMD_SIZE - SRB_DATA_OFFSET);
        slot.bytes_mut()[SRB_DATA_OFFSET..SRB_DATA_OFFSET + n]
            .copy_from_slice(&xs.cdb[..n]);

        if neg.xio {
            slot.xio_mut().set_srbflags(xio_flags);
        }

        let rid = (token.index() as u64) << 32;
        let polled = xs.flags.contains(XferFlags::POLL);
        let nosleep = xs.flags.contains(XferFlags::NOSLEEP);
        let done = xs.done_handle();

        let mut cell = lock(pool.cell(token.index()));

        if datalen > 0 {
            let addr = xs.data.as_ptr() as u64;
            if let Err(e) = cell.dmap.load(addr, datalen, dir) {
                warn!(datalen, error = %e, "failed to load transfer");
                drop(cell);
                self.scsi_done(xs, XferResult::DriverStuffup);
                return;
            }

            let cell = &mut *cell;
            cell.sgl.len = datalen;
            cell.sgl.offset = (addr & PAGE_MASK) as u32;
            cell.sgl.pfns.clear();
            for seg in cell.dmap.segs() {
                cell.sgl.pfns.push(atop(seg.addr));
            }
            cell.nsge = cell.sgl.pfns.len();
        }

        cell.xfer = Some(xs);

        let rv = if datalen > 0 {
            self.chan.send_page_range(&cell.sgl, slot.bytes(), rid)
        } else {
            self.chan.send(
                slot.bytes(),
                rid,
                PacketType::Inband,
                PacketFlags::REQUEST_COMPLETION,
            )
        };

        if let Err(e) = rv {
            warn!(
                opcode = format_args!("{opcode:#x}"),
                error = %e,
                "failed to submit operation"
            );
            if datalen > 0 {
                cell.dmap.unload();
            }
            let xs = cell.xfer.take();
            drop(cell);
            if let Some(xs) = xs {
                self.scsi_done(xs, XferResult::DriverStuffup);
            }
            return;
        }

        drop(cell);

        debug!(
            opcode = format_args!("{opcode:#x}"),
            datalen, polled, "submitted"
        );

        if polled {
            self.poll_completion(token.index(), opcode, datalen, nosleep, &done)
                .await;
        }
    }

    /// Wait for a polled transfer by alternating the interrupt handler
    /// with short sleeps.  Exhausting the budget reports a timeout but
    /// cannot retract the outstanding host request: the CCB is marked
    /// abandoned and stays off the free queue.
    async fn poll_completion(
        &self,
        idx: usize,
        opcode: u8,
        datalen: u32,
        nosleep: bool,
        done: &AtomicBool,
    ) {
        let mut timo = self.cfg.poll.budget;
        loop {
            if done.load(Ordering::Acquire) {
                break;
            }
            if nosleep {
                std::thread::sleep(self.cfg.poll.busy_delay());
            } else {
                sleep(self.cfg.poll.sleep_tick()).await;
            }
            self.interrupt();
            timo -= 1;
            if timo == 0 {
                break;
            }
        }

        if !done.load(Ordering::Acquire) {
            warn!(
                opcode = format_args!("{opcode:#x}"),
                datalen, "operation timed out"
            );
            let Some(pool) = self.pool.get() else { return };
            let mut cell = lock(pool.cell(idx));
            cell.abandoned = true;
            let xs = cell.xfer.take();
            drop(cell);
            if let Some(xs) = xs {
                self.scsi_done(xs, XferResult::Timeout);
            }
        }
    }
}
