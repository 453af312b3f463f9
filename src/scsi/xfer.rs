// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The midlayer-facing transfer descriptor and completion surface.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bitflags::bitflags;

use crate::models::{slot::CMD_SIZE, srb::SENSE_DATA_LEN};

bitflags! {
    /// Submission hints carried on a transfer.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct XferFlags: u32 {
        /// Wait for the completion inside the submission call.
        const POLL = 0x01;
        /// While polling, busy-delay instead of sleeping.
        const NOSLEEP = 0x02;
        const DATA_IN = 0x10;
        const DATA_OUT = 0x20;
    }
}

/// SCSI status byte of a completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiStatus {
    Good,
    CheckCondition,
    Busy,
    ReservationConflict,
    TaskSetFull,
    AcaActive,
    TaskAborted,
    Other(u8),
}

impl ScsiStatus {
    #[inline]
    pub fn from_raw(v: u8) -> Self {
        match v {
            0x00 => Self::Good,
            0x02 => Self::CheckCondition,
            0x08 => Self::Busy,
            0x18 => Self::ReservationConflict,
            0x28 => Self::TaskSetFull,
            0x30 => Self::AcaActive,
            0x40 => Self::TaskAborted,
            other => Self::Other(other),
        }
    }

    #[inline]
    pub fn raw(&self) -> u8 {
        match *self {
            Self::Good => 0x00,
            Self::CheckCondition => 0x02,
            Self::Busy => 0x08,
            Self::ReservationConflict => 0x18,
            Self::TaskSetFull => 0x28,
            Self::AcaActive => 0x30,
            Self::TaskAborted => 0x40,
            Self::Other(v) => v,
        }
    }
}

/// Outcome surfaced to the midlayer for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferResult {
    /// Completed clean.
    NoError,
    /// A synthetic CHECK CONDITION built by the driver; the sense area
    /// holds the autosense.
    Sense,
    /// The host reported a nonzero SCSI status.  For CHECK CONDITION
    /// with valid autosense the sense area has been filled.
    ScsiError(ScsiStatus),
    /// The host-side request block failed without a SCSI status.
    SelTimeout,
    /// Polled submission exhausted its budget.
    Timeout,
    /// The driver could not get the request onto the channel.
    DriverStuffup,
}

/// Handle to one pool slot, given out by `acquire` and returned through
/// `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcbToken(pub(crate) u16);

impl CcbToken {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One pending SCSI operation handed in by the midlayer.
///
/// The midlayer acquires a CCB, stashes it in `io` and submits; the
/// engine owns the transfer until it comes back through
/// [`Midlayer::done`], at which point the midlayer releases the CCB.
#[derive(Debug)]
pub struct Transfer {
    pub target: u8,
    pub lun: u8,

    pub cdb: [u8; CMD_SIZE],
    pub cdb_len: usize,

    pub flags: XferFlags,

    /// Guest buffer the host DMAs into or out of.  Empty for
    /// non-data commands.
    pub data: Vec<u8>,

    /// Bytes of `data` the host did not move, set at completion.
    pub resid: u32,

    /// Autosense landing area.
    pub sense: [u8; SENSE_DATA_LEN],

    pub io: Option<CcbToken>,

    done: Arc<AtomicBool>,
}

impl Transfer {
    pub fn new(target: u8, lun: u8) -> Self {
        Self {
            target,
            lun,
            cdb: [0u8; CMD_SIZE],
            cdb_len: 0,
            flags: XferFlags::default(),
            data: Vec::new(),
            resid: 0,
            sense: [0u8; SENSE_DATA_LEN],
            io: None,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Copy a CDB into the transfer.  Panics on CDBs larger than the
    /// command slot; the length field stays writable for callers that
    /// need to describe one anyway.
    pub fn cdb(mut self, cdb: &[u8]) -> Self {
        self.cdb[..cdb.len()].copy_from_slice(cdb);
        self.cdb_len = cdb.len();
        self
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn flags(mut self, flags: XferFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn data_len(&self) -> u32 {
        self.data.len() as u32
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn done_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.done)
    }
}

/// The guest's generic SCSI framework, as seen from the engine.
pub trait Midlayer: Send + Sync {
    /// Completion callback; every submitted transfer comes back through
    /// here exactly once.
    fn done(&self, xs: Box<Transfer>, result: XferResult);

    /// Bus-rescan entry, scheduled when the host announces a topology
    /// change.
    fn rescan(&self);
}
