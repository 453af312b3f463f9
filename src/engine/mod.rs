// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The adapter softc: attach, the CCB pool hooks, and the shared state
//! the handshake, submission and completion paths work over.
//!
//! Concurrency discipline: the negotiated parameters are written once
//! during attach and read-only afterwards; the free queue and the init
//! reply slot hide behind their own mutexes; a CCB's DMA map and gather
//! list belong to the single in-flight transfer bound to it, so
//! ownership moves from the submitter to the completer at submit time
//! and back at completion.

mod complete;
mod handshake;
pub mod pool;
mod submit;

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::AtomicBool,
};

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use tokio::{runtime::Handle, sync::Notify};
use tokio_util::sync::CancellationToken;
use tracing::info;
use zerocopy::IntoBytes;

use crate::{
    cfg::config::Config,
    dma::DmaMapper,
    models::{
        props::ChannelProps,
        slot::CommandSlot,
        version::{PROTO_VERSION_WIN8, ProtoVersion},
    },
    scsi::xfer::{CcbToken, Midlayer, Transfer, XferResult},
    vmbus::VmbusChannel,
};

use self::pool::CcbPool;

/// Lock a mutex, shrugging off poisoning: a panicked holder leaves
/// plain-old-data state that is still safe to read.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the bus glue matched this channel as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Scsi,
    /// Recognized but unused; keeps the 1-wide geometry.
    Ide,
}

/// Parameters fixed by a successful handshake.
pub(crate) struct Negotiated {
    pub proto: u16,
    /// Negotiated version speaks the extended I/O record.
    pub xio: bool,
    pub bus: u8,
    pub initiator: u8,
    #[allow(dead_code)]
    pub props: ChannelProps,
}

/// Landing slot for handshake replies; single writer (the interrupt
/// path on init ids), single waiter (the handshake helper).
pub(crate) struct ReplySlot {
    pub slot: Mutex<CommandSlot>,
    pub notify: Notify,
}

pub struct Adapter {
    pub(crate) cfg: Config,
    pub(crate) chan: Arc<dyn VmbusChannel>,
    pub(crate) dmat: Arc<dyn DmaMapper>,
    pub(crate) midlayer: Arc<dyn Midlayer>,
    pub(crate) is_scsi: bool,

    pub(crate) negotiated: OnceCell<Negotiated>,
    pub(crate) pool: OnceCell<CcbPool>,
    pub(crate) init_reply: ReplySlot,
    pub(crate) probe_pending: Arc<AtomicBool>,
    pub(crate) rt: OnceCell<Handle>,
    pub(crate) cancel: CancellationToken,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter").finish_non_exhaustive()
    }
}

impl Adapter {
    /// Open the channel, run the handshake, build the CCB pool and hand
    /// back the ready adapter.  Any failure here means the device does
    /// not appear.
    pub async fn attach(
        chan: Arc<dyn VmbusChannel>,
        dmat: Arc<dyn DmaMapper>,
        midlayer: Arc<dyn Midlayer>,
        cfg: Config,
        kind: DeviceKind,
    ) -> Result<Arc<Self>> {
        cfg.validate()?;

        let sc = Arc::new(Self {
            cfg,
            chan,
            dmat,
            midlayer,
            is_scsi: matches!(kind, DeviceKind::Scsi),
            negotiated: OnceCell::new(),
            pool: OnceCell::new(),
            init_reply: ReplySlot {
                slot: Mutex::new(CommandSlot::zeroed()),
                notify: Notify::new(),
            },
            probe_pending: Arc::new(AtomicBool::new(false)),
            rt: OnceCell::new(),
            cancel: CancellationToken::new(),
        });

        let _ = sc.rt.set(Handle::current());

        let isr_sc = Arc::downgrade(&sc);
        let userdata = ChannelProps::default();
        sc.chan
            .open(
                sc.cfg.adapter.ring_size(),
                userdata.as_bytes(),
                Box::new(move || {
                    if let Some(sc) = isr_sc.upgrade() {
                        sc.interrupt();
                    }
                }),
            )
            .context("failed to open channel")?;

        let neg = sc.connect().await?;
        info!(
            channel = sc.chan.channel_id(),
            proto = %ProtoVersion(neg.proto),
            "attached"
        );
        sc.negotiated
            .set(neg)
            .map_err(|_| anyhow!("adapter already attached"))?;

        let pool = CcbPool::new(&*sc.dmat, &sc.cfg.adapter)
            .context("failed to allocate CCBs")?;
        sc.pool
            .set(pool)
            .map_err(|_| anyhow!("CCB pool already initialized"))?;

        Ok(sc)
    }

    /// Pool hook: hand a free CCB to the midlayer, or nothing.
    pub fn acquire(&self) -> Option<CcbToken> {
        self.pool.get().and_then(CcbPool::acquire)
    }

    /// Pool hook: return a CCB after its transfer finished.
    pub fn release(&self, token: CcbToken) {
        if let Some(pool) = self.pool.get() {
            pool.release(token);
        }
    }

    /// Negotiated protocol version, zero until the handshake succeeds.
    pub fn proto(&self) -> u16 {
        self.negotiated.get().map_or(0, |n| n.proto)
    }

    /// Negotiated version speaks the extended I/O record.
    pub fn uses_extended_io(&self) -> bool {
        self.proto() >= PROTO_VERSION_WIN8
    }

    /// Openings count the midlayer should advertise.
    pub fn openings(&self) -> usize {
        self.pool.get().map_or(0, CcbPool::len)
    }

    pub fn bus_width(&self) -> u8 {
        if self.is_scsi { 64 } else { 1 }
    }

    pub fn adapter_target(&self) -> u8 {
        if self.is_scsi { 64 } else { 1 }
    }

    /// SCSI bus id adopted from the host's path field.
    pub fn scsi_bus(&self) -> u8 {
        self.negotiated.get().map_or(0, |n| n.bus)
    }

    /// Initiator id adopted from the host's target field.
    pub fn initiator(&self) -> u8 {
        self.negotiated.get().map_or(0, |n| n.initiator)
    }

    /// Stop processing channel interrupts.  Outstanding host requests
    /// are not retracted.
    pub fn detach(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn scsi_done(&self, xs: Box<Transfer>, result: XferResult) {
        xs.mark_done();
        self.midlayer.done(xs, result);
    }
}
