// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The bounded pool of command control blocks.
//!
//! Each CCB owns a DMA map created once at pool construction and a
//! gather-list buffer sized for the worst-case transfer, so the
//! submission path never allocates.  A CCB is either on the free queue
//! or attached to exactly one in-flight transfer.

use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::{
    cfg::config::AdapterConfig,
    dma::{DmaMap, DmaMapper},
    engine::lock,
    scsi::xfer::{CcbToken, Transfer},
    vmbus::PageRange,
};

pub(crate) struct CcbCell {
    /// The in-flight transfer this CCB is bound to.
    pub xfer: Option<Box<Transfer>>,
    pub dmap: Box<dyn DmaMap>,
    pub sgl: PageRange,
    pub nsge: usize,
    /// A polled submission gave up on this slot; it stays off the free
    /// queue and any late host reply is dropped.
    pub abandoned: bool,
}

pub struct CcbPool {
    cells: Vec<Mutex<CcbCell>>,
    free: Mutex<Vec<u16>>,
}

impl CcbPool {
    pub fn new(dmat: &dyn DmaMapper, cfg: &AdapterConfig) -> Result<Self> {
        let max_sge = cfg.max_sge();
        let mut cells = Vec::with_capacity(cfg.max_ccbs);
        let mut free = Vec::with_capacity(cfg.max_ccbs);

        for i in 0..cfg.max_ccbs {
            let dmap = dmat
                .create_map(cfg.max_transfer as usize, max_sge)
                .with_context(|| format!("failed to create a CCB memory map ({i})"))?;
            cells.push(Mutex::new(CcbCell {
                xfer: None,
                dmap,
                sgl: PageRange::with_capacity(max_sge + 1),
                nsge: 0,
                abandoned: false,
            }));
            free.push(i as u16);
        }

        debug!(nccb = cells.len(), max_sge, "CCB pool ready");
        Ok(Self {
            cells,
            free: Mutex::new(free),
        })
    }

    /// Pop the head of the free queue, or nothing; never blocks.
    pub fn acquire(&self) -> Option<CcbToken> {
        lock(&self.free).pop().map(CcbToken)
    }

    /// Clear the transfer back-pointer and push onto the head of the
    /// free queue.  An abandoned slot stays out until the host replies
    /// to its outstanding request.
    pub fn release(&self, token: CcbToken) {
        let mut cell = lock(&self.cells[token.index()]);
        if cell.abandoned {
            warn!(
                ccb = token.index(),
                "leaking abandoned CCB until the host replies"
            );
            return;
        }
        cell.xfer = None;
        drop(cell);
        lock(&self.free).push(token.0);
    }

    /// Put an abandoned slot back into service once the host finally
    /// answered its request.
    pub(crate) fn reclaim(&self, idx: usize) {
        let mut cell = lock(&self.cells[idx]);
        cell.abandoned = false;
        cell.xfer = None;
        drop(cell);
        lock(&self.free).push(idx as u16);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Free-queue depth, for diagnostics.
    pub fn free_count(&self) -> usize {
        lock(&self.free).len()
    }

    pub(crate) fn cell(&self, idx: usize) -> &Mutex<CcbCell> {
        &self.cells[idx]
    }
}

impl Drop for CcbPool {
    fn drop(&mut self) {
        for cell in &self.cells {
            let mut cell = lock(cell);
            cell.dmap.sync_post();
            cell.dmap.unload();
        }
    }
}
