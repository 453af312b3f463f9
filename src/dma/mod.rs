// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! DMA mapping facility the engine consumes.
//!
//! A mapper turns a guest-virtual buffer into a list of page-granular
//! guest-physical segments.  Maps are created once per CCB at pool
//! construction and re-loaded for every data-carrying transfer.

use anyhow::Result;
use thiserror::Error;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_MASK: u64 = (PAGE_SIZE as u64) - 1;

/// Page frame number of a guest-physical address.
#[inline]
pub fn atop(addr: u64) -> u64 {
    addr >> PAGE_SHIFT
}

#[derive(Debug, Error)]
pub enum DmaError {
    #[error("no resources to map {0} bytes")]
    NoResources(u32),
    #[error("buffer needs more than {0} segments")]
    TooManySegments(usize),
}

/// Which party moves the data through the mapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// The device writes guest memory (a data-in transfer).
    Write,
    /// The device reads guest memory (a data-out transfer).
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    pub addr: u64,
    pub len: u32,
}

pub trait DmaMapper: Send + Sync {
    /// Create a map able to carry `maxsize` bytes split into up to
    /// `nsegments` page-granular segments.
    fn create_map(&self, maxsize: usize, nsegments: usize) -> Result<Box<dyn DmaMap>>;
}

pub trait DmaMap: Send {
    /// Load a guest buffer into the map.  `dir` biases the mapping for
    /// transfers that declare a direction; direction-less data commands
    /// pass `None`.
    fn load(
        &mut self,
        addr: u64,
        len: u32,
        dir: Option<DmaDirection>,
    ) -> Result<(), DmaError>;

    /// Segments of the currently loaded buffer; empty when unloaded.
    fn segs(&self) -> &[DmaSegment];

    /// Post-transfer synchronization (both directions).
    fn sync_post(&mut self);

    fn unload(&mut self);
}
