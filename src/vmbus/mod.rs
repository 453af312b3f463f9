// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The virtual-bus channel the engine drives.
//!
//! The channel is a bidirectional ring owned by the bus glue; the engine
//! consumes it through an opaque handle.  It accepts inline packets and
//! packets accompanied by a guest-physical gather list, and dispatches an
//! interrupt callback when the host posts replies.

use bitflags::bitflags;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The ring has no room right now; retry later.
    #[error("channel ring is full")]
    Again,
    /// The host revoked the channel.
    #[error("channel has been revoked")]
    Gone,
    /// An OS-level failure with its errno.
    #[error("channel failure ({errno})")]
    Faulted { errno: i32 },
}

/// Packet framing understood by the channel layer.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Inband = 0x6,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct PacketFlags: u16 {
        /// Ask the host for a completion packet carrying our request id.
        const REQUEST_COMPLETION = 0x1;
    }
}

/// Gather list describing a physically scattered buffer for the host:
/// total length, byte offset within the first page, and one page frame
/// number per segment.
#[derive(Debug, Clone, Default)]
pub struct PageRange {
    pub len: u32,
    pub offset: u32,
    pub pfns: Vec<u64>,
}

impl PageRange {
    pub fn with_capacity(nsge: usize) -> Self {
        Self {
            len: 0,
            offset: 0,
            pfns: Vec::with_capacity(nsge),
        }
    }
}

/// Interrupt callback installed at channel open.
pub type Isr = Box<dyn Fn() + Send + Sync>;

/// Opaque handle to one virtual SCSI channel.
///
/// Implementations must not invoke the installed ISR synchronously from
/// inside `send`/`send_page_range`; replies are delivered from the bus
/// interrupt context, never from the submitter's stack.
pub trait VmbusChannel: Send + Sync {
    /// Open the ring and install the interrupt callback.
    fn open(
        &self,
        ring_size: usize,
        userdata: &[u8],
        isr: Isr,
    ) -> Result<(), ChannelError>;

    /// Queue one inline packet.
    fn send(
        &self,
        bytes: &[u8],
        rid: u64,
        ptype: PacketType,
        flags: PacketFlags,
    ) -> Result<(), ChannelError>;

    /// Queue one packet accompanied by a gather list.  Completion is
    /// implied for page-range packets.
    fn send_page_range(
        &self,
        range: &PageRange,
        bytes: &[u8],
        rid: u64,
    ) -> Result<(), ChannelError>;

    /// Pull one pending packet into `buf`; yields its length and request
    /// id.  `Err(Again)` means the ring is drained.
    fn recv(&self, buf: &mut [u8]) -> Result<(u32, u64), ChannelError>;

    /// Channel id assigned by the bus, for diagnostics.
    fn channel_id(&self) -> u32;
}
