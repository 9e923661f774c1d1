//! DMA descriptor rings shared with SpaceWire link hardware.
//!
//! Each direction has a fixed table of descriptors, and a fixed buffer arena
//! carved into one buffer (TX: one header and one data buffer) per
//! descriptor.  A descriptor is bound to its buffers for its whole life.
//!
//! The hardware walks the table in order, wrapping at the descriptor with
//! the wrap flag set.  Software tracks each descriptor as either "free" or
//! "busy", in two FIFO queues of descriptor indices.  Descriptors only ever
//! move from the head of one queue to the tail of the other, so the busy
//! queue is always in the order the hardware will process it, and the head
//! of the free queue is always the next descriptor the hardware will look
//! at.
//!
//! Ring membership only changes inside the ring methods.  They assume a
//! single thread of control - if an interrupt handler also services a ring
//! the application must serialise access to it.
//!
//! See [`tx::TxRing`] and [`rx::RxRing`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod rx;
pub mod tx;

pub use rx::RxRing;
pub use tx::TxRing;

use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;

use crate::{Error, Result};

/// Descriptor tables must be aligned to this many bytes
pub const DESC_TABLE_ALIGN: u32 = 1024;

/// Number of TX descriptors that fit in one table
pub const MAX_TX_DESCRIPTORS: usize = (DESC_TABLE_ALIGN / TxDescriptor::stride()) as usize;

/// Number of RX descriptors that fit in one table
pub const MAX_RX_DESCRIPTORS: usize = (DESC_TABLE_ALIGN / RxDescriptor::stride()) as usize;

// Fields packed into the TX control word alongside the flags
const TX_HDR_LEN_MASK: u32 = 0xFF;
const TX_NON_CRC_SHIFT: u32 = 8;
const TX_NON_CRC_MASK: u32 = 0xF;

/// Largest TX data buffer - the data length word is 24 bits wide
pub const TX_MAX_DATA_LEN: usize = 0x00FF_FFFF;

/// Largest TX header buffer - the header length field is 8 bits wide
pub const TX_MAX_HEADER_LEN: usize = TX_HDR_LEN_MASK as usize;

/// Longest non-CRC prefix the TX control word can describe
pub const TX_MAX_NON_CRC_LEN: usize = TX_NON_CRC_MASK as usize;

/// Largest RX packet - the length field is 25 bits wide
pub const RX_MAX_PACKET_LEN: usize = RX_PKT_LEN_MASK as usize;

const RX_PKT_LEN_MASK: u32 = 0x01FF_FFFF;

bitflags! {
    /// Flags in the TX descriptor control word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxFlags: u32 {
        /// Descriptor owned by hardware, cleared once sent
        const ENABLE = 1 << 12;
        /// Last descriptor in the table
        const WRAP = 1 << 13;
        /// Interrupt on completion
        const IRQ = 1 << 14;
        /// Link error during transmission, set by hardware
        const LINK_ERROR = 1 << 15;
        /// Append header CRC
        const HEADER_CRC = 1 << 16;
        /// Append data CRC
        const DATA_CRC = 1 << 17;
    }
}

bitflags! {
    /// Flags in the RX descriptor control word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxFlags: u32 {
        /// Descriptor owned by hardware, cleared once a packet is received
        const ENABLE = 1 << 25;
        /// Last descriptor in the table
        const WRAP = 1 << 26;
        /// Interrupt on reception
        const IRQ = 1 << 27;
        /// Packet ended with an error end-of-packet
        const EEP = 1 << 28;
        /// Header CRC error detected by hardware
        const HEADER_CRC_ERROR = 1 << 29;
        /// Data CRC error detected by hardware
        const DATA_CRC_ERROR = 1 << 30;
        /// Packet truncated to the buffer size
        const TRUNCATED = 1 << 31;
    }
}

/// TX descriptor layout, as read by the hardware
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TxDescriptor {
    /// Flags, non-CRC prefix length and header length
    pub ctrl: u32,
    /// Address of the header buffer
    pub hdr_addr: u32,
    /// Length of data to send from the data buffer
    pub data_len: u32,
    /// Address of the data buffer
    pub data_addr: u32,
}

/// TxDescriptor offsets
impl TxDescriptor {
    pub const fn ctrl_offset() -> u32 {
        core::mem::offset_of!(TxDescriptor, ctrl) as u32
    }

    pub const fn hdr_addr_offset() -> u32 {
        core::mem::offset_of!(TxDescriptor, hdr_addr) as u32
    }

    pub const fn data_len_offset() -> u32 {
        core::mem::offset_of!(TxDescriptor, data_len) as u32
    }

    pub const fn data_addr_offset() -> u32 {
        core::mem::offset_of!(TxDescriptor, data_addr) as u32
    }

    pub const fn stride() -> u32 {
        core::mem::size_of::<Self>() as u32
    }

    /// Pack flags, non-CRC prefix length and header length into a control
    /// word
    pub const fn ctrl_word(flags: TxFlags, non_crc_len: usize, hdr_len: usize) -> u32 {
        flags.bits()
            | ((non_crc_len as u32 & TX_NON_CRC_MASK) << TX_NON_CRC_SHIFT)
            | (hdr_len as u32 & TX_HDR_LEN_MASK)
    }
}

/// RX descriptor layout, as read by the hardware
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RxDescriptor {
    /// Flags and received packet length
    pub ctrl: u32,
    /// Address of the packet buffer
    pub pkt_addr: u32,
}

/// RxDescriptor offsets
impl RxDescriptor {
    pub const fn ctrl_offset() -> u32 {
        core::mem::offset_of!(RxDescriptor, ctrl) as u32
    }

    pub const fn pkt_addr_offset() -> u32 {
        core::mem::offset_of!(RxDescriptor, pkt_addr) as u32
    }

    pub const fn stride() -> u32 {
        core::mem::size_of::<Self>() as u32
    }

    /// Received packet length from a control word
    pub const fn packet_len(ctrl: u32) -> usize {
        (ctrl & RX_PKT_LEN_MASK) as usize
    }
}

/// TX ring configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxConfig {
    /// Address of the descriptor table, 1 KiB aligned
    pub desc_base: u32,
    /// Address of the buffer arena, word aligned
    pub buf_base: u32,
    /// Number of descriptors
    pub capacity: usize,
    /// Size of each header buffer in bytes
    pub header_size: usize,
    /// Size of each data buffer in bytes
    pub data_size: usize,
    /// Request an interrupt when each packet has been sent
    pub irq: bool,
}

impl TxConfig {
    pub fn validate(&self) -> Result<()> {
        check_desc_base(self.desc_base)?;
        check_word_aligned(self.buf_base)?;
        check_capacity(self.capacity, MAX_TX_DESCRIPTORS)?;
        if self.header_size == 0 || self.header_size > TX_MAX_HEADER_LEN {
            return Err(Error::InvalidConfig);
        }
        if self.data_size > TX_MAX_DATA_LEN {
            return Err(Error::InvalidConfig);
        }
        check_arena(self.buf_base, self.capacity, self.slot_size())
    }

    /// Address of descriptor `idx`
    pub fn desc_addr(&self, idx: usize) -> u32 {
        self.desc_base + idx as u32 * TxDescriptor::stride()
    }

    /// Address of the header buffer bound to descriptor `idx`
    pub fn header_addr(&self, idx: usize) -> u32 {
        self.buf_base + (idx * self.slot_size()) as u32
    }

    /// Address of the data buffer bound to descriptor `idx`
    pub fn data_addr(&self, idx: usize) -> u32 {
        self.header_addr(idx) + word_align(self.header_size) as u32
    }

    /// Total bytes of buffer arena needed
    pub fn arena_size(&self) -> usize {
        self.capacity * self.slot_size()
    }

    fn slot_size(&self) -> usize {
        word_align(self.header_size) + word_align(self.data_size)
    }
}

/// RX ring configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxConfig {
    /// Address of the descriptor table, 1 KiB aligned
    pub desc_base: u32,
    /// Address of the buffer arena, word aligned
    pub buf_base: u32,
    /// Number of descriptors
    pub capacity: usize,
    /// Size of each packet buffer in bytes
    pub packet_size: usize,
    /// Request an interrupt when each packet has been received
    pub irq: bool,
}

impl RxConfig {
    pub fn validate(&self) -> Result<()> {
        check_desc_base(self.desc_base)?;
        check_word_aligned(self.buf_base)?;
        check_capacity(self.capacity, MAX_RX_DESCRIPTORS)?;
        if self.packet_size == 0 || self.packet_size > RX_MAX_PACKET_LEN {
            return Err(Error::InvalidConfig);
        }
        check_arena(self.buf_base, self.capacity, word_align(self.packet_size))
    }

    /// Address of descriptor `idx`
    pub fn desc_addr(&self, idx: usize) -> u32 {
        self.desc_base + idx as u32 * RxDescriptor::stride()
    }

    /// Address of the packet buffer bound to descriptor `idx`
    pub fn packet_addr(&self, idx: usize) -> u32 {
        self.buf_base + (idx * word_align(self.packet_size)) as u32
    }

    /// Total bytes of buffer arena needed
    pub fn arena_size(&self) -> usize {
        self.capacity * word_align(self.packet_size)
    }
}

/// Seam to the link controller, used to tell it descriptors have been
/// enabled.
pub trait DmaControl {
    /// (Re)start transmission - new TX descriptors are enabled
    fn start_tx(&mut self) -> Result<()>;

    /// (Re)start reception - RX descriptors have been re-armed
    fn start_rx(&mut self) -> Result<()>;
}

/// [`DmaControl`] for controllers that poll the descriptor tables by
/// themselves
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDmaControl;

impl DmaControl for NoDmaControl {
    fn start_tx(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_rx(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Per-ring transfer counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Packets transferred
    pub packets: u64,
    /// Bytes transferred
    pub bytes: u64,
    /// Packets the hardware flagged with an error
    pub errors: u64,
    /// Packets received but discarded without being fetched
    pub dropped: u64,
}

/// Fixed-capacity FIFO of descriptor indices
#[derive(Debug, Clone)]
pub(crate) struct IndexQueue {
    slots: Vec<u16>,
    head: usize,
    len: usize,
}

impl IndexQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity],
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn front(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.slots[self.head] as usize)
        }
    }

    pub(crate) fn pop_front(&mut self) -> Option<usize> {
        let idx = self.front()?;
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        Some(idx)
    }

    /// Returns false, leaving the queue unchanged, if it is already full
    pub(crate) fn push_back(&mut self, idx: usize) -> bool {
        if self.len == self.slots.len() {
            return false;
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = idx as u16;
        self.len += 1;
        true
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).map(move |i| self.slots[(self.head + i) % self.slots.len()] as usize)
    }
}

// Helper functions

const fn word_align(size: usize) -> usize {
    (size + 3) & !3
}

fn check_desc_base(addr: u32) -> Result<()> {
    if addr % DESC_TABLE_ALIGN != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

fn check_word_aligned(addr: u32) -> Result<()> {
    if addr % 4 != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

fn check_capacity(capacity: usize, max: usize) -> Result<()> {
    if capacity == 0 || capacity > max {
        Err(Error::InvalidConfig)
    } else {
        Ok(())
    }
}

fn check_arena(base: u32, capacity: usize, slot_size: usize) -> Result<()> {
    capacity
        .checked_mul(slot_size)
        .and_then(|size| u32::try_from(size).ok())
        .and_then(|size| base.checked_add(size))
        .map(|_| ())
        .ok_or(Error::InvalidConfig)
}
