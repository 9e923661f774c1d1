//! RMAP link layer for a Remote Data Compression Unit (RDCU) attached over
//! SpaceWire.
//!
//! This crate implements the on-board side of a non-blocking "write, then
//! sync" model for accessing the registers and SRAM of a remote device.  The
//! host keeps a local shadow of remote state, submits RMAP commands for the
//! parts it wants to push or pull, and later polls for the replies to bring
//! the two sides back in step.  Nothing in the crate ever blocks waiting for
//! the link.
//!
//! `no_std`.  Requires `alloc` for packet paths and payloads.
//!
//! ## Architecture
//!
//! Three layers, leaves first:
//!
//! - **Codec** ([`rmap`], [`crc`]) - translates an [`rmap::RmapPacket`] to and
//!   from the exact ECSS-E-ST-50-52C wire layout, including the RMAP CRC8.
//! - **Transport** ([`ring`], [`link`]) - a pair of fixed-capacity DMA
//!   descriptor rings (TX and RX) shared with GRSPW2-style link hardware.
//!   Each ring splits its descriptors into a "free" and a "busy" FIFO whose
//!   order always equals the order the hardware scans the descriptor table.
//! - **Mirror** ([`mirror`]) - a transaction log whose slot index doubles as
//!   the RMAP transaction id.  Commands are built with the codec and sent via
//!   a [`link::Link`]; replies are matched back to their slot and read data is
//!   placed in the local shadow.
//!
//! Memory shared with hardware (descriptor tables, buffer arenas) and the
//! local shadow are both accessed through the [`io::MemoryIo`] trait, so the
//! same code runs against real RAM ([`io::RamIo`]) or a simulated arena
//! ([`io::BufferIo`]).
//!
//! ## Synchronisation
//!
//! [`mirror::RemoteMirror::pending_count()`] drains any replies that have
//! arrived and returns the number of transactions still outstanding.  This is
//! the only synchronisation primitive.  Retry budgets, timeouts and back-off
//! are left to the caller, who typically polls `pending_count()` a bounded
//! number of times:
//!
//! ```rust,ignore
//! mirror.sync_from_remote(RDCU_SRAM_START, SHADOW_SRAM, 4096)?;
//! let mut polls = 0;
//! while mirror.pending_count()? > 0 {
//!     polls += 1;
//!     if polls > MAX_POLLS {
//!         mirror.reset();
//!         break;
//!     }
//!     delay_us(100);
//! }
//! ```
//!
//! None of the types are safe for concurrent or re-entrant use.  If an
//! interrupt handler services the rings, it must only call the same
//! reclaim/poll entry points the polling path uses, inside a critical section
//! provided by the application.
//!
//! ## Modules
//!
//! - [`crc`] - RMAP CRC8
//! - [`rmap`] - RMAP packets and their wire codec
//! - [`io`] - Access to shared memory and the local shadow
//! - [`ring`] - TX/RX descriptor rings
//! - [`link`] - Transport boundary and the descriptor-ring implementation
//! - [`mirror`] - Transaction log and remote mirror manager

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod crc;
pub mod io;
pub mod link;
pub mod mirror;
pub mod ring;
pub mod rmap;

pub use rmap::ParseError;

/// RMAP link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Command code is not one of the 11 legal RMAP codes
    #[error("invalid RMAP command code {0:#04x}")]
    InvalidCommand(u8),
    /// Destination path exceeds the maximum length
    #[error("destination path too long ({0} bytes)")]
    PathTooLong(usize),
    /// Reply path exceeds the maximum length
    #[error("reply path too long ({0} bytes)")]
    ReplyPathTooLong(usize),
    /// Reply path is not a multiple of 4 bytes
    #[error("reply path length {0} is not a multiple of 4")]
    ReplyPathNotAligned(usize),
    /// Data length does not fit the 24-bit length field
    #[error("data length {0} exceeds the 24-bit length field")]
    DataTooLong(usize),
    /// Payload too large for buffer or transaction
    #[error("payload too large")]
    PayloadTooLarge,
    /// Buffer too small for operation
    #[error("buffer too small")]
    BufferTooSmall,
    /// Non-CRC prefix inconsistent with the header it is applied to
    #[error("non-CRC prefix of {prefix} bytes invalid for {header} byte header")]
    InvalidPrefix { prefix: usize, header: usize },
    /// Invalid configuration
    #[error("invalid configuration")]
    InvalidConfig,
    /// Descriptor table or buffer not aligned
    #[error("address not aligned")]
    NotAligned,
    /// No free descriptor, even after reclaiming completed ones
    #[error("no descriptor available")]
    NoDescriptorAvailable,
    /// No data available
    #[error("no data available")]
    NoData,
    /// Access outside of a memory region
    #[error("access of {len} bytes at {addr:#010x} out of bounds")]
    OutOfBounds { addr: u32, len: usize },
    /// All transaction slots are in use
    #[error("transaction log exhausted")]
    Exhausted,
    /// Received buffer is not a valid RMAP packet
    #[error("malformed packet: {0}")]
    Parse(#[from] ParseError),
}

/// Type to represent the result of an RMAP link operation
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_key(buf: &[u8]) -> Result<u8> {
        let pkt = rmap::RmapPacket::parse(buf)?;
        Ok(pkt.key())
    }

    #[test]
    fn parse_errors_convert() {
        assert_eq!(
            parse_key(&[0xFE, 0x02, 0x4C, 0x00]),
            Err(Error::Parse(ParseError::ProtocolId(0x02)))
        );
        let msg = std::format!("{}", Error::Parse(ParseError::ProtocolId(0x02)));
        assert_eq!(msg, "malformed packet: protocol id 0x02 is not RMAP");
    }
}
