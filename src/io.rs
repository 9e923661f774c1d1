//! Access to memory shared with link hardware, and to the local shadow of
//! remote state.
//!
//! Descriptor tables and buffer arenas live in memory the DMA engine also
//! reads and writes.  The local shadow is ordinary memory.  Both are reached
//! through [`MemoryIo`], so rings and mirrors work unchanged against:
//!
//! - [`RamIo`] - direct volatile access, for use on the target itself
//! - [`BufferIo`] - a heap-allocated arena with a base address, for hosts,
//!   simulations and tests
//!
//! # Address Space
//!
//! Methods use absolute 32-bit addresses as they appear in the memory map of
//! the system running the link.  Implementations translate these to whatever
//! internal representation they use.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;

use crate::{Error, Result};

/// Trait for accessing a memory region.
pub trait MemoryIo {
    /// Atomic read u32 operation
    fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Atomic write u32 operation
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Bulk read access, no need for atomicity
    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Bulk write access, no need for atomicity
    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Check that `len` bytes starting at `addr` may be accessed.  Used to
    /// validate ranges up front, before any state is committed.
    fn check_range(&self, addr: u32, len: usize) -> Result<()> {
        let _ = (addr, len);
        Ok(())
    }
}

/// Memory I/O implementation using direct RAM access
#[derive(Clone, Copy)]
pub struct RamIo;

impl RamIo {
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {}
    }
}

impl MemoryIo for RamIo {
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u32) })
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) };
        Ok(())
    }

    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { core::ptr::read_volatile((addr as usize + i) as *const u8) };
        }
        Ok(())
    }

    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        for (i, byte) in data.iter().enumerate() {
            unsafe { core::ptr::write_volatile((addr as usize + i) as *mut u8, *byte) };
        }
        Ok(())
    }
}

/// Memory I/O implementation backed by a heap buffer mapped at `base`.
///
/// Words are stored little-endian.  Every access is bounds checked and
/// fails with [`Error::OutOfBounds`] rather than touching memory outside
/// the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferIo {
    base: u32,
    mem: Vec<u8>,
}

impl BufferIo {
    /// Create a zeroed region of `size` bytes starting at `base`.
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            mem: vec![0u8; size],
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    /// Borrow `len` bytes at absolute address `addr`
    pub fn slice(&self, addr: u32, len: usize) -> Result<&[u8]> {
        let start = self.offset(addr, len)?;
        Ok(&self.mem[start..start + len])
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize> {
        let out_of_bounds = Error::OutOfBounds { addr, len };
        let start = addr.checked_sub(self.base).ok_or(out_of_bounds)? as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.mem.len() => Ok(start),
            _ => Err(out_of_bounds),
        }
    }
}

impl MemoryIo for BufferIo {
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read_bytes(addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let start = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = self.offset(addr, data.len())?;
        self.mem[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<()> {
        self.offset(addr, len).map(|_| ())
    }
}
