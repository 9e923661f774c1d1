//! RX descriptor ring.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::MemoryIo;
use crate::ring::{DmaControl, IndexQueue, RingStats, RxConfig, RxDescriptor, RxFlags};
use crate::{Error, Result};

/// Receive ring.
///
/// Armed descriptors sit on the busy queue waiting for the hardware to fill
/// them.  The head of the busy queue is the next descriptor the hardware will
/// complete, so [`Self::poll()`] only ever needs to look there.
///
/// Every completed packet must be consumed, either with [`Self::fetch()`] or
/// [`Self::drop_packet()`].  Both re-arm the descriptor.  The link has no
/// packet loss, only back-pressure - a descriptor that is never re-armed
/// eventually stalls the remote sender.
#[derive(Debug)]
pub struct RxRing {
    cfg: RxConfig,
    free: IndexQueue,
    busy: IndexQueue,
    stats: RingStats,
}

impl RxRing {
    /// Build the descriptor table described by `cfg`.  Every descriptor is
    /// bound to its packet buffer and starts disabled, on the free queue.
    /// Call [`Self::arm()`] to hand them to the hardware.
    pub fn new<I: MemoryIo>(io: &mut I, cfg: RxConfig) -> Result<Self> {
        cfg.validate()?;

        let mut ring = Self {
            free: IndexQueue::with_capacity(cfg.capacity),
            busy: IndexQueue::with_capacity(cfg.capacity),
            cfg,
            stats: RingStats::default(),
        };

        for idx in 0..ring.cfg.capacity {
            let desc = ring.cfg.desc_addr(idx);
            io.write_u32(desc + RxDescriptor::ctrl_offset(), 0)?;
            io.write_u32(
                desc + RxDescriptor::pkt_addr_offset(),
                ring.cfg.packet_addr(idx),
            )?;
            io.write_u32(
                desc + RxDescriptor::ctrl_offset(),
                ring.base_flags(idx).bits(),
            )?;
            ring.free.push_back(idx);
        }

        debug!(
            "Created RX ring at {:#010X} with {} descriptors, buffers at {:#010X}",
            ring.cfg.desc_base, ring.cfg.capacity, ring.cfg.buf_base
        );

        Ok(ring)
    }

    /// Enable every free descriptor, in order, and move it to the busy
    /// queue.  Returns the number of descriptors armed.
    pub fn arm<I: MemoryIo, C: DmaControl>(&mut self, io: &mut I, dma: &mut C) -> Result<usize> {
        let mut armed = 0;

        while let Some(idx) = self.free.front() {
            let flags = self.base_flags(idx) | RxFlags::ENABLE;
            io.write_u32(
                self.cfg.desc_addr(idx) + RxDescriptor::ctrl_offset(),
                flags.bits(),
            )?;
            self.free.pop_front();
            self.busy.push_back(idx);
            armed += 1;
        }

        if armed > 0 {
            trace!("Armed {armed} RX descriptors");
            dma.start_rx()?;
        }

        Ok(armed)
    }

    /// Check whether the oldest armed descriptor has been completed by the
    /// hardware.  Returns the size of the received packet if so.
    ///
    /// Does not consume the packet.
    pub fn poll<I: MemoryIo>(&mut self, io: &mut I) -> Result<Option<usize>> {
        let Some(idx) = self.busy.front() else {
            return Ok(None);
        };

        let ctrl = io.read_u32(self.cfg.desc_addr(idx) + RxDescriptor::ctrl_offset())?;
        let flags = RxFlags::from_bits_truncate(ctrl);
        if flags.contains(RxFlags::ENABLE) {
            return Ok(None);
        }

        let len = RxDescriptor::packet_len(ctrl);
        trace!("RX descriptor {idx} complete, {len} bytes");
        Ok(Some(len))
    }

    /// Copy the oldest received packet into `buf` and re-arm its descriptor.
    /// Returns the packet size.
    ///
    /// Returns [`Error::NoData`] if no packet is ready, and
    /// [`Error::BufferTooSmall`] if `buf` cannot hold the packet - in that
    /// case the packet is left in place so it can be fetched with a larger
    /// buffer, or dropped.
    pub fn fetch<I: MemoryIo, C: DmaControl>(
        &mut self,
        io: &mut I,
        dma: &mut C,
        buf: &mut [u8],
    ) -> Result<usize> {
        let len = self.poll(io)?.ok_or(Error::NoData)?;
        if len > buf.len() {
            return Err(Error::BufferTooSmall);
        }

        // poll() returned a size, so busy is non-empty
        let idx = self.busy.front().ok_or(Error::NoData)?;
        io.read_bytes(self.cfg.packet_addr(idx), &mut buf[..len])?;
        self.check_errors(io, idx)?;

        self.stats.packets += 1;
        self.stats.bytes += len as u64;

        self.recycle(io, dma)?;
        Ok(len)
    }

    /// Discard the oldest received packet and re-arm its descriptor.
    /// Returns false if no packet was ready.
    pub fn drop_packet<I: MemoryIo, C: DmaControl>(
        &mut self,
        io: &mut I,
        dma: &mut C,
    ) -> Result<bool> {
        let Some(len) = self.poll(io)? else {
            return Ok(false);
        };

        if let Some(idx) = self.busy.front() {
            debug!("Dropping {len} byte packet in RX descriptor {idx}");
        }
        self.stats.dropped += 1;

        self.recycle(io, dma)?;
        Ok(true)
    }

    /// Number of descriptors in the table
    pub fn capacity(&self) -> usize {
        self.cfg.capacity
    }

    /// Number of descriptors armed, or completed but not yet consumed
    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    /// Number of descriptors not handed to the hardware
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Busy descriptor indices, oldest first
    pub fn busy(&self) -> impl Iterator<Item = usize> + '_ {
        self.busy.iter()
    }

    pub fn config(&self) -> &RxConfig {
        &self.cfg
    }

    /// Counters for received packets
    pub fn stats(&self) -> RingStats {
        self.stats
    }

    // Completed descriptor goes back through free, and everything free is
    // re-armed, keeping busy in hardware scan order
    fn recycle<I: MemoryIo, C: DmaControl>(&mut self, io: &mut I, dma: &mut C) -> Result<()> {
        if let Some(idx) = self.busy.pop_front() {
            self.free.push_back(idx);
        }
        self.arm(io, dma).map(|_| ())
    }

    fn check_errors<I: MemoryIo>(&mut self, io: &mut I, idx: usize) -> Result<()> {
        let ctrl = io.read_u32(self.cfg.desc_addr(idx) + RxDescriptor::ctrl_offset())?;
        let flags = RxFlags::from_bits_truncate(ctrl);
        let errors = flags
            & (RxFlags::EEP
                | RxFlags::HEADER_CRC_ERROR
                | RxFlags::DATA_CRC_ERROR
                | RxFlags::TRUNCATED);
        if !errors.is_empty() {
            warn!("RX descriptor {idx} completed with errors {errors:?}");
            self.stats.errors += 1;
        }
        Ok(())
    }

    fn base_flags(&self, idx: usize) -> RxFlags {
        let mut flags = RxFlags::empty();
        if idx == self.cfg.capacity - 1 {
            flags |= RxFlags::WRAP;
        }
        if self.cfg.irq {
            flags |= RxFlags::IRQ;
        }
        flags
    }
}
