//! TX descriptor ring.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::MemoryIo;
use crate::ring::{DmaControl, IndexQueue, RingStats, TX_HDR_LEN_MASK, TX_MAX_NON_CRC_LEN, TxConfig};
use crate::ring::{TxDescriptor, TxFlags};
use crate::{Error, Result};

/// Transmit ring.
///
/// Packets are copied into the buffers bound to the descriptor at the head
/// of the free queue, which is then enabled and moved to the tail of the busy
/// queue.  Descriptors only return to the free queue once the hardware has
/// cleared their enable flag, which is checked lazily on the next
/// [`Self::enqueue()`] or an explicit [`Self::reclaim()`].
#[derive(Debug)]
pub struct TxRing {
    cfg: TxConfig,
    free: IndexQueue,
    busy: IndexQueue,
    stats: RingStats,
}

impl TxRing {
    /// Build the descriptor table described by `cfg`.  Every descriptor is
    /// bound to its buffers and starts disabled, on the free queue.
    pub fn new<I: MemoryIo>(io: &mut I, cfg: TxConfig) -> Result<Self> {
        cfg.validate()?;

        let mut ring = Self {
            free: IndexQueue::with_capacity(cfg.capacity),
            busy: IndexQueue::with_capacity(cfg.capacity),
            cfg,
            stats: RingStats::default(),
        };

        for idx in 0..ring.cfg.capacity {
            let desc = ring.cfg.desc_addr(idx);

            // Disable first, so the hardware ignores the descriptor while the
            // rest is written
            io.write_u32(desc + TxDescriptor::ctrl_offset(), 0)?;
            io.write_u32(
                desc + TxDescriptor::hdr_addr_offset(),
                ring.cfg.header_addr(idx),
            )?;
            io.write_u32(desc + TxDescriptor::data_len_offset(), 0)?;
            io.write_u32(
                desc + TxDescriptor::data_addr_offset(),
                ring.cfg.data_addr(idx),
            )?;
            io.write_u32(
                desc + TxDescriptor::ctrl_offset(),
                ring.base_flags(idx).bits(),
            )?;
            ring.free.push_back(idx);
        }

        debug!(
            "Created TX ring at {:#010X} with {} descriptors, buffers at {:#010X}",
            ring.cfg.desc_base, ring.cfg.capacity, ring.cfg.buf_base
        );

        Ok(ring)
    }

    /// Move every descriptor the hardware has finished with from the head of
    /// the busy queue to the free queue.  Stops at the first descriptor still
    /// enabled, as the hardware processes them in order.
    ///
    /// Returns the number of descriptors reclaimed.
    pub fn reclaim<I: MemoryIo>(&mut self, io: &mut I) -> Result<usize> {
        let mut reclaimed = 0;

        while let Some(idx) = self.busy.front() {
            let desc = self.cfg.desc_addr(idx);
            let ctrl = io.read_u32(desc + TxDescriptor::ctrl_offset())?;
            let flags = TxFlags::from_bits_truncate(ctrl);
            if flags.contains(TxFlags::ENABLE) {
                break;
            }

            if flags.contains(TxFlags::LINK_ERROR) {
                warn!("TX descriptor {idx} completed with link error");
                self.stats.errors += 1;
            } else {
                let data_len = io.read_u32(desc + TxDescriptor::data_len_offset())? as u64;
                let hdr_len = (ctrl & TX_HDR_LEN_MASK) as u64;
                self.stats.packets += 1;
                self.stats.bytes += hdr_len + data_len;
            }

            self.busy.pop_front();
            self.free.push_back(idx);
            reclaimed += 1;
        }

        if reclaimed > 0 {
            trace!(
                "Reclaimed {reclaimed} TX descriptors, {} free",
                self.free.len()
            );
        }

        Ok(reclaimed)
    }

    /// Queue a packet for transmission.
    ///
    /// Arguments:
    /// - `header` - header bytes, including any routing path
    /// - `data` - payload, may be empty
    /// - `non_crc_len` - number of leading header bytes excluded from the
    ///   header CRC, i.e. the routing path
    ///
    /// Returns [`Error::NoDescriptorAvailable`] if every descriptor is still
    /// owned by the hardware.  Nothing is copied in that case, so the caller
    /// may simply retry later.
    pub fn enqueue<I: MemoryIo, C: DmaControl>(
        &mut self,
        io: &mut I,
        dma: &mut C,
        header: &[u8],
        data: &[u8],
        non_crc_len: usize,
    ) -> Result<()> {
        if header.len() > self.cfg.header_size || data.len() > self.cfg.data_size {
            return Err(Error::PayloadTooLarge);
        }
        if non_crc_len > header.len() || non_crc_len > TX_MAX_NON_CRC_LEN {
            return Err(Error::InvalidPrefix {
                prefix: non_crc_len,
                header: header.len(),
            });
        }

        self.reclaim(io)?;

        let idx = self.free.front().ok_or(Error::NoDescriptorAvailable)?;
        let desc = self.cfg.desc_addr(idx);

        // Fill the buffers before enabling the descriptor
        io.write_bytes(self.cfg.header_addr(idx), header)?;
        if !data.is_empty() {
            io.write_bytes(self.cfg.data_addr(idx), data)?;
        }
        io.write_u32(desc + TxDescriptor::data_len_offset(), data.len() as u32)?;

        let mut flags = self.base_flags(idx) | TxFlags::HEADER_CRC | TxFlags::ENABLE;
        if !data.is_empty() {
            flags |= TxFlags::DATA_CRC;
        }

        // Hand over to the hardware by writing the control word last
        io.write_u32(
            desc + TxDescriptor::ctrl_offset(),
            TxDescriptor::ctrl_word(flags, non_crc_len, header.len()),
        )?;

        self.free.pop_front();
        self.busy.push_back(idx);

        trace!(
            "TX descriptor {idx} enabled, header {} data {} bytes",
            header.len(),
            data.len()
        );

        dma.start_tx()
    }

    /// Number of descriptors in the table
    pub fn capacity(&self) -> usize {
        self.cfg.capacity
    }

    /// Number of descriptors on the free queue.  Does not reclaim.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of descriptors owned, or last known to be owned, by hardware
    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    /// Busy descriptor indices, oldest first
    pub fn busy(&self) -> impl Iterator<Item = usize> + '_ {
        self.busy.iter()
    }

    pub fn config(&self) -> &TxConfig {
        &self.cfg
    }

    /// Counters for completed transmissions
    pub fn stats(&self) -> RingStats {
        self.stats
    }

    fn base_flags(&self, idx: usize) -> TxFlags {
        let mut flags = TxFlags::empty();
        if idx == self.cfg.capacity - 1 {
            flags |= TxFlags::WRAP;
        }
        if self.cfg.irq {
            flags |= TxFlags::IRQ;
        }
        flags
    }
}
